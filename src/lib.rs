//! rollbook: a local-first client-record register for service businesses.
//!
//! Records (name, contact, service details, photo, signature) are kept
//! durable on a storage-constrained device by a two-tier store: a
//! structured primary database and a flat-file fallback. The register
//! keeps accepting writes as the device's capacity limit approaches,
//! classifies failures across both tiers, and offers deterministic,
//! reversible capacity-recovery operations (demote records by stripping
//! photo attachments, or prune records by age).

pub mod config;
pub mod db;
pub mod error;
pub mod register;

pub use config::RegisterConfig;
pub use db::{
    allocate_client_id, BackgroundImage, ClientRecord, ClientStore, NewClientParams, SaveOutcome,
    Signature, StorageTier, SweepAction,
};
pub use error::{ConfigError, FailureKind, StoreError};
pub use register::{BackgroundSaveOutcome, Register};
