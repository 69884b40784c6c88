//! Record types and the storage-tier contract.
//!
//! Two backends implement the `ClientStore` trait:
//!
//! - `primary`: a structured, queryable libSQL store (keyed by record id)
//! - `fallback`: a single serialized JSON collection in one flat file
//!
//! The register cascades over them in order; each successful save reports
//! which tier took the write so callers never have to infer it.

pub mod fallback;
pub mod primary;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Which store holds the authoritative copy of a record at write time.
///
/// Never persisted; returned on every successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Primary,
    Fallback,
}

impl StorageTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Signature capture state for a client record.
///
/// `Declined` is an explicit "no signature" marker, distinct from
/// `Pending` (not yet captured).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data_url", rename_all = "snake_case")]
pub enum Signature {
    Pending,
    Declined,
    Image(String),
}

const SIGNATURE_DECLINED_MARKER: &str = "declined";

impl Signature {
    /// Column form used by the primary store: NULL for pending, a marker
    /// for declined, otherwise the data URL itself. Data URLs always start
    /// with `data:`, so the marker cannot collide with image payloads.
    pub fn to_column(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Declined => Some(SIGNATURE_DECLINED_MARKER),
            Self::Image(data_url) => Some(data_url),
        }
    }

    pub fn from_column(raw: Option<String>) -> Self {
        match raw {
            None => Self::Pending,
            Some(value) if value == SIGNATURE_DECLINED_MARKER => Self::Declined,
            Some(data_url) => Self::Image(data_url),
        }
    }
}

/// A client intake record.
///
/// `id` and `created_at` are immutable once set; maintenance sweeps mutate
/// `photo` only or delete the record whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: i64,
    /// Human-facing record code; unique in practice, not enforced.
    pub code: String,
    pub name: String,
    pub phone: String,
    pub address: Option<String>,
    pub service_plan: String,
    pub payment_details: String,
    /// Binary-as-text (data URL) attachment. Absence is a valid,
    /// smaller-footprint state.
    pub photo: Option<String>,
    pub signature: Signature,
    /// Creation time; sole ordering and age key.
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the application when creating a record.
#[derive(Debug, Clone)]
pub struct NewClientParams {
    pub code: String,
    pub name: String,
    pub phone: String,
    pub address: Option<String>,
    pub service_plan: String,
    pub payment_details: String,
    pub photo: Option<String>,
    pub signature: Signature,
}

impl ClientRecord {
    /// Create a record stamped with the current time and a fresh id.
    pub fn new(params: NewClientParams) -> Self {
        let created_at = Utc::now();
        Self {
            id: allocate_client_id(created_at),
            code: params.code,
            name: params.name,
            phone: params.phone,
            address: params.address,
            service_plan: params.service_plan,
            payment_details: params.payment_details,
            photo: params.photo,
            signature: params.signature,
            created_at,
        }
    }

    /// Copy of this record with the photo attachment cleared.
    pub fn without_photo(&self) -> Self {
        Self {
            photo: None,
            ..self.clone()
        }
    }
}

/// Allocate a record id from its creation time: epoch millis scaled by
/// 1000 plus a random tie-break, so ids sort roughly by creation order
/// while two records created in the same millisecond stay distinct.
pub fn allocate_client_id(created_at: DateTime<Utc>) -> i64 {
    let millis = created_at.timestamp_millis();
    millis * 1000 + i64::from(rand::thread_rng().gen_range(0..1000u16))
}

/// A cosmetic background image, independent of client-record lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundImage {
    pub id: String,
    pub data_url: String,
}

impl BackgroundImage {
    pub fn new(data_url: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data_url,
        }
    }
}

/// Result of a save attempt through the register.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        tier: StorageTier,
        /// True when the write landed on a tier with weaker durability
        /// guarantees than the primary store.
        degraded: bool,
    },
    /// The tier hit its capacity limit. The record was not saved; the
    /// caller must pick a recovery action (reduced-fidelity save, strip
    /// old photos, or prune old records).
    QuotaExceeded { record: ClientRecord },
}

/// Per-record decision made by a maintenance sweep.
#[derive(Debug, Clone)]
pub enum SweepAction {
    Keep,
    /// Persist the updated copy in place. The store never rewrites `id`
    /// or `created_at`, whatever the updated copy carries.
    Update(ClientRecord),
    Delete,
}

/// Capability contract both storage tiers implement.
///
/// The register iterates tiers in order and makes cross-tier decisions
/// itself; backends only report their own failures.
#[async_trait]
pub trait ClientStore: Send + Sync {
    fn tier(&self) -> StorageTier;

    /// Insert or replace the record keyed by `record.id`.
    async fn upsert_client(&self, record: &ClientRecord) -> Result<(), StoreError>;

    /// Every stored record, in no particular order.
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;

    /// Remove the record with this id. Returns whether it existed.
    async fn delete_client(&self, id: i64) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::{allocate_client_id, ClientRecord, NewClientParams, Signature};

    fn sample_params() -> NewClientParams {
        NewClientParams {
            code: "C-001".to_string(),
            name: "Dana Whitfield".to_string(),
            phone: "555-0101".to_string(),
            address: Some("12 Harbor Rd".to_string()),
            service_plan: "weekly".to_string(),
            payment_details: "invoice net-30".to_string(),
            photo: Some("data:image/jpeg;base64,AAAA".to_string()),
            signature: Signature::Pending,
        }
    }

    #[test]
    fn ids_are_biased_by_creation_time() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
        // A full second apart always dominates the 0..1000 tie-break.
        assert!(allocate_client_id(earlier) < allocate_client_id(later));
    }

    #[test]
    fn without_photo_clears_only_the_photo() {
        let record = ClientRecord::new(sample_params());
        let reduced = record.without_photo();

        assert_eq!(reduced.photo, None);
        assert_eq!(reduced.id, record.id);
        assert_eq!(reduced.code, record.code);
        assert_eq!(reduced.name, record.name);
        assert_eq!(reduced.signature, record.signature);
        assert_eq!(reduced.created_at, record.created_at);
    }

    #[test]
    fn signature_column_roundtrip() {
        assert_eq!(Signature::from_column(None), Signature::Pending);
        assert_eq!(
            Signature::from_column(Some("declined".to_string())),
            Signature::Declined
        );

        let image = Signature::Image("data:image/png;base64,BBBB".to_string());
        let column = image.to_column().map(str::to_string);
        assert_eq!(Signature::from_column(column), image);

        assert_eq!(Signature::Pending.to_column(), None);
        assert_eq!(Signature::Declined.to_column(), Some("declined"));
    }
}
