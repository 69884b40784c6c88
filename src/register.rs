//! The register: one entry point for saving, reading, and deleting
//! client records across both storage tiers.
//!
//! Saves go to the primary store first. A quota failure at any tier is
//! never retried there; it surfaces as a decision point so the caller can
//! pick a recovery action. Any other failure falls through to the next
//! tier. Reads degrade the same way, ending at an empty register rather
//! than an error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RegisterConfig;
use crate::db::fallback::FallbackStore;
use crate::db::primary::PrimaryStore;
use crate::db::{
    BackgroundImage, ClientRecord, ClientStore, SaveOutcome, StorageTier,
};
use crate::error::{FailureKind, StoreError};

/// Result of saving a background image.
///
/// Background images are cosmetic: a quota failure is a warning, not a
/// decision point, and there is no fallback tier for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSaveOutcome {
    Saved,
    CapacityWarning,
}

/// Coordinates the two storage tiers behind one interface.
pub struct Register {
    primary: Option<Arc<PrimaryStore>>,
    tiers: Vec<Arc<dyn ClientStore>>,
}

impl Register {
    /// Open the register from configuration.
    ///
    /// A primary store that fails to open is logged and skipped; the
    /// register then runs on the fallback tier alone, and maintenance
    /// operations report the primary store as unavailable.
    pub async fn open(config: &RegisterConfig) -> Self {
        let primary = match PrimaryStore::open(config.primary_db_path()).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!(error = %err, "primary store unavailable; running on the fallback tier");
                None
            }
        };
        let fallback = Arc::new(FallbackStore::new(config.fallback_path()));
        Self::new(primary, fallback)
    }

    pub fn new(primary: Option<Arc<PrimaryStore>>, fallback: Arc<FallbackStore>) -> Self {
        let mut tiers: Vec<Arc<dyn ClientStore>> = Vec::new();
        if let Some(primary) = &primary {
            tiers.push(primary.clone());
        }
        tiers.push(fallback);
        Self { primary, tiers }
    }

    /// Save a record, cascading across tiers.
    ///
    /// `Ok(SaveOutcome::QuotaExceeded { .. })` means the record was NOT
    /// saved and the caller must pick a recovery action; `Err` means every
    /// tier failed for non-quota reasons.
    pub async fn save_client(&self, record: &ClientRecord) -> Result<SaveOutcome, StoreError> {
        save_to_tiers(&self.tiers, record).await
    }

    /// Reduced-fidelity save: retry with the photo attachment cleared.
    ///
    /// On success the stored copy is the final form of the record; the
    /// original attachment is not retained anywhere.
    pub async fn save_client_without_photo(
        &self,
        record: &ClientRecord,
    ) -> Result<SaveOutcome, StoreError> {
        save_to_tiers(&self.tiers, &record.without_photo()).await
    }

    /// Every stored record, newest first. Read failures never surface as
    /// errors; the worst case is an empty register plus a logged warning.
    pub async fn load_clients(&self) -> Vec<ClientRecord> {
        load_from_tiers(&self.tiers).await
    }

    /// Delete a record. The first tier is authoritative; removal of
    /// backup copies from later tiers is best-effort and never surfaced.
    pub async fn delete_client(&self, id: i64) -> Result<bool, StoreError> {
        delete_from_tiers(&self.tiers, id).await
    }

    /// Capacity recovery: clear photo attachments on records older than
    /// the threshold. Returns the number of records demoted.
    pub async fn strip_photos_older_than(&self, days: u32) -> Result<u64, StoreError> {
        self.primary()?.strip_photos_older_than(days).await
    }

    /// Capacity recovery: delete records older than the threshold.
    /// Destructive; callers must confirm with the user first.
    pub async fn delete_records_older_than(&self, days: u32) -> Result<u64, StoreError> {
        self.primary()?.delete_records_older_than(days).await
    }

    pub async fn save_background(
        &self,
        image: &BackgroundImage,
    ) -> Result<BackgroundSaveOutcome, StoreError> {
        match self.primary()?.save_background(image).await {
            Ok(()) => Ok(BackgroundSaveOutcome::Saved),
            Err(err) if err.classify() == FailureKind::Quota => {
                warn!(error = %err, "background image rejected at capacity limit");
                Ok(BackgroundSaveOutcome::CapacityWarning)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list_backgrounds(&self) -> Result<Vec<BackgroundImage>, StoreError> {
        self.primary()?.list_backgrounds().await
    }

    pub async fn clear_backgrounds(&self) -> Result<u64, StoreError> {
        self.primary()?.clear_backgrounds().await
    }

    fn primary(&self) -> Result<&PrimaryStore, StoreError> {
        self.primary
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("primary store is not available".to_string()))
    }
}

async fn save_to_tiers(
    tiers: &[Arc<dyn ClientStore>],
    record: &ClientRecord,
) -> Result<SaveOutcome, StoreError> {
    let mut last_err: Option<StoreError> = None;
    for tier in tiers {
        match tier.upsert_client(record).await {
            Ok(()) => {
                let landed = tier.tier();
                return Ok(SaveOutcome::Saved {
                    tier: landed,
                    degraded: landed != StorageTier::Primary,
                });
            }
            Err(err) => match err.classify() {
                FailureKind::Quota => {
                    warn!(tier = tier.tier().as_str(), error = %err, "save hit the capacity limit");
                    return Ok(SaveOutcome::QuotaExceeded {
                        record: record.clone(),
                    });
                }
                FailureKind::Other => {
                    warn!(tier = tier.tier().as_str(), error = %err, "save failed; trying next tier");
                    last_err = Some(err);
                }
            },
        }
    }
    Err(last_err
        .unwrap_or_else(|| StoreError::Unavailable("no storage tiers configured".to_string())))
}

async fn load_from_tiers(tiers: &[Arc<dyn ClientStore>]) -> Vec<ClientRecord> {
    for tier in tiers {
        match tier.list_clients().await {
            Ok(mut records) => {
                sort_newest_first(&mut records);
                return records;
            }
            Err(err) => {
                warn!(tier = tier.tier().as_str(), error = %err, "read failed; trying next tier");
            }
        }
    }
    warn!("every storage tier failed to read; presenting an empty register");
    Vec::new()
}

async fn delete_from_tiers(tiers: &[Arc<dyn ClientStore>], id: i64) -> Result<bool, StoreError> {
    let mut tiers = tiers.iter();
    let Some(authoritative) = tiers.next() else {
        return Err(StoreError::Unavailable(
            "no storage tiers configured".to_string(),
        ));
    };
    let removed = authoritative.delete_client(id).await?;
    for tier in tiers {
        if let Err(err) = tier.delete_client(id).await {
            debug!(tier = tier.tier().as_str(), error = %err, "backup-copy delete failed; ignoring");
        }
    }
    Ok(removed)
}

fn sort_newest_first(records: &mut [ClientRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    use crate::db::{
        allocate_client_id, ClientRecord, ClientStore, SaveOutcome, Signature, StorageTier,
    };
    use crate::error::StoreError;

    use super::{delete_from_tiers, load_from_tiers, save_to_tiers};

    /// How a scripted tier responds to an operation.
    #[derive(Debug, Clone, Copy)]
    enum Mode {
        Ok,
        Quota,
        /// Quota signalled only through the message text, not the
        /// structured variant.
        QuotaByMessage,
        Other,
        Unavailable,
    }

    impl Mode {
        fn error(self) -> StoreError {
            match self {
                Mode::Ok => unreachable!("Ok mode has no error"),
                Mode::Quota => StoreError::QuotaExceeded("capacity limit reached".to_string()),
                Mode::QuotaByMessage => {
                    StoreError::Write("backend says: QuotaError code 22".to_string())
                }
                Mode::Other => StoreError::Write("backend offline".to_string()),
                Mode::Unavailable => StoreError::Unavailable("cannot open store".to_string()),
            }
        }
    }

    struct ScriptedTier {
        tier: StorageTier,
        save_mode: Mode,
        list_mode: Mode,
        delete_mode: Mode,
        contents: Vec<ClientRecord>,
        saved: Mutex<Vec<ClientRecord>>,
        deleted: Mutex<Vec<i64>>,
    }

    impl ScriptedTier {
        fn new(tier: StorageTier) -> Self {
            Self {
                tier,
                save_mode: Mode::Ok,
                list_mode: Mode::Ok,
                delete_mode: Mode::Ok,
                contents: Vec::new(),
                saved: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }

        fn saving(mut self, mode: Mode) -> Self {
            self.save_mode = mode;
            self
        }

        fn listing(mut self, mode: Mode) -> Self {
            self.list_mode = mode;
            self
        }

        fn deleting(mut self, mode: Mode) -> Self {
            self.delete_mode = mode;
            self
        }

        fn containing(mut self, records: Vec<ClientRecord>) -> Self {
            self.contents = records;
            self
        }

        fn saved_records(&self) -> Vec<ClientRecord> {
            self.saved.lock().expect("saved lock").clone()
        }

        fn deleted_ids(&self) -> Vec<i64> {
            self.deleted.lock().expect("deleted lock").clone()
        }
    }

    #[async_trait]
    impl ClientStore for ScriptedTier {
        fn tier(&self) -> StorageTier {
            self.tier
        }

        async fn upsert_client(&self, record: &ClientRecord) -> Result<(), StoreError> {
            match self.save_mode {
                Mode::Ok => {
                    self.saved.lock().expect("saved lock").push(record.clone());
                    Ok(())
                }
                mode => Err(mode.error()),
            }
        }

        async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
            match self.list_mode {
                Mode::Ok => Ok(self.contents.clone()),
                mode => Err(mode.error()),
            }
        }

        async fn delete_client(&self, id: i64) -> Result<bool, StoreError> {
            match self.delete_mode {
                Mode::Ok => {
                    self.deleted.lock().expect("deleted lock").push(id);
                    Ok(true)
                }
                mode => Err(mode.error()),
            }
        }
    }

    fn record_aged(days_old: i64) -> ClientRecord {
        let created_at = Utc::now() - Duration::days(days_old);
        ClientRecord {
            id: allocate_client_id(created_at),
            code: format!("C-{days_old}"),
            name: "Cascade Client".to_string(),
            phone: "555-0123".to_string(),
            address: None,
            service_plan: "monthly".to_string(),
            payment_details: "card on file".to_string(),
            photo: Some("data:image/jpeg;base64,AAAA".to_string()),
            signature: Signature::Pending,
            created_at,
        }
    }

    fn tiers(
        primary: ScriptedTier,
        fallback: ScriptedTier,
    ) -> (Arc<ScriptedTier>, Arc<ScriptedTier>, Vec<Arc<dyn ClientStore>>) {
        let primary = Arc::new(primary);
        let fallback = Arc::new(fallback);
        let list: Vec<Arc<dyn ClientStore>> = vec![primary.clone(), fallback.clone()];
        (primary, fallback, list)
    }

    #[tokio::test]
    async fn save_lands_on_primary_when_healthy() {
        let (primary, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary),
            ScriptedTier::new(StorageTier::Fallback),
        );
        let record = record_aged(0);

        let outcome = save_to_tiers(&list, &record).await.expect("save");
        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                tier: StorageTier::Primary,
                degraded: false
            }
        );
        assert_eq!(primary.saved_records(), vec![record]);
        assert!(fallback.saved_records().is_empty());
    }

    #[tokio::test]
    async fn other_failure_falls_through_to_degraded_fallback_save() {
        let (_, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::Other),
            ScriptedTier::new(StorageTier::Fallback),
        );
        let record = record_aged(0);

        let outcome = save_to_tiers(&list, &record).await.expect("save");
        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                tier: StorageTier::Fallback,
                degraded: true
            }
        );
        assert_eq!(fallback.saved_records(), vec![record]);
    }

    #[tokio::test]
    async fn unavailable_primary_is_treated_like_any_other_failure() {
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::Unavailable),
            ScriptedTier::new(StorageTier::Fallback),
        );

        let outcome = save_to_tiers(&list, &record_aged(0)).await.expect("save");
        assert!(matches!(
            outcome,
            SaveOutcome::Saved {
                tier: StorageTier::Fallback,
                degraded: true
            }
        ));
    }

    #[tokio::test]
    async fn primary_quota_stops_the_cascade() {
        let (_, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::Quota),
            ScriptedTier::new(StorageTier::Fallback),
        );
        let record = record_aged(0);

        let outcome = save_to_tiers(&list, &record).await.expect("save");
        assert_eq!(outcome, SaveOutcome::QuotaExceeded { record });
        // The fallback tier is never attempted on a quota failure.
        assert!(fallback.saved_records().is_empty());
    }

    #[tokio::test]
    async fn quota_recognized_from_message_text_alone() {
        let (_, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::QuotaByMessage),
            ScriptedTier::new(StorageTier::Fallback),
        );

        let outcome = save_to_tiers(&list, &record_aged(0)).await.expect("save");
        assert!(matches!(outcome, SaveOutcome::QuotaExceeded { .. }));
        assert!(fallback.saved_records().is_empty());
    }

    #[tokio::test]
    async fn fallback_quota_after_primary_failure_surfaces_decision_point() {
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::Other),
            ScriptedTier::new(StorageTier::Fallback).saving(Mode::Quota),
        );
        let record = record_aged(0);

        let outcome = save_to_tiers(&list, &record).await.expect("save");
        assert_eq!(outcome, SaveOutcome::QuotaExceeded { record });
    }

    #[tokio::test]
    async fn both_tiers_failing_for_other_reasons_is_fatal() {
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).saving(Mode::Other),
            ScriptedTier::new(StorageTier::Fallback).saving(Mode::Other),
        );

        let err = save_to_tiers(&list, &record_aged(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
    }

    #[tokio::test]
    async fn load_returns_primary_contents_newest_first() {
        let oldest = record_aged(30);
        let newest = record_aged(1);
        let middle = record_aged(15);
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).containing(vec![
                oldest.clone(),
                newest.clone(),
                middle.clone(),
            ]),
            ScriptedTier::new(StorageTier::Fallback),
        );

        let loaded = load_from_tiers(&list).await;
        assert_eq!(loaded, vec![newest, middle, oldest]);
    }

    #[tokio::test]
    async fn load_ties_on_timestamp_break_by_higher_id() {
        let created_at = Utc::now() - Duration::days(2);
        let base = record_aged(2);
        let low = ClientRecord {
            id: 100,
            created_at,
            ..base.clone()
        };
        let high = ClientRecord {
            id: 200,
            created_at,
            ..base
        };
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).containing(vec![low.clone(), high.clone()]),
            ScriptedTier::new(StorageTier::Fallback),
        );

        let loaded = load_from_tiers(&list).await;
        assert_eq!(loaded, vec![high, low]);
    }

    #[tokio::test]
    async fn load_degrades_to_fallback_contents_on_primary_read_failure() {
        let backup = record_aged(5);
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).listing(Mode::Other),
            ScriptedTier::new(StorageTier::Fallback).containing(vec![backup.clone()]),
        );

        let loaded = load_from_tiers(&list).await;
        assert_eq!(loaded, vec![backup]);
    }

    #[tokio::test]
    async fn load_yields_empty_when_every_tier_fails() {
        let (_, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).listing(Mode::Unavailable),
            ScriptedTier::new(StorageTier::Fallback).listing(Mode::Other),
        );

        assert_eq!(load_from_tiers(&list).await, Vec::new());
    }

    #[tokio::test]
    async fn delete_swallows_backup_tier_failures() {
        let (primary, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary),
            ScriptedTier::new(StorageTier::Fallback).deleting(Mode::Other),
        );

        let removed = delete_from_tiers(&list, 42).await.expect("delete");
        assert!(removed);
        assert_eq!(primary.deleted_ids(), vec![42]);
        assert!(fallback.deleted_ids().is_empty());
    }

    #[tokio::test]
    async fn delete_failure_on_authoritative_tier_surfaces() {
        let (_, fallback, list) = tiers(
            ScriptedTier::new(StorageTier::Primary).deleting(Mode::Other),
            ScriptedTier::new(StorageTier::Fallback),
        );

        let err = delete_from_tiers(&list, 42).await.unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
        // The backup copy is left alone when the authoritative delete fails.
        assert!(fallback.deleted_ids().is_empty());
    }

    #[tokio::test]
    async fn reduced_fidelity_save_clears_only_the_photo() {
        let (primary, _, list) = tiers(
            ScriptedTier::new(StorageTier::Primary),
            ScriptedTier::new(StorageTier::Fallback),
        );
        let record = record_aged(0);

        let outcome = save_to_tiers(&list, &record.without_photo())
            .await
            .expect("save");
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));

        let saved = primary.saved_records();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].photo, None);
        assert_eq!(saved[0].id, record.id);
        assert_eq!(saved[0].name, record.name);
        assert_eq!(saved[0].created_at, record.created_at);
    }
}
