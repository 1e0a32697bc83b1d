//! Embedded document store for tip records, the guide directory, and the
//! notification audit log.
//!
//! Uses redb; values are serialized JSON. Tip records are append-only and
//! keyed by payment-intent id, which is what makes the verify-poll/webhook
//! race safe: whichever path claims the key first wins, the other observes
//! the existing record.

use anyhow::Result;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Key: payment-intent id. Value: serialized TipRecord JSON.
const TIPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tips");
/// Key: guide id. Value: serialized Guide JSON.
const GUIDES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("guides");
/// Key: "<payment-intent id>:<recipient>". Value: serialized NotificationRecord JSON.
const NOTIFICATIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("notifications");

/// Bound on the case-insensitive guide-name scan.
pub const GUIDE_SCAN_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TipRecord {
    pub payment_intent_id: String,
    pub session_id: String,
    /// Major units.
    pub amount: f64,
    pub currency: String,
    pub recipient_type: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub sender_id: String,
    pub sender_name: String,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guide {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Guide {
    /// Candidate name fields in match-priority order.
    pub fn candidate_names(&self) -> [Option<&str>; 3] {
        [
            self.name.as_deref(),
            self.full_name.as_deref(),
            self.display_name.as_deref(),
        ]
    }

    pub fn best_name(&self) -> Option<&str> {
        self.candidate_names().into_iter().flatten().next()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub to: String,
    pub subject: String,
    /// "sent" | "failed"
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of attempting to persist a tip record.
#[derive(Debug)]
pub enum TipClaim {
    /// This caller wrote the record and owns the follow-up side effects.
    Recorded,
    /// Another path already recorded this payment; no side effects here.
    Duplicate(TipRecord),
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Create a new database or open an existing one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        // Create tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TIPS_TABLE)?;
            let _ = write_txn.open_table(GUIDES_TABLE)?;
            let _ = write_txn.open_table(NOTIFICATIONS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!("store initialized with tips, guides, notifications tables");

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert the record unless one already exists for its payment-intent id.
    /// The check and the insert share one write transaction, and redb
    /// serializes write transactions, so exactly one concurrent caller
    /// observes `Recorded`.
    pub fn claim_tip(&self, record: &TipRecord) -> Result<TipClaim> {
        let write_txn = self.db.begin_write()?;
        let claim = {
            let mut table = write_txn.open_table(TIPS_TABLE)?;
            let existing = table
                .get(record.payment_intent_id.as_str())?
                .map(|guard| serde_json::from_slice::<TipRecord>(guard.value()))
                .transpose()?;
            match existing {
                Some(prior) => TipClaim::Duplicate(prior),
                None => {
                    let value = serde_json::to_vec(record)?;
                    table.insert(record.payment_intent_id.as_str(), value.as_slice())?;
                    TipClaim::Recorded
                }
            }
        };
        write_txn.commit()?;
        if let TipClaim::Recorded = claim {
            tracing::debug!(
                payment_intent_id = %record.payment_intent_id,
                "recorded tip payment"
            );
        }
        Ok(claim)
    }

    pub fn get_tip(&self, payment_intent_id: &str) -> Result<Option<TipRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TIPS_TABLE)?;
        match table.get(payment_intent_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_guide(&self, guide: &Guide) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GUIDES_TABLE)?;
            let value = serde_json::to_vec(guide)?;
            table.insert(guide.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_guide(&self, id: &str) -> Result<Option<Guide>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GUIDES_TABLE)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Exact match over the candidate name fields. Field priority wins over
    /// key order; within one field, the lowest guide id wins (redb iterates
    /// in key order), so first-match is deterministic.
    pub fn find_guide_by_exact_name(&self, name: &str) -> Result<Option<Guide>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GUIDES_TABLE)?;
        let mut best: Option<(usize, Guide)> = None;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let guide: Guide = serde_json::from_slice(value.value())?;
            let hit = guide
                .candidate_names()
                .iter()
                .position(|candidate| *candidate == Some(name));
            if let Some(priority) = hit {
                let better = best
                    .as_ref()
                    .map(|(best_priority, _)| priority < *best_priority)
                    .unwrap_or(true);
                if better {
                    best = Some((priority, guide));
                }
            }
        }
        Ok(best.map(|(_, guide)| guide))
    }

    /// Case-insensitive scan over at most `GUIDE_SCAN_LIMIT` records,
    /// comparing the same candidate fields. First hit in key order wins.
    pub fn scan_guides_by_name_ci(&self, name: &str) -> Result<Option<Guide>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GUIDES_TABLE)?;
        for entry in table.iter()?.take(GUIDE_SCAN_LIMIT) {
            let (_, value) = entry?;
            let guide: Guide = serde_json::from_slice(value.value())?;
            let hit = guide
                .candidate_names()
                .into_iter()
                .flatten()
                .any(|candidate| candidate.eq_ignore_ascii_case(name));
            if hit {
                return Ok(Some(guide));
            }
        }
        Ok(None)
    }

    /// Append one row per dispatched email. Best-effort audit trail.
    pub fn append_notification(
        &self,
        payment_intent_id: &str,
        record: &NotificationRecord,
    ) -> Result<()> {
        let key = format!("{}:{}", payment_intent_id, record.to);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTIFICATIONS_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn notification_count(&self, payment_intent_id: &str) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NOTIFICATIONS_TABLE)?;
        let mut count = 0;
        for entry in table.iter()? {
            let (key, _) = entry?;
            if key.value().starts_with(&format!("{payment_intent_id}:")) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn record(intent: &str) -> TipRecord {
        TipRecord {
            payment_intent_id: intent.to_string(),
            session_id: "cs_1".to_string(),
            amount: 10.0,
            currency: "gbp".to_string(),
            recipient_type: "guide".to_string(),
            recipient_id: "g1".to_string(),
            recipient_name: "Alex".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Sam".to_string(),
            message: String::new(),
            status: "completed".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn second_claim_returns_duplicate() {
        let (_dir, store) = temp_store();
        let rec = record("pi_1");

        assert!(matches!(store.claim_tip(&rec).unwrap(), TipClaim::Recorded));
        match store.claim_tip(&rec).unwrap() {
            TipClaim::Duplicate(prior) => assert_eq!(prior.payment_intent_id, "pi_1"),
            TipClaim::Recorded => panic!("duplicate claim must not re-record"),
        }
        assert!(store.get_tip("pi_1").unwrap().is_some());
    }

    #[test]
    fn exact_name_match_prefers_field_priority_then_key_order() {
        let (_dir, store) = temp_store();
        store
            .put_guide(&Guide {
                id: "g2".to_string(),
                display_name: Some("Alex".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .put_guide(&Guide {
                id: "g5".to_string(),
                name: Some("Alex".to_string()),
                ..Default::default()
            })
            .unwrap();
        // `name` outranks `display_name` even though g2 sorts first.
        let hit = store.find_guide_by_exact_name("Alex").unwrap().unwrap();
        assert_eq!(hit.id, "g5");
    }

    #[test]
    fn case_insensitive_scan_finds_guide() {
        let (_dir, store) = temp_store();
        store
            .put_guide(&Guide {
                id: "g1".to_string(),
                full_name: Some("Jordan Reyes".to_string()),
                email: Some("jordan@example.com".to_string()),
                ..Default::default()
            })
            .unwrap();
        let hit = store.scan_guides_by_name_ci("jordan reyes").unwrap().unwrap();
        assert_eq!(hit.id, "g1");
        assert!(store.scan_guides_by_name_ci("nobody").unwrap().is_none());
    }
}
