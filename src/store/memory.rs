use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex, RwLock};

use super::{Batch, Collection, CollectionLock, Store};
use crate::error::StoreError;
use crate::models::{
    DateRange, Facility, Kiosk, KioskDailyMetric, KioskState, PeakHourBucket, Survey, Turn,
    TurnFilter,
};

#[derive(Debug, Default)]
struct Arena {
    next_id: i64,
    turns: Vec<Turn>,
    surveys: Vec<Survey>,
    peak_hours: Vec<PeakHourBucket>,
    kiosk_metrics: BTreeMap<(i64, NaiveDate), KioskDailyMetric>,
    facilities: Vec<Facility>,
    kiosks: Vec<Kiosk>,
}

impl Arena {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store. Ids are shared across collections and never reused.
#[derive(Debug, Default)]
pub struct MemoryStore {
    arena: RwLock<Arena>,
    insert_calls: AtomicUsize,
    failing_inserts: std::sync::Mutex<BTreeSet<usize>>,
    collection_locks: std::sync::Mutex<BTreeMap<Collection, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the n-th `bulk_insert` call (zero based) fail without writing anything.
    pub fn fail_insert_call(&self, call: usize) {
        if let Ok(mut failing) = self.failing_inserts.lock() {
            failing.insert(call);
        }
    }

    fn should_fail(&self, call: usize) -> bool {
        self.failing_inserts
            .lock()
            .map(|failing| failing.contains(&call))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lock_collection(
        &self,
        collection: Collection,
    ) -> Result<CollectionLock, StoreError> {
        let lock = {
            let mut locks = self
                .collection_locks
                .lock()
                .map_err(|_| StoreError::Unavailable("collection lock table poisoned".into()))?;
            Arc::clone(locks.entry(collection).or_default())
        };
        Ok(CollectionLock::Memory(lock.lock_owned().await))
    }

    async fn bulk_insert(&self, batch: Batch) -> Result<u64, StoreError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(call) {
            return Err(StoreError::Unavailable(format!(
                "injected failure on insert call {call}"
            )));
        }

        let mut arena = self.arena.write().await;
        let inserted = batch.len() as u64;
        match batch {
            Batch::Turns(rows) => {
                for row in rows {
                    let id = arena.allocate();
                    arena.turns.push(Turn::from_new(id, row));
                }
            }
            Batch::Surveys(rows) => {
                for row in rows {
                    let id = arena.allocate();
                    arena.surveys.push(Survey {
                        id,
                        nps_score: row.nps_score,
                        rating_label: row.rating_label,
                        comment: row.comment,
                        age_range: row.age_range,
                    });
                }
            }
            Batch::PeakHours(rows) => {
                for row in rows {
                    arena
                        .peak_hours
                        .retain(|existing| (existing.date, existing.hour) != (row.date, row.hour));
                    arena.peak_hours.push(row);
                }
            }
        }
        Ok(inserted)
    }

    async fn delete_all(&self, collection: Collection) -> Result<u64, StoreError> {
        let mut arena = self.arena.write().await;
        let removed = match collection {
            Collection::Turns => std::mem::take(&mut arena.turns).len(),
            Collection::Surveys => std::mem::take(&mut arena.surveys).len(),
            Collection::PeakHours => std::mem::take(&mut arena.peak_hours).len(),
            Collection::KioskMetrics => std::mem::take(&mut arena.kiosk_metrics).len(),
        };
        Ok(removed as u64)
    }

    async fn delete_kiosk_metrics(&self, kiosk_id: i64) -> Result<u64, StoreError> {
        let mut arena = self.arena.write().await;
        let before = arena.kiosk_metrics.len();
        arena.kiosk_metrics.retain(|(kiosk, _), _| *kiosk != kiosk_id);
        Ok((before - arena.kiosk_metrics.len()) as u64)
    }

    async fn find_turns(&self, filter: &TurnFilter) -> Result<Vec<Turn>, StoreError> {
        let arena = self.arena.read().await;
        let mut turns: Vec<Turn> = arena
            .turns
            .iter()
            .filter(|turn| filter.matches(turn))
            .cloned()
            .collect();
        turns.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        Ok(turns)
    }

    async fn count_turns(&self, filter: &TurnFilter) -> Result<u64, StoreError> {
        let arena = self.arena.read().await;
        Ok(arena.turns.iter().filter(|turn| filter.matches(turn)).count() as u64)
    }

    async fn turn_counts_by_day(
        &self,
        filter: &TurnFilter,
    ) -> Result<BTreeMap<NaiveDate, u64>, StoreError> {
        let arena = self.arena.read().await;
        let mut counts = BTreeMap::new();
        for turn in arena.turns.iter().filter(|turn| filter.matches(turn)) {
            *counts.entry(turn.date).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_surveys(&self) -> Result<Vec<Survey>, StoreError> {
        Ok(self.arena.read().await.surveys.clone())
    }

    async fn count_surveys(&self) -> Result<u64, StoreError> {
        Ok(self.arena.read().await.surveys.len() as u64)
    }

    async fn find_peak_hours(&self, range: &DateRange) -> Result<Vec<PeakHourBucket>, StoreError> {
        let arena = self.arena.read().await;
        let mut buckets: Vec<PeakHourBucket> = arena
            .peak_hours
            .iter()
            .filter(|bucket| range.contains(bucket.date))
            .cloned()
            .collect();
        buckets.sort_by_key(|bucket| (bucket.date, bucket.hour));
        Ok(buckets)
    }

    async fn upsert_kiosk_metric(&self, metric: &KioskDailyMetric) -> Result<(), StoreError> {
        let mut arena = self.arena.write().await;
        arena
            .kiosk_metrics
            .insert((metric.kiosk_id, metric.date), metric.clone());
        Ok(())
    }

    async fn find_kiosk_metrics(
        &self,
        kiosk_id: Option<i64>,
        range: &DateRange,
    ) -> Result<Vec<KioskDailyMetric>, StoreError> {
        let arena = self.arena.read().await;
        Ok(arena
            .kiosk_metrics
            .values()
            .filter(|metric| kiosk_id.map_or(true, |id| metric.kiosk_id == id))
            .filter(|metric| range.contains(metric.date))
            .cloned()
            .collect())
    }

    async fn upsert_facility(
        &self,
        name: &str,
        city: &str,
        address: Option<&str>,
    ) -> Result<Facility, StoreError> {
        let mut arena = self.arena.write().await;
        if let Some(existing) = arena.facilities.iter().find(|f| f.name == name) {
            return Ok(existing.clone());
        }
        let facility = Facility {
            id: arena.allocate(),
            name: name.to_string(),
            city: city.to_string(),
            address: address.map(str::to_string),
            active: true,
        };
        arena.facilities.push(facility.clone());
        Ok(facility)
    }

    async fn upsert_kiosk(
        &self,
        code: &str,
        facility_id: i64,
        seen_at: NaiveDateTime,
    ) -> Result<Kiosk, StoreError> {
        let mut arena = self.arena.write().await;
        if let Some(existing) = arena.kiosks.iter_mut().find(|k| k.code == code) {
            existing.last_activity = Some(seen_at);
            return Ok(existing.clone());
        }
        let kiosk = Kiosk {
            id: arena.allocate(),
            code: code.to_string(),
            facility_id,
            state: KioskState::Active,
            last_activity: Some(seen_at),
        };
        arena.kiosks.push(kiosk.clone());
        Ok(kiosk)
    }

    async fn find_kiosks(&self) -> Result<Vec<Kiosk>, StoreError> {
        Ok(self.arena.read().await.kiosks.clone())
    }

    async fn find_kiosk(&self, code: &str) -> Result<Option<Kiosk>, StoreError> {
        let arena = self.arena.read().await;
        Ok(arena.kiosks.iter().find(|k| k.code == code).cloned())
    }

    async fn set_kiosk_state(
        &self,
        code: &str,
        state: KioskState,
    ) -> Result<Option<Kiosk>, StoreError> {
        let mut arena = self.arena.write().await;
        Ok(arena
            .kiosks
            .iter_mut()
            .find(|kiosk| kiosk.code == code)
            .map(|kiosk| {
                kiosk.state = state;
                kiosk.clone()
            }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::peak::tests::{bucket, new_turn_at};

    #[tokio::test]
    async fn turns_come_back_in_issue_order() {
        let store = MemoryStore::new();
        let turns = vec![
            new_turn_at("2025-02-14 11:00:00"),
            new_turn_at("2025-02-14 09:00:00"),
            new_turn_at("2025-02-15 08:00:00"),
        ];
        store.bulk_insert(Batch::Turns(turns)).await.unwrap();

        let filter = TurnFilter::in_range(DateRange::new(None, "2025-02-14".parse().ok()));
        let found = store.find_turns(&filter).await.unwrap();
        let hours: Vec<String> = found
            .iter()
            .map(|t| t.issued_at.format("%H").to_string())
            .collect();
        assert_eq!(hours, vec!["09", "11"]);
        assert_eq!(store.count_turns(&filter).await.unwrap(), 2);

        let per_day = store.turn_counts_by_day(&TurnFilter::default()).await.unwrap();
        assert_eq!(per_day.values().copied().collect::<Vec<u64>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn letter_filter_narrows_turns() {
        let store = MemoryStore::new();
        let mut rr = new_turn_at("2025-02-14 10:00:00");
        rr.ticket_letter = "RR".into();
        let turns = vec![new_turn_at("2025-02-14 09:00:00"), rr];
        store.bulk_insert(Batch::Turns(turns)).await.unwrap();

        let filter = TurnFilter {
            ticket_letter: Some("RR".into()),
            ..TurnFilter::default()
        };
        let found = store.find_turns(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ticket_letter, "RR");
        assert_eq!(store.count_turns(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn peak_hour_rows_are_keyed_by_date_and_hour() {
        let store = MemoryStore::new();
        let rows: Vec<PeakHourBucket> = vec![bucket("2025-02-14", 9, 4, 0)];
        store.bulk_insert(Batch::PeakHours(rows)).await.unwrap();
        store
            .bulk_insert(Batch::PeakHours(vec![bucket("2025-02-14", 9, 6, 1)]))
            .await
            .unwrap();

        let stored = store.find_peak_hours(&DateRange::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_turns, 6);
    }

    #[tokio::test]
    async fn collection_lock_waits_for_the_holder() {
        let store = MemoryStore::new();
        let held = store.lock_collection(Collection::Turns).await.unwrap();
        let _other = store.lock_collection(Collection::Surveys).await.unwrap();
        let released = AtomicBool::new(false);

        let ((), saw_release) = tokio::join!(
            async {
                tokio::task::yield_now().await;
                released.store(true, Ordering::SeqCst);
                drop(held);
            },
            async {
                let _lock = store.lock_collection(Collection::Turns).await.unwrap();
                released.load(Ordering::SeqCst)
            }
        );
        assert!(saw_release);
    }

    #[tokio::test]
    async fn injected_failure_writes_nothing() {
        let store = MemoryStore::new();
        store.fail_insert_call(0);
        let batch = Batch::Turns(vec![new_turn_at("2025-02-14 09:00:00")]);

        assert!(store.bulk_insert(batch.clone()).await.is_err());
        assert_eq!(store.count_turns(&TurnFilter::default()).await.unwrap(), 0);
        assert_eq!(store.bulk_insert(batch).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn kiosks_are_upserted_by_code() {
        let store = MemoryStore::new();
        let facility = store.upsert_facility("CAC", "GYE", None).await.unwrap();
        let again = store.upsert_facility("CAC", "Quito", None).await.unwrap();
        assert_eq!(facility.id, again.id);

        let seen =
            NaiveDateTime::parse_from_str("2025-02-14 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let later = seen + chrono::Duration::hours(2);
        let kiosk = store.upsert_kiosk("T-1", facility.id, seen).await.unwrap();
        let refreshed = store.upsert_kiosk("T-1", facility.id, later).await.unwrap();
        assert_eq!(kiosk.id, refreshed.id);
        assert_eq!(refreshed.last_activity, Some(later));

        let updated = store
            .set_kiosk_state("T-1", KioskState::Maintenance)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, KioskState::Maintenance);
        assert!(store
            .set_kiosk_state("T-9", KioskState::Inactive)
            .await
            .unwrap()
            .is_none());
    }
}
