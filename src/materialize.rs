//! Regenerates the derived collections from stored turns.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::loader::{BatchLoader, LoadReport};
use crate::models::{KioskDailyMetric, TurnFilter};
use crate::peak;
use crate::store::{Collection, Store};

const PEAK_HOUR_BATCH: usize = 100;

/// Assumed by the daily generator until kiosks report real telemetry.
pub const ASSUMED_UPTIME_PCT: f64 = 100.0;
pub const ASSUMED_RESPONSE_MS: f64 = 1200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeakRebuild {
    pub removed: u64,
    pub buckets: u64,
    pub load: LoadReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KioskRebuild {
    pub kiosk_code: String,
    pub kiosk_id: i64,
    pub removed: u64,
    pub days: u64,
    pub transactions: u64,
}

pub async fn rebuild_peak_hours(store: &dyn Store) -> Result<PeakRebuild, StoreError> {
    let removed = store.delete_all(Collection::PeakHours).await?;
    let turns = store.find_turns(&TurnFilter::default()).await?;
    let buckets = peak::bucket_turns(&turns);
    let total = buckets.len() as u64;

    let mut loader = BatchLoader::new(store, PEAK_HOUR_BATCH, total);
    for bucket in buckets {
        loader.push(bucket).await;
    }
    let load = loader.finish().await;

    info!(removed, buckets = total, inserted = load.succeeded, "peak hours rebuilt");
    Ok(PeakRebuild {
        removed,
        buckets: total,
        load,
    })
}

/// Returns `None` when no kiosk is registered under `kiosk_code`.
pub async fn rebuild_kiosk_metrics(
    store: &dyn Store,
    kiosk_code: &str,
) -> Result<Option<KioskRebuild>, StoreError> {
    let Some(kiosk) = store.find_kiosk(kiosk_code).await? else {
        warn!(kiosk = kiosk_code, "kiosk not registered, skipping metrics");
        return Ok(None);
    };

    let removed = store.delete_kiosk_metrics(kiosk.id).await?;
    let filter = TurnFilter {
        kiosk_id: Some(kiosk.id),
        ..TurnFilter::default()
    };
    let per_day = store.turn_counts_by_day(&filter).await?;

    let mut transactions = 0;
    for (date, count) in &per_day {
        store
            .upsert_kiosk_metric(&KioskDailyMetric {
                kiosk_id: kiosk.id,
                date: *date,
                uptime_pct: ASSUMED_UPTIME_PCT,
                transactions: *count as i64,
                errors: 0,
                avg_response_ms: Some(ASSUMED_RESPONSE_MS),
            })
            .await?;
        transactions += count;
    }

    info!(
        kiosk = kiosk_code,
        removed,
        days = per_day.len(),
        transactions,
        "kiosk metrics rebuilt"
    );
    Ok(Some(KioskRebuild {
        kiosk_code: kiosk.code,
        kiosk_id: kiosk.id,
        removed,
        days: per_day.len() as u64,
        transactions,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::models::DateRange;
    use crate::peak::tests::new_turn_at;
    use crate::store::{Batch, MemoryStore};

    #[tokio::test]
    async fn peak_hours_are_replaced_not_appended() {
        let store = MemoryStore::new();
        let turns = vec![
            new_turn_at("2025-02-14 09:05:00"),
            new_turn_at("2025-02-14 09:45:00"),
            new_turn_at("2025-02-14 14:00:00"),
        ];
        store.bulk_insert(Batch::Turns(turns)).await.unwrap();

        let first = rebuild_peak_hours(&store).await.unwrap();
        assert_eq!(first.buckets, 2);
        assert_eq!(first.load.succeeded, 2);

        let second = rebuild_peak_hours(&store).await.unwrap();
        assert_eq!(second.removed, 2);
        let stored = store.find_peak_hours(&DateRange::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!((stored[0].hour, stored[0].total_turns), (9, 2));
    }

    #[tokio::test]
    async fn kiosk_metrics_follow_daily_counts() {
        let store = MemoryStore::new();
        let facility = store.upsert_facility("CAC", "GYE", None).await.unwrap();
        let seen = NaiveDateTime::parse_from_str("2025-02-14 08:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let kiosk = store
            .upsert_kiosk("TOTEM-SM-01", facility.id, seen)
            .await
            .unwrap();

        let mut turns = Vec::new();
        for issued in ["2025-02-14 09:00:00", "2025-02-14 10:00:00", "2025-02-15 09:00:00"] {
            let mut turn = new_turn_at(issued);
            turn.kiosk_id = Some(kiosk.id);
            turns.push(turn);
        }
        turns.push(new_turn_at("2025-02-15 11:00:00"));
        store.bulk_insert(Batch::Turns(turns)).await.unwrap();

        let rebuild = rebuild_kiosk_metrics(&store, "TOTEM-SM-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rebuild.days, 2);
        assert_eq!(rebuild.transactions, 3);

        let metrics = store
            .find_kiosk_metrics(Some(kiosk.id), &DateRange::default())
            .await
            .unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].transactions, 2);
        assert_eq!(metrics[0].uptime_pct, ASSUMED_UPTIME_PCT);
        assert_eq!(metrics[1].avg_response_ms, Some(ASSUMED_RESPONSE_MS));
    }

    #[tokio::test]
    async fn unknown_kiosk_is_skipped() {
        let store = MemoryStore::new();
        assert!(rebuild_kiosk_metrics(&store, "NOPE").await.unwrap().is_none());
    }
}
