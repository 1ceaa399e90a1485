//! The storage collaborator. Ingestion and aggregation only see this trait.

mod memory;
mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::StoreError;
use crate::models::{
    DateRange, Facility, Kiosk, KioskDailyMetric, KioskState, NewSurvey, NewTurn, PeakHourBucket,
    Survey, Turn, TurnFilter,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Turns,
    Surveys,
    PeakHours,
    KioskMetrics,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Turns => "turns",
            Collection::Surveys => "surveys",
            Collection::PeakHours => "peak_hours",
            Collection::KioskMetrics => "kiosk_metrics",
        }
    }
}

/// Exclusive hold on one collection for a whole ingestion run. Dropping it releases the
/// collection; for Postgres the advisory lock ends with the rolled-back transaction.
pub enum CollectionLock {
    Memory(tokio::sync::OwnedMutexGuard<()>),
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
}

impl CollectionLock {
    pub async fn release(self) -> Result<(), StoreError> {
        match self {
            CollectionLock::Memory(guard) => drop(guard),
            CollectionLock::Postgres(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

/// Rows submitted together in one atomic insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Turns(Vec<NewTurn>),
    Surveys(Vec<NewSurvey>),
    PeakHours(Vec<PeakHourBucket>),
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Turns(rows) => rows.len(),
            Batch::Surveys(rows) => rows.len(),
            Batch::PeakHours(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collection(&self) -> Collection {
        match self {
            Batch::Turns(_) => Collection::Turns,
            Batch::Surveys(_) => Collection::Surveys,
            Batch::PeakHours(_) => Collection::PeakHours,
        }
    }
}

/// Record types the batch loader can buffer.
pub trait IntoBatch: Sized + Send {
    fn into_batch(rows: Vec<Self>) -> Batch;
}

impl IntoBatch for NewTurn {
    fn into_batch(rows: Vec<Self>) -> Batch {
        Batch::Turns(rows)
    }
}

impl IntoBatch for NewSurvey {
    fn into_batch(rows: Vec<Self>) -> Batch {
        Batch::Surveys(rows)
    }
}

impl IntoBatch for PeakHourBucket {
    fn into_batch(rows: Vec<Self>) -> Batch {
        Batch::PeakHours(rows)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Waits until no other writer, in this process or another, holds `collection`.
    async fn lock_collection(
        &self,
        collection: Collection,
    ) -> Result<CollectionLock, StoreError>;

    /// Inserts every row or none of them.
    async fn bulk_insert(&self, batch: Batch) -> Result<u64, StoreError>;

    async fn delete_all(&self, collection: Collection) -> Result<u64, StoreError>;

    async fn delete_kiosk_metrics(&self, kiosk_id: i64) -> Result<u64, StoreError>;

    /// Turns matching `filter`, ordered by issuance time then id.
    async fn find_turns(&self, filter: &TurnFilter) -> Result<Vec<Turn>, StoreError>;

    async fn count_turns(&self, filter: &TurnFilter) -> Result<u64, StoreError>;

    async fn turn_counts_by_day(
        &self,
        filter: &TurnFilter,
    ) -> Result<BTreeMap<NaiveDate, u64>, StoreError>;

    async fn find_surveys(&self) -> Result<Vec<Survey>, StoreError>;

    async fn count_surveys(&self) -> Result<u64, StoreError>;

    /// Buckets in range, ordered by date then hour.
    async fn find_peak_hours(&self, range: &DateRange) -> Result<Vec<PeakHourBucket>, StoreError>;

    async fn upsert_kiosk_metric(&self, metric: &KioskDailyMetric) -> Result<(), StoreError>;

    /// Metrics in range, ordered by kiosk then date.
    async fn find_kiosk_metrics(
        &self,
        kiosk_id: Option<i64>,
        range: &DateRange,
    ) -> Result<Vec<KioskDailyMetric>, StoreError>;

    async fn upsert_facility(
        &self,
        name: &str,
        city: &str,
        address: Option<&str>,
    ) -> Result<Facility, StoreError>;

    /// Creates the kiosk as active, or refreshes its last activity.
    async fn upsert_kiosk(
        &self,
        code: &str,
        facility_id: i64,
        seen_at: NaiveDateTime,
    ) -> Result<Kiosk, StoreError>;

    async fn find_kiosks(&self) -> Result<Vec<Kiosk>, StoreError>;

    async fn find_kiosk(&self, code: &str) -> Result<Option<Kiosk>, StoreError>;

    /// Returns the updated kiosk, or `None` when the code is unknown.
    async fn set_kiosk_state(
        &self,
        code: &str,
        state: KioskState,
    ) -> Result<Option<Kiosk>, StoreError>;
}
