//! Fixed-size batching in front of the store.
//!
//! A batch is inserted atomically. When the store rejects it, every row in it counts as
//! failed, even rows that were valid on their own; rows are not retried individually.

use serde::Serialize;
use tracing::{info, warn};

use crate::store::{IntoBatch, Store};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub succeeded: u64,
    pub failed_rows: u64,
    pub batches: u64,
    pub failed_batches: u64,
}

type ProgressFn<'a> = Box<dyn FnMut(&Progress) + Send + 'a>;

pub struct BatchLoader<'a, T: IntoBatch> {
    store: &'a dyn Store,
    batch_size: usize,
    expected_total: u64,
    buffer: Vec<T>,
    report: LoadReport,
    on_progress: Option<ProgressFn<'a>>,
}

impl<'a, T: IntoBatch> BatchLoader<'a, T> {
    /// `expected_total` is only used for progress percentages.
    pub fn new(store: &'a dyn Store, batch_size: usize, expected_total: u64) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            expected_total,
            buffer: Vec::with_capacity(batch_size),
            report: LoadReport::default(),
            on_progress: None,
        }
    }

    pub fn on_progress(mut self, callback: impl FnMut(&Progress) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub async fn push(&mut self, record: T) {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.submit().await;
        }
    }

    /// Submits any partial batch and returns the run counters.
    pub async fn finish(mut self) -> LoadReport {
        if !self.buffer.is_empty() {
            self.submit().await;
        }
        self.report
    }

    async fn submit(&mut self) {
        let rows = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let size = rows.len() as u64;
        self.report.batches += 1;

        match self.store.bulk_insert(T::into_batch(rows)).await {
            Ok(_) => {
                self.report.succeeded += size;
                let progress = Progress {
                    processed: self.report.succeeded,
                    total: self.expected_total,
                    percent: percent(self.report.succeeded, self.expected_total),
                };
                info!(
                    processed = progress.processed,
                    total = progress.total,
                    percent = format_args!("{:.1}", progress.percent),
                    "batch inserted"
                );
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(&progress);
                }
            }
            Err(err) => {
                self.report.failed_rows += size;
                self.report.failed_batches += 1;
                warn!(rows = size, error = %err, "batch insert failed");
            }
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::NewSurvey;
    use crate::store::MemoryStore;

    fn survey(score: i32) -> NewSurvey {
        NewSurvey {
            nps_score: score,
            rating_label: "Bueno".into(),
            comment: None,
            age_range: None,
        }
    }

    #[tokio::test]
    async fn flushes_full_and_partial_batches() {
        let store = MemoryStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut loader = BatchLoader::new(&store, 3, 7)
            .on_progress(move |p: &Progress| sink.lock().unwrap().push(p.processed));
        for score in 0..7 {
            loader.push(survey(score)).await;
        }
        let report = loader.finish().await;

        assert_eq!(report.succeeded, 7);
        assert_eq!(report.batches, 3);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(*seen.lock().unwrap(), vec![3, 6, 7]);
        assert_eq!(store.count_surveys().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn failed_batch_counts_every_row() {
        let store = MemoryStore::new();
        store.fail_insert_call(1);

        let mut loader = BatchLoader::new(&store, 2, 5);
        for score in 0..5 {
            loader.push(survey(score)).await;
        }
        let report = loader.finish().await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed_rows, 2);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.batches, 3);
        assert_eq!(store.count_surveys().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_stream_submits_nothing() {
        let store = MemoryStore::new();
        let loader: BatchLoader<'_, NewSurvey> = BatchLoader::new(&store, 10, 0);
        assert_eq!(loader.finish().await, LoadReport::default());
    }

    #[test]
    fn percent_handles_empty_totals() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
