//! Kiosk availability summaries over the daily metric rows.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{rate_pct, round2, Kiosk, KioskDailyMetric, KioskState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeSummary {
    pub kiosk_id: i64,
    pub kiosk_code: Option<String>,
    pub state: Option<KioskState>,
    pub days: usize,
    pub avg_uptime_pct: f64,
    pub target_pct: f64,
    pub meets_target: bool,
    pub transactions: i64,
    pub errors: i64,
    pub error_rate: f64,
    pub avg_response_ms: Option<f64>,
    pub period: Option<(NaiveDate, NaiveDate)>,
    pub history: Vec<KioskDailyMetric>,
}

/// Summary for one kiosk. `metrics` may contain rows for other kiosks; they are ignored.
pub fn summarize(kiosk_id: i64, metrics: &[KioskDailyMetric], target_pct: f64) -> UptimeSummary {
    let mut history: Vec<KioskDailyMetric> = metrics
        .iter()
        .filter(|metric| metric.kiosk_id == kiosk_id)
        .cloned()
        .collect();
    history.sort_by_key(|metric| metric.date);

    let days = history.len();
    let avg_uptime = if days == 0 {
        0.0
    } else {
        history.iter().map(|m| m.uptime_pct).sum::<f64>() / days as f64
    };
    let transactions: i64 = history.iter().map(|m| m.transactions).sum();
    let errors: i64 = history.iter().map(|m| m.errors).sum();

    let responses: Vec<f64> = history.iter().filter_map(|m| m.avg_response_ms).collect();
    let avg_response_ms = if responses.is_empty() {
        None
    } else {
        Some(round2(responses.iter().sum::<f64>() / responses.len() as f64))
    };

    UptimeSummary {
        kiosk_id,
        kiosk_code: None,
        state: None,
        days,
        avg_uptime_pct: round2(avg_uptime),
        target_pct,
        // An empty history never meets the target.
        meets_target: days > 0 && avg_uptime >= target_pct,
        transactions,
        errors,
        error_rate: round2(rate_pct(errors, transactions)),
        avg_response_ms,
        period: history.first().zip(history.last()).map(|(a, b)| (a.date, b.date)),
        history,
    }
}

/// One summary per known kiosk, plus any kiosk ids that only appear in the metrics.
pub fn summarize_all(
    kiosks: &[Kiosk],
    metrics: &[KioskDailyMetric],
    target_pct: f64,
) -> Vec<UptimeSummary> {
    let mut ids: BTreeMap<i64, Option<&Kiosk>> = kiosks.iter().map(|k| (k.id, Some(k))).collect();
    for metric in metrics {
        ids.entry(metric.kiosk_id).or_insert(None);
    }

    ids.into_iter()
        .map(|(id, kiosk)| {
            let mut summary = summarize(id, metrics, target_pct);
            if let Some(kiosk) = kiosk {
                summary.kiosk_code = Some(kiosk.code.clone());
                summary.state = Some(kiosk.state);
            }
            summary
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(kiosk_id: i64, date: &str, uptime: f64, tx: i64, errors: i64) -> KioskDailyMetric {
        KioskDailyMetric {
            kiosk_id,
            date: date.parse().unwrap(),
            uptime_pct: uptime,
            transactions: tx,
            errors,
            avg_response_ms: Some(1200.0),
        }
    }

    #[test]
    fn averages_uptime_and_error_rate() {
        let metrics = vec![
            metric(1, "2025-02-15", 99.9, 300, 3),
            metric(1, "2025-02-14", 99.9, 100, 1),
            metric(2, "2025-02-14", 50.0, 10, 10),
        ];
        let summary = summarize(1, &metrics, 99.9);

        assert_eq!(summary.days, 2);
        assert_eq!(summary.avg_uptime_pct, 99.9);
        assert!(summary.meets_target);
        assert_eq!(summary.error_rate, 1.0);
        assert_eq!(summary.avg_response_ms, Some(1200.0));
        let (from, to) = summary.period.unwrap();
        assert_eq!((from.to_string(), to.to_string()), ("2025-02-14".into(), "2025-02-15".into()));
    }

    #[test]
    fn below_target_is_flagged() {
        let metrics = vec![metric(1, "2025-02-14", 99.0, 10, 0)];
        let summary = summarize(1, &metrics, 99.9);
        assert!(!summary.meets_target);
        assert_eq!(summary.error_rate, 0.0);
    }

    #[test]
    fn no_history_means_no_period() {
        let summary = summarize(7, &[], 99.9);
        assert_eq!(summary.days, 0);
        assert!(!summary.meets_target);
        assert!(summary.period.is_none());
        assert!(summary.avg_response_ms.is_none());
    }

    #[test]
    fn summarize_all_covers_known_and_orphan_kiosks() {
        let kiosks = vec![Kiosk {
            id: 1,
            code: "TOTEM-SM-01".into(),
            facility_id: 1,
            state: KioskState::Active,
            last_activity: None,
        }];
        let metrics = vec![metric(3, "2025-02-14", 100.0, 5, 0)];
        let summaries = summarize_all(&kiosks, &metrics, 99.9);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].kiosk_code.as_deref(), Some("TOTEM-SM-01"));
        assert_eq!(summaries[0].days, 0);
        assert_eq!(summaries[1].kiosk_id, 3);
        assert!(summaries[1].meets_target);
    }
}
