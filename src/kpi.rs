//! Operational KPIs and turn distributions over a filtered set of turns.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{rate_pct, round2, Turn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationalKpis {
    pub total: u64,
    pub served: u64,
    pub abandoned: u64,
    pub attendance_rate: f64,
    pub abandonment_rate: f64,
    pub avg_wait_seconds: i64,
    pub avg_service_seconds: i64,
    pub avg_wait_minutes: f64,
    pub avg_service_minutes: f64,
    pub turns_per_day: i64,
    pub active_days: usize,
}

pub fn operational_kpis(turns: &[Turn]) -> OperationalKpis {
    let total = turns.len() as i64;
    let served = turns.iter().filter(|t| t.is_served()).count() as i64;
    let abandoned = turns.iter().filter(|t| t.is_abandoned()).count() as i64;
    let days: BTreeSet<NaiveDate> = turns.iter().map(|t| t.date).collect();

    let avg_wait_seconds = average(turns.iter().map(|t| t.wait_seconds));
    let avg_service_seconds = average(turns.iter().map(|t| t.service_seconds));

    OperationalKpis {
        total: total as u64,
        served: served as u64,
        abandoned: abandoned as u64,
        attendance_rate: round2(rate_pct(served, total)),
        abandonment_rate: round2(rate_pct(abandoned, total)),
        avg_wait_seconds,
        avg_service_seconds,
        avg_wait_minutes: round1(avg_wait_seconds as f64 / 60.0),
        avg_service_minutes: round1(avg_service_seconds as f64 / 60.0),
        turns_per_day: if days.is_empty() {
            0
        } else {
            (total as f64 / days.len() as f64).round() as i64
        },
        active_days: days.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDistribution {
    pub total: u64,
    /// Mean of the recorded total durations; turns without one are skipped.
    pub avg_total_seconds: f64,
    pub by_letter: Vec<(String, u64)>,
    pub by_module: Vec<(i64, u64)>,
    pub by_day: Vec<(NaiveDate, u64)>,
}

pub fn distribution(turns: &[Turn]) -> TurnDistribution {
    let mut letters: BTreeMap<&str, u64> = BTreeMap::new();
    let mut modules: BTreeMap<i64, u64> = BTreeMap::new();
    let mut days: BTreeMap<NaiveDate, u64> = BTreeMap::new();

    for turn in turns {
        *letters.entry(turn.ticket_letter.as_str()).or_default() += 1;
        *modules.entry(turn.module).or_default() += 1;
        *days.entry(turn.date).or_default() += 1;
    }

    let durations: Vec<i64> = turns.iter().filter_map(|t| t.total_seconds).collect();
    let avg_total_seconds = if durations.is_empty() {
        0.0
    } else {
        round2(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
    };

    let mut by_letter: Vec<(String, u64)> = letters
        .into_iter()
        .map(|(letter, count)| (letter.to_string(), count))
        .collect();
    by_letter.sort_by(|a, b| b.1.cmp(&a.1));

    let mut by_module: Vec<(i64, u64)> = modules.into_iter().collect();
    by_module.sort_by(|a, b| b.1.cmp(&a.1));

    TurnDistribution {
        total: turns.len() as u64,
        avg_total_seconds,
        by_letter,
        by_module,
        by_day: days.into_iter().collect(),
    }
}

fn average(values: impl Iterator<Item = i64>) -> i64 {
    let (sum, count) = values.fold((0i64, 0i64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as i64
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
