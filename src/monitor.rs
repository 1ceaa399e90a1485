//! Point-in-time operational snapshot relative to an injected "now".

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{rate_pct, round2, DateRange, Kiosk, KioskState, Turn, TurnFilter};
use crate::store::Store;

const TREND_BUCKETS: i64 = 8;
const TREND_BUCKET_MINUTES: i64 = 15;
const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: &'static str,
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Critical,
    Warning,
    Normal,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Critical => "critical",
            OverallStatus::Warning => "warning",
            OverallStatus::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub label: String,
    pub turns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KioskActivity {
    pub kiosk_id: i64,
    pub code: String,
    pub state: KioskState,
    pub last_activity: Option<NaiveDateTime>,
    pub transactions_today: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub now: NaiveDateTime,
    /// No live queue feed exists; always zero.
    pub turns_in_queue: u64,
    pub last_hour: u64,
    pub today_total: u64,
    pub today_served: u64,
    pub today_abandoned: u64,
    pub abandonment_rate: f64,
    pub avg_wait_seconds: i64,
    pub avg_service_seconds: i64,
    pub projected_today: i64,
    pub kiosks_active: u64,
    pub kiosks_inactive: u64,
    pub kiosks_maintenance: u64,
    pub kiosks: Vec<KioskActivity>,
    pub alerts: Vec<Alert>,
    pub trend: Vec<TrendPoint>,
    pub last_hour_by_letter: Vec<(String, u64)>,
    pub meets_abandonment_target: bool,
    pub status: OverallStatus,
}

/// Reads today's turns, the last two hours of issued turns and the kiosk registry.
pub async fn capture(
    store: &dyn Store,
    now: NaiveDateTime,
    abandonment_target_pct: f64,
) -> Result<Snapshot, StoreError> {
    let today = TurnFilter::in_range(DateRange::new(Some(now.date()), None));
    let recent = TurnFilter {
        issued_since: Some(trend_start(now)),
        ..TurnFilter::default()
    };

    let today_turns = store.find_turns(&today).await?;
    let recent_turns = store.find_turns(&recent).await?;
    let kiosks = store.find_kiosks().await?;

    Ok(snapshot(
        now,
        &today_turns,
        &recent_turns,
        &kiosks,
        abandonment_target_pct,
    ))
}

pub fn snapshot(
    now: NaiveDateTime,
    today_turns: &[Turn],
    recent_turns: &[Turn],
    kiosks: &[Kiosk],
    abandonment_target_pct: f64,
) -> Snapshot {
    let total = today_turns.len() as i64;
    let served = today_turns.iter().filter(|t| t.is_served()).count() as i64;
    let abandoned = today_turns.iter().filter(|t| t.is_abandoned()).count() as i64;
    let abandonment = rate_pct(abandoned, total);

    let hour_ago = now - Duration::minutes(60);
    let last_hour: Vec<&Turn> = recent_turns
        .iter()
        .filter(|t| t.issued_at >= hour_ago)
        .collect();
    let mut by_letter: BTreeMap<&str, u64> = BTreeMap::new();
    for turn in &last_hour {
        *by_letter.entry(turn.ticket_letter.as_str()).or_default() += 1;
    }

    let count_state = |state: KioskState| kiosks.iter().filter(|k| k.state == state).count() as u64;
    let kiosks_inactive = count_state(KioskState::Inactive);
    let kiosks_maintenance = count_state(KioskState::Maintenance);

    let mut alerts = Vec::new();
    if abandonment > abandonment_target_pct {
        alerts.push(Alert {
            id: "high-abandonment",
            level: AlertLevel::Error,
            message: format!(
                "Current abandonment {abandonment:.2}% exceeds {abandonment_target_pct}%"
            ),
        });
    }
    if kiosks_inactive > 0 {
        alerts.push(Alert {
            id: "inactive-kiosks",
            level: AlertLevel::Warning,
            message: format!("{kiosks_inactive} kiosk(s) inactive"),
        });
    }
    if kiosks_maintenance > 0 {
        alerts.push(Alert {
            id: "maintenance-kiosks",
            level: AlertLevel::Info,
            message: format!("{kiosks_maintenance} kiosk(s) in maintenance"),
        });
    }

    let status = if alerts.iter().any(|a| a.level == AlertLevel::Error) {
        OverallStatus::Critical
    } else if alerts.iter().any(|a| a.level == AlertLevel::Warning) {
        OverallStatus::Warning
    } else {
        OverallStatus::Normal
    };

    let mut per_kiosk: BTreeMap<i64, u64> = BTreeMap::new();
    for kiosk_id in today_turns.iter().filter_map(|t| t.kiosk_id) {
        *per_kiosk.entry(kiosk_id).or_default() += 1;
    }

    Snapshot {
        now,
        turns_in_queue: 0,
        last_hour: last_hour.len() as u64,
        today_total: total as u64,
        today_served: served as u64,
        today_abandoned: abandoned as u64,
        abandonment_rate: round2(abandonment),
        avg_wait_seconds: mean(today_turns.iter().map(|t| t.wait_seconds)),
        avg_service_seconds: mean(today_turns.iter().map(|t| t.service_seconds)),
        projected_today: project_day_total(total, now),
        kiosks_active: count_state(KioskState::Active),
        kiosks_inactive,
        kiosks_maintenance,
        kiosks: kiosks
            .iter()
            .map(|kiosk| KioskActivity {
                kiosk_id: kiosk.id,
                code: kiosk.code.clone(),
                state: kiosk.state,
                last_activity: kiosk.last_activity,
                transactions_today: per_kiosk.get(&kiosk.id).copied().unwrap_or(0),
            })
            .collect(),
        alerts,
        trend: trend(now, recent_turns),
        last_hour_by_letter: by_letter
            .into_iter()
            .map(|(letter, count)| (letter.to_string(), count))
            .collect(),
        meets_abandonment_target: abandonment <= abandonment_target_pct,
        status,
    }
}

/// Eight 15-minute windows ending at `now`, oldest first, labelled by window end.
pub fn trend(now: NaiveDateTime, turns: &[Turn]) -> Vec<TrendPoint> {
    (0..TREND_BUCKETS)
        .rev()
        .map(|i| {
            let start = now - Duration::minutes((i + 1) * TREND_BUCKET_MINUTES);
            let end = now - Duration::minutes(i * TREND_BUCKET_MINUTES);
            let count = turns
                .iter()
                .filter(|t| t.issued_at >= start && t.issued_at < end)
                .count();
            TrendPoint {
                label: end.format("%H:%M").to_string(),
                turns: count as u64,
            }
        })
        .collect()
}

/// Extrapolates today's pace to the end of the day. With no elapsed minutes the
/// current total is returned unchanged.
pub fn project_day_total(current_total: i64, now: NaiveDateTime) -> i64 {
    let elapsed = i64::from(now.hour()) * 60 + i64::from(now.minute());
    if elapsed == 0 {
        return current_total;
    }
    let remaining = MINUTES_PER_DAY - elapsed;
    let rate = current_total as f64 / elapsed as f64;
    (current_total as f64 + rate * remaining as f64).round() as i64
}

fn trend_start(now: NaiveDateTime) -> NaiveDateTime {
    now - Duration::minutes(TREND_BUCKETS * TREND_BUCKET_MINUTES)
}

fn mean(values: impl Iterator<Item = i64>) -> i64 {
    let (sum, count) = values.fold((0i64, 0i64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as i64
    }
}
