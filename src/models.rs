use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Served,
    Abandoned,
}

impl TurnStatus {
    /// Source files mark served turns as `atendido`; anything else counts as abandoned.
    pub fn from_source(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("atendido") {
            TurnStatus::Served
        } else {
            TurnStatus::Abandoned
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Served => "served",
            TurnStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "served" => Some(TurnStatus::Served),
            "abandoned" => Some(TurnStatus::Abandoned),
            _ => None,
        }
    }
}

/// A turn as produced by ingestion, before storage assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTurn {
    pub date: NaiveDate,
    pub ticket_letter: String,
    pub ticket_number: i64,
    pub module: i64,
    pub status: TurnStatus,
    pub kiosk_use_seconds: Option<i64>,
    pub wait_seconds: i64,
    pub service_seconds: i64,
    pub total_seconds: Option<i64>,
    pub issued_at: NaiveDateTime,
    pub served_at: Option<NaiveDateTime>,
    pub ticket_full_code: String,
    pub facility_id: Option<i64>,
    pub kiosk_id: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: i64,
    pub date: NaiveDate,
    pub ticket_letter: String,
    pub ticket_number: i64,
    pub module: i64,
    pub status: TurnStatus,
    pub kiosk_use_seconds: Option<i64>,
    pub wait_seconds: i64,
    pub service_seconds: i64,
    pub total_seconds: Option<i64>,
    pub issued_at: NaiveDateTime,
    pub served_at: Option<NaiveDateTime>,
    pub ticket_full_code: String,
    pub facility_id: Option<i64>,
    pub kiosk_id: Option<i64>,
    pub note: Option<String>,
}

impl Turn {
    pub fn from_new(id: i64, turn: NewTurn) -> Self {
        Self {
            id,
            date: turn.date,
            ticket_letter: turn.ticket_letter,
            ticket_number: turn.ticket_number,
            module: turn.module,
            status: turn.status,
            kiosk_use_seconds: turn.kiosk_use_seconds,
            wait_seconds: turn.wait_seconds,
            service_seconds: turn.service_seconds,
            total_seconds: turn.total_seconds,
            issued_at: turn.issued_at,
            served_at: turn.served_at,
            ticket_full_code: turn.ticket_full_code,
            facility_id: turn.facility_id,
            kiosk_id: turn.kiosk_id,
            note: turn.note,
        }
    }

    pub fn is_served(&self) -> bool {
        self.status == TurnStatus::Served
    }

    pub fn is_abandoned(&self) -> bool {
        self.status == TurnStatus::Abandoned
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSurvey {
    pub nps_score: i32,
    pub rating_label: String,
    pub comment: Option<String>,
    pub age_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Survey {
    pub id: i64,
    pub nps_score: i32,
    pub rating_label: String,
    pub comment: Option<String>,
    pub age_range: Option<String>,
}

/// Turn activity for one date and hour of issuance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakHourBucket {
    pub date: NaiveDate,
    pub hour: u32,
    pub total_turns: i64,
    pub served_turns: i64,
    pub abandoned_turns: i64,
    pub abandonment_rate: f64,
    pub avg_wait_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KioskDailyMetric {
    pub kiosk_id: i64,
    pub date: NaiveDate,
    pub uptime_pct: f64,
    pub transactions: i64,
    pub errors: i64,
    pub avg_response_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KioskState {
    Active,
    Inactive,
    Maintenance,
}

impl KioskState {
    pub fn as_str(self) -> &'static str {
        match self {
            KioskState::Active => "active",
            KioskState::Inactive => "inactive",
            KioskState::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(KioskState::Active),
            "inactive" => Some(KioskState::Inactive),
            "maintenance" => Some(KioskState::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kiosk {
    pub id: i64,
    pub code: String,
    pub facility_id: i64,
    pub state: KioskState,
    pub last_activity: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facility {
    pub id: i64,
    pub name: String,
    pub city: String,
    pub address: Option<String>,
    pub active: bool,
}

/// Inclusive date window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnFilter {
    pub range: DateRange,
    pub facility_id: Option<i64>,
    pub kiosk_id: Option<i64>,
    pub ticket_letter: Option<String>,
    pub issued_since: Option<NaiveDateTime>,
}

impl TurnFilter {
    pub fn in_range(range: DateRange) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    pub fn matches(&self, turn: &Turn) -> bool {
        self.range.contains(turn.date)
            && self.facility_id.map_or(true, |id| turn.facility_id == Some(id))
            && self.kiosk_id.map_or(true, |id| turn.kiosk_id == Some(id))
            && self
                .ticket_letter
                .as_deref()
                .map_or(true, |letter| turn.ticket_letter == letter)
            && self.issued_since.map_or(true, |since| turn.issued_at >= since)
    }
}

/// Percentages and averages in reports carry two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn rate_pct(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
