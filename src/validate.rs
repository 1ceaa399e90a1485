//! Line validation: field-count and required-field rules per source schema, followed by
//! field decoding into new entities.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::Serialize;
use thiserror::Error;

use crate::decode::{
    decode_date, decode_duration, decode_module, decode_ticket_code, decode_time_of_day,
    first_number,
};
use crate::models::{NewSurvey, NewTurn, TurnStatus};
use crate::store::IntoBatch;

pub const FIELD_DELIMITER: char = ';';
pub const MAX_REJECTION_SAMPLES: usize = 10;
const SAMPLE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSchema {
    /// 29-column operational export.
    FullTurn,
    /// `date;letter;number;module;duration;note`.
    LegacyTurn,
    /// `id;nps;rating;comment;ageRange`.
    Survey,
}

impl SourceSchema {
    pub fn min_fields(self) -> usize {
        match self {
            SourceSchema::FullTurn => 29,
            SourceSchema::LegacyTurn => 4,
            SourceSchema::Survey => 5,
        }
    }

    /// Column index and name of each field that must be non-blank.
    pub fn required_fields(self) -> &'static [(usize, &'static str)] {
        match self {
            SourceSchema::FullTurn => &[(0, "date"), (3, "ticket")],
            SourceSchema::LegacyTurn => &[(0, "date"), (1, "letter")],
            SourceSchema::Survey => &[(1, "nps"), (2, "rating")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("insufficient fields ({0})")]
    InsufficientFields(usize),
    #[error("missing required field {0}")]
    MissingRequiredField(&'static str),
    #[error("invalid date {0:?}")]
    InvalidDate(String),
    #[error("invalid nps score {0:?}")]
    InvalidScore(String),
}

impl RejectReason {
    pub fn kind(&self) -> RejectKind {
        match self {
            RejectReason::InsufficientFields(_) => RejectKind::InsufficientFields,
            RejectReason::MissingRequiredField(_) => RejectKind::MissingRequiredField,
            RejectReason::InvalidDate(_) => RejectKind::InvalidDate,
            RejectReason::InvalidScore(_) => RejectKind::InvalidScore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    InsufficientFields,
    MissingRequiredField,
    InvalidDate,
    InvalidScore,
}

impl RejectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectKind::InsufficientFields => "insufficient_fields",
            RejectKind::MissingRequiredField => "missing_required_field",
            RejectKind::InvalidDate => "invalid_date",
            RejectKind::InvalidScore => "invalid_score",
        }
    }
}

/// Outcome of validating one line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine<T> {
    Parsed(T),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedLine {
    pub line_number: u64,
    pub reason: RejectReason,
    pub sample: String,
}

/// Rejection counts for a run plus a bounded set of example lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RejectionLog {
    pub counts: BTreeMap<RejectKind, u64>,
    pub samples: Vec<RejectedLine>,
}

impl RejectionLog {
    pub fn record(&mut self, line_number: u64, reason: RejectReason, raw: &str) {
        *self.counts.entry(reason.kind()).or_insert(0) += 1;
        if self.samples.len() < MAX_REJECTION_SAMPLES {
            self.samples.push(RejectedLine {
                line_number,
                reason,
                sample: raw.chars().take(SAMPLE_CHARS).collect(),
            });
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: RejectKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Foreign references resolved before a full-format turn run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRefs {
    pub facility_name: String,
    pub facility_id: i64,
    pub kiosk_id: i64,
    pub kiosk_user: String,
}

/// Validates split lines of one source schema into new records.
pub trait LineValidator {
    type Record: IntoBatch;

    fn schema(&self) -> SourceSchema;

    /// Called only with lines that passed the field-count and required-field checks.
    fn decode(&self, fields: &[&str]) -> ParsedLine<Self::Record>;

    fn validate(&self, fields: &[&str]) -> ParsedLine<Self::Record> {
        let schema = self.schema();
        if fields.len() < schema.min_fields() {
            return ParsedLine::Rejected(RejectReason::InsufficientFields(fields.len()));
        }
        for &(index, name) in schema.required_fields() {
            if fields[index].trim().is_empty() {
                return ParsedLine::Rejected(RejectReason::MissingRequiredField(name));
            }
        }
        self.decode(fields)
    }
}

#[derive(Debug, Clone)]
pub struct TurnValidator {
    legacy: bool,
    clock_offset_hours: i64,
    site: Option<SiteRefs>,
}

impl TurnValidator {
    pub fn full(clock_offset_hours: i64) -> Self {
        Self {
            legacy: false,
            clock_offset_hours,
            site: None,
        }
    }

    pub fn legacy() -> Self {
        Self {
            legacy: true,
            clock_offset_hours: 0,
            site: None,
        }
    }

    pub fn with_site(mut self, site: SiteRefs) -> Self {
        self.site = Some(site);
        self
    }

    fn full_turn(&self, fields: &[&str]) -> ParsedLine<NewTurn> {
        let date = match decode_date(fields[0]) {
            Ok(date) => date,
            Err(err) => return ParsedLine::Rejected(RejectReason::InvalidDate(err.0)),
        };
        let midnight = date.and_time(NaiveTime::MIN);
        let ticket = fields[3];
        let code = decode_ticket_code(ticket);
        let wait_seconds = decode_duration(fields[8]);
        let service_seconds = decode_duration(fields[9]);
        let handling_user = fields[13].trim();
        let facility_valid = fields[19].trim();

        let facility_id = self
            .site
            .as_ref()
            .filter(|site| site.facility_name == facility_valid)
            .map(|site| site.facility_id);
        let kiosk_id = self
            .site
            .as_ref()
            .filter(|site| handling_user.eq_ignore_ascii_case(&site.kiosk_user))
            .map(|site| site.kiosk_id);

        ParsedLine::Parsed(NewTurn {
            date,
            ticket_letter: code.letter,
            ticket_number: code.number,
            module: decode_module(fields[15]),
            status: TurnStatus::from_source(fields[18]),
            kiosk_use_seconds: fields[4].trim().parse::<u32>().ok().map(i64::from),
            wait_seconds,
            service_seconds,
            total_seconds: wait_seconds.checked_add(service_seconds),
            issued_at: decode_time_of_day(fields[5], date, self.clock_offset_hours)
                .unwrap_or(midnight),
            served_at: decode_time_of_day(fields[6], date, self.clock_offset_hours),
            ticket_full_code: ticket.to_string(),
            facility_id,
            kiosk_id,
            note: non_blank(fields[28]),
        })
    }

    fn legacy_turn(&self, fields: &[&str]) -> ParsedLine<NewTurn> {
        let date = match decode_date(fields[0]) {
            Ok(date) => date,
            Err(err) => return ParsedLine::Rejected(RejectReason::InvalidDate(err.0)),
        };
        let letter = fields[1].trim().to_string();
        let number = first_number(fields[2]).unwrap_or(0);

        ParsedLine::Parsed(NewTurn {
            date,
            ticket_full_code: format!("{letter}{number}"),
            ticket_letter: letter,
            ticket_number: number,
            module: decode_module(fields[3]),
            status: TurnStatus::Served,
            kiosk_use_seconds: None,
            wait_seconds: 0,
            service_seconds: 0,
            total_seconds: fields.get(4).and_then(|raw| legacy_seconds(raw)),
            issued_at: date.and_time(NaiveTime::MIN),
            served_at: None,
            facility_id: None,
            kiosk_id: None,
            note: fields.get(5).and_then(|raw| non_blank(raw)),
        })
    }
}

impl LineValidator for TurnValidator {
    type Record = NewTurn;

    fn schema(&self) -> SourceSchema {
        if self.legacy {
            SourceSchema::LegacyTurn
        } else {
            SourceSchema::FullTurn
        }
    }

    fn decode(&self, fields: &[&str]) -> ParsedLine<NewTurn> {
        if self.legacy {
            self.legacy_turn(fields)
        } else {
            self.full_turn(fields)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SurveyValidator;

impl LineValidator for SurveyValidator {
    type Record = NewSurvey;

    fn schema(&self) -> SourceSchema {
        SourceSchema::Survey
    }

    fn decode(&self, fields: &[&str]) -> ParsedLine<NewSurvey> {
        let raw_score = fields[1].trim();
        let nps_score = match raw_score.parse::<i32>() {
            Ok(score) if (0..=10).contains(&score) => score,
            _ => return ParsedLine::Rejected(RejectReason::InvalidScore(raw_score.to_string())),
        };

        ParsedLine::Parsed(NewSurvey {
            nps_score,
            rating_label: fields[2].trim().to_string(),
            comment: non_blank(fields[3]),
            age_range: non_blank(fields[4]),
        })
    }
}

/// Legacy files carry either plain seconds or a clock-style duration.
fn legacy_seconds(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.contains(':') {
        Some(decode_duration(trimmed))
    } else {
        trimmed.parse::<u32>().ok().map(i64::from)
    }
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
