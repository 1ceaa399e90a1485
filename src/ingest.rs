//! Full-replace ingestion of turn and survey exports.
//!
//! A run clears the target collection (and everything derived from it), then streams the
//! file through validation into the batch loader. Runs against the same collection are
//! serialized; a run that dies after the reset leaves the collection partially loaded and
//! must be repeated from scratch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{IngestProfile, Settings};
use crate::error::{IngestError, StoreError};
use crate::loader::{BatchLoader, Progress};
use crate::models::round2;
use crate::store::{Collection, Store};
use crate::validate::{
    LineValidator, ParsedLine, RejectKind, RejectionLog, SiteRefs, SurveyValidator, TurnValidator,
    FIELD_DELIMITER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 29-column turn export
    Turns,
    /// `date;letter;number;module;duration;note` turn export
    LegacyTurns,
    /// `id;nps;rating;comment;ageRange` survey export
    Surveys,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Turns => "turns",
            SourceKind::LegacyTurns => "legacy_turns",
            SourceKind::Surveys => "surveys",
        }
    }

    pub fn target(self) -> Collection {
        match self {
            SourceKind::Turns | SourceKind::LegacyTurns => Collection::Turns,
            SourceKind::Surveys => Collection::Surveys,
        }
    }

    /// Collections holding rows derived from the target; cleared before it.
    pub fn dependents(self) -> &'static [Collection] {
        match self {
            SourceKind::Turns | SourceKind::LegacyTurns => {
                &[Collection::KioskMetrics, Collection::PeakHours]
            }
            SourceKind::Surveys => &[],
        }
    }

    pub fn profile(self, settings: &Settings) -> IngestProfile {
        match self {
            SourceKind::Turns => settings.profiles.turns,
            SourceKind::LegacyTurns => settings.profiles.legacy_turns,
            SourceKind::Surveys => settings.profiles.surveys,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub kind: SourceKind,
    pub path: PathBuf,
    pub profile: IngestProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub source: SourceKind,
    pub path: PathBuf,
    pub removed: u64,
    pub total_lines: u64,
    pub header_lines: u64,
    pub succeeded: u64,
    pub rejected: RejectionLog,
    pub failed_rows: u64,
    pub failed_batches: u64,
    /// Percentage of data lines (total minus headers) that were stored.
    pub success_rate: f64,
}

impl IngestSummary {
    pub fn data_lines(&self) -> u64 {
        self.total_lines.saturating_sub(self.header_lines)
    }
}

#[derive(Debug)]
struct SourceLine {
    line_number: u64,
    fields: Vec<String>,
}

struct LoadOutcome {
    rejected: RejectionLog,
    report: crate::loader::LoadReport,
}

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    settings: Settings,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> Self {
        Self { store, settings }
    }

    pub async fn run(&self, request: &IngestRequest) -> Result<IngestSummary, IngestError> {
        self.run_with_progress(request, |_| {}).await
    }

    pub async fn run_with_progress(
        &self,
        request: &IngestRequest,
        mut on_progress: impl FnMut(&Progress) + Send,
    ) -> Result<IngestSummary, IngestError> {
        if !request.path.is_file() {
            return Err(IngestError::SourceNotFound(request.path.clone()));
        }
        let lines = read_source(&request.path)?;

        let lock = self.store.lock_collection(request.kind.target()).await?;
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            source = request.kind.as_str(),
            path = %request.path.display(),
            lines = lines.len(),
            "ingestion started"
        );

        let removed = self.reset(request.kind).await?;
        let outcome = match request.kind {
            SourceKind::Turns => {
                let site = self.resolve_site().await?;
                let validator =
                    TurnValidator::full(self.settings.clock_offset_hours).with_site(site);
                self.load(&validator, &lines, request.profile, &mut on_progress)
                    .await
            }
            SourceKind::LegacyTurns => {
                self.load(
                    &TurnValidator::legacy(),
                    &lines,
                    request.profile,
                    &mut on_progress,
                )
                .await
            }
            SourceKind::Surveys => {
                self.load(&SurveyValidator, &lines, request.profile, &mut on_progress)
                    .await
            }
        };

        let total_lines = lines.len() as u64;
        let header_lines = request.profile.header_lines as u64;
        let data_lines = total_lines.saturating_sub(header_lines);
        let succeeded = outcome.report.succeeded;
        let summary = IngestSummary {
            run_id,
            source: request.kind,
            path: request.path.clone(),
            removed,
            total_lines,
            header_lines,
            succeeded,
            rejected: outcome.rejected,
            failed_rows: outcome.report.failed_rows,
            failed_batches: outcome.report.failed_batches,
            success_rate: if data_lines == 0 {
                0.0
            } else {
                round2(succeeded as f64 / data_lines as f64 * 100.0)
            },
        };

        info!(
            %run_id,
            succeeded = summary.succeeded,
            rejected = summary.rejected.total(),
            invalid_dates = summary.rejected.count(RejectKind::InvalidDate),
            failed_rows = summary.failed_rows,
            success_rate = summary.success_rate,
            "ingestion finished"
        );
        lock.release().await?;
        Ok(summary)
    }

    /// Deletes derived collections first, then the target. Returns the target rows removed.
    async fn reset(&self, kind: SourceKind) -> Result<u64, StoreError> {
        for &dependent in kind.dependents() {
            let removed = self.store.delete_all(dependent).await?;
            info!(collection = dependent.as_str(), removed, "cleared derived collection");
        }
        let target = kind.target();
        let removed = self.store.delete_all(target).await?;
        info!(collection = target.as_str(), removed, "cleared collection");
        Ok(removed)
    }

    async fn resolve_site(&self) -> Result<SiteRefs, StoreError> {
        let site = &self.settings.site;
        let facility = self
            .store
            .upsert_facility(
                &site.facility_name,
                &site.facility_city,
                site.facility_address.as_deref(),
            )
            .await?;
        let kiosk = self
            .store
            .upsert_kiosk(&site.kiosk_code, facility.id, Local::now().naive_local())
            .await?;
        debug!(facility_id = facility.id, kiosk_id = kiosk.id, "resolved site references");

        Ok(SiteRefs {
            facility_name: facility.name,
            facility_id: facility.id,
            kiosk_id: kiosk.id,
            kiosk_user: site.kiosk_user.clone(),
        })
    }

    async fn load<V: LineValidator>(
        &self,
        validator: &V,
        lines: &[SourceLine],
        profile: IngestProfile,
        on_progress: &mut (dyn FnMut(&Progress) + Send),
    ) -> LoadOutcome {
        let data = lines.get(profile.header_lines..).unwrap_or_default();
        let mut loader = BatchLoader::<V::Record>::new(
            self.store.as_ref(),
            profile.batch_size,
            data.len() as u64,
        )
        .on_progress(|progress| on_progress(progress));
        let mut rejected = RejectionLog::default();

        for line in data {
            let fields: Vec<&str> = line.fields.iter().map(String::as_str).collect();
            match validator.validate(&fields) {
                ParsedLine::Parsed(record) => loader.push(record).await,
                ParsedLine::Rejected(reason) => {
                    debug!(line = line.line_number, %reason, "line rejected");
                    let raw = fields.join(&FIELD_DELIMITER.to_string());
                    rejected.record(line.line_number, reason, &raw);
                }
            }
        }

        let report = loader.finish().await;
        if report.failed_batches > 0 {
            warn!(
                failed_batches = report.failed_batches,
                failed_rows = report.failed_rows,
                "some batches were not stored"
            );
        }
        LoadOutcome { rejected, report }
    }
}

/// Non-blank lines of the source, split on the field delimiter without quote handling.
fn read_source(path: &Path) -> Result<Vec<SourceLine>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER as u8)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)?;

    let mut lines = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let fields: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();
        if fields.len() == 1 && fields[0].trim().is_empty() {
            continue;
        }
        lines.push(SourceLine {
            line_number: record.position().map_or(0, |pos| pos.line()),
            fields,
        });
    }
    Ok(lines)
}
