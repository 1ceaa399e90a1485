use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod decode;
mod error;
mod ingest;
mod kpi;
mod loader;
mod materialize;
mod models;
mod monitor;
mod nps;
mod payload;
mod peak;
mod recommend;
mod report;
mod store;
mod uptime;
mod validate;

use config::Settings;
use ingest::{IngestPipeline, IngestRequest, IngestSummary, SourceKind};
use materialize::{KioskRebuild, PeakRebuild};
use models::{DateRange, KioskState, TurnFilter};
use payload::TurnPayload;
use store::{Collection, MemoryStore, PgStore, Store};

#[derive(Parser)]
#[command(name = "kiosk-turn-metrics")]
#[command(about = "Turn and survey ingestion with service metrics for self-service kiosks", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, env = "KIOSK_METRICS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Use an in-process store instead of Postgres; nothing is persisted
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct Window {
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl Window {
    fn range(self) -> DateRange {
        DateRange::new(self.from, self.to)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Replace a collection with the contents of an export file
    Ingest {
        #[arg(value_enum)]
        kind: SourceKind,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Header lines to skip (surveys exported with a title row use 2)
        #[arg(long)]
        header_lines: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Store a single turn from a JSON payload
    AddTurn {
        #[arg(long)]
        payload: String,
    },
    /// Peak-hour analysis over the stored buckets
    PeakHours {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        json: bool,
    },
    /// Operational KPIs and turn distributions
    Kpis {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        facility: Option<i64>,
        /// Only turns with this ticket letter, e.g. RR
        #[arg(long)]
        letter: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Net promoter score and survey statistics
    Nps {
        #[arg(long)]
        json: bool,
    },
    /// Kiosk uptime against the availability target
    Uptime {
        #[arg(long)]
        kiosk: Option<String>,
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        json: bool,
    },
    /// Threshold-based staffing recommendations
    Recommendations {
        #[command(flatten)]
        window: Window,
    },
    /// Real-time snapshot for the current day
    Monitor {
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        window: Window,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Regenerate peak-hour buckets and kiosk daily metrics from stored turns
    Rebuild {
        #[arg(long)]
        json: bool,
    },
    /// Mark a kiosk as active, inactive or in maintenance
    SetKioskState {
        code: String,
        #[arg(value_enum)]
        state: KioskState,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiosk_turn_metrics=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let store: Arc<dyn Store> = if cli.memory {
        Arc::new(MemoryStore::new())
    } else {
        let store = connect(cli.database_url.as_deref()).await?;
        if let Commands::InitDb = cli.command {
            store.init_db().await.context("failed to apply migrations")?;
            println!("Schema ready.");
            return Ok(());
        }
        Arc::new(store)
    };

    match cli.command {
        Commands::InitDb => {
            println!("In-memory store needs no schema.");
        }
        Commands::Ingest {
            kind,
            csv,
            batch_size,
            header_lines,
            json,
        } => {
            let mut profile = kind.profile(&settings);
            if let Some(batch_size) = batch_size {
                profile.batch_size = batch_size.max(1);
            }
            if let Some(header_lines) = header_lines {
                profile.header_lines = header_lines;
            }
            let request = IngestRequest {
                kind,
                path: csv,
                profile,
            };

            let pipeline = IngestPipeline::new(Arc::clone(&store), settings.clone());
            let summary = pipeline
                .run(&request)
                .await
                .with_context(|| format!("ingestion of {} failed", request.path.display()))?;

            let derived = if kind.target() == Collection::Turns {
                Some(rebuild(store.as_ref(), &settings).await?)
            } else {
                None
            };

            if json {
                print_json(&IngestOutput {
                    ingest: &summary,
                    rebuild: derived.as_ref(),
                })?;
            } else {
                print_ingest_summary(&summary);
                let stored = match kind.target() {
                    Collection::Surveys => store.count_surveys().await?,
                    _ => store.count_turns(&TurnFilter::default()).await?,
                };
                println!("- {} now holds {stored} rows", kind.target().as_str());
                if let Some(derived) = &derived {
                    print_rebuild(derived, &settings);
                }
            }
        }
        Commands::AddTurn { payload } => {
            let payload = TurnPayload::from_json(&payload)?;
            let turn = payload::create_turn(store.as_ref(), payload).await?;
            println!(
                "Created turn {} on {} (module {}).",
                turn.ticket_full_code, turn.date, turn.module
            );
        }
        Commands::PeakHours { window, json } => {
            let buckets = store.find_peak_hours(&window.range()).await?;
            let analysis = peak::analyze(&buckets);
            if json {
                print_json(&analysis)?;
                return Ok(());
            }

            let Some(busiest) = analysis.busiest.as_ref() else {
                println!("No peak-hour data for this window. Run `rebuild` after ingesting turns.");
                return Ok(());
            };
            println!("Peak-hour analysis across {} buckets:", analysis.total_buckets);
            println!(
                "- Busiest bucket: {} {:02}:00 with {} turns",
                busiest.date, busiest.hour, busiest.total_turns
            );
            if let Some(quietest) = analysis.quietest.as_ref() {
                println!(
                    "- Quietest bucket: {} {:02}:00 with {} turns",
                    quietest.date, quietest.hour, quietest.total_turns
                );
            }
            println!(
                "- Average {} turns per bucket, {:.2}% abandonment",
                analysis.avg_turns_per_bucket, analysis.abandonment_rate
            );
            println!("- Busiest hours: {}", analysis.busiest_hours.join(", "));
            for hour in analysis.hours.iter() {
                println!(
                    "  {} avg {} turns ({} total, {:.2}% abandoned)",
                    hour.label, hour.avg_turns, hour.total_turns, hour.abandonment_rate
                );
            }
        }
        Commands::Kpis {
            window,
            facility,
            letter,
            json,
        } => {
            let filter = TurnFilter {
                facility_id: facility,
                ticket_letter: letter.map(|letter| letter.trim().to_uppercase()),
                ..TurnFilter::in_range(window.range())
            };
            let turns = store.find_turns(&filter).await?;
            let kpis = kpi::operational_kpis(&turns);
            let distribution = kpi::distribution(&turns);
            if json {
                print_json(&serde_json::json!({ "kpis": kpis, "distribution": distribution }))?;
                return Ok(());
            }

            println!("Turns: {} ({} served, {} abandoned)", kpis.total, kpis.served, kpis.abandoned);
            println!(
                "Attendance {:.2}%, abandonment {:.2}%",
                kpis.attendance_rate, kpis.abandonment_rate
            );
            println!(
                "Average wait {}s ({:.1} min), average service {}s ({:.1} min)",
                kpis.avg_wait_seconds,
                kpis.avg_wait_minutes,
                kpis.avg_service_seconds,
                kpis.avg_service_minutes
            );
            println!("{} turns per day over {} active days", kpis.turns_per_day, kpis.active_days);
            for (letter, count) in distribution.by_letter.iter().take(10) {
                println!("- letter {letter}: {count}");
            }
            for (module, count) in distribution.by_module.iter().take(10) {
                println!("- module {module}: {count}");
            }
        }
        Commands::Nps { json } => {
            let surveys = store.find_surveys().await?;
            let stats = nps::survey_stats(&surveys);
            if json {
                print_json(&stats)?;
                return Ok(());
            }

            if stats.nps.total == 0 {
                println!("No surveys recorded.");
                return Ok(());
            }
            println!(
                "NPS {} from {} surveys: {} promoters, {} passives, {} detractors",
                stats.nps.score,
                stats.nps.total,
                stats.nps.promoters,
                stats.nps.passives,
                stats.nps.detractors
            );
            println!(
                "Average score {:.1}, {:.2}% promoters",
                stats.avg_score, stats.promoter_pct
            );
            for group in stats.improvements.iter() {
                println!("- {}: {} distinct comments", group.category.as_str(), group.comments.len());
            }
        }
        Commands::Uptime {
            kiosk,
            window,
            json,
        } => {
            let target = settings.thresholds.uptime_target_pct;
            let (kiosks, kiosk_id) = match kiosk.as_deref() {
                Some(code) => {
                    let found = store
                        .find_kiosk(code)
                        .await?
                        .with_context(|| format!("kiosk {code} is not registered"))?;
                    let id = found.id;
                    (vec![found], Some(id))
                }
                None => (store.find_kiosks().await?, None),
            };
            let metrics = store.find_kiosk_metrics(kiosk_id, &window.range()).await?;
            let summaries = uptime::summarize_all(&kiosks, &metrics, target);
            if json {
                print_json(&summaries)?;
                return Ok(());
            }

            if summaries.is_empty() {
                println!("No kiosks registered.");
            }
            for summary in summaries.iter() {
                println!(
                    "- {} uptime {:.2}% (target {}%: {}) over {} days, {} transactions, {:.2}% errors",
                    summary.kiosk_code.as_deref().unwrap_or("unknown kiosk"),
                    summary.avg_uptime_pct,
                    summary.target_pct,
                    if summary.meets_target { "met" } else { "missed" },
                    summary.days,
                    summary.transactions,
                    summary.error_rate
                );
            }
        }
        Commands::Recommendations { window } => {
            let buckets = store.find_peak_hours(&window.range()).await?;
            let analysis = peak::analyze(&buckets);
            for recommendation in recommend::recommend(&analysis, &settings.thresholds) {
                println!(
                    "[{}] {}",
                    recommendation.priority.as_str(),
                    recommendation.message
                );
                if let Some(action) = recommendation.action {
                    println!("    {action}");
                }
            }
        }
        Commands::Monitor { json } => {
            let now = Local::now().naive_local();
            let snapshot = monitor::capture(
                store.as_ref(),
                now,
                settings.thresholds.abandonment_target_pct,
            )
            .await?;
            if json {
                print_json(&snapshot)?;
                return Ok(());
            }

            println!("Status: {} at {}", snapshot.status.as_str(), snapshot.now.format("%H:%M"));
            println!(
                "Today: {} turns ({} served, {} abandoned, {:.2}%), projected {}",
                snapshot.today_total,
                snapshot.today_served,
                snapshot.today_abandoned,
                snapshot.abandonment_rate,
                snapshot.projected_today
            );
            println!("Last hour: {} turns", snapshot.last_hour);
            println!(
                "Kiosks: {} active, {} inactive, {} in maintenance",
                snapshot.kiosks_active, snapshot.kiosks_inactive, snapshot.kiosks_maintenance
            );
            for alert in snapshot.alerts.iter() {
                println!("- {:?}: {}", alert.level, alert.message);
            }
            let trend: Vec<String> = snapshot
                .trend
                .iter()
                .map(|point| format!("{} {}", point.label, point.turns))
                .collect();
            println!("Trend: {}", trend.join(" | "));
        }
        Commands::Report { window, out } => {
            let range = window.range();
            let turns = store.find_turns(&TurnFilter::in_range(range)).await?;
            let buckets = store.find_peak_hours(&range).await?;
            let surveys = store.find_surveys().await?;
            let kiosks = store.find_kiosks().await?;
            let metrics = store.find_kiosk_metrics(None, &range).await?;

            let kpis = kpi::operational_kpis(&turns);
            let peaks = peak::analyze(&buckets);
            let recommendations = recommend::recommend(&peaks, &settings.thresholds);
            let survey_stats = nps::survey_stats(&surveys);
            let uptime = uptime::summarize_all(
                &kiosks,
                &metrics,
                settings.thresholds.uptime_target_pct,
            );

            let report = report::build_report(&report::ReportInput {
                range,
                kpis: &kpis,
                peaks: &peaks,
                recommendations: &recommendations,
                surveys: &survey_stats,
                uptime: &uptime,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Rebuild { json } => {
            let derived = rebuild(store.as_ref(), &settings).await?;
            if json {
                print_json(&derived)?;
            } else {
                print_rebuild(&derived, &settings);
            }
        }
        Commands::SetKioskState { code, state } => {
            let kiosk = store
                .set_kiosk_state(&code, state)
                .await?
                .with_context(|| format!("kiosk {code} is not registered"))?;
            println!("Kiosk {} is now {}.", kiosk.code, kiosk.state.as_str());
        }
    }

    Ok(())
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgStore> {
    let database_url =
        database_url.context("DATABASE_URL must be set to a Postgres instance (or pass --memory)")?;
    PgStore::connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

#[derive(Serialize)]
struct IngestOutput<'a> {
    ingest: &'a IngestSummary,
    rebuild: Option<&'a Rebuild>,
}

#[derive(Serialize)]
struct Rebuild {
    peak_hours: PeakRebuild,
    kiosk_metrics: Option<KioskRebuild>,
}

async fn rebuild(store: &dyn Store, settings: &Settings) -> anyhow::Result<Rebuild> {
    let peak_hours = materialize::rebuild_peak_hours(store)
        .await
        .context("failed to rebuild peak hours")?;
    let kiosk_metrics = materialize::rebuild_kiosk_metrics(store, &settings.site.kiosk_code)
        .await
        .context("failed to rebuild kiosk metrics")?;
    Ok(Rebuild {
        peak_hours,
        kiosk_metrics,
    })
}

fn print_rebuild(rebuild: &Rebuild, settings: &Settings) {
    println!(
        "Peak hours rebuilt: {} buckets ({} stored).",
        rebuild.peak_hours.buckets, rebuild.peak_hours.load.succeeded
    );
    match &rebuild.kiosk_metrics {
        Some(metrics) => println!(
            "Kiosk {} metrics rebuilt: {} days, {} transactions.",
            metrics.kiosk_code, metrics.days, metrics.transactions
        ),
        None => println!(
            "Kiosk {} is not registered; no metrics generated.",
            settings.site.kiosk_code
        ),
    }
}

fn print_ingest_summary(summary: &IngestSummary) {
    println!(
        "Ingested {} from {} (run {}).",
        summary.source.as_str(),
        summary.path.display(),
        summary.run_id
    );
    println!(
        "- {} stored of {} data lines ({:.2}% success), {} previous rows replaced",
        summary.succeeded,
        summary.data_lines(),
        summary.success_rate,
        summary.removed
    );
    if summary.failed_rows > 0 {
        println!(
            "- {} rows lost in {} failed batches",
            summary.failed_rows, summary.failed_batches
        );
    }
    for (kind, count) in summary.rejected.counts.iter() {
        println!("- rejected ({}): {count}", kind.as_str());
    }
    for sample in summary.rejected.samples.iter() {
        println!("  line {}: {} [{}]", sample.line_number, sample.reason, sample.sample);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::IngestProfile;
    use crate::validate::tests::full_line;

    #[tokio::test]
    async fn ingest_json_holds_summary_and_rebuild_in_one_document() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "header").unwrap();
        writeln!(file, "{}", full_line("14/02/2025", "RR607", "atendido", "anfitrion")).unwrap();
        file.flush().unwrap();

        let settings = Settings::default();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let summary = IngestPipeline::new(Arc::clone(&store), settings.clone())
            .run(&IngestRequest {
                kind: SourceKind::Turns,
                path: file.path().to_path_buf(),
                profile: IngestProfile::new(100, 1),
            })
            .await
            .unwrap();
        let derived = rebuild(store.as_ref(), &settings).await.unwrap();

        let rendered = serde_json::to_string_pretty(&IngestOutput {
            ingest: &summary,
            rebuild: Some(&derived),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["ingest"]["succeeded"], 1);
        assert_eq!(value["rebuild"]["peak_hours"]["buckets"], 1);
        assert_eq!(value["rebuild"]["kiosk_metrics"]["transactions"], 1);
    }
}
