use std::fmt::Write;

use crate::kpi::OperationalKpis;
use crate::models::DateRange;
use crate::nps::SurveyStats;
use crate::peak::PeakAnalysis;
use crate::recommend::Recommendation;
use crate::uptime::UptimeSummary;

pub struct ReportInput<'a> {
    pub range: DateRange,
    pub kpis: &'a OperationalKpis,
    pub peaks: &'a PeakAnalysis,
    pub recommendations: &'a [Recommendation],
    pub surveys: &'a SurveyStats,
    pub uptime: &'a [UptimeSummary],
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Kiosk Turn Metrics Report");
    let _ = writeln!(output, "Generated for {}", describe_range(&input.range));
    let _ = writeln!(output);

    let kpis = input.kpis;
    let _ = writeln!(output, "## Operations");
    if kpis.total == 0 {
        let _ = writeln!(output, "No turns recorded for this window.");
    } else {
        let _ = writeln!(
            output,
            "- {} turns over {} days ({} per day)",
            kpis.total, kpis.active_days, kpis.turns_per_day
        );
        let _ = writeln!(
            output,
            "- Attendance {:.2}%, abandonment {:.2}%",
            kpis.attendance_rate, kpis.abandonment_rate
        );
        let _ = writeln!(
            output,
            "- Average wait {:.1} min, average service {:.1} min",
            kpis.avg_wait_minutes, kpis.avg_service_minutes
        );
    }

    let peaks = input.peaks;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Peak Hours");
    match (&peaks.peak_hour, &peaks.busiest) {
        (Some(hour), Some(bucket)) => {
            let _ = writeln!(
                output,
                "- Busiest hour of day: {} ({} turns on average)",
                hour.label, hour.avg_turns
            );
            let _ = writeln!(
                output,
                "- Busiest single hour: {} {:02}:00 with {} turns",
                bucket.date, bucket.hour, bucket.total_turns
            );
            if let Some(quiet) = &peaks.quietest_hour {
                let _ = writeln!(
                    output,
                    "- Quietest hour of day: {} ({} turns on average)",
                    quiet.label, quiet.avg_turns
                );
            }
            let _ = writeln!(output, "- Top hours: {}", peaks.busiest_hours.join(", "));
            for day in peaks.weekdays.iter() {
                let _ = writeln!(
                    output,
                    "- {}: {} turns per hour, {:.2}% abandonment",
                    day.weekday, day.avg_turns, day.abandonment_rate
                );
            }
        }
        _ => {
            let _ = writeln!(output, "No peak-hour data for this window.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    for recommendation in input.recommendations.iter() {
        let _ = write!(
            output,
            "- [{}] {}",
            recommendation.priority.as_str(),
            recommendation.message
        );
        match recommendation.action {
            Some(action) => {
                let _ = writeln!(output, ". {action}");
            }
            None => {
                let _ = writeln!(output);
            }
        }
    }

    let surveys = input.surveys;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Satisfaction");
    if surveys.nps.total == 0 {
        let _ = writeln!(output, "No surveys recorded.");
    } else {
        let _ = writeln!(
            output,
            "- NPS {} from {} surveys ({} promoters, {} passives, {} detractors)",
            surveys.nps.score,
            surveys.nps.total,
            surveys.nps.promoters,
            surveys.nps.passives,
            surveys.nps.detractors
        );
        let _ = writeln!(
            output,
            "- Average score {:.1}, {:.2}% promoters",
            surveys.avg_score, surveys.promoter_pct
        );
        for group in surveys.improvements.iter().filter(|g| !g.comments.is_empty()) {
            let mentions: u64 = group.comments.iter().map(|(_, count)| count).sum();
            let _ = writeln!(
                output,
                "- Improvements ({}): {} mentions",
                group.category.as_str(),
                mentions
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Kiosk Uptime");
    if input.uptime.is_empty() {
        let _ = writeln!(output, "No kiosks registered.");
    } else {
        for summary in input.uptime.iter() {
            let _ = writeln!(
                output,
                "- {}: {:.2}% over {} days ({}), {} transactions, {:.2}% errors",
                summary.kiosk_code.as_deref().unwrap_or("unknown kiosk"),
                summary.avg_uptime_pct,
                summary.days,
                if summary.meets_target {
                    "meets target"
                } else {
                    "below target"
                },
                summary.transactions,
                summary.error_rate
            );
        }
    }

    output
}

fn describe_range(range: &DateRange) -> String {
    match (range.from, range.to) {
        (Some(from), Some(to)) => format!("{from} to {to}"),
        (Some(from), None) => format!("turns since {from}"),
        (None, Some(to)) => format!("turns up to {to}"),
        (None, None) => "all recorded turns".to_string(),
    }
}
