//! Threshold rules over the peak-hour analysis. Every rule is evaluated; all that apply fire.

use serde::Serialize;

use crate::config::Thresholds;
use crate::peak::{self, HourProfile, PeakAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    HighAbandonment { hours: Vec<String> },
    PeakCongestion { hour: String, avg_turns: i64 },
    AbandonmentTargetMissed { rate: f64 },
    AbandonmentTargetMet { rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub rule: Rule,
    pub priority: Priority,
    pub message: String,
    pub action: Option<&'static str>,
}

pub fn recommend(analysis: &PeakAnalysis, thresholds: &Thresholds) -> Vec<Recommendation> {
    evaluate(&analysis.hours, analysis.abandonment_rate, thresholds)
}

pub fn evaluate(
    hours: &[HourProfile],
    overall_abandonment: f64,
    thresholds: &Thresholds,
) -> Vec<Recommendation> {
    let target = thresholds.abandonment_target_pct;
    let mut out = Vec::new();

    let affected: Vec<String> = hours
        .iter()
        .filter(|hour| hour.abandonment_rate > target)
        .map(|hour| hour.label.clone())
        .collect();
    if !affected.is_empty() {
        out.push(Recommendation {
            message: format!(
                "{} hours above {target}% abandonment ({})",
                affected.len(),
                affected.join(", ")
            ),
            rule: Rule::HighAbandonment { hours: affected },
            priority: Priority::High,
            action: Some("Add staff in these hours or speed up service."),
        });
    }

    if let Some(peak) = peak::peak_hour(hours) {
        if peak.avg_turns as f64 > thresholds.peak_congestion_turns {
            out.push(Recommendation {
                message: format!(
                    "Peak hour is {} with {} turns on average",
                    peak.label, peak.avg_turns
                ),
                rule: Rule::PeakCongestion {
                    hour: peak.label.clone(),
                    avg_turns: peak.avg_turns,
                },
                priority: Priority::Medium,
                action: Some("Add kiosks or service staff during this hour."),
            });
        }
    }

    if overall_abandonment > target {
        out.push(Recommendation {
            rule: Rule::AbandonmentTargetMissed {
                rate: overall_abandonment,
            },
            priority: Priority::High,
            message: format!(
                "Average abandonment {overall_abandonment:.2}% exceeds the {target}% target"
            ),
            action: Some("Review wait times and streamline service."),
        });
    } else {
        out.push(Recommendation {
            rule: Rule::AbandonmentTargetMet {
                rate: overall_abandonment,
            },
            priority: Priority::Low,
            message: format!(
                "Average abandonment {overall_abandonment:.2}% is within the {target}% target"
            ),
            action: None,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peak::hour_label;

    fn hour(hour: u32, avg_turns: i64, abandonment_rate: f64) -> HourProfile {
        HourProfile {
            hour,
            label: hour_label(hour),
            avg_turns,
            total_turns: avg_turns,
            served_turns: avg_turns,
            abandoned_turns: 0,
            abandonment_rate,
            days: 1,
        }
    }

    fn rules(recommendations: &[Recommendation]) -> Vec<&Rule> {
        recommendations.iter().map(|r| &r.rule).collect()
    }

    #[test]
    fn abandonment_threshold_is_strict() {
        let thresholds = Thresholds::default();

        let at_limit = evaluate(&[hour(9, 10, 10.0)], 5.0, &thresholds);
        assert!(!at_limit
            .iter()
            .any(|r| matches!(r.rule, Rule::HighAbandonment { .. })));

        let above = evaluate(&[hour(9, 10, 10.01), hour(10, 10, 3.0)], 5.0, &thresholds);
        assert_eq!(
            above[0].rule,
            Rule::HighAbandonment {
                hours: vec!["09:00".to_string()]
            }
        );
        assert_eq!(above[0].priority, Priority::High);
    }

    #[test]
    fn congestion_fires_above_limit() {
        let thresholds = Thresholds::default();

        let quiet = evaluate(&[hour(9, 150, 0.0)], 0.0, &thresholds);
        assert_eq!(rules(&quiet), vec![&Rule::AbandonmentTargetMet { rate: 0.0 }]);

        let busy = evaluate(&[hour(9, 120, 0.0), hour(11, 151, 0.0)], 0.0, &thresholds);
        assert_eq!(
            busy[0].rule,
            Rule::PeakCongestion {
                hour: "11:00".to_string(),
                avg_turns: 151
            }
        );
        assert_eq!(busy[0].priority, Priority::Medium);
    }

    #[test]
    fn overall_target_always_reports() {
        let thresholds = Thresholds::default();

        let missed = evaluate(&[], 12.5, &thresholds);
        assert_eq!(rules(&missed), vec![&Rule::AbandonmentTargetMissed { rate: 12.5 }]);
        assert_eq!(missed[0].priority, Priority::High);

        let met = evaluate(&[], 10.0, &thresholds);
        assert_eq!(met[0].priority, Priority::Low);
    }

    #[test]
    fn all_applicable_rules_fire() {
        let recommendations = evaluate(&[hour(9, 200, 25.0)], 25.0, &Thresholds::default());
        assert_eq!(recommendations.len(), 3);
    }
}
