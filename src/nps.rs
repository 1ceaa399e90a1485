//! Net promoter scoring and survey statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{rate_pct, round2, Survey};

pub const UNSPECIFIED_AGE: &str = "Sin especificar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NpsBreakdown {
    pub total: u64,
    pub detractors: u64,
    pub passives: u64,
    pub promoters: u64,
    pub score: i64,
}

/// Detractors score 0-6, passives 7-8, promoters 9-10.
pub fn decompose(scores: impl IntoIterator<Item = i32>) -> NpsBreakdown {
    let mut breakdown = NpsBreakdown {
        total: 0,
        detractors: 0,
        passives: 0,
        promoters: 0,
        score: 0,
    };

    for score in scores {
        breakdown.total += 1;
        match score {
            0..=6 => breakdown.detractors += 1,
            7..=8 => breakdown.passives += 1,
            9..=10 => breakdown.promoters += 1,
            _ => {}
        }
    }

    if breakdown.total > 0 {
        let net = breakdown.promoters as f64 - breakdown.detractors as f64;
        breakdown.score = (net / breakdown.total as f64 * 100.0).round() as i64;
    }
    breakdown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentCategory {
    System,
    Infrastructure,
    Accessibility,
    Expansion,
    Other,
}

impl CommentCategory {
    pub const ALL: [CommentCategory; 5] = [
        CommentCategory::System,
        CommentCategory::Infrastructure,
        CommentCategory::Accessibility,
        CommentCategory::Expansion,
        CommentCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommentCategory::System => "sistema",
            CommentCategory::Infrastructure => "infraestructura",
            CommentCategory::Accessibility => "accesibilidad",
            CommentCategory::Expansion => "expansion",
            CommentCategory::Other => "otros",
        }
    }
}

const CATEGORY_KEYWORDS: [(CommentCategory, &[&str]); 4] = [
    (
        CommentCategory::System,
        &[
            "lenta", "lento", "volumen", "audio", "totem", "tótem", "pantalla", "sistema",
            "velocidad", "idioma",
        ],
    ),
    (
        CommentCategory::Infrastructure,
        &[
            "silla", "asiento", "ventilación", "ventilacion", "aire", "televisor", "tv", "agua",
            "baño",
        ],
    ),
    (
        CommentCategory::Accessibility,
        &[
            "mayor", "adulto", "entiendo", "entiende", "dificil", "difícil", "complejo", "ayuda",
        ],
    ),
    (
        CommentCategory::Expansion,
        &["más", "mas máquinas", "mas maquinas", "otro", "punto"],
    ),
];

/// First category whose keywords appear in the comment, checked in declaration order.
pub fn categorize(comment: &str) -> CommentCategory {
    let text = comment.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map_or(CommentCategory::Other, |(category, _)| *category)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentGroup {
    pub category: CommentCategory,
    /// Distinct comments with their repeat counts, most frequent first.
    pub comments: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyStats {
    pub nps: NpsBreakdown,
    pub avg_score: f64,
    pub promoter_pct: f64,
    pub by_rating: Vec<(String, u64)>,
    pub by_age_range: Vec<(String, u64)>,
    pub histogram: Vec<(i32, u64)>,
    pub improvements: Vec<CommentGroup>,
}

pub fn survey_stats(surveys: &[Survey]) -> SurveyStats {
    let nps = decompose(surveys.iter().map(|s| s.nps_score));
    let total = surveys.len() as i64;

    let avg_score = if surveys.is_empty() {
        0.0
    } else {
        let sum: i64 = surveys.iter().map(|s| i64::from(s.nps_score)).sum();
        (sum as f64 / total as f64 * 10.0).round() / 10.0
    };

    let mut histogram: BTreeMap<i32, u64> = BTreeMap::new();
    for survey in surveys {
        *histogram.entry(survey.nps_score).or_default() += 1;
    }

    SurveyStats {
        nps,
        avg_score,
        promoter_pct: round2(rate_pct(nps.promoters as i64, total)),
        by_rating: ranked(surveys.iter().map(|s| s.rating_label.clone())),
        by_age_range: ranked(surveys.iter().map(|s| {
            s.age_range
                .clone()
                .filter(|age| !age.trim().is_empty())
                .unwrap_or_else(|| UNSPECIFIED_AGE.to_string())
        })),
        histogram: histogram.into_iter().collect(),
        improvements: group_comments(surveys),
    }
}

fn group_comments(surveys: &[Survey]) -> Vec<CommentGroup> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for comment in surveys.iter().filter_map(|s| s.comment.as_deref()) {
        let comment = comment.trim();
        if comment.is_empty() || comment == "-" {
            continue;
        }
        *counts.entry(comment).or_default() += 1;
    }

    let mut groups: BTreeMap<CommentCategory, Vec<(String, u64)>> = CommentCategory::ALL
        .iter()
        .map(|category| (*category, Vec::new()))
        .collect();
    for (comment, count) in counts {
        groups
            .entry(categorize(comment))
            .or_default()
            .push((comment.to_string(), count));
    }

    groups
        .into_iter()
        .map(|(category, mut comments)| {
            comments.sort_by(|a, b| b.1.cmp(&a.1));
            CommentGroup { category, comments }
        })
        .collect()
}

/// Counts per label, most frequent first; equal counts keep label order.
fn ranked(labels: impl Iterator<Item = String>) -> Vec<(String, u64)> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey(score: i32, rating: &str, comment: Option<&str>, age: Option<&str>) -> Survey {
        Survey {
            id: 0,
            nps_score: score,
            rating_label: rating.to_string(),
            comment: comment.map(str::to_string),
            age_range: age.map(str::to_string),
        }
    }

    #[test]
    fn decomposes_reference_scores() {
        let nps = decompose([0, 0, 6, 7, 8, 9, 9, 10, 10, 10]);
        assert_eq!(nps.detractors, 3);
        assert_eq!(nps.passives, 2);
        assert_eq!(nps.promoters, 5);
        assert_eq!(nps.score, 20);
    }

    #[test]
    fn empty_population_scores_zero() {
        let nps = decompose(Vec::<i32>::new());
        assert_eq!(nps.total, 0);
        assert_eq!(nps.score, 0);
    }

    #[test]
    fn score_rounds_to_nearest() {
        assert_eq!(decompose([10, 10, 0]).score, 33);
        assert_eq!(decompose([0, 0, 10]).score, -33);
    }

    #[test]
    fn categorizes_comments_by_keyword() {
        assert_eq!(categorize("La pantalla es muy lenta"), CommentCategory::System);
        assert_eq!(categorize("Faltan sillas"), CommentCategory::Infrastructure);
        assert_eq!(categorize("Difícil para adultos mayores"), CommentCategory::Accessibility);
        assert_eq!(categorize("Poner otro punto de atención"), CommentCategory::Expansion);
        assert_eq!(categorize("Todo bien"), CommentCategory::Other);
    }

    #[test]
    fn summarizes_survey_population() {
        let surveys = vec![
            survey(10, "Excelente", Some("Más tótems"), Some("26-35")),
            survey(9, "Excelente", Some("-"), None),
            survey(7, "Bueno", Some("  "), Some("")),
            survey(3, "Malo", Some("Más tótems"), Some("26-35")),
        ];
        let stats = survey_stats(&surveys);

        assert_eq!(stats.nps.score, 25);
        assert_eq!(stats.avg_score, 7.3);
        assert_eq!(stats.promoter_pct, 50.0);
        assert_eq!(stats.by_rating[0], ("Excelente".to_string(), 2));
        assert_eq!(
            stats.by_age_range,
            vec![("26-35".to_string(), 2), (UNSPECIFIED_AGE.to_string(), 2)]
        );
        assert_eq!(stats.histogram.first(), Some(&(3, 1)));

        let system = &stats.improvements[0];
        assert_eq!(system.category, CommentCategory::System);
        assert_eq!(system.comments, vec![("Más tótems".to_string(), 2)]);
        let total: usize = stats.improvements.iter().map(|g| g.comments.len()).sum();
        assert_eq!(total, 1);
    }
}
