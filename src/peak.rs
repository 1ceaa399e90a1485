//! Peak-hour buckets and the analysis built on top of them.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Timelike};
use serde::Serialize;

use crate::models::{rate_pct, round2, PeakHourBucket, Turn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourProfile {
    pub hour: u32,
    pub label: String,
    pub avg_turns: i64,
    pub total_turns: i64,
    pub served_turns: i64,
    pub abandoned_turns: i64,
    pub abandonment_rate: f64,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayProfile {
    pub weekday: &'static str,
    pub avg_turns: i64,
    pub total_turns: i64,
    pub abandonment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapCell {
    pub date: NaiveDate,
    pub hour: u32,
    pub turns: i64,
    pub abandonment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakAnalysis {
    pub total_buckets: usize,
    pub busiest: Option<PeakHourBucket>,
    pub quietest: Option<PeakHourBucket>,
    pub peak_hour: Option<HourProfile>,
    pub quietest_hour: Option<HourProfile>,
    pub avg_turns_per_bucket: i64,
    pub avg_turns_per_hour: f64,
    pub abandonment_rate: f64,
    pub top_buckets: Vec<PeakHourBucket>,
    pub busiest_hours: Vec<String>,
    pub hours: Vec<HourProfile>,
    pub weekdays: Vec<WeekdayProfile>,
    pub heatmap: Vec<HeatmapCell>,
}

#[derive(Default)]
struct Tally {
    total: i64,
    served: i64,
    abandoned: i64,
    wait_seconds: i64,
}

/// Groups turns by the date and hour they were issued, in ascending order.
pub fn bucket_turns(turns: &[Turn]) -> Vec<PeakHourBucket> {
    let mut tallies: BTreeMap<(NaiveDate, u32), Tally> = BTreeMap::new();

    for turn in turns {
        let key = (turn.issued_at.date(), turn.issued_at.hour());
        let tally = tallies.entry(key).or_default();
        tally.total += 1;
        tally.wait_seconds += turn.wait_seconds;
        if turn.is_served() {
            tally.served += 1;
        } else {
            tally.abandoned += 1;
        }
    }

    tallies
        .into_iter()
        .map(|((date, hour), tally)| PeakHourBucket {
            date,
            hour,
            total_turns: tally.total,
            served_turns: tally.served,
            abandoned_turns: tally.abandoned,
            abandonment_rate: rate_pct(tally.abandoned, tally.total),
            avg_wait_seconds: (tally.wait_seconds as f64 / tally.total as f64).round() as i64,
        })
        .collect()
}

pub fn analyze(buckets: &[PeakHourBucket]) -> PeakAnalysis {
    let mut ordered: Vec<PeakHourBucket> = buckets
        .iter()
        .filter(|bucket| bucket.total_turns > 0)
        .cloned()
        .collect();
    ordered.sort_by_key(|bucket| (bucket.date, bucket.hour));

    let hours = hour_profiles(&ordered);
    let total_turns: i64 = ordered.iter().map(|b| b.total_turns).sum();
    let abandoned: i64 = ordered.iter().map(|b| b.abandoned_turns).sum();

    let mut top_buckets = ordered.clone();
    top_buckets.sort_by(|a, b| b.total_turns.cmp(&a.total_turns));
    top_buckets.truncate(10);

    let mut by_average: Vec<&HourProfile> = hours.iter().collect();
    by_average.sort_by(|a, b| b.avg_turns.cmp(&a.avg_turns));
    let busiest_hours = by_average.iter().take(3).map(|h| h.label.clone()).collect();

    PeakAnalysis {
        total_buckets: ordered.len(),
        busiest: busiest_bucket(&ordered).cloned(),
        quietest: quietest_bucket(&ordered).cloned(),
        peak_hour: peak_hour(&hours).cloned(),
        quietest_hour: pick(&hours, |candidate, current| candidate.avg_turns < current.avg_turns)
            .cloned(),
        avg_turns_per_bucket: if ordered.is_empty() {
            0
        } else {
            (total_turns as f64 / ordered.len() as f64).round() as i64
        },
        avg_turns_per_hour: if hours.is_empty() {
            0.0
        } else {
            hours.iter().map(|h| h.avg_turns as f64).sum::<f64>() / hours.len() as f64
        },
        abandonment_rate: round2(rate_pct(abandoned, total_turns)),
        top_buckets,
        busiest_hours,
        weekdays: weekday_profiles(&ordered),
        heatmap: ordered
            .iter()
            .map(|bucket| HeatmapCell {
                date: bucket.date,
                hour: bucket.hour,
                turns: bucket.total_turns,
                abandonment_rate: bucket.abandonment_rate,
            })
            .collect(),
        hours,
    }
}

/// Highest count; ties go to the earliest date and hour.
pub fn busiest_bucket(buckets: &[PeakHourBucket]) -> Option<&PeakHourBucket> {
    pick(buckets, |candidate, current| candidate.total_turns > current.total_turns)
}

/// Lowest non-zero count; ties go to the earliest date and hour.
pub fn quietest_bucket(buckets: &[PeakHourBucket]) -> Option<&PeakHourBucket> {
    buckets
        .iter()
        .filter(|bucket| bucket.total_turns > 0)
        .reduce(|current, candidate| {
            if candidate.total_turns < current.total_turns {
                candidate
            } else {
                current
            }
        })
}

/// Hour of day with the highest average turns per recorded day.
pub fn peak_hour(hours: &[HourProfile]) -> Option<&HourProfile> {
    pick(hours, |candidate, current| candidate.avg_turns > current.avg_turns)
}

fn pick<T>(items: &[T], replaces: impl Fn(&T, &T) -> bool) -> Option<&T> {
    items
        .iter()
        .reduce(|current, candidate| if replaces(candidate, current) { candidate } else { current })
}

/// One profile per hour of day that has data, in ascending hour order.
pub fn hour_profiles(buckets: &[PeakHourBucket]) -> Vec<HourProfile> {
    let mut by_hour: BTreeMap<u32, (i64, i64, i64, i64)> = BTreeMap::new();
    for bucket in buckets {
        let entry = by_hour.entry(bucket.hour).or_default();
        entry.0 += bucket.total_turns;
        entry.1 += bucket.served_turns;
        entry.2 += bucket.abandoned_turns;
        entry.3 += 1;
    }

    by_hour
        .into_iter()
        .map(|(hour, (total, served, abandoned, days))| HourProfile {
            hour,
            label: hour_label(hour),
            avg_turns: (total as f64 / days as f64).round() as i64,
            total_turns: total,
            served_turns: served,
            abandoned_turns: abandoned,
            abandonment_rate: round2(rate_pct(abandoned, total)),
            days,
        })
        .collect()
}

fn weekday_profiles(buckets: &[PeakHourBucket]) -> Vec<WeekdayProfile> {
    let mut by_day: BTreeMap<u32, (i64, i64, i64)> = BTreeMap::new();
    for bucket in buckets {
        let entry = by_day
            .entry(bucket.date.weekday().num_days_from_monday())
            .or_default();
        entry.0 += bucket.total_turns;
        entry.1 += bucket.abandoned_turns;
        entry.2 += 1;
    }

    by_day
        .into_iter()
        .map(|(day, (total, abandoned, records))| WeekdayProfile {
            weekday: weekday_name(day),
            avg_turns: (total as f64 / records as f64).round() as i64,
            total_turns: total,
            abandonment_rate: round2(rate_pct(abandoned, total)),
        })
        .collect()
}

pub fn hour_label(hour: u32) -> String {
    format!("{hour:02}:00")
}

fn weekday_name(days_from_monday: u32) -> &'static str {
    match days_from_monday {
        0 => "lunes",
        1 => "martes",
        2 => "miércoles",
        3 => "jueves",
        4 => "viernes",
        5 => "sábado",
        _ => "domingo",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::models::{NewTurn, TurnStatus};

    pub(crate) fn new_turn_at(issued_at: &str) -> NewTurn {
        let issued_at = NaiveDateTime::parse_from_str(issued_at, "%Y-%m-%d %H:%M:%S").unwrap();
        NewTurn {
            date: issued_at.date(),
            ticket_letter: "M".into(),
            ticket_number: 1,
            module: 1,
            status: TurnStatus::Served,
            kiosk_use_seconds: None,
            wait_seconds: 0,
            service_seconds: 60,
            total_seconds: None,
            issued_at,
            served_at: None,
            ticket_full_code: "M1".into(),
            facility_id: None,
            kiosk_id: None,
            note: None,
        }
    }

    pub(crate) fn turn_at(issued_at: &str, status: TurnStatus, wait_seconds: i64) -> Turn {
        let mut turn = Turn::from_new(0, new_turn_at(issued_at));
        turn.status = status;
        turn.wait_seconds = wait_seconds;
        turn
    }

    pub(crate) fn bucket(date: &str, hour: u32, total: i64, abandoned: i64) -> PeakHourBucket {
        PeakHourBucket {
            date: date.parse().unwrap(),
            hour,
            total_turns: total,
            served_turns: total - abandoned,
            abandoned_turns: abandoned,
            abandonment_rate: rate_pct(abandoned, total),
            avg_wait_seconds: 0,
        }
    }

    #[test]
    fn buckets_by_issue_date_and_hour() {
        let turns = vec![
            turn_at("2025-02-14 09:59:00", TurnStatus::Served, 100),
            turn_at("2025-02-14 10:00:00", TurnStatus::Served, 100),
            turn_at("2025-02-14 10:30:00", TurnStatus::Abandoned, 201),
            turn_at("2025-02-15 10:10:00", TurnStatus::Served, 10),
        ];
        let buckets = bucket_turns(&turns);

        assert_eq!(buckets.len(), 3);
        let ten = &buckets[1];
        assert_eq!((ten.hour, ten.total_turns), (10, 2));
        assert_eq!(ten.served_turns, 1);
        assert_eq!(ten.abandoned_turns, 1);
        assert_eq!(ten.abandonment_rate, 50.0);
        assert_eq!(ten.avg_wait_seconds, 151);
        assert_eq!(buckets[2].date.to_string(), "2025-02-15");
    }

    #[test]
    fn busiest_bucket_reports_highest_count() {
        let mut turns = Vec::new();
        for _ in 0..5 {
            turns.push(turn_at("2025-02-14 10:15:00", TurnStatus::Served, 0));
        }
        for _ in 0..20 {
            turns.push(turn_at("2025-02-14 14:45:00", TurnStatus::Served, 0));
        }

        let analysis = analyze(&bucket_turns(&turns));
        let busiest = analysis.busiest.unwrap();
        assert_eq!((busiest.hour, busiest.total_turns), (14, 20));
        let quietest = analysis.quietest.unwrap();
        assert_eq!((quietest.hour, quietest.total_turns), (10, 5));
        assert_eq!(analysis.peak_hour.unwrap().label, "14:00");
    }

    #[test]
    fn ties_resolve_to_the_first_bucket() {
        let buckets = vec![
            bucket("2025-02-14", 9, 7, 0),
            bucket("2025-02-14", 11, 7, 0),
            bucket("2025-02-15", 9, 3, 0),
            bucket("2025-02-15", 12, 3, 0),
        ];
        assert_eq!(busiest_bucket(&buckets).unwrap().hour, 9);
        let quietest = quietest_bucket(&buckets).unwrap();
        assert_eq!((quietest.date.day(), quietest.hour), (15, 9));
    }

    #[test]
    fn hour_profiles_average_over_recorded_days() {
        let buckets = vec![
            bucket("2025-02-14", 10, 10, 1),
            bucket("2025-02-15", 10, 5, 2),
            bucket("2025-02-15", 8, 3, 0),
        ];
        let hours = hour_profiles(&buckets);

        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].label, "08:00");
        let ten = &hours[1];
        assert_eq!(ten.avg_turns, 8);
        assert_eq!(ten.days, 2);
        assert_eq!(ten.abandonment_rate, 20.0);
    }

    #[test]
    fn analysis_summarizes_all_views() {
        let buckets = vec![
            bucket("2025-02-10", 9, 30, 3),
            bucket("2025-02-10", 10, 10, 0),
            bucket("2025-02-11", 9, 20, 1),
            bucket("2025-02-11", 15, 0, 0),
        ];
        let analysis = analyze(&buckets);

        assert_eq!(analysis.total_buckets, 3);
        assert_eq!(analysis.avg_turns_per_bucket, 20);
        assert_eq!(analysis.abandonment_rate, 6.67);
        assert_eq!(analysis.busiest_hours, vec!["09:00", "10:00"]);
        assert_eq!(analysis.avg_turns_per_hour, 17.5);
        assert_eq!(analysis.heatmap.len(), 3);
        assert_eq!(analysis.top_buckets[0].total_turns, 30);

        let names: Vec<&str> = analysis.weekdays.iter().map(|w| w.weekday).collect();
        assert_eq!(names, vec!["lunes", "martes"]);
        assert_eq!(analysis.weekdays[0].avg_turns, 20);
    }

    #[test]
    fn empty_input_yields_empty_analysis() {
        let analysis = analyze(&[]);
        assert_eq!(analysis.total_buckets, 0);
        assert!(analysis.busiest.is_none());
        assert!(analysis.peak_hour.is_none());
        assert_eq!(analysis.abandonment_rate, 0.0);
    }
}
