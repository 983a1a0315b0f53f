//! Compliance metrics rollup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ComplianceRecord, ComplianceStatus, ComplianceType};

/// Number of most recent distinct dates kept in the trend series.
pub const TREND_WINDOW: usize = 7;

/// Average compliance on one UTC calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// `yyyy-mm-dd`
    pub date: String,
    pub compliance: u32,
}

/// Aggregated compliance over a role-scoped set of records.
///
/// Percentages are rounded to the nearest integer; a bucket with no records is 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetrics {
    pub overall_compliance: u32,
    pub medication_compliance: u32,
    pub lifestyle_compliance: u32,
    pub appointment_compliance: u32,
    pub compliant_count: usize,
    pub total_records: usize,
    pub trend: Vec<TrendPoint>,
}

fn average<'a>(values: impl Iterator<Item = &'a ComplianceRecord>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), r| {
        (sum + r.overall_percentage, count + 1)
    });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn rounded(p: f64) -> u32 {
    p.round().clamp(0.0, 100.0) as u32
}

/// Roll a set of records up into metrics.
#[must_use]
pub fn compute_metrics(records: &[ComplianceRecord]) -> ComplianceMetrics {
    let by_type = |kind: ComplianceType| {
        rounded(average(records.iter().filter(move |r| r.compliance_type == kind)))
    };

    // BTreeMap keeps the yyyy-mm-dd keys in ascending order.
    let mut per_day: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        let key = record.updated_at.format("%Y-%m-%d").to_string();
        let slot = per_day.entry(key).or_insert((0.0, 0));
        slot.0 += record.overall_percentage;
        slot.1 += 1;
    }
    let skip = per_day.len().saturating_sub(TREND_WINDOW);
    let trend = per_day
        .into_iter()
        .skip(skip)
        .map(|(date, (sum, count))| TrendPoint {
            date,
            compliance: rounded(sum / count as f64),
        })
        .collect();

    ComplianceMetrics {
        overall_compliance: rounded(average(records.iter())),
        medication_compliance: by_type(ComplianceType::Medication),
        lifestyle_compliance: by_type(ComplianceType::Lifestyle),
        appointment_compliance: by_type(ComplianceType::Appointment),
        compliant_count: records
            .iter()
            .filter(|r| r.status == ComplianceStatus::Compliant)
            .count(),
        total_records: records.len(),
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(kind: ComplianceType, pct: f64, day: u32) -> ComplianceRecord {
        let mut r = ComplianceRecord::new("i", "p", kind, None, "u");
        r.overall_percentage = pct;
        r.status = ComplianceStatus::from_progress(pct);
        r.updated_at = Utc.with_ymd_and_hms(2024, 5, day, 23, 30, 0).unwrap();
        r
    }

    #[test]
    fn empty_set_is_all_zero() {
        let m = compute_metrics(&[]);
        assert_eq!(m, ComplianceMetrics::default());
        assert!(m.trend.is_empty());
    }

    #[test]
    fn averages_by_type_and_overall() {
        let records = vec![
            record(ComplianceType::Medication, 100.0, 1),
            record(ComplianceType::Medication, 50.0, 1),
            record(ComplianceType::Lifestyle, 33.3, 2),
        ];
        let m = compute_metrics(&records);
        assert_eq!(m.medication_compliance, 75);
        assert_eq!(m.lifestyle_compliance, 33);
        assert_eq!(m.appointment_compliance, 0);
        assert_eq!(m.overall_compliance, 61); // 183.3 / 3
        assert_eq!(m.compliant_count, 1);
        assert_eq!(m.total_records, 3);
    }

    #[test]
    fn trend_keeps_last_seven_dates_ascending() {
        let records: Vec<_> = (1..=10)
            .rev()
            .map(|d| record(ComplianceType::Lifestyle, f64::from(d) * 10.0, d))
            .collect();
        let m = compute_metrics(&records);
        assert_eq!(m.trend.len(), TREND_WINDOW);
        assert_eq!(m.trend.first().unwrap().date, "2024-05-04");
        assert_eq!(m.trend.last().unwrap().date, "2024-05-10");
        assert!(m.trend.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(m.trend.last().unwrap().compliance, 100);
    }

    #[test]
    fn same_day_records_are_averaged() {
        let records = vec![
            record(ComplianceType::Medication, 20.0, 3),
            record(ComplianceType::Lifestyle, 70.0, 3),
        ];
        let m = compute_metrics(&records);
        assert_eq!(
            m.trend,
            vec![TrendPoint {
                date: "2024-05-03".into(),
                compliance: 45
            }]
        );
    }
}
