//! Summary reports over patients, instructions and compliance.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{CareInstruction, ComplianceRecord, InstructionStatus, Patient};

string_enum! {
    /// Decides which figures a report carries.
    ///
    /// `summary` holds the overall totals only. `patients` adds one row per
    /// patient. `instructions` and `compliance` keep the rows but restrict
    /// every figure to their own subject.
    pub enum ReportType {
        Compliance => "compliance",
        Instructions => "instructions",
        Patients => "patients",
        Summary => "summary",
    }
}

impl ReportType {
    #[must_use]
    pub fn has_patient_rows(self) -> bool {
        !matches!(self, Self::Summary)
    }

    #[must_use]
    pub fn covers_instructions(self) -> bool {
        !matches!(self, Self::Compliance)
    }

    #[must_use]
    pub fn covers_compliance(self) -> bool {
        !matches!(self, Self::Instructions)
    }
}

/// What to report on. Both dates are inclusive UTC calendar dates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub report_type: ReportType,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub patient_id: Option<String>,
}

impl ReportRequest {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.from > self.to {
            return Err(vec![format!(
                "Report window start {} is after its end {}",
                self.from, self.to
            )]);
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        day >= self.from && day <= self.to
    }
}

/// Figures outside the report type are `None` and left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_patients: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_instructions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_instructions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_records: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_compliance: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientReportRow {
    pub patient_id: String,
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_instructions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_instructions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_records: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_compliance: Option<u32>,
}

/// A generated report. Persisted so it can be listed and re-exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub report_type: ReportType,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub generated_by: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    /// Empty for `summary` reports.
    pub patients: Vec<PatientReportRow>,
}

#[derive(Default)]
struct Tally {
    instructions: usize,
    acknowledged: usize,
    records: usize,
    percentage_sum: f64,
}

impl Tally {
    fn average(&self) -> u32 {
        if self.records == 0 {
            0
        } else {
            (self.percentage_sum / self.records as f64).round().clamp(0.0, 100.0) as u32
        }
    }

    /// `(total, acknowledged, records, average)` masked by the report type.
    fn figures(
        &self,
        kind: ReportType,
    ) -> (Option<usize>, Option<usize>, Option<usize>, Option<u32>) {
        let instructions = kind.covers_instructions();
        let compliance = kind.covers_compliance();
        (
            instructions.then_some(self.instructions),
            instructions.then_some(self.acknowledged),
            compliance.then_some(self.records),
            compliance.then(|| self.average()),
        )
    }
}

fn is_acknowledged(instruction: &CareInstruction) -> bool {
    instruction.status == InstructionStatus::Acknowledged || instruction.acknowledged_date.is_some()
}

impl Report {
    /// Build a report from already role-scoped inputs.
    ///
    /// Instructions count when created inside the window, compliance records
    /// when last updated inside it. Rows are ordered by patient name. The
    /// report type picks the rows and figures kept, see [`ReportType`].
    #[must_use]
    pub fn generate(
        request: &ReportRequest,
        generated_by: impl Into<String>,
        patients: &[Patient],
        instructions: &[CareInstruction],
        records: &[ComplianceRecord],
    ) -> Self {
        let mut tallies: BTreeMap<&str, Tally> = patients
            .iter()
            .map(|p| (p.id.as_str(), Tally::default()))
            .collect();
        let mut total = Tally::default();

        for instruction in instructions.iter().filter(|i| request.contains(i.created_at)) {
            let Some(tally) = tallies.get_mut(instruction.patient_id.as_str()) else {
                continue;
            };
            let acknowledged = usize::from(is_acknowledged(instruction));
            tally.instructions += 1;
            tally.acknowledged += acknowledged;
            total.instructions += 1;
            total.acknowledged += acknowledged;
        }

        for record in records.iter().filter(|r| request.contains(r.updated_at)) {
            let Some(tally) = tallies.get_mut(record.patient_id.as_str()) else {
                continue;
            };
            tally.records += 1;
            tally.percentage_sum += record.overall_percentage;
            total.records += 1;
            total.percentage_sum += record.overall_percentage;
        }

        let kind = request.report_type;
        let mut rows: Vec<PatientReportRow> = if kind.has_patient_rows() {
            patients
                .iter()
                .map(|p| {
                    let (total_instructions, acknowledged_instructions, compliance_records, average_compliance) =
                        tallies[p.id.as_str()].figures(kind);
                    PatientReportRow {
                        patient_id: p.id.clone(),
                        patient_name: p.full_name(),
                        total_instructions,
                        acknowledged_instructions,
                        compliance_records,
                        average_compliance,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        rows.sort_by(|a, b| a.patient_name.cmp(&b.patient_name));
        let (total_instructions, acknowledged_instructions, compliance_records, average_compliance) =
            total.figures(kind);

        Self {
            id: super::new_id(),
            report_type: kind,
            from: request.from,
            to: request.to,
            generated_by: generated_by.into(),
            generated_at: Utc::now(),
            summary: ReportSummary {
                total_patients: patients.len(),
                total_instructions,
                acknowledged_instructions,
                compliance_records,
                average_compliance,
            },
            patients: rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComplianceType, InstructionType, NewInstruction, NewPatient, Priority};
    use chrono::TimeZone;

    fn patient(user: &str, first: &str) -> Patient {
        Patient::new(NewPatient {
            user_id: user.into(),
            first_name: first.into(),
            last_name: "Test".into(),
            ..Default::default()
        })
    }

    fn instruction(patient_id: &str, day: u32) -> CareInstruction {
        let mut i = CareInstruction::new(
            "prov",
            NewInstruction {
                patient_id: patient_id.into(),
                title: "t".into(),
                instruction_type: InstructionType::Medication,
                priority: Priority::Medium,
                content: "c".into(),
                details: None,
                compliance_tracking_enabled: None,
                effective_date: None,
                expiration_date: None,
            },
        );
        i.created_at = Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap();
        i
    }

    fn record(patient_id: &str, pct: f64, day: u32) -> ComplianceRecord {
        let mut r = ComplianceRecord::new("i", patient_id, ComplianceType::Medication, None, "u");
        r.overall_percentage = pct;
        r.updated_at = Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap();
        r
    }

    fn request() -> ReportRequest {
        ReportRequest {
            report_type: ReportType::Patients,
            from: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            patient_id: None,
        }
    }

    #[test]
    fn summary_and_per_patient_rows() {
        let bob = patient("u-bob", "Bob");
        let amy = patient("u-amy", "Amy");
        let mut acked = instruction(&bob.id, 2);
        acked.status = InstructionStatus::Acknowledged;
        let instructions = vec![acked, instruction(&bob.id, 3), instruction(&amy.id, 4)];
        let records = vec![record(&bob.id, 100.0, 5), record(&bob.id, 50.0, 6), record(&amy.id, 0.0, 7)];

        let report = Report::generate(&request(), "admin", &[bob.clone(), amy.clone()], &instructions, &records);

        assert_eq!(report.summary.total_patients, 2);
        assert_eq!(report.summary.total_instructions, Some(3));
        assert_eq!(report.summary.acknowledged_instructions, Some(1));
        assert_eq!(report.summary.compliance_records, Some(3));
        assert_eq!(report.summary.average_compliance, Some(50));

        assert_eq!(report.patients[0].patient_name, "Amy Test");
        assert_eq!(report.patients[1].average_compliance, Some(75));
        assert_eq!(report.patients[1].acknowledged_instructions, Some(1));
    }

    #[test]
    fn report_type_shapes_the_payload() {
        let bob = patient("u-bob", "Bob");
        let instructions = vec![instruction(&bob.id, 2)];
        let records = vec![record(&bob.id, 80.0, 3)];
        let build = |report_type| {
            let req = ReportRequest {
                report_type,
                ..request()
            };
            Report::generate(&req, "admin", &[bob.clone()], &instructions, &records)
        };

        let summary = build(ReportType::Summary);
        assert!(summary.patients.is_empty());
        assert_eq!(summary.summary.total_instructions, Some(1));
        assert_eq!(summary.summary.average_compliance, Some(80));

        let compliance = build(ReportType::Compliance);
        assert_eq!(compliance.patients.len(), 1);
        assert_eq!(compliance.summary.total_instructions, None);
        assert_eq!(compliance.patients[0].acknowledged_instructions, None);
        assert_eq!(compliance.patients[0].average_compliance, Some(80));

        let instructions_only = build(ReportType::Instructions);
        assert_eq!(instructions_only.summary.compliance_records, None);
        assert_eq!(instructions_only.patients[0].total_instructions, Some(1));
        let json = serde_json::to_value(&instructions_only.summary).unwrap();
        assert!(json.get("averageCompliance").is_none());
        assert_eq!(json["totalInstructions"], 1);
    }

    #[test]
    fn window_excludes_outside_dates() {
        let bob = patient("u-bob", "Bob");
        let mut outside = instruction(&bob.id, 1);
        outside.created_at = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let report = Report::generate(&request(), "admin", &[bob], &[outside], &[]);
        assert_eq!(report.summary.total_instructions, Some(0));
        assert_eq!(report.summary.average_compliance, Some(0));
    }

    #[test]
    fn inverted_window_rejected() {
        let mut req = request();
        req.from = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert!(req.validate().is_err());
    }
}
