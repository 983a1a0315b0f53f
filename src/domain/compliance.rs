//! Compliance records and adherence aggregation.
//!
//! Medication schedules and lifestyle check-ins share one update rule: record
//! an entry, recompute the done/total ratio as a percentage, and map that
//! percentage to a status. Only the slot matching and the "done" predicate
//! differ, so both go through [`record_entry`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum ComplianceType {
        Medication => "medication",
        Lifestyle => "lifestyle",
        Appointment => "appointment",
    }
}

string_enum! {
    pub enum ComplianceStatus {
        Compliant => "compliant",
        Partial => "partial",
        NonCompliant => "non-compliant",
        NotStarted => "not-started",
    }
}

string_enum! {
    /// Outcome of one scheduled dose.
    pub enum DoseStatus {
        Taken => "taken",
        Missed => "missed",
        Skipped => "skipped",
        Pending => "pending",
    }
}

impl ComplianceStatus {
    /// Map a progress percentage to a status.
    ///
    /// 100 is compliant, 0 is non-compliant, anything in between (80-99
    /// included) is partial.
    #[must_use]
    pub fn from_progress(progress: f64) -> Self {
        if progress >= 100.0 {
            Self::Compliant
        } else if progress > 0.0 {
            Self::Partial
        } else {
            Self::NonCompliant
        }
    }
}

/// One medication dose slot, keyed by `(date, time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    /// Local time of day, `HH:MM`.
    pub time: String,
    pub status: DoseStatus,
    pub reason: Option<String>,
}

/// One lifestyle check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub date: NaiveDate,
    pub completed: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub progress: Option<f64>,
}

/// Attendance data for follow-up appointments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentAdherence {
    pub scheduled_date: Option<DateTime<Utc>>,
    pub attended: Option<bool>,
    pub rescheduled_to: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Adherence payload, tagged by the record's compliance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdherenceData {
    #[serde(rename = "medication")]
    Medication { schedule: Vec<ScheduleEntry> },
    #[serde(rename = "lifestyle", rename_all = "camelCase")]
    Lifestyle { check_ins: Vec<CheckIn> },
    #[serde(rename = "appointment")]
    Appointment(AppointmentAdherence),
}

impl AdherenceData {
    /// Empty payload for a record type.
    #[must_use]
    pub fn empty(kind: ComplianceType) -> Self {
        match kind {
            ComplianceType::Medication => Self::Medication { schedule: Vec::new() },
            ComplianceType::Lifestyle => Self::Lifestyle { check_ins: Vec::new() },
            ComplianceType::Appointment => Self::Appointment(AppointmentAdherence::default()),
        }
    }

    #[must_use]
    pub fn compliance_type(&self) -> ComplianceType {
        match self {
            Self::Medication { .. } => ComplianceType::Medication,
            Self::Lifestyle { .. } => ComplianceType::Lifestyle,
            Self::Appointment(_) => ComplianceType::Appointment,
        }
    }

    /// Check every entry of a caller-supplied payload.
    ///
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self {
            Self::Medication { schedule } => {
                for entry in schedule {
                    check_time(&entry.time, &mut errors);
                }
            }
            Self::Lifestyle { check_ins } => {
                for check_in in check_ins {
                    check_progress(check_in.progress, &mut errors);
                    check_metrics(&check_in.metrics, &mut errors);
                }
            }
            Self::Appointment(_) => {}
        }
        into_result(errors)
    }

    /// Progress implied by the payload, `None` when nothing was recorded yet.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Medication { schedule } if !schedule.is_empty() => {
                Some(ratio(schedule, |e| e.status == DoseStatus::Taken))
            }
            Self::Lifestyle { check_ins } if !check_ins.is_empty() => {
                Some(ratio(check_ins, |c| c.completed))
            }
            Self::Appointment(a) => a.attended.map(|attended| if attended { 100.0 } else { 0.0 }),
            _ => None,
        }
    }
}

fn ratio<T>(entries: &[T], done: impl Fn(&T) -> bool) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let completed = entries.iter().filter(|e| done(*e)).count();
    completed as f64 / entries.len() as f64 * 100.0
}

/// Record an entry and return the recomputed completion percentage.
///
/// An existing entry for which `same_slot(existing, &entry)` holds is
/// replaced; otherwise `entry` is appended. The result is
/// `done_count / len * 100`, or 0 for an empty list.
pub fn record_entry<T>(
    entries: &mut Vec<T>,
    entry: T,
    same_slot: impl Fn(&T, &T) -> bool,
    done: impl Fn(&T) -> bool,
) -> f64 {
    match entries.iter_mut().find(|e| same_slot(&**e, &entry)) {
        Some(slot) => *slot = entry,
        None => entries.push(entry),
    }
    ratio(entries, done)
}

/// Tracked adherence for one instruction and one compliance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRecord {
    pub id: String,
    pub instruction_id: String,
    pub patient_id: String,
    pub compliance_type: ComplianceType,
    pub status: ComplianceStatus,
    pub overall_percentage: f64,
    pub adherence: AdherenceData,
    pub last_updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComplianceRecord {
    /// Create a record. Status follows the initial payload, `NotStarted` if empty.
    #[must_use]
    pub fn new(
        instruction_id: impl Into<String>,
        patient_id: impl Into<String>,
        compliance_type: ComplianceType,
        adherence: Option<AdherenceData>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let adherence = adherence.unwrap_or_else(|| AdherenceData::empty(compliance_type));
        let (status, overall_percentage) = match adherence.progress() {
            Some(p) => (ComplianceStatus::from_progress(p), p),
            None => (ComplianceStatus::NotStarted, 0.0),
        };
        Self {
            id: super::new_id(),
            instruction_id: instruction_id.into(),
            patient_id: patient_id.into(),
            compliance_type,
            status,
            overall_percentage,
            adherence,
            last_updated_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a medication dose outcome.
    ///
    /// Returns `None` when the record does not track medication.
    pub fn record_dose(&mut self, update: &MedicationAdherenceUpdate, actor: &str) -> Option<f64> {
        let AdherenceData::Medication { schedule } = &mut self.adherence else {
            return None;
        };
        let entry = ScheduleEntry {
            date: update.date,
            time: update.time.clone(),
            status: update.status,
            reason: update.reason.clone(),
        };
        let computed = record_entry(
            schedule,
            entry,
            |a, b| a.date == b.date && a.time == b.time,
            |e| e.status == DoseStatus::Taken,
        );
        Some(self.settle(update.progress, computed, actor))
    }

    /// Append a lifestyle check-in.
    ///
    /// Returns `None` when the record does not track lifestyle goals.
    pub fn record_check_in(&mut self, update: &LifestyleCheckIn, actor: &str) -> Option<f64> {
        let AdherenceData::Lifestyle { check_ins } = &mut self.adherence else {
            return None;
        };
        let entry = CheckIn {
            date: update.date,
            completed: update.completed,
            notes: update.notes.clone(),
            metrics: update.metrics.clone(),
            progress: update.progress,
        };
        let computed = record_entry(check_ins, entry, |_, _| false, |c| c.completed);
        Some(self.settle(update.progress, computed, actor))
    }

    /// Apply a direct update (status/percentage/payload).
    ///
    /// A new payload recomputes the percentage unless one is given; an
    /// explicit status wins over the derived one.
    pub fn apply(&mut self, update: &ComplianceUpdate, actor: &str) {
        if let Some(adherence) = &update.adherence {
            self.adherence = adherence.clone();
        }
        let percentage = update
            .overall_percentage
            .or_else(|| update.adherence.as_ref().and_then(AdherenceData::progress));
        if let Some(p) = percentage {
            self.overall_percentage = clamp_percentage(p);
            self.status = ComplianceStatus::from_progress(self.overall_percentage);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.touch(actor);
    }

    fn settle(&mut self, explicit: Option<f64>, computed: f64, actor: &str) -> f64 {
        let progress = clamp_percentage(explicit.unwrap_or(computed));
        self.overall_percentage = progress;
        self.status = ComplianceStatus::from_progress(progress);
        self.touch(actor);
        progress
    }

    fn touch(&mut self, actor: &str) {
        self.last_updated_by = actor.to_string();
        self.updated_at = Utc::now();
    }
}

fn clamp_percentage(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 100.0)
    }
}

/// Input for creating a compliance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComplianceRecord {
    pub instruction_id: String,
    pub compliance_type: ComplianceType,
    pub adherence: Option<AdherenceData>,
}

/// Direct update of a compliance record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceUpdate {
    pub status: Option<ComplianceStatus>,
    pub overall_percentage: Option<f64>,
    pub adherence: Option<AdherenceData>,
}

impl ComplianceUpdate {
    /// # Errors
    /// Returns every violated rule, including those of the adherence payload.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Some(p) = self.overall_percentage {
            if !p.is_finite() || !(0.0..=100.0).contains(&p) {
                errors.push(format!("Overall percentage {p} out of range [0, 100]"));
            }
        }
        if let Some(Err(mut nested)) = self.adherence.as_ref().map(AdherenceData::validate) {
            errors.append(&mut nested);
        }
        into_result(errors)
    }
}

/// Medication sub-update: one dose slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationAdherenceUpdate {
    pub date: NaiveDate,
    pub time: String,
    pub status: DoseStatus,
    pub reason: Option<String>,
    /// Caller-supplied override of the computed percentage.
    pub progress: Option<f64>,
}

impl MedicationAdherenceUpdate {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_time(&self.time, &mut errors);
        check_progress(self.progress, &mut errors);
        into_result(errors)
    }
}

/// Lifestyle sub-update: one check-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifestyleCheckIn {
    pub date: NaiveDate,
    pub completed: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub progress: Option<f64>,
}

impl LifestyleCheckIn {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_progress(self.progress, &mut errors);
        check_metrics(&self.metrics, &mut errors);
        into_result(errors)
    }
}

fn check_time(time: &str, errors: &mut Vec<String>) {
    if chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
        errors.push(format!("Time {time:?} is not HH:MM"));
    }
}

fn check_progress(progress: Option<f64>, errors: &mut Vec<String>) {
    if let Some(p) = progress {
        if !(0.0..=100.0).contains(&p) {
            errors.push(format!("Progress {p} out of range [0, 100]"));
        }
    }
}

fn check_metrics(metrics: &BTreeMap<String, f64>, errors: &mut Vec<String>) {
    if metrics.values().any(|v| !v.is_finite()) {
        errors.push("Metric values must be finite numbers".to_string());
    }
}

fn into_result(errors: Vec<String>) -> Result<(), Vec<String>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
