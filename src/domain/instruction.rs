//! Care instructions and their acknowledgment state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ComplianceType;

string_enum! {
    /// What kind of directive an instruction is.
    pub enum InstructionType {
        Medication => "medication",
        Lifestyle => "lifestyle",
        FollowUp => "follow-up",
        Warning => "warning",
    }
}

string_enum! {
    pub enum Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    /// Lifecycle of an instruction.
    ///
    /// Only `Active -> Acknowledged` is driven by acknowledgments; the other
    /// transitions are explicit updates.
    pub enum InstructionStatus {
        Active => "active",
        Acknowledged => "acknowledged",
        Completed => "completed",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum AcknowledgmentType {
        Receipt => "receipt",
        Understanding => "understanding",
        Commitment => "commitment",
    }
}

impl InstructionType {
    /// The compliance record type that tracks this kind of instruction.
    ///
    /// Warnings are informational and carry no compliance tracking.
    #[must_use]
    pub fn compliance_type(&self) -> Option<ComplianceType> {
        match self {
            Self::Medication => Some(ComplianceType::Medication),
            Self::Lifestyle => Some(ComplianceType::Lifestyle),
            Self::FollowUp => Some(ComplianceType::Appointment),
            Self::Warning => None,
        }
    }
}

/// Type-specific instruction details, tagged by the instruction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InstructionDetails {
    #[serde(rename = "medication", rename_all = "camelCase")]
    Medication {
        medication_name: String,
        dosage: String,
        frequency: String,
        route: Option<String>,
        duration: Option<String>,
        #[serde(default)]
        times_of_day: Vec<String>,
    },
    #[serde(rename = "lifestyle", rename_all = "camelCase")]
    Lifestyle {
        category: String,
        goal: String,
        frequency: Option<String>,
        duration: Option<String>,
    },
    #[serde(rename = "follow-up", rename_all = "camelCase")]
    FollowUp {
        appointment_type: String,
        scheduled_date: Option<DateTime<Utc>>,
        location: Option<String>,
        with_provider: Option<String>,
    },
    #[serde(rename = "warning", rename_all = "camelCase")]
    Warning {
        severity: String,
        #[serde(default)]
        symptoms: Vec<String>,
        action_required: String,
    },
}

impl InstructionDetails {
    #[must_use]
    pub fn instruction_type(&self) -> InstructionType {
        match self {
            Self::Medication { .. } => InstructionType::Medication,
            Self::Lifestyle { .. } => InstructionType::Lifestyle,
            Self::FollowUp { .. } => InstructionType::FollowUp,
            Self::Warning { .. } => InstructionType::Warning,
        }
    }
}

/// A provider-authored care directive assigned to a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareInstruction {
    pub id: String,
    pub provider_id: String,
    pub patient_id: String,
    pub title: String,
    pub instruction_type: InstructionType,
    pub priority: Priority,

    /// Free text. Plaintext in the service API, an encrypted token at rest.
    pub content: String,

    pub details: Option<InstructionDetails>,
    pub status: InstructionStatus,

    /// Starts at 1, bumped on every update. Informational only.
    pub version: u32,

    pub compliance_tracking_enabled: bool,
    pub acknowledged_date: Option<DateTime<Utc>>,
    pub effective_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CareInstruction {
    /// Build a new active instruction authored by `provider_id`.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, input: NewInstruction) -> Self {
        let now = Utc::now();
        let tracking = input
            .compliance_tracking_enabled
            .unwrap_or_else(|| input.instruction_type.compliance_type().is_some());
        Self {
            id: super::new_id(),
            provider_id: provider_id.into(),
            patient_id: input.patient_id,
            title: input.title.trim().to_string(),
            instruction_type: input.instruction_type,
            priority: input.priority,
            content: input.content,
            details: input.details,
            status: InstructionStatus::Active,
            version: 1,
            compliance_tracking_enabled: tracking,
            acknowledged_date: None,
            effective_date: input.effective_date,
            expiration_date: input.expiration_date,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Apply an update and bump the version.
    pub fn apply(&mut self, update: &InstructionUpdate) {
        if let Some(title) = &update.title {
            self.title = title.trim().to_string();
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
        if let Some(details) = &update.details {
            self.details = Some(details.clone());
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(enabled) = update.compliance_tracking_enabled {
            self.compliance_tracking_enabled = enabled;
        }
        if let Some(date) = update.effective_date {
            self.effective_date = Some(date);
        }
        if let Some(date) = update.expiration_date {
            self.expiration_date = Some(date);
        }
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Whether new acknowledgments may be recorded in the current status.
    #[must_use]
    pub fn accepts_acknowledgments(&self) -> bool {
        matches!(
            self.status,
            InstructionStatus::Active | InstructionStatus::Acknowledged
        )
    }

    /// Move to `Acknowledged` once every acknowledgment type is held.
    ///
    /// `held` is every type recorded so far, including the one made `at`.
    /// Returns `true` when the transition happened. Re-acknowledging after
    /// the transition leaves `acknowledged_date` untouched.
    pub fn apply_acknowledgments(&mut self, held: &[AcknowledgmentType], at: DateTime<Utc>) -> bool {
        if self.status != InstructionStatus::Active {
            return false;
        }
        let complete = AcknowledgmentType::ALL.iter().all(|t| held.contains(t));
        if !complete {
            return false;
        }
        self.status = InstructionStatus::Acknowledged;
        self.acknowledged_date = Some(at);
        self.updated_at = at;
        true
    }
}

/// Input for creating an instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInstruction {
    pub patient_id: String,
    pub title: String,
    pub instruction_type: InstructionType,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub content: String,
    pub details: Option<InstructionDetails>,
    pub compliance_tracking_enabled: Option<bool>,
    pub effective_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
}

fn default_priority() -> Priority {
    Priority::Medium
}

impl NewInstruction {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.patient_id.trim().is_empty() {
            errors.push("Patient id must not be empty".to_string());
        }
        if self.title.trim().is_empty() {
            errors.push("Title must not be empty".to_string());
        }
        if self.content.trim().is_empty() {
            errors.push("Content must not be empty".to_string());
        }
        check_details(self.instruction_type, self.details.as_ref(), &mut errors);
        check_dates(self.effective_date, self.expiration_date, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Partial update of an instruction. The type and patient are fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionUpdate {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub content: Option<String>,
    pub details: Option<InstructionDetails>,
    pub status: Option<InstructionStatus>,
    pub compliance_tracking_enabled: Option<bool>,
    pub effective_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl InstructionUpdate {
    /// Validate against the instruction being updated.
    ///
    /// # Errors
    /// Returns every violated rule.
    pub fn validate_for(&self, current: &CareInstruction) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            errors.push("Title must not be empty".to_string());
        }
        if matches!(&self.content, Some(c) if c.trim().is_empty()) {
            errors.push("Content must not be empty".to_string());
        }
        if self.details.is_some() {
            check_details(current.instruction_type, self.details.as_ref(), &mut errors);
        }
        check_dates(
            self.effective_date.or(current.effective_date),
            self.expiration_date.or(current.expiration_date),
            &mut errors,
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_details(kind: InstructionType, details: Option<&InstructionDetails>, errors: &mut Vec<String>) {
    if let Some(details) = details {
        if details.instruction_type() != kind {
            errors.push(format!(
                "Details of type {} do not match instruction type {}",
                details.instruction_type(),
                kind
            ));
        }
    }
}

fn check_dates(effective: Option<DateTime<Utc>>, expiration: Option<DateTime<Utc>>, errors: &mut Vec<String>) {
    if let (Some(from), Some(to)) = (effective, expiration) {
        if to < from {
            errors.push("Expiration date precedes effective date".to_string());
        }
    }
}

/// Filters for listing instructions. Role scoping is applied on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionQuery {
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub status: Option<InstructionStatus>,
    pub instruction_type: Option<InstructionType>,
}

/// A patient's confirmation regarding an instruction. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub id: String,
    pub instruction_id: String,
    pub patient_id: String,
    pub acknowledgment_type: AcknowledgmentType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub acknowledged_at: DateTime<Utc>,
}

impl Acknowledgment {
    #[must_use]
    pub fn new(
        instruction: &CareInstruction,
        acknowledgment_type: AcknowledgmentType,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: super::new_id(),
            instruction_id: instruction.id.clone(),
            patient_id: instruction.patient_id.clone(),
            acknowledgment_type,
            ip_address,
            user_agent,
            acknowledged_at: Utc::now(),
        }
    }
}
