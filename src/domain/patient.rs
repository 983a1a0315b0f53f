//! Patient demographic records.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Who to call when the patient cannot be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: String,
    pub phone: String,
}

/// Patient record, 1:1 with a `patient`-role user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub medical_record_number: Option<String>,
    pub emergency_contact: Option<EmergencyContact>,

    /// Provider user ids allowed to see and treat this patient.
    pub assigned_provider_ids: BTreeSet<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Patient {
    /// Create a patient record from validated input.
    #[must_use]
    pub fn new(input: NewPatient) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            user_id: input.user_id,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            date_of_birth: input.date_of_birth,
            gender: input.gender,
            phone: input.phone,
            address: input.address,
            medical_record_number: input.medical_record_number,
            emergency_contact: input.emergency_contact,
            assigned_provider_ids: input.assigned_provider_ids,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    #[must_use]
    pub fn is_assigned_to(&self, provider_id: &str) -> bool {
        self.assigned_provider_ids.contains(provider_id)
    }

    /// Apply a demographic update. Provider assignment is handled separately.
    pub fn apply(&mut self, update: &PatientUpdate) {
        if let Some(v) = &update.first_name {
            self.first_name = v.trim().to_string();
        }
        if let Some(v) = &update.last_name {
            self.last_name = v.trim().to_string();
        }
        if let Some(v) = update.date_of_birth {
            self.date_of_birth = Some(v);
        }
        if let Some(v) = &update.gender {
            self.gender = Some(v.clone());
        }
        if let Some(v) = &update.phone {
            self.phone = Some(v.clone());
        }
        if let Some(v) = &update.address {
            self.address = Some(v.clone());
        }
        if let Some(v) = &update.medical_record_number {
            self.medical_record_number = Some(v.clone());
        }
        if let Some(v) = &update.emergency_contact {
            self.emergency_contact = Some(v.clone());
        }
        if let Some(ids) = &update.assigned_provider_ids {
            self.assigned_provider_ids = ids.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Input for creating a patient record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub medical_record_number: Option<String>,
    pub emergency_contact: Option<EmergencyContact>,
    #[serde(default)]
    pub assigned_provider_ids: BTreeSet<String>,
}

impl NewPatient {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.user_id.trim().is_empty() {
            errors.push("User id must not be empty".to_string());
        }
        if self.first_name.trim().is_empty() {
            errors.push("First name must not be empty".to_string());
        }
        if self.last_name.trim().is_empty() {
            errors.push("Last name must not be empty".to_string());
        }
        validate_birth_date(self.date_of_birth, &mut errors);
        validate_phone(self.phone.as_deref(), &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Partial update of a patient record.
///
/// `assigned_provider_ids` replaces the whole set and is administrator-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub medical_record_number: Option<String>,
    pub emergency_contact: Option<EmergencyContact>,
    pub assigned_provider_ids: Option<BTreeSet<String>>,
}

impl PatientUpdate {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if matches!(&self.first_name, Some(v) if v.trim().is_empty()) {
            errors.push("First name must not be empty".to_string());
        }
        if matches!(&self.last_name, Some(v) if v.trim().is_empty()) {
            errors.push("Last name must not be empty".to_string());
        }
        validate_birth_date(self.date_of_birth, &mut errors);
        validate_phone(self.phone.as_deref(), &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_birth_date(date: Option<NaiveDate>, errors: &mut Vec<String>) {
    if let Some(dob) = date {
        if dob > Utc::now().date_naive() {
            errors.push(format!("Date of birth {dob} is in the future"));
        }
    }
}

fn validate_phone(phone: Option<&str>, errors: &mut Vec<String>) {
    if let Some(phone) = phone {
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        let allowed = phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
        if !allowed || !(7..=15).contains(&digits) {
            errors.push("Phone number is not valid".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NewPatient {
        NewPatient {
            user_id: "u-1".into(),
            first_name: " Ada ".into(),
            last_name: "Lovelace".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 12, 10),
            phone: Some("+1 (555) 010-2030".into()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_input_passes() {
        assert!(input().validate().is_ok());
        let patient = Patient::new(input());
        assert_eq!(patient.full_name(), "Ada Lovelace");
    }

    #[test]
    fn future_birth_date_and_bad_phone_rejected() {
        let mut bad = input();
        bad.date_of_birth = Some(Utc::now().date_naive() + chrono::Duration::days(3));
        bad.phone = Some("call me".into());
        let errors = bad.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn assignment_lookup() {
        let mut patient = Patient::new(input());
        assert!(!patient.is_assigned_to("prov-1"));
        patient.apply(&PatientUpdate {
            assigned_provider_ids: Some(BTreeSet::from(["prov-1".to_string()])),
            ..Default::default()
        });
        assert!(patient.is_assigned_to("prov-1"));
    }
}
