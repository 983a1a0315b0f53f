//! Reusable instruction templates owned by providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InstructionDetails, InstructionType, NewInstruction, Priority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub description: Option<String>,
    pub instruction_type: InstructionType,
    pub priority: Priority,
    pub content: String,
    pub details: Option<InstructionDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, input: NewTemplate) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            provider_id: provider_id.into(),
            name: input.name.trim().to_string(),
            description: input.description,
            instruction_type: input.instruction_type,
            priority: input.priority,
            content: input.content,
            details: input.details,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: &TemplateUpdate) {
        if let Some(name) = &update.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
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
        self.updated_at = Utc::now();
    }

    /// Draft an instruction for `patient_id` from this template.
    #[must_use]
    pub fn instantiate(&self, patient_id: impl Into<String>, title: Option<String>) -> NewInstruction {
        NewInstruction {
            patient_id: patient_id.into(),
            title: title.unwrap_or_else(|| self.name.clone()),
            instruction_type: self.instruction_type,
            priority: self.priority,
            content: self.content.clone(),
            details: self.details.clone(),
            compliance_tracking_enabled: None,
            effective_date: None,
            expiration_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub instruction_type: InstructionType,
    pub priority: Priority,
    pub content: String,
    pub details: Option<InstructionDetails>,
}

impl NewTemplate {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Template name must not be empty".to_string());
        }
        if self.content.trim().is_empty() {
            errors.push("Template content must not be empty".to_string());
        }
        if let Some(details) = &self.details {
            if details.instruction_type() != self.instruction_type {
                errors.push("Template details do not match its instruction type".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub content: Option<String>,
    pub details: Option<InstructionDetails>,
}

impl TemplateUpdate {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate_for(&self, template: &Template) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            errors.push("Template name must not be empty".to_string());
        }
        if matches!(&self.content, Some(c) if c.trim().is_empty()) {
            errors.push("Template content must not be empty".to_string());
        }
        if matches!(&self.details, Some(d) if d.instruction_type() != template.instruction_type) {
            errors.push("Template details do not match its instruction type".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
