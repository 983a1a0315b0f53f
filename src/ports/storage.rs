//! Storage port: Trait for persistent storage operations.
//!
//! This trait abstracts the storage backend (SQLite) from the application logic.
//! Role scoping is decided by the services; storage only filters by the ids
//! it is handed.

use crate::domain::{
    kdf::WrappedKey, Acknowledgment, AuditFilter, CareInstruction, ComplianceRecord,
    ComplianceType, HistoryEntry, InstructionQuery, Patient, Report, Role, Template, User,
};

/// A page of results with pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total count of matching rows across all pages
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total_count: usize, offset: usize, limit: usize) -> Self {
        let has_more = offset + items.len() < total_count;
        Self {
            items,
            total_count,
            offset,
            limit,
            has_more,
        }
    }

    /// Offset of the next page, if any.
    #[must_use]
    pub fn next_offset(&self) -> Option<usize> {
        if self.has_more {
            Some(self.offset + self.limit)
        } else {
            None
        }
    }
}

/// Trait for persistent storage.
///
/// `get_*` lookups skip soft-deleted rows and return `None` for them.
/// `patient_ids: Some(&[])` means an empty scope and always yields nothing;
/// `None` means no patient restriction.
pub trait Storage: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    // Users

    /// Insert or replace a user.
    ///
    /// # Errors
    /// Returns error if the email is already taken by another user or the
    /// write fails.
    fn save_user(&self, user: &User) -> Result<(), Self::Error>;

    fn get_user(&self, id: &str) -> Result<Option<User>, Self::Error>;

    /// Case-insensitive email lookup.
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Self::Error>;

    /// Active users, optionally with one role, oldest first.
    fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, Self::Error>;

    // Patients

    fn save_patient(&self, patient: &Patient) -> Result<(), Self::Error>;

    fn get_patient(&self, id: &str) -> Result<Option<Patient>, Self::Error>;

    /// The patient record linked to a user account.
    fn find_patient_by_user(&self, user_id: &str) -> Result<Option<Patient>, Self::Error>;

    /// Active patients, restricted to those assigned to `provider_id` when given.
    fn list_patients(&self, provider_id: Option<&str>) -> Result<Vec<Patient>, Self::Error>;

    // Instructions

    fn save_instruction(&self, instruction: &CareInstruction) -> Result<(), Self::Error>;

    fn get_instruction(&self, id: &str) -> Result<Option<CareInstruction>, Self::Error>;

    /// Active instructions matching `query` within the patient scope, newest first.
    fn list_instructions(
        &self,
        query: &InstructionQuery,
        patient_ids: Option<&[String]>,
    ) -> Result<Vec<CareInstruction>, Self::Error>;

    /// Number of stored instructions, deleted ones included.
    fn count_instructions(&self) -> Result<usize, Self::Error>;

    fn save_acknowledgment(&self, acknowledgment: &Acknowledgment) -> Result<(), Self::Error>;

    /// Acknowledgments for one instruction, oldest first.
    fn list_acknowledgments(&self, instruction_id: &str) -> Result<Vec<Acknowledgment>, Self::Error>;

    // Compliance

    /// Insert or replace a record.
    ///
    /// # Errors
    /// Returns error if another record already exists for the same
    /// instruction and compliance type.
    fn save_compliance(&self, record: &ComplianceRecord) -> Result<(), Self::Error>;

    fn get_compliance(&self, id: &str) -> Result<Option<ComplianceRecord>, Self::Error>;

    fn find_compliance(
        &self,
        instruction_id: &str,
        compliance_type: ComplianceType,
    ) -> Result<Option<ComplianceRecord>, Self::Error>;

    /// Records within the patient scope, most recently updated first.
    ///
    /// Records whose instruction is missing or soft-deleted are left out.
    fn list_compliance(&self, patient_ids: Option<&[String]>) -> Result<Vec<ComplianceRecord>, Self::Error>;

    // History

    fn append_history(&self, entry: &HistoryEntry) -> Result<(), Self::Error>;

    /// Matching entries, newest first.
    fn query_history(&self, filter: &AuditFilter) -> Result<Page<HistoryEntry>, Self::Error>;

    // Templates

    fn save_template(&self, template: &Template) -> Result<(), Self::Error>;

    fn get_template(&self, id: &str) -> Result<Option<Template>, Self::Error>;

    /// Templates owned by `provider_id`, or all when `None`, by name.
    fn list_templates(&self, provider_id: Option<&str>) -> Result<Vec<Template>, Self::Error>;

    /// Returns `false` when nothing was deleted.
    fn delete_template(&self, id: &str) -> Result<bool, Self::Error>;

    // Reports

    fn save_report(&self, report: &Report) -> Result<(), Self::Error>;

    fn get_report(&self, id: &str) -> Result<Option<Report>, Self::Error>;

    /// Reports generated by `generated_by`, or all when `None`, newest first.
    fn list_reports(&self, generated_by: Option<&str>) -> Result<Vec<Report>, Self::Error>;

    // Content key

    /// Store the wrapped content key, replacing any previous one.
    fn save_wrapped_key(&self, key: &WrappedKey) -> Result<(), Self::Error>;

    fn load_wrapped_key(&self) -> Result<Option<WrappedKey>, Self::Error>;

    /// Clear all data.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn clear_all(&self) -> Result<(), Self::Error>;
}
