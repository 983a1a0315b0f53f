//! Role-based access policy.
//!
//! Every patient-scoped entity (instruction, acknowledgment, compliance
//! record, the patient row itself) resolves to one `Patient`. Whether a caller
//! may touch it is decided by the caller's role strategy:
//!
//! - patient: the patient row's `user_id` is the caller
//! - provider: the caller is in `assigned_provider_ids`
//! - administrator: always
//!
//! `permits` decides which operations a role may attempt at all.

use super::{Patient, Role};

/// Operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadInstruction,
    CreateInstruction,
    UpdateInstruction,
    DeleteInstruction,
    AcknowledgeInstruction,
    ReadCompliance,
    CreateCompliance,
    UpdateCompliance,
    ReadPatient,
    CreatePatient,
    UpdatePatient,
    AssignProviders,
    ManageTemplates,
    GenerateReports,
    ManageUsers,
    ReadAuditLogs,
}

/// Per-role authorization strategy.
pub trait AccessPolicy: Send + Sync {
    /// Whether the role may attempt `action` at all.
    fn permits(&self, action: Action) -> bool;

    /// Whether `caller_id` may act on data belonging to `patient`.
    fn can_access(&self, caller_id: &str, patient: &Patient) -> bool;

    /// True when no per-patient filtering is needed for lists.
    fn unrestricted(&self) -> bool {
        false
    }
}

/// Patients act on their own record only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientPolicy;

/// Providers act on patients assigned to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderPolicy;

/// Administrators are unrestricted within an endpoint's scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdministratorPolicy;

impl AccessPolicy for PatientPolicy {
    fn permits(&self, action: Action) -> bool {
        matches!(
            action,
            Action::ReadInstruction
                | Action::AcknowledgeInstruction
                | Action::ReadCompliance
                | Action::CreateCompliance
                | Action::UpdateCompliance
                | Action::ReadPatient
                | Action::UpdatePatient
        )
    }

    fn can_access(&self, caller_id: &str, patient: &Patient) -> bool {
        patient.user_id == caller_id
    }
}

impl AccessPolicy for ProviderPolicy {
    fn permits(&self, action: Action) -> bool {
        !matches!(
            action,
            Action::AcknowledgeInstruction
                | Action::CreatePatient
                | Action::AssignProviders
                | Action::ManageUsers
                | Action::ReadAuditLogs
        )
    }

    fn can_access(&self, caller_id: &str, patient: &Patient) -> bool {
        patient.is_assigned_to(caller_id)
    }
}

impl AccessPolicy for AdministratorPolicy {
    fn permits(&self, action: Action) -> bool {
        // Instructions are authored by the treating provider; acknowledgments
        // come from the patient.
        !matches!(
            action,
            Action::CreateInstruction | Action::AcknowledgeInstruction
        )
    }

    fn can_access(&self, _caller_id: &str, _patient: &Patient) -> bool {
        true
    }

    fn unrestricted(&self) -> bool {
        true
    }
}

/// Select the strategy for a role.
#[must_use]
pub fn policy_for(role: Role) -> &'static dyn AccessPolicy {
    match role {
        Role::Patient => &PatientPolicy,
        Role::Provider => &ProviderPolicy,
        Role::Administrator => &AdministratorPolicy,
    }
}

/// Single predicate form of the policy.
#[must_use]
pub fn can_access(role: Role, caller_id: &str, patient: &Patient) -> bool {
    policy_for(role).can_access(caller_id, patient)
}
