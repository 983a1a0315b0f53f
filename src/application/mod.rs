//! Application layer: Use cases and services.
//!
//! Each service takes the authenticated `Caller` explicitly, checks the
//! caller's role policy, and orchestrates domain logic with the ports.

mod audit;
mod authz;
mod compliance;
mod instructions;
pub mod keys;
mod patients;
mod reports;
mod templates;
mod users;

pub use audit::AuditService;
pub use compliance::ComplianceService;
pub use instructions::InstructionService;
pub use patients::PatientService;
pub use reports::ReportService;
pub use templates::TemplateService;
pub use users::UserService;
