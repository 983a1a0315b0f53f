//! Domain layer: Core business types and logic.
//!
//! This module contains pure Rust types with no I/O. Storage and encryption
//! are reached only through the traits in `ports`.

/// Error returned when a stored or user-supplied string does not name a variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed set of string-tagged values (roles, statuses, types).
///
/// The string form is the one used on the wire and in the database.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The canonical string form.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::domain::ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod access;
mod compliance;
pub mod crypto;
mod history;
mod id;
mod instruction;
pub mod kdf;
mod metrics;
mod patient;
mod report;
mod template;
mod user;

pub use access::{can_access, policy_for, AccessPolicy, Action};
pub use compliance::{
    record_entry, AdherenceData, AppointmentAdherence, CheckIn, ComplianceRecord,
    ComplianceStatus, ComplianceType, ComplianceUpdate, DoseStatus, LifestyleCheckIn,
    MedicationAdherenceUpdate, NewComplianceRecord, ScheduleEntry,
};
pub use crypto::{ContentKey, CryptoError, EncryptedContent};
pub use history::{AuditFilter, AuditEntity, HistoryAction, HistoryEntry};
pub use id::new_id;
pub use instruction::{
    Acknowledgment, AcknowledgmentType, CareInstruction, InstructionDetails, InstructionQuery,
    InstructionStatus, InstructionType, InstructionUpdate, NewInstruction, Priority,
};
pub use metrics::{compute_metrics, ComplianceMetrics, TrendPoint, TREND_WINDOW};
pub use patient::{EmergencyContact, NewPatient, Patient, PatientUpdate};
pub use report::{PatientReportRow, Report, ReportRequest, ReportSummary, ReportType};
pub use template::{NewTemplate, Template, TemplateUpdate};
pub use user::{Caller, NewUser, Role, User, UserUpdate};
