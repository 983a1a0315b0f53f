//! Shared authorization and bookkeeping steps for the services.
//!
//! Every service resolves the owning patient first (missing → `NotFound`),
//! then asks the caller's policy (mismatch → `Forbidden`).

use serde::Serialize;

use crate::adapters::StorageError;
use crate::domain::{
    policy_for, Action, AuditEntity, Caller, HistoryAction, HistoryEntry, Patient, Role,
};
use crate::ports::Storage;
use crate::{ClearCareError, Result};

/// Lift a port error into the crate error.
pub(crate) fn db<E: Into<StorageError>>(e: E) -> ClearCareError {
    ClearCareError::Storage(e.into())
}

/// Fail unless the caller's role may attempt `action` at all.
pub(crate) fn require(caller: &Caller, action: Action) -> Result<()> {
    if policy_for(caller.role).permits(action) {
        Ok(())
    } else {
        Err(ClearCareError::forbidden(format!(
            "role {} may not {action:?}",
            caller.role
        )))
    }
}

/// Fail unless the caller may act on `patient`'s data.
pub(crate) fn authorize(caller: &Caller, patient: &Patient) -> Result<()> {
    if policy_for(caller.role).can_access(&caller.user_id, patient) {
        Ok(())
    } else {
        Err(ClearCareError::forbidden("patient is outside the caller's scope"))
    }
}

pub(crate) fn load_patient<S>(storage: &S, patient_id: &str) -> Result<Patient>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    storage
        .get_patient(patient_id)
        .map_err(db)?
        .ok_or_else(|| ClearCareError::not_found("Patient", patient_id))
}

/// Patient ids whose data the caller may see; `None` means unrestricted.
///
/// A patient caller without a patient record gets an empty scope.
pub(crate) fn visible_patient_ids<S>(storage: &S, caller: &Caller) -> Result<Option<Vec<String>>>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    if policy_for(caller.role).unrestricted() {
        return Ok(None);
    }
    let ids = match caller.role {
        Role::Patient => storage
            .find_patient_by_user(&caller.user_id)
            .map_err(db)?
            .map(|p| vec![p.id])
            .unwrap_or_default(),
        _ => storage
            .list_patients(Some(caller.user_id.as_str()))
            .map_err(db)?
            .into_iter()
            .map(|p| p.id)
            .collect(),
    };
    Ok(Some(ids))
}

/// Append a history entry with JSON snapshots of the before/after states.
pub(crate) fn record_history<S, T>(
    storage: &S,
    caller: &Caller,
    entity: AuditEntity,
    entity_id: &str,
    action: HistoryAction,
    old: Option<&T>,
    new: Option<&T>,
) -> Result<()>
where
    S: Storage,
    S::Error: Into<StorageError>,
    T: Serialize,
{
    let old_value = old.map(serde_json::to_value).transpose()?;
    let new_value = new.map(serde_json::to_value).transpose()?;
    let entry = HistoryEntry::record(caller, entity, entity_id, action, old_value, new_value);
    storage.append_history(&entry).map_err(db)
}

/// Turn a validation result into the crate error.
pub(crate) fn validated(result: std::result::Result<(), Vec<String>>) -> Result<()> {
    result.map_err(ClearCareError::Validation)
}
