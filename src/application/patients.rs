//! Patient service: demographics and provider assignment.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::authz::{authorize, db, load_patient, record_history, require, validated};
use crate::adapters::StorageError;
use crate::domain::{
    policy_for, Action, AuditEntity, Caller, HistoryAction, NewPatient, Patient, PatientUpdate,
    Role,
};
use crate::ports::Storage;
use crate::{ClearCareError, Result};

/// Role-scoped access to patient records.
pub struct PatientService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> PatientService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create the patient record for an existing patient-role user.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, `Validation` for bad input and
    /// `BadRequest` when the user is unknown, is not a patient, already has a
    /// record, or an assigned id is not a provider.
    pub fn create(&self, caller: &Caller, input: NewPatient) -> Result<Patient> {
        require(caller, Action::CreatePatient)?;
        validated(input.validate())?;

        match self.storage.get_user(&input.user_id).map_err(db)? {
            Some(user) if !user.is_deleted() && user.role == Role::Patient => {}
            Some(_) => {
                return Err(ClearCareError::bad_request(
                    "patient records can only belong to patient users",
                ))
            }
            None => return Err(ClearCareError::bad_request("user does not exist")),
        }
        if self
            .storage
            .find_patient_by_user(&input.user_id)
            .map_err(db)?
            .is_some()
        {
            return Err(ClearCareError::bad_request("user already has a patient record"));
        }
        self.check_providers(&input.assigned_provider_ids)?;

        let patient = Patient::new(input);
        self.storage.save_patient(&patient).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Patient,
            &patient.id,
            HistoryAction::Created,
            None,
            Some(&patient),
        )?;
        tracing::info!(providers = patient.assigned_provider_ids.len(), "Created patient record");
        Ok(patient)
    }

    /// # Errors
    /// `NotFound` for an unknown patient, `Forbidden` outside the caller's scope.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<Patient> {
        require(caller, Action::ReadPatient)?;
        let patient = load_patient(self.storage.as_ref(), id)?;
        authorize(caller, &patient)?;
        Ok(patient)
    }

    /// The caller's own patient record.
    ///
    /// # Errors
    /// `NotFound` when the caller has none.
    pub fn get_own(&self, caller: &Caller) -> Result<Patient> {
        self.storage
            .find_patient_by_user(&caller.user_id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Patient record for user", &caller.user_id))
    }

    /// Patients visible to the caller.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn list(&self, caller: &Caller) -> Result<Vec<Patient>> {
        require(caller, Action::ReadPatient)?;
        if policy_for(caller.role).unrestricted() {
            return self.storage.list_patients(None).map_err(db);
        }
        match caller.role {
            Role::Patient => Ok(self
                .storage
                .find_patient_by_user(&caller.user_id)
                .map_err(db)?
                .into_iter()
                .collect()),
            _ => self
                .storage
                .list_patients(Some(caller.user_id.as_str()))
                .map_err(db),
        }
    }

    /// Update demographics. Replacing the provider set is administrator-only.
    ///
    /// # Errors
    /// `Forbidden` outside the caller's scope or when a non-administrator
    /// touches the provider set, `Validation` for bad input.
    pub fn update(&self, caller: &Caller, id: &str, update: PatientUpdate) -> Result<Patient> {
        require(caller, Action::UpdatePatient)?;
        validated(update.validate())?;
        let mut patient = load_patient(self.storage.as_ref(), id)?;
        authorize(caller, &patient)?;
        if let Some(ids) = &update.assigned_provider_ids {
            require(caller, Action::AssignProviders)?;
            self.check_providers(ids)?;
        }

        let old = patient.clone();
        patient.apply(&update);
        self.storage.save_patient(&patient).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Patient,
            &patient.id,
            HistoryAction::Updated,
            Some(&old),
            Some(&patient),
        )?;
        tracing::info!("Updated patient record");
        Ok(patient)
    }

    /// Add a provider to the patient's care team. Idempotent.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, `NotFound` for an unknown patient
    /// and `BadRequest` when `provider_id` is not a provider.
    pub fn assign_provider(&self, caller: &Caller, patient_id: &str, provider_id: &str) -> Result<Patient> {
        self.change_assignment(caller, patient_id, provider_id, true)
    }

    /// Remove a provider from the patient's care team. Idempotent.
    ///
    /// # Errors
    /// Same as [`PatientService::assign_provider`].
    pub fn unassign_provider(&self, caller: &Caller, patient_id: &str, provider_id: &str) -> Result<Patient> {
        self.change_assignment(caller, patient_id, provider_id, false)
    }

    fn change_assignment(
        &self,
        caller: &Caller,
        patient_id: &str,
        provider_id: &str,
        assign: bool,
    ) -> Result<Patient> {
        require(caller, Action::AssignProviders)?;
        let mut patient = load_patient(self.storage.as_ref(), patient_id)?;
        if assign {
            self.check_providers(&BTreeSet::from([provider_id.to_string()]))?;
        }

        let before = patient.assigned_provider_ids.clone();
        let changed = if assign {
            patient.assigned_provider_ids.insert(provider_id.to_string())
        } else {
            patient.assigned_provider_ids.remove(provider_id)
        };
        if !changed {
            return Ok(patient);
        }

        patient.updated_at = chrono::Utc::now();
        self.storage.save_patient(&patient).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Patient,
            &patient.id,
            HistoryAction::ProvidersAssigned,
            Some(&before),
            Some(&patient.assigned_provider_ids),
        )?;
        tracing::info!(assign, providers = patient.assigned_provider_ids.len(), "Changed provider assignment");
        Ok(patient)
    }

    fn check_providers(&self, ids: &BTreeSet<String>) -> Result<()> {
        for id in ids {
            let is_provider = self
                .storage
                .get_user(id)
                .map_err(db)?
                .is_some_and(|u| !u.is_deleted() && u.role == Role::Provider);
            if !is_provider {
                return Err(ClearCareError::bad_request(format!(
                    "assigned id {id} is not a provider"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::World;
    use crate::domain::{AuditFilter, NewUser};

    fn new_patient_user(w: &World, email: &str) -> String {
        let user = crate::domain::User::new(NewUser {
            email: email.into(),
            name: "New Patient".into(),
            role: Role::Patient,
            permissions: Vec::new(),
        });
        w.storage.save_user(&user).unwrap();
        user.id
    }

    fn new_patient(user_id: String) -> NewPatient {
        NewPatient {
            user_id,
            first_name: "Nadia".into(),
            last_name: "Okafor".into(),
            ..Default::default()
        }
    }

    #[test]
    fn only_admin_creates_and_user_must_be_patient() {
        let w = World::new();
        let svc = w.patients();
        let user_id = new_patient_user(&w, "nadia@example.org");

        assert!(matches!(
            svc.create(&w.provider, new_patient(user_id.clone())),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.create(&w.admin, new_patient(w.provider.user_id.clone())),
            Err(ClearCareError::BadRequest(_))
        ));
        assert!(matches!(
            svc.create(&w.admin, new_patient("ghost".into())),
            Err(ClearCareError::BadRequest(_))
        ));

        let created = svc.create(&w.admin, new_patient(user_id.clone())).unwrap();
        assert_eq!(created.full_name(), "Nadia Okafor");
        assert!(matches!(
            svc.create(&w.admin, new_patient(user_id)),
            Err(ClearCareError::BadRequest(_))
        ));
    }

    #[test]
    fn assigned_ids_must_be_providers() {
        let w = World::new();
        let user_id = new_patient_user(&w, "p2@example.org");
        let mut input = new_patient(user_id);
        input.assigned_provider_ids = BTreeSet::from([w.patient.user_id.clone()]);
        assert!(matches!(
            w.patients().create(&w.admin, input),
            Err(ClearCareError::BadRequest(_))
        ));
    }

    #[test]
    fn reads_are_scoped() {
        let w = World::new();
        let svc = w.patients();
        assert_eq!(svc.get(&w.patient, &w.patient_record.id).unwrap().id, w.patient_record.id);
        assert!(matches!(
            svc.get(&w.patient, &w.other_record.id),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.get(&w.provider, &w.other_record.id),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(svc.get(&w.admin, "missing"), Err(ClearCareError::NotFound(_))));

        assert_eq!(svc.list(&w.patient).unwrap().len(), 1);
        assert_eq!(svc.list(&w.provider).unwrap().len(), 1);
        assert_eq!(svc.list(&w.admin).unwrap().len(), 2);
        assert!(svc.list(&w.unlinked_patient).unwrap().is_empty());

        assert_eq!(svc.get_own(&w.patient).unwrap().id, w.patient_record.id);
        assert!(matches!(svc.get_own(&w.unlinked_patient), Err(ClearCareError::NotFound(_))));
    }

    #[test]
    fn patient_updates_demographics_but_not_providers() {
        let w = World::new();
        let svc = w.patients();
        let updated = svc
            .update(
                &w.patient,
                &w.patient_record.id,
                PatientUpdate {
                    phone: Some("+1 555 010 2000".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.phone.as_deref(), Some("+1 555 010 2000"));

        assert!(matches!(
            svc.update(
                &w.patient,
                &w.patient_record.id,
                PatientUpdate {
                    assigned_provider_ids: Some(BTreeSet::new()),
                    ..Default::default()
                },
            ),
            Err(ClearCareError::Forbidden(_))
        ));
    }

    #[test]
    fn assignment_grants_access_and_is_audited() {
        let w = World::new();
        let svc = w.patients();
        assert!(svc.get(&w.other_provider, &w.patient_record.id).is_err());

        svc.assign_provider(&w.admin, &w.patient_record.id, &w.other_provider.user_id)
            .unwrap();
        assert!(svc.get(&w.other_provider, &w.patient_record.id).is_ok());

        // Second assignment is a no-op and writes no history.
        svc.assign_provider(&w.admin, &w.patient_record.id, &w.other_provider.user_id)
            .unwrap();
        let mut filter = AuditFilter::for_entity(AuditEntity::Patient, &w.patient_record.id);
        filter.action = Some(HistoryAction::ProvidersAssigned);
        assert_eq!(w.storage.query_history(&filter).unwrap().total_count, 1);

        svc.unassign_provider(&w.admin, &w.patient_record.id, &w.other_provider.user_id)
            .unwrap();
        assert!(matches!(
            svc.get(&w.other_provider, &w.patient_record.id),
            Err(ClearCareError::Forbidden(_))
        ));

        assert!(matches!(
            svc.assign_provider(&w.provider, &w.patient_record.id, &w.other_provider.user_id),
            Err(ClearCareError::Forbidden(_))
        ));
    }
}
