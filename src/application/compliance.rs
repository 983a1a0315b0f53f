//! Compliance service: adherence records and the metrics rollup.

use std::sync::Arc;

use super::authz::{authorize, db, load_patient, require, validated, visible_patient_ids};
use crate::adapters::StorageError;
use crate::domain::{
    compute_metrics, Action, Caller, CareInstruction, ComplianceMetrics, ComplianceRecord,
    ComplianceUpdate, LifestyleCheckIn, MedicationAdherenceUpdate, NewComplianceRecord,
};
use crate::ports::Storage;
use crate::{ClearCareError, Result};

/// Role-scoped access to compliance records.
pub struct ComplianceService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> ComplianceService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Start tracking compliance for an instruction.
    ///
    /// The record type must be the one the instruction tracks, and there may
    /// be only one record per instruction and type.
    ///
    /// # Errors
    /// `NotFound` for an unknown instruction, `Forbidden` outside the
    /// caller's scope, `BadRequest` for duplicates and type mismatches,
    /// `Validation` for a malformed initial payload.
    pub fn create(&self, caller: &Caller, input: NewComplianceRecord) -> Result<ComplianceRecord> {
        require(caller, Action::CreateCompliance)?;
        if let Some(adherence) = &input.adherence {
            validated(adherence.validate())?;
        }
        let instruction = self.load_instruction(caller, &input.instruction_id)?;

        let Some(tracked) = instruction.instruction_type.compliance_type() else {
            return Err(ClearCareError::bad_request(format!(
                "{} instructions do not track compliance",
                instruction.instruction_type
            )));
        };
        if !instruction.compliance_tracking_enabled {
            return Err(ClearCareError::bad_request(
                "compliance tracking is disabled for this instruction",
            ));
        }
        if input.compliance_type != tracked {
            return Err(ClearCareError::bad_request(format!(
                "{} instructions track {} compliance, not {}",
                instruction.instruction_type, tracked, input.compliance_type
            )));
        }
        if matches!(&input.adherence, Some(a) if a.compliance_type() != input.compliance_type) {
            return Err(ClearCareError::bad_request(
                "adherence data does not match the compliance type",
            ));
        }
        if self
            .storage
            .find_compliance(&instruction.id, input.compliance_type)
            .map_err(db)?
            .is_some()
        {
            return Err(ClearCareError::bad_request(format!(
                "a {} compliance record already exists for this instruction",
                input.compliance_type
            )));
        }

        let record = ComplianceRecord::new(
            instruction.id,
            instruction.patient_id,
            input.compliance_type,
            input.adherence,
            caller.user_id.clone(),
        );
        self.storage.save_compliance(&record).map_err(db)?;
        tracing::info!(compliance_type = %record.compliance_type, "Created compliance record");
        Ok(record)
    }

    /// # Errors
    /// `NotFound` for an unknown record or one whose instruction was deleted,
    /// `Forbidden` outside the caller's scope.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<ComplianceRecord> {
        require(caller, Action::ReadCompliance)?;
        self.load_authorized(caller, id)
    }

    /// Records visible to the caller, optionally for one instruction.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn list(&self, caller: &Caller, instruction_id: Option<&str>) -> Result<Vec<ComplianceRecord>> {
        require(caller, Action::ReadCompliance)?;
        let mut records = self.scoped_records(caller)?;
        if let Some(instruction_id) = instruction_id {
            records.retain(|r| r.instruction_id == instruction_id);
        }
        Ok(records)
    }

    /// Overwrite status, percentage or adherence payload directly.
    ///
    /// # Errors
    /// `Validation` for a percentage outside [0, 100] or a malformed payload,
    /// `BadRequest` when the payload is for another compliance type, plus the
    /// errors of [`ComplianceService::get`].
    pub fn update(&self, caller: &Caller, id: &str, update: ComplianceUpdate) -> Result<ComplianceRecord> {
        require(caller, Action::UpdateCompliance)?;
        validated(update.validate())?;
        let mut record = self.load_authorized(caller, id)?;
        if matches!(&update.adherence, Some(a) if a.compliance_type() != record.compliance_type) {
            return Err(ClearCareError::bad_request(
                "adherence data does not match the compliance type",
            ));
        }
        record.apply(&update, &caller.user_id);
        self.storage.save_compliance(&record).map_err(db)?;
        tracing::info!(status = %record.status, "Updated compliance record");
        Ok(record)
    }

    /// Record a dose outcome on a medication record.
    ///
    /// # Errors
    /// `Validation` for a malformed time, `BadRequest` if the record is not a
    /// medication record, plus the errors of [`ComplianceService::get`].
    pub fn update_medication(
        &self,
        caller: &Caller,
        id: &str,
        update: MedicationAdherenceUpdate,
    ) -> Result<ComplianceRecord> {
        require(caller, Action::UpdateCompliance)?;
        validated(update.validate())?;
        let mut record = self.load_authorized(caller, id)?;
        let progress = record
            .record_dose(&update, &caller.user_id)
            .ok_or_else(|| type_mismatch(&record, "medication"))?;
        self.storage.save_compliance(&record).map_err(db)?;
        tracing::info!(progress, status = %record.status, "Recorded medication adherence");
        Ok(record)
    }

    /// Append a check-in to a lifestyle record.
    ///
    /// # Errors
    /// `BadRequest` if the record is not a lifestyle record, plus the errors
    /// of [`ComplianceService::get`].
    pub fn update_lifestyle(
        &self,
        caller: &Caller,
        id: &str,
        check_in: LifestyleCheckIn,
    ) -> Result<ComplianceRecord> {
        require(caller, Action::UpdateCompliance)?;
        validated(check_in.validate())?;
        let mut record = self.load_authorized(caller, id)?;
        let progress = record
            .record_check_in(&check_in, &caller.user_id)
            .ok_or_else(|| type_mismatch(&record, "lifestyle"))?;
        self.storage.save_compliance(&record).map_err(db)?;
        tracing::info!(progress, status = %record.status, "Recorded lifestyle check-in");
        Ok(record)
    }

    /// Aggregate metrics over every record visible to the caller.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn metrics(&self, caller: &Caller) -> Result<ComplianceMetrics> {
        require(caller, Action::ReadCompliance)?;
        let records = self.scoped_records(caller)?;
        let metrics = compute_metrics(&records);
        tracing::debug!(total = metrics.total_records, "Computed compliance metrics");
        Ok(metrics)
    }

    fn scoped_records(&self, caller: &Caller) -> Result<Vec<ComplianceRecord>> {
        let scope = visible_patient_ids(self.storage.as_ref(), caller)?;
        self.storage.list_compliance(scope.as_deref()).map_err(db)
    }

    fn load_instruction(&self, caller: &Caller, id: &str) -> Result<CareInstruction> {
        let instruction = self
            .storage
            .get_instruction(id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Instruction", id))?;
        let patient = load_patient(self.storage.as_ref(), &instruction.patient_id)?;
        authorize(caller, &patient)?;
        Ok(instruction)
    }

    fn load_authorized(&self, caller: &Caller, id: &str) -> Result<ComplianceRecord> {
        let record = self
            .storage
            .get_compliance(id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Compliance record", id))?;
        // A soft-deleted instruction hides its compliance records.
        if self
            .storage
            .get_instruction(&record.instruction_id)
            .map_err(db)?
            .is_none()
        {
            return Err(ClearCareError::not_found("Compliance record", id));
        }
        let patient = load_patient(self.storage.as_ref(), &record.patient_id)?;
        authorize(caller, &patient)?;
        Ok(record)
    }
}

fn type_mismatch(record: &ComplianceRecord, expected: &str) -> ClearCareError {
    ClearCareError::bad_request(format!(
        "record tracks {} compliance, not {expected}",
        record.compliance_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::{lifestyle_instruction, medication_instruction, World};
    use crate::domain::{
        AdherenceData, CheckIn, ComplianceStatus, ComplianceType, DoseStatus, InstructionType,
        ScheduleEntry,
    };
    use chrono::NaiveDate;

    fn dose(day: u32, time: &str, status: DoseStatus) -> MedicationAdherenceUpdate {
        MedicationAdherenceUpdate {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            time: time.into(),
            status,
            reason: None,
            progress: None,
        }
    }

    fn medication_record(w: &World) -> ComplianceRecord {
        let instruction = w
            .instructions()
            .create(&w.provider, medication_instruction(&w.patient_record.id))
            .unwrap();
        w.compliance()
            .create(
                &w.patient,
                NewComplianceRecord {
                    instruction_id: instruction.id,
                    compliance_type: ComplianceType::Medication,
                    adherence: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn medication_progress_follows_taken_ratio() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        assert_eq!(record.status, ComplianceStatus::NotStarted);

        let r = svc.update_medication(&w.patient, &record.id, dose(1, "08:00", DoseStatus::Taken)).unwrap();
        assert_eq!(r.overall_percentage, 100.0);
        assert_eq!(r.status, ComplianceStatus::Compliant);

        let r = svc.update_medication(&w.patient, &record.id, dose(1, "20:00", DoseStatus::Missed)).unwrap();
        assert_eq!(r.overall_percentage, 50.0);
        assert_eq!(r.status, ComplianceStatus::Partial);

        // Same slot again replaces the entry instead of appending.
        let r = svc.update_medication(&w.patient, &record.id, dose(1, "20:00", DoseStatus::Taken)).unwrap();
        assert_eq!(r.overall_percentage, 100.0);
        let AdherenceData::Medication { schedule } = &r.adherence else {
            panic!("medication payload expected");
        };
        assert_eq!(schedule.len(), 2);
        assert_eq!(r.last_updated_by, w.patient.user_id);
    }

    #[test]
    fn explicit_progress_wins_and_range_is_checked() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        let mut update = dose(2, "09:00", DoseStatus::Missed);
        update.progress = Some(85.0);
        let r = svc.update_medication(&w.provider, &record.id, update.clone()).unwrap();
        assert_eq!(r.overall_percentage, 85.0);
        assert_eq!(r.status, ComplianceStatus::Partial);
        assert_eq!(r.last_updated_by, w.provider.user_id);

        update.progress = Some(140.0);
        assert!(matches!(
            svc.update_medication(&w.provider, &record.id, update),
            Err(ClearCareError::Validation(_))
        ));
    }

    #[test]
    fn direct_update_rejects_out_of_range_percentage() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        for bad in [150.0, -20.0] {
            let update = ComplianceUpdate {
                overall_percentage: Some(bad),
                ..Default::default()
            };
            assert!(matches!(
                svc.update(&w.provider, &record.id, update),
                Err(ClearCareError::Validation(_))
            ));
        }
        let stored = svc.get(&w.provider, &record.id).unwrap();
        assert_eq!(stored.overall_percentage, 0.0);
        assert_eq!(stored.status, ComplianceStatus::NotStarted);

        let r = svc
            .update(
                &w.provider,
                &record.id,
                ComplianceUpdate {
                    overall_percentage: Some(60.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(r.overall_percentage, 60.0);
    }

    #[test]
    fn initial_payload_is_validated() {
        let w = World::new();
        let svc = w.compliance();
        let med = w
            .instructions()
            .create(&w.provider, medication_instruction(&w.patient_record.id))
            .unwrap();
        let bad_time = svc.create(
            &w.patient,
            NewComplianceRecord {
                instruction_id: med.id.clone(),
                compliance_type: ComplianceType::Medication,
                adherence: Some(AdherenceData::Medication {
                    schedule: vec![ScheduleEntry {
                        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                        time: "8am".into(),
                        status: DoseStatus::Taken,
                        reason: None,
                    }],
                }),
            },
        );
        assert!(matches!(bad_time, Err(ClearCareError::Validation(_))));

        let lifestyle = w
            .instructions()
            .create(&w.provider, lifestyle_instruction(&w.patient_record.id))
            .unwrap();
        let bad_progress = svc.create(
            &w.patient,
            NewComplianceRecord {
                instruction_id: lifestyle.id,
                compliance_type: ComplianceType::Lifestyle,
                adherence: Some(AdherenceData::Lifestyle {
                    check_ins: vec![CheckIn {
                        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                        completed: true,
                        notes: None,
                        metrics: Default::default(),
                        progress: Some(500.0),
                    }],
                }),
            },
        );
        assert!(matches!(bad_progress, Err(ClearCareError::Validation(_))));
        assert!(svc.list(&w.patient, None).unwrap().is_empty());
    }

    #[test]
    fn record_of_deleted_instruction_is_gone() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        svc.update_medication(&w.patient, &record.id, dose(1, "08:00", DoseStatus::Taken))
            .unwrap();
        w.instructions().delete(&w.provider, &record.instruction_id).unwrap();

        assert!(matches!(
            svc.get(&w.patient, &record.id),
            Err(ClearCareError::NotFound(_))
        ));
        assert!(matches!(
            svc.update_medication(&w.patient, &record.id, dose(2, "08:00", DoseStatus::Taken)),
            Err(ClearCareError::NotFound(_))
        ));
        assert!(matches!(
            svc.update(&w.provider, &record.id, ComplianceUpdate::default()),
            Err(ClearCareError::NotFound(_))
        ));
        assert!(svc.list(&w.patient, None).unwrap().is_empty());
        assert_eq!(svc.metrics(&w.patient).unwrap().total_records, 0);
        assert_eq!(svc.metrics(&w.admin).unwrap().total_records, 0);
    }

    #[test]
    fn duplicate_record_rejected() {
        let w = World::new();
        let record = medication_record(&w);
        let dup = w.compliance().create(
            &w.patient,
            NewComplianceRecord {
                instruction_id: record.instruction_id.clone(),
                compliance_type: ComplianceType::Medication,
                adherence: None,
            },
        );
        assert!(matches!(dup, Err(ClearCareError::BadRequest(_))));
    }

    #[test]
    fn wrong_sub_update_rejected() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        let check_in = LifestyleCheckIn {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            completed: true,
            notes: None,
            metrics: Default::default(),
            progress: None,
        };
        assert!(matches!(
            svc.update_lifestyle(&w.patient, &record.id, check_in),
            Err(ClearCareError::BadRequest(_))
        ));
    }

    #[test]
    fn lifestyle_check_ins_accumulate() {
        let w = World::new();
        let instruction = w
            .instructions()
            .create(&w.provider, lifestyle_instruction(&w.patient_record.id))
            .unwrap();
        let svc = w.compliance();
        let record = svc
            .create(
                &w.patient,
                NewComplianceRecord {
                    instruction_id: instruction.id,
                    compliance_type: ComplianceType::Lifestyle,
                    adherence: None,
                },
            )
            .unwrap();

        for (day, completed) in [(1, true), (2, false), (3, true), (4, true)] {
            svc.update_lifestyle(
                &w.patient,
                &record.id,
                LifestyleCheckIn {
                    date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                    completed,
                    notes: None,
                    metrics: Default::default(),
                    progress: None,
                },
            )
            .unwrap();
        }
        let r = svc.get(&w.provider, &record.id).unwrap();
        assert_eq!(r.overall_percentage, 75.0);
        assert_eq!(r.status, ComplianceStatus::Partial);
    }

    #[test]
    fn warning_and_mismatched_types_rejected() {
        let w = World::new();
        let mut warning = medication_instruction(&w.patient_record.id);
        warning.instruction_type = InstructionType::Warning;
        warning.details = None;
        let warning = w.instructions().create(&w.provider, warning).unwrap();
        let svc = w.compliance();
        assert!(matches!(
            svc.create(
                &w.patient,
                NewComplianceRecord {
                    instruction_id: warning.id,
                    compliance_type: ComplianceType::Medication,
                    adherence: None,
                },
            ),
            Err(ClearCareError::BadRequest(_))
        ));

        let med = w
            .instructions()
            .create(&w.provider, medication_instruction(&w.patient_record.id))
            .unwrap();
        assert!(matches!(
            svc.create(
                &w.patient,
                NewComplianceRecord {
                    instruction_id: med.id,
                    compliance_type: ComplianceType::Lifestyle,
                    adherence: None,
                },
            ),
            Err(ClearCareError::BadRequest(_))
        ));
    }

    #[test]
    fn other_patient_cannot_touch_record() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        assert!(matches!(
            svc.get(&w.other_patient, &record.id),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.update_medication(&w.other_provider, &record.id, dose(1, "08:00", DoseStatus::Taken)),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(svc.list(&w.other_patient, None).unwrap().is_empty());
        assert_eq!(svc.list(&w.patient, Some(&record.instruction_id)).unwrap().len(), 1);
    }

    #[test]
    fn metrics_are_role_scoped() {
        let w = World::new();
        let svc = w.compliance();
        let record = medication_record(&w);
        svc.update_medication(&w.patient, &record.id, dose(1, "08:00", DoseStatus::Taken))
            .unwrap();

        let mine = svc.metrics(&w.patient).unwrap();
        assert_eq!(mine.total_records, 1);
        assert_eq!(mine.overall_compliance, 100);
        assert_eq!(mine.medication_compliance, 100);
        assert_eq!(mine.compliant_count, 1);
        assert_eq!(mine.trend.len(), 1);

        let theirs = svc.metrics(&w.other_patient).unwrap();
        assert_eq!(theirs, ComplianceMetrics::default());
    }
}
