//! Instruction service: care instructions and their acknowledgments.
//!
//! Content is sealed by the `ContentCipher` before it is saved and opened
//! after it is loaded; callers only ever see plaintext. History snapshots
//! keep the sealed form.

use std::sync::Arc;

use chrono::Utc;

use super::authz::{authorize, db, load_patient, record_history, require, validated, visible_patient_ids};
use crate::adapters::StorageError;
use crate::domain::{
    Acknowledgment, AcknowledgmentType, Action, AuditEntity, AuditFilter, Caller,
    CareInstruction, HistoryAction, HistoryEntry, InstructionQuery, InstructionUpdate,
    NewInstruction,
};
use crate::ports::{ContentCipher, Page, Storage};
use crate::{ClearCareError, Result};

/// Role-scoped access to care instructions.
pub struct InstructionService<S, C>
where
    S: Storage,
    C: ContentCipher,
{
    storage: Arc<S>,
    cipher: Arc<C>,
}

impl<S, C> InstructionService<S, C>
where
    S: Storage,
    S::Error: Into<StorageError>,
    C: ContentCipher,
{
    pub fn new(storage: Arc<S>, cipher: Arc<C>) -> Self {
        Self { storage, cipher }
    }

    /// Issue a new instruction. Only a provider assigned to the patient may.
    ///
    /// # Errors
    /// `Validation` for bad input, `NotFound` for an unknown patient and
    /// `Forbidden` for anyone but an assigned provider.
    pub fn create(&self, caller: &Caller, input: NewInstruction) -> Result<CareInstruction> {
        require(caller, Action::CreateInstruction)?;
        validated(input.validate())?;
        let patient = load_patient(self.storage.as_ref(), &input.patient_id)?;
        authorize(caller, &patient)?;

        let instruction = CareInstruction::new(caller.user_id.clone(), input);
        let sealed = self.seal(&instruction)?;
        self.storage.save_instruction(&sealed).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Instruction,
            &sealed.id,
            HistoryAction::Created,
            None,
            Some(&sealed),
        )?;

        tracing::info!(
            instruction_type = %instruction.instruction_type,
            priority = %instruction.priority,
            "Created care instruction"
        );
        Ok(instruction)
    }

    /// # Errors
    /// `NotFound` for unknown or deleted instructions, `Forbidden` when the
    /// patient is outside the caller's scope.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<CareInstruction> {
        require(caller, Action::ReadInstruction)?;
        let sealed = self.load_authorized(caller, id)?;
        self.open(sealed)
    }

    /// Instructions visible to the caller, newest first.
    ///
    /// # Errors
    /// Returns error if storage or decryption fails.
    pub fn list(&self, caller: &Caller, query: &InstructionQuery) -> Result<Vec<CareInstruction>> {
        require(caller, Action::ReadInstruction)?;
        let scope = visible_patient_ids(self.storage.as_ref(), caller)?;
        let sealed = self
            .storage
            .list_instructions(query, scope.as_deref())
            .map_err(db)?;
        sealed.into_iter().map(|i| self.open(i)).collect()
    }

    /// Apply a partial update and bump the version.
    ///
    /// # Errors
    /// `Validation` when the update does not fit the instruction, plus the
    /// errors of [`InstructionService::get`].
    pub fn update(&self, caller: &Caller, id: &str, update: InstructionUpdate) -> Result<CareInstruction> {
        require(caller, Action::UpdateInstruction)?;
        let before = self.load_authorized(caller, id)?;
        let mut instruction = self.open(before.clone())?;
        validated(update.validate_for(&instruction))?;

        instruction.apply(&update);
        let sealed = self.seal(&instruction)?;
        self.storage.save_instruction(&sealed).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Instruction,
            id,
            HistoryAction::Updated,
            Some(&before),
            Some(&sealed),
        )?;

        tracing::info!(version = instruction.version, "Updated care instruction");
        Ok(instruction)
    }

    /// Soft-delete an instruction.
    ///
    /// # Errors
    /// Same as [`InstructionService::get`].
    pub fn delete(&self, caller: &Caller, id: &str) -> Result<()> {
        require(caller, Action::DeleteInstruction)?;
        let before = self.load_authorized(caller, id)?;

        let mut deleted = before.clone();
        let now = Utc::now();
        deleted.deleted_at = Some(now);
        deleted.updated_at = now;
        self.storage.save_instruction(&deleted).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Instruction,
            id,
            HistoryAction::Deleted,
            Some(&before),
            None,
        )?;

        tracing::info!("Deleted care instruction");
        Ok(())
    }

    /// Record a patient acknowledgment.
    ///
    /// Once receipt, understanding and commitment have all been recorded the
    /// instruction moves from `active` to `acknowledged`.
    ///
    /// # Errors
    /// `NotFound` for unknown or deleted instructions, `Forbidden` unless the
    /// caller is the patient, `BadRequest` when the instruction is completed,
    /// expired or cancelled.
    pub fn acknowledge(
        &self,
        caller: &Caller,
        id: &str,
        acknowledgment_type: AcknowledgmentType,
    ) -> Result<CareInstruction> {
        require(caller, Action::AcknowledgeInstruction)?;
        let mut sealed = self.load_authorized(caller, id)?;
        if !sealed.accepts_acknowledgments() {
            return Err(ClearCareError::bad_request(format!(
                "instruction is {} and cannot be acknowledged",
                sealed.status
            )));
        }

        let ack = Acknowledgment::new(
            &sealed,
            acknowledgment_type,
            caller.ip_address.clone(),
            caller.user_agent.clone(),
        );
        self.storage.save_acknowledgment(&ack).map_err(db)?;

        let held: Vec<AcknowledgmentType> = self
            .storage
            .list_acknowledgments(id)
            .map_err(db)?
            .into_iter()
            .map(|a| a.acknowledgment_type)
            .collect();
        let before = sealed.clone();
        if sealed.apply_acknowledgments(&held, ack.acknowledged_at) {
            self.storage.save_instruction(&sealed).map_err(db)?;
            tracing::info!("Instruction fully acknowledged");
        }
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::Instruction,
            id,
            HistoryAction::Acknowledged,
            Some(&serde_json::json!({ "status": before.status })),
            Some(&serde_json::json!({
                "status": sealed.status,
                "acknowledgmentType": acknowledgment_type,
            })),
        )?;

        self.open(sealed)
    }

    /// Acknowledgments recorded for one instruction, oldest first.
    ///
    /// # Errors
    /// Same as [`InstructionService::get`].
    pub fn list_acknowledgments(&self, caller: &Caller, id: &str) -> Result<Vec<Acknowledgment>> {
        require(caller, Action::ReadInstruction)?;
        self.load_authorized(caller, id)?;
        self.storage.list_acknowledgments(id).map_err(db)
    }

    /// One page of an instruction's change history, newest first.
    ///
    /// # Errors
    /// `Validation` for a page size outside [1, `AuditFilter::MAX_LIMIT`],
    /// plus the errors of [`InstructionService::get`].
    pub fn history(
        &self,
        caller: &Caller,
        id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<HistoryEntry>> {
        require(caller, Action::ReadInstruction)?;
        let filter = AuditFilter {
            offset,
            limit,
            ..AuditFilter::for_entity(AuditEntity::Instruction, id)
        };
        validated(filter.validate())?;
        self.load_authorized(caller, id)?;
        self.storage.query_history(&filter).map_err(db)
    }

    /// Load the sealed instruction and check the caller may act on its patient.
    fn load_authorized(&self, caller: &Caller, id: &str) -> Result<CareInstruction> {
        let instruction = self
            .storage
            .get_instruction(id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Instruction", id))?;
        let patient = load_patient(self.storage.as_ref(), &instruction.patient_id)?;
        authorize(caller, &patient)?;
        Ok(instruction)
    }

    fn seal(&self, instruction: &CareInstruction) -> Result<CareInstruction> {
        let mut sealed = instruction.clone();
        sealed.content = self.cipher.encrypt(&instruction.content)?;
        Ok(sealed)
    }

    fn open(&self, mut instruction: CareInstruction) -> Result<CareInstruction> {
        instruction.content = self.cipher.decrypt(&instruction.content)?;
        Ok(instruction)
    }
}
