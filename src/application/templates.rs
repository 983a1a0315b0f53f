//! Template service: reusable instruction drafts owned by providers.

use std::sync::Arc;

use super::authz::{db, require, validated};
use super::InstructionService;
use crate::adapters::StorageError;
use crate::domain::{Action, Caller, CareInstruction, NewTemplate, Role, Template, TemplateUpdate};
use crate::ports::{ContentCipher, Storage};
use crate::{ClearCareError, Result};

pub struct TemplateService<S, C>
where
    S: Storage,
    C: ContentCipher,
{
    storage: Arc<S>,
    instructions: InstructionService<S, C>,
}

impl<S, C> TemplateService<S, C>
where
    S: Storage,
    S::Error: Into<StorageError>,
    C: ContentCipher,
{
    pub fn new(storage: Arc<S>, cipher: Arc<C>) -> Self {
        let instructions = InstructionService::new(Arc::clone(&storage), cipher);
        Self { storage, instructions }
    }

    /// # Errors
    /// `Forbidden` for anyone but a provider, `Validation` for bad input.
    pub fn create(&self, caller: &Caller, input: NewTemplate) -> Result<Template> {
        require(caller, Action::ManageTemplates)?;
        if caller.role != Role::Provider {
            return Err(ClearCareError::forbidden("only providers author templates"));
        }
        validated(input.validate())?;
        let template = Template::new(caller.user_id.clone(), input);
        self.storage.save_template(&template).map_err(db)?;
        tracing::info!(instruction_type = %template.instruction_type, "Created template");
        Ok(template)
    }

    /// The caller's templates; every template for administrators.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn list(&self, caller: &Caller) -> Result<Vec<Template>> {
        require(caller, Action::ManageTemplates)?;
        let owner = (!caller.is_admin()).then_some(caller.user_id.as_str());
        self.storage.list_templates(owner).map_err(db)
    }

    /// # Errors
    /// `NotFound` for an unknown template, `Forbidden` for another provider's.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<Template> {
        require(caller, Action::ManageTemplates)?;
        let template = self.load(id)?;
        if !caller.is_admin() && template.provider_id != caller.user_id {
            return Err(ClearCareError::forbidden("template belongs to another provider"));
        }
        Ok(template)
    }

    /// # Errors
    /// `Forbidden` unless the caller owns the template, `Validation` for bad input.
    pub fn update(&self, caller: &Caller, id: &str, update: TemplateUpdate) -> Result<Template> {
        require(caller, Action::ManageTemplates)?;
        let mut template = self.load(id)?;
        if template.provider_id != caller.user_id {
            return Err(ClearCareError::forbidden("only the owner may edit a template"));
        }
        validated(update.validate_for(&template))?;
        template.apply(&update);
        self.storage.save_template(&template).map_err(db)?;
        tracing::info!("Updated template");
        Ok(template)
    }

    /// # Errors
    /// Same as [`TemplateService::get`].
    pub fn delete(&self, caller: &Caller, id: &str) -> Result<()> {
        let template = self.get(caller, id)?;
        self.storage.delete_template(&template.id).map_err(db)?;
        tracing::info!("Deleted template");
        Ok(())
    }

    /// Issue an instruction to `patient_id` from a template.
    ///
    /// Goes through [`InstructionService::create`], so the caller must be a
    /// provider assigned to the patient.
    ///
    /// # Errors
    /// The errors of [`TemplateService::get`] and [`InstructionService::create`].
    pub fn instantiate(
        &self,
        caller: &Caller,
        template_id: &str,
        patient_id: &str,
        title: Option<String>,
    ) -> Result<CareInstruction> {
        let template = self.get(caller, template_id)?;
        self.instructions.create(caller, template.instantiate(patient_id, title))
    }

    fn load(&self, id: &str) -> Result<Template> {
        self.storage
            .get_template(id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Template", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::World;
    use crate::domain::{InstructionDetails, InstructionType, Priority};

    fn walking_template() -> NewTemplate {
        NewTemplate {
            name: "Daily walk".into(),
            description: Some("Post-op mobility".into()),
            instruction_type: InstructionType::Lifestyle,
            priority: Priority::Medium,
            content: "Walk 20 minutes every afternoon".into(),
            details: Some(InstructionDetails::Lifestyle {
                category: "exercise".into(),
                goal: "20 minutes".into(),
                frequency: Some("daily".into()),
                duration: None,
            }),
        }
    }

    #[test]
    fn providers_own_their_templates() {
        let w = World::new();
        let svc = w.templates();
        let template = svc.create(&w.provider, walking_template()).unwrap();

        assert!(matches!(
            svc.create(&w.admin, walking_template()),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.create(&w.patient, walking_template()),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.get(&w.other_provider, &template.id),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.update(&w.admin, &template.id, TemplateUpdate::default()),
            Err(ClearCareError::Forbidden(_))
        ));
        assert_eq!(svc.get(&w.admin, &template.id).unwrap().name, "Daily walk");

        assert_eq!(svc.list(&w.provider).unwrap().len(), 1);
        assert!(svc.list(&w.other_provider).unwrap().is_empty());
        assert_eq!(svc.list(&w.admin).unwrap().len(), 1);
    }

    #[test]
    fn update_checks_details_type() {
        let w = World::new();
        let svc = w.templates();
        let template = svc.create(&w.provider, walking_template()).unwrap();
        let bad = TemplateUpdate {
            details: Some(InstructionDetails::Warning {
                severity: "high".into(),
                symptoms: vec![],
                action_required: "call".into(),
            }),
            ..Default::default()
        };
        assert!(matches!(
            svc.update(&w.provider, &template.id, bad),
            Err(ClearCareError::Validation(_))
        ));
        let renamed = svc
            .update(
                &w.provider,
                &template.id,
                TemplateUpdate {
                    name: Some("Evening walk".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Evening walk");
    }

    #[test]
    fn instantiate_goes_through_instruction_authorization() {
        let w = World::new();
        let svc = w.templates();
        let template = svc.create(&w.provider, walking_template()).unwrap();

        let instruction = svc
            .instantiate(&w.provider, &template.id, &w.patient_record.id, None)
            .unwrap();
        assert_eq!(instruction.title, "Daily walk");
        assert_eq!(instruction.instruction_type, InstructionType::Lifestyle);
        assert_eq!(
            w.instructions().get(&w.patient, &instruction.id).unwrap().content,
            "Walk 20 minutes every afternoon"
        );

        assert!(matches!(
            svc.instantiate(&w.provider, &template.id, &w.other_record.id, Some("x".into())),
            Err(ClearCareError::Forbidden(_))
        ));
    }

    #[test]
    fn admin_can_delete_any_template() {
        let w = World::new();
        let svc = w.templates();
        let template = svc.create(&w.provider, walking_template()).unwrap();
        assert!(matches!(
            svc.delete(&w.other_provider, &template.id),
            Err(ClearCareError::Forbidden(_))
        ));
        svc.delete(&w.admin, &template.id).unwrap();
        assert!(matches!(
            svc.get(&w.provider, &template.id),
            Err(ClearCareError::NotFound(_))
        ));
    }
}
