//! Report service: generates and keeps compliance summaries.

use std::sync::Arc;

use super::authz::{authorize, db, load_patient, require};
use crate::adapters::StorageError;
use crate::domain::{Action, Caller, InstructionQuery, Patient, Report, ReportRequest};
use crate::ports::Storage;
use crate::{ClearCareError, Result};

pub struct ReportService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> ReportService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Summarize the caller's patients over a date window and keep the result.
    ///
    /// Providers report on their assigned patients, administrators on all.
    ///
    /// # Errors
    /// `BadRequest` for an inverted window, `NotFound`/`Forbidden` for a
    /// patient filter outside the caller's reach.
    pub fn generate(&self, caller: &Caller, request: ReportRequest) -> Result<Report> {
        require(caller, Action::GenerateReports)?;
        request
            .validate()
            .map_err(|errors| ClearCareError::bad_request(errors.join("; ")))?;

        let patients = match &request.patient_id {
            Some(id) => {
                let patient = load_patient(self.storage.as_ref(), id)?;
                authorize(caller, &patient)?;
                vec![patient]
            }
            None => self.scoped_patients(caller)?,
        };
        let ids: Vec<String> = patients.iter().map(|p| p.id.clone()).collect();
        let instructions = self
            .storage
            .list_instructions(&InstructionQuery::default(), Some(&ids))
            .map_err(db)?;
        let records = self.storage.list_compliance(Some(&ids)).map_err(db)?;

        let report = Report::generate(&request, caller.user_id.clone(), &patients, &instructions, &records);
        self.storage.save_report(&report).map_err(db)?;
        tracing::info!(
            report_type = %report.report_type,
            patients = report.summary.total_patients,
            "Generated report"
        );
        Ok(report)
    }

    /// The caller's reports, newest first; every report for administrators.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn list(&self, caller: &Caller) -> Result<Vec<Report>> {
        require(caller, Action::GenerateReports)?;
        let owner = (!caller.is_admin()).then_some(caller.user_id.as_str());
        self.storage.list_reports(owner).map_err(db)
    }

    /// # Errors
    /// `NotFound` for an unknown report, `Forbidden` for another user's.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<Report> {
        require(caller, Action::GenerateReports)?;
        let report = self
            .storage
            .get_report(id)
            .map_err(db)?
            .ok_or_else(|| ClearCareError::not_found("Report", id))?;
        if !caller.is_admin() && report.generated_by != caller.user_id {
            return Err(ClearCareError::forbidden("report belongs to another user"));
        }
        Ok(report)
    }

    fn scoped_patients(&self, caller: &Caller) -> Result<Vec<Patient>> {
        let provider = (!caller.is_admin()).then_some(caller.user_id.as_str());
        self.storage.list_patients(provider).map_err(db)
    }
}
