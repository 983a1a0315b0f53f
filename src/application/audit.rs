//! Audit-log queries for administrators.

use std::sync::Arc;

use super::authz::{db, require, validated};
use crate::adapters::StorageError;
use crate::domain::{Action, AuditFilter, Caller, HistoryEntry};
use crate::ports::{Page, Storage};
use crate::Result;

pub struct AuditService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> AuditService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// History entries matching `filter`, newest first.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, `Validation` for a bad window or page size.
    pub fn query(&self, caller: &Caller, filter: &AuditFilter) -> Result<Page<HistoryEntry>> {
        require(caller, Action::ReadAuditLogs)?;
        validated(filter.validate())?;
        let page = self.storage.query_history(filter).map_err(db)?;
        tracing::debug!(returned = page.items.len(), total = page.total_count, "Queried audit log");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::{medication_instruction, World};
    use crate::domain::{AuditEntity, HistoryAction, InstructionUpdate, Priority};
    use crate::ClearCareError;

    #[test]
    fn admin_only() {
        let w = World::new();
        let svc = w.audit();
        assert!(matches!(
            svc.query(&w.provider, &AuditFilter::default()),
            Err(ClearCareError::Forbidden(_))
        ));
        assert!(matches!(
            svc.query(&w.patient, &AuditFilter::default()),
            Err(ClearCareError::Forbidden(_))
        ));
        let bad = AuditFilter {
            limit: AuditFilter::MAX_LIMIT + 1,
            ..AuditFilter::default()
        };
        assert!(matches!(svc.query(&w.admin, &bad), Err(ClearCareError::Validation(_))));
    }

    #[test]
    fn filters_and_paginates() {
        let w = World::new();
        let instructions = w.instructions();
        let created = instructions
            .create(&w.provider, medication_instruction(&w.patient_record.id))
            .unwrap();
        for priority in [Priority::High, Priority::Urgent, Priority::Low] {
            instructions
                .update(
                    &w.provider,
                    &created.id,
                    InstructionUpdate {
                        priority: Some(priority),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let svc = w.audit();
        let filter = AuditFilter {
            entity: Some(AuditEntity::Instruction),
            actor_id: Some(w.provider.user_id.clone()),
            action: Some(HistoryAction::Updated),
            limit: 2,
            ..AuditFilter::default()
        };
        let first = svc.query(&w.admin, &filter).unwrap();
        assert_eq!(first.total_count, 3);
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);
        assert!(first.items[0].created_at >= first.items[1].created_at);

        let second = svc
            .query(
                &w.admin,
                &AuditFilter {
                    offset: first.next_offset().unwrap(),
                    ..filter
                },
            )
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(!second.has_more);
    }
}
