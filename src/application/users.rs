//! User service: accounts, roles and two-factor settings.

use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use super::authz::{db, record_history, require, validated};
use crate::adapters::StorageError;
use crate::domain::{Action, AuditEntity, Caller, HistoryAction, NewUser, Role, User, UserUpdate};
use crate::ports::Storage;
use crate::{ClearCareError, Result};

pub struct UserService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> UserService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Self-registration. The account always gets the patient role.
    ///
    /// # Errors
    /// `Validation` for bad input, `BadRequest` for a taken email.
    pub fn register(&self, mut input: NewUser) -> Result<User> {
        input.role = Role::Patient;
        input.permissions.clear();
        let user = self.insert(input)?;
        let actor = Caller::new(user.id.clone(), user.role);
        record_history(
            self.storage.as_ref(),
            &actor,
            AuditEntity::User,
            &user.id,
            HistoryAction::Created,
            None,
            Some(&user),
        )?;
        tracing::info!(role = %user.role, "Registered user");
        Ok(user)
    }

    /// Administrator-created account with any role.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, plus the errors of [`UserService::register`].
    pub fn create_user(&self, caller: &Caller, input: NewUser) -> Result<User> {
        require(caller, Action::ManageUsers)?;
        let user = self.insert(input)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::User,
            &user.id,
            HistoryAction::Created,
            None,
            Some(&user),
        )?;
        tracing::info!(role = %user.role, "Created user");
        Ok(user)
    }

    /// Create the first administrator. Refused once any administrator exists.
    ///
    /// # Errors
    /// `BadRequest` when an administrator already exists, plus the errors of
    /// [`UserService::register`].
    pub fn bootstrap_admin(&self, mut input: NewUser) -> Result<User> {
        if !self.storage.list_users(Some(Role::Administrator)).map_err(db)?.is_empty() {
            return Err(ClearCareError::bad_request("an administrator already exists"));
        }
        input.role = Role::Administrator;
        let user = self.insert(input)?;
        let actor = Caller::new(user.id.clone(), user.role);
        record_history(
            self.storage.as_ref(),
            &actor,
            AuditEntity::User,
            &user.id,
            HistoryAction::Created,
            None,
            Some(&user),
        )?;
        tracing::warn!("Bootstrapped administrator account");
        Ok(user)
    }

    /// # Errors
    /// `NotFound` for unknown or deleted users, `Forbidden` when a
    /// non-administrator reads someone else.
    pub fn get(&self, caller: &Caller, id: &str) -> Result<User> {
        self.check_self_or_admin(caller, id)?;
        self.load(id)
    }

    /// # Errors
    /// `Forbidden` for non-administrators.
    pub fn list(&self, caller: &Caller, role: Option<Role>) -> Result<Vec<User>> {
        require(caller, Action::ManageUsers)?;
        self.storage.list_users(role).map_err(db)
    }

    /// Change name or email.
    ///
    /// # Errors
    /// `Validation` for bad input, `BadRequest` for a taken email, plus the
    /// errors of [`UserService::get`].
    pub fn update_profile(&self, caller: &Caller, id: &str, update: UserUpdate) -> Result<User> {
        self.check_self_or_admin(caller, id)?;
        validated(update.validate())?;
        let mut user = self.load(id)?;
        if let Some(email) = &update.email {
            self.ensure_email_free(email, Some(user.id.as_str()))?;
        }

        let old = user.clone();
        if user.apply(&update) {
            self.storage.save_user(&user).map_err(db)?;
            record_history(
                self.storage.as_ref(),
                caller,
                AuditEntity::User,
                &user.id,
                HistoryAction::Updated,
                Some(&old),
                Some(&user),
            )?;
            tracing::info!("Updated user profile");
        }
        Ok(user)
    }

    /// # Errors
    /// `Forbidden` for non-administrators, `NotFound` for an unknown user.
    pub fn change_role(&self, caller: &Caller, id: &str, role: Role) -> Result<User> {
        require(caller, Action::ManageUsers)?;
        let mut user = self.load(id)?;
        if user.role == role {
            return Ok(user);
        }

        let old = user.clone();
        user.role = role;
        user.updated_at = Utc::now();
        self.storage.save_user(&user).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::User,
            &user.id,
            HistoryAction::RoleChanged,
            Some(&old),
            Some(&user),
        )?;
        tracing::info!(from = %old.role, to = %role, "Changed user role");
        Ok(user)
    }

    /// Replace the permission list.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, `Validation` for empty entries.
    pub fn set_permissions(&self, caller: &Caller, id: &str, permissions: Vec<String>) -> Result<User> {
        require(caller, Action::ManageUsers)?;
        if permissions.iter().any(|p| p.trim().is_empty()) {
            return Err(ClearCareError::Validation(vec![
                "Permissions must not contain empty entries".to_string(),
            ]));
        }
        let mut user = self.load(id)?;
        let old = user.clone();
        user.permissions = permissions;
        user.updated_at = Utc::now();
        self.storage.save_user(&user).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::User,
            &user.id,
            HistoryAction::Updated,
            Some(&old),
            Some(&user),
        )?;
        tracing::info!(count = user.permissions.len(), "Set user permissions");
        Ok(user)
    }

    /// Soft-delete an account. Administrators cannot delete themselves.
    ///
    /// # Errors
    /// `Forbidden` for non-administrators, `BadRequest` for self-deletion.
    pub fn delete(&self, caller: &Caller, id: &str) -> Result<()> {
        require(caller, Action::ManageUsers)?;
        if caller.user_id == id {
            return Err(ClearCareError::bad_request("administrators cannot delete themselves"));
        }
        let mut user = self.load(id)?;
        let old = user.clone();
        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        self.storage.save_user(&user).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::User,
            &user.id,
            HistoryAction::Deleted,
            Some(&old),
            Some(&user),
        )?;
        tracing::info!("Deleted user");
        Ok(())
    }

    /// Enable or disable TOTP for the caller's own account.
    ///
    /// # Errors
    /// `Forbidden` for anyone but the account owner, `BadRequest` when
    /// enabling without a secret.
    pub fn configure_two_factor(
        &self,
        caller: &Caller,
        id: &str,
        enabled: bool,
        secret: Option<Zeroizing<String>>,
    ) -> Result<User> {
        if caller.user_id != id {
            return Err(ClearCareError::forbidden("two-factor settings are self-service only"));
        }
        let mut user = self.load(id)?;
        let old = user.clone();
        if enabled {
            let secret = secret
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| ClearCareError::bad_request("a TOTP secret is required"))?;
            user.two_factor_secret = Some(secret.trim().to_string());
        } else {
            user.two_factor_secret = None;
        }
        user.two_factor_enabled = enabled;
        user.updated_at = Utc::now();
        self.storage.save_user(&user).map_err(db)?;
        record_history(
            self.storage.as_ref(),
            caller,
            AuditEntity::User,
            &user.id,
            HistoryAction::Updated,
            Some(&old),
            Some(&user),
        )?;
        tracing::info!(enabled, "Configured two-factor authentication");
        Ok(user)
    }

    fn insert(&self, input: NewUser) -> Result<User> {
        validated(input.validate())?;
        self.ensure_email_free(&input.email, None)?;
        let user = User::new(input);
        self.storage.save_user(&user).map_err(db)?;
        Ok(user)
    }

    fn ensure_email_free(&self, email: &str, owner: Option<&str>) -> Result<()> {
        match self.storage.find_user_by_email(email.trim()).map_err(db)? {
            Some(existing) if Some(existing.id.as_str()) != owner => {
                Err(ClearCareError::bad_request("email is already registered"))
            }
            _ => Ok(()),
        }
    }

    fn check_self_or_admin(&self, caller: &Caller, id: &str) -> Result<()> {
        if caller.is_admin() || caller.user_id == id {
            Ok(())
        } else {
            Err(ClearCareError::forbidden("users may only manage their own account"))
        }
    }

    fn load(&self, id: &str) -> Result<User> {
        self.storage
            .get_user(id)
            .map_err(db)?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| ClearCareError::not_found("User", id))
    }
}
