//! Users, roles and the authenticated caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// The sole axis of authorization.
    pub enum Role {
        Patient => "patient",
        Provider => "provider",
        Administrator => "administrator",
    }
}

/// An account in the system.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub two_factor_enabled: bool,

    /// TOTP seed. Never serialized and never printed.
    #[serde(skip)]
    pub two_factor_secret: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("two_factor_enabled", &self.two_factor_enabled)
            .field("deleted", &self.deleted_at.is_some())
            .finish_non_exhaustive()
    }
}

impl User {
    /// Build a user from registration input.
    #[must_use]
    pub fn new(input: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            email: normalize_email(&input.email),
            name: input.name.trim().to_string(),
            role: input.role,
            permissions: input.permissions,
            two_factor_enabled: false,
            two_factor_secret: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Apply a profile update. Returns `true` when anything changed.
    pub fn apply(&mut self, update: &UserUpdate) -> bool {
        let mut changed = false;
        if let Some(name) = &update.name {
            let name = name.trim();
            if name != self.name {
                self.name = name.to_string();
                changed = true;
            }
        }
        if let Some(email) = &update.email {
            let email = normalize_email(email);
            if email != self.email {
                self.email = email;
                changed = true;
            }
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

/// Registration / creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl NewUser {
    /// Validate registration input.
    ///
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_plausible_email(&self.email) {
            errors.push(format!("Email {:?} is not a valid address", self.email));
        }
        if self.name.trim().is_empty() {
            errors.push("Name must not be empty".to_string());
        }
        if self.permissions.iter().any(|p| p.trim().is_empty()) {
            errors.push("Permissions must not contain empty entries".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Self-service profile changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserUpdate {
    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Some(email) = &self.email {
            if !is_plausible_email(email) {
                errors.push(format!("Email {email:?} is not a valid address"));
            }
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                errors.push("Name must not be empty".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The authenticated principal behind a request.
///
/// Token verification happens outside this crate; services trust these fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach client metadata recorded in audit trails.
    #[must_use]
    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_string_forms() {
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), *role);
        }
        assert!(Role::from_str("doctor").is_err());
        assert_eq!(serde_json::to_string(&Role::Administrator).unwrap(), "\"administrator\"");
    }

    #[test]
    fn new_user_normalizes_email() {
        let user = User::new(NewUser {
            email: "  Jane.Doe@Clinic.org ".into(),
            name: "Jane".into(),
            role: Role::Patient,
            permissions: vec![],
        });
        assert_eq!(user.email, "jane.doe@clinic.org");
        assert!(!user.is_deleted());
    }

    #[test]
    fn validation_rejects_bad_email_and_name() {
        let input = NewUser {
            email: "not-an-email".into(),
            name: "  ".into(),
            role: Role::Provider,
            permissions: vec![],
        };
        let errors = input.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn debug_hides_secret_and_email() {
        let mut user = User::new(NewUser {
            email: "a@b.io".into(),
            name: "A".into(),
            role: Role::Patient,
            permissions: vec![],
        });
        user.two_factor_secret = Some("JBSWY3DPEHPK3PXP".into());
        let out = format!("{user:?}");
        assert!(!out.contains("JBSWY3DPEHPK3PXP"));
        assert!(!out.contains("a@b.io"));
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn apply_reports_changes() {
        let mut user = User::new(NewUser {
            email: "a@b.io".into(),
            name: "A".into(),
            role: Role::Patient,
            permissions: vec![],
        });
        assert!(!user.apply(&UserUpdate { name: Some("A".into()), email: None }));
        assert!(user.apply(&UserUpdate { name: Some("Alice".into()), email: None }));
        assert_eq!(user.name, "Alice");
    }
}
