// src/domain/model/principal.rs
//! Authenticated principals, their roles and the row-visibility scope derived
//! from them.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use uuid::Uuid;

/// Closed set of roles known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Admin")]
    Admin,
    #[serde(rename = "Sales Manager")]
    SalesManager,
    #[serde(rename = "Sales Representative", alias = "Sales Rep")]
    SalesRepresentative,
    #[serde(rename = "Viewer")]
    Viewer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::SalesManager, Role::SalesRepresentative, Role::Viewer];

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::SalesManager => "Sales Manager",
            Role::SalesRepresentative => "Sales Representative",
            Role::Viewer => "Viewer",
        }
    }

    /// Parses a role from its display name; case and separators are ignored,
    /// so `"sales_manager"` and `"Sales Manager"` are the same role.
    pub fn parse(raw: &str) -> Option<Role> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(|c| c.to_lowercase())
            .collect();
        match normalized.as_str() {
            "admin" => Some(Role::Admin),
            "salesmanager" => Some(Role::SalesManager),
            "salesrepresentative" | "salesrep" => Some(Role::SalesRepresentative),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Roles whose holders see every owner's rows.
    pub fn sees_all_rows(&self) -> bool {
        matches!(self, Role::Admin | Role::SalesManager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub active: bool,
}

impl Principal {
    pub fn new(id: Uuid, username: impl Into<String>, email: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
            roles: roles.into_iter().collect(),
            active: true,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// True when the role set intersects `required`.
    pub fn has_any_role(&self, required: &[Role]) -> bool {
        required.iter().any(|r| self.roles.contains(r))
    }

    pub fn scope(&self) -> PrincipalScope {
        PrincipalScope::for_principal(self)
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Implicit row filter applied to every aggregation. It is derived from the
/// principal and never from request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "owner_id", rename_all = "snake_case")]
pub enum PrincipalScope {
    All,
    OwnedBy(Uuid),
}

impl PrincipalScope {
    pub fn for_principal(principal: &Principal) -> Self {
        if principal.roles.iter().any(Role::sees_all_rows) {
            PrincipalScope::All
        } else {
            PrincipalScope::OwnedBy(principal.id)
        }
    }

    pub fn owner(&self) -> Option<Uuid> {
        match self {
            PrincipalScope::All => None,
            PrincipalScope::OwnedBy(id) => Some(*id),
        }
    }

    pub fn permits(&self, owner_id: Uuid) -> bool {
        match self {
            PrincipalScope::All => true,
            PrincipalScope::OwnedBy(id) => *id == owner_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_names_and_aliases() {
        assert_eq!(Role::parse("Sales Manager"), Some(Role::SalesManager));
        assert_eq!(Role::parse("sales_rep"), Some(Role::SalesRepresentative));
        assert_eq!(Role::parse(" VIEWER "), Some(Role::Viewer));
        assert_eq!(Role::parse("superuser"), None);

        let role: Role = serde_json::from_str("\"Sales Rep\"").unwrap();
        assert_eq!(role, Role::SalesRepresentative);
        assert_eq!(serde_json::to_string(&Role::SalesManager).unwrap(), "\"Sales Manager\"");
    }

    #[test]
    fn scope_follows_roles() {
        let rep = Principal::new(Uuid::new_v4(), "rep", "rep@example.com", [Role::SalesRepresentative]);
        assert_eq!(rep.scope(), PrincipalScope::OwnedBy(rep.id));
        assert!(rep.scope().permits(rep.id));
        assert!(!rep.scope().permits(Uuid::new_v4()));

        let manager = Principal::new(Uuid::new_v4(), "mgr", "mgr@example.com", [Role::Viewer, Role::SalesManager]);
        assert_eq!(manager.scope(), PrincipalScope::All);
    }
}
