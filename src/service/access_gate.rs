// src/service/access_gate.rs
//! Role-based access gate. Every externally reachable entry point declares an
//! [`AccessPolicy`] and calls [`authorize`] before doing any work.

use tracing::warn;

use crate::domain::error::AnalyticsError;
use crate::domain::model::principal::{Principal, Role};
use crate::telemetry::metrics;

/// Named set of roles allowed through an entry point. An empty role set
/// admits any authenticated principal.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub name: &'static str,
    pub roles: &'static [Role],
}

pub const AUTHENTICATED: AccessPolicy = AccessPolicy { name: "authenticated", roles: &[] };

pub const ANALYTICS_READ: AccessPolicy = AccessPolicy {
    name: "analytics_read",
    roles: &[Role::Admin, Role::SalesManager, Role::SalesRepresentative, Role::Viewer],
};

pub const ANALYTICS_EXPORT: AccessPolicy = AccessPolicy {
    name: "analytics_export",
    roles: &[Role::Admin, Role::SalesManager, Role::SalesRepresentative],
};

pub const AI_INSIGHTS: AccessPolicy = AccessPolicy {
    name: "ai_insights",
    roles: &[Role::Admin, Role::SalesManager],
};

/// Fails closed: a missing or inactive principal is rejected before any role
/// matching happens.
pub fn authorize<'a>(principal: Option<&'a Principal>, policy: &AccessPolicy) -> Result<&'a Principal, AnalyticsError> {
    let principal = match principal {
        Some(p) if p.active => p,
        _ => return Err(AnalyticsError::Unauthenticated),
    };

    if policy.roles.is_empty() || principal.has_any_role(policy.roles) {
        return Ok(principal);
    }

    warn!(user = %principal.username, policy = policy.name, "access denied");
    metrics::incr("access_denied", &[("policy", policy.name)]);
    Err(AnalyticsError::Forbidden {
        required: policy.roles.iter().map(Role::display_name).collect::<Vec<_>>().join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn principal(roles: &[Role]) -> Principal {
        Principal::new(Uuid::new_v4(), "u", "u@example.com", roles.iter().copied())
    }

    #[test]
    fn unauthenticated_fails_before_roles() {
        assert!(matches!(authorize(None, &AUTHENTICATED), Err(AnalyticsError::Unauthenticated)));

        let mut inactive = principal(&[Role::Admin]);
        inactive.deactivate();
        assert!(matches!(authorize(Some(&inactive), &ANALYTICS_READ), Err(AnalyticsError::Unauthenticated)));
    }

    #[test]
    fn viewer_cannot_export() {
        let viewer = principal(&[Role::Viewer]);
        assert!(authorize(Some(&viewer), &ANALYTICS_READ).is_ok());
        match authorize(Some(&viewer), &ANALYTICS_EXPORT) {
            Err(AnalyticsError::Forbidden { required }) => assert!(required.contains("Sales Representative")),
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[test]
    fn empty_policy_admits_any_role() {
        let nobody = principal(&[]);
        assert!(authorize(Some(&nobody), &AUTHENTICATED).is_ok());
        assert!(authorize(Some(&nobody), &ANALYTICS_READ).is_err());

        let rep = principal(&[Role::SalesRepresentative]);
        assert!(authorize(Some(&rep), &AI_INSIGHTS).is_err());
        assert!(authorize(Some(&principal(&[Role::SalesManager])), &AI_INSIGHTS).is_ok());
    }
}
