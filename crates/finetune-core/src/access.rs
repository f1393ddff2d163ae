//! Project-scoped capability checks.
//!
//! The job service never decides authorization policy itself. It asks an
//! `AccessControl` implementation whether an actor may view or modify a
//! project and refuses the request before touching storage when the answer
//! is no.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The identity a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role an actor holds in a project. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Viewer,
    Member,
    Admin,
}

impl ProjectRole {
    #[must_use]
    pub fn can_view(self) -> bool {
        true
    }

    #[must_use]
    pub fn can_modify(self) -> bool {
        self >= Self::Member
    }
}

/// Capability check consumed by the job service.
pub trait AccessControl: Send + Sync {
    /// Whether `actor` may read jobs of `project_id`.
    fn can_view(&self, actor: &Actor, project_id: &str) -> bool;

    /// Whether `actor` may create, change or delete jobs of `project_id`.
    fn can_modify(&self, actor: &Actor, project_id: &str) -> bool;
}

/// Grants every capability to every actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn can_view(&self, _actor: &Actor, _project_id: &str) -> bool {
        true
    }

    fn can_modify(&self, _actor: &Actor, _project_id: &str) -> bool {
        true
    }
}

/// Fixed table of `(actor, project) -> role` grants.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessControl {
    grants: HashMap<(String, String), ProjectRole>,
}

impl StaticAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a grant. A later grant for the same pair keeps the higher role.
    #[must_use]
    pub fn with_grant(
        mut self,
        actor: impl Into<String>,
        project_id: impl Into<String>,
        role: ProjectRole,
    ) -> Self {
        let key = (actor.into(), project_id.into());
        let current = self.grants.entry(key).or_insert(role);
        if role > *current {
            *current = role;
        }
        self
    }

    /// Role of `actor` in `project_id`, if any.
    pub fn role(&self, actor: &Actor, project_id: &str) -> Option<ProjectRole> {
        self.grants.get(&(actor.0.clone(), project_id.to_string())).copied()
    }
}

impl AccessControl for StaticAccessControl {
    fn can_view(&self, actor: &Actor, project_id: &str) -> bool {
        self.role(actor, project_id).is_some_and(ProjectRole::can_view)
    }

    fn can_modify(&self, actor: &Actor, project_id: &str) -> bool {
        self.role(actor, project_id).is_some_and(ProjectRole::can_modify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_capabilities() {
        let acl = StaticAccessControl::new()
            .with_grant("ann", "p1", ProjectRole::Viewer)
            .with_grant("bob", "p1", ProjectRole::Member)
            .with_grant("cy", "p1", ProjectRole::Admin);

        assert!(acl.can_view(&Actor::new("ann"), "p1"));
        assert!(!acl.can_modify(&Actor::new("ann"), "p1"));
        assert!(acl.can_modify(&Actor::new("bob"), "p1"));
        assert!(acl.can_modify(&Actor::new("cy"), "p1"));
    }

    #[test]
    fn test_grants_are_project_scoped() {
        let acl = StaticAccessControl::new().with_grant("ann", "p1", ProjectRole::Admin);
        assert!(!acl.can_view(&Actor::new("ann"), "p2"));
        assert!(!acl.can_view(&Actor::new("zed"), "p1"));
    }

    #[test]
    fn test_repeated_grant_keeps_highest_role() {
        let acl = StaticAccessControl::new()
            .with_grant("ann", "p1", ProjectRole::Admin)
            .with_grant("ann", "p1", ProjectRole::Viewer);
        assert_eq!(acl.role(&Actor::new("ann"), "p1"), Some(ProjectRole::Admin));
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.can_modify(&Actor::new("anyone"), "anything"));
    }

    #[test]
    fn test_role_deserializes_lowercase() {
        let role: ProjectRole = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, ProjectRole::Member);
    }
}
