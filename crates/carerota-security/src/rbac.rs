//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Role hierarchy and the per-role permission tables.
//!
//! The hierarchy answers "at least role X" questions only. Permission sets are
//! enumerated per role and are never inherited along the hierarchy: a
//! `system_admin` holds exactly the tokens listed for it, nothing more.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

/// Coarse-grained account category stored on the user record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// Care worker with access to their own shifts and attendance.
    User,
    /// Manager scoped to a single facility.
    FacilityAdmin,
    /// Operator of the whole platform.
    SystemAdmin,
}

impl Role {
    /// Position in the hierarchy, `user(1) < facility_admin(2) < system_admin(3)`.
    pub fn rank(self) -> u8 {
        match self {
            Role::User => 1,
            Role::FacilityAdmin => 2,
            Role::SystemAdmin => 3,
        }
    }

    /// Lowest-privilege role, used wherever an unknown role must fail closed.
    pub const fn lowest() -> Self {
        Role::User
    }
}

/// `resource:action` capability token.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[allow(missing_docs)]
pub enum Permission {
    #[strum(serialize = "facility:read")]
    #[serde(rename = "facility:read")]
    FacilityRead,
    #[strum(serialize = "facility:create")]
    #[serde(rename = "facility:create")]
    FacilityCreate,
    #[strum(serialize = "facility:update")]
    #[serde(rename = "facility:update")]
    FacilityUpdate,
    #[strum(serialize = "facility:delete")]
    #[serde(rename = "facility:delete")]
    FacilityDelete,
    #[strum(serialize = "user:read")]
    #[serde(rename = "user:read")]
    UserRead,
    #[strum(serialize = "user:create")]
    #[serde(rename = "user:create")]
    UserCreate,
    #[strum(serialize = "user:update")]
    #[serde(rename = "user:update")]
    UserUpdate,
    #[strum(serialize = "user:deactivate")]
    #[serde(rename = "user:deactivate")]
    UserDeactivate,
    #[strum(serialize = "shift:read")]
    #[serde(rename = "shift:read")]
    ShiftRead,
    #[strum(serialize = "shift:create")]
    #[serde(rename = "shift:create")]
    ShiftCreate,
    #[strum(serialize = "shift:update")]
    #[serde(rename = "shift:update")]
    ShiftUpdate,
    #[strum(serialize = "shift:delete")]
    #[serde(rename = "shift:delete")]
    ShiftDelete,
    #[strum(serialize = "shift_request:create")]
    #[serde(rename = "shift_request:create")]
    ShiftRequestCreate,
    #[strum(serialize = "shift_request:approve")]
    #[serde(rename = "shift_request:approve")]
    ShiftRequestApprove,
    #[strum(serialize = "attendance:read")]
    #[serde(rename = "attendance:read")]
    AttendanceRead,
    #[strum(serialize = "attendance:record")]
    #[serde(rename = "attendance:record")]
    AttendanceRecord,
    #[strum(serialize = "attendance:update")]
    #[serde(rename = "attendance:update")]
    AttendanceUpdate,
    #[strum(serialize = "export:create")]
    #[serde(rename = "export:create")]
    ExportCreate,
    #[strum(serialize = "report:read")]
    #[serde(rename = "report:read")]
    ReportRead,
    #[strum(serialize = "settings:manage")]
    #[serde(rename = "settings:manage")]
    SettingsManage,
    #[strum(serialize = "audit:read")]
    #[serde(rename = "audit:read")]
    AuditRead,
    #[strum(serialize = "profile:update")]
    #[serde(rename = "profile:update")]
    ProfileUpdate,
}

impl Permission {
    /// Resource half of the token (`shift` for `shift:create`).
    pub fn resource(self) -> &'static str {
        let token: &'static str = self.into();
        token.split_once(':').map(|(r, _)| r).unwrap_or(token)
    }
}

const SYSTEM_ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::FacilityRead,
    Permission::FacilityCreate,
    Permission::FacilityUpdate,
    Permission::FacilityDelete,
    Permission::UserRead,
    Permission::UserCreate,
    Permission::UserUpdate,
    Permission::UserDeactivate,
    Permission::ShiftRead,
    Permission::AttendanceRead,
    Permission::ExportCreate,
    Permission::ReportRead,
    Permission::SettingsManage,
    Permission::AuditRead,
    Permission::ProfileUpdate,
];

const FACILITY_ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::FacilityRead,
    Permission::UserRead,
    Permission::UserCreate,
    Permission::UserUpdate,
    Permission::UserDeactivate,
    Permission::ShiftRead,
    Permission::ShiftCreate,
    Permission::ShiftUpdate,
    Permission::ShiftDelete,
    Permission::ShiftRequestApprove,
    Permission::AttendanceRead,
    Permission::AttendanceUpdate,
    Permission::ExportCreate,
    Permission::ReportRead,
    Permission::ProfileUpdate,
];

const USER_PERMISSIONS: &[Permission] = &[
    Permission::ShiftRead,
    Permission::ShiftRequestCreate,
    Permission::AttendanceRead,
    Permission::AttendanceRecord,
    Permission::ProfileUpdate,
];

fn table(role: Role) -> &'static [Permission] {
    match role {
        Role::SystemAdmin => SYSTEM_ADMIN_PERMISSIONS,
        Role::FacilityAdmin => FACILITY_ADMIN_PERMISSIONS,
        Role::User => USER_PERMISSIONS,
    }
}

/// Errors raised while interpreting untyped role or permission values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RbacError {
    /// Role value not part of the hierarchy.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// Token not defined in any permission table.
    #[error("unknown permission token: {0}")]
    UnknownPermission(String),
}

/// Parse a stored or user-supplied role name.
pub fn parse_role(value: &str) -> Result<Role, RbacError> {
    Role::from_str(value.trim()).map_err(|_| RbacError::UnknownRole(value.to_owned()))
}

/// Parse a `resource:action` token.
pub fn parse_permission(value: &str) -> Result<Permission, RbacError> {
    Permission::from_str(value.trim()).map_err(|_| RbacError::UnknownPermission(value.to_owned()))
}

/// Permission set granted to `role`.
pub fn permissions_for(role: Role) -> HashSet<Permission> {
    table(role).iter().copied().collect()
}

/// Typed permission test.
pub fn role_grants(role: Role, permission: Permission) -> bool {
    table(role).contains(&permission)
}

/// Token permission test; unknown tokens are denied.
pub fn has_permission(role: Role, token: &str) -> bool {
    parse_permission(token)
        .map(|permission| role_grants(role, permission))
        .unwrap_or(false)
}

/// Hierarchy comparison: true when `user_role` ranks at or above `required`.
///
/// This is the "at least" check. Exact-match gating of guarded client routes
/// lives in the session crate and deliberately does not route through here.
pub fn has_role(user_role: Role, required: Role) -> bool {
    user_role.rank() >= required.rank()
}

/// Union of every role's permission set.
pub fn all_permissions() -> HashSet<Permission> {
    Role::iter().flat_map(|role| table(role).iter().copied()).collect()
}

/// Permission tokens defined by the enum but granted to no role.
pub fn unassigned_permissions() -> Vec<Permission> {
    let granted = all_permissions();
    Permission::iter()
        .filter(|permission| !granted.contains(permission))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_gate() {
        assert!(has_role(Role::SystemAdmin, Role::User));
        assert!(has_role(Role::FacilityAdmin, Role::FacilityAdmin));
        assert!(!has_role(Role::User, Role::FacilityAdmin));
        assert!(!has_role(Role::FacilityAdmin, Role::SystemAdmin));
    }

    #[test]
    fn permissions_are_not_inherited_from_hierarchy() {
        assert!(has_permission(Role::FacilityAdmin, "shift:create"));
        assert!(!has_permission(Role::SystemAdmin, "shift:create"));
        assert!(has_permission(Role::User, "attendance:record"));
        assert!(!has_permission(Role::FacilityAdmin, "attendance:record"));
    }

    #[test]
    fn unknown_tokens_deny() {
        assert!(!has_permission(Role::SystemAdmin, "shift:teleport"));
        assert!(!has_permission(Role::SystemAdmin, ""));
        assert_eq!(
            parse_permission("nope"),
            Err(RbacError::UnknownPermission("nope".into()))
        );
    }

    #[test]
    fn every_token_is_granted_somewhere() {
        assert!(unassigned_permissions().is_empty());
    }

    #[test]
    fn tokens_round_trip_through_strings() {
        for permission in Permission::iter() {
            let token = permission.to_string();
            assert!(token.contains(':'), "{token} is not resource:action");
            assert_eq!(parse_permission(&token), Ok(permission));
        }
        assert_eq!(Permission::ShiftRequestApprove.resource(), "shift_request");
    }

    #[test]
    fn role_names_parse() {
        assert_eq!(parse_role("facility_admin"), Ok(Role::FacilityAdmin));
        assert_eq!(Role::SystemAdmin.to_string(), "system_admin");
        assert!(matches!(parse_role("root"), Err(RbacError::UnknownRole(_))));
        let json = serde_json::to_string(&Role::FacilityAdmin).unwrap();
        assert_eq!(json, "\"facility_admin\"");
    }
}
