//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Role, permission, and identity primitives shared by the client session
//! runtime and the server request middleware. Both tiers evaluate access
//! through this crate so their decisions cannot drift apart.

pub mod error;
pub mod identity;
pub mod metrics;
pub mod navigation;
pub mod rbac;

pub use error::AuthErrorCode;
pub use identity::{
    CredentialVerifier, IdentityError, InMemoryIdentityProvider, IssuedSession, PrincipalId,
    ProfileResolver, SessionEvent, SessionEventKind, SessionNotifications, UserRecord,
};
pub use metrics::SecurityMetrics;
pub use navigation::{
    dashboard_for, dashboard_for_role_name, filter_menu_items, navigation_for,
    navigation_for_role_name, NavItem, NavSection, NavigationConfig,
};
pub use rbac::{has_permission, has_role, permissions_for, Permission, RbacError, Role};
