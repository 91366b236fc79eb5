//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use carerota_security::Role;

use crate::guard::{GuardDecision, LOGIN_ROUTE};
use crate::view::AuthView;

/// Target for direct navigation to a route the user may not open.
pub const UNAUTHORIZED_ROUTE: &str = "/unauthorized";

/// Routes reachable without a session.
pub const PUBLIC_ROUTES: &[&str] = &[LOGIN_ROUTE, UNAUTHORIZED_ROUTE];

const ROLE_PREFIXES: &[(&str, Role)] = &[
    ("/admin", Role::SystemAdmin),
    ("/facility", Role::FacilityAdmin),
    ("/user", Role::User),
];

fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
}

/// Role reserved for `path`, if the path sits under a role-scoped tree.
pub fn required_role_for(path: &str) -> Option<Role> {
    ROLE_PREFIXES
        .iter()
        .find(|(prefix, _)| matches_prefix(path, prefix))
        .map(|(_, role)| *role)
}

/// True when `path` is open to anonymous visitors.
pub fn is_public(path: &str) -> bool {
    PUBLIC_ROUTES.iter().any(|route| matches_prefix(path, route))
}

/// Decision for a typed-in or deep-linked path, outside any mounted guard.
///
/// Unlike [`crate::guard::decide`], a role mismatch lands on
/// [`UNAUTHORIZED_ROUTE`].
pub fn check_direct_navigation(view: &AuthView, path: &str) -> GuardDecision {
    if is_public(path) {
        return GuardDecision::render();
    }
    if !view.is_settled() {
        return GuardDecision::pending();
    }
    if view.user.is_none() {
        return GuardDecision::redirect(LOGIN_ROUTE);
    }
    match required_role_for(path) {
        Some(role) if !view.require_auth(Some(role)) => GuardDecision::redirect(UNAUTHORIZED_ROUTE),
        _ => GuardDecision::render(),
    }
}
