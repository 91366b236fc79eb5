//! ---
//! rota_section: "05-networking-external-interfaces"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Request authentication middleware and HTTP surface."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Server tier of the access core: bearer authentication, role and permission
//! gates, and the HTTP surface that hosts them.

pub mod context;
pub mod middleware;
pub mod server;

pub use context::{AuthRejection, AuthenticatedUser, RequestContext};
pub use middleware::{
    authenticate, extract_bearer, require_permission, require_role, AuthState, PermissionGate,
    RoleGate,
};
pub use server::{ApiServerBuilder, ApiServerHandle, SessionResponse};
