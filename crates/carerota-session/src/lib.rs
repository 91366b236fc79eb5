//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Client tier of the access core: the session state machine that reconciles
//! provider notifications with profile resolution, the route guard, and the
//! runtime that wires them together.

pub mod guard;
pub mod machine;
pub mod routes;
pub mod runtime;
pub mod view;

pub use guard::{decide, GuardDecision, GuardProps, MountedGuard, Navigator, LOGIN_ROUTE};
pub use machine::{Resolution, SessionStateMachine, SignInResult};
pub use routes::{check_direct_navigation, required_role_for, UNAUTHORIZED_ROUTE};
pub use runtime::ClientRuntime;
pub use view::{AuthView, SessionPhase};
