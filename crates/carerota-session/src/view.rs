//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use std::fmt;

use carerota_security::{Role, UserRecord};
use serde::Serialize;
use strum::{AsRefStr, Display};

/// Authenticated-user view model held by the client runtime.
///
/// Published whole; readers never observe a half-applied update.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthView {
    /// Resolved, active user record. `Some` implies `loading == false`.
    pub user: Option<UserRecord>,
    /// A profile resolution for the current principal is outstanding.
    pub loading: bool,
    /// `initialize()` has run at least once.
    pub initialized: bool,
    /// Bearer credential for the current session.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

impl Default for AuthView {
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
            initialized: false,
            access_token: None,
        }
    }
}

impl fmt::Debug for AuthView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthView")
            .field("user", &self.user)
            .field("loading", &self.loading)
            .field("initialized", &self.initialized)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthView {
    /// Settled view with nobody signed in.
    pub fn anonymous() -> Self {
        Self {
            user: None,
            loading: false,
            initialized: true,
            access_token: None,
        }
    }

    /// Settled view for an active user.
    pub fn authenticated(user: UserRecord, access_token: Option<String>) -> Self {
        Self {
            user: Some(user),
            loading: false,
            initialized: true,
            access_token,
        }
    }

    /// Lifecycle phase derived from the snapshot.
    pub fn phase(&self) -> SessionPhase {
        if !self.initialized {
            SessionPhase::Uninitialized
        } else if self.loading {
            SessionPhase::Loading
        } else if self.user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }

    /// True once no resolution is outstanding.
    pub fn is_settled(&self) -> bool {
        self.initialized && !self.loading
    }

    /// Role of the displayed user.
    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|user| user.role)
    }

    /// Route-gate predicate.
    ///
    /// False while loading and false with no user. A required role must match
    /// the user's role exactly; a `system_admin` does not satisfy a
    /// `facility_admin` requirement here. Use
    /// [`carerota_security::has_role`] where "at least" semantics are wanted.
    pub fn require_auth(&self, required_role: Option<Role>) -> bool {
        if self.loading {
            return false;
        }
        match (&self.user, required_role) {
            (None, _) => false,
            (Some(user), _) if !user.is_active => false,
            (Some(_), None) => true,
            (Some(user), Some(required)) => user.role == required,
        }
    }
}

/// Coarse lifecycle state of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    /// `initialize()` has not run.
    Uninitialized,
    /// Waiting on profile resolution.
    Loading,
    /// Active user resolved.
    Authenticated,
    /// Settled with no user.
    Anonymous,
}
