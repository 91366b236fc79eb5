//! ---
//! rota_section: "03-logging"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Structured logging context for session and request events."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers shared by the client session runtime and the
//! request middleware. Credentials never pass through these helpers; only
//! principal ids, roles, and routes are recorded.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Identity-provider subject associated with the event.
    pub principal: Option<&'a str>,
    /// Role name resolved for the principal.
    pub role: Option<&'a str>,
    /// Route or request path being evaluated.
    pub route: Option<&'a str>,
    /// Correlation id of the inbound request.
    pub request_id: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a principal id.
    pub fn with_principal(mut self, principal: &'a str) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Attach a role name.
    pub fn with_role(mut self, role: &'a str) -> Self {
        self.role = Some(role);
        self
    }

    /// Attach a route.
    pub fn with_route(mut self, route: &'a str) -> Self {
        self.route = Some(route);
        self
    }

    /// Attach a request correlation id.
    pub fn with_request_id(mut self, request_id: &'a str) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Outcome recorded for an authentication or authorization event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventOutcome {
    /// Access granted or operation completed.
    Granted,
    /// Access denied; expected in normal operation.
    Denied,
    /// Infrastructure failure while evaluating the event.
    Fault,
}

impl AuthEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AuthEventOutcome::Granted => "granted",
            AuthEventOutcome::Denied => "denied",
            AuthEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized auth event. Denials log at `WARN`, faults at `ERROR`.
pub fn log_auth_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: AuthEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                principal = ctx.principal.unwrap_or(""),
                role = ctx.role.unwrap_or(""),
                route = ctx.route.unwrap_or(""),
                request_id = ctx.request_id.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        AuthEventOutcome::Granted => emit!(Level::INFO),
        AuthEventOutcome::Denied => emit!(Level::WARN),
        AuthEventOutcome::Fault => emit!(Level::ERROR),
    }
}
