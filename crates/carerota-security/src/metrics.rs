//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Prometheus counters for sign-in, request authentication, authorization and
//! guard redirects. Shared by the client and server tiers through one registry.

use std::sync::Arc;

use prometheus::{IntCounter, Registry};

fn registered(registry: &Registry, name: &str, help: &str) -> anyhow::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Access-control counters. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct SecurityMetrics {
    registry: Arc<Registry>,
    attempts: IntCounter,
    failures: IntCounter,
    denials: IntCounter,
    redirects: IntCounter,
}

impl SecurityMetrics {
    /// Fails when the counters are already registered with `registry`.
    pub fn new(registry: Arc<Registry>) -> anyhow::Result<Self> {
        Ok(Self {
            attempts: registered(
                &registry,
                "auth_attempts_total",
                "Sign-in attempts and bearer-token checks",
            )?,
            failures: registered(
                &registry,
                "auth_failures_total",
                "Rejected sign-ins and bearer-token checks",
            )?,
            denials: registered(
                &registry,
                "rbac_denials_total",
                "Requests refused by role or permission checks",
            )?,
            redirects: registered(
                &registry,
                "guard_redirects_total",
                "Route guard redirects issued to the client",
            )?,
            registry,
        })
    }

    /// Registry the counters were registered with.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Count a sign-in attempt.
    pub fn inc_auth_attempt(&self) {
        self.attempts.inc();
    }

    /// Count a sign-in that ended without a resolved user.
    pub fn inc_auth_failure(&self) {
        self.failures.inc();
    }

    /// Count a request refused by a role or permission gate.
    pub fn inc_rbac_denial(&self) {
        self.denials.inc();
    }

    /// Count a route guard redirect.
    pub fn inc_guard_redirect(&self) {
        self.redirects.inc();
    }

    /// `(attempts, failures, denials, redirects)`.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.attempts.get(),
            self.failures.get(),
            self.denials.get(),
            self.redirects.get(),
        )
    }
}
