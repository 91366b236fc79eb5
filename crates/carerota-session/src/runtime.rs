//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Composition root for the client tier.

use std::sync::Arc;

use carerota_security::{NavigationConfig, SecurityMetrics};
use tracing::info;

use crate::guard::{GuardDecision, GuardProps, MountedGuard, Navigator};
use crate::machine::{SessionStateMachine, SignInResult};
use crate::routes::check_direct_navigation;
use crate::view::AuthView;

/// Owns the session state for one client and hands it to guards and menus.
pub struct ClientRuntime {
    session: Arc<SessionStateMachine>,
    navigator: Arc<dyn Navigator>,
    metrics: Option<SecurityMetrics>,
}

impl ClientRuntime {
    pub fn new(
        session: SessionStateMachine,
        navigator: Arc<dyn Navigator>,
        metrics: Option<SecurityMetrics>,
    ) -> Self {
        let session = match &metrics {
            Some(metrics) => session.with_metrics(metrics.clone()),
            None => session,
        };
        Self {
            session: Arc::new(session),
            navigator,
            metrics,
        }
    }

    /// Initialize the session and wait for the first settled view.
    pub async fn start(&self) -> AuthView {
        self.session.initialize().await;
        let view = self.session.wait_until_settled().await;
        info!(phase = %view.phase(), "client runtime started");
        view
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        info!("client runtime stopped");
    }

    pub fn session(&self) -> &Arc<SessionStateMachine> {
        &self.session
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SignInResult {
        self.session.sign_in(email, password).await
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
    }

    /// Mount a guard for `route` on the live session view.
    pub fn guard(&self, route: impl Into<String>, props: GuardProps) -> MountedGuard {
        MountedGuard::mount(
            route,
            props,
            self.session.subscribe(),
            self.navigator.clone(),
            self.metrics.clone(),
        )
    }

    /// Menu for the signed-in user, filtered for their role. `None` while
    /// loading or signed out.
    pub fn navigation(&self) -> Option<NavigationConfig> {
        let view = self.session.snapshot();
        if view.loading {
            return None;
        }
        view.role()
            .map(|role| carerota_security::navigation_for(role).filtered(role))
    }

    /// Handle a direct navigation to `path`, redirecting when needed.
    pub fn visit(&self, path: &str) -> GuardDecision {
        let decision = check_direct_navigation(&self.session.snapshot(), path);
        if let Some(target) = &decision.redirect_to {
            if let Some(metrics) = &self.metrics {
                metrics.inc_guard_redirect();
            }
            self.navigator.navigate(target);
        }
        decision
    }
}
