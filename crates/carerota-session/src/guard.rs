//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Route guard: a pure decision over an [`AuthView`] plus a mounted task that
//! performs the navigation side effect once per decision change.

use std::sync::Arc;

use carerota_logging::{rota_info, LogContext};
use carerota_security::{dashboard_for, Role, SecurityMetrics};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::view::AuthView;

/// Login entry point used when a guard has no explicit `redirect_to`.
pub const LOGIN_ROUTE: &str = "/login";

/// Render-or-redirect decision for one evaluation.
///
/// `allow == false` with no `redirect_to` means the session is still loading
/// and a placeholder should be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    /// Render the guarded children.
    pub allow: bool,
    /// Route to navigate to instead.
    pub redirect_to: Option<String>,
}

impl GuardDecision {
    /// Still loading; no redirect decided yet.
    pub fn pending() -> Self {
        Self {
            allow: false,
            redirect_to: None,
        }
    }

    /// Render the children.
    pub fn render() -> Self {
        Self {
            allow: true,
            redirect_to: None,
        }
    }

    /// Navigate elsewhere.
    pub fn redirect(to: impl Into<String>) -> Self {
        Self {
            allow: false,
            redirect_to: Some(to.into()),
        }
    }

    /// True for the loading placeholder.
    pub fn is_pending(&self) -> bool {
        !self.allow && self.redirect_to.is_none()
    }
}

/// Caller-facing guard options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardProps {
    /// Role the route is reserved for, compared exactly.
    pub required_role: Option<Role>,
    /// Where anonymous visitors are sent; defaults to [`LOGIN_ROUTE`].
    pub redirect_to: Option<String>,
}

impl GuardProps {
    /// Guard that only requires a signed-in user.
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Guard reserved for one role.
    pub fn role(role: Role) -> Self {
        Self {
            required_role: Some(role),
            redirect_to: None,
        }
    }

    /// Override the anonymous redirect target.
    pub fn redirect_to(mut self, to: impl Into<String>) -> Self {
        self.redirect_to = Some(to.into());
        self
    }
}

/// Evaluate the guard for one snapshot.
///
/// A role mismatch sends the user to the dashboard of the role they actually
/// hold, never to the unauthorized page.
pub fn decide(
    view: &AuthView,
    required_role: Option<Role>,
    redirect_to: Option<&str>,
) -> GuardDecision {
    if !view.is_settled() {
        return GuardDecision::pending();
    }
    let Some(user) = &view.user else {
        return GuardDecision::redirect(redirect_to.unwrap_or(LOGIN_ROUTE));
    };
    if required_role.is_some() && !view.require_auth(required_role) {
        return GuardDecision::redirect(dashboard_for(user.role));
    }
    GuardDecision::render()
}

/// Performs client-side navigation.
pub trait Navigator: Send + Sync + 'static {
    /// Replace the current location with `to`.
    fn navigate(&self, to: &str);
}

/// Guard attached to a live session view.
pub struct MountedGuard {
    route: String,
    rendered: watch::Receiver<GuardDecision>,
    unmount: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MountedGuard {
    /// Start re-evaluating `props` on every published view.
    pub fn mount(
        route: impl Into<String>,
        props: GuardProps,
        mut view: watch::Receiver<AuthView>,
        navigator: Arc<dyn Navigator>,
        metrics: Option<SecurityMetrics>,
    ) -> Self {
        let route = route.into();
        let (rendered_tx, rendered) = watch::channel(GuardDecision::pending());
        let (unmount, mut unmounted) = watch::channel(false);
        let task_route = route.clone();
        let task = tokio::spawn(async move {
            let mut last: Option<GuardDecision> = None;
            loop {
                let decision = decide(
                    &view.borrow_and_update(),
                    props.required_role,
                    props.redirect_to.as_deref(),
                );
                if *unmounted.borrow() {
                    break;
                }
                if last.as_ref() != Some(&decision) {
                    if let Some(target) = &decision.redirect_to {
                        let ctx = LogContext::new().with_route(&task_route);
                        rota_info!(context = ctx, "guard redirect to {}", target);
                        if let Some(metrics) = &metrics {
                            metrics.inc_guard_redirect();
                        }
                        navigator.navigate(target);
                    }
                    rendered_tx.send_replace(decision.clone());
                    last = Some(decision);
                }
                tokio::select! {
                    biased;
                    _ = unmounted.changed() => break,
                    changed = view.changed() => {
                        if changed.is_err() {
                            debug!(route = %task_route, "session view closed; guard stopping");
                            break;
                        }
                    }
                }
            }
        });
        Self {
            route,
            rendered,
            unmount,
            task,
        }
    }

    /// Route this guard protects.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Latest decision.
    pub fn current(&self) -> GuardDecision {
        self.rendered.borrow().clone()
    }

    /// Watch decisions as they change.
    pub fn rendered(&self) -> watch::Receiver<GuardDecision> {
        self.rendered.clone()
    }

    /// Wait for the first non-pending decision.
    pub async fn settled(&self) -> GuardDecision {
        let mut rendered = self.rendered.clone();
        let decision = rendered
            .wait_for(|decision| !decision.is_pending())
            .await
            .map(|decision| decision.clone());
        decision.unwrap_or_else(|_| self.current())
    }

    /// Stop the guard. Returns once the task has exited; nothing is navigated
    /// or published afterwards.
    pub async fn unmount(self) {
        self.unmount.send_replace(true);
        if let Err(err) = self.task.await {
            warn!(route = %self.route, error = %err, "guard task terminated abnormally");
        }
    }
}
