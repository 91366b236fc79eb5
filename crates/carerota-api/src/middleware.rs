//! ---
//! rota_section: "05-networking-external-interfaces"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Request authentication middleware and HTTP surface."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Per-request authentication and authorization layers.
//!
//! The authentication layer re-derives identity and role from the identity
//! provider and profile store on every request. It holds no mutable state and
//! never reads role claims from request headers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use carerota_logging::{log_auth_event, AuthEventOutcome, LogContext};
use carerota_security::{
    has_role, rbac::role_grants, CredentialVerifier, Permission, ProfileResolver, Role,
    SecurityMetrics,
};
use tracing::debug;
use uuid::Uuid;

use crate::context::{AuthRejection, RequestContext};

/// Collaborators used by [`authenticate`].
#[derive(Clone)]
pub struct AuthState {
    verifier: Arc<dyn CredentialVerifier>,
    profiles: Arc<dyn ProfileResolver>,
    metrics: Option<SecurityMetrics>,
}

impl AuthState {
    /// Shared state for [`authenticate`] over the given identity backends.
    pub fn new(verifier: Arc<dyn CredentialVerifier>, profiles: Arc<dyn ProfileResolver>) -> Self {
        Self {
            verifier,
            profiles,
            metrics: None,
        }
    }

    /// Count denials against `metrics`.
    pub fn with_metrics(mut self, metrics: SecurityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the three authentication steps against `headers`.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<RequestContext, AuthRejection> {
        let token = extract_bearer(headers).ok_or(AuthRejection::MissingToken)?;
        if let Some(metrics) = &self.metrics {
            metrics.inc_auth_attempt();
        }
        let outcome = self.resolve_token(token).await;
        if outcome.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.inc_auth_failure();
            }
        }
        outcome
    }

    async fn resolve_token(&self, token: &str) -> Result<RequestContext, AuthRejection> {
        let principal = self.verifier.verify_token(token).await.map_err(|err| {
            debug!(error = %err, "bearer token rejected");
            AuthRejection::InvalidToken
        })?;
        match self.profiles.get_by_principal(&principal).await {
            Ok(Some(record)) if record.is_active => Ok(RequestContext::from(&record)),
            Ok(_) => Err(AuthRejection::UserUnavailable),
            Err(err) => {
                debug!(principal = %principal, error = %err, "profile lookup failed");
                Err(AuthRejection::UserUnavailable)
            }
        }
    }
}

/// Bearer credential from the `Authorization` header, if any.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authentication layer. Attaches a [`RequestContext`] or rejects with 401.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let path = request.uri().path().to_owned();
    match state.resolve(request.headers()).await {
        Ok(context) => {
            debug!(
                request_id = %request_id,
                principal = %context.user_id,
                role = %context.role,
                path = %path,
                "request authenticated"
            );
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(rejection) => {
            let ctx = LogContext::new()
                .with_route(&path)
                .with_request_id(&request_id);
            log_auth_event(
                Some(&ctx),
                "request.authenticate",
                &rejection.to_string(),
                AuthEventOutcome::Denied,
            );
            rejection.into_response()
        }
    }
}

/// State for [`require_role`]: the minimum role, compared by hierarchy.
#[derive(Clone)]
pub struct RoleGate {
    required: Role,
    metrics: Option<SecurityMetrics>,
}

impl RoleGate {
    /// Admit requests whose role is at or above `required`.
    pub fn new(required: Role, metrics: Option<SecurityMetrics>) -> Self {
        Self { required, metrics }
    }
}

/// State for [`require_permission`].
#[derive(Clone)]
pub struct PermissionGate {
    required: Permission,
    metrics: Option<SecurityMetrics>,
}

impl PermissionGate {
    /// Admit requests whose role is granted `required`.
    pub fn new(required: Permission, metrics: Option<SecurityMetrics>) -> Self {
        Self { required, metrics }
    }
}

/// Reject with 403 unless the authenticated role ranks at least
/// `gate.required`. Must sit inside [`authenticate`].
pub async fn require_role(State(gate): State<RoleGate>, request: Request, next: Next) -> Response {
    let context = match request.extensions().get::<RequestContext>() {
        Some(context) => context.clone(),
        None => return AuthRejection::MissingToken.into_response(),
    };
    if !has_role(context.role, gate.required) {
        deny(
            &context,
            request.uri().path(),
            gate.metrics.as_ref(),
            gate.required.as_ref(),
        );
        return AuthRejection::Forbidden.into_response();
    }
    next.run(request).await
}

/// Reject with 403 unless the authenticated role's table grants
/// `gate.required`. Must sit inside [`authenticate`].
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let context = match request.extensions().get::<RequestContext>() {
        Some(context) => context.clone(),
        None => return AuthRejection::MissingToken.into_response(),
    };
    if !role_grants(context.role, gate.required) {
        deny(
            &context,
            request.uri().path(),
            gate.metrics.as_ref(),
            gate.required.as_ref(),
        );
        return AuthRejection::Forbidden.into_response();
    }
    next.run(request).await
}

fn deny(context: &RequestContext, path: &str, metrics: Option<&SecurityMetrics>, required: &str) {
    if let Some(metrics) = metrics {
        metrics.inc_rbac_denial();
    }
    let ctx = LogContext::new()
        .with_principal(context.user_id.as_str())
        .with_role(context.role.as_ref())
        .with_route(path);
    log_auth_event(
        Some(&ctx),
        "request.authorize",
        &format!("requires {required}"),
        AuthEventOutcome::Denied,
    );
}
