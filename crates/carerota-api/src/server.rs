//! ---
//! rota_section: "05-networking-external-interfaces"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Request authentication middleware and HTTP surface."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use carerota_security::{
    navigation_for, permissions_for, CredentialVerifier, NavigationConfig, Permission,
    ProfileResolver, Role, SecurityMetrics,
};
use prometheus::{Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::context::AuthenticatedUser;
use crate::middleware::{
    authenticate, require_permission, require_role, AuthState, PermissionGate, RoleGate,
};

/// Body of `GET /api/session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub user_id: String,
    pub role: Role,
    pub facility_id: Option<String>,
    /// Permission tokens granted to the role, sorted.
    pub permissions: Vec<String>,
}

struct ApiState {
    metrics: Option<Arc<Registry>>,
}

/// Builder used to configure and spawn the HTTP server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    verifier: Arc<dyn CredentialVerifier>,
    profiles: Arc<dyn ProfileResolver>,
    metrics: Option<SecurityMetrics>,
}

impl ApiServerBuilder {
    /// Builder bound to `listen`; port 0 picks a free port.
    pub fn new(
        listen: SocketAddr,
        verifier: Arc<dyn CredentialVerifier>,
        profiles: Arc<dyn ProfileResolver>,
    ) -> Self {
        Self {
            listen,
            verifier,
            profiles,
            metrics: None,
        }
    }

    /// Count auth outcomes and expose the registry at `/metrics`.
    pub fn with_metrics(mut self, metrics: SecurityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Assemble the router without binding a socket.
    pub fn router(&self) -> Router {
        let mut auth = AuthState::new(self.verifier.clone(), self.profiles.clone());
        if let Some(metrics) = &self.metrics {
            auth = auth.with_metrics(metrics.clone());
        }

        let admin = Router::new()
            .route("/api/admin/overview", get(admin_overview))
            .route_layer(from_fn_with_state(
                RoleGate::new(Role::SystemAdmin, self.metrics.clone()),
                require_role,
            ));
        let shifts = Router::new()
            .route("/api/shifts/manage", get(manage_shifts))
            .route_layer(from_fn_with_state(
                PermissionGate::new(Permission::ShiftUpdate, self.metrics.clone()),
                require_permission,
            ));
        // authenticate is added last so it wraps the role and permission gates
        let protected = Router::new()
            .route("/api/session", get(session_info))
            .route("/api/navigation", get(navigation))
            .merge(admin)
            .merge(shifts)
            .route_layer(from_fn_with_state(auth, authenticate));

        let state = ApiState {
            metrics: self.metrics.as_ref().map(SecurityMetrics::registry),
        };
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(get_metrics))
            .merge(protected)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(state))
    }

    /// Spawn the server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "api listening");

        let router = self.router();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    /// Address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Response {
    let Some(registry) = &state.metrics else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };

    let encoder = TextEncoder::new();
    let families = registry.gather();
    match encoder.encode_to_string(&families) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn session_info(AuthenticatedUser(context): AuthenticatedUser) -> Json<SessionResponse> {
    let mut permissions: Vec<String> = permissions_for(context.role)
        .into_iter()
        .map(|permission| permission.to_string())
        .collect();
    permissions.sort();
    Json(SessionResponse {
        user_id: context.user_id.to_string(),
        role: context.role,
        facility_id: context.facility_id,
        permissions,
    })
}

async fn navigation(AuthenticatedUser(context): AuthenticatedUser) -> Json<NavigationConfig> {
    Json(navigation_for(context.role).filtered(context.role))
}

async fn admin_overview(AuthenticatedUser(context): AuthenticatedUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "scope": "platform",
        "requested_by": context.user_id,
    }))
}

async fn manage_shifts(AuthenticatedUser(context): AuthenticatedUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "facility_id": context.facility_id,
        "requested_by": context.user_id,
    }))
}
