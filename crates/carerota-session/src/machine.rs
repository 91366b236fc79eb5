//! ---
//! rota_section: "02-session-lifecycle"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Client session state machine, route guard, and runtime."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Session state machine reconciling provider notifications with profile
//! resolution.
//!
//! Every retarget (new principal, sign-out, shutdown) bumps a generation
//! counter. Profile fetches carry the generation they were started under and
//! are dropped on completion when it no longer matches, so the last principal
//! to be announced wins regardless of which fetch completes last.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use carerota_logging::{log_auth_event, rota_debug, rota_info, AuthEventOutcome, LogContext};
use carerota_security::{
    AuthErrorCode, CredentialVerifier, IdentityError, PrincipalId, ProfileResolver,
    SecurityMetrics, SessionEvent, SessionEventKind, SessionNotifications, UserRecord,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::view::AuthView;

/// Outcome of [`SessionStateMachine::sign_in`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignInResult {
    /// Credential verification succeeded.
    pub success: bool,
    /// Active user resolved for the session.
    pub user: Option<UserRecord>,
    /// Code to display when `user` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthErrorCode>,
}

impl SignInResult {
    fn rejected(code: AuthErrorCode) -> Self {
        Self {
            success: false,
            user: None,
            error: Some(code),
        }
    }

    fn verified(user: Option<UserRecord>, error: Option<AuthErrorCode>) -> Self {
        Self {
            success: true,
            user,
            error,
        }
    }

    /// Fixed user-facing message for the error, if any.
    pub fn message(&self) -> Option<&'static str> {
        self.error.map(AuthErrorCode::message)
    }
}

/// Result of one profile resolution after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Active record applied to the view.
    Resolved(UserRecord),
    /// Record exists but is deactivated; view collapsed to anonymous.
    Inactive,
    /// No record for the principal; view collapsed to anonymous.
    NotFound,
    /// Profile store failed; view collapsed to anonymous.
    Failed(IdentityError),
    /// The machine was retargeted while the fetch ran; result dropped.
    Stale,
}

#[derive(Debug, Clone)]
struct Ticket {
    generation: u64,
    principal: PrincipalId,
}

#[derive(Debug, Clone, Copy)]
struct CheckTicket {
    generation: u64,
}

/// Access tokens of sessions ended locally that notifications may still name.
const ENDED_SESSIONS: usize = 8;

#[derive(Debug, Default)]
struct Reconcile {
    generation: u64,
    target: Option<PrincipalId>,
    access_token: Option<String>,
    in_flight: usize,
    resolved: Option<UserRecord>,
    closed: bool,
    ended: VecDeque<String>,
}

impl Reconcile {
    fn fence(&mut self, access_token: String) {
        if self.ended.contains(&access_token) {
            return;
        }
        if self.ended.len() == ENDED_SESSIONS {
            self.ended.pop_front();
        }
        self.ended.push_back(access_token);
    }

    fn is_ended(&self, access_token: Option<&String>) -> bool {
        access_token.is_some_and(|token| self.ended.contains(token))
    }
}

/// Owns the [`AuthView`] for one client runtime.
pub struct SessionStateMachine {
    verifier: Arc<dyn CredentialVerifier>,
    profiles: Arc<dyn ProfileResolver>,
    notifications: Arc<dyn SessionNotifications>,
    view: watch::Sender<AuthView>,
    reconcile: Mutex<Reconcile>,
    started: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    metrics: Option<SecurityMetrics>,
}

impl SessionStateMachine {
    /// Create an uninitialized machine.
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        profiles: Arc<dyn ProfileResolver>,
        notifications: Arc<dyn SessionNotifications>,
    ) -> Self {
        let (view, _) = watch::channel(AuthView::default());
        let (shutdown, _) = watch::channel(false);
        Self {
            verifier,
            profiles,
            notifications,
            view,
            reconcile: Mutex::new(Reconcile::default()),
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
            shutdown,
            metrics: None,
        }
    }

    /// Wire all three collaborators to one provider.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: CredentialVerifier + ProfileResolver + SessionNotifications,
    {
        Self::new(provider.clone(), provider.clone(), provider)
    }

    /// Count sign-in attempts and failures.
    pub fn with_metrics(mut self, metrics: SecurityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current consistent snapshot.
    pub fn snapshot(&self) -> AuthView {
        self.view.borrow().clone()
    }

    /// Watch every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AuthView> {
        self.view.subscribe()
    }

    /// Exact-match route predicate over the current snapshot.
    pub fn require_auth(&self, required_role: Option<carerota_security::Role>) -> bool {
        self.view.borrow().require_auth(required_role)
    }

    /// Wait until no resolution is outstanding and return that snapshot.
    pub async fn wait_until_settled(&self) -> AuthView {
        let mut receiver = self.view.subscribe();
        let settled = receiver
            .wait_for(AuthView::is_settled)
            .await
            .map(|view| view.clone());
        match settled {
            Ok(view) => view,
            Err(_) => self.snapshot(),
        }
    }

    /// Subscribe to provider notifications and check for an existing session.
    ///
    /// Only the first call registers the listener and runs the check; later
    /// or concurrent calls wait for the view to settle.
    pub async fn initialize(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            self.wait_until_settled().await;
            return;
        }

        // Subscribe before the check so no notification slips between the two.
        let events = self.notifications.subscribe();
        let ticket = self.begin_check();
        let listener = self.spawn_listener(events);
        *self.listener.lock() = Some(listener);

        rota_debug!("session initialization started");
        Arc::clone(self).run_check(ticket).await;
    }

    /// Verify credentials and resolve the profile for the new session.
    pub async fn sign_in(&self, email: &str, password: &str) -> SignInResult {
        if let Some(metrics) = &self.metrics {
            metrics.inc_auth_attempt();
        }
        let session = match self.verifier.verify(email, password).await {
            Ok(session) => session,
            Err(err) => {
                let code = AuthErrorCode::from(&err);
                self.record_failure();
                log_auth_event(
                    None,
                    "session.sign_in",
                    &format!("credential verification failed: {code}"),
                    AuthEventOutcome::Denied,
                );
                return SignInResult::rejected(code);
            }
        };

        let Some(ticket) =
            self.begin(session.principal_id.clone(), Some(session.access_token.clone()))
        else {
            return SignInResult::verified(None, Some(AuthErrorCode::UnknownError));
        };
        let outcome = self.profiles.get_by_principal(&ticket.principal).await;
        let resolution = self.finish(ticket, outcome);

        let code = match resolution {
            Resolution::Resolved(user) => {
                let ctx = LogContext::new()
                    .with_principal(user.id.as_str())
                    .with_role(user.role.as_ref());
                log_auth_event(
                    Some(&ctx),
                    "session.sign_in",
                    "session authenticated",
                    AuthEventOutcome::Granted,
                );
                return SignInResult::verified(Some(user), None);
            }
            Resolution::Inactive => AuthErrorCode::UserInactive,
            Resolution::NotFound => AuthErrorCode::UserNotFound,
            Resolution::Failed(err) => AuthErrorCode::from(&err),
            Resolution::Stale => AuthErrorCode::SessionExpired,
        };
        self.record_failure();
        let ctx = LogContext::new().with_principal(session.principal_id.as_str());
        log_auth_event(
            Some(&ctx),
            "session.sign_in",
            &format!("profile rejected after verification: {code}"),
            AuthEventOutcome::Denied,
        );
        if matches!(code, AuthErrorCode::UserInactive | AuthErrorCode::UserNotFound) {
            self.end_session(Some(session.access_token)).await;
        }
        SignInResult::verified(None, Some(code))
    }

    /// End the session. The view is cleared even when invalidation fails.
    pub async fn sign_out(&self) {
        let token = self.view.borrow().access_token.clone();
        self.end_session(token).await;
        rota_info!("session signed out");
    }

    /// Stop the notification listener. Fetches already running are discarded
    /// when they complete.
    pub async fn shutdown(&self) {
        {
            let mut state = self.reconcile.lock();
            state.closed = true;
            state.generation += 1;
        }
        self.shutdown.send_replace(true);
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(err) = listener.await {
                warn!(error = %err, "session listener terminated abnormally");
            }
        }
        debug!("session state machine shut down");
    }

    /// Apply one provider notification. Retargeting happens synchronously in
    /// arrival order; the profile fetch runs on its own task.
    ///
    /// Notifications naming a session this client already ended are dropped,
    /// as are refreshes arriving while no session is held.
    fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        let ticket = {
            let mut state = self.reconcile.lock();
            if state.closed {
                return;
            }
            match (event.kind, event.principal_id) {
                (SessionEventKind::SignedOut, _) | (_, None) => {
                    debug!(kind = ?event.kind, "session cleared by notification");
                    self.clear_locked(&mut state);
                    None
                }
                (kind, Some(principal)) if state.is_ended(event.access_token.as_ref()) => {
                    debug!(
                        ?kind,
                        principal = %principal,
                        "ignoring notification for an ended session"
                    );
                    None
                }
                (SessionEventKind::TokenRefreshed, Some(principal)) if state.target.is_none() => {
                    debug!(principal = %principal, "ignoring refresh with no active session");
                    None
                }
                (kind, Some(principal)) => {
                    debug!(?kind, principal = %principal, "session notification");
                    self.begin_locked(&mut state, principal, event.access_token)
                }
            }
        };
        if let Some(ticket) = ticket {
            self.spawn_fetch(ticket);
        }
    }

    async fn end_session(&self, token: Option<String>) {
        if let Some(token) = token {
            // Fence first: a queued sign-in for this session must not
            // resurrect it, even when invalidation fails.
            self.reconcile.lock().fence(token.clone());
            if let Err(err) = self.verifier.invalidate(&token).await {
                warn!(error = %err, "session invalidation failed; clearing local state");
            }
        }
        self.clear();
    }

    fn record_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_auth_failure();
        }
    }

    fn spawn_listener(self: &Arc<Self>, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        let machine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!("session listener stopping");
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => machine.handle_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "session notifications lagged; re-checking provider session");
                            let ticket = machine.begin_check();
                            tokio::spawn(Arc::clone(&machine).run_check(ticket));
                        }
                        Err(RecvError::Closed) => {
                            debug!("session notification channel closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_fetch(self: &Arc<Self>, ticket: Ticket) {
        let machine = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = machine.profiles.get_by_principal(&ticket.principal).await;
            // Background resolutions only log.
            match machine.finish(ticket, outcome) {
                Resolution::Failed(err) => {
                    warn!(error = %err, "background profile resolution failed")
                }
                Resolution::Inactive | Resolution::NotFound => {
                    debug!("background resolution collapsed session")
                }
                Resolution::Resolved(_) | Resolution::Stale => {}
            }
        });
    }

    async fn run_check(self: Arc<Self>, ticket: CheckTicket) {
        match self.notifications.current_session().await {
            Ok(Some(session)) => {
                if let Some(fetch) =
                    self.adopt_check(ticket, session.principal_id, Some(session.access_token))
                {
                    let outcome = self.profiles.get_by_principal(&fetch.principal).await;
                    if let Resolution::Failed(err) = self.finish(fetch, outcome) {
                        warn!(error = %err, "initial profile resolution failed");
                    }
                }
            }
            Ok(None) => self.abandon_check(ticket),
            Err(err) => {
                warn!(error = %err, "existing session check failed");
                self.abandon_check(ticket);
            }
        }
    }

    fn begin_check(&self) -> CheckTicket {
        let mut state = self.reconcile.lock();
        state.in_flight += 1;
        self.view.send_modify(|view| view.initialized = true);
        CheckTicket {
            generation: state.generation,
        }
    }

    fn adopt_check(
        &self,
        ticket: CheckTicket,
        principal: PrincipalId,
        access_token: Option<String>,
    ) -> Option<Ticket> {
        let mut state = self.reconcile.lock();
        if state.generation != ticket.generation {
            debug!("existing session check superseded by notification");
            return None;
        }
        state.in_flight = state.in_flight.saturating_sub(1);
        self.begin_locked(&mut state, principal, access_token)
    }

    fn abandon_check(&self, ticket: CheckTicket) {
        let mut state = self.reconcile.lock();
        if state.generation != ticket.generation {
            return;
        }
        self.clear_locked(&mut state);
    }

    fn begin(&self, principal: PrincipalId, access_token: Option<String>) -> Option<Ticket> {
        let mut state = self.reconcile.lock();
        self.begin_locked(&mut state, principal, access_token)
    }

    fn begin_locked(
        &self,
        state: &mut Reconcile,
        principal: PrincipalId,
        access_token: Option<String>,
    ) -> Option<Ticket> {
        if state.closed {
            return None;
        }
        if state.target.as_ref() == Some(&principal) {
            // Same principal: re-resolve without touching `loading` or the
            // displayed user.
            state.in_flight += 1;
            if access_token.is_some() {
                state.access_token = access_token.clone();
                self.view.send_modify(|view| view.access_token = access_token);
            }
        } else {
            state.generation += 1;
            state.target = Some(principal.clone());
            state.access_token = access_token;
            state.in_flight = 1;
            state.resolved = None;
            self.view.send_replace(AuthView {
                user: None,
                loading: true,
                initialized: true,
                access_token: state.access_token.clone(),
            });
        }
        Some(Ticket {
            generation: state.generation,
            principal,
        })
    }

    fn finish(
        &self,
        ticket: Ticket,
        outcome: Result<Option<UserRecord>, IdentityError>,
    ) -> Resolution {
        let mut state = self.reconcile.lock();
        if state.generation != ticket.generation {
            debug!(principal = %ticket.principal, "discarding stale profile resolution");
            return Resolution::Stale;
        }
        let resolution = match outcome {
            Ok(Some(record)) if record.id != ticket.principal => Resolution::NotFound,
            Ok(Some(record)) if record.is_active => Resolution::Resolved(record),
            Ok(Some(_)) => Resolution::Inactive,
            Ok(None) => Resolution::NotFound,
            Err(err) => Resolution::Failed(err),
        };
        state.resolved = match &resolution {
            Resolution::Resolved(record) => Some(record.clone()),
            _ => None,
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.view.send_replace(AuthView {
                user: state.resolved.clone(),
                loading: false,
                initialized: true,
                access_token: state.access_token.clone(),
            });
        }
        resolution
    }

    fn clear(&self) {
        let mut state = self.reconcile.lock();
        self.clear_locked(&mut state);
    }

    fn clear_locked(&self, state: &mut Reconcile) {
        state.generation += 1;
        state.target = None;
        state.access_token = None;
        state.in_flight = 0;
        state.resolved = None;
        self.view.send_replace(AuthView::anonymous());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use carerota_security::{InMemoryIdentityProvider, IssuedSession, Role};
    use tokio::sync::Semaphore;

    use crate::view::SessionPhase;

    fn record(id: &str, role: Role, active: bool) -> UserRecord {
        UserRecord {
            id: PrincipalId::new(id),
            email: format!("{id}@example.org"),
            name: id.to_uppercase(),
            role,
            facility_id: None,
            is_active: active,
        }
    }

    /// Profile store and notification source the test drives by hand.
    struct ScriptedProvider {
        records: Mutex<HashMap<PrincipalId, UserRecord>>,
        gates: Mutex<HashMap<PrincipalId, Arc<Semaphore>>>,
        events: broadcast::Sender<SessionEvent>,
        existing: Mutex<Option<IssuedSession>>,
        accepts: Mutex<Option<String>>,
        profiles_down: AtomicBool,
        subscriptions: AtomicUsize,
        lookups: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                events,
                existing: Mutex::new(None),
                accepts: Mutex::new(None),
                profiles_down: AtomicBool::new(false),
                subscriptions: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
        }

        fn insert(&self, record: UserRecord) {
            self.records.lock().insert(record.id.clone(), record);
        }

        fn gate(&self, principal: &str) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            self.gates
                .lock()
                .insert(PrincipalId::new(principal), gate.clone());
            gate
        }

        fn session(principal: &str) -> IssuedSession {
            IssuedSession {
                principal_id: PrincipalId::new(principal),
                access_token: format!("token-{principal}"),
                refresh_token: format!("refresh-{principal}"),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            }
        }

        fn announce(&self, principal: &str) {
            let _ = self
                .events
                .send(SessionEvent::signed_in(&Self::session(principal)));
        }
    }

    #[async_trait]
    impl CredentialVerifier for ScriptedProvider {
        async fn verify(&self, _: &str, _: &str) -> Result<IssuedSession, IdentityError> {
            match self.accepts.lock().as_deref() {
                Some(principal) => Ok(Self::session(principal)),
                None => Err(IdentityError::InvalidCredentials),
            }
        }

        async fn verify_token(&self, _: &str) -> Result<PrincipalId, IdentityError> {
            Err(IdentityError::InvalidToken)
        }

        async fn invalidate(&self, _: &str) -> Result<(), IdentityError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileResolver for ScriptedProvider {
        async fn get_by_principal(
            &self,
            principal: &PrincipalId,
        ) -> Result<Option<UserRecord>, IdentityError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.profiles_down.load(Ordering::SeqCst) {
                return Err(IdentityError::Unavailable("profile store offline".into()));
            }
            let gate = self.gates.lock().get(principal).cloned();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let found = self.records.lock().get(principal).cloned();
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(found)
        }
    }

    #[async_trait]
    impl SessionNotifications for ScriptedProvider {
        async fn current_session(&self) -> Result<Option<IssuedSession>, IdentityError> {
            Ok(self.existing.lock().clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            self.events.subscribe()
        }
    }

    async fn wait_for_view(
        machine: &SessionStateMachine,
        predicate: impl FnMut(&AuthView) -> bool,
    ) -> AuthView {
        let mut receiver = machine.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(predicate))
            .await
            .expect("view condition not reached")
            .expect("view channel closed")
            .clone();
        view
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn initialize_without_session_settles_anonymous() {
        let provider = ScriptedProvider::new();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        assert!(!machine.snapshot().initialized);
        machine.initialize().await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_initialize_registers_one_listener() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, true));
        *provider.existing.lock() = Some(ScriptedProvider::session("p1"));
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));

        tokio::join!(machine.initialize(), machine.initialize());
        machine.initialize().await;

        let view = machine.wait_until_settled().await;
        assert_eq!(view.user.map(|u| u.id), Some(PrincipalId::new("p1")));
        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 1);
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn last_principal_wins_over_last_completion() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::FacilityAdmin, true));
        provider.insert(record("p2", Role::User, true));
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        let p1_gate = provider.gate("p1");
        provider.announce("p1");
        wait_until(|| provider.lookups.load(Ordering::SeqCst) == 1).await;
        assert!(machine.snapshot().loading);

        provider.announce("p2");
        let view = wait_for_view(&machine, |view| view.is_settled() && view.user.is_some()).await;
        assert_eq!(view.user.as_ref().map(|u| u.id.as_str()), Some("p2"));

        // P1's fetch completes last and must not replace P2.
        p1_gate.add_permits(1);
        wait_until(|| provider.completed.load(Ordering::SeqCst) == 2).await;
        tokio::task::yield_now().await;
        let view = machine.snapshot();
        assert_eq!(view.user.map(|u| u.id), Some(PrincipalId::new("p2")));
        assert!(!view.loading);
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn notification_supersedes_slow_initial_check() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, true));
        provider.insert(record("p2", Role::SystemAdmin, true));
        *provider.existing.lock() = Some(ScriptedProvider::session("p1"));
        let p1_gate = provider.gate("p1");
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));

        let init = tokio::spawn({
            let machine = machine.clone();
            async move { machine.initialize().await }
        });
        wait_until(|| provider.lookups.load(Ordering::SeqCst) == 1).await;
        provider.announce("p2");
        let view = wait_for_view(&machine, |view| view.is_settled()).await;
        assert_eq!(view.role(), Some(Role::SystemAdmin));

        p1_gate.add_permits(1);
        init.await.unwrap();
        assert_eq!(machine.snapshot().role(), Some(Role::SystemAdmin));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn inactive_profile_collapses_to_anonymous() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, false));
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        provider.announce("p1");
        wait_until(|| provider.completed.load(Ordering::SeqCst) == 1).await;
        let view = machine.wait_until_settled().await;
        assert!(view.user.is_none());
        assert!(!view.loading);
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn sign_out_notification_discards_in_flight_fetch() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, true));
        let gate = provider.gate("p1");
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        provider.announce("p1");
        wait_until(|| provider.lookups.load(Ordering::SeqCst) == 1).await;
        let _ = provider.events.send(SessionEvent::signed_out());
        wait_for_view(&machine, AuthView::is_settled).await;
        gate.add_permits(1);
        wait_until(|| provider.completed.load(Ordering::SeqCst) == 1).await;
        tokio::task::yield_now().await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn no_mutation_after_shutdown() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, true));
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        machine.shutdown().await;

        provider.announce("p1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 0);
    }

    fn seeded_provider() -> (Arc<InMemoryIdentityProvider>, UserRecord) {
        let provider = Arc::new(InMemoryIdentityProvider::default());
        let user = provider
            .create_user(
                "lead@example.org",
                "Lead",
                "pw",
                Role::FacilityAdmin,
                Some("fac-1".into()),
            )
            .unwrap();
        (provider, user)
    }

    #[tokio::test]
    async fn sign_in_resolves_user() {
        let (provider, user) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        let result = machine.sign_in("lead@example.org", "pw").await;
        assert!(result.success);
        assert_eq!(result.user.as_ref(), Some(&user));
        assert_eq!(result.error, None);

        let view = machine.wait_until_settled().await;
        assert_eq!(view.user, Some(user));
        assert!(view.access_token.is_some());
        assert!(machine.require_auth(Some(Role::FacilityAdmin)));
        assert!(!machine.require_auth(Some(Role::SystemAdmin)));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn bad_credentials_short_circuit() {
        let (provider, _) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        let result = machine.sign_in("lead@example.org", "wrong").await;
        assert_eq!(
            result,
            SignInResult {
                success: false,
                user: None,
                error: Some(AuthErrorCode::InvalidCredentials),
            }
        );
        assert_eq!(result.message(), Some("Email or password is incorrect."));
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn sign_in_with_inactive_account_reports_code() {
        let (provider, user) = seeded_provider();
        provider.set_active(&user.id, false).unwrap();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        let result = machine.sign_in("lead@example.org", "pw").await;
        assert!(result.success);
        assert_eq!(result.user, None);
        assert_eq!(result.error, Some(AuthErrorCode::UserInactive));
        let view = machine.wait_until_settled().await;
        assert!(view.user.is_none());
        assert!(view.access_token.is_none());
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn sign_in_during_outage_reports_network_error() {
        let (provider, _) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        provider.set_available(false);

        let result = machine.sign_in("lead@example.org", "pw").await;
        assert!(!result.success);
        assert_eq!(result.error, Some(AuthErrorCode::NetworkError));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn sign_out_clears_even_when_invalidation_fails() {
        let (provider, _) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        assert!(machine.sign_in("lead@example.org", "pw").await.user.is_some());

        provider.set_available(false);
        machine.sign_out().await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        assert!(!machine.require_auth(None));
        machine.shutdown().await;
    }

    /// Provider whose sign-out call never reaches the backend.
    struct FailingInvalidate(Arc<InMemoryIdentityProvider>);

    #[async_trait]
    impl CredentialVerifier for FailingInvalidate {
        async fn verify(&self, email: &str, password: &str) -> Result<IssuedSession, IdentityError> {
            self.0.verify(email, password).await
        }

        async fn verify_token(&self, token: &str) -> Result<PrincipalId, IdentityError> {
            self.0.verify_token(token).await
        }

        async fn invalidate(&self, _: &str) -> Result<(), IdentityError> {
            Err(IdentityError::Unavailable("sign-out endpoint unreachable".into()))
        }
    }

    #[async_trait]
    impl ProfileResolver for FailingInvalidate {
        async fn get_by_principal(
            &self,
            principal: &PrincipalId,
        ) -> Result<Option<UserRecord>, IdentityError> {
            self.0.get_by_principal(principal).await
        }
    }

    #[async_trait]
    impl SessionNotifications for FailingInvalidate {
        async fn current_session(&self) -> Result<Option<IssuedSession>, IdentityError> {
            self.0.current_session().await
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            self.0.subscribe()
        }
    }

    #[tokio::test]
    async fn queued_sign_in_does_not_resurrect_signed_out_session() {
        let (provider, _) = seeded_provider();
        let wrapped = Arc::new(FailingInvalidate(provider.clone()));
        let machine = Arc::new(SessionStateMachine::from_provider(wrapped));
        machine.initialize().await;

        // No pause between the two: the sign-in notification is still queued
        // when the session ends and no sign-out notification follows it.
        assert!(machine.sign_in("lead@example.org", "pw").await.user.is_some());
        machine.sign_out().await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());
        assert!(!machine.require_auth(None));

        // Refreshing the orphaned session must not bring it back either.
        let session = provider.current_session().await.unwrap().unwrap();
        provider.refresh(&session.refresh_token).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(machine.snapshot(), AuthView::anonymous());

        // A fresh sign-in still works.
        assert!(machine.sign_in("lead@example.org", "pw").await.user.is_some());
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn profile_outage_during_sign_in_reports_network_error() {
        let provider = ScriptedProvider::new();
        provider.insert(record("p1", Role::User, true));
        *provider.accepts.lock() = Some("p1".into());
        provider.profiles_down.store(true, Ordering::SeqCst);
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;

        let result = machine.sign_in("p1@example.org", "pw").await;
        assert_eq!(
            result,
            SignInResult {
                success: true,
                user: None,
                error: Some(AuthErrorCode::NetworkError),
            }
        );
        let view = machine.wait_until_settled().await;
        assert_eq!(view.phase(), SessionPhase::Anonymous);
        assert!(!machine.require_auth(None));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn notifications_after_shutdown_leave_view_alone() {
        let (provider, user) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        machine.sign_in("lead@example.org", "pw").await;
        let before = machine.wait_until_settled().await;
        assert_eq!(before.user.as_ref(), Some(&user));
        machine.shutdown().await;

        machine.handle_event(SessionEvent::signed_out());
        assert_eq!(machine.snapshot(), before);
    }

    #[tokio::test]
    async fn token_refresh_keeps_user_displayed() {
        let (provider, user) = seeded_provider();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        machine.sign_in("lead@example.org", "pw").await;
        let before = machine.wait_until_settled().await;
        let old_token = before.access_token.clone().unwrap();

        let mut receiver = machine.subscribe();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while receiver.changed().await.is_ok() {
                let view = receiver.borrow_and_update().clone();
                let done = view.access_token.as_deref() != Some(old_token.as_str());
                seen.push(view);
                if done {
                    break;
                }
            }
            seen
        });

        let session = provider.current_session().await.unwrap().unwrap();
        let refreshed = provider.refresh(&session.refresh_token).await.unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), observer)
            .await
            .unwrap()
            .unwrap();
        assert!(!seen.is_empty());
        for view in &seen {
            assert!(!view.loading);
            assert_eq!(view.user.as_ref(), Some(&user));
        }
        let settled = machine.wait_until_settled().await;
        assert_eq!(settled.access_token, Some(refreshed.access_token));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn existing_session_is_restored_on_initialize() {
        let (provider, user) = seeded_provider();
        provider.verify("lead@example.org", "pw").await.unwrap();
        let machine = Arc::new(SessionStateMachine::from_provider(provider.clone()));
        machine.initialize().await;
        assert_eq!(machine.wait_until_settled().await.user, Some(user));
        machine.shutdown().await;
    }

    #[tokio::test]
    async fn sign_in_counts_attempts_and_failures() {
        let (provider, _) = seeded_provider();
        let registry = Arc::new(prometheus::Registry::new());
        let metrics = SecurityMetrics::new(registry).unwrap();
        let machine = Arc::new(
            SessionStateMachine::from_provider(provider.clone()).with_metrics(metrics.clone()),
        );
        machine.initialize().await;
        machine.sign_in("lead@example.org", "nope").await;
        machine.sign_in("lead@example.org", "pw").await;
        let (attempts, failures, _, _) = metrics.snapshot();
        assert_eq!((attempts, failures), (2, 1));
        machine.shutdown().await;
    }
}
