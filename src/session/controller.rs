use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::Notify;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::config::SessionConfig;
use super::guard::{ReconcileGuard, Rejection};
use super::listeners::{self, Listener, ListenerRegistry, Subscription};
use crate::backend::{BoxError, IdentityClient, ProfileStore};
use crate::error::Error;
use crate::types::{
    Email, Identity, IdentityId, NewProfile, OtpCode, Profile, ProfileUpdate, ProviderName,
    Session, SessionEvent,
};

/// Single source of truth for sign-in, profile and consent state.
///
/// Reconciles the identity backend's session stream with the profile store
/// and publishes immutable [`Session`] snapshots to subscribers. Reads are
/// synchronous; only backend calls suspend.
///
/// ```rust,ignore
/// let session = SessionController::start(identity, profiles, SessionConfig::new());
/// let _sub = session.subscribe(|s| menu.set_signed_in(s.is_authenticated()));
/// ```
pub struct SessionController<I, P> {
    identity: Arc<I>,
    profiles: Arc<P>,
    config: SessionConfig,
    state: RwLock<Session>,
    guard: Mutex<ReconcileGuard>,
    listeners: Arc<ListenerRegistry>,
    /// Held from snapshot to last delivery so listeners never see an older state last.
    /// Reentrant so a listener may subscribe.
    notify_order: ReentrantMutex<()>,
    /// Signalled whenever the reconciliation slot is freed.
    slot_freed: Notify,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl<I: IdentityClient, P: ProfileStore> SessionController<I, P> {
    /// Create the controller, probe for a stored session and start following
    /// the identity backend's event stream.
    ///
    /// The returned controller reports `is_loading() == true` until the probe
    /// (and the reconciliation it triggers) completes.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(identity: I, profiles: P, config: SessionConfig) -> Arc<Self> {
        let controller = Arc::new(Self {
            identity: Arc::new(identity),
            profiles: Arc::new(profiles),
            config,
            state: RwLock::new(Session::loading()),
            guard: Mutex::new(ReconcileGuard::default()),
            listeners: Arc::new(ListenerRegistry::default()),
            notify_order: ReentrantMutex::new(()),
            slot_freed: Notify::new(),
            event_task: Mutex::new(None),
        });

        // Subscribe before probing so no sign-in between the two is lost.
        let events = controller.identity.session_events();
        let task = tokio::spawn(follow_events(Arc::downgrade(&controller), events));
        *controller.event_task.lock() = Some(task);

        let probe = Arc::clone(&controller);
        tokio::spawn(async move { probe.probe().await });

        controller
    }

    // ── Snapshot reads ─────────────────────────────────────────────────

    /// Copy of the current session.
    #[must_use]
    pub fn state(&self) -> Session {
        self.state.read().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.read().is_ready()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated()
    }

    #[must_use]
    pub fn has_marketing_consent(&self) -> bool {
        self.state.read().has_marketing_consent()
    }

    /// Whether the visitor may start a casual game, per the configured [`PlayPolicy`].
    #[must_use]
    pub fn can_play(&self) -> bool {
        self.config.play_policy.admits(&self.state.read())
    }

    /// Signed in and opted in to marketing.
    #[must_use]
    pub fn can_compete_for_prizes(&self) -> bool {
        let state = self.state.read();
        state.is_authenticated() && state.has_marketing_consent()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Subscriptions ──────────────────────────────────────────────────

    /// Register `listener`. It is called once right away with the current
    /// snapshot, then after every state change, in subscription order.
    ///
    /// A panicking listener is logged and skipped; other listeners still run.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let _order = self.notify_order.lock();
        let id = self.listeners.insert(Arc::clone(&listener));
        listeners::invoke(id, &listener, &self.state());
        Subscription::new(id, &self.listeners)
    }

    /// Number of active listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop following the identity stream and drop every listener.
    pub fn shutdown(&self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        self.listeners.clear();
        debug!("Session controller shut down");
    }

    // ── Identity events ────────────────────────────────────────────────

    /// Apply one identity backend event.
    ///
    /// Called by the event loop started in [`start`](Self::start); exposed for
    /// hosts that deliver events themselves.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SignedIn(identity) => self.reconcile(identity).await,
            SessionEvent::TokenRefreshed(identity) => {
                let known = self
                    .state
                    .read()
                    .identity()
                    .is_some_and(|current| current.id == identity.id);
                if known {
                    debug!(identity_id = %identity.id, "Token refreshed");
                } else {
                    self.reconcile(identity).await;
                }
            }
            SessionEvent::SignedOut => {
                if self.apply_signed_out() {
                    info!("Signed out by identity backend");
                }
            }
        }
    }

    async fn probe(&self) {
        let epoch = self.guard.lock().epoch();
        let identity = Arc::clone(&self.identity);
        let found = run_bounded(
            "session probe",
            self.config.session_probe_timeout,
            async move { identity.current_session().await },
        )
        .await;

        match found {
            Ok(Some(identity)) => {
                let superseded = !self.guard.lock().is_current(epoch);
                if superseded {
                    debug!("Stored session superseded by sign-out");
                } else {
                    self.reconcile(identity).await;
                }
            }
            Ok(None) => self.finish_signed_out_probe(),
            Err(e) => {
                warn!(error = %e, "Session probe failed; treating visitor as signed out");
                self.finish_signed_out_probe();
            }
        }
    }

    fn finish_signed_out_probe(&self) {
        let changed = {
            let mut state = self.state.write();
            if state.identity().is_none() && state.is_loading() {
                state.finish_loading();
                true
            } else {
                false
            }
        };
        if changed {
            debug!("No stored session");
            self.notify();
        }
    }

    /// Bring state in line with a signed-in identity.
    async fn reconcile(&self, identity: Identity) {
        let admitted = self.guard.lock().admit(
            &identity.id,
            Instant::now(),
            self.config.reconcile_cooldown,
        );
        let epoch = match admitted {
            Ok(epoch) => epoch,
            Err(Rejection::InFlight) => {
                debug!(identity_id = %identity.id, "Reconciliation in flight; dropping trigger");
                return;
            }
            Err(Rejection::Cooldown { remaining }) => {
                debug!(
                    identity_id = %identity.id,
                    remaining_ms = remaining.as_millis() as u64,
                    "Identity reconciled recently; dropping trigger"
                );
                return;
            }
        };
        let slot = InFlight::new(&self.guard, &self.slot_freed, epoch);

        // Authenticated as soon as the identity is known; the profile follows.
        let Some(revision) = self.commit(epoch, |guard, s| {
            s.set_identity(identity.clone());
            guard.profile_revision()
        }) else {
            return;
        };

        let profile = self.load_or_create_profile(&identity).await;

        let committed = self.commit(epoch, |guard, s| {
            s.set_identity(identity.clone());
            if !guard.profile_unchanged_since(revision) {
                debug!(
                    identity_id = %identity.id,
                    "Profile written during reconciliation; keeping it"
                );
            } else if let Some(profile) = profile {
                if s.profile() != Some(&profile) && s.set_profile(Some(profile)) {
                    guard.bump_profile_revision();
                }
            }
            s.finish_loading();
            s.profile().is_some()
        });
        slot.finish(&identity.id);

        match committed {
            Some(has_profile) => {
                info!(identity_id = %identity.id, has_profile, "Session reconciled");
                self.notify();
            }
            None => debug!(identity_id = %identity.id, "Reconciliation superseded by sign-out"),
        }
    }

    async fn load_or_create_profile(&self, identity: &Identity) -> Option<Profile> {
        let limit = self.config.profile_timeout;

        let store = Arc::clone(&self.profiles);
        let id = identity.id.clone();
        match run_bounded("profile fetch", limit, async move { store.get(&id).await }).await {
            Ok(Some(profile)) => return Some(profile),
            Ok(None) => debug!(identity_id = %identity.id, "No profile yet; creating one"),
            Err(e) => warn!(identity_id = %identity.id, error = %e, "Profile fetch failed"),
        }

        let store = Arc::clone(&self.profiles);
        let defaults = NewProfile::from(identity);
        match run_bounded("profile create", limit, async move { store.create(defaults).await })
            .await
        {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => {
                warn!(identity_id = %identity.id, "Profile create returned no record");
                None
            }
            Err(e) => {
                warn!(
                    identity_id = %identity.id,
                    error = %e,
                    "Profile create failed; continuing without a profile"
                );
                None
            }
        }
    }

    // ── Profile ────────────────────────────────────────────────────────

    /// Apply a partial profile update for the signed-in user.
    ///
    /// Subscribers are notified when the stored profile actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthenticatedUser`] when nobody is signed in,
    /// [`Error::Backend`] / [`Error::Timeout`] when the profile store fails,
    /// and [`Error::ProfileUnavailable`] when it returns no record.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, Error> {
        let (id, epoch, _) = self.current_identity().ok_or(Error::NoAuthenticatedUser)?;

        let store = Arc::clone(&self.profiles);
        let key = id.clone();
        let updated = run_bounded("profile update", self.config.profile_timeout, async move {
            store.update(&key, update).await
        })
        .await?
        .ok_or(Error::ProfileUnavailable)?;

        if self.store_profile(epoch, &updated, None) {
            info!(
                identity_id = %id,
                marketing_consent = updated.marketing_consent,
                "Profile updated"
            );
            self.notify();
        }
        Ok(updated)
    }

    /// Re-fetch the signed-in user's profile, bypassing the repeat-sign-in cooldown.
    ///
    /// While a reconciliation is fetching the profile, waits for it instead of
    /// issuing a second request. Failures keep the current profile. Returns the
    /// profile held afterwards.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let mut slot_freed = pin!(self.slot_freed.notified());
        slot_freed.as_mut().enable();
        if self.guard.lock().is_in_flight() {
            debug!("Reconciliation in flight; waiting for its profile");
            slot_freed.await;
            return self.state.read().profile().cloned();
        }

        let (id, epoch, revision) = self.current_identity()?;

        let store = Arc::clone(&self.profiles);
        let key = id.clone();
        let fetched = run_bounded("profile refresh", self.config.profile_timeout, async move {
            store.get(&key).await
        })
        .await;

        match fetched {
            Ok(Some(profile)) => {
                if self.store_profile(epoch, &profile, Some(revision)) {
                    debug!(identity_id = %id, "Profile refreshed");
                    self.notify();
                }
            }
            Ok(None) => debug!(identity_id = %id, "Profile refresh found no record"),
            Err(e) => warn!(identity_id = %id, error = %e, "Profile refresh failed"),
        }

        self.state.read().profile().cloned()
    }

    // ── Sign-in surface pass-throughs ──────────────────────────────────

    /// Start an OAuth sign-in; returns the URL to navigate to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the identity backend refuses.
    pub async fn sign_in_with_provider(&self, provider: &ProviderName) -> Result<Url, Error> {
        let url = self
            .identity
            .sign_in_with_provider(provider)
            .await
            .map_err(|e| Error::backend("provider sign-in", e))?;
        info!(provider = %provider, "Provider sign-in started");
        Ok(url)
    }

    /// Email a one-time code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the identity backend refuses.
    pub async fn send_otp(&self, email: &Email) -> Result<(), Error> {
        self.identity
            .sign_in_with_otp(email)
            .await
            .map_err(|e| Error::backend("send one-time code", e))?;
        info!("One-time code sent");
        Ok(())
    }

    /// Verify a one-time code. The resulting `SignedIn` event drives reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the code is rejected.
    pub async fn verify_otp(&self, email: &Email, code: &OtpCode) -> Result<(), Error> {
        self.identity
            .verify_otp(email, code)
            .await
            .map_err(|e| Error::backend("verify one-time code", e))?;
        info!("One-time code verified");
        Ok(())
    }

    /// Sign out and reset to the signed-out defaults immediately.
    ///
    /// Does not wait for the backend's `SignedOut` event; that event is a
    /// no-op when it arrives later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the backend sign-out fails; local state is
    /// left untouched so the caller can retry.
    pub async fn sign_out(&self) -> Result<(), Error> {
        self.identity
            .sign_out()
            .await
            .map_err(|e| Error::backend("sign out", e))?;
        self.apply_signed_out();
        info!("Signed out");
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────────

    /// Signed-in id with the sign-out epoch and profile revision it was read at.
    fn current_identity(&self) -> Option<(IdentityId, u64, u64)> {
        let guard = self.guard.lock();
        let state = self.state.read();
        state
            .identity()
            .map(|identity| (identity.id.clone(), guard.epoch(), guard.profile_revision()))
    }

    /// Store a profile for the current identity. Returns whether it changed.
    ///
    /// `fetched_at` is the profile revision read before a fetch was sent; the
    /// fetched row is dropped if another write landed since. `None` marks an
    /// update result, which always wins.
    fn store_profile(&self, epoch: u64, profile: &Profile, fetched_at: Option<u64>) -> bool {
        self.commit(epoch, |guard, s| {
            if fetched_at.is_some_and(|revision| !guard.profile_unchanged_since(revision)) {
                return false;
            }
            let changed = s.profile() != Some(profile);
            if !s.set_profile(Some(profile.clone())) {
                return false;
            }
            if changed || fetched_at.is_none() {
                guard.bump_profile_revision();
            }
            changed
        })
        .unwrap_or(false)
    }

    /// Mutate state if no sign-out happened since `epoch` was taken.
    fn commit<R>(
        &self,
        epoch: u64,
        apply: impl FnOnce(&mut ReconcileGuard, &mut Session) -> R,
    ) -> Option<R> {
        let mut guard = self.guard.lock();
        if !guard.is_current(epoch) {
            return None;
        }
        let mut state = self.state.write();
        Some(apply(&mut guard, &mut state))
    }

    /// Reset to signed-out defaults. Returns whether anything changed.
    fn apply_signed_out(&self) -> bool {
        let changed = {
            let mut guard = self.guard.lock();
            guard.invalidate();
            let mut state = self.state.write();
            let signed_out = Session::signed_out();
            let changed = *state != signed_out;
            *state = signed_out;
            changed
        };
        self.slot_freed.notify_waiters();
        if changed {
            self.notify();
        }
        changed
    }

    /// Deliver the current snapshot. Deliveries never interleave, and each
    /// reads the state after the previous one finished.
    fn notify(&self) {
        let _order = self.notify_order.lock();
        let snapshot = self.state();
        self.listeners.notify(&snapshot);
    }
}

impl<I, P> Drop for SessionController<I, P> {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Holds the reconciliation slot; releases it if the reconciliation is dropped.
struct InFlight<'a> {
    guard: &'a Mutex<ReconcileGuard>,
    freed: &'a Notify,
    epoch: u64,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(guard: &'a Mutex<ReconcileGuard>, freed: &'a Notify, epoch: u64) -> Self {
        Self {
            guard,
            freed,
            epoch,
            done: false,
        }
    }

    fn finish(mut self, id: &IdentityId) {
        self.guard.lock().finish(self.epoch, id, Instant::now());
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.guard.lock().release(self.epoch);
        }
        self.freed.notify_waiters();
    }
}

async fn follow_events<I: IdentityClient, P: ProfileStore>(
    controller: Weak<SessionController<I, P>>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => {
                debug!("Session event stream closed");
                return;
            }
        };
        let Some(controller) = controller.upgrade() else {
            return;
        };
        match event {
            // Applied in stream order so a later sign-in is never undone.
            SessionEvent::SignedOut => controller.handle_event(event).await,
            event => {
                tokio::spawn(async move { controller.handle_event(event).await });
            }
        }
    }
}

/// Run a backend call on its own task under `limit`.
///
/// On timeout the call keeps running but its result is discarded.
async fn run_bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    let task = tokio::spawn(call);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result.map_err(|e| Error::backend(operation, e)),
        Ok(Err(join_error)) => Err(Error::backend(operation, join_error)),
        Err(_) => {
            debug!(operation, "Backend call timed out; a late result will be ignored");
            Err(Error::Timeout {
                operation,
                after: limit,
            })
        }
    }
}
