//! "Wait, gate, prompt, retry" for actions that need a signed-in player.
//!
//! Every gated UI action (start game, submit score, open the leaderboard)
//! runs a fresh [`GuardedActionFlow::require_authentication`]: nothing is
//! remembered between invocations.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::{IdentityClient, ProfileStore};
use crate::session::SessionController;
use crate::types::{GateDecision, ProfileUpdate};

/// Pause after the sign-in surface closes, letting the backend's sign-in event land.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How an interactive surface was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOutcome {
    /// The user finished the interaction (signed in, ticked the consent box).
    Completed,
    Dismissed,
}

/// Consumer-provided interactive surfaces (sign-in and consent modals).
///
/// Each method resolves when the modal closes. Sign-in failures are shown
/// inside the modal, which stays open for retry; only closing it resolves.
pub trait SignInSurface: Send + Sync + 'static {
    fn show_sign_in(&self) -> impl Future<Output = SurfaceOutcome> + Send;

    fn show_consent(&self) -> impl Future<Output = SurfaceOutcome> + Send;
}

/// Gate for actions that need a signed-in (and optionally consenting) player.
pub struct GuardedActionFlow<S> {
    surface: S,
    settle_delay: Duration,
}

impl<S: SignInSurface> GuardedActionFlow<S> {
    #[must_use]
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Override the pause between closing the sign-in surface and re-checking.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Resolve to whether the gated action may proceed.
    ///
    /// Returns immediately when the player can already play. Otherwise waits
    /// for the session to finish loading, shows the sign-in surface if still
    /// needed, then re-checks after the settle delay and a profile refresh.
    /// When the play policy also requires consent, a signed-in player without
    /// it is shown the consent surface instead
    /// (see [`PlayPolicy`](crate::PlayPolicy)).
    pub async fn require_authentication<I, P>(&self, session: &SessionController<I, P>) -> bool
    where
        I: IdentityClient,
        P: ProfileStore,
    {
        if session.can_play() {
            return true;
        }

        if !session.is_ready() {
            debug!("Waiting for session to load");
            wait_until_ready(session).await;
        }
        if session.can_play() {
            return true;
        }

        if !session.is_authenticated() {
            debug!("Sign-in required");
            let outcome = self.surface.show_sign_in().await;
            debug!(?outcome, "Sign-in surface closed");

            tokio::time::sleep(self.settle_delay).await;
            session.refresh_profile().await;
        }

        if session.is_authenticated()
            && !session.can_play()
            && session.config().play_policy().requires_consent()
        {
            self.ask_consent(session).await;
        }

        let allowed = session.can_play();
        info!(allowed, "Sign-in gate resolved");
        allowed
    }

    /// [`require_authentication`](Self::require_authentication), then ask for
    /// marketing consent if it is missing. Returns whether the player can
    /// compete for prizes.
    pub async fn require_prize_eligibility<I, P>(&self, session: &SessionController<I, P>) -> bool
    where
        I: IdentityClient,
        P: ProfileStore,
    {
        if !self.require_authentication(session).await {
            return false;
        }
        if !session.can_compete_for_prizes() {
            self.ask_consent(session).await;
        }
        session.can_compete_for_prizes()
    }

    /// Show the consent surface and record an opt-in.
    async fn ask_consent<I, P>(&self, session: &SessionController<I, P>)
    where
        I: IdentityClient,
        P: ProfileStore,
    {
        match self.surface.show_consent().await {
            SurfaceOutcome::Completed => {
                let update = ProfileUpdate::grant_consent(OffsetDateTime::now_utc());
                if let Err(e) = session.update_profile(update).await {
                    warn!(error = %e, "Recording marketing consent failed");
                }
            }
            SurfaceOutcome::Dismissed => debug!("Marketing consent declined"),
        }
    }
}

/// Suspend until the session has finished loading.
///
/// Returns early if the controller shuts down while waiting.
pub async fn wait_until_ready<I, P>(session: &SessionController<I, P>)
where
    I: IdentityClient,
    P: ProfileStore,
{
    let (tx, rx) = oneshot::channel::<()>();
    let tx = Mutex::new(Some(tx));
    let subscription = session.subscribe(move |state| {
        if state.is_ready() {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        }
    });
    let _ = rx.await;
    subscription.unsubscribe();
}

/// Race "session finished loading" against `timeout`.
///
/// `Authenticated` means the loaded session satisfies the configured
/// [`PlayPolicy`](crate::PlayPolicy), the same test [`GuardedActionFlow::require_authentication`]
/// applies. Exactly one decision is produced. The listener is removed before
/// returning, so a load that completes after the timeout has no effect here.
pub async fn check_with_timeout<I, P>(
    session: &SessionController<I, P>,
    timeout: Duration,
) -> GateDecision
where
    I: IdentityClient,
    P: ProfileStore,
{
    let policy = session.config().play_policy();
    let (tx, rx) = oneshot::channel::<bool>();
    let tx = Mutex::new(Some(tx));
    let subscription = session.subscribe(move |state| {
        if state.is_ready() {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(policy.admits(state));
            }
        }
    });

    let decision = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(true)) => GateDecision::Authenticated,
        Ok(Ok(false)) => GateDecision::NeedsLogin,
        // Controller shut down before it finished loading.
        Ok(Err(_)) | Err(_) => GateDecision::TimedOut,
    };
    subscription.unsubscribe();

    debug!(?decision, timeout_ms = timeout.as_millis() as u64, "Session check resolved");
    decision
}
