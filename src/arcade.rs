//! UI-facing entry points for the arcade screens.
//!
//! The menu, game-over screen and leaderboard hold an [`ArcadeGate`] instead
//! of reaching for the controller, the sign-in modal and the score backend
//! separately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{BoxError, IdentityClient, ProfileStore, ScoreStore, ScoreStoreDyn};
use crate::error::Error;
use crate::flow::{GuardedActionFlow, SignInSurface};
use crate::score::{LeaderboardEntry, LeaderboardQuery, ScoreSubmission, StoredScore};
use crate::session::{SessionController, Subscription};
use crate::types::Session;

/// Bound on each score-store call.
pub const DEFAULT_SCORE_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful score submission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ScoreReceipt {
    pub stored: StoredScore,
    /// Signed in with marketing consent when the score was recorded.
    pub prize_eligible: bool,
}

/// Gated arcade actions for the UI layer.
pub struct ArcadeGate<I, P, S> {
    session: Arc<SessionController<I, P>>,
    flow: GuardedActionFlow<S>,
    scores: Arc<dyn ScoreStoreDyn>,
    score_timeout: Duration,
}

impl<I, P, S> ArcadeGate<I, P, S>
where
    I: IdentityClient,
    P: ProfileStore,
    S: SignInSurface,
{
    pub fn new<R: ScoreStore>(
        session: Arc<SessionController<I, P>>,
        flow: GuardedActionFlow<S>,
        scores: R,
    ) -> Self {
        Self {
            session,
            flow,
            scores: Arc::new(scores),
            score_timeout: DEFAULT_SCORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_score_timeout(mut self, timeout: Duration) -> Self {
        self.score_timeout = timeout;
        self
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionController<I, P>> {
        &self.session
    }

    #[must_use]
    pub fn flow(&self) -> &GuardedActionFlow<S> {
        &self.flow
    }

    /// Current snapshot, for an initial render.
    #[must_use]
    pub fn status(&self) -> Session {
        self.session.state()
    }

    /// Re-render hook; see [`SessionController::subscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.session.subscribe(listener)
    }

    /// Play button. Resolves to whether the game may start.
    pub async fn start_game(&self) -> bool {
        let allowed = self.flow.require_authentication(&self.session).await;
        if allowed {
            info!("Game start permitted");
        }
        allowed
    }

    /// Prize-draw opt-in from the game-over screen.
    pub async fn join_prize_draw(&self) -> bool {
        self.flow.require_prize_eligibility(&self.session).await
    }

    /// Record a finished run for the signed-in player.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthenticatedUser`] if the player declines to sign in,
    /// [`Error::InvalidScore`] for out-of-range input or a refused submission,
    /// and [`Error::Backend`] / [`Error::Timeout`] if the score store fails.
    pub async fn submit_score(
        &self,
        score: u32,
        duration_seconds: u32,
    ) -> Result<ScoreReceipt, Error> {
        if !self.flow.require_authentication(&self.session).await {
            return Err(Error::NoAuthenticatedUser);
        }
        let state = self.session.state();
        let identity = state.identity().ok_or(Error::NoAuthenticatedUser)?;
        let submission = ScoreSubmission::new(
            identity.id.clone(),
            state.nickname().cloned(),
            score,
            duration_seconds,
        )?;

        let stored = self
            .call("score submit", self.scores.submit_dyn(submission))
            .await?
            .ok_or_else(|| Error::InvalidScore("refused by score store".into()))?;

        info!(
            identity_id = %stored.identity_id,
            score = stored.score,
            duration_seconds = stored.duration_seconds,
            "Score submitted"
        );
        Ok(ScoreReceipt {
            stored,
            prize_eligible: state.is_authenticated() && state.has_marketing_consent(),
        })
    }

    /// Ranked rows for the leaderboard screen (sign-in required).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthenticatedUser`] if the player declines to sign in,
    /// and [`Error::Backend`] / [`Error::Timeout`] if the score store fails.
    pub async fn leaderboard(
        &self,
        query: LeaderboardQuery,
    ) -> Result<Vec<LeaderboardEntry>, Error> {
        if !self.flow.require_authentication(&self.session).await {
            return Err(Error::NoAuthenticatedUser);
        }
        self.call("leaderboard", self.scores.leaderboard_dyn(query)).await
    }

    /// The signed-in player's best stored run. Never prompts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthenticatedUser`] when nobody is signed in.
    pub async fn personal_best(&self) -> Result<Option<StoredScore>, Error> {
        let id = self
            .session
            .state()
            .identity()
            .map(|identity| identity.id.clone())
            .ok_or(Error::NoAuthenticatedUser)?;
        self.call("personal best", self.scores.personal_best_dyn(&id))
            .await
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T, BoxError>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.score_timeout, request)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                after: self.score_timeout,
            })?
            .map_err(|e| Error::backend(operation, e))
    }
}
