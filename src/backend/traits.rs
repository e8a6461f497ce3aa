use std::future::Future;

use tokio::sync::broadcast;
use url::Url;

use super::BoxError;
use crate::score::{LeaderboardEntry, LeaderboardQuery, ScoreSubmission, StoredScore};
use crate::types::{
    Email, Identity, IdentityId, NewProfile, OtpCode, Profile, ProfileUpdate, ProviderName,
    SessionEvent,
};

/// Consumer-provided identity backend.
///
/// Owns provider sessions. The controller probes it once at start-up and then
/// follows its event stream; sign-in calls are driven by the sign-in surface.
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityClient for SupabaseAuth {
///     async fn current_session(&self) -> Result<Option<Identity>, BoxError> {
///         Ok(self.client.get_session().await?.map(|s| Identity::new(s.user.id)))
///     }
///
///     fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
///         self.events.subscribe()
///     }
///     // ...
/// }
/// ```
pub trait IdentityClient: Send + Sync + 'static {
    /// Look up the provider session restored from storage, if any.
    fn current_session(
        &self,
    ) -> impl Future<Output = Result<Option<Identity>, BoxError>> + Send;

    /// Subscribe to session events. Events may arrive in bursts.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Start an OAuth sign-in. Returns the URL to send the browser to.
    fn sign_in_with_provider(
        &self,
        provider: &ProviderName,
    ) -> impl Future<Output = Result<Url, BoxError>> + Send;

    /// Email a one-time code.
    fn sign_in_with_otp(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Verify a one-time code. A successful verification is followed by a
    /// `SignedIn` event on the session stream.
    fn verify_otp(
        &self,
        email: &Email,
        code: &OtpCode,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// End the provider session.
    fn sign_out(&self) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Consumer-provided profile persistence, keyed by identity id.
///
/// `Ok(None)` means "no record"; errors and slow calls are tolerated by the
/// controller during reconciliation.
pub trait ProfileStore: Send + Sync + 'static {
    fn get(
        &self,
        id: &IdentityId,
    ) -> impl Future<Output = Result<Option<Profile>, BoxError>> + Send;

    /// Create a profile from first-sign-in defaults.
    fn create(
        &self,
        defaults: NewProfile,
    ) -> impl Future<Output = Result<Option<Profile>, BoxError>> + Send;

    /// Apply a partial update. Returns the stored profile after the update.
    fn update(
        &self,
        id: &IdentityId,
        update: ProfileUpdate,
    ) -> impl Future<Output = Result<Option<Profile>, BoxError>> + Send;
}

/// Consumer-provided score persistence and ranking.
pub trait ScoreStore: Send + Sync + 'static {
    /// Persist a validated run. Backends may still refuse it (`Ok(None)`).
    fn submit(
        &self,
        submission: ScoreSubmission,
    ) -> impl Future<Output = Result<Option<StoredScore>, BoxError>> + Send;

    /// Ranked rows for a time window.
    fn leaderboard(
        &self,
        query: LeaderboardQuery,
    ) -> impl Future<Output = Result<Vec<LeaderboardEntry>, BoxError>> + Send;

    /// A player's highest stored score.
    fn personal_best(
        &self,
        id: &IdentityId,
    ) -> impl Future<Output = Result<Option<StoredScore>, BoxError>> + Send;
}
