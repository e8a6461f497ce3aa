//! In-memory backends for tests, demos and offline play.
//!
//! Each backend is a cheap `Clone` handle over shared state, so a test can
//! keep one copy for inspection and hand another to the controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use url::Url;

use crate::backend::{BoxError, IdentityClient, ProfileStore, ScoreStore};
use crate::score::{
    LeaderboardEntry, LeaderboardQuery, ScoreSubmission, StoredScore, rank_scores,
};
use crate::types::{
    Email, Identity, IdentityId, NewProfile, OtpCode, Profile, ProfileUpdate, ProviderName,
    SessionEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const AUTHORIZE_URL: &str = "https://identity.local/authorize";

// ── Identity ───────────────────────────────────────────────────────

/// Scriptable identity backend.
///
/// `emit` pushes events onto the session stream; OTP sign-in issues
/// sequential six-digit codes readable through [`issued_code`](Self::issued_code).
#[derive(Clone)]
pub struct InMemoryIdentityClient {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    current: Mutex<Option<Identity>>,
    events: broadcast::Sender<SessionEvent>,
    probe_delay: Mutex<Duration>,
    probe_fails: AtomicBool,
    sign_out_fails: AtomicBool,
    codes: Mutex<HashMap<Email, String>>,
    next_code: AtomicU64,
    probe_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl Default for InMemoryIdentityClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentityClient {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(IdentityInner {
                current: Mutex::new(None),
                events,
                probe_delay: Mutex::new(Duration::ZERO),
                probe_fails: AtomicBool::new(false),
                sign_out_fails: AtomicBool::new(false),
                codes: Mutex::new(HashMap::new()),
                next_code: AtomicU64::new(0),
                probe_calls: AtomicUsize::new(0),
                sign_out_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Pretend a session was restored from storage.
    #[must_use]
    pub fn with_stored_session(self, identity: Identity) -> Self {
        *self.inner.current.lock() = Some(identity);
        self
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.inner.probe_delay.lock() = delay;
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.inner.probe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_sign_out_fails(&self, fails: bool) {
        self.inner.sign_out_fails.store(fails, Ordering::SeqCst);
    }

    /// Deliver an event on the session stream, updating the current session to match.
    pub fn emit(&self, event: SessionEvent) {
        match &event {
            SessionEvent::SignedIn(identity) | SessionEvent::TokenRefreshed(identity) => {
                *self.inner.current.lock() = Some(identity.clone());
            }
            SessionEvent::SignedOut => *self.inner.current.lock() = None,
        }
        // No receivers is fine: nobody is listening yet.
        let _ = self.inner.events.send(event);
    }

    /// Complete a sign-in as if the user finished the provider flow.
    pub fn complete_sign_in(&self, identity: Identity) {
        self.emit(SessionEvent::SignedIn(identity));
    }

    /// Last code emailed to `email`.
    #[must_use]
    pub fn issued_code(&self, email: &Email) -> Option<String> {
        self.inner.codes.lock().get(email).cloned()
    }

    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.inner.current.lock().clone()
    }

    #[must_use]
    pub fn probe_calls(&self) -> usize {
        self.inner.probe_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.inner.sign_out_calls.load(Ordering::SeqCst)
    }
}

impl IdentityClient for InMemoryIdentityClient {
    async fn current_session(&self) -> Result<Option<Identity>, BoxError> {
        self.inner.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.probe_fails.load(Ordering::SeqCst) {
            return Err("identity backend unreachable".into());
        }
        Ok(self.inner.current.lock().clone())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    async fn sign_in_with_provider(&self, provider: &ProviderName) -> Result<Url, BoxError> {
        let mut url = Url::parse(AUTHORIZE_URL)?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("response_type", "code");
        Ok(url)
    }

    async fn sign_in_with_otp(&self, email: &Email) -> Result<(), BoxError> {
        let n = self.inner.next_code.fetch_add(1, Ordering::SeqCst);
        let code = format!("{:06}", 100_000 + n % 900_000);
        self.inner.codes.lock().insert(email.clone(), code);
        Ok(())
    }

    async fn verify_otp(&self, email: &Email, code: &OtpCode) -> Result<(), BoxError> {
        let issued = self.inner.codes.lock().remove(email);
        match issued {
            Some(expected) if expected == code.as_str() => {
                let identity =
                    Identity::new(format!("otp:{}", email.as_str())).with_email(email.as_str());
                self.complete_sign_in(identity);
                Ok(())
            }
            Some(expected) => {
                // Wrong guess keeps the code valid for another try.
                self.inner.codes.lock().insert(email.clone(), expected);
                Err("invalid one-time code".into())
            }
            None => Err("no pending one-time code".into()),
        }
    }

    async fn sign_out(&self) -> Result<(), BoxError> {
        self.inner.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.sign_out_fails.load(Ordering::SeqCst) {
            return Err("sign-out rejected".into());
        }
        self.emit(SessionEvent::SignedOut);
        Ok(())
    }
}

// ── Profiles ───────────────────────────────────────────────────────

/// Profile store operation, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileOp {
    Get,
    Create,
    Update,
}

/// HashMap-backed profile store with per-operation latency and failure switches.
#[derive(Clone, Default)]
pub struct InMemoryProfileStore {
    inner: Arc<ProfileInner>,
}

#[derive(Default)]
struct ProfileInner {
    profiles: Mutex<HashMap<IdentityId, Profile>>,
    delays: Mutex<HashMap<ProfileOp, Duration>>,
    failing: Mutex<HashMap<ProfileOp, bool>>,
    calls: Mutex<HashMap<ProfileOp, usize>>,
}

impl InMemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_profile(self, profile: Profile) -> Self {
        self.inner
            .profiles
            .lock()
            .insert(profile.id.clone(), profile);
        self
    }

    pub fn set_delay(&self, op: ProfileOp, delay: Duration) {
        self.inner.delays.lock().insert(op, delay);
    }

    pub fn set_failing(&self, op: ProfileOp, failing: bool) {
        self.inner.failing.lock().insert(op, failing);
    }

    #[must_use]
    pub fn calls(&self, op: ProfileOp) -> usize {
        self.inner.calls.lock().get(&op).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn profile(&self, id: &IdentityId) -> Option<Profile> {
        self.inner.profiles.lock().get(id).cloned()
    }

    async fn enter(&self, op: ProfileOp) -> Result<(), BoxError> {
        *self.inner.calls.lock().entry(op).or_default() += 1;
        let delay = self.inner.delays.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self.inner.failing.lock().get(&op).copied().unwrap_or(false);
        if failing {
            return Err(format!("profile store {op:?} failed").into());
        }
        Ok(())
    }
}

impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, id: &IdentityId) -> Result<Option<Profile>, BoxError> {
        self.enter(ProfileOp::Get).await?;
        Ok(self.profile(id))
    }

    async fn create(&self, defaults: NewProfile) -> Result<Option<Profile>, BoxError> {
        self.enter(ProfileOp::Create).await?;
        let mut profiles = self.inner.profiles.lock();
        let profile = profiles
            .entry(defaults.id.clone())
            .or_insert_with(|| Profile::from(defaults))
            .clone();
        Ok(Some(profile))
    }

    async fn update(
        &self,
        id: &IdentityId,
        update: ProfileUpdate,
    ) -> Result<Option<Profile>, BoxError> {
        self.enter(ProfileOp::Update).await?;
        let mut profiles = self.inner.profiles.lock();
        Ok(profiles.get_mut(id).map(|profile| {
            *profile = profile.clone().merged(&update);
            profile.clone()
        }))
    }
}

// ── Scores ─────────────────────────────────────────────────────────

/// Vec-backed score table ranked with [`rank_scores`].
#[derive(Clone, Default)]
pub struct InMemoryScoreStore {
    inner: Arc<Mutex<ScoreTable>>,
}

#[derive(Default)]
struct ScoreTable {
    rows: Vec<StoredScore>,
    next_id: u64,
}

impl InMemoryScoreStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows (e.g. yesterday's scores).
    #[must_use]
    pub fn with_scores(self, rows: impl IntoIterator<Item = StoredScore>) -> Self {
        {
            let mut table = self.inner.lock();
            for row in rows {
                table.next_id = table.next_id.max(row.id + 1);
                table.rows.push(row);
            }
        }
        self
    }

    #[must_use]
    pub fn rows(&self) -> Vec<StoredScore> {
        self.inner.lock().rows.clone()
    }
}

impl ScoreStore for InMemoryScoreStore {
    async fn submit(&self, submission: ScoreSubmission) -> Result<Option<StoredScore>, BoxError> {
        // Rows can arrive deserialized; re-check the bounds the constructor enforces.
        let checked = ScoreSubmission::new(
            submission.identity_id,
            submission.nickname,
            submission.score,
            submission.duration_seconds,
        );
        let Ok(submission) = checked else {
            return Ok(None);
        };

        let mut table = self.inner.lock();
        let id = table.next_id;
        table.next_id += 1;
        let row = StoredScore::new(id, submission, OffsetDateTime::now_utc());
        table.rows.push(row.clone());
        Ok(Some(row))
    }

    async fn leaderboard(
        &self,
        query: LeaderboardQuery,
    ) -> Result<Vec<LeaderboardEntry>, BoxError> {
        let table = self.inner.lock();
        Ok(rank_scores(&table.rows, query, OffsetDateTime::now_utc()))
    }

    async fn personal_best(&self, id: &IdentityId) -> Result<Option<StoredScore>, BoxError> {
        let table = self.inner.lock();
        Ok(table
            .rows
            .iter()
            .filter(|row| &row.identity_id == id)
            .max_by(|a, b| a.score.cmp(&b.score).then(b.created_at.cmp(&a.created_at)))
            .cloned())
    }
}
