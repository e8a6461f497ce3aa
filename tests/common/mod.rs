//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use bottlecatch_session::memory::{InMemoryIdentityClient, InMemoryProfileStore};
use bottlecatch_session::{
    Identity, Profile, Session, SessionConfig, SessionController, SignInSurface, SurfaceOutcome,
};

pub type Controller = SessionController<InMemoryIdentityClient, InMemoryProfileStore>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned reconciliation tasks run. In-memory calls without injected
/// latency finish well inside this window.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

pub fn u1() -> Identity {
    Identity::new("u1").with_email("a@b.com")
}

pub fn consenting_profile(id: &str) -> Profile {
    Profile::new(id).with_marketing_consent(true, None)
}

pub fn start(client: &InMemoryIdentityClient, store: &InMemoryProfileStore) -> Arc<Controller> {
    start_with(client, store, SessionConfig::new())
}

pub fn start_with(
    client: &InMemoryIdentityClient,
    store: &InMemoryProfileStore,
    config: SessionConfig,
) -> Arc<Controller> {
    init_tracing();
    SessionController::start(client.clone(), store.clone(), config)
}

/// Every snapshot a controller publishes, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Session>>>,
}

impl Recorder {
    pub fn listener(&self) -> impl Fn(&Session) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |s: &Session| seen.lock().push(s.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn snapshots(&self) -> Vec<Session> {
        self.seen.lock().clone()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// Sign-in and consent modals driven by a script instead of a user.
#[derive(Clone)]
pub struct ScriptedSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    client: InMemoryIdentityClient,
    sign_in_as: Mutex<Option<Identity>>,
    consent: Mutex<SurfaceOutcome>,
    sign_in_shown: AtomicUsize,
    consent_shown: AtomicUsize,
}

impl ScriptedSurface {
    /// A surface whose user closes every modal without acting.
    pub fn dismissing(client: &InMemoryIdentityClient) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                client: client.clone(),
                sign_in_as: Mutex::new(None),
                consent: Mutex::new(SurfaceOutcome::Dismissed),
                sign_in_shown: AtomicUsize::new(0),
                consent_shown: AtomicUsize::new(0),
            }),
        }
    }

    /// The user completes sign-in as `identity`.
    pub fn signing_in_as(self, identity: Identity) -> Self {
        *self.inner.sign_in_as.lock() = Some(identity);
        self
    }

    /// The user ticks the consent box.
    pub fn consenting(self) -> Self {
        *self.inner.consent.lock() = SurfaceOutcome::Completed;
        self
    }

    pub fn sign_in_shown(&self) -> usize {
        self.inner.sign_in_shown.load(Ordering::SeqCst)
    }

    pub fn consent_shown(&self) -> usize {
        self.inner.consent_shown.load(Ordering::SeqCst)
    }
}

impl SignInSurface for ScriptedSurface {
    async fn show_sign_in(&self) -> SurfaceOutcome {
        self.inner.sign_in_shown.fetch_add(1, Ordering::SeqCst);
        let identity = self.inner.sign_in_as.lock().clone();
        match identity {
            Some(identity) => {
                self.inner.client.complete_sign_in(identity);
                SurfaceOutcome::Completed
            }
            None => SurfaceOutcome::Dismissed,
        }
    }

    async fn show_consent(&self) -> SurfaceOutcome {
        self.inner.consent_shown.fetch_add(1, Ordering::SeqCst);
        *self.inner.consent.lock()
    }
}
