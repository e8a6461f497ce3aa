use std::time::Duration;

use crate::error::Error;
use crate::types::Session;

/// Bound on each profile get / create / update / refresh call.
pub const DEFAULT_PROFILE_TIMEOUT: Duration = Duration::from_secs(15);
/// Bound on the start-up `current_session` probe.
pub const DEFAULT_SESSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Window in which a repeated sign-in for the same identity is ignored.
pub const DEFAULT_RECONCILE_COOLDOWN: Duration = Duration::from_secs(30);

/// What [`SessionController::can_play`](super::SessionController::can_play) requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayPolicy {
    /// Any signed-in identity may play.
    #[default]
    SignedIn,
    /// Signed in and opted in to marketing.
    SignedInWithConsent,
}

impl PlayPolicy {
    /// Whether `session` satisfies this policy.
    #[must_use]
    pub fn admits(self, session: &Session) -> bool {
        match self {
            Self::SignedIn => session.is_authenticated(),
            Self::SignedInWithConsent => {
                session.is_authenticated() && session.has_marketing_consent()
            }
        }
    }

    /// Whether satisfying this policy needs marketing consent on top of sign-in.
    #[must_use]
    pub fn requires_consent(self) -> bool {
        matches!(self, Self::SignedInWithConsent)
    }
}

impl std::str::FromStr for PlayPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed-in" | "signed_in" | "auth" => Ok(Self::SignedIn),
            "consent" | "signed-in-with-consent" => Ok(Self::SignedInWithConsent),
            other => Err(Error::Config(format!("unknown play policy {other:?}"))),
        }
    }
}

/// Session controller configuration.
///
/// Use [`from_env()`](SessionConfig::from_env) for convention-based setup,
/// or [`new()`](SessionConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) profile_timeout: Duration,
    pub(crate) session_probe_timeout: Duration,
    pub(crate) reconcile_cooldown: Duration,
    pub(crate) play_policy: PlayPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            profile_timeout: DEFAULT_PROFILE_TIMEOUT,
            session_probe_timeout: DEFAULT_SESSION_PROBE_TIMEOUT,
            reconcile_cooldown: DEFAULT_RECONCILE_COOLDOWN,
            play_policy: PlayPolicy::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `BOTTLECATCH_PROFILE_TIMEOUT_MS`: profile call bound in milliseconds
    /// - `BOTTLECATCH_SESSION_PROBE_TIMEOUT_MS`: start-up session probe bound in milliseconds
    /// - `BOTTLECATCH_RECONCILE_COOLDOWN_SECS`: repeated sign-in cooldown in seconds
    /// - `BOTTLECATCH_PLAY_POLICY`: `signed-in` or `consent`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::new();

        if let Some(ms) = lookup("BOTTLECATCH_PROFILE_TIMEOUT_MS") {
            config =
                config.with_profile_timeout(parse_millis("BOTTLECATCH_PROFILE_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("BOTTLECATCH_SESSION_PROBE_TIMEOUT_MS") {
            config = config.with_session_probe_timeout(parse_millis(
                "BOTTLECATCH_SESSION_PROBE_TIMEOUT_MS",
                &ms,
            )?);
        }
        if let Some(secs) = lookup("BOTTLECATCH_RECONCILE_COOLDOWN_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                Error::Config(format!("BOTTLECATCH_RECONCILE_COOLDOWN_SECS: {e}"))
            })?;
            config = config.with_reconcile_cooldown(Duration::from_secs(secs));
        }
        if let Some(policy) = lookup("BOTTLECATCH_PLAY_POLICY") {
            config = config.with_play_policy(policy.parse()?);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_profile_timeout(mut self, timeout: Duration) -> Self {
        self.profile_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_probe_timeout(mut self, timeout: Duration) -> Self {
        self.session_probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconcile_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconcile_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_play_policy(mut self, policy: PlayPolicy) -> Self {
        self.play_policy = policy;
        self
    }

    #[must_use]
    pub fn profile_timeout(&self) -> Duration {
        self.profile_timeout
    }

    #[must_use]
    pub fn session_probe_timeout(&self) -> Duration {
        self.session_probe_timeout
    }

    #[must_use]
    pub fn reconcile_cooldown(&self) -> Duration {
        self.reconcile_cooldown
    }

    #[must_use]
    pub fn play_policy(&self) -> PlayPolicy {
        self.play_policy
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, Error> {
    let ms: u64 = value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))?;
    if ms == 0 {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn policy_admits() {
        let signed_out = Session::signed_out();
        assert!(!PlayPolicy::SignedIn.admits(&signed_out));
        assert!(!PlayPolicy::SignedInWithConsent.admits(&signed_out));
        assert!(PlayPolicy::SignedInWithConsent.requires_consent());
        assert!(!PlayPolicy::SignedIn.requires_consent());
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.profile_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconcile_cooldown(), Duration::from_secs(30));
        assert_eq!(config.play_policy(), PlayPolicy::SignedIn);
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.session_probe_timeout(), DEFAULT_SESSION_PROBE_TIMEOUT);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("BOTTLECATCH_PROFILE_TIMEOUT_MS", "2500"),
            ("BOTTLECATCH_SESSION_PROBE_TIMEOUT_MS", "800"),
            ("BOTTLECATCH_RECONCILE_COOLDOWN_SECS", "5"),
            ("BOTTLECATCH_PLAY_POLICY", "consent"),
        ]))
        .unwrap();

        assert_eq!(config.profile_timeout(), Duration::from_millis(2500));
        assert_eq!(config.session_probe_timeout(), Duration::from_millis(800));
        assert_eq!(config.reconcile_cooldown(), Duration::from_secs(5));
        assert_eq!(config.play_policy(), PlayPolicy::SignedInWithConsent);
    }

    #[test]
    fn test_from_lookup_rejects_malformed() {
        let err = SessionConfig::from_lookup(lookup(&[("BOTTLECATCH_PROFILE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(
            SessionConfig::from_lookup(lookup(&[("BOTTLECATCH_PROFILE_TIMEOUT_MS", "0")])).is_err()
        );
        assert!(SessionConfig::from_lookup(lookup(&[("BOTTLECATCH_PLAY_POLICY", "vip")])).is_err());
    }
}
