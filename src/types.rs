use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;
use crate::validate;

/// Identity backend user identifier (opaque string).
///
/// Assigned by the identity provider and used as the profile and score key.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Signed-in identity as reported by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Identity {
    pub id: IdentityId,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity with only the required `id`.
    #[must_use]
    pub fn new(id: impl Into<IdentityId>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Validated leaderboard nickname.
///
/// Guaranteed valid by construction: holding a `Nickname` proves the format is correct.
/// Use `"bottle_king".parse::<Nickname>()` or `Nickname::try_from(string)` to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nickname(String);

impl Nickname {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Nickname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Nickname {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Nickname {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if validate::is_valid_nickname(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidNickname(s))
        }
    }
}

impl From<Nickname> for String {
    fn from(n: Nickname) -> Self {
        n.0
    }
}

/// Validated email address for one-time-code sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Email {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let s = s.trim().to_ascii_lowercase();
        if validate::is_valid_email(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidEmail(s))
        }
    }
}

impl From<Email> for String {
    fn from(e: Email) -> Self {
        e.0
    }
}

/// Six-digit one-time code typed by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Codes are credentials; keep them out of logs.
impl std::fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OtpCode(******)")
    }
}

impl std::str::FromStr for OtpCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if validate::is_valid_otp_code(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(Error::InvalidOtpCode)
        }
    }
}

/// OAuth provider identifier understood by the identity backend (`"google"`, `"discord"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderName(String);

impl ProviderName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for ProviderName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let valid = !s.is_empty()
            && s
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if valid {
            Ok(Self(s))
        } else {
            Err(Error::InvalidProvider(s))
        }
    }
}

impl From<ProviderName> for String {
    fn from(p: ProviderName) -> Self {
        p.0
    }
}

/// Player profile record, keyed by identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Profile {
    pub id: IdentityId,
    #[serde(default)]
    pub nickname: Option<Nickname>,
    #[serde(default)]
    pub marketing_consent: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub consent_timestamp: Option<OffsetDateTime>,
}

impl Profile {
    /// Create a profile with no nickname and no consent.
    #[must_use]
    pub fn new(id: impl Into<IdentityId>) -> Self {
        Self {
            id: id.into(),
            nickname: None,
            marketing_consent: false,
            consent_timestamp: None,
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: Nickname) -> Self {
        self.nickname = Some(nickname);
        self
    }

    #[must_use]
    pub fn with_marketing_consent(mut self, granted: bool, at: Option<OffsetDateTime>) -> Self {
        self.marketing_consent = granted;
        self.consent_timestamp = at;
        self
    }

    /// Apply a partial update, as a profile store would.
    #[must_use]
    pub fn merged(mut self, update: &ProfileUpdate) -> Self {
        if let Some(nickname) = &update.nickname {
            self.nickname = Some(nickname.clone());
        }
        if let Some(granted) = update.marketing_consent {
            self.marketing_consent = granted;
        }
        if let Some(at) = update.consent_timestamp {
            self.consent_timestamp = at;
        }
        self
    }
}

/// Defaults for a profile created on first sign-in.
///
/// Passed to [`ProfileStore::create`](crate::backend::ProfileStore::create).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct NewProfile {
    pub id: IdentityId,
    /// Email at creation time (transient, for backends that want a contact column).
    pub email: Option<String>,
    pub nickname: Option<Nickname>,
    pub marketing_consent: bool,
}

impl From<&Identity> for NewProfile {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            nickname: None,
            marketing_consent: false,
        }
    }
}

impl From<NewProfile> for Profile {
    fn from(p: NewProfile) -> Self {
        Self {
            id: p.id,
            nickname: p.nickname,
            marketing_consent: p.marketing_consent,
            consent_timestamp: None,
        }
    }
}

/// Partial profile update; `None` fields are left untouched.
///
/// `consent_timestamp` is doubly optional: `Some(None)` clears the stored timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ProfileUpdate {
    pub nickname: Option<Nickname>,
    pub marketing_consent: Option<bool>,
    pub consent_timestamp: Option<Option<OffsetDateTime>>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: Nickname) -> Self {
        self.nickname = Some(nickname);
        self
    }

    #[must_use]
    pub fn with_marketing_consent(mut self, granted: bool) -> Self {
        self.marketing_consent = Some(granted);
        self
    }

    #[must_use]
    pub fn with_consent_timestamp(mut self, at: OffsetDateTime) -> Self {
        self.consent_timestamp = Some(Some(at));
        self
    }

    /// Record newsletter opt-in at `at`.
    #[must_use]
    pub fn grant_consent(at: OffsetDateTime) -> Self {
        Self::new()
            .with_marketing_consent(true)
            .with_consent_timestamp(at)
    }

    /// Record newsletter opt-out and clear the timestamp.
    #[must_use]
    pub fn withdraw_consent() -> Self {
        Self {
            marketing_consent: Some(false),
            consent_timestamp: Some(None),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Immutable snapshot of the sign-in / profile / consent state.
///
/// Returned by [`SessionController::state`](crate::SessionController::state)
/// and handed to subscribers. Mutating a snapshot never affects the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Option<Identity>,
    profile: Option<Profile>,
    is_loading: bool,
}

impl Session {
    /// State before the first reconciliation has completed.
    pub(crate) fn loading() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: true,
        }
    }

    /// Signed-out defaults.
    pub(crate) fn signed_out() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: false,
        }
    }

    /// Record the identity. Drops a profile that belongs to someone else.
    pub(crate) fn set_identity(&mut self, identity: Identity) {
        if self.profile.as_ref().is_some_and(|p| p.id != identity.id) {
            self.profile = None;
        }
        self.identity = Some(identity);
    }

    /// Store a profile for the current identity. Ignored when it does not match.
    pub(crate) fn set_profile(&mut self, profile: Option<Profile>) -> bool {
        let matches = match (&self.identity, &profile) {
            (Some(identity), Some(p)) => identity.id == p.id,
            (_, None) => true,
            (None, Some(_)) => false,
        };
        if matches {
            self.profile = profile;
        }
        matches
    }

    pub(crate) fn finish_loading(&mut self) {
        self.is_loading = false;
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.is_loading
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn has_marketing_consent(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| p.marketing_consent)
    }

    #[must_use]
    pub fn nickname(&self) -> Option<&Nickname> {
        self.profile.as_ref().and_then(|p| p.nickname.as_ref())
    }
}

/// JSON shape handed to the UI layer, derived flags included.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView<'a> {
    user: Option<&'a Identity>,
    profile: Option<&'a Profile>,
    is_loading: bool,
    is_authenticated: bool,
    has_marketing_consent: bool,
}

impl Serialize for Session {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SessionView {
            user: self.identity.as_ref(),
            profile: self.profile.as_ref(),
            is_loading: self.is_loading,
            is_authenticated: self.is_authenticated(),
            has_marketing_consent: self.has_marketing_consent(),
        }
        .serialize(serializer)
    }
}

/// Event delivered by the identity backend's session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut,
    TokenRefreshed(Identity),
}

/// Outcome of a bounded readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Authenticated,
    NeedsLogin,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_parse() {
        assert!("bottle_king".parse::<Nickname>().is_ok());
        assert!(matches!(
            "no way".parse::<Nickname>(),
            Err(Error::InvalidNickname(_))
        ));
    }

    #[test]
    fn nickname_serde_rejects_invalid() {
        let nick: Nickname = serde_json::from_str("\"catcher\"").unwrap();
        assert_eq!(nick.as_str(), "catcher");
        assert!(serde_json::from_str::<Nickname>("\"x\"").is_err());
    }

    #[test]
    fn email_normalized() {
        let email: Email = "  A@B.Com ".parse().unwrap();
        assert_eq!(email.as_str(), "a@b.com");
        assert!("not-an-email".parse::<Email>().is_err());
    }

    #[test]
    fn otp_code_debug_is_redacted() {
        let code: OtpCode = "123456".parse().unwrap();
        assert_eq!(format!("{code:?}"), "OtpCode(******)");
        assert!("12345".parse::<OtpCode>().is_err());
    }

    #[test]
    fn provider_name_lowercase_only() {
        assert!("google".parse::<ProviderName>().is_ok());
        assert!("Google".parse::<ProviderName>().is_err());
        assert!("".parse::<ProviderName>().is_err());
    }

    #[test]
    fn identity_id_from_str() {
        let id = IdentityId::from("u1");
        assert_eq!(id.to_string(), "u1");
    }

    #[test]
    fn profile_merge_partial() {
        let at = time::macros::datetime!(2026-01-02 03:04:05 UTC);
        let profile = Profile::new("u1")
            .merged(&ProfileUpdate::grant_consent(at))
            .merged(&ProfileUpdate::new().with_nickname("catcher".parse().unwrap()));
        assert!(profile.marketing_consent);
        assert_eq!(profile.consent_timestamp, Some(at));
        assert_eq!(profile.nickname.unwrap().as_str(), "catcher");

        let withdrawn = Profile::new("u1")
            .with_marketing_consent(true, Some(at))
            .merged(&ProfileUpdate::withdraw_consent());
        assert!(!withdrawn.marketing_consent);
        assert_eq!(withdrawn.consent_timestamp, None);
    }

    #[test]
    fn profile_update_is_empty() {
        assert!(ProfileUpdate::new().is_empty());
        assert!(!ProfileUpdate::new().with_marketing_consent(false).is_empty());
    }

    #[test]
    fn session_drops_foreign_profile_on_identity_change() {
        let mut session = Session::signed_out();
        session.set_identity(Identity::new("u1"));
        assert!(session.set_profile(Some(Profile::new("u1"))));
        session.set_identity(Identity::new("u2"));
        assert!(session.profile().is_none());
        assert!(!session.set_profile(Some(Profile::new("u1"))));
        assert!(session.profile().is_none());
    }

    #[test]
    fn session_without_identity_rejects_profile() {
        let mut session = Session::loading();
        assert!(!session.set_profile(Some(Profile::new("u1"))));
        assert!(!session.is_authenticated());
        assert!(session.profile().is_none());
    }

    #[test]
    fn session_serializes_derived_flags() {
        let mut session = Session::loading();
        session.set_identity(Identity::new("u1").with_email("a@b.com"));
        session.set_profile(Some(Profile::new("u1").with_marketing_consent(true, None)));
        session.finish_loading();

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["isAuthenticated"], true);
        assert_eq!(json["hasMarketingConsent"], true);
        assert_eq!(json["isLoading"], false);
        assert_eq!(json["user"]["id"], "u1");
    }
}
