#![doc = include_str!("../README.md")]

pub mod arcade;
pub mod backend;
pub mod error;
pub mod flow;
#[cfg(feature = "memory")]
pub mod memory;
pub mod score;
pub mod session;
pub mod types;
pub mod validate;

// Re-exports for convenient access
pub use arcade::{ArcadeGate, ScoreReceipt};
pub use backend::{BoxError, IdentityClient, ProfileStore, ScoreStore};
pub use error::Error;
pub use flow::{
    GuardedActionFlow, SignInSurface, SurfaceOutcome, check_with_timeout, wait_until_ready,
};
pub use score::{
    LeaderboardEntry, LeaderboardQuery, LeaderboardWindow, ScoreSubmission, StoredScore,
    rank_scores,
};
pub use session::{PlayPolicy, SessionConfig, SessionController, Subscription};
pub use types::{
    Email, GateDecision, Identity, IdentityId, NewProfile, Nickname, OtpCode, Profile,
    ProfileUpdate, ProviderName, Session, SessionEvent,
};
pub use validate::{is_valid_email, is_valid_nickname, is_valid_otp_code};
