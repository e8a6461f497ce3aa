//! Consumer-implemented backends the session core talks to.
//!
//! The identity provider, the profile table and the score table live outside
//! this crate. Implement [`IdentityClient`], [`ProfileStore`] and
//! [`ScoreStore`] for your backend and hand them to
//! [`SessionController::start`](crate::SessionController::start) and
//! [`ArcadeGate::new`](crate::ArcadeGate::new).

mod dyn_store;
mod traits;

pub(crate) use dyn_store::ScoreStoreDyn;
pub use traits::{IdentityClient, ProfileStore, ScoreStore};

/// Error type returned by consumer backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
