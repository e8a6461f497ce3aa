//! Session state machine.
//!
//! [`SessionController`] owns the signed-in identity, the player's profile and
//! their marketing consent, and publishes [`Session`](crate::Session)
//! snapshots to subscribers. Identity backends emit repeated sign-in events
//! (token refreshes, tab focus); the controller admits one reconciliation at
//! a time and ignores a repeat for the same identity within the configured
//! cooldown.

mod config;
mod controller;
mod guard;
mod listeners;

pub use config::{
    DEFAULT_PROFILE_TIMEOUT, DEFAULT_RECONCILE_COOLDOWN, DEFAULT_SESSION_PROBE_TIMEOUT,
    PlayPolicy, SessionConfig,
};
pub use controller::SessionController;
pub use listeners::Subscription;
