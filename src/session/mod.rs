//! Session lifecycle: `Idle → Joined → Transcribing → Joined → Idle`.
//!
//! The [`SessionRegistry`] is the public command surface; each live session
//! runs as a driver task owning its transport subscription, speaker map and
//! pipeline resources.

pub mod registry;
pub mod session;

pub use registry::{OwnerId, SessionEndReason, SessionNotice, SessionRegistry};
pub use session::SessionState;
