//! voxscribe - Live multi-speaker voice-channel transcription
//!
//! Joins a group voice channel, decodes each participant's audio stream
//! independently, runs it through a streaming recognizer, and posts
//! speaker-attributed lines of text to an output sink. The voice transport,
//! the recognition engine and the text destination plug in through traits;
//! the [`SessionRegistry`] is the command surface.

// Error handling discipline: library code propagates, never panics.
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod recognizer;
pub mod session;
pub mod sink;
pub mod transport;

// External collaborator traits (transport → recognize → sink)
pub use recognizer::{MockRecognizer, MockRecognizerFactory, Recognition, RecognizerFactory, StreamingRecognizer};
pub use sink::{CollectorSink, PostOutcome, StdoutSink, TranscriptSink};
pub use transport::{ChannelId, ChannelTransport, SpeakerId, TransportEvent, VoiceFrame, VoiceTransport};

// Session command surface
pub use session::{OwnerId, SessionEndReason, SessionNotice, SessionRegistry, SessionState};

// Pipeline data types (for custom sinks and embedders)
pub use pipeline::frame::{Hypothesis, OutputLine, PcmChunk};

// Error handling
pub use error::{Result, VoxscribeError};

// Config
pub use config::Config;
