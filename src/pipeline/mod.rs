//! Audio-to-text pipeline stations.
//!
//! Audio flows through per-speaker stations into one shared output path:
//!
//! ```text
//! transport frames (per speaker)
//!     │
//!     ▼
//! FrameDecoder ──► StreamBuffer ──► SpeakerWorker (recognize)
//!     │                                   │ hypotheses
//!     ▼                                   ▼
//!   (one chain per speaker)      TranscriptAggregator ──► TranscriptSink
//! ```
//!
//! Each station is a struct with synchronous processing methods; the worker
//! and aggregator add `async fn run` loops connected by bounded channels.
//! Everything up to the aggregator is per speaker, so recognizer state is
//! never shared across streams.

pub mod aggregator;
pub mod buffer;
pub mod decoder;
pub mod frame;
pub mod worker;

pub use aggregator::{AggregatorConfig, TranscriptAggregator};
pub use buffer::{SilenceOutcome, StreamBuffer, StreamBufferConfig};
pub use decoder::FrameDecoder;
pub use frame::{Hypothesis, OutputLine, PcmChunk};
pub use worker::{SpeakerWorker, WorkerCommand, WorkerConfig, WorkerHandle};
