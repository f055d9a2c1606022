//! Default configuration constants for voxscribe.
//!
//! Shared constants used across configuration types to keep the pipeline,
//! session and output layers in agreement about timings and formats.

use std::time::Duration;

/// Sample rate of audio arriving from the voice transport, in Hz.
///
/// Group voice transports carry Opus at 48kHz; the frame decoder expects
/// this rate on its input side.
pub const SOURCE_SAMPLE_RATE: u32 = 48_000;

/// Sample rate fed to the recognition engine, in Hz.
///
/// 16kHz mono is the standard input format for offline speech recognizers.
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

/// Nominal duration of one voice frame in milliseconds.
///
/// Opus voice frames are 20ms; gap concealment synthesizes silence in
/// multiples of this.
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per nominal frame at the source rate (20ms at 48kHz).
pub const FRAME_SAMPLES: usize = 960;

/// Maximum number of missing frames concealed as silence per sequence gap.
///
/// A longer outage is treated as a fresh start rather than feeding the
/// recognizer seconds of synthesized silence.
pub const MAX_CONCEALED_FRAMES: u64 = 10;

/// Default chunk duration in milliseconds.
///
/// 300ms balances recognition latency against per-call overhead in the
/// streaming decoder.
pub const CHUNK_DURATION_MS: u32 = 300;

/// Minimum accumulated audio before a silence gap may flush a chunk.
///
/// Prevents flushing fragments too short for the recognizer to act on.
pub const MIN_CHUNK_MS: u32 = 100;

/// Silence gap in milliseconds that closes an utterance early.
///
/// 700ms covers natural inter-word pauses while keeping end-of-utterance
/// latency low for short replies.
pub const SILENCE_FLUSH_MS: u32 = 700;

/// How long a speaker may stay silent before their stream is evicted.
///
/// Eviction releases the recognizer handle; the stream is recreated on the
/// speaker's next frame.
pub const IDLE_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval at which the session reaper scans for idle speaker streams.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Interval at which workers check their buffer for a silence flush.
pub const SILENCE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the per-speaker frame channel.
///
/// Roughly two seconds of 20ms frames; a worker that falls further behind
/// sheds frames instead of blocking ingestion.
pub const WORKER_QUEUE_CAPACITY: usize = 100;

/// Capacity of the aggregator's outgoing line queue.
pub const OUTPUT_QUEUE_CAPACITY: usize = 64;

/// Minimum interval between posts to the text-output sink.
pub const MIN_POST_INTERVAL: Duration = Duration::from_millis(1000);

/// Minimum length in characters before a partial hypothesis is surfaced.
///
/// Shorter partials churn too quickly to be worth a line edit.
pub const MIN_PARTIAL_CHARS: usize = 10;
