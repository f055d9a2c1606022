//! Data types flowing between pipeline stations.

use crate::transport::SpeakerId;
use std::time::Instant;

/// A block of decoded PCM ready for the recognizer, from one speaker.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Speaker the audio belongs to.
    pub speaker: SpeakerId,
    /// When the first sample of this chunk was buffered.
    pub started_at: Instant,
    /// Sample rate of the samples.
    pub sample_rate: u32,
    /// Mono PCM samples.
    pub samples: Vec<i16>,
    /// True when a silence gap or teardown closed the utterance with this
    /// chunk; the worker finalizes the recognizer after feeding it.
    pub end_of_utterance: bool,
}

impl PcmChunk {
    /// Returns the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u32 * 1000) / self.sample_rate
    }
}

/// One recognition result attributed to a speaker.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Speaker the text belongs to.
    pub speaker: SpeakerId,
    /// Display label for the speaker.
    pub speaker_label: String,
    /// Recognized text.
    pub text: String,
    /// True for stable end-of-utterance results; partials may be revised.
    pub is_final: bool,
    /// When the recognizer emitted this result.
    pub emitted_at: Instant,
}

impl Hypothesis {
    /// Creates a partial hypothesis stamped now.
    pub fn partial(speaker: SpeakerId, label: &str, text: String) -> Self {
        Self {
            speaker,
            speaker_label: label.to_string(),
            text,
            is_final: false,
            emitted_at: Instant::now(),
        }
    }

    /// Creates a final hypothesis stamped now.
    pub fn finalized(speaker: SpeakerId, label: &str, text: String) -> Self {
        Self {
            speaker,
            speaker_label: label.to_string(),
            text,
            is_final: true,
            emitted_at: Instant::now(),
        }
    }
}

/// One formatted line queued for the text-output sink.
#[derive(Debug, Clone)]
pub struct OutputLine {
    /// Speaker the line belongs to.
    pub speaker: SpeakerId,
    /// Formatted text, `{speaker_label}: {text}`.
    pub text: String,
    /// True when derived from a final hypothesis; such lines are never
    /// dropped under queue overflow.
    pub from_final: bool,
    /// Emission time of the underlying hypothesis.
    pub emitted_at: Instant,
}
