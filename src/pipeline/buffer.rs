//! Per-speaker stream buffer station.
//!
//! Accumulates decoded 16kHz samples for one speaker and emits chunks when:
//! - the configured chunk duration has accumulated, or
//! - a silence gap closes the utterance early (flush-on-silence), bounding
//!   end-to-end latency for short utterances.
//!
//! Callers supply the current `Instant`, which keeps the silence logic
//! deterministic under test.

use crate::defaults;
use crate::pipeline::frame::PcmChunk;
use crate::transport::SpeakerId;
use std::time::Instant;

/// Configuration for the stream buffer.
#[derive(Debug, Clone)]
pub struct StreamBufferConfig {
    /// Target chunk duration in milliseconds.
    pub chunk_duration_ms: u32,
    /// Minimum accumulated audio before a silence gap may flush.
    pub min_chunk_ms: u32,
    /// Silence gap that closes an utterance, in milliseconds.
    pub silence_flush_ms: u32,
    /// Sample rate for duration calculations.
    pub sample_rate: u32,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: defaults::CHUNK_DURATION_MS,
            min_chunk_ms: defaults::MIN_CHUNK_MS,
            silence_flush_ms: defaults::SILENCE_FLUSH_MS,
            sample_rate: defaults::RECOGNIZER_SAMPLE_RATE,
        }
    }
}

/// Result of a silence check.
#[derive(Debug)]
pub enum SilenceOutcome {
    /// Nothing to do.
    None,
    /// The silence gap closed the utterance; feed this chunk and finalize.
    Chunk(PcmChunk),
    /// The utterance is over but all audio was already emitted; finalize
    /// the recognizer without feeding more samples.
    CloseUtterance,
}

/// Accumulation window for one speaker's decoded audio.
pub struct StreamBuffer {
    speaker: SpeakerId,
    config: StreamBufferConfig,
    samples: Vec<i16>,
    chunk_started_at: Option<Instant>,
    last_push: Option<Instant>,
    last_activity: Instant,
    /// True from the first pushed sample until an end-of-utterance emit.
    utterance_open: bool,
}

impl StreamBuffer {
    /// Creates a buffer with default configuration.
    pub fn new(speaker: SpeakerId, now: Instant) -> Self {
        Self::with_config(speaker, StreamBufferConfig::default(), now)
    }

    /// Creates a buffer with custom configuration.
    pub fn with_config(speaker: SpeakerId, config: StreamBufferConfig, now: Instant) -> Self {
        Self {
            speaker,
            config,
            samples: Vec::new(),
            chunk_started_at: None,
            last_push: None,
            last_activity: now,
            utterance_open: false,
        }
    }

    /// Returns the buffered duration in milliseconds.
    pub fn buffered_ms(&self) -> u32 {
        (self.samples.len() as u32 * 1000) / self.config.sample_rate
    }

    /// When this speaker last produced audio.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// True when no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True while an utterance awaits its end-of-utterance emit.
    pub fn utterance_open(&self) -> bool {
        self.utterance_open
    }

    fn samples_for_ms(&self, ms: u32) -> usize {
        (ms as usize * self.config.sample_rate as usize) / 1000
    }

    /// Adds a decoded fragment; emits a chunk once the duration threshold
    /// is reached.
    pub fn push(&mut self, fragment: &[i16], now: Instant) -> Option<PcmChunk> {
        if fragment.is_empty() {
            return None;
        }

        if self.samples.is_empty() {
            self.chunk_started_at = Some(now);
        }
        self.samples.extend_from_slice(fragment);
        self.last_push = Some(now);
        self.last_activity = now;
        self.utterance_open = true;

        if self.samples.len() >= self.samples_for_ms(self.config.chunk_duration_ms) {
            return self.emit(false, now);
        }
        None
    }

    /// Checks whether the silence gap has closed the current utterance.
    pub fn poll_silence(&mut self, now: Instant) -> SilenceOutcome {
        if !self.utterance_open {
            return SilenceOutcome::None;
        }
        let Some(last_push) = self.last_push else {
            return SilenceOutcome::None;
        };
        let gap_ms = now.duration_since(last_push).as_millis() as u64;
        if gap_ms < self.config.silence_flush_ms as u64 {
            return SilenceOutcome::None;
        }

        if self.samples.is_empty() {
            self.utterance_open = false;
            return SilenceOutcome::CloseUtterance;
        }

        // A tail shorter than the minimum keeps waiting; it is flushed at
        // teardown or merges with the speaker's next audio.
        if self.buffered_ms() < self.config.min_chunk_ms {
            return SilenceOutcome::None;
        }

        match self.emit(true, now) {
            Some(chunk) => SilenceOutcome::Chunk(chunk),
            None => SilenceOutcome::None,
        }
    }

    /// Forces out whatever is buffered as an end-of-utterance chunk.
    ///
    /// Returns the chunk, or `None` when the buffer holds nothing; the
    /// caller still finalizes an open utterance.
    pub fn flush(&mut self, now: Instant) -> Option<PcmChunk> {
        let chunk = self.emit(true, now);
        self.utterance_open = false;
        chunk
    }

    fn emit(&mut self, end_of_utterance: bool, now: Instant) -> Option<PcmChunk> {
        if self.samples.is_empty() {
            return None;
        }

        let chunk = PcmChunk {
            speaker: self.speaker,
            started_at: self.chunk_started_at.unwrap_or(now),
            sample_rate: self.config.sample_rate,
            samples: std::mem::take(&mut self.samples),
            end_of_utterance,
        };
        self.chunk_started_at = None;
        if end_of_utterance {
            self.utterance_open = false;
        }
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> StreamBufferConfig {
        StreamBufferConfig {
            chunk_duration_ms: 300,
            min_chunk_ms: 100,
            silence_flush_ms: 700,
            sample_rate: 16_000,
        }
    }

    fn make_buffer(now: Instant) -> StreamBuffer {
        StreamBuffer::with_config(SpeakerId(1), test_config(), now)
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_accumulates_below_threshold() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        // 100ms of audio, below the 300ms threshold.
        assert!(buffer.push(&vec![100i16; 1600], t0).is_none());
        assert_eq!(buffer.buffered_ms(), 100);
        assert!(buffer.utterance_open());
    }

    #[test]
    fn test_emits_on_duration_threshold() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        buffer.push(&vec![100i16; 1600], t0);
        buffer.push(&vec![100i16; 1600], t0 + ms(100));
        let chunk = buffer.push(&vec![100i16; 1600], t0 + ms(200)).unwrap();

        assert_eq!(chunk.samples.len(), 4800);
        assert_eq!(chunk.duration_ms(), 300);
        assert!(!chunk.end_of_utterance);
        assert_eq!(chunk.started_at, t0);
        assert!(buffer.is_empty());
        // The utterance continues past a duration-triggered chunk.
        assert!(buffer.utterance_open());
    }

    #[test]
    fn test_silence_flushes_short_utterance() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        // 150ms of audio, then 800ms of silence.
        buffer.push(&vec![100i16; 2400], t0);

        match buffer.poll_silence(t0 + ms(800)) {
            SilenceOutcome::Chunk(chunk) => {
                assert_eq!(chunk.duration_ms(), 150);
                assert!(chunk.end_of_utterance);
            }
            other => panic!("Expected chunk, got {:?}", other),
        }
        assert!(!buffer.utterance_open());
    }

    #[test]
    fn test_silence_below_threshold_keeps_buffering() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        buffer.push(&vec![100i16; 2400], t0);

        // 600ms gap is below the 700ms threshold.
        assert!(matches!(
            buffer.poll_silence(t0 + ms(600)),
            SilenceOutcome::None
        ));
        assert_eq!(buffer.buffered_ms(), 150);
    }

    #[test]
    fn test_silence_with_empty_buffer_closes_utterance() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        // Exactly one full chunk: emitted by duration, buffer left empty.
        let chunk = buffer.push(&vec![100i16; 4800], t0).unwrap();
        assert!(!chunk.end_of_utterance);
        assert!(buffer.is_empty());

        match buffer.poll_silence(t0 + ms(800)) {
            SilenceOutcome::CloseUtterance => {}
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(!buffer.utterance_open());

        // Idempotent: the closed utterance does not close twice.
        assert!(matches!(
            buffer.poll_silence(t0 + ms(1600)),
            SilenceOutcome::None
        ));
    }

    #[test]
    fn test_tail_below_min_chunk_waits() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        // 50ms tail, below the 100ms minimum.
        buffer.push(&vec![100i16; 800], t0);
        assert!(matches!(
            buffer.poll_silence(t0 + ms(800)),
            SilenceOutcome::None
        ));
        assert_eq!(buffer.buffered_ms(), 50);
    }

    #[test]
    fn test_flush_forces_end_of_utterance() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        // Even a 50ms tail comes out on a forced flush.
        buffer.push(&vec![100i16; 800], t0);
        let chunk = buffer.flush(t0 + ms(50)).unwrap();

        assert_eq!(chunk.duration_ms(), 50);
        assert!(chunk.end_of_utterance);
        assert!(buffer.is_empty());
        assert!(!buffer.utterance_open());
    }

    #[test]
    fn test_flush_empty_buffer_returns_none() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);
        assert!(buffer.flush(t0).is_none());
    }

    #[test]
    fn test_last_activity_tracks_pushes() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);
        assert_eq!(buffer.last_activity(), t0);

        buffer.push(&vec![100i16; 160], t0 + ms(500));
        assert_eq!(buffer.last_activity(), t0 + ms(500));
    }

    #[test]
    fn test_empty_fragment_ignored() {
        let t0 = Instant::now();
        let mut buffer = make_buffer(t0);

        assert!(buffer.push(&[], t0).is_none());
        assert!(!buffer.utterance_open());
        assert_eq!(buffer.last_activity(), t0);
    }
}
