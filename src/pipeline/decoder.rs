//! Frame decoder station.
//!
//! Converts one speaker's compressed voice frames into 16kHz mono PCM:
//! Opus decode at the transport's native 48kHz, sequence-gap concealment
//! with synthesized silence, then deterministic FFT resampling. One decoder
//! instance per speaker stream; frames must arrive in non-decreasing
//! sequence order.

use crate::defaults;
use crate::error::{Result, VoxscribeError};
use crate::transport::VoiceFrame;
use audiopus::coder::{Decoder as OpusDecoder, GenericCtl};
use audiopus::packet::Packet;
use audiopus::{Channels, MutSignals, SampleRate};
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, trace};

/// Resampling input chunk: one nominal 20ms frame at 48kHz, so every frame
/// yields exactly `FRAME_SAMPLES / 3` output samples and output length is
/// reproducible for identical input.
const RESAMPLE_CHUNK: usize = defaults::FRAME_SAMPLES;

/// Largest Opus frame: 120ms at 48kHz.
const MAX_OPUS_SAMPLES: usize = 5760;

fn decode_error(message: impl ToString) -> VoxscribeError {
    VoxscribeError::Decode {
        message: message.to_string(),
    }
}

/// Deterministic 48kHz → 16kHz mono resampler.
struct FrameResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
}

impl FrameResampler {
    fn new() -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            defaults::SOURCE_SAMPLE_RATE as usize,
            defaults::RECOGNIZER_SAMPLE_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(decode_error)?;

        Ok(Self {
            resampler,
            input_buffer: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Resamples 48kHz samples, returning whatever complete output the
    /// accumulated input allows.
    fn resample(&mut self, input: &[i16]) -> Result<Vec<i16>> {
        for &sample in input {
            self.input_buffer.push(sample as f32 / 32768.0);
        }

        let mut output = Vec::new();
        while self.input_buffer.len() >= RESAMPLE_CHUNK {
            let chunk: Vec<f32> = self.input_buffer.drain(..RESAMPLE_CHUNK).collect();
            let resampled = self.resampler.process(&[chunk], None).map_err(decode_error)?;
            for &sample in &resampled[0] {
                let clamped = sample.clamp(-1.0, 1.0);
                output.push((clamped * 32767.0) as i16);
            }
        }

        trace!(input = input.len(), output = output.len(), "resampled");
        Ok(output)
    }

    /// Flushes buffered input by padding to a full chunk.
    fn flush(&mut self) -> Result<Vec<i16>> {
        if self.input_buffer.is_empty() {
            return Ok(Vec::new());
        }

        self.input_buffer.resize(RESAMPLE_CHUNK, 0.0);
        let chunk: Vec<f32> = self.input_buffer.drain(..).collect();
        let resampled = self.resampler.process(&[chunk], None).map_err(decode_error)?;

        let mut output = Vec::with_capacity(resampled[0].len());
        for &sample in &resampled[0] {
            let clamped = sample.clamp(-1.0, 1.0);
            output.push((clamped * 32767.0) as i16);
        }
        Ok(output)
    }

    fn reset(&mut self) {
        self.input_buffer.clear();
        self.resampler.reset();
    }
}

/// Per-speaker frame decoder: Opus → 16kHz mono PCM with gap concealment.
pub struct FrameDecoder {
    opus: OpusDecoder,
    resampler: FrameResampler,
    decode_buffer: Vec<i16>,
    last_sequence: Option<u64>,
    concealed_frames: u64,
}

impl FrameDecoder {
    /// Creates a decoder for one speaker stream.
    pub fn new() -> Result<Self> {
        let opus = OpusDecoder::new(SampleRate::Hz48000, Channels::Mono).map_err(decode_error)?;

        Ok(Self {
            opus,
            resampler: FrameResampler::new()?,
            decode_buffer: vec![0i16; MAX_OPUS_SAMPLES],
            last_sequence: None,
            concealed_frames: 0,
        })
    }

    /// Decodes one frame into a 16kHz PCM fragment.
    ///
    /// A sequence gap is concealed by synthesizing silence for the missing
    /// frames (capped at [`defaults::MAX_CONCEALED_FRAMES`]) so downstream
    /// timing stays aligned. Duplicate or reordered frames yield an empty
    /// fragment. Malformed payloads return [`VoxscribeError::Decode`];
    /// decoder state stays valid and the caller drops the frame.
    pub fn decode(&mut self, frame: &VoiceFrame) -> Result<Vec<i16>> {
        let mut pcm_48k: Vec<i16> = Vec::new();

        match self.last_sequence {
            Some(last) if frame.sequence <= last => {
                trace!(
                    speaker = %frame.speaker,
                    sequence = frame.sequence,
                    "dropping duplicate or reordered frame"
                );
                return Ok(Vec::new());
            }
            Some(last) => {
                let missing = frame.sequence - last - 1;
                if missing > 0 {
                    let concealed = missing.min(defaults::MAX_CONCEALED_FRAMES);
                    debug!(
                        speaker = %frame.speaker,
                        missing,
                        concealed,
                        "sequence gap, synthesizing silence"
                    );
                    pcm_48k.resize(concealed as usize * defaults::FRAME_SAMPLES, 0);
                    self.concealed_frames += concealed;
                }
            }
            None => {}
        }

        let packet = Packet::try_from(frame.payload.as_slice()).map_err(decode_error)?;
        let signals =
            MutSignals::try_from(&mut self.decode_buffer[..]).map_err(decode_error)?;
        let decoded = self
            .opus
            .decode(Some(packet), signals, false)
            .map_err(decode_error)?;

        // Only advance the sequence cursor once the payload decoded; a
        // malformed frame is dropped without consuming its sequence slot.
        self.last_sequence = Some(frame.sequence);

        pcm_48k.extend_from_slice(&self.decode_buffer[..decoded]);
        self.resampler.resample(&pcm_48k)
    }

    /// Flushes any samples held back by the resampler.
    pub fn flush(&mut self) -> Result<Vec<i16>> {
        self.resampler.flush()
    }

    /// Resets codec and resampler state, e.g. when a stream is reused
    /// after a long outage.
    pub fn reset(&mut self) -> Result<()> {
        self.opus.reset_state().map_err(decode_error)?;
        self.resampler.reset();
        self.last_sequence = None;
        Ok(())
    }

    /// Total frames concealed as silence so far.
    pub fn concealed_frames(&self) -> u64 {
        self.concealed_frames
    }
}
