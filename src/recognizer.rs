//! Streaming recognition engine interface.
//!
//! The recognition engine is an external collaborator: an offline
//! acoustic+language model with a streaming interface. Push raw PCM, get
//! back partial (unstable) or final (stable) hypotheses. Model loading,
//! selection and language configuration belong to the factory the caller
//! constructs; the pipeline treats each recognizer as an opaque
//! single-writer decoder.

use crate::error::{Result, VoxscribeError};

/// One recognition result from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// Unstable hypothesis for in-progress speech; may be revised.
    Partial(String),
    /// Stable hypothesis marking the end of an utterance.
    Final(String),
}

/// Streaming speech recognizer for exactly one speaker.
///
/// Stateful across calls: the engine accumulates acoustic context for the
/// current utterance. Callers must feed chunks from one speaker in order
/// and never concurrently; the pipeline guarantees this with one worker
/// task per speaker.
pub trait StreamingRecognizer: Send {
    /// Feeds PCM samples (16kHz mono i16) and returns a hypothesis when the
    /// engine has one.
    fn accept(&mut self, samples: &[i16]) -> Result<Option<Recognition>>;

    /// Forces the end of the current utterance and returns its final text
    /// (possibly empty). Called when the stream buffer closes an utterance
    /// on silence and at teardown.
    fn finalize(&mut self) -> Result<String>;

    /// Discards all utterance state. Used after an engine fault.
    fn reset(&mut self);
}

/// Opens recognizer instances, one per active speaker.
///
/// Model and language selection are configuration of the factory itself.
pub trait RecognizerFactory: Send + Sync {
    /// Opens a fresh recognizer stream.
    fn open(&self) -> Result<Box<dyn StreamingRecognizer>>;

    /// Name of the loaded model, for logging.
    fn model_name(&self) -> &str;
}

/// Scriptable recognizer for tests.
///
/// Counts fed samples per utterance and emits a partial and/or a final once
/// configured thresholds are crossed. With no configured final text,
/// `finalize` reports the number of samples heard, which lets tests assert
/// stream isolation.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    partial_after: Option<usize>,
    partial_text: String,
    final_after: Option<(usize, String)>,
    final_text: Option<String>,
    fail_next_accept: bool,
    samples_in_utterance: usize,
    partial_emitted: bool,
}

impl MockRecognizer {
    /// Creates a mock that stays silent until finalized.
    pub fn new() -> Self {
        Self {
            partial_after: None,
            partial_text: "partial hypothesis".to_string(),
            final_after: None,
            final_text: None,
            fail_next_accept: false,
            samples_in_utterance: 0,
            partial_emitted: false,
        }
    }

    /// Emits one partial per utterance once this many samples were fed.
    pub fn with_partial_after(mut self, samples: usize, text: &str) -> Self {
        self.partial_after = Some(samples);
        self.partial_text = text.to_string();
        self
    }

    /// Emits an engine-driven final once this many samples were fed,
    /// modeling the engine's own utterance-boundary detection.
    pub fn with_final_after(mut self, samples: usize, text: &str) -> Self {
        self.final_after = Some((samples, text.to_string()));
        self
    }

    /// Fixes the text returned by `finalize`.
    pub fn with_final_text(mut self, text: &str) -> Self {
        self.final_text = Some(text.to_string());
        self
    }

    /// Makes the next `accept` call fail with a recognition error.
    pub fn with_failure(mut self) -> Self {
        self.fail_next_accept = true;
        self
    }

    /// Samples fed since the last utterance boundary.
    pub fn samples_in_utterance(&self) -> usize {
        self.samples_in_utterance
    }

    fn close_utterance(&mut self) {
        self.samples_in_utterance = 0;
        self.partial_emitted = false;
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingRecognizer for MockRecognizer {
    fn accept(&mut self, samples: &[i16]) -> Result<Option<Recognition>> {
        if self.fail_next_accept {
            self.fail_next_accept = false;
            return Err(VoxscribeError::Recognition {
                message: "mock engine fault".to_string(),
            });
        }

        self.samples_in_utterance += samples.len();

        if let Some((threshold, text)) = &self.final_after
            && self.samples_in_utterance >= *threshold
        {
            let text = text.clone();
            self.close_utterance();
            return Ok(Some(Recognition::Final(text)));
        }

        if let Some(threshold) = self.partial_after
            && !self.partial_emitted
            && self.samples_in_utterance >= threshold
        {
            self.partial_emitted = true;
            return Ok(Some(Recognition::Partial(self.partial_text.clone())));
        }

        Ok(None)
    }

    fn finalize(&mut self) -> Result<String> {
        let text = match &self.final_text {
            Some(text) => text.clone(),
            None if self.samples_in_utterance > 0 => {
                format!("heard {} samples", self.samples_in_utterance)
            }
            None => String::new(),
        };
        self.close_utterance();
        Ok(text)
    }

    fn reset(&mut self) {
        self.close_utterance();
        self.fail_next_accept = false;
    }
}

/// Factory handing out clones of a blueprint mock, with an open counter.
pub struct MockRecognizerFactory {
    blueprint: MockRecognizer,
    opened: std::sync::atomic::AtomicUsize,
    fail_open: bool,
}

impl MockRecognizerFactory {
    /// Creates a factory producing default silent mocks.
    pub fn new() -> Self {
        Self::with_blueprint(MockRecognizer::new())
    }

    /// Creates a factory producing clones of the given mock.
    pub fn with_blueprint(blueprint: MockRecognizer) -> Self {
        Self {
            blueprint,
            opened: std::sync::atomic::AtomicUsize::new(0),
            fail_open: false,
        }
    }

    /// Makes every `open` call fail, modeling an unavailable model.
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Number of recognizer streams opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockRecognizerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerFactory for MockRecognizerFactory {
    fn open(&self) -> Result<Box<dyn StreamingRecognizer>> {
        if self.fail_open {
            return Err(VoxscribeError::RecognizerOpen {
                message: "mock model unavailable".to_string(),
            });
        }
        self.opened
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(self.blueprint.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
