//! Per-speaker recognition worker.
//!
//! One worker task per active speaker owns the full decode → buffer →
//! recognize chain for that speaker. Frames are delivered through a bounded
//! command channel and processed strictly in order, which gives the
//! single-writer discipline the codec and recognizer state require.
//! Different speakers' workers run as independent tasks, so one slow
//! recognizer never stalls another speaker's audio.
//!
//! CPU-bound recognition runs on the blocking thread pool with the
//! recognizer moved in and out; decode and recognition faults are contained
//! to this worker and never escalate to the session.

use crate::pipeline::buffer::{SilenceOutcome, StreamBuffer, StreamBufferConfig};
use crate::pipeline::decoder::FrameDecoder;
use crate::pipeline::frame::{Hypothesis, PcmChunk};
use crate::recognizer::{Recognition, RecognizerFactory, StreamingRecognizer};
use crate::transport::{SpeakerId, VoiceFrame};
use crate::{defaults, error::Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Commands accepted by a speaker worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// One compressed frame for this worker's speaker.
    Frame(VoiceFrame),
    /// Force an end-of-utterance on any in-flight audio.
    Flush,
    /// Flush, then exit. Teardown is a drain, not a kill.
    Shutdown,
}

/// Configuration for a speaker worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stream buffer (chunking / silence) configuration.
    pub buffer: StreamBufferConfig,
    /// Capacity of the frame command channel.
    pub queue_capacity: usize,
    /// How often the buffer is checked for a silence flush.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer: StreamBufferConfig::default(),
            queue_capacity: defaults::WORKER_QUEUE_CAPACITY,
            poll_interval: defaults::SILENCE_POLL_INTERVAL,
        }
    }
}

/// Handle to a running speaker worker.
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queues a frame without blocking; returns false when the worker's
    /// channel is full and the frame was shed.
    pub fn try_send_frame(&self, frame: VoiceFrame) -> bool {
        self.tx.try_send(WorkerCommand::Frame(frame)).is_ok()
    }

    /// Requests an end-of-utterance flush.
    pub async fn flush(&self) {
        let _ = self.tx.send(WorkerCommand::Flush).await;
    }

    /// Drains the worker: flushes in-flight audio, emits its final
    /// hypothesis, then waits for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(WorkerCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// The per-speaker decode/buffer/recognize pipeline.
pub struct SpeakerWorker {
    speaker: SpeakerId,
    label: String,
    decoder: FrameDecoder,
    buffer: StreamBuffer,
    recognizer: Option<Box<dyn StreamingRecognizer>>,
    factory: Arc<dyn RecognizerFactory>,
    /// Samples were fed since the last final; an open utterance owes the
    /// aggregator exactly one final hypothesis.
    utterance_fed: bool,
}

impl SpeakerWorker {
    /// Spawns a worker task for one speaker.
    ///
    /// The recognizer stream is opened eagerly so resource failures surface
    /// at stream creation rather than mid-utterance.
    pub fn spawn(
        speaker: SpeakerId,
        label: &str,
        factory: Arc<dyn RecognizerFactory>,
        config: WorkerConfig,
        output: mpsc::Sender<Hypothesis>,
    ) -> Result<WorkerHandle> {
        let recognizer = factory.open()?;
        let worker = Self {
            speaker,
            label: label.to_string(),
            decoder: FrameDecoder::new()?,
            buffer: StreamBuffer::with_config(speaker, config.buffer.clone(), Instant::now()),
            recognizer: Some(recognizer),
            factory,
            utterance_fed: false,
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let poll_interval = config.poll_interval;
        let task = tokio::spawn(async move {
            worker.run(rx, output, poll_interval).await;
        });

        Ok(WorkerHandle { tx, task })
    }

    async fn run(
        mut self,
        mut input: mpsc::Receiver<WorkerCommand>,
        output: mpsc::Sender<Hypothesis>,
        poll_interval: Duration,
    ) {
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = input.recv() => match command {
                    Some(WorkerCommand::Frame(frame)) => {
                        self.handle_frame(frame, &output).await;
                    }
                    Some(WorkerCommand::Flush) => {
                        self.flush_utterance(&output).await;
                    }
                    Some(WorkerCommand::Shutdown) | None => {
                        self.flush_utterance(&output).await;
                        break;
                    }
                },
                _ = poll.tick() => {
                    self.check_silence(&output).await;
                }
            }
        }

        debug!(speaker = %self.speaker, "worker stopped");
    }

    async fn handle_frame(&mut self, frame: VoiceFrame, output: &mpsc::Sender<Hypothesis>) {
        let fragment = match self.decoder.decode(&frame) {
            Ok(fragment) => fragment,
            Err(e) => {
                // Malformed frame: drop it, keep the stream alive.
                warn!(speaker = %self.speaker, sequence = frame.sequence, error = %e, "dropping undecodable frame");
                return;
            }
        };

        if let Some(chunk) = self.buffer.push(&fragment, Instant::now()) {
            self.feed_chunk(chunk, output).await;
        }
    }

    async fn check_silence(&mut self, output: &mpsc::Sender<Hypothesis>) {
        match self.buffer.poll_silence(Instant::now()) {
            SilenceOutcome::None => {}
            SilenceOutcome::Chunk(chunk) => {
                self.feed_chunk(chunk, output).await;
            }
            SilenceOutcome::CloseUtterance => {
                self.finalize_utterance(output).await;
            }
        }
    }

    /// Flushes decoder and buffer, then finalizes any open utterance.
    async fn flush_utterance(&mut self, output: &mpsc::Sender<Hypothesis>) {
        let now = Instant::now();

        match self.decoder.flush() {
            Ok(tail) if !tail.is_empty() => {
                if let Some(chunk) = self.buffer.push(&tail, now) {
                    self.feed_chunk(chunk, output).await;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(speaker = %self.speaker, error = %e, "decoder flush failed"),
        }

        if let Some(chunk) = self.buffer.flush(now) {
            self.feed_chunk(chunk, output).await;
        } else if self.utterance_fed {
            self.finalize_utterance(output).await;
        }
    }

    /// Feeds one chunk to the recognizer on the blocking pool; finalizes in
    /// the same call when the chunk closes an utterance.
    async fn feed_chunk(&mut self, chunk: PcmChunk, output: &mpsc::Sender<Hypothesis>) {
        let Some(mut recognizer) = self.recognizer.take() else {
            return;
        };

        let end_of_utterance = chunk.end_of_utterance;
        let fed = chunk.samples.len();
        let joined = tokio::task::spawn_blocking(move || {
            let accepted = recognizer.accept(&chunk.samples);
            match accepted {
                Ok(recognition) => {
                    // An engine-driven final already closed the utterance;
                    // finalizing again would emit a duplicate.
                    let engine_final = matches!(recognition, Some(Recognition::Final(_)));
                    let final_text = if end_of_utterance && !engine_final {
                        Some(recognizer.finalize())
                    } else {
                        None
                    };
                    (recognizer, Ok((recognition, final_text)))
                }
                Err(e) => (recognizer, Err(e)),
            }
        })
        .await;

        let result = match joined {
            Ok((recognizer, result)) => {
                self.recognizer = Some(recognizer);
                result
            }
            Err(e) => {
                error!(speaker = %self.speaker, error = %e, "recognition task panicked");
                self.reset_recognizer();
                return;
            }
        };

        match result {
            Ok((recognition, final_text)) => {
                self.utterance_fed = true;
                if let Some(recognition) = recognition {
                    self.emit_recognition(recognition, output).await;
                }
                match final_text {
                    Some(Ok(text)) => {
                        self.emit_final(text, output).await;
                    }
                    Some(Err(e)) => {
                        warn!(speaker = %self.speaker, error = %e, "finalize failed, resetting recognizer");
                        self.reset_recognizer();
                    }
                    None => {}
                }
                debug!(speaker = %self.speaker, samples = fed, end_of_utterance, "chunk fed");
            }
            Err(e) => {
                // Engine fault on one stream: reset that recognizer and
                // keep the session going.
                warn!(speaker = %self.speaker, error = %e, "recognition failed, resetting recognizer");
                self.reset_recognizer();
            }
        }
    }

    /// Finalizes the recognizer with no further audio (silence closed an
    /// utterance whose samples were all fed already).
    async fn finalize_utterance(&mut self, output: &mpsc::Sender<Hypothesis>) {
        if !self.utterance_fed {
            return;
        }
        let Some(mut recognizer) = self.recognizer.take() else {
            return;
        };

        let joined = tokio::task::spawn_blocking(move || {
            let text = recognizer.finalize();
            (recognizer, text)
        })
        .await;

        match joined {
            Ok((recognizer, Ok(text))) => {
                self.recognizer = Some(recognizer);
                self.emit_final(text, output).await;
            }
            Ok((recognizer, Err(e))) => {
                self.recognizer = Some(recognizer);
                warn!(speaker = %self.speaker, error = %e, "finalize failed, resetting recognizer");
                self.reset_recognizer();
            }
            Err(e) => {
                error!(speaker = %self.speaker, error = %e, "finalize task panicked");
                self.reset_recognizer();
            }
        }
    }

    async fn emit_recognition(
        &mut self,
        recognition: Recognition,
        output: &mpsc::Sender<Hypothesis>,
    ) {
        match recognition {
            Recognition::Partial(text) => {
                let hypothesis = Hypothesis::partial(self.speaker, &self.label, text);
                let _ = output.send(hypothesis).await;
            }
            Recognition::Final(text) => {
                self.emit_final(text, output).await;
            }
        }
    }

    async fn emit_final(&mut self, text: String, output: &mpsc::Sender<Hypothesis>) {
        self.utterance_fed = false;
        let hypothesis = Hypothesis::finalized(self.speaker, &self.label, text);
        let _ = output.send(hypothesis).await;
    }

    /// Discards utterance state after an engine fault. A surviving stream
    /// is reset in place; a lost one (blocking task panic) is reopened.
    fn reset_recognizer(&mut self) {
        self.utterance_fed = false;
        match self.recognizer.as_mut() {
            Some(recognizer) => recognizer.reset(),
            None => match self.factory.open() {
                Ok(recognizer) => {
                    self.recognizer = Some(recognizer);
                }
                Err(e) => {
                    error!(speaker = %self.speaker, error = %e, "reopen failed, speaker stream left without recognizer");
                }
            },
        }
    }
}
