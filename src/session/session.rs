//! Per-channel session driver.
//!
//! One driver task owns the lifecycle of a transcription session: it holds
//! the transport subscription, routes frames to per-speaker workers while
//! transcribing, runs the idle-stream reaper, and performs the
//! flush-then-teardown drain on stop, leave and forced disconnect.
//!
//! The speaker map is mutated only here (first-seen creation, idle
//! eviction, teardown), which keeps per-stream audio processing free of
//! shared locks.

use crate::config::Config;
use crate::defaults;
use crate::error::{Result, VoxscribeError};
use crate::pipeline::aggregator::{AggregatorConfig, TranscriptAggregator};
use crate::pipeline::buffer::StreamBufferConfig;
use crate::pipeline::frame::Hypothesis;
use crate::pipeline::worker::{SpeakerWorker, WorkerConfig, WorkerHandle};
use crate::recognizer::RecognizerFactory;
use crate::session::registry::{OwnerId, SessionEndReason, SessionNotice};
use crate::sink::TranscriptSink;
use crate::transport::{ChannelId, SpeakerId, TransportEvent, VoiceTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the merged hypothesis channel between workers and the
/// aggregator.
const HYPOTHESIS_CHANNEL_CAPACITY: usize = 256;

/// Observable state of a live session. `Idle` is the absence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Subscribed to the channel, not transcribing.
    Joined,
    /// Actively routing frames into the pipeline.
    Transcribing,
}

/// Control commands accepted by the driver.
pub(crate) enum SessionCommand {
    Start {
        sink: Box<dyn TranscriptSink>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
}

struct SpeakerEntry {
    worker: WorkerHandle,
    last_activity: Instant,
}

/// Pipeline resources that exist only while transcribing.
struct ActivePipeline {
    hypothesis_tx: mpsc::Sender<Hypothesis>,
    aggregator: JoinHandle<()>,
    speakers: HashMap<SpeakerId, SpeakerEntry>,
}

pub(crate) struct SessionDriver {
    owner: OwnerId,
    channel: ChannelId,
    config: Config,
    factory: Arc<dyn RecognizerFactory>,
    transport: Arc<dyn VoiceTransport>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    labels: HashMap<SpeakerId, String>,
    pipeline: Option<ActivePipeline>,
}

impl SessionDriver {
    pub(crate) fn new(
        owner: OwnerId,
        channel: ChannelId,
        config: Config,
        factory: Arc<dyn RecognizerFactory>,
        transport: Arc<dyn VoiceTransport>,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        Self {
            owner,
            channel,
            config,
            factory,
            transport,
            notices,
            labels: HashMap::new(),
            pipeline: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut reaper = tokio::time::interval(self.config.session.reaper_interval());
        reaper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut leave_ack = None;
        let reason = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => self.route_frame(frame),
                    Some(TransportEvent::SpeakerJoined { speaker, label }) => {
                        debug!(channel = %self.channel, %speaker, label, "speaker joined");
                        self.labels.insert(speaker, label);
                    }
                    Some(TransportEvent::SpeakerLeft { speaker }) => {
                        self.remove_speaker(speaker).await;
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        warn!(channel = %self.channel, "transport disconnected");
                        break SessionEndReason::Disconnected;
                    }
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Start { sink, reply }) => {
                        let _ = reply.send(self.start(sink));
                    }
                    Some(SessionCommand::Stop { reply }) => {
                        self.stop().await;
                        let _ = reply.send(Ok(()));
                    }
                    Some(SessionCommand::Leave { reply }) => {
                        // Acknowledged only after the full teardown below.
                        leave_ack = Some(reply);
                        break SessionEndReason::Left;
                    }
                    Some(SessionCommand::State { reply }) => {
                        let _ = reply.send(self.state());
                    }
                    None => break SessionEndReason::Disconnected,
                },
                _ = reaper.tick() => self.reap_idle().await,
            }
        };

        // Forced disconnects and a dropped registry still drain in-flight
        // utterances before the session ends.
        self.stop().await;

        if let Err(e) = self.transport.unsubscribe(self.channel).await {
            warn!(channel = %self.channel, error = %e, "unsubscribe failed");
        }
        // Close the command channel first so the registry sees the entry as
        // stale by the time the notice is delivered.
        drop(commands);
        let _ = self.notices.send(SessionNotice {
            owner: self.owner,
            channel: self.channel,
            reason,
        });
        info!(channel = %self.channel, ?reason, "session ended");

        if let Some(reply) = leave_ack {
            let _ = reply.send(());
        }
    }

    fn state(&self) -> SessionState {
        if self.pipeline.is_some() {
            SessionState::Transcribing
        } else {
            SessionState::Joined
        }
    }

    /// `Joined → Transcribing`: allocate the aggregator and activate frame
    /// routing.
    fn start(&mut self, sink: Box<dyn TranscriptSink>) -> Result<()> {
        if self.pipeline.is_some() {
            return Err(VoxscribeError::AlreadyActive {
                channel: self.channel,
            });
        }

        let (hypothesis_tx, hypothesis_rx) = mpsc::channel(HYPOTHESIS_CHANNEL_CAPACITY);
        let aggregator = TranscriptAggregator::new(
            sink,
            AggregatorConfig::from_output(&self.config.output),
        );
        let aggregator = tokio::spawn(aggregator.run(hypothesis_rx));

        self.pipeline = Some(ActivePipeline {
            hypothesis_tx,
            aggregator,
            speakers: HashMap::new(),
        });
        info!(channel = %self.channel, model = self.factory.model_name(), "transcription started");
        Ok(())
    }

    /// `Transcribing → Joined`: drain every speaker stream, then the
    /// aggregator. A no-op when not transcribing.
    async fn stop(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };

        // Workers flush their buffers and finalize their recognizers; no
        // new chunk is submitted after the shutdown command.
        for (speaker, entry) in pipeline.speakers {
            debug!(channel = %self.channel, %speaker, "draining speaker stream");
            entry.worker.shutdown().await;
        }

        // Closing the hypothesis channel lets the aggregator drain its
        // queue and exit; queued finals all reach the sink.
        drop(pipeline.hypothesis_tx);
        if let Err(e) = pipeline.aggregator.await {
            error!(channel = %self.channel, error = %e, "aggregator task failed");
        }
        info!(channel = %self.channel, "transcription stopped");
    }

    fn route_frame(&mut self, frame: crate::transport::VoiceFrame) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        let speaker = frame.speaker;

        if !pipeline.speakers.contains_key(&speaker) {
            let label = self
                .labels
                .get(&speaker)
                .cloned()
                .unwrap_or_else(|| format!("speaker-{}", speaker));
            let worker_config = WorkerConfig {
                buffer: StreamBufferConfig {
                    chunk_duration_ms: self.config.audio.chunk_duration_ms,
                    min_chunk_ms: self.config.audio.min_chunk_ms,
                    silence_flush_ms: self.config.audio.silence_flush_ms,
                    sample_rate: defaults::RECOGNIZER_SAMPLE_RATE,
                },
                queue_capacity: self.config.session.worker_queue_capacity,
                poll_interval: defaults::SILENCE_POLL_INTERVAL,
            };
            match SpeakerWorker::spawn(
                speaker,
                &label,
                Arc::clone(&self.factory),
                worker_config,
                pipeline.hypothesis_tx.clone(),
            ) {
                Ok(worker) => {
                    info!(channel = %self.channel, %speaker, label, "speaker stream created");
                    pipeline.speakers.insert(
                        speaker,
                        SpeakerEntry {
                            worker,
                            last_activity: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    // Stream creation retries on the speaker's next frame.
                    error!(channel = %self.channel, %speaker, error = %e, "failed to open speaker stream");
                    return;
                }
            }
        }

        if let Some(entry) = pipeline.speakers.get_mut(&speaker) {
            entry.last_activity = Instant::now();
            if !entry.worker.try_send_frame(frame) {
                warn!(channel = %self.channel, %speaker, "worker queue full, dropping frame");
            }
        }
    }

    /// Drains and removes one speaker's stream, if it exists.
    async fn remove_speaker(&mut self, speaker: SpeakerId) {
        self.labels.remove(&speaker);
        if let Some(pipeline) = self.pipeline.as_mut()
            && let Some(entry) = pipeline.speakers.remove(&speaker)
        {
            info!(channel = %self.channel, %speaker, "speaker left, draining stream");
            entry.worker.shutdown().await;
        }
    }

    /// Evicts speaker streams idle past the timeout, releasing their
    /// recognizer resources.
    async fn reap_idle(&mut self) {
        let timeout = self.config.session.idle_stream_timeout();
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        let now = Instant::now();
        let idle: Vec<SpeakerId> = pipeline
            .speakers
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) >= timeout)
            .map(|(speaker, _)| *speaker)
            .collect();

        for speaker in idle {
            if let Some(entry) = pipeline.speakers.remove(&speaker) {
                info!(channel = %self.channel, %speaker, "evicting idle speaker stream");
                entry.worker.shutdown().await;
            }
        }
    }
}
