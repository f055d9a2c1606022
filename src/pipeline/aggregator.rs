//! Transcript aggregator station.
//!
//! Merges hypotheses from every speaker worker into one ordered line queue
//! and drains it to the text-output sink, pacing posts to respect the
//! platform's rate limits. Lines post strictly in arrival order; pacing
//! delays output but never reorders it.
//!
//! Under backpressure the queue sheds oldest partial lines first. Final
//! lines are never dropped, so the queue may transiently exceed its
//! capacity when it holds only finals.

use crate::config::OutputConfig;
use crate::pipeline::frame::{Hypothesis, OutputLine};
use crate::sink::{PostOutcome, TranscriptSink};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Configuration for the transcript aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Line queue capacity; partials are shed beyond it.
    pub queue_capacity: usize,
    /// Minimum spacing between accepted posts.
    pub min_post_interval: Duration,
    /// Surface partial hypotheses at all.
    pub emit_partials: bool,
    /// Shortest partial worth surfacing, in characters.
    pub min_partial_chars: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from_output(&OutputConfig::default())
    }
}

impl AggregatorConfig {
    /// Builds aggregator settings from the output configuration section.
    pub fn from_output(output: &OutputConfig) -> Self {
        Self {
            queue_capacity: output.queue_capacity,
            min_post_interval: output.min_post_interval(),
            emit_partials: output.emit_partials,
            min_partial_chars: output.min_partial_chars,
        }
    }
}

/// Consecutive sink errors tolerated for a final-derived line before it
/// is discarded. Partial-derived lines are dropped on the first error.
const SINK_ERROR_RETRIES: u32 = 3;

/// Ordered, rate-limited bridge from hypotheses to the sink.
pub struct TranscriptAggregator {
    config: AggregatorConfig,
    sink: Box<dyn TranscriptSink>,
    queue: VecDeque<OutputLine>,
    next_post_at: Instant,
    /// Consecutive sink errors for the line currently at the front.
    front_failures: u32,
    posted: u64,
}

impl TranscriptAggregator {
    /// Creates an aggregator writing to the given sink.
    pub fn new(sink: Box<dyn TranscriptSink>, config: AggregatorConfig) -> Self {
        Self {
            config,
            sink,
            queue: VecDeque::new(),
            next_post_at: Instant::now(),
            front_failures: 0,
            posted: 0,
        }
    }

    /// Consumes hypotheses until the channel closes, then drains every
    /// queued line so teardown never loses a final.
    pub async fn run(mut self, mut input: mpsc::Receiver<Hypothesis>) {
        let mut input_open = true;

        while input_open || !self.queue.is_empty() {
            if self.queue.is_empty() {
                match input.recv().await {
                    Some(hypothesis) => self.enqueue(hypothesis),
                    None => input_open = false,
                }
                continue;
            }

            let now = Instant::now();
            if now >= self.next_post_at {
                self.post_front().await;
                continue;
            }

            let wait = self.next_post_at - now;
            if input_open {
                tokio::select! {
                    hypothesis = input.recv() => match hypothesis {
                        Some(hypothesis) => self.enqueue(hypothesis),
                        None => input_open = false,
                    },
                    _ = tokio::time::sleep(wait) => {}
                }
            } else {
                tokio::time::sleep(wait).await;
            }
        }

        debug!(posted = self.posted, "aggregator stopped");
    }

    fn enqueue(&mut self, hypothesis: Hypothesis) {
        if hypothesis.is_final {
            self.enqueue_final(hypothesis);
        } else {
            self.enqueue_partial(hypothesis);
        }
    }

    fn enqueue_final(&mut self, hypothesis: Hypothesis) {
        // A queued partial from this speaker previews exactly this final;
        // the final supersedes it.
        self.queue
            .retain(|line| line.from_final || line.speaker != hypothesis.speaker);

        if hypothesis.text.trim().is_empty() {
            trace!(speaker = %hypothesis.speaker, "skipping empty final");
            return;
        }

        self.queue.push_back(format_line(&hypothesis, true));
        self.shed_partials();
    }

    fn enqueue_partial(&mut self, hypothesis: Hypothesis) {
        if !self.config.emit_partials {
            return;
        }
        if hypothesis.text.chars().count() < self.config.min_partial_chars {
            return;
        }

        // A newer partial from the same speaker revises the queued one in
        // place, keeping its position in the order.
        if let Some(line) = self
            .queue
            .iter_mut()
            .find(|line| !line.from_final && line.speaker == hypothesis.speaker)
        {
            *line = format_line(&hypothesis, false);
            return;
        }

        self.queue.push_back(format_line(&hypothesis, false));
        self.shed_partials();
    }

    /// Evicts oldest partials while over capacity. Finals stay.
    fn shed_partials(&mut self) {
        while self.queue.len() > self.config.queue_capacity {
            let Some(index) = self.queue.iter().position(|line| !line.from_final) else {
                break;
            };
            if let Some(dropped) = self.queue.remove(index) {
                debug!(speaker = %dropped.speaker, "queue full, shedding partial line");
            }
        }
    }

    async fn post_front(&mut self) {
        let Some(line) = self.queue.front() else {
            return;
        };
        let from_final = line.from_final;

        match self.sink.post(&line.text).await {
            Ok(PostOutcome::Accepted) => {
                self.queue.pop_front();
                self.front_failures = 0;
                self.posted += 1;
                self.next_post_at = Instant::now() + self.config.min_post_interval;
            }
            Ok(PostOutcome::RateLimited { retry_after }) => {
                // Same line retries after the backoff; order is preserved.
                debug!(sink = self.sink.name(), ?retry_after, "sink rate limited");
                self.next_post_at = Instant::now() + retry_after;
            }
            Err(e) if from_final && self.front_failures < SINK_ERROR_RETRIES => {
                // Final lines survive transient sink faults.
                self.front_failures += 1;
                warn!(
                    sink = self.sink.name(),
                    error = %e,
                    attempt = self.front_failures,
                    "sink post failed, retrying final line"
                );
                self.next_post_at = Instant::now() + self.config.min_post_interval;
            }
            Err(e) => {
                warn!(sink = self.sink.name(), error = %e, "sink post failed, dropping line");
                self.queue.pop_front();
                self.front_failures = 0;
            }
        }
    }
}

fn format_line(hypothesis: &Hypothesis, from_final: bool) -> OutputLine {
    OutputLine {
        speaker: hypothesis.speaker,
        text: format!("{}: {}", hypothesis.speaker_label, hypothesis.text),
        from_final,
        emitted_at: hypothesis.emitted_at,
    }
}
