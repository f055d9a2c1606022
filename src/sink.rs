//! Text-output sink interface.
//!
//! The sink posts one line of transcribed text at a time to wherever the
//! conversation feed lives (a companion text channel on the chat platform).
//! Platforms rate-limit posting; the sink reports that instead of erroring
//! so the aggregator can retry in order.

use crate::error::{Result, VoxscribeError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of posting one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// The line was accepted by the destination.
    Accepted,
    /// The destination is rate limiting; retry after the given delay.
    RateLimited { retry_after: Duration },
}

/// Destination for transcript lines.
#[async_trait]
pub trait TranscriptSink: Send + 'static {
    /// Posts one line of text.
    async fn post(&mut self, line: &str) -> Result<PostOutcome>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Sink that collects lines in memory, for tests and embedding.
///
/// Optionally scripted to answer a number of posts with rate limits or
/// errors first.
pub struct CollectorSink {
    lines: Arc<Mutex<Vec<String>>>,
    rate_limits: VecDeque<Duration>,
    post_failures: u32,
}

impl CollectorSink {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            rate_limits: VecDeque::new(),
            post_failures: 0,
        }
    }

    /// Queues a rate-limit response; each queued entry answers one post
    /// before the line is accepted on retry.
    pub fn with_rate_limit(mut self, retry_after: Duration) -> Self {
        self.rate_limits.push_back(retry_after);
        self
    }

    /// Makes the next `count` posts fail with a sink error.
    pub fn with_post_failures(mut self, count: u32) -> Self {
        self.post_failures = count;
        self
    }

    /// Shared handle to the collected lines.
    pub fn lines(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.lines)
    }
}

impl Default for CollectorSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptSink for CollectorSink {
    async fn post(&mut self, line: &str) -> Result<PostOutcome> {
        if self.post_failures > 0 {
            self.post_failures -= 1;
            return Err(VoxscribeError::Sink {
                message: "scripted sink failure".to_string(),
            });
        }
        if let Some(retry_after) = self.rate_limits.pop_front() {
            return Ok(PostOutcome::RateLimited { retry_after });
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
        Ok(PostOutcome::Accepted)
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Sink that prints each line to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

#[async_trait]
impl TranscriptSink for StdoutSink {
    async fn post(&mut self, line: &str) -> Result<PostOutcome> {
        println!("{}", line);
        Ok(PostOutcome::Accepted)
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collector_records_lines() {
        let mut sink = CollectorSink::new();
        let lines = sink.lines();

        assert_eq!(sink.post("alice: hello").await.unwrap(), PostOutcome::Accepted);
        assert_eq!(sink.post("bob: hi").await.unwrap(), PostOutcome::Accepted);

        let collected = lines.lock().unwrap();
        assert_eq!(collected.as_slice(), ["alice: hello", "bob: hi"]);
    }

    #[tokio::test]
    async fn test_collector_rate_limits_then_accepts() {
        let mut sink = CollectorSink::new().with_rate_limit(Duration::from_millis(50));
        let lines = sink.lines();

        match sink.post("alice: hello").await.unwrap() {
            PostOutcome::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(50));
            }
            other => panic!("Expected rate limit, got {:?}", other),
        }
        assert!(lines.lock().unwrap().is_empty());

        // Retry succeeds and preserves the line.
        assert_eq!(sink.post("alice: hello").await.unwrap(), PostOutcome::Accepted);
        assert_eq!(lines.lock().unwrap().as_slice(), ["alice: hello"]);
    }

    #[tokio::test]
    async fn test_collector_scripted_failures_then_accepts() {
        let mut sink = CollectorSink::new().with_post_failures(2);
        let lines = sink.lines();

        for _ in 0..2 {
            match sink.post("alice: hello").await {
                Err(VoxscribeError::Sink { .. }) => {}
                other => panic!("Expected sink error, got {:?}", other),
            }
        }
        assert_eq!(sink.post("alice: hello").await.unwrap(), PostOutcome::Accepted);
        assert_eq!(lines.lock().unwrap().as_slice(), ["alice: hello"]);
    }

    #[tokio::test]
    async fn test_stdout_sink_accepts() {
        let mut sink = StdoutSink;
        assert_eq!(sink.post("test line").await.unwrap(), PostOutcome::Accepted);
        assert_eq!(sink.name(), "stdout");
    }
}
