//! Voice transport interface.
//!
//! The transport connector delivers per-speaker compressed audio frames and
//! membership events for one voice channel. Network transport, encryption
//! and the control-plane handshake live behind this seam; the pipeline only
//! consumes the event stream.

use crate::error::{Result, VoxscribeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Identifier of one participant in a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeakerId(pub u64);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One compressed audio packet for one speaker.
///
/// Frames for a given speaker arrive in non-decreasing sequence order;
/// gaps indicate packet loss and are concealed by the frame decoder.
#[derive(Debug, Clone)]
pub struct VoiceFrame {
    /// Speaker this frame belongs to.
    pub speaker: SpeakerId,
    /// Per-speaker sequence number for ordering and gap detection.
    pub sequence: u64,
    /// Capture timestamp in milliseconds, as reported by the transport.
    /// Carried through for consumers; ordering and gap concealment in the
    /// pipeline rely on `sequence` alone.
    pub timestamp_ms: u32,
    /// Compressed codec payload (Opus).
    pub payload: Vec<u8>,
}

/// Events delivered by the voice transport for a subscribed channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One audio frame for one speaker.
    Frame(VoiceFrame),
    /// A participant joined the channel.
    SpeakerJoined { speaker: SpeakerId, label: String },
    /// A participant left the channel.
    SpeakerLeft { speaker: SpeakerId },
    /// The transport lost the channel; the session must tear down.
    Disconnected,
}

/// Connection to a voice-chat transport.
///
/// Implementations bridge a real voice backend; [`ChannelTransport`] is a
/// channel-backed implementation for tests and embedding.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    /// Opens a subscription to a channel's event stream.
    ///
    /// Fails with [`VoxscribeError::Join`] when the transport rejects the
    /// request (no permission, channel full).
    async fn subscribe(&self, channel: ChannelId) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Closes the subscription to a channel.
    async fn unsubscribe(&self, channel: ChannelId) -> Result<()>;
}

/// Channel-backed transport: events are injected by the test or embedding
/// code and delivered to whoever subscribed.
pub struct ChannelTransport {
    subscriptions: Mutex<HashMap<ChannelId, mpsc::Sender<TransportEvent>>>,
    capacity: usize,
    join_failure: Option<String>,
}

impl ChannelTransport {
    /// Creates a transport with the default event-channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Creates a transport with a custom event-channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            capacity,
            join_failure: None,
        }
    }

    /// Configures every subscribe call to fail with the given message.
    pub fn with_join_failure(mut self, message: &str) -> Self {
        self.join_failure = Some(message.to_string());
        self
    }

    /// Delivers an event to the channel's subscriber.
    ///
    /// Returns false when nobody is subscribed or the subscriber is gone.
    pub async fn emit(&self, channel: ChannelId, event: TransportEvent) -> bool {
        let sender = {
            let subs = match self.subscriptions.lock() {
                Ok(subs) => subs,
                Err(_) => return false,
            };
            subs.get(&channel).cloned()
        };
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Returns true while a subscriber holds the channel's event stream.
    pub fn is_subscribed(&self, channel: ChannelId) -> bool {
        self.subscriptions
            .lock()
            .map(|subs| subs.contains_key(&channel))
            .unwrap_or(false)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceTransport for ChannelTransport {
    async fn subscribe(&self, channel: ChannelId) -> Result<mpsc::Receiver<TransportEvent>> {
        if let Some(message) = &self.join_failure {
            return Err(VoxscribeError::Join {
                channel,
                message: message.clone(),
            });
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self
            .subscriptions
            .lock()
            .map_err(|_| VoxscribeError::Join {
                channel,
                message: "transport state poisoned".to_string(),
            })?;
        subs.insert(channel, tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: ChannelId) -> Result<()> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(&channel);
        }
        Ok(())
    }
}
