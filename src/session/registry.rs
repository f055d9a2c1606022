//! Session registry: the command surface.
//!
//! Sessions are explicit values owned here, keyed by the owning context
//! (one active session per owner, any number of owners across channels).
//! `join`, `leave`, `start` and `stop` mirror the user-facing commands and
//! resolve to control messages for the owner's session driver.

use crate::config::Config;
use crate::error::{Result, VoxscribeError};
use crate::recognizer::RecognizerFactory;
use crate::session::session::{SessionCommand, SessionDriver, SessionState};
use crate::sink::TranscriptSink;
use crate::transport::{ChannelId, VoiceTransport};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

/// Capacity of each session's control-command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Identifier of the context owning a session (a server, a workspace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The owner left the channel.
    Left,
    /// The transport forced a disconnect.
    Disconnected,
}

/// Notification that an owner's session ended.
#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub owner: OwnerId,
    pub channel: ChannelId,
    pub reason: SessionEndReason,
}

struct SessionEntry {
    channel: ChannelId,
    commands: mpsc::Sender<SessionCommand>,
}

/// Owner-keyed registry of live sessions.
pub struct SessionRegistry {
    transport: Arc<dyn VoiceTransport>,
    factory: Arc<dyn RecognizerFactory>,
    config: Config,
    sessions: Mutex<HashMap<OwnerId, SessionEntry>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl SessionRegistry {
    /// Creates a registry; the returned receiver carries session-ended
    /// notices, including forced disconnects the owner did not request.
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        factory: Arc<dyn RecognizerFactory>,
        config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let registry = Self {
            transport,
            factory,
            config,
            sessions: Mutex::new(HashMap::new()),
            notices,
        };
        (registry, notice_rx)
    }

    /// `Idle → Joined`: subscribes to the channel and spawns the session
    /// driver.
    ///
    /// Joining the channel the owner is already in is a no-op. Joining a
    /// different channel while a session is live fails with
    /// [`VoxscribeError::AlreadyActive`].
    pub async fn join(&self, owner: OwnerId, channel: ChannelId) -> Result<()> {
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get(&owner) {
            // A driver that ended on its own (forced disconnect) leaves a
            // stale entry behind; rejoining replaces it.
            if !entry.commands.is_closed() {
                if entry.channel == channel {
                    debug!(%owner, %channel, "already joined, ignoring");
                    return Ok(());
                }
                return Err(VoxscribeError::AlreadyActive {
                    channel: entry.channel,
                });
            }
            sessions.remove(&owner);
        }

        let events = self.transport.subscribe(channel).await?;
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let driver = SessionDriver::new(
            owner,
            channel,
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.transport),
            self.notices.clone(),
        );
        tokio::spawn(driver.run(events, command_rx));

        sessions.insert(owner, SessionEntry { channel, commands });
        info!(%owner, %channel, "joined voice channel");
        Ok(())
    }

    /// `Joined → Transcribing`: hands the output sink to the session and
    /// activates frame routing.
    pub async fn start(&self, owner: OwnerId, sink: Box<dyn TranscriptSink>) -> Result<()> {
        let commands = self.live_commands(owner).await?;
        let (reply, reply_rx) = oneshot::channel();
        commands
            .send(SessionCommand::Start { sink, reply })
            .await
            .map_err(|_| VoxscribeError::NotJoined)?;
        reply_rx.await.map_err(|_| VoxscribeError::NotJoined)?
    }

    /// `Transcribing → Joined`: flushes every speaker stream so no final
    /// hypothesis is lost, then tears the pipeline down. A no-op when the
    /// session is joined but not transcribing.
    pub async fn stop(&self, owner: OwnerId) -> Result<()> {
        let commands = self.live_commands(owner).await?;
        let (reply, reply_rx) = oneshot::channel();
        commands
            .send(SessionCommand::Stop { reply })
            .await
            .map_err(|_| VoxscribeError::NotJoined)?;
        reply_rx.await.map_err(|_| VoxscribeError::NotJoined)?
    }

    /// `Joined → Idle`: implicitly stops if transcribing, closes the
    /// subscription and destroys the session.
    pub async fn leave(&self, owner: OwnerId) -> Result<()> {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&owner).ok_or(VoxscribeError::NotJoined)?
        };

        let (reply, reply_rx) = oneshot::channel();
        if entry.commands.send(SessionCommand::Leave { reply }).await.is_ok() {
            // The driver finishes its drain before acknowledging.
            let _ = reply_rx.await;
        }
        Ok(())
    }

    /// Current state of the owner's session, `None` when idle.
    pub async fn state(&self, owner: OwnerId) -> Option<SessionState> {
        let commands = self.live_commands(owner).await.ok()?;
        let (reply, reply_rx) = oneshot::channel();
        commands.send(SessionCommand::State { reply }).await.ok()?;
        reply_rx.await.ok()
    }

    /// Channel the owner's session is bound to, `None` when idle.
    pub async fn channel(&self, owner: OwnerId) -> Option<ChannelId> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&owner)
            .filter(|entry| !entry.commands.is_closed())
            .map(|entry| entry.channel)
    }

    /// Looks up the owner's live command channel, pruning a stale entry
    /// left by a session that ended on its own.
    async fn live_commands(&self, owner: OwnerId) -> Result<mpsc::Sender<SessionCommand>> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&owner) {
            Some(entry) if !entry.commands.is_closed() => Ok(entry.commands.clone()),
            Some(_) => {
                // Only a transport-forced teardown ends a driver without
                // removing its entry (leave removes it synchronously).
                sessions.remove(&owner);
                Err(VoxscribeError::TransportDisconnected)
            }
            None => Err(VoxscribeError::NotJoined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockRecognizerFactory;
    use crate::sink::CollectorSink;
    use crate::transport::ChannelTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_registry() -> (
        SessionRegistry,
        Arc<ChannelTransport>,
        mpsc::UnboundedReceiver<SessionNotice>,
    ) {
        let transport = Arc::new(ChannelTransport::new());
        let factory = Arc::new(MockRecognizerFactory::new());
        let (registry, notices) =
            SessionRegistry::new(transport.clone(), factory, Config::default());
        (registry, transport, notices)
    }

    #[tokio::test]
    async fn test_join_subscribes_and_tracks_channel() {
        let (registry, transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();

        assert!(transport.is_subscribed(ChannelId(10)));
        assert_eq!(registry.channel(OwnerId(1)).await, Some(ChannelId(10)));
        assert_eq!(registry.state(OwnerId(1)).await, Some(SessionState::Joined));
    }

    #[tokio::test]
    async fn test_rejoin_same_channel_is_noop() {
        let (registry, _transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();

        // Still one session on the same channel.
        assert_eq!(registry.channel(OwnerId(1)).await, Some(ChannelId(10)));
    }

    #[tokio::test]
    async fn test_join_other_channel_while_active_fails() {
        let (registry, _transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();

        match registry.join(OwnerId(1), ChannelId(11)).await {
            Err(VoxscribeError::AlreadyActive { channel }) => {
                assert_eq!(channel, ChannelId(10));
            }
            other => panic!("Expected already-active error, got {:?}", other),
        }
        // The original session is untouched.
        assert_eq!(registry.channel(OwnerId(1)).await, Some(ChannelId(10)));
    }

    #[tokio::test]
    async fn test_independent_owners_join_independently() {
        let (registry, _transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        registry.join(OwnerId(2), ChannelId(11)).await.unwrap();

        assert_eq!(registry.channel(OwnerId(1)).await, Some(ChannelId(10)));
        assert_eq!(registry.channel(OwnerId(2)).await, Some(ChannelId(11)));
    }

    #[tokio::test]
    async fn test_start_while_idle_fails_with_not_joined() {
        let (registry, _transport, _notices) = make_registry();

        match registry
            .start(OwnerId(1), Box::new(CollectorSink::new()))
            .await
        {
            Err(VoxscribeError::NotJoined) => {}
            other => panic!("Expected not-joined error, got {:?}", other),
        }
        // State remains idle.
        assert_eq!(registry.state(OwnerId(1)).await, None);
    }

    #[tokio::test]
    async fn test_join_failure_reported_to_caller() {
        let transport = Arc::new(ChannelTransport::new().with_join_failure("no permission"));
        let factory = Arc::new(MockRecognizerFactory::new());
        let (registry, _notices) =
            SessionRegistry::new(transport, factory, Config::default());

        match registry.join(OwnerId(1), ChannelId(10)).await {
            Err(VoxscribeError::Join { channel, .. }) => {
                assert_eq!(channel, ChannelId(10));
            }
            other => panic!("Expected join error, got {:?}", other),
        }
        assert_eq!(registry.state(OwnerId(1)).await, None);
    }

    #[tokio::test]
    async fn test_start_stop_transitions_state() {
        let (registry, _transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        registry
            .start(OwnerId(1), Box::new(CollectorSink::new()))
            .await
            .unwrap();
        assert_eq!(
            registry.state(OwnerId(1)).await,
            Some(SessionState::Transcribing)
        );

        registry.stop(OwnerId(1)).await.unwrap();
        assert_eq!(registry.state(OwnerId(1)).await, Some(SessionState::Joined));
    }

    #[tokio::test]
    async fn test_start_twice_fails_with_already_active() {
        let (registry, _transport, _notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        registry
            .start(OwnerId(1), Box::new(CollectorSink::new()))
            .await
            .unwrap();

        match registry
            .start(OwnerId(1), Box::new(CollectorSink::new()))
            .await
        {
            Err(VoxscribeError::AlreadyActive { channel }) => {
                assert_eq!(channel, ChannelId(10));
            }
            other => panic!("Expected already-active error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_unsubscribes_and_notifies() {
        let (registry, transport, mut notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        registry.leave(OwnerId(1)).await.unwrap();

        assert!(!transport.is_subscribed(ChannelId(10)));
        assert_eq!(registry.state(OwnerId(1)).await, None);

        let notice = timeout(Duration::from_secs(5), notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.owner, OwnerId(1));
        assert_eq!(notice.channel, ChannelId(10));
        assert_eq!(notice.reason, SessionEndReason::Left);
    }

    #[tokio::test]
    async fn test_leave_while_idle_fails() {
        let (registry, _transport, _notices) = make_registry();
        assert!(matches!(
            registry.leave(OwnerId(1)).await,
            Err(VoxscribeError::NotJoined)
        ));
    }

    #[tokio::test]
    async fn test_forced_disconnect_notifies_and_allows_rejoin() {
        let (registry, transport, mut notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        transport
            .emit(ChannelId(10), crate::transport::TransportEvent::Disconnected)
            .await;

        let notice = timeout(Duration::from_secs(5), notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.reason, SessionEndReason::Disconnected);

        // The stale entry does not block a fresh join.
        registry.join(OwnerId(1), ChannelId(12)).await.unwrap();
        assert_eq!(registry.channel(OwnerId(1)).await, Some(ChannelId(12)));
    }

    #[tokio::test]
    async fn test_command_after_disconnect_reports_transport_loss() {
        let (registry, transport, mut notices) = make_registry();

        registry.join(OwnerId(1), ChannelId(10)).await.unwrap();
        transport
            .emit(ChannelId(10), crate::transport::TransportEvent::Disconnected)
            .await;

        // The notice confirms the driver has fully torn down.
        let notice = timeout(Duration::from_secs(5), notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.reason, SessionEndReason::Disconnected);

        match registry.stop(OwnerId(1)).await {
            Err(VoxscribeError::TransportDisconnected) => {}
            other => panic!("Expected transport-disconnected error, got {:?}", other),
        }
        // The entry is pruned; later commands see an idle owner.
        assert!(matches!(
            registry.stop(OwnerId(1)).await,
            Err(VoxscribeError::NotJoined)
        ));
    }
}
