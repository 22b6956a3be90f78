//! Async driver around [`Engine`]
//!
//! One tokio task per client multiplexes inbound frames, media callbacks, user
//! commands and the display tick with `tokio::select!`. Engine events are
//! applied to the media surface, queued client messages are flushed to the
//! transport, and every iteration publishes a fresh [`Snapshot`].

use crate::engine::{Engine, EngineEvent, Snapshot};
use crate::error::{EngineError, EngineResult};
use crate::protocol;
use crate::types::*;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Text-frame connection to the session authority
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> EngineResult<()>;

    /// Next inbound frame, `None` once the connection is gone
    async fn recv(&mut self) -> Option<String>;
}

/// In-memory transport over a pair of tokio channels
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// The authority's end of a [`ChannelTransport`]
#[derive(Debug)]
pub struct ChannelPeer {
    /// Frames sent by the client
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client
    pub inbound: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, ChannelPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            ChannelPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, text: String) -> EngineResult<()> {
        self.outbound
            .send(text)
            .map_err(|_| EngineError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEventKind {
    BufferedEnough,
    PlaybackStarted,
}

/// Media callback, tagged with the epoch the media was loaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaEvent {
    pub epoch: Epoch,
    pub kind: MediaEventKind,
}

/// Audio/video element the round's clip plays on
pub trait MediaSurface: Send {
    /// Load `media` for `epoch`, reporting progress on `events`. Replaces
    /// whatever was loaded before.
    fn load(&mut self, media: &str, epoch: Epoch, events: mpsc::UnboundedSender<MediaEvent>);

    fn play(&mut self, epoch: Epoch);

    fn pause(&mut self);
}

/// Media surface that buffers after a fixed latency and starts playing
/// immediately when asked
#[derive(Debug)]
pub struct SimulatedMedia {
    latency: Duration,
    loaded: Option<(Epoch, mpsc::UnboundedSender<MediaEvent>)>,
    tasks: JoinSet<()>,
}

impl SimulatedMedia {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            loaded: None,
            tasks: JoinSet::new(),
        }
    }
}

impl MediaSurface for SimulatedMedia {
    fn load(&mut self, media: &str, epoch: Epoch, events: mpsc::UnboundedSender<MediaEvent>) {
        // Pending callbacks of the previous clip must never arrive
        self.tasks.abort_all();
        tracing::debug!("Loading {} for epoch {}", media, epoch);

        let latency = self.latency;
        let tx = events.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = tx.send(MediaEvent {
                epoch,
                kind: MediaEventKind::BufferedEnough,
            });
        });
        self.loaded = Some((epoch, events));
    }

    fn play(&mut self, epoch: Epoch) {
        match &self.loaded {
            Some((loaded, events)) if *loaded == epoch => {
                tracing::debug!("Playing media of epoch {}", epoch);
                let _ = events.send(MediaEvent {
                    epoch,
                    kind: MediaEventKind::PlaybackStarted,
                });
            }
            _ => tracing::debug!("Ignoring play for unloaded epoch {}", epoch),
        }
    }

    fn pause(&mut self) {
        self.tasks.abort_all();
    }
}

/// Input from the local player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Skip,
    /// The transport reconnected; re-announce ourselves
    Reconnected,
    Quit,
}

/// Embedder's side of a running [`Session`]
#[derive(Debug)]
pub struct SessionHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub snapshots: watch::Receiver<Snapshot>,
}

pub struct Session {
    engine: Engine,
    transport: Option<Box<dyn Transport>>,
    media: Box<dyn MediaSurface>,
    media_tx: mpsc::UnboundedSender<MediaEvent>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
}

/// Wait for the next inbound frame; without a transport, wait forever
async fn next_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<String> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending::<Option<String>>().await,
    }
}

impl Session {
    pub fn new(engine: Engine, media: Box<dyn MediaSurface>) -> (Self, SessionHandle) {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let session = Self {
            engine,
            transport: None,
            media,
            media_tx,
            media_rx,
            commands: command_rx,
            snapshot_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (session, handle)
    }

    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Drive the game until it ends. Returns the final standings.
    pub async fn run(mut self) -> EngineResult<Vec<Player>> {
        tracing::info!(
            "Session started for {} ({:?})",
            self.engine.player_id(),
            self.engine.mode()
        );

        let events = self.engine.start()?;
        let mut game_over = self.apply(events);
        self.flush().await?;
        self.publish();

        let mut interval = tokio::time::interval(self.engine.config().tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        while game_over.is_none() {
            let events = tokio::select! {
                frame = next_frame(&mut self.transport) => match frame {
                    Some(text) => match protocol::decode(&text) {
                        Ok(msg) => self.engine.handle_server_message(msg),
                        Err(e) => {
                            tracing::error!("Failed to parse server message: {}", e);
                            Vec::new()
                        }
                    },
                    None => {
                        tracing::info!("Transport closed");
                        return Err(EngineError::TransportClosed);
                    }
                },

                Some(event) = self.media_rx.recv() => match event.kind {
                    MediaEventKind::BufferedEnough => self.engine.on_media_buffered(event.epoch),
                    MediaEventKind::PlaybackStarted => self.engine.on_playback_started(event.epoch),
                },

                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Quit) => {
                        tracing::info!("Quitting");
                        self.media.pause();
                        return Ok(self.engine.players());
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        commands_open = false;
                        Vec::new()
                    }
                },

                _ = interval.tick() => self.engine.tick(),
            };

            game_over = self.apply(events);
            self.flush().await?;
            self.publish();
        }

        Ok(game_over.unwrap_or_default())
    }

    fn handle_command(&mut self, command: Command) -> Vec<EngineEvent> {
        let me = self.engine.player_id().to_string();
        match command {
            Command::Submit(text) => {
                if let Err(e) = self.engine.submit(&me, &text) {
                    tracing::warn!("Answer not accepted: {}", e);
                }
                Vec::new()
            }
            Command::Skip => self.engine.request_skip(&me).unwrap_or_else(|e| {
                tracing::warn!("Skip not accepted: {}", e);
                Vec::new()
            }),
            Command::Reconnected => {
                self.engine.rejoin();
                Vec::new()
            }
            Command::Quit => Vec::new(),
        }
    }

    /// Act on engine events. Returns the standings once the game is over.
    fn apply(&mut self, events: Vec<EngineEvent>) -> Option<Vec<Player>> {
        let mut game_over = None;
        for event in events {
            match event {
                EngineEvent::RoundStarted { epoch, round } => {
                    tracing::info!("Round {} ({})", round.index, round.question_id());
                    self.media.pause();
                    self.media.load(round.media(), epoch, self.media_tx.clone());
                }
                EngineEvent::PhaseChanged { round_index, phase } => {
                    tracing::info!("Round {} is now {:?}", round_index, phase);
                }
                EngineEvent::PlayMedia { epoch } => self.media.play(epoch),
                EngineEvent::PauseMedia { .. } => self.media.pause(),
                EngineEvent::AnswersResolved {
                    round_index,
                    resolution,
                } => {
                    tracing::info!(
                        "Round {} resolved, correct: {:?}",
                        round_index,
                        resolution.correct_players()
                    );
                }
                EngineEvent::SkipVotesUpdated { voters } => {
                    tracing::debug!("Skip votes: {:?}", voters);
                }
                EngineEvent::Error { code, message } => {
                    tracing::warn!("Authority reported {}: {}", code, message);
                }
                EngineEvent::GameOver { players } => {
                    self.media.pause();
                    game_over = Some(players);
                }
            }
        }
        game_over
    }

    async fn flush(&mut self) -> EngineResult<()> {
        for msg in self.engine.drain_outbound() {
            let text = protocol::encode(&msg)?;
            match self.transport.as_mut() {
                Some(transport) => transport.send(text).await?,
                None => tracing::trace!("No transport, dropping {}", text),
            }
        }
        Ok(())
    }

    fn publish(&mut self) {
        self.snapshot_tx.send_replace(self.engine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_round_trip() {
        let (mut transport, mut peer) = ChannelTransport::pair();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.outbound.recv().await.unwrap(), "hello");

        peer.inbound.send("world".to_string()).unwrap();
        assert_eq!(transport.recv().await.unwrap(), "world");

        drop(peer);
        assert!(transport.recv().await.is_none());
        assert!(matches!(
            transport.send("late".to_string()).await,
            Err(EngineError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_simulated_media_reports_buffering_and_playback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut media = SimulatedMedia::new(Duration::from_millis(5));

        media.load("clip.mp4", 3, tx);
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            MediaEvent {
                epoch: 3,
                kind: MediaEventKind::BufferedEnough
            }
        );

        media.play(2);
        media.play(3);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, MediaEventKind::PlaybackStarted);
        assert_eq!(event.epoch, 3);
    }

    #[tokio::test]
    async fn test_reload_cancels_pending_buffering() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut media = SimulatedMedia::new(Duration::from_millis(20));

        media.load("a.mp4", 1, tx.clone());
        media.load("b.mp4", 2, tx);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.epoch, 2);
    }
}
