//! Who decides: the local engine (single-player) or the session authority
//!
//! The engine is written once against [`Authority`]; the two modes differ
//! only in the strategy plugged in.

use crate::protocol::ClientMessage;
use crate::readiness::GoSignal;
use crate::timer::ClockSample;
use crate::types::*;

pub trait Authority: Send {
    fn mode(&self) -> Mode;

    /// Id of the player using this client
    fn player_id(&self) -> &str;

    /// Anchor for the guess countdown once playback is confirmed
    fn reference_instant(
        &self,
        local_now: Millis,
        go: Option<&GoSignal>,
    ) -> (Millis, Option<ClockSample>);

    fn report_ready(&mut self);

    fn report_answer(&mut self, text: &str);

    fn request_skip(&mut self);

    /// Ask for a fresh `room.state` / `game.sync`
    fn request_state(&mut self);

    fn join(&mut self);

    fn rejoin(&mut self);

    /// Messages queued for the transport since the last call
    fn drain_outbound(&mut self) -> Vec<ClientMessage>;
}

/// Single-player: the local wall clock is the only authority
#[derive(Debug, Clone)]
pub struct LocalAuthority {
    player_id: PlayerId,
}

impl LocalAuthority {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
        }
    }
}

impl Authority for LocalAuthority {
    fn mode(&self) -> Mode {
        Mode::SinglePlayer
    }

    fn player_id(&self) -> &str {
        &self.player_id
    }

    fn reference_instant(
        &self,
        local_now: Millis,
        _go: Option<&GoSignal>,
    ) -> (Millis, Option<ClockSample>) {
        (local_now, None)
    }

    fn report_ready(&mut self) {}

    fn report_answer(&mut self, _text: &str) {}

    fn request_skip(&mut self) {}

    fn request_state(&mut self) {}

    fn join(&mut self) {}

    fn rejoin(&mut self) {}

    fn drain_outbound(&mut self) -> Vec<ClientMessage> {
        Vec::new()
    }
}

/// Multiplayer: everything is decided by the session authority
#[derive(Debug, Clone)]
pub struct RemoteAuthority {
    room_id: RoomId,
    player_id: PlayerId,
    display_name: String,
    outbox: Vec<ClientMessage>,
}

impl RemoteAuthority {
    pub fn new(
        room_id: impl Into<RoomId>,
        player_id: impl Into<PlayerId>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            player_id: player_id.into(),
            display_name: display_name.into(),
            outbox: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn push(&mut self, msg: ClientMessage) {
        tracing::debug!("Queueing outbound message: {:?}", msg);
        self.outbox.push(msg);
    }
}

impl Authority for RemoteAuthority {
    fn mode(&self) -> Mode {
        Mode::Multiplayer
    }

    fn player_id(&self) -> &str {
        &self.player_id
    }

    fn reference_instant(
        &self,
        local_now: Millis,
        go: Option<&GoSignal>,
    ) -> (Millis, Option<ClockSample>) {
        match go {
            Some(go) => (go.go_at_instant, Some(go.sample)),
            None => (local_now, None),
        }
    }

    fn report_ready(&mut self) {
        self.push(ClientMessage::GameReady {
            room_id: self.room_id.clone(),
        });
    }

    fn report_answer(&mut self, text: &str) {
        self.push(ClientMessage::GameAnswer {
            room_id: self.room_id.clone(),
            text: text.to_string(),
        });
    }

    fn request_skip(&mut self) {
        self.push(ClientMessage::GameSkipVote {
            room_id: self.room_id.clone(),
        });
    }

    fn request_state(&mut self) {
        self.push(ClientMessage::GameGetState {
            room_id: self.room_id.clone(),
        });
    }

    fn join(&mut self) {
        self.push(ClientMessage::RoomJoin {
            room_id: self.room_id.clone(),
            player_id: self.player_id.clone(),
            display_name: self.display_name.clone(),
        });
    }

    fn rejoin(&mut self) {
        self.push(ClientMessage::RoomRejoin {
            room_id: self.room_id.clone(),
            player_id: self.player_id.clone(),
        });
    }

    fn drain_outbound(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }
}
