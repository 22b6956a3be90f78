use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages sent from this client to the session authority
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t")]
pub enum ClientMessage {
    #[serde(rename = "room.rejoin", rename_all = "camelCase")]
    RoomRejoin { room_id: RoomId, player_id: PlayerId },
    #[serde(rename = "room.join", rename_all = "camelCase")]
    RoomJoin {
        room_id: RoomId,
        player_id: PlayerId,
        display_name: String,
    },
    #[serde(rename = "game.ready", rename_all = "camelCase")]
    GameReady { room_id: RoomId },
    #[serde(rename = "game.answer", rename_all = "camelCase")]
    GameAnswer { room_id: RoomId, text: String },
    #[serde(rename = "game.skipVote", rename_all = "camelCase")]
    GameSkipVote { room_id: RoomId },
    #[serde(rename = "game.getState", rename_all = "camelCase")]
    GameGetState { room_id: RoomId },
}

/// Room-level phase as reported in `room.state`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    Lobby,
    Loading,
    Starting,
    Playing,
    Reveal,
    Transitioning,
    Ended,
}

impl RoomPhase {
    /// The round phase this room phase maps to, if a round is in progress
    pub fn round_phase(self) -> Option<Phase> {
        match self {
            RoomPhase::Loading => Some(Phase::Loading),
            RoomPhase::Starting => Some(Phase::Starting),
            RoomPhase::Playing => Some(Phase::Playing),
            RoomPhase::Reveal => Some(Phase::Reveal),
            RoomPhase::Transitioning => Some(Phase::Transitioning),
            RoomPhase::Lobby | RoomPhase::Ended => None,
        }
    }
}

/// Snapshot of the in-progress round carried by `room.state`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundMeta {
    pub round_index: RoundIndex,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub remaining_ms: Option<u64>,
    #[serde(default)]
    pub server_time: Option<Millis>,
    #[serde(default)]
    pub ready_player_ids: Vec<PlayerId>,
    #[serde(default)]
    pub skip_voter_ids: Vec<PlayerId>,
}

/// Messages received from the session authority
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t")]
pub enum ServerMessage {
    #[serde(rename = "room.state", rename_all = "camelCase")]
    RoomState {
        #[serde(default)]
        players: Vec<Player>,
        #[serde(default)]
        questions: Vec<Question>,
        phase: RoomPhase,
        #[serde(default)]
        round_meta: Option<RoundMeta>,
    },
    #[serde(rename = "game.start", rename_all = "camelCase")]
    GameStart {
        questions: Vec<Question>,
        round_index: RoundIndex,
        #[serde(default)]
        players: Vec<Player>,
    },
    #[serde(rename = "game.go", rename_all = "camelCase")]
    GameGo {
        go_at_instant: Millis,
        duration_ms: u64,
        server_time: Millis,
        #[serde(default)]
        round_index: Option<RoundIndex>,
    },
    /// Sent to late joiners and on `game.getState`
    #[serde(rename = "game.sync", rename_all = "camelCase")]
    GameSync {
        started_at: Millis,
        duration_ms: u64,
        remaining_ms: u64,
        server_time: Millis,
        round_index: RoundIndex,
        #[serde(default)]
        phase: Option<Phase>,
    },
    #[serde(rename = "game.reveal", rename_all = "camelCase")]
    GameReveal {
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        round_index: Option<RoundIndex>,
    },
    #[serde(rename = "game.answersValidated", rename_all = "camelCase")]
    AnswersValidated {
        validated: HashMap<PlayerId, bool>,
        #[serde(default)]
        correct_players: Vec<PlayerId>,
        #[serde(default)]
        players: Vec<Player>,
        #[serde(default)]
        round_index: Option<RoundIndex>,
    },
    #[serde(rename = "game.skipVoteUpdated", rename_all = "camelCase")]
    SkipVoteUpdated {
        voter_ids: Vec<PlayerId>,
        #[serde(default)]
        round_index: Option<RoundIndex>,
    },
    #[serde(rename = "game.next", rename_all = "camelCase")]
    GameNext {
        #[serde(default)]
        questions: Vec<Question>,
        round_index: RoundIndex,
    },
    #[serde(rename = "game.end", rename_all = "camelCase")]
    GameEnd {
        #[serde(default)]
        players: Vec<Player>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    /// Any message tag this client does not understand
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Round index the message explicitly refers to, if any
    pub fn round_index(&self) -> Option<RoundIndex> {
        match self {
            ServerMessage::GameStart { round_index, .. }
            | ServerMessage::GameSync { round_index, .. }
            | ServerMessage::GameNext { round_index, .. } => Some(*round_index),
            ServerMessage::GameGo { round_index, .. }
            | ServerMessage::GameReveal { round_index, .. }
            | ServerMessage::AnswersValidated { round_index, .. }
            | ServerMessage::SkipVoteUpdated { round_index, .. } => *round_index,
            ServerMessage::RoomState { round_meta, .. } => {
                round_meta.as_ref().map(|m| m.round_index)
            }
            _ => None,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::RoomState { .. } => "room.state",
            ServerMessage::GameStart { .. } => "game.start",
            ServerMessage::GameGo { .. } => "game.go",
            ServerMessage::GameSync { .. } => "game.sync",
            ServerMessage::GameReveal { .. } => "game.reveal",
            ServerMessage::AnswersValidated { .. } => "game.answersValidated",
            ServerMessage::SkipVoteUpdated { .. } => "game.skipVoteUpdated",
            ServerMessage::GameNext { .. } => "game.next",
            ServerMessage::GameEnd { .. } => "game.end",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Error codes the authority may report
pub mod codes {
    pub const PLAYER_NOT_FOUND: &str = "PLAYER_NOT_FOUND";
    pub const GAME_ALREADY_STARTED: &str = "GAME_ALREADY_STARTED";
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Encode one outbound message as a text frame
pub fn encode(msg: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_go() {
        let msg = decode(r#"{"t":"game.go","goAtInstant":1000,"durationMs":30000,"serverTime":900}"#)
            .unwrap();
        assert_eq!(
            msg,
            ServerMessage::GameGo {
                go_at_instant: 1000,
                duration_ms: 30000,
                server_time: 900,
                round_index: None,
            }
        );
    }

    #[test]
    fn test_decode_sync_defaults_phase() {
        let msg = decode(
            r#"{"t":"game.sync","startedAt":0,"durationMs":30000,"remainingMs":12000,"serverTime":18000,"roundIndex":2}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::GameSync {
                phase, round_index, ..
            } => {
                assert_eq!(phase, None);
                assert_eq!(round_index, 2);
            }
            other => panic!("Expected GameSync, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_room_state_with_questions() {
        let msg = decode(
            r#"{"t":"room.state","players":[{"id":"p1","displayName":"Ada","score":3}],
                "questions":[{"id":"q1","durationMs":20000,"answerText":"Interstellar","mediaReference":"clip.mp4"}],
                "phase":"reveal","roundMeta":{"roundIndex":0,"readyPlayerIds":["p1"]}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::RoomState {
                players,
                questions,
                phase,
                round_meta,
            } => {
                assert_eq!(players[0].display_name.as_deref(), Some("Ada"));
                assert_eq!(questions[0].answer, "Interstellar");
                assert_eq!(questions[0].media, "clip.mp4");
                assert_eq!(phase.round_phase(), Some(Phase::Reveal));
                assert_eq!(round_meta.unwrap().ready_player_ids, vec!["p1".to_string()]);
            }
            other => panic!("Expected RoomState, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_tolerated() {
        let msg = decode(r#"{"t":"chat.message","text":"hi"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_encode_uses_named_tags() {
        let json = encode(&ClientMessage::GameAnswer {
            room_id: "room-1".to_string(),
            text: "Alien".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["t"], "game.answer");
        assert_eq!(value["roomId"], "room-1");
        assert_eq!(value["text"], "Alien");
    }

    #[test]
    fn test_round_index_of_untagged_messages() {
        let msg = ServerMessage::GameReveal {
            duration_ms: Some(5000),
            round_index: None,
        };
        assert_eq!(msg.round_index(), None);
        assert_eq!(msg.name(), "game.reveal");
    }
}
