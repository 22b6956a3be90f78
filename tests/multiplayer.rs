use guessdash::authority::RemoteAuthority;
use guessdash::clock::ManualClock;
use guessdash::config::EngineConfig;
use guessdash::engine::{Engine, EngineEvent};
use guessdash::protocol::{decode, ClientMessage, RoomPhase, RoundMeta, ServerMessage};
use guessdash::types::{Phase, Player, Question};
use std::collections::HashMap;
use std::sync::Arc;

fn question(id: &str, answer: &str, duration_ms: u64) -> Question {
    Question {
        id: id.to_string(),
        duration_ms,
        answer: answer.to_string(),
        media: format!("{}.mp4", id),
    }
}

fn questions() -> Vec<Question> {
    vec![
        question("q0", "Interstellar", 30_000),
        question("q1", "Heat", 30_000),
    ]
}

fn player(id: &str, score: i64) -> Player {
    Player {
        id: id.to_string(),
        display_name: None,
        score,
    }
}

/// Engine that already joined the room; the join message is drained
fn joined(clock: &ManualClock) -> Engine {
    let mut engine = Engine::new(
        Box::new(RemoteAuthority::new("room-1", "me", "Me")),
        Arc::new(clock.clone()),
        EngineConfig::default(),
    );
    engine.start().unwrap();
    engine.drain_outbound();
    engine
}

fn game_start(round_index: u32) -> ServerMessage {
    ServerMessage::GameStart {
        questions: questions(),
        round_index,
        players: vec![player("me", 0), player("them", 0)],
    }
}

fn go(go_at_instant: i64, server_time: i64) -> ServerMessage {
    ServerMessage::GameGo {
        go_at_instant,
        duration_ms: 30_000,
        server_time,
        round_index: None,
    }
}

/// Drive an engine into `Playing` for round 0 with go at local 2000
fn playing(clock: &ManualClock) -> Engine {
    let mut engine = joined(clock);
    engine.handle_server_message(game_start(0));
    engine.on_media_buffered(engine.epoch());
    clock.set(1_000);
    engine.handle_server_message(go(2_000, 1_000));
    clock.set(2_000);
    let events = engine.tick();
    assert!(events.contains(&EngineEvent::PlayMedia {
        epoch: engine.epoch()
    }));
    engine.on_playback_started(engine.epoch());
    assert_eq!(engine.current_phase(), Phase::Playing);
    engine.drain_outbound();
    engine
}

#[test]
fn test_buffering_signals_ready_and_waits() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));

    engine.on_media_buffered(engine.epoch());
    assert_eq!(
        engine.drain_outbound(),
        vec![ClientMessage::GameReady {
            room_id: "room-1".to_string()
        }]
    );
    assert!(engine.snapshot().waiting_for_peers);
    assert_eq!(engine.current_phase(), Phase::Loading);
}

#[test]
fn test_ready_fallback_after_three_seconds() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));

    clock.set(2_999);
    engine.tick();
    assert!(engine.drain_outbound().is_empty());

    clock.set(3_000);
    engine.tick();
    assert!(matches!(
        engine.drain_outbound().as_slice(),
        [ClientMessage::GameReady { .. }]
    ));

    // Buffering afterwards does not report twice
    engine.on_media_buffered(engine.epoch());
    assert!(engine.drain_outbound().is_empty());
}

#[test]
fn test_duplicate_go_arms_timer_once() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));
    engine.on_media_buffered(engine.epoch());

    clock.set(1_000);
    let events = engine.handle_server_message(go(2_000, 1_000));
    assert!(events.contains(&EngineEvent::PhaseChanged {
        round_index: 0,
        phase: Phase::Starting
    }));
    assert!(engine.handle_server_message(go(2_000, 1_000)).is_empty());

    clock.set(2_000);
    engine.tick();
    engine.on_playback_started(engine.epoch());
    assert!(engine.handle_server_message(go(2_000, 1_000)).is_empty());
    assert_eq!(engine.timer_generation(), 1);

    clock.set(12_000);
    assert_eq!(engine.remaining_seconds(), 20.0);
}

#[test]
fn test_go_waits_for_target_instant_on_skewed_clock() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));
    engine.on_media_buffered(engine.epoch());

    // Authority clock runs 400ms ahead of ours
    clock.set(1_000);
    engine.handle_server_message(go(2_400, 1_400));

    clock.set(1_900);
    assert!(!engine
        .tick()
        .iter()
        .any(|e| matches!(e, EngineEvent::PlayMedia { .. })));

    clock.set(2_000);
    assert!(engine
        .tick()
        .iter()
        .any(|e| matches!(e, EngineEvent::PlayMedia { .. })));
}

#[test]
fn test_playback_fallback_starts_timer() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));
    engine.on_media_buffered(engine.epoch());
    clock.set(1_000);
    engine.handle_server_message(go(2_000, 1_000));

    clock.set(2_000);
    engine.tick();
    assert_eq!(engine.current_phase(), Phase::Starting);

    clock.set(4_500);
    engine.tick();
    assert_eq!(engine.current_phase(), Phase::Playing);
    assert_eq!(engine.remaining_seconds(), 30.0);
}

#[test]
fn test_sync_remaining_within_tolerance() {
    let clock = ManualClock::new(49_900);
    let mut engine = joined(&clock);

    // Late joiner: room already playing, authority clock 100ms ahead
    let events = engine.handle_server_message(ServerMessage::RoomState {
        players: vec![player("me", 0)],
        questions: questions(),
        phase: RoomPhase::Playing,
        round_meta: Some(RoundMeta {
            round_index: 0,
            duration_ms: Some(30_000),
            remaining_ms: Some(20_000),
            server_time: Some(50_000),
            ready_player_ids: vec!["them".to_string()],
            skip_voter_ids: Vec::new(),
        }),
    });
    assert!(events.contains(&EngineEvent::PlayMedia { epoch: 1 }));
    assert_eq!(engine.current_phase(), Phase::Playing);

    for elapsed in [0, 1_000, 7_500, 19_900] {
        clock.set(49_900 + elapsed);
        let expected = (20_000 - elapsed) as f64 / 1000.0;
        let remaining = engine.remaining_seconds();
        assert!(
            (remaining - expected).abs() <= 0.15,
            "remaining {} vs expected {}",
            remaining,
            expected
        );
    }

    // Adopted mid-round: the ready fallback is no longer pending
    clock.set(60_000);
    engine.tick();
    assert!(engine.drain_outbound().is_empty());
}

#[test]
fn test_identical_sync_is_noop() {
    let clock = ManualClock::new(10_000);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));

    let sync = ServerMessage::GameSync {
        started_at: 5_000,
        duration_ms: 30_000,
        remaining_ms: 25_000,
        server_time: 10_000,
        round_index: 0,
        phase: None,
    };
    engine.handle_server_message(sync.clone());
    assert_eq!(engine.current_phase(), Phase::Playing);
    assert_eq!(engine.timer_generation(), 1);

    clock.set(10_050);
    engine.handle_server_message(sync);
    assert_eq!(engine.timer_generation(), 1);
}

#[test]
fn test_reconnect_during_reveal_adopts_reveal() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);
    engine.submit("me", "Interstellar").unwrap();
    assert!(matches!(
        engine.drain_outbound().as_slice(),
        [ClientMessage::GameAnswer { text, .. }] if text == "Interstellar"
    ));

    // Connection dropped; we rejoin and learn the round is in reveal
    engine.rejoin();
    assert!(matches!(
        engine.drain_outbound().as_slice(),
        [ClientMessage::RoomRejoin { .. }]
    ));

    clock.set(40_000);
    let msg = decode(
        r#"{"t":"room.state","phase":"reveal","players":[{"id":"me","score":1}],
            "roundMeta":{"roundIndex":0,"durationMs":8000,"remainingMs":6000,"serverTime":40000}}"#,
    )
    .unwrap();
    let events = engine.handle_server_message(msg);

    assert_eq!(engine.current_phase(), Phase::Reveal);
    assert!(events.contains(&EngineEvent::PhaseChanged {
        round_index: 0,
        phase: Phase::Reveal
    }));
    assert_eq!(engine.remaining_seconds(), 6.0);
    assert!(engine.snapshot().is_round_over);
    assert_eq!(engine.players()[0].score, 1);
}

#[test]
fn test_validated_answers_resolve_once() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);

    engine.handle_server_message(ServerMessage::GameReveal {
        duration_ms: Some(8_000),
        round_index: Some(0),
    });
    assert_eq!(engine.current_phase(), Phase::Reveal);

    let validated = ServerMessage::AnswersValidated {
        validated: HashMap::from([("me".to_string(), true), ("them".to_string(), false)]),
        correct_players: vec!["me".to_string()],
        players: vec![player("me", 1), player("them", 0)],
        round_index: Some(0),
    };
    let events = engine.handle_server_message(validated.clone());
    match events.as_slice() {
        [EngineEvent::AnswersResolved { resolution, .. }] => {
            assert_eq!(resolution.correct_players(), vec!["me".to_string()]);
            assert_eq!(resolution.score_deltas.get("me"), Some(&1));
            assert_eq!(resolution.score_deltas.get("them"), None);
        }
        other => panic!("Expected AnswersResolved, got {:?}", other),
    }

    assert!(engine.handle_server_message(validated).is_empty());
    assert!(engine.resolve().is_none());
}

#[test]
fn test_stale_round_messages_are_discarded() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(1));
    assert_eq!(engine.current_round().map(|r| r.index), Some(1));
    let epoch = engine.epoch();

    let events = engine.handle_server_message(ServerMessage::GameReveal {
        duration_ms: None,
        round_index: Some(0),
    });
    assert!(events.is_empty());
    assert_eq!(engine.current_phase(), Phase::Loading);

    assert!(engine
        .handle_server_message(ServerMessage::GameNext {
            questions: Vec::new(),
            round_index: 0,
        })
        .is_empty());
    assert!(engine
        .handle_server_message(ServerMessage::SkipVoteUpdated {
            voter_ids: vec!["them".to_string()],
            round_index: Some(0),
        })
        .is_empty());
    assert_eq!(engine.epoch(), epoch);
}

#[test]
fn test_player_not_found_rejoins() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    let msg = decode(r#"{"t":"error","code":"PLAYER_NOT_FOUND","message":"who?"}"#).unwrap();
    assert!(engine.handle_server_message(msg).is_empty());

    assert_eq!(
        engine.drain_outbound(),
        vec![ClientMessage::RoomJoin {
            room_id: "room-1".to_string(),
            player_id: "me".to_string(),
            display_name: "Me".to_string(),
        }]
    );
    assert!(engine.snapshot().last_error.is_none());
}

#[test]
fn test_missing_reveal_falls_back_after_grace() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);

    // Countdown ends at 32_000; the authority stays silent
    clock.set(32_000);
    engine.tick();
    assert_eq!(engine.current_phase(), Phase::Playing);

    clock.set(34_999);
    engine.tick();
    assert_eq!(engine.current_phase(), Phase::Playing);

    clock.set(35_000);
    engine.tick();
    assert_eq!(engine.current_phase(), Phase::Reveal);
    assert!(engine.resolution().is_none());

    // The late reveal replaces our countdown with the authority's
    clock.set(35_500);
    engine.handle_server_message(ServerMessage::GameReveal {
        duration_ms: Some(8_000),
        round_index: None,
    });
    assert_eq!(engine.remaining_seconds(), 8.0);
}

#[test]
fn test_next_round_and_end() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);
    let first_epoch = engine.epoch();

    engine.handle_server_message(ServerMessage::GameReveal {
        duration_ms: Some(5_000),
        round_index: Some(0),
    });
    clock.set(10_000);
    let events = engine.tick();
    assert!(events.contains(&EngineEvent::PauseMedia { epoch: first_epoch }));
    assert_eq!(engine.current_phase(), Phase::Transitioning);

    let events = engine.handle_server_message(ServerMessage::GameNext {
        questions: Vec::new(),
        round_index: 1,
    });
    assert!(matches!(
        &events[0],
        EngineEvent::RoundStarted { round, .. } if round.question_id() == "q1"
    ));
    assert_eq!(engine.epoch(), first_epoch + 1);

    // Duplicate next is ignored
    assert!(engine
        .handle_server_message(ServerMessage::GameNext {
            questions: Vec::new(),
            round_index: 1,
        })
        .is_empty());

    let events = engine.handle_server_message(ServerMessage::GameEnd {
        players: vec![player("me", 3), player("them", 2)],
    });
    assert!(matches!(
        events.last(),
        Some(EngineEvent::GameOver { players }) if players.len() == 2
    ));
    assert!(engine.is_finished());
}

#[test]
fn test_skip_vote_is_forwarded() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);

    let events = engine.request_skip("me").unwrap();
    assert_eq!(
        events,
        vec![EngineEvent::SkipVotesUpdated {
            voters: vec!["me".to_string()]
        }]
    );
    assert!(matches!(
        engine.drain_outbound().as_slice(),
        [ClientMessage::GameSkipVote { .. }]
    ));
    assert!(engine.request_skip("me").unwrap().is_empty());
    assert_eq!(engine.current_phase(), Phase::Playing);

    engine.handle_server_message(ServerMessage::SkipVoteUpdated {
        voter_ids: vec!["me".to_string(), "them".to_string()],
        round_index: None,
    });
    assert_eq!(engine.snapshot().skip_voters.len(), 2);
}

#[test]
fn test_sync_during_reveal_skips_to_reveal() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));
    assert_eq!(engine.current_phase(), Phase::Loading);

    clock.set(40_000);
    let msg = decode(
        r#"{"t":"game.sync","startedAt":2000,"durationMs":8000,"remainingMs":3000,
            "serverTime":40000,"roundIndex":0,"phase":"reveal"}"#,
    )
    .unwrap();
    let events = engine.handle_server_message(msg);

    assert_eq!(engine.current_phase(), Phase::Reveal);
    assert!(events.contains(&EngineEvent::PlayMedia { epoch: 1 }));
    assert_eq!(engine.remaining_seconds(), 3.0);

    // Loading fallbacks of the skipped phases never fire
    clock.set(50_000);
    engine.tick();
    assert!(engine.drain_outbound().is_empty());
}

fn untagged_result() -> ServerMessage {
    ServerMessage::AnswersValidated {
        validated: HashMap::from([("me".to_string(), true)]),
        correct_players: vec!["me".to_string()],
        players: vec![player("me", 1), player("them", 0)],
        round_index: None,
    }
}

#[test]
fn test_late_untagged_result_does_not_resolve_next_round() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);

    // Authority goes quiet: local reveal at 35_000, local advance at 70_000
    for t in [32_000, 35_000, 65_000, 70_000] {
        clock.set(t);
        engine.tick();
    }
    assert_eq!(engine.current_round().map(|r| r.index), Some(1));
    assert_eq!(engine.current_phase(), Phase::Loading);

    // Round 0's result shows up late and without a round index
    assert!(engine.handle_server_message(untagged_result()).is_empty());
    assert!(engine.resolution().is_none());

    engine.handle_server_message(go(71_000, 70_000));
    clock.set(71_000);
    engine.tick();
    engine.on_playback_started(engine.epoch());
    assert_eq!(engine.current_phase(), Phase::Playing);

    assert!(engine.handle_server_message(untagged_result()).is_empty());
    engine.submit("me", "Heat").unwrap();

    // A result naming the round still applies
    let events = engine.handle_server_message(ServerMessage::AnswersValidated {
        validated: HashMap::from([("me".to_string(), true)]),
        correct_players: Vec::new(),
        players: Vec::new(),
        round_index: Some(1),
    });
    assert!(matches!(
        events.as_slice(),
        [EngineEvent::AnswersResolved { round_index: 1, .. }]
    ));
}

#[test]
fn test_untagged_result_applies_to_running_round() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);
    assert_eq!(engine.handle_server_message(untagged_result()).len(), 1);
    assert!(engine.resolution().is_some());

    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));
    assert!(engine.handle_server_message(untagged_result()).is_empty());
}

#[test]
fn test_reveal_while_loading_plays_clip() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);
    engine.handle_server_message(game_start(0));

    let events = engine.handle_server_message(ServerMessage::GameReveal {
        duration_ms: Some(8_000),
        round_index: Some(0),
    });
    assert_eq!(engine.current_phase(), Phase::Reveal);
    assert!(events.contains(&EngineEvent::PlayMedia { epoch: 1 }));

    // The ready fallback of the skipped loading phase stays silent
    clock.set(3_000);
    engine.tick();
    engine.on_media_buffered(1);
    assert!(engine.drain_outbound().is_empty());
    assert_eq!(engine.remaining_seconds(), 5.0);
}

#[test]
fn test_repeated_reveal_keeps_countdown() {
    let clock = ManualClock::new(0);
    let mut engine = playing(&clock);

    let reveal = ServerMessage::GameReveal {
        duration_ms: None,
        round_index: None,
    };
    engine.handle_server_message(reveal.clone());
    assert_eq!(engine.current_phase(), Phase::Reveal);

    clock.set(5_000);
    assert!(engine.handle_server_message(reveal).is_empty());
    assert_eq!(engine.remaining_seconds(), 27.0);
}

#[test]
fn test_room_state_in_starting_requests_state() {
    let clock = ManualClock::new(0);
    let mut engine = joined(&clock);

    engine.handle_server_message(ServerMessage::RoomState {
        players: vec![player("me", 0)],
        questions: questions(),
        phase: RoomPhase::Starting,
        round_meta: Some(RoundMeta {
            round_index: 0,
            duration_ms: None,
            remaining_ms: None,
            server_time: None,
            ready_player_ids: vec!["me".to_string()],
            skip_voter_ids: Vec::new(),
        }),
    });
    assert_eq!(engine.current_phase(), Phase::Starting);
    assert_eq!(
        engine.drain_outbound(),
        vec![ClientMessage::GameGetState {
            room_id: "room-1".to_string()
        }]
    );
}
