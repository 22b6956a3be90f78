//! Game-session engine
//!
//! Composes the phase machine, timer, readiness and answer coordinators behind
//! one owner. All per-round state lives in a [`RoundState`] tagged with the
//! current epoch; starting or adopting a round replaces it wholesale, which
//! drops every pending race of the previous round.
//!
//! The engine does no I/O. Callers feed it inbound messages, media callbacks
//! and ticks, apply the returned [`EngineEvent`]s, and ship
//! [`Engine::drain_outbound`] to the transport.

use crate::answer::{AnswerCoordinator, AnswerMatcher, NormalizedMatcher, Resolution, SkipOutcome};
use crate::authority::Authority;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::phase::PhaseMachine;
use crate::protocol::{codes, ClientMessage, RoomPhase, RoundMeta, ServerMessage};
use crate::race::Race;
use crate::readiness::{GoSignal, ReadinessAction, ReadinessCoordinator};
use crate::timer::{ClockSample, TimerReconciler};
use crate::types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Something the embedding layer has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// New epoch: cancel everything from the previous one and load this media
    RoundStarted { epoch: Epoch, round: Round },
    PhaseChanged {
        round_index: RoundIndex,
        phase: Phase,
    },
    PlayMedia { epoch: Epoch },
    PauseMedia { epoch: Epoch },
    AnswersResolved {
        round_index: RoundIndex,
        resolution: Resolution,
    },
    SkipVotesUpdated { voters: Vec<PlayerId> },
    /// Unrecoverable authority-reported error, for the presentation layer
    Error { code: String, message: String },
    GameOver { players: Vec<Player> },
}

/// Read-only view for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub epoch: Epoch,
    pub round: Option<Round>,
    pub phase: Phase,
    pub waiting_for_peers: bool,
    pub is_round_over: bool,
    pub finished: bool,
    pub remaining_seconds: f64,
    pub has_signaled_ready: bool,
    pub ready_peers: Vec<PlayerId>,
    pub validated: HashMap<PlayerId, bool>,
    pub skip_voters: Vec<PlayerId>,
    pub players: Vec<Player>,
    pub last_error: Option<(String, String)>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            epoch: 0,
            round: None,
            phase: Phase::Loading,
            waiting_for_peers: false,
            is_round_over: false,
            finished: false,
            remaining_seconds: 0.0,
            has_signaled_ready: false,
            ready_peers: Vec::new(),
            validated: HashMap::new(),
            skip_voters: Vec::new(),
            players: Vec::new(),
            last_error: None,
        }
    }
}

/// Everything scoped to one round epoch
#[derive(Debug)]
struct RoundState {
    epoch: Epoch,
    timer: TimerReconciler,
    readiness: ReadinessCoordinator,
    answers: AnswerCoordinator,
    playing_started_at: Option<Millis>,
    /// Multiplayer: local countdown hit zero, waiting for `game.reveal`
    reveal_race: Option<Race>,
    /// Reveal entered by the local fallback; the authority's reveal re-arms it
    reveal_forced: bool,
    /// Multiplayer: round begun by the local advance fallback, not confirmed
    /// by the authority yet
    started_locally: bool,
    /// Multiplayer: reveal over, waiting for `game.next` / `game.end`
    advance_race: Option<Race>,
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    authority: Box<dyn Authority>,
    matcher: Box<dyn AnswerMatcher>,
    machine: PhaseMachine,
    epoch: Epoch,
    state: Option<RoundState>,
    questions: Vec<Question>,
    players: BTreeMap<PlayerId, Player>,
    last_error: Option<(String, String)>,
}

impl Engine {
    pub fn new(authority: Box<dyn Authority>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let machine = PhaseMachine::new(authority.mode());
        Self {
            clock,
            config,
            authority,
            matcher: Box::new(NormalizedMatcher),
            machine,
            epoch: 0,
            state: None,
            questions: Vec::new(),
            players: BTreeMap::new(),
            last_error: None,
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn AnswerMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Questions to play (single-player) or the fallback list (multiplayer)
    pub fn with_questions(mut self, questions: Vec<Question>) -> Self {
        self.questions = questions;
        self
    }

    pub fn mode(&self) -> Mode {
        self.authority.mode()
    }

    pub fn player_id(&self) -> &str {
        self.authority.player_id()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_phase(&self) -> Phase {
        self.machine.current()
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.machine.round()
    }

    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    pub fn players(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    /// Insert or rename a player (single-player roster)
    pub fn register_player(&mut self, id: &str, display_name: Option<String>) {
        let player = self.players.entry(id.to_string()).or_insert_with(|| Player {
            id: id.to_string(),
            display_name: None,
            score: 0,
        });
        if display_name.is_some() {
            player.display_name = display_name;
        }
    }

    /// Start the session: first round locally, or join the room remotely
    pub fn start(&mut self) -> EngineResult<Vec<EngineEvent>> {
        match self.mode() {
            Mode::SinglePlayer => {
                if self.questions.is_empty() {
                    return Err(EngineError::NoActiveRound);
                }
                let me = self.player_id().to_string();
                self.register_player(&me, None);
                Ok(self.begin_round(0))
            }
            Mode::Multiplayer => {
                self.authority.join();
                Ok(Vec::new())
            }
        }
    }

    /// Re-announce ourselves after the transport reconnected
    pub fn rejoin(&mut self) {
        self.authority.rejoin();
    }

    pub fn drain_outbound(&mut self) -> Vec<ClientMessage> {
        self.authority.drain_outbound()
    }

    // ========== Round lifecycle ==========

    /// Begin `round` in `Loading` under a fresh epoch
    pub fn start_round(&mut self, round: Round) -> EngineResult<Vec<EngineEvent>> {
        self.machine.start_round(round.clone())?;
        Ok(self.new_epoch(round))
    }

    /// Advance to the next phase (or `explicit`), running its entry actions
    pub fn advance_phase(&mut self, explicit: Option<Phase>) -> EngineResult<Vec<EngineEvent>> {
        let now = self.clock.now_ms();
        let from = self.machine.current();
        let to = explicit
            .or_else(|| self.machine.next_phase())
            .ok_or(EngineError::InvalidTransition {
                from,
                to: Phase::Loading,
            })?;

        match to {
            Phase::Playing => self.enter_playing(now, false),
            Phase::Reveal => self.enter_reveal(now, None),
            Phase::Transitioning => self.enter_transitioning(now),
            _ => {
                let phase = self.machine.advance(Some(to))?;
                Ok(self.phase_changed(phase))
            }
        }
    }

    fn new_epoch(&mut self, round: Round) -> Vec<EngineEvent> {
        let now = self.clock.now_ms();
        self.epoch += 1;
        self.state = Some(RoundState {
            epoch: self.epoch,
            timer: TimerReconciler::new(),
            readiness: ReadinessCoordinator::new(
                self.mode(),
                self.epoch,
                now,
                self.config.readiness_timeouts(),
            ),
            answers: AnswerCoordinator::new(self.mode(), self.config.points_per_correct),
            playing_started_at: None,
            reveal_race: None,
            reveal_forced: false,
            started_locally: false,
            advance_race: None,
        });

        tracing::debug!("Epoch {} owns round {}", self.epoch, round.index);
        vec![
            EngineEvent::RoundStarted {
                epoch: self.epoch,
                round: round.clone(),
            },
            EngineEvent::PhaseChanged {
                round_index: round.index,
                phase: self.machine.current(),
            },
        ]
    }

    /// Start the round at `index` of the known question list
    fn begin_round(&mut self, index: RoundIndex) -> Vec<EngineEvent> {
        let Some(question) = self.questions.get(index as usize).cloned() else {
            tracing::warn!("No question for round {}, requesting state", index);
            self.authority.request_state();
            return Vec::new();
        };
        let round = Round::new(index, question);

        if let Err(e) = self.machine.start_round(round.clone()) {
            // The authority moved on without us; take its word for it
            tracing::debug!("Adopting round {} directly: {}", index, e);
            self.machine.adopt(round.clone(), Phase::Loading);
        }
        self.new_epoch(round)
    }

    /// Move to the following round, or finish when none remains
    fn next_round_or_finish(&mut self) -> Vec<EngineEvent> {
        let next = self.machine.round_index().map(|i| i + 1).unwrap_or(0);
        if (next as usize) < self.questions.len() {
            self.begin_round(next)
        } else {
            self.finish()
        }
    }

    fn finish(&mut self) -> Vec<EngineEvent> {
        if self.machine.is_finished() {
            return Vec::new();
        }
        self.machine.finish();
        let mut events = Vec::new();
        if let Some(state) = &self.state {
            events.push(EngineEvent::PauseMedia { epoch: state.epoch });
        }
        // Nothing of the last round may fire after the summary
        self.epoch += 1;
        self.state = None;
        events.push(EngineEvent::GameOver {
            players: self.players(),
        });
        events
    }

    fn phase_changed(&self, phase: Phase) -> Vec<EngineEvent> {
        match self.machine.round_index() {
            Some(round_index) => vec![EngineEvent::PhaseChanged { round_index, phase }],
            None => Vec::new(),
        }
    }

    fn enter_playing(&mut self, now: Millis, forced: bool) -> EngineResult<Vec<EngineEvent>> {
        self.machine.advance(Some(Phase::Playing))?;
        let duration = self.round_duration();
        let state = self.state.as_mut().ok_or(EngineError::NoActiveRound)?;

        let go = state.readiness.go();
        let duration = go.map(|g| g.duration_ms).unwrap_or(duration);
        let (reference, sample) = if forced {
            (now, None)
        } else {
            self.authority.reference_instant(now, go.as_ref())
        };

        state.timer.disarm();
        state.timer.arm(reference, duration, sample);
        state.playing_started_at = Some(now);
        state.answers.clear_skip_votes();
        Ok(self.phase_changed(Phase::Playing))
    }

    fn enter_reveal(
        &mut self,
        now: Millis,
        authority_duration: Option<u64>,
    ) -> EngineResult<Vec<EngineEvent>> {
        self.machine.advance(Some(Phase::Reveal))?;
        Ok(self.reveal_entered(now, authority_duration))
    }

    /// Reveal from any earlier phase; used when the authority or a fallback
    /// decides guessing is over
    fn force_reveal(&mut self, now: Millis, authority_duration: Option<u64>) -> Vec<EngineEvent> {
        let mut skipped_playback = false;
        match self.machine.current() {
            Phase::Playing => {
                if let Err(e) = self.machine.advance(Some(Phase::Reveal)) {
                    tracing::error!("Failed to enter reveal: {}", e);
                    return Vec::new();
                }
            }
            Phase::Loading | Phase::Starting => {
                let Some(round) = self.machine.round().cloned() else {
                    return Vec::new();
                };
                self.machine.adopt(round, Phase::Reveal);
                skipped_playback = true;
            }
            Phase::Reveal | Phase::Transitioning => return Vec::new(),
        }

        let mut events = self.reveal_entered(now, authority_duration);
        if skipped_playback {
            if let Some(state) = self.state.as_mut() {
                // Past the readiness handshake; reveal shows the clip
                state.readiness.mark_in_progress();
                events.push(EngineEvent::PlayMedia { epoch: state.epoch });
            }
        }
        events
    }

    fn reveal_entered(&mut self, now: Millis, authority_duration: Option<u64>) -> Vec<EngineEvent> {
        let duration = authority_duration.unwrap_or_else(|| self.round_duration());
        let mut events = self.phase_changed(Phase::Reveal);

        if let Some(state) = self.state.as_mut() {
            state.reveal_race = None;
            state.reveal_forced = false;
            state.answers.clear_skip_votes();
            state.timer.disarm();
            state.timer.arm(now, duration, None);
        }

        if self.mode() == Mode::SinglePlayer {
            events.extend(self.resolve_and_score());
        }
        events
    }

    fn enter_transitioning(&mut self, now: Millis) -> EngineResult<Vec<EngineEvent>> {
        self.machine.advance(Some(Phase::Transitioning))?;
        let mut events = self.phase_changed(Phase::Transitioning);

        if let Some(state) = self.state.as_mut() {
            state.timer.disarm();
            state.answers.clear_skip_votes();
            events.push(EngineEvent::PauseMedia { epoch: state.epoch });
            if self.authority.mode() == Mode::Multiplayer {
                state.advance_race = Some(Race::new(
                    state.epoch,
                    now.saturating_add(to_millis(self.config.advance_grace_ms)),
                ));
            }
        }

        if self.mode() == Mode::SinglePlayer {
            events.extend(self.next_round_or_finish());
        }
        Ok(events)
    }

    fn round_duration(&self) -> u64 {
        self.machine.round().map(|r| r.duration_ms()).unwrap_or(0)
    }

    // ========== Timer ==========

    pub fn remaining_seconds(&mut self) -> f64 {
        let now = self.clock.now_ms();
        match self.state.as_mut() {
            Some(state) => state.timer.remaining_seconds(now),
            None => 0.0,
        }
    }

    pub fn is_expired(&mut self) -> bool {
        let now = self.clock.now_ms();
        match self.state.as_mut() {
            Some(state) => state.timer.is_expired(now),
            None => false,
        }
    }

    /// Number of effective timer arms in the current epoch
    pub fn timer_generation(&self) -> u64 {
        self.state.as_ref().map(|s| s.timer.generation()).unwrap_or(0)
    }

    // ========== Answers & skip ==========

    /// Buffer an answer. Only accepted while playing; never scored here.
    pub fn submit(&mut self, player_id: &str, text: &str) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let phase = self.machine.current();
        let state = self.state.as_mut().ok_or(EngineError::NoActiveRound)?;

        let phase_time = state
            .playing_started_at
            .map(|start| now.saturating_sub(start).max(0) as u64)
            .unwrap_or(0);
        state.answers.submit(player_id, text, phase, phase_time)?;

        if player_id == self.authority.player_id() {
            self.authority.report_answer(text);
        }
        Ok(())
    }

    pub fn request_skip(&mut self, player_id: &str) -> EngineResult<Vec<EngineEvent>> {
        let now = self.clock.now_ms();
        let phase = self.machine.current();
        if !matches!(phase, Phase::Playing | Phase::Reveal) {
            tracing::debug!("Skip ignored in phase {:?}", phase);
            return Ok(Vec::new());
        }
        let state = self.state.as_mut().ok_or(EngineError::NoActiveRound)?;

        match state.answers.request_skip(player_id) {
            SkipOutcome::ResolveNow => {
                tracing::info!("Skipping {:?}", phase);
                match phase {
                    Phase::Playing => self.enter_reveal(now, None),
                    _ => self.enter_transitioning(now),
                }
            }
            SkipOutcome::AwaitAuthority => {
                let voters = state.answers.skip_votes().iter().cloned().collect();
                if player_id == self.authority.player_id() {
                    self.authority.request_skip();
                }
                Ok(vec![EngineEvent::SkipVotesUpdated { voters }])
            }
            SkipOutcome::Duplicate => Ok(Vec::new()),
        }
    }

    /// Resolve buffered answers against the round's answer text. `None` if
    /// the round was already resolved.
    pub fn resolve(&mut self) -> Option<Resolution> {
        let answer = self.machine.round()?.answer_text().to_string();
        let state = self.state.as_mut()?;
        state.answers.resolve(&answer, self.matcher.as_ref())
    }

    fn resolve_and_score(&mut self) -> Vec<EngineEvent> {
        let Some(resolution) = self.resolve() else {
            return Vec::new();
        };
        for (player_id, delta) in &resolution.score_deltas {
            self.register_player(player_id, None);
            if let Some(player) = self.players.get_mut(player_id) {
                player.score += delta;
            }
        }
        match self.machine.round_index() {
            Some(round_index) => vec![EngineEvent::AnswersResolved {
                round_index,
                resolution,
            }],
            None => Vec::new(),
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.state.as_ref()?.answers.resolution()
    }

    // ========== Media callbacks ==========

    pub fn on_media_buffered(&mut self, epoch: Epoch) -> Vec<EngineEvent> {
        if epoch != self.epoch {
            tracing::trace!("Discarding buffered event from epoch {}", epoch);
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let Some(state) = self.state.as_mut() else {
            return Vec::new();
        };
        let actions = state.readiness.on_local_media_buffered();
        self.apply_readiness(actions, now)
    }

    pub fn on_playback_started(&mut self, epoch: Epoch) -> Vec<EngineEvent> {
        if epoch != self.epoch {
            tracing::trace!("Discarding playback event from epoch {}", epoch);
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let Some(state) = self.state.as_mut() else {
            return Vec::new();
        };
        if !state.readiness.on_playback_started() {
            return Vec::new();
        }
        if self.machine.current() != Phase::Starting {
            return Vec::new();
        }
        self.enter_playing(now, false).unwrap_or_else(|e| {
            tracing::error!("Failed to enter playing: {}", e);
            Vec::new()
        })
    }

    fn apply_readiness(&mut self, actions: Vec<ReadinessAction>, now: Millis) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for action in actions {
            match action {
                ReadinessAction::SignalReady { forced } => {
                    tracing::info!("Signalling ready (forced: {})", forced);
                    self.authority.report_ready();
                }
                ReadinessAction::StartPlayback { forced } => {
                    events.push(EngineEvent::PlayMedia { epoch: self.epoch });
                    if self.mode() == Mode::SinglePlayer
                        && self.machine.current() == Phase::Loading
                    {
                        if forced {
                            tracing::warn!("Starting round without buffered media");
                        }
                        match self.enter_playing(now, false) {
                            Ok(evts) => events.extend(evts),
                            Err(e) => tracing::error!("Failed to enter playing: {}", e),
                        }
                    }
                }
                ReadinessAction::ForceStartTimer => {
                    if self.machine.current() == Phase::Starting {
                        match self.enter_playing(now, true) {
                            Ok(evts) => events.extend(evts),
                            Err(e) => tracing::error!("Failed to enter playing: {}", e),
                        }
                    }
                }
            }
        }
        events
    }

    // ========== Tick ==========

    /// Re-evaluate every pending condition; called on a fixed period
    pub fn tick(&mut self) -> Vec<EngineEvent> {
        if self.machine.is_finished() {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let mode = self.mode();
        let Some(state) = self.state.as_mut() else {
            return Vec::new();
        };

        let actions = state.readiness.poll(now);
        let mut events = self.apply_readiness(actions, now);

        let Some(state) = self.state.as_mut() else {
            return events;
        };
        let epoch = state.epoch;

        match self.machine.current() {
            Phase::Playing if state.timer.is_expired(now) => match mode {
                Mode::SinglePlayer => {
                    tracing::info!("Time is up");
                    events.extend(self.force_reveal(now, None));
                }
                Mode::Multiplayer => {
                    let grace = to_millis(self.config.reveal_grace_ms);
                    let race = state
                        .reveal_race
                        .get_or_insert_with(|| Race::new(epoch, now.saturating_add(grace)));
                    if race.poll(epoch, now) {
                        tracing::warn!("No reveal from authority, revealing locally");
                        events.extend(self.force_reveal(now, None));
                        if let Some(state) = self.state.as_mut() {
                            state.reveal_forced = true;
                        }
                    }
                }
            },
            Phase::Reveal if state.timer.is_expired(now) => {
                match self.enter_transitioning(now) {
                    Ok(evts) => events.extend(evts),
                    Err(e) => tracing::error!("Failed to leave reveal: {}", e),
                }
            }
            Phase::Transitioning => {
                let fired = state
                    .advance_race
                    .as_mut()
                    .is_some_and(|race| race.poll(epoch, now));
                if fired {
                    tracing::warn!("No next round from authority, advancing locally");
                    events.extend(self.next_round_or_finish());
                    if let Some(state) = self.state.as_mut() {
                        state.started_locally = true;
                    }
                }
            }
            _ => {}
        }

        events
    }

    // ========== Inbound messages ==========

    /// Whether a message names a round other than the tracked one
    fn is_stale(&self, round_index: Option<RoundIndex>) -> bool {
        match (round_index, self.machine.round_index()) {
            (Some(msg), Some(current)) => msg != current,
            _ => false,
        }
    }

    /// Whether a result without a round index can belong to the current round:
    /// guessing must have started, and the round must not be one we began on
    /// our own after the authority went quiet.
    fn accepts_untagged_result(&self) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        match self.machine.current() {
            Phase::Reveal | Phase::Transitioning => true,
            Phase::Playing => !state.started_locally,
            Phase::Loading | Phase::Starting => false,
        }
    }

    fn mirror_players(&mut self, players: Vec<Player>) {
        if players.is_empty() {
            return;
        }
        self.players = players.into_iter().map(|p| (p.id.clone(), p)).collect();
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Vec<EngineEvent> {
        let now = self.clock.now_ms();
        tracing::debug!("Received {}", msg.name());

        match msg {
            ServerMessage::RoomState {
                players,
                questions,
                phase,
                round_meta,
            } => {
                self.mirror_players(players);
                if !questions.is_empty() {
                    self.questions = questions;
                }
                self.handle_room_state(phase, round_meta, now)
            }

            ServerMessage::GameStart {
                questions,
                round_index,
                players,
            } => {
                self.mirror_players(players);
                if !questions.is_empty() {
                    self.questions = questions;
                }
                if !self.machine.is_finished()
                    && self.machine.round_index() == Some(round_index)
                {
                    tracing::debug!("Duplicate game.start for round {}", round_index);
                    return Vec::new();
                }
                self.begin_round(round_index)
            }

            ServerMessage::GameGo {
                go_at_instant,
                duration_ms,
                server_time,
                round_index,
            } => {
                if self.is_stale(round_index) {
                    tracing::debug!("Discarding stale game.go");
                    return Vec::new();
                }
                let phase = self.machine.current();
                if !matches!(phase, Phase::Loading | Phase::Starting) {
                    tracing::debug!("Discarding game.go in phase {:?}", phase);
                    return Vec::new();
                }
                let Some(state) = self.state.as_mut() else {
                    return Vec::new();
                };

                let go = GoSignal {
                    go_at_instant,
                    duration_ms,
                    sample: ClockSample {
                        server_time,
                        local_receipt: now,
                    },
                };
                if !state.readiness.on_go_signal(go) {
                    tracing::debug!("Duplicate game.go ignored");
                    return Vec::new();
                }

                let mut events = Vec::new();
                if phase == Phase::Loading {
                    match self.machine.advance(Some(Phase::Starting)) {
                        Ok(phase) => events.extend(self.phase_changed(phase)),
                        Err(e) => tracing::error!("Failed to enter starting: {}", e),
                    }
                }
                if let Some(state) = self.state.as_mut() {
                    let actions = state.readiness.poll(now);
                    events.extend(self.apply_readiness(actions, now));
                }
                events
            }

            ServerMessage::GameSync {
                started_at,
                duration_ms,
                remaining_ms,
                server_time,
                round_index,
                phase,
            } => {
                tracing::debug!(
                    "Sync: round {} started_at={} remaining={}ms",
                    round_index,
                    started_at,
                    remaining_ms
                );
                let phase = phase.unwrap_or(Phase::Playing);
                let sample = ClockSample {
                    server_time,
                    local_receipt: now,
                };
                self.adopt(round_index, phase, Some((duration_ms, remaining_ms, sample)), now)
            }

            ServerMessage::GameReveal {
                duration_ms,
                round_index,
            } => {
                if self.is_stale(round_index) {
                    tracing::debug!("Discarding stale game.reveal");
                    return Vec::new();
                }
                match self.machine.current() {
                    Phase::Reveal => {
                        // We revealed on our own; take the authority's countdown
                        let Some(state) = self.state.as_mut() else {
                            return Vec::new();
                        };
                        if state.reveal_forced {
                            state.reveal_forced = false;
                            let nominal = state.timer.anchor().map(|a| a.duration_ms).unwrap_or(0);
                            let duration = duration_ms.unwrap_or(nominal);
                            state.timer.disarm();
                            state.timer.arm(now, duration, None);
                        }
                        Vec::new()
                    }
                    Phase::Transitioning => {
                        tracing::debug!("Discarding game.reveal while transitioning");
                        Vec::new()
                    }
                    _ => self.force_reveal(now, duration_ms),
                }
            }

            ServerMessage::AnswersValidated {
                mut validated,
                correct_players,
                players,
                round_index,
            } => {
                if self.is_stale(round_index) {
                    tracing::debug!("Discarding stale game.answersValidated");
                    return Vec::new();
                }
                if round_index.is_none() && !self.accepts_untagged_result() {
                    tracing::debug!(
                        "Discarding game.answersValidated in phase {:?}",
                        self.machine.current()
                    );
                    return Vec::new();
                }
                for id in correct_players {
                    validated.insert(id, true);
                }

                let score_deltas = players
                    .iter()
                    .map(|p| {
                        let before = self.players.get(&p.id).map(|old| old.score).unwrap_or(0);
                        (p.id.clone(), p.score - before)
                    })
                    .filter(|(_, delta)| *delta != 0)
                    .collect();
                self.mirror_players(players);

                let resolution = Resolution {
                    validated,
                    score_deltas,
                };
                let (Some(state), Some(round_index)) =
                    (self.state.as_mut(), self.machine.round_index())
                else {
                    return Vec::new();
                };
                if !state.answers.adopt_resolution(resolution.clone()) {
                    tracing::debug!("Answers already resolved for round {}", round_index);
                    return Vec::new();
                }
                vec![EngineEvent::AnswersResolved {
                    round_index,
                    resolution,
                }]
            }

            ServerMessage::SkipVoteUpdated {
                voter_ids,
                round_index,
            } => {
                if self.is_stale(round_index) {
                    return Vec::new();
                }
                let Some(state) = self.state.as_mut() else {
                    return Vec::new();
                };
                state.answers.mirror_skip_votes(voter_ids.clone());
                vec![EngineEvent::SkipVotesUpdated { voters: voter_ids }]
            }

            ServerMessage::GameNext {
                questions,
                round_index,
            } => {
                if !questions.is_empty() {
                    self.questions = questions;
                }
                match self.machine.round_index() {
                    Some(current) if round_index == current => {
                        tracing::debug!("Already on round {}", round_index);
                        Vec::new()
                    }
                    Some(current) if round_index < current => {
                        tracing::debug!("Discarding stale game.next for round {}", round_index);
                        Vec::new()
                    }
                    _ => self.begin_round(round_index),
                }
            }

            ServerMessage::GameEnd { players } => {
                self.mirror_players(players);
                self.finish()
            }

            ServerMessage::Error { code, message } => self.handle_error(code, message),

            ServerMessage::Unknown => {
                tracing::debug!("Ignoring unknown message");
                Vec::new()
            }
        }
    }

    fn handle_room_state(
        &mut self,
        phase: RoomPhase,
        round_meta: Option<RoundMeta>,
        now: Millis,
    ) -> Vec<EngineEvent> {
        if phase == RoomPhase::Ended {
            return self.finish();
        }
        let (Some(round_phase), Some(meta)) = (phase.round_phase(), round_meta) else {
            return Vec::new();
        };

        let timing = match (meta.duration_ms, meta.remaining_ms, meta.server_time) {
            (Some(duration), Some(remaining), Some(server_time)) => Some((
                duration,
                remaining,
                ClockSample {
                    server_time,
                    local_receipt: now,
                },
            )),
            _ => None,
        };
        let needs_timing = timing.is_none()
            && matches!(round_phase, Phase::Playing | Phase::Reveal);

        let mut events = self.adopt(meta.round_index, round_phase, timing, now);
        let mut needs_sync = needs_timing;
        if let Some(state) = self.state.as_mut() {
            // Starting without a known go instant would never leave on its own
            if round_phase == Phase::Starting && state.readiness.go().is_none() {
                needs_sync = true;
            }
            state.readiness.mirror_ready_peers(meta.ready_player_ids);
            state.answers.mirror_skip_votes(meta.skip_voter_ids.clone());
            if !meta.skip_voter_ids.is_empty() {
                events.push(EngineEvent::SkipVotesUpdated {
                    voters: meta.skip_voter_ids,
                });
            }
        }
        if needs_sync {
            self.authority.request_state();
        }
        events
    }

    /// Make the authority's `(round, phase)` the local truth. Same round and
    /// phase only re-anchors the timer; anything else discards local timer state.
    fn adopt(
        &mut self,
        round_index: RoundIndex,
        phase: Phase,
        timing: Option<(u64, u64, ClockSample)>,
        now: Millis,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let same_round = self.machine.round_index() == Some(round_index)
            && !self.machine.is_finished()
            && self.state.is_some();

        if !same_round {
            let question = match self.questions.get(round_index as usize) {
                Some(q) => q.clone(),
                None => {
                    tracing::warn!("Unknown round {}, requesting state", round_index);
                    self.authority.request_state();
                    return events;
                }
            };
            let round = Round::new(round_index, question);
            self.machine.adopt(round.clone(), phase);
            events.extend(self.new_epoch(round));
            if matches!(phase, Phase::Playing | Phase::Reveal) {
                events.push(EngineEvent::PlayMedia { epoch: self.epoch });
            }
        } else if self.machine.current() != phase {
            let Some(round) = self.machine.round().cloned() else {
                return events;
            };
            let was_waiting = matches!(self.machine.current(), Phase::Loading | Phase::Starting);
            self.machine.adopt(round, phase);
            events.extend(self.phase_changed(phase));
            if was_waiting && matches!(phase, Phase::Playing | Phase::Reveal) {
                events.push(EngineEvent::PlayMedia { epoch: self.epoch });
            }
            if let Some(state) = self.state.as_mut() {
                state.timer.disarm();
                state.reveal_race = None;
                state.advance_race = None;
                if phase == Phase::Transitioning {
                    state.advance_race = Some(Race::new(
                        state.epoch,
                        now.saturating_add(to_millis(self.config.advance_grace_ms)),
                    ));
                }
            }
        }

        if let Some(state) = self.state.as_mut() {
            state.started_locally = false;
            if matches!(phase, Phase::Playing | Phase::Reveal | Phase::Transitioning) {
                // Past the readiness handshake; no fallback may fire for it
                state.readiness.mark_in_progress();
            }
            if phase == Phase::Playing && state.playing_started_at.is_none() {
                state.playing_started_at = Some(now);
            }
            if let Some((duration, remaining, sample)) = timing {
                if matches!(phase, Phase::Playing | Phase::Reveal) {
                    state.timer.arm_from_remaining(duration, remaining, sample);
                }
            }
        }
        events
    }

    fn handle_error(&mut self, code: String, message: String) -> Vec<EngineEvent> {
        match code.as_str() {
            codes::PLAYER_NOT_FOUND => {
                tracing::warn!("Authority lost track of us, joining again");
                self.authority.join();
                Vec::new()
            }
            codes::GAME_ALREADY_STARTED => {
                tracing::info!("Game already started: {}", message);
                self.authority.request_state();
                Vec::new()
            }
            _ => {
                tracing::error!("Authority error {}: {}", code, message);
                self.last_error = Some((code.clone(), message.clone()));
                vec![EngineEvent::Error { code, message }]
            }
        }
    }

    // ========== Renderer view ==========

    pub fn snapshot(&mut self) -> Snapshot {
        let now = self.clock.now_ms();
        let phase = self.machine.current();
        let finished = self.machine.is_finished();
        let round = self.machine.round().cloned();
        let players = self.players();
        let last_error = self.last_error.clone();

        let mut snapshot = Snapshot {
            epoch: self.epoch,
            round,
            phase,
            is_round_over: phase.is_round_over() || finished,
            finished,
            players,
            last_error,
            ..Snapshot::default()
        };

        if let Some(state) = self.state.as_mut() {
            snapshot.remaining_seconds = state.timer.remaining_seconds(now);
            snapshot.waiting_for_peers =
                phase == Phase::Loading && state.readiness.waiting_for_peers();
            snapshot.has_signaled_ready = state.readiness.has_signaled_ready();
            snapshot.ready_peers = state.readiness.ready_peers().iter().cloned().collect();
            snapshot.skip_voters = state.answers.skip_votes().iter().cloned().collect();
            if let Some(resolution) = state.answers.resolution() {
                snapshot.validated = resolution.validated.clone();
            }
        }
        snapshot
    }
}
