//! Media readiness coordination
//!
//! Single-player is a pass-through: buffered media starts playing. In
//! multiplayer local buffering is reported to the authority, which alone
//! decides when every peer is ready and answers with a `game.go` carrying a
//! near-future instant. The coordinator is polled every tick until local time
//! reaches that instant.
//!
//! Two fallbacks keep a stalled client from freezing the room:
//! - no local buffering within `ready_fallback_ms` of loading: signal ready anyway
//! - no playback confirmation within `playback_fallback_ms` of the go instant:
//!   start the countdown from local wall time

use crate::race::Race;
use crate::timer::ClockSample;
use crate::types::*;
use std::collections::BTreeSet;

/// Authority's instruction to start playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoSignal {
    /// Target instant on the authority's clock
    pub go_at_instant: Millis,
    pub duration_ms: u64,
    pub sample: ClockSample,
}

impl GoSignal {
    /// Target instant translated to the local clock
    pub fn go_at_local(&self) -> Millis {
        self.go_at_instant.saturating_sub(self.sample.offset())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessAction {
    /// Report readiness to the authority
    SignalReady { forced: bool },
    /// Tell the media surface to play
    StartPlayback { forced: bool },
    /// Playback never confirmed; run the countdown from local wall time
    ForceStartTimer,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessTimeouts {
    pub ready_fallback_ms: u64,
    pub playback_fallback_ms: u64,
}

/// Readiness state for one round
#[derive(Debug)]
pub struct ReadinessCoordinator {
    mode: Mode,
    epoch: Epoch,
    timeouts: ReadinessTimeouts,
    buffered: bool,
    has_signaled_ready: bool,
    ready_peers: BTreeSet<PlayerId>,
    ready_race: Race,
    go: Option<GoSignal>,
    playback_requested: bool,
    playback_started: bool,
    playback_race: Option<Race>,
}

impl ReadinessCoordinator {
    pub fn new(mode: Mode, epoch: Epoch, loading_at: Millis, timeouts: ReadinessTimeouts) -> Self {
        Self {
            mode,
            epoch,
            timeouts,
            buffered: false,
            has_signaled_ready: false,
            ready_peers: BTreeSet::new(),
            ready_race: Race::new(
                epoch,
                loading_at.saturating_add(to_millis(timeouts.ready_fallback_ms)),
            ),
            go: None,
            playback_requested: false,
            playback_started: false,
            playback_race: None,
        }
    }

    pub fn on_local_media_buffered(&mut self) -> Vec<ReadinessAction> {
        self.buffered = true;
        if !self.ready_race.event() {
            // Already signalled (possibly forced); nothing new to report
            return Vec::new();
        }

        match self.mode {
            Mode::SinglePlayer => {
                self.has_signaled_ready = true;
                self.playback_requested = true;
                vec![ReadinessAction::StartPlayback { forced: false }]
            }
            Mode::Multiplayer => {
                self.has_signaled_ready = true;
                vec![ReadinessAction::SignalReady { forced: false }]
            }
        }
    }

    /// Record the authority's go. Returns false for a duplicate of the
    /// current go (same instant and duration).
    pub fn on_go_signal(&mut self, go: GoSignal) -> bool {
        if let Some(current) = &self.go {
            if current.go_at_instant == go.go_at_instant && current.duration_ms == go.duration_ms {
                return false;
            }
        }

        let deadline = go
            .go_at_local()
            .saturating_add(to_millis(self.timeouts.playback_fallback_ms));
        self.go = Some(go);
        self.playback_requested = false;
        self.playback_race = Some(Race::new(self.epoch, deadline));
        true
    }

    /// Media confirmed playback. Returns true the first time, unless the
    /// fallback already fired.
    pub fn on_playback_started(&mut self) -> bool {
        if self.playback_started {
            return false;
        }
        self.playback_started = true;
        match &mut self.playback_race {
            Some(race) => race.event(),
            None => true,
        }
    }

    pub fn is_ready_to_play(&self, now: Millis) -> bool {
        match self.mode {
            Mode::SinglePlayer => self.has_signaled_ready,
            Mode::Multiplayer => self.go.is_some_and(|go| now >= go.go_at_local()),
        }
    }

    /// Evaluate pending conditions; called on every tick
    pub fn poll(&mut self, now: Millis) -> Vec<ReadinessAction> {
        let mut actions = Vec::new();

        if self.ready_race.poll(self.epoch, now) {
            tracing::warn!(
                "Media not buffered within {}ms, signalling ready anyway",
                self.timeouts.ready_fallback_ms
            );
            self.has_signaled_ready = true;
            match self.mode {
                Mode::SinglePlayer => {
                    self.playback_requested = true;
                    actions.push(ReadinessAction::StartPlayback { forced: true });
                }
                Mode::Multiplayer => actions.push(ReadinessAction::SignalReady { forced: true }),
            }
        }

        if self.mode == Mode::Multiplayer && !self.playback_requested && self.is_ready_to_play(now)
        {
            self.playback_requested = true;
            actions.push(ReadinessAction::StartPlayback { forced: false });
        }

        if let Some(race) = &mut self.playback_race {
            if race.poll(self.epoch, now) {
                tracing::warn!(
                    "Playback not confirmed within {}ms of go, starting timer locally",
                    self.timeouts.playback_fallback_ms
                );
                actions.push(ReadinessAction::ForceStartTimer);
            }
        }

        actions
    }

    /// The round is already past playback start (adopted from the authority)
    pub fn mark_in_progress(&mut self) {
        self.ready_race.event();
        self.has_signaled_ready = true;
        self.playback_requested = true;
        self.playback_started = true;
        if let Some(race) = &mut self.playback_race {
            race.event();
        }
    }

    pub fn mirror_ready_peers(&mut self, ids: impl IntoIterator<Item = PlayerId>) {
        self.ready_peers = ids.into_iter().collect();
    }

    pub fn ready_peers(&self) -> &BTreeSet<PlayerId> {
        &self.ready_peers
    }

    pub fn has_signaled_ready(&self) -> bool {
        self.has_signaled_ready
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    pub fn go(&self) -> Option<GoSignal> {
        self.go
    }

    pub fn playback_started(&self) -> bool {
        self.playback_started
    }

    /// Signalled ready, still waiting for the authority's go
    pub fn waiting_for_peers(&self) -> bool {
        self.mode == Mode::Multiplayer && self.has_signaled_ready && self.go.is_none()
    }
}
