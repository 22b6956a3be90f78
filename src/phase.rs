//! Round phase machine
//!
//! Owns the local phase of the current question. Normal flow:
//!
//! - single-player: `Loading -> Playing -> Reveal -> Transitioning`
//! - multiplayer: `Loading -> Starting -> Playing -> Reveal -> Transitioning`
//!
//! `Transitioning` only leaves through [`PhaseMachine::start_round`] (next
//! question) or [`PhaseMachine::finish`] (final summary).

use crate::error::{EngineError, EngineResult};
use crate::types::*;

#[derive(Debug)]
pub struct PhaseMachine {
    mode: Mode,
    round: Option<Round>,
    phase: Phase,
    finished: bool,
}

impl PhaseMachine {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            round: None,
            phase: Phase::Loading,
            finished: false,
        }
    }

    /// Check if a phase transition is valid for the given mode
    pub fn is_valid_transition(mode: Mode, from: Phase, to: Phase) -> bool {
        use Phase::*;

        match (from, to) {
            (Loading, Starting) => mode == Mode::Multiplayer,
            (Loading, Playing) => mode == Mode::SinglePlayer,
            (Starting, Playing) => true,
            (Playing, Reveal) => true,
            (Reveal, Transitioning) => true,
            _ => false,
        }
    }

    /// Phase the normal flow moves to from here, if any
    pub fn next_phase(&self) -> Option<Phase> {
        match self.phase {
            Phase::Loading => Some(match self.mode {
                Mode::SinglePlayer => Phase::Playing,
                Mode::Multiplayer => Phase::Starting,
            }),
            Phase::Starting => Some(Phase::Playing),
            Phase::Playing => Some(Phase::Reveal),
            Phase::Reveal => Some(Phase::Transitioning),
            Phase::Transitioning => None,
        }
    }

    /// Begin a new round in `Loading`. Only allowed before the first round or
    /// while transitioning out of the previous one.
    pub fn start_round(&mut self, round: Round) -> EngineResult<()> {
        if self.finished {
            return Err(EngineError::GameFinished);
        }
        if self.round.is_some() && self.phase != Phase::Transitioning {
            return Err(EngineError::InvalidTransition {
                from: self.phase,
                to: Phase::Loading,
            });
        }

        tracing::info!(
            "Round {} started (question {})",
            round.index,
            round.question_id()
        );
        self.round = Some(round);
        self.phase = Phase::Loading;
        Ok(())
    }

    /// Move to the next phase, or to `explicit` if given
    pub fn advance(&mut self, explicit: Option<Phase>) -> EngineResult<Phase> {
        if self.finished {
            return Err(EngineError::GameFinished);
        }
        if self.round.is_none() {
            return Err(EngineError::NoActiveRound);
        }

        let to = match explicit.or_else(|| self.next_phase()) {
            Some(to) => to,
            None => {
                return Err(EngineError::InvalidTransition {
                    from: self.phase,
                    to: Phase::Loading,
                })
            }
        };

        if !Self::is_valid_transition(self.mode, self.phase, to) {
            return Err(EngineError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        tracing::info!("Phase {:?} -> {:?}", self.phase, to);
        self.phase = to;
        Ok(to)
    }

    /// Replace local state with the authority's view, skipping validation
    pub fn adopt(&mut self, round: Round, phase: Phase) {
        tracing::info!("Adopting round {} in phase {:?}", round.index, phase);
        self.round = Some(round);
        self.phase = phase;
        self.finished = false;
    }

    /// No round remains; the game is over
    pub fn finish(&mut self) {
        tracing::info!("Game finished");
        self.finished = true;
    }

    pub fn current(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn round_index(&self) -> Option<RoundIndex> {
        self.round.as_ref().map(|r| r.index)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(index: RoundIndex) -> Round {
        Round::new(
            index,
            Question {
                id: format!("q{}", index),
                duration_ms: 5_000,
                answer: "Interstellar".to_string(),
                media: "clip.mp4".to_string(),
            },
        )
    }

    #[test]
    fn test_single_player_flow() {
        let mut machine = PhaseMachine::new(Mode::SinglePlayer);
        machine.start_round(round(0)).unwrap();
        assert_eq!(machine.current(), Phase::Loading);

        assert_eq!(machine.advance(None).unwrap(), Phase::Playing);
        assert_eq!(machine.advance(None).unwrap(), Phase::Reveal);
        assert_eq!(machine.advance(None).unwrap(), Phase::Transitioning);
        assert!(machine.advance(None).is_err());

        machine.start_round(round(1)).unwrap();
        assert_eq!(machine.current(), Phase::Loading);
        assert_eq!(machine.round_index(), Some(1));
    }

    #[test]
    fn test_multiplayer_goes_through_starting() {
        let mut machine = PhaseMachine::new(Mode::Multiplayer);
        machine.start_round(round(0)).unwrap();
        assert_eq!(machine.advance(None).unwrap(), Phase::Starting);
        assert_eq!(machine.advance(None).unwrap(), Phase::Playing);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = PhaseMachine::new(Mode::SinglePlayer);
        assert!(matches!(
            machine.advance(None),
            Err(EngineError::NoActiveRound)
        ));

        machine.start_round(round(0)).unwrap();
        let result = machine.advance(Some(Phase::Starting));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid phase transition"));

        // Going backwards is never allowed
        machine.advance(None).unwrap();
        assert!(machine.advance(Some(Phase::Loading)).is_err());
    }

    #[test]
    fn test_start_round_requires_transitioning() {
        let mut machine = PhaseMachine::new(Mode::SinglePlayer);
        machine.start_round(round(0)).unwrap();
        assert!(machine.start_round(round(1)).is_err());
        assert_eq!(machine.round_index(), Some(0));
    }

    #[test]
    fn test_adopt_skips_intermediate_phases() {
        let mut machine = PhaseMachine::new(Mode::Multiplayer);
        machine.start_round(round(0)).unwrap();
        machine.adopt(round(3), Phase::Reveal);
        assert_eq!(machine.current(), Phase::Reveal);
        assert_eq!(machine.round_index(), Some(3));
        assert_eq!(machine.advance(None).unwrap(), Phase::Transitioning);
    }

    #[test]
    fn test_finished_machine_rejects_rounds() {
        let mut machine = PhaseMachine::new(Mode::SinglePlayer);
        machine.finish();
        assert!(matches!(
            machine.start_round(round(0)),
            Err(EngineError::GameFinished)
        ));
    }
}
