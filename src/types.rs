use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type RoomId = String;
pub type QuestionId = String;
pub type RoundIndex = u32;

/// Scope of one Round's local state. Bumped on every round start or adoption.
pub type Epoch = u64;

/// Milliseconds since the Unix epoch, on whichever clock produced them
pub type Millis = i64;

/// Convert an unsigned duration to [`Millis`], saturating at `Millis::MAX`
pub fn to_millis(ms: u64) -> Millis {
    Millis::try_from(ms).unwrap_or(Millis::MAX)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Loading,
    Starting,
    Playing,
    Reveal,
    Transitioning,
}

impl Phase {
    /// Whether guessing has closed for the round
    pub fn is_round_over(self) -> bool {
        matches!(self, Phase::Reveal | Phase::Transitioning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SinglePlayer,
    Multiplayer,
}

/// One question from the catalog, as shipped by the authority or loaded locally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub duration_ms: u64,
    #[serde(alias = "answerText")]
    pub answer: String,
    #[serde(alias = "mediaReference")]
    pub media: String,
}

/// A question being played. Replaced, never mutated, on the next question.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub index: RoundIndex,
    pub question: Question,
}

impl Round {
    pub fn new(index: RoundIndex, question: Question) -> Self {
        Self { index, question }
    }

    pub fn question_id(&self) -> &str {
        &self.question.id
    }

    pub fn duration_ms(&self) -> u64 {
        self.question.duration_ms
    }

    pub fn answer_text(&self) -> &str {
        &self.question.answer
    }

    pub fn media(&self) -> &str {
        &self.question.media
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub score: i64,
}

/// A buffered answer awaiting resolution
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub player_id: PlayerId,
    pub submitted_text: String,
    /// Milliseconds into the guess phase when the answer was (last) submitted
    pub submitted_at_phase_time: u64,
}
