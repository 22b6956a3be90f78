//! Question list for single-player games

use crate::types::Question;
use rand::seq::SliceRandom;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Catalog contains no questions")]
    Empty,

    #[error("Question {id} is invalid: {reason}")]
    InvalidQuestion { id: String, reason: String },
}

/// Parse and validate a JSON array of questions
pub fn parse(json: &str) -> Result<Vec<Question>, CatalogError> {
    let questions: Vec<Question> = serde_json::from_str(json)?;
    if questions.is_empty() {
        return Err(CatalogError::Empty);
    }

    for q in &questions {
        if q.duration_ms == 0 {
            return Err(CatalogError::InvalidQuestion {
                id: q.id.clone(),
                reason: "durationMs must be positive".to_string(),
            });
        }
        if q.answer.trim().is_empty() {
            return Err(CatalogError::InvalidQuestion {
                id: q.id.clone(),
                reason: "answer is empty".to_string(),
            });
        }
    }

    Ok(questions)
}

pub fn load(path: impl AsRef<Path>) -> Result<Vec<Question>, CatalogError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let questions = parse(&json)?;
    tracing::info!("Loaded {} questions from {}", questions.len(), path.display());
    Ok(questions)
}

pub fn shuffle(questions: &mut [Question]) {
    questions.shuffle(&mut rand::rng());
}
