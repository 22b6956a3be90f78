//! Engine configuration loaded from `GUESSDASH_*` environment variables

use crate::readiness::ReadinessTimeouts;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read and parse an environment variable, falling back to `default` when
/// it is unset, empty, or malformed
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring malformed {}={:?}, using {:?}", name, raw, default);
                default
            }
        },
        _ => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_lowercase();
            v != "0" && v != "false" && v != "no"
        })
        .unwrap_or(default)
}

/// Timing and scoring knobs for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the display/expiry poll
    pub tick_ms: u64,
    /// Force-signal ready this long after loading if media never buffers
    pub ready_fallback_ms: u64,
    /// Start the countdown locally this long after the go instant if playback never confirms
    pub playback_fallback_ms: u64,
    /// Multiplayer: force reveal this long after the local countdown hits zero
    pub reveal_grace_ms: u64,
    /// Multiplayer: force the next round this long after the reveal countdown ends
    pub advance_grace_ms: u64,
    /// Single-player points for a correct answer
    pub points_per_correct: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            ready_fallback_ms: 3_000,
            playback_fallback_ms: 2_500,
            reveal_grace_ms: 3_000,
            advance_grace_ms: 5_000,
            points_per_correct: 1,
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            tick_ms: env_or("GUESSDASH_TICK_MS", defaults.tick_ms).max(1),
            ready_fallback_ms: env_or("GUESSDASH_READY_FALLBACK_MS", defaults.ready_fallback_ms),
            playback_fallback_ms: env_or(
                "GUESSDASH_PLAYBACK_FALLBACK_MS",
                defaults.playback_fallback_ms,
            ),
            reveal_grace_ms: env_or("GUESSDASH_REVEAL_GRACE_MS", defaults.reveal_grace_ms),
            advance_grace_ms: env_or("GUESSDASH_ADVANCE_GRACE_MS", defaults.advance_grace_ms),
            points_per_correct: env_or(
                "GUESSDASH_POINTS_PER_CORRECT",
                defaults.points_per_correct,
            ),
        };

        tracing::info!(
            tick_ms = config.tick_ms,
            ready_fallback_ms = config.ready_fallback_ms,
            playback_fallback_ms = config.playback_fallback_ms,
            "Engine config loaded"
        );
        config
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn readiness_timeouts(&self) -> ReadinessTimeouts {
        ReadinessTimeouts {
            ready_fallback_ms: self.ready_fallback_ms,
            playback_fallback_ms: self.playback_fallback_ms,
        }
    }
}

/// Settings for the headless single-player binary
#[derive(Debug, Clone)]
pub struct SoloConfig {
    /// JSON file with the questions to play
    pub questions: PathBuf,
    pub player_name: String,
    pub shuffle: bool,
    /// Simulated media load latency
    pub media_latency_ms: u64,
}

impl SoloConfig {
    pub fn from_env() -> Self {
        let player_name = std::env::var("GUESSDASH_PLAYER_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Player".to_string());

        Self {
            questions: PathBuf::from(env_or(
                "GUESSDASH_QUESTIONS",
                "questions.json".to_string(),
            )),
            player_name,
            shuffle: env_flag("GUESSDASH_SHUFFLE", true),
            media_latency_ms: env_or("GUESSDASH_MEDIA_LATENCY_MS", 300),
        }
    }
}
