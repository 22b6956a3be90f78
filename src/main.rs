use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guessdash::authority::LocalAuthority;
use guessdash::catalog;
use guessdash::clock::SystemClock;
use guessdash::config::{EngineConfig, SoloConfig};
use guessdash::engine::Engine;
use guessdash::session::{Session, SimulatedMedia};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guessdash=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GuessDash...");

    let engine_config = EngineConfig::from_env();
    let solo = SoloConfig::from_env();

    let mut questions = match catalog::load(&solo.questions) {
        Ok(questions) => questions,
        Err(e) => {
            tracing::error!("Cannot start without questions: {}", e);
            std::process::exit(1);
        }
    };
    if solo.shuffle {
        catalog::shuffle(&mut questions);
    }

    let player_id = ulid::Ulid::new().to_string();
    let mut engine = Engine::new(
        Box::new(LocalAuthority::new(player_id.clone())),
        Arc::new(SystemClock),
        engine_config,
    )
    .with_questions(questions);
    engine.register_player(&player_id, Some(solo.player_name.clone()));

    let media = SimulatedMedia::new(Duration::from_millis(solo.media_latency_ms));
    let (session, _handle) = Session::new(engine, Box::new(media));

    match session.run().await {
        Ok(players) => {
            for player in players {
                tracing::info!(
                    "{}: {} point(s)",
                    player.display_name.as_deref().unwrap_or(&player.id),
                    player.score
                );
            }
        }
        Err(e) => {
            tracing::error!("Session failed: {}", e);
            std::process::exit(1);
        }
    }
}
