// Public API for the session driver, the binary and integration tests

pub mod answer;
pub mod authority;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod phase;
pub mod protocol;
pub mod race;
pub mod readiness;
pub mod session;
pub mod timer;
pub mod types;
