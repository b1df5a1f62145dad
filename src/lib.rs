// Library interface for rust_manga_reader
// The binary and the integration tests both go through these modules

pub mod app_state;
pub mod browser;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod http_client;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod session;
pub mod sources;

pub use app_state::AppState;
pub use challenge::ChallengeBridge;
pub use config::Config;
pub use error::{ChallengeError, CoreError, SourceError, StoreError};
