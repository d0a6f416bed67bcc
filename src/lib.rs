// Library interface for rust_video_harvester
// This allows tests and the binary to use the harvester components

pub mod app_state;
pub mod assets;
pub mod bot_challenge;
pub mod config;
pub mod crawler;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod helpers;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod session_pool;
pub mod sources;
pub mod sync_state;
pub mod throttle;
pub mod timeline;
pub mod user_agents;

pub use error::{FetchError, HarvestError};
