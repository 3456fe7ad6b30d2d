pub mod aggregate;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod replay;
pub mod sequence;
pub mod store;

pub use config::IkuseiConfig;
pub use error::IkuseiError;
pub use replay::{PlaybackDriver, PlaybackSpeed, PlayerState, ReplayPlayer, ReplayViewer};
pub use store::{MemoryStore, PgStore, Store, StoreError};
