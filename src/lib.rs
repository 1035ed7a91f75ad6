pub mod asset_block;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod player;
pub mod queue_controller;
pub mod session;

pub use asset_block::{format_duration, Asset, AssetBlock};
pub use bridge::{AuthStatus, Credentials, HttpBridge, SyncBridge, SyncError};
pub use catalog::Catalog;
pub use config::{Config, UserDir};
pub use player::{Player, PlayerEvent, PlayerEventKind, PlayerHandle, RodioPlayer};
pub use queue_controller::{Indicator, PlaybackQueueController, QueueState, QueueStatus};
pub use session::{Session, SessionCommand, SessionNotice, SessionOptions};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
