//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, bridge compilation)
//!     → GatewayConfig (validated, immutable)
//!
//! On change:
//!     watcher.rs detects a content change
//!     → loader.rs parses and validates
//!     → routes compiled into a RouteTable
//!     → table sent to the server and swapped in atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Listener and timeouts are read once at startup; reloads only replace routes

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{BridgeConfig, GatewayConfig, ListenerConfig, RouteConfig};
pub use watcher::{ConfigWatcher, Reload, ReloadError, Reloader};
