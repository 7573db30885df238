//! Configuration module for modeldepot
//!
//! Loads config from `$XDG_CONFIG_HOME/modeldepot/config.toml` or `~/.config/modeldepot/config.toml`.
//! Falls back to embedded defaults if file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use modeldepot::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Max concurrent downloads: {}", config.downloads.max_concurrent);
//! println!("Manifest cache TTL: {:?}", config.manifests.cache_ttl());
//! ```

pub mod schema;

pub use schema::Config;
