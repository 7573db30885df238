#![allow(clippy::multiple_crate_versions)]

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod manifest;
pub mod model;
pub mod store;

pub use error::{DepotError, Result};
