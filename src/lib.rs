// src/lib.rs

pub mod api;
pub mod config;
pub mod container;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod metadata;
pub mod normalize;
pub mod pipeline;
pub mod runner;
pub mod state;
pub mod tasks;
pub mod topics;
pub mod types;

pub use error::{RelayError, Result};
