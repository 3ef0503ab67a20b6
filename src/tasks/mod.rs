//! Background Tasks Module
//!
//! Periodic work that runs alongside the HTTP server.
//!
//! # Tasks
//! - Expiration Reaper: drops expired entries from memory and the store

mod reaper;

pub use reaper::spawn_reaper_task;
