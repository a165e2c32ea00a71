//! services/api/src/lib.rs
//!
//! The HTTP/WebSocket server around the marketplace core: configuration,
//! storage and identity adapters, the axum surface and background tasks.

pub mod adapters;
pub mod config;
pub mod error;
pub mod tasks;
pub mod web;
