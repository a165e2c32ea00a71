//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler and WebSocket connection.

use crate::config::Config;
use scribe_market_core::ports::IdentityProvider;
use scribe_market_core::Marketplace;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Every workflow service, wired to the configured store.
    pub market: Marketplace,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
}
