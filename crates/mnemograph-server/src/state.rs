//! Shared handler state

use std::sync::Arc;

use mnemograph_core::Engine;

/// Cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
