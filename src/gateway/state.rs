use std::sync::Arc;

use crate::ledger::TransferEngine;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransferEngine>,
}

impl AppState {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self { engine }
    }
}
