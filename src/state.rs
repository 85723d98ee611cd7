//! Shared application state handed to the control servers.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::session::SessionController;

#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub settings: Arc<Settings>,
    /// Fired when the control surfaces should stop serving.
    pub quit: CancellationToken,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            controller: SessionController::new(settings.clone()),
            settings: Arc::new(settings),
            quit: CancellationToken::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
