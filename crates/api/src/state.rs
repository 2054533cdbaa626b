//! Shared application state

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::store::RoomStore;
use crate::websocket::Hub;

/// State handed to every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RoomStore>,
    pub hub: Hub,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RoomStore>) -> Self {
        let hub = Hub::new(config.admission_ticket_ttl());
        Self {
            config: Arc::new(config),
            store,
            hub,
        }
    }

    /// Root directory of uploaded files
    pub fn upload_root(&self) -> PathBuf {
        PathBuf::from(&self.config.upload_dir)
    }
}
