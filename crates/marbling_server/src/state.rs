//! Application state.

use std::sync::Arc;

use marbling_core::{ImageNormalizer, MarblingModel};

use crate::config::ServerConfig;

/// Shared application state. Built once at startup; handlers get clones.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub normalizer: Arc<ImageNormalizer>,
    pub model: Arc<MarblingModel>,
}

impl AppState {
    pub fn new(config: ServerConfig, normalizer: ImageNormalizer, model: MarblingModel) -> Self {
        Self {
            config: Arc::new(config),
            normalizer: Arc::new(normalizer),
            model: Arc::new(model),
        }
    }
}
