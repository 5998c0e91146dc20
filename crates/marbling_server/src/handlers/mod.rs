//! HTTP handlers.

pub mod health;
pub mod predict;
pub mod pwa;

pub use health::{health, model_info};
pub use predict::predict;
pub use pwa::{manifest, not_found};
