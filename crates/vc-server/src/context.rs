//! Shared state handed to every request handler via axum state.

use std::sync::Arc;

use vc_core::config::ServerConfig;
use vc_core::Result;

use crate::assets::AssetResolver;

/// Cheap to clone; everything behind it is read-only or lock-free.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub assets: AssetResolver,
    /// Served for `/` when the root has no `index.html`.
    pub manifest_name: Arc<str>,
}

impl ServerContext {
    pub fn new(assets: AssetResolver, manifest_name: impl Into<Arc<str>>) -> Self {
        Self {
            assets,
            manifest_name: manifest_name.into(),
        }
    }

    /// Build a context for `config.root`, which must already exist.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self::new(
            AssetResolver::new(&config.root)?,
            config.manifest_name.as_str(),
        ))
    }
}
