//! The backend registry: the ordered, immutable list the fallback chain walks.
//!
//! A registry is built once (usually from [`ConversionConfig::backends`])
//! and then only read. It is shared behind an `Arc` by every concurrent
//! conversion; nothing can add, remove or reorder backends afterwards.

use crate::backend::{
    HeadlessDirectBackend, RendererBackend, ScriptedSessionBackend, StaticHtmlBackend, Toolbox,
};
use crate::config::{BackendKind, ConversionConfig};
use crate::error::ConversionError;
use crate::output::BackendId;
use crate::tools::{SystemResolver, CHROME, WKHTMLTOPDF};
use std::sync::Arc;
use tracing::debug;

/// Ordered backends, highest fidelity first.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn RendererBackend>>,
}

impl BackendRegistry {
    /// Built-in backends in `config.backends` order, using the system
    /// resolver (honouring `chrome_path` / `wkhtmltopdf_path`) and the tokio
    /// process runner.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConversionError> {
        let mut resolver = SystemResolver::new();
        if let Some(path) = &config.chrome_path {
            resolver = resolver.with_override(CHROME, path.clone());
        }
        if let Some(path) = &config.wkhtmltopdf_path {
            resolver = resolver.with_override(WKHTMLTOPDF, path.clone());
        }
        Self::with_toolbox(config, Toolbox::system(resolver))
    }

    /// Built-in backends in `config.backends` order on top of `tools`.
    pub fn with_toolbox(config: &ConversionConfig, tools: Toolbox) -> Result<Self, ConversionError> {
        let mut builder = Self::builder();
        for kind in &config.backends {
            let backend: Arc<dyn RendererBackend> = match kind {
                BackendKind::ScriptedSession => {
                    Arc::new(ScriptedSessionBackend::new(tools.clone(), config))
                }
                BackendKind::HeadlessDirect => {
                    Arc::new(HeadlessDirectBackend::new(tools.clone(), config))
                }
                BackendKind::StaticHtml => Arc::new(StaticHtmlBackend::new(tools.clone(), config)?),
            };
            builder = builder.push(backend);
        }
        builder.build()
    }

    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder {
            backends: Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RendererBackend>> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|b| b.id().clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn RendererBackend>> {
        self.backends.iter().find(|b| b.id() == id)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

/// Builder for custom registries (own backends, test doubles).
pub struct BackendRegistryBuilder {
    backends: Vec<Arc<dyn RendererBackend>>,
}

impl BackendRegistryBuilder {
    /// Append `backend` at the lowest priority so far.
    pub fn push(mut self, backend: Arc<dyn RendererBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn build(self) -> Result<BackendRegistry, ConversionError> {
        if self.backends.is_empty() {
            return Err(ConversionError::InvalidConfig(
                "registry needs at least one backend".into(),
            ));
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if self.backends[..i].iter().any(|b| b.id() == backend.id()) {
                return Err(ConversionError::InvalidConfig(format!(
                    "backend id '{}' registered twice",
                    backend.id()
                )));
            }
        }
        debug!(
            "Backend registry: {}",
            self.backends
                .iter()
                .map(|b| b.id().as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(BackendRegistry {
            backends: self.backends,
        })
    }
}
