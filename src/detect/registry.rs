use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::CpuBackend;
use crate::config::DetectorSettings;

/// Constructor for a named backend. Runs only when that backend is selected, so heavy
/// model loading is skipped for backends that are not in use.
pub type BackendFactory = fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>>;

/// Registry of detector backends by name.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("cpu", create_cpu);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", create_tract);
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register(&mut self, name: &str, factory: BackendFactory) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), factory);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the backend named in `settings.backend`, or the default when it is empty.
    pub fn create(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let name = if settings.backend.trim().is_empty() {
            self.default_name
                .as_deref()
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            settings.backend.trim()
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut backend = factory(settings)?;
        backend.warm_up()?;
        log::info!("detector backend '{}' ready ({})", backend.name(), backend.precision());
        Ok(backend)
    }
}

fn create_cpu(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(CpuBackend::from_settings(settings)?))
}

#[cfg(feature = "backend-tract")]
fn create_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(super::backends::TractBackend::from_settings(
        settings,
    )?))
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
