//! Resolves job capability handles to capabilities.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{Capability, CapabilityError, HttpJson, JsonLinesFile};

/// Named capabilities plus the built-in `file:` and `http(s)://` handles.
#[derive(Clone)]
pub struct CapabilityRegistry {
    named: HashMap<String, Arc<dyn Capability>>,
    builtins: bool,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Registry with built-in handles enabled.
    pub fn new() -> Self {
        Self {
            named: HashMap::new(),
            builtins: true,
        }
    }

    /// Registry that only resolves explicitly registered names.
    pub fn without_builtins() -> Self {
        Self {
            named: HashMap::new(),
            builtins: false,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.named.insert(name.into(), capability);
    }

    pub fn with(mut self, name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        self.register(name, capability);
        self
    }

    /// Look up a handle: registered names first, then built-ins.
    pub fn resolve(&self, handle: &str) -> Result<Arc<dyn Capability>, CapabilityError> {
        if let Some(cap) = self.named.get(handle) {
            return Ok(Arc::clone(cap));
        }
        if self.builtins {
            if let Some(path) = handle.strip_prefix("file:") {
                if !path.is_empty() {
                    return Ok(Arc::new(JsonLinesFile::new(PathBuf::from(path))));
                }
            }
            if handle.starts_with("http://") || handle.starts_with("https://") {
                let url = url::Url::parse(handle)
                    .map_err(|e| CapabilityError::Unavailable(format!("bad URL '{}': {}", handle, e)))?;
                return Ok(Arc::new(HttpJson::new(url)));
            }
        }
        Err(CapabilityError::Unresolved(handle.to_string()))
    }
}
