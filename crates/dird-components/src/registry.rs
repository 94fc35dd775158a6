//! Component registry
//!
//! Verbs resolve against a static map of built-ins. A configured component
//! directory is advertised for operators but implementations register
//! statically; clients expose their registry keys in heartbeats so the
//! coordinator can see each node's capability set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::abi::Component;
use crate::builtin;
use crate::error::ComponentError;

/// Name → component map
pub struct Registry {
    components: HashMap<&'static str, Arc<dyn Component>>,
}

impl Registry {
    /// Registry with every built-in verb
    pub fn builtin() -> Self {
        let mut components: HashMap<&'static str, Arc<dyn Component>> = HashMap::new();
        for component in [
            Arc::new(builtin::Run) as Arc<dyn Component>,
            Arc::new(builtin::CacheSet::arg()),
            Arc::new(builtin::CacheSet::env()),
            Arc::new(builtin::FileTransfer::add()),
            Arc::new(builtin::FileTransfer::copy()),
            Arc::new(builtin::Workdir),
            Arc::new(builtin::CacheFile),
            Arc::new(builtin::CacheEvict),
            Arc::new(builtin::Query),
            Arc::new(builtin::QueryWait),
            Arc::new(builtin::JobWait),
        ] {
            components.insert(component.name(), component);
        }
        Self { components }
    }

    /// Resolve a verb
    pub fn get(&self, verb: &str) -> Result<Arc<dyn Component>, ComponentError> {
        self.components
            .get(verb)
            .cloned()
            .ok_or_else(|| ComponentError::UnknownVerb(verb.to_string()))
    }

    /// Whether a verb is registered
    pub fn contains(&self, verb: &str) -> bool {
        self.components.contains_key(verb)
    }

    /// Sorted verb names, advertised in heartbeats
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
