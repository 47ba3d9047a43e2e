//! Registry of custom tools, keyed by `<provider>:<original_name>`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::types::CustomToolInfo;

/// Explicit name-to-handle map of every registered custom tool.
#[derive(Default)]
pub struct CustomToolRegistry {
    tools: DashMap<String, Arc<CustomToolInfo>>,
}

impl CustomToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any entry with the same key.
    pub fn register(&self, info: CustomToolInfo) -> Arc<CustomToolInfo> {
        let key = info.key();
        let info = Arc::new(info);
        if self.tools.insert(key.clone(), info.clone()).is_some() {
            info!(tool = %key, "Replaced custom tool registration");
        } else {
            info!(tool = %key, custom_type = %info.custom_type, "Registered custom tool");
        }
        info
    }

    pub fn unregister(&self, provider: &str, original_name: &str) -> Option<Arc<CustomToolInfo>> {
        self.tools
            .remove(&format!("{provider}:{original_name}"))
            .map(|(_, info)| info)
    }

    pub fn get(&self, provider: &str, original_name: &str) -> Option<Arc<CustomToolInfo>> {
        self.tools
            .get(&format!("{provider}:{original_name}"))
            .map(|e| e.value().clone())
    }

    /// Every entry whose `original_name` equals `name`, ignoring the
    /// hyphen/underscore distinction. Sorted by key.
    pub fn find_by_name(&self, name: &str) -> Vec<Arc<CustomToolInfo>> {
        let wanted = fold_separators(name);
        let mut found: Vec<Arc<CustomToolInfo>> = self
            .tools
            .iter()
            .filter(|e| fold_separators(&e.value().original_name) == wanted)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|info| info.key());
        found
    }

    /// Snapshot of all registrations, sorted by key.
    pub fn list(&self) -> Vec<Arc<CustomToolInfo>> {
        let mut all: Vec<Arc<CustomToolInfo>> =
            self.tools.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|info| info.key());
        all
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Fold `-` onto `_` so both spellings compare equal.
pub(crate) fn fold_separators(name: &str) -> String {
    name.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CustomType;

    #[test]
    fn test_register_and_lookup() {
        let registry = CustomToolRegistry::new();
        registry.register(CustomToolInfo::new("acme", "send-email", CustomType::Http));
        registry.register(CustomToolInfo::new("acme", "list_inbox", CustomType::Http));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("acme", "send-email").is_some());
        assert!(registry.get("other", "send-email").is_none());

        assert_eq!(registry.find_by_name("send_email").len(), 1);
        assert_eq!(registry.find_by_name("list-inbox").len(), 1);
        assert!(registry.find_by_name("sendemail").is_empty());
    }

    #[test]
    fn test_register_replaces_same_key() {
        let registry = CustomToolRegistry::new();
        registry.register(CustomToolInfo::new("acme", "run", CustomType::Http));
        registry.register(CustomToolInfo::new("acme", "run", CustomType::Sse));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("acme", "run").unwrap().custom_type,
            CustomType::Sse
        );
    }

    #[test]
    fn test_unregister() {
        let registry = CustomToolRegistry::new();
        registry.register(CustomToolInfo::new("acme", "run", CustomType::Json));
        assert!(registry.unregister("acme", "run").is_some());
        assert!(registry.unregister("acme", "run").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_name_sorted() {
        let registry = CustomToolRegistry::new();
        registry.register(CustomToolInfo::new("zeta", "search", CustomType::Http));
        registry.register(CustomToolInfo::new("alpha", "search", CustomType::Sse));

        let found = registry.find_by_name("search");
        let keys: Vec<String> = found.iter().map(|i| i.key()).collect();
        assert_eq!(keys, vec!["alpha:search", "zeta:search"]);
    }
}
