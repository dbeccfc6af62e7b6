//! Provider registry
//!
//! Read-only lookup of configured providers by id or alias. The registry is
//! handed to the components that need it at construction time.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::MultifactorProvider;

/// Lookup of configured multifactor providers
pub trait ProviderRegistry: Send + Sync {
    /// Resolve a provider by id or alias
    fn get_provider_by_id(&self, id: &str) -> Option<Arc<MultifactorProvider>>;

    /// All providers, highest rank first
    fn providers(&self) -> Vec<Arc<MultifactorProvider>>;
}

#[derive(Default)]
struct RegistrySnapshot {
    /// Providers indexed by id
    providers: HashMap<String, Arc<MultifactorProvider>>,
    /// Alias to provider id
    aliases: HashMap<String, String>,
}

impl RegistrySnapshot {
    fn build(providers: impl IntoIterator<Item = Arc<MultifactorProvider>>) -> Self {
        let mut snapshot = Self::default();
        for provider in providers {
            for alias in provider.aliases() {
                snapshot
                    .aliases
                    .insert(alias.clone(), provider.id().to_string());
            }
            snapshot
                .providers
                .insert(provider.id().to_string(), provider);
        }
        snapshot
    }

    fn get(&self, id: &str) -> Option<Arc<MultifactorProvider>> {
        self.providers
            .get(id)
            .or_else(|| self.aliases.get(id).and_then(|canonical| self.providers.get(canonical)))
            .cloned()
    }
}

/// In-memory provider registry with whole-snapshot replacement
pub struct DefaultProviderRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for DefaultProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Create a registry holding `providers`
    pub fn with_providers(providers: Vec<MultifactorProvider>) -> Self {
        let registry = Self::new();
        registry.replace_all(providers);
        registry
    }

    /// Add or replace one provider
    pub fn register(&self, provider: MultifactorProvider) {
        let mut guard = self.snapshot.write();
        let provider = Arc::new(provider);
        let mut next: Vec<_> = guard
            .providers
            .values()
            .filter(|p| p.id() != provider.id())
            .cloned()
            .collect();
        next.push(provider);
        *guard = Arc::new(RegistrySnapshot::build(next));
    }

    /// Replace every provider at once
    pub fn replace_all(&self, providers: Vec<MultifactorProvider>) {
        let snapshot = RegistrySnapshot::build(providers.into_iter().map(Arc::new));
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn len(&self) -> usize {
        self.current().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().providers.is_empty()
    }

    fn current(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }
}

impl ProviderRegistry for DefaultProviderRegistry {
    fn get_provider_by_id(&self, id: &str) -> Option<Arc<MultifactorProvider>> {
        self.current().get(id)
    }

    fn providers(&self) -> Vec<Arc<MultifactorProvider>> {
        let mut providers: Vec<_> = self.current().providers.values().cloned().collect();
        providers.sort_by(|a, b| b.order().cmp(&a.order()).then_with(|| a.id().cmp(b.id())));
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_alias() {
        let registry = DefaultProviderRegistry::with_providers(vec![
            MultifactorProvider::new("mfa-duo").with_alias("duo"),
            MultifactorProvider::new("mfa-gauth"),
        ]);

        assert_eq!(registry.get_provider_by_id("mfa-duo").unwrap().id(), "mfa-duo");
        assert_eq!(registry.get_provider_by_id("duo").unwrap().id(), "mfa-duo");
        assert!(registry.get_provider_by_id("mfa-yubikey").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_registry() {
        let registry = DefaultProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get_provider_by_id("mfa-duo").is_none());
        assert!(registry.providers().is_empty());
    }

    #[test]
    fn test_providers_sorted_by_rank() {
        let registry = DefaultProviderRegistry::with_providers(vec![
            MultifactorProvider::new("mfa-gauth").with_order(1),
            MultifactorProvider::new("mfa-duo").with_order(10),
            MultifactorProvider::new("mfa-simple").with_order(1),
        ]);
        let ids: Vec<_> = registry
            .providers()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["mfa-duo", "mfa-gauth", "mfa-simple"]);
    }

    #[test]
    fn test_register_replaces_and_drops_stale_alias() {
        let registry = DefaultProviderRegistry::with_providers(vec![
            MultifactorProvider::new("mfa-duo").with_alias("duo"),
        ]);
        registry.register(MultifactorProvider::new("mfa-duo").with_order(5));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_provider_by_id("mfa-duo").unwrap().order(), 5);
        assert!(registry.get_provider_by_id("duo").is_none());
    }

    #[test]
    fn test_replace_all_is_atomic_for_readers() {
        let registry =
            DefaultProviderRegistry::with_providers(vec![MultifactorProvider::new("mfa-duo")]);
        let held = registry.get_provider_by_id("mfa-duo").unwrap();

        registry.replace_all(vec![MultifactorProvider::new("mfa-gauth")]);
        assert!(registry.get_provider_by_id("mfa-duo").is_none());
        assert!(registry.get_provider_by_id("mfa-gauth").is_some());
        assert_eq!(held.id(), "mfa-duo");
    }
}
