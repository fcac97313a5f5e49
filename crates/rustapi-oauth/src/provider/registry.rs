use super::{ProviderConfig, ProviderKey};
use crate::error::{OAuthError, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// Registered provider configurations, keyed by storage key
/// (`provider` or `provider:instance`).
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<String, Arc<ProviderConfig>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, optionally scoped to a tenant instance.
    ///
    /// Registering an existing key replaces its configuration.
    pub fn register(
        &self,
        provider: &str,
        instance: Option<&str>,
        config: ProviderConfig,
    ) -> Result<ProviderKey> {
        if provider.trim().is_empty() || provider.contains(':') {
            return Err(OAuthError::configuration(format!(
                "invalid provider name \"{}\"",
                provider
            )));
        }
        if let Some(instance) = instance {
            if instance.trim().is_empty() || instance.contains(':') || instance == "preserve" {
                return Err(OAuthError::configuration(format!(
                    "invalid instance key \"{}\" for provider \"{}\"",
                    instance, provider
                )));
            }
        }
        config.validate()?;

        let key = match instance {
            Some(instance) => ProviderKey::instance(provider, instance),
            None => ProviderKey::new(provider),
        };

        let previous = self
            .providers
            .insert(key.storage_key(), Arc::new(config));
        if previous.is_some() {
            tracing::warn!(provider_key = %key, "Provider re-registered, previous configuration replaced");
        } else {
            tracing::debug!(provider_key = %key, "Provider registered");
        }

        Ok(key)
    }

    /// Look up the configuration for a key. The preserve flag is ignored.
    pub fn get(&self, key: &ProviderKey) -> Result<Arc<ProviderConfig>> {
        let storage_key = key.storage_key();
        self.providers
            .get(&storage_key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OAuthError::NotRegistered(storage_key))
    }

    /// Whether a key is registered.
    pub fn contains(&self, key: &ProviderKey) -> bool {
        self.providers.contains_key(&key.storage_key())
    }

    /// Every registered key of a provider family, including the unscoped one.
    pub fn instances(&self, provider: &str) -> Vec<ProviderKey> {
        let mut keys: Vec<ProviderKey> = self
            .providers
            .iter()
            .filter_map(|entry| ProviderKey::parse(entry.key()).ok())
            .filter(|key| key.provider() == provider)
            .collect();
        keys.sort_by_key(|key| key.storage_key());
        keys
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.providers.clear();
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClioRegion, ProviderKind};

    fn config(client_id: &str) -> ProviderConfig {
        ProviderConfig::new(
            ProviderKind::Clio {
                region: ClioRegion::Us,
            },
            client_id,
            "secret",
            "https://example.com/callback",
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProviderRegistry::new();
        let key = registry.register("clio", None, config("a")).unwrap();
        assert_eq!(registry.get(&key).unwrap().client_id, "a");

        let missing = ProviderKey::new("intuit");
        assert!(matches!(
            registry.get(&missing),
            Err(OAuthError::NotRegistered(ref k)) if k == "intuit"
        ));
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = ProviderRegistry::new();
        registry.register("clio", None, config("first")).unwrap();
        let key = registry.register("clio", None, config("second")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key).unwrap().client_id, "second");
    }

    #[test]
    fn test_instances_and_preserve_lookup() {
        let registry = ProviderRegistry::new();
        registry.register("clio", Some("tenantB"), config("b")).unwrap();
        registry.register("clio", Some("tenantA"), config("a")).unwrap();
        registry.register("intuit", None, config("i")).unwrap();

        let keys: Vec<String> = registry
            .instances("clio")
            .iter()
            .map(|k| k.storage_key())
            .collect();
        assert_eq!(keys, vec!["clio:tenantA", "clio:tenantB"]);

        let preserved = ProviderKey::parse("clio:tenantA:preserve").unwrap();
        assert_eq!(registry.get(&preserved).unwrap().client_id, "a");
    }

    #[test]
    fn test_rejects_invalid_registrations() {
        let registry = ProviderRegistry::new();
        assert!(registry.register("", None, config("a")).is_err());
        assert!(registry.register("clio:x", None, config("a")).is_err());
        assert!(registry.register("clio", Some("preserve"), config("a")).is_err());
        assert!(registry.register("clio", None, config("")).is_err());
        assert!(registry.is_empty());
    }
}
