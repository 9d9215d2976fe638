use async_trait::async_trait;
use relaycore::{OrchestratorError, ProviderError, ProviderHandle, ProviderSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Factory trait for connecting to a named provider
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Logical provider name this factory serves
    fn name(&self) -> &str;

    /// Operations the provider declares
    fn operations(&self) -> Vec<String>;

    /// Establish and initialize a connection; may be slow
    async fn connect(&self) -> Result<ProviderHandle, ProviderError>;

    /// Optional: describe the provider for listings
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::default()
    }
}

/// Metadata about a configured provider
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub description: String,
    pub transport: String,
}

impl Default for ProviderMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            transport: "custom".to_string(),
        }
    }
}

struct RegistryEntry {
    factory: Arc<dyn ProviderFactory>,
    handle: OnceCell<ProviderHandle>,
}

/// Registry of configured providers and their cached connections.
///
/// Each name owns its own `OnceCell`, so concurrent first resolutions of one
/// name share a single `connect` call while other names proceed untouched.
pub struct ProviderRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a provider factory
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        let name = factory.name().to_string();
        tracing::info!("Registering provider: {}", name);
        self.entries.insert(
            name,
            RegistryEntry {
                factory,
                handle: OnceCell::new(),
            },
        );
    }

    /// Resolve a provider name to a ready handle, connecting on first use
    pub async fn resolve(&self, name: &str) -> Result<ProviderHandle, OrchestratorError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownProvider(name.to_string()))?;

        let handle = entry
            .handle
            .get_or_try_init(|| async {
                tracing::info!(provider = name, "connecting to provider");
                entry.factory.connect().await.map_err(|source| {
                    tracing::error!(provider = name, "connection failed: {}", source);
                    OrchestratorError::ProviderUnavailable {
                        provider: name.to_string(),
                        source,
                    }
                })
            })
            .await?;

        Ok(Arc::clone(handle))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn has_operation(&self, provider: &str, operation: &str) -> bool {
        self.entries
            .get(provider)
            .map(|entry| entry.factory.operations().iter().any(|op| op == operation))
            .unwrap_or(false)
    }

    /// True once the provider has been connected
    pub fn is_connected(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|entry| entry.handle.initialized())
            .unwrap_or(false)
    }

    /// Get all registered provider names, sorted
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn summaries(&self) -> Vec<ProviderSummary> {
        self.list_providers()
            .into_iter()
            .filter_map(|name| {
                self.entries.get(&name).map(|entry| ProviderSummary {
                    operations: entry.factory.operations(),
                    name,
                })
            })
            .collect()
    }

    pub fn get_metadata(&self, name: &str) -> Option<ProviderMetadata> {
        self.entries.get(name).map(|entry| entry.factory.metadata())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
