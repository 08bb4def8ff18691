//! Service discovery contract and a reference in-memory registry.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::info;

/// Register/resolve service instances.
///
/// `subscribe` hands back a watch channel that receives the full instance
/// list on every membership change, so clients keep their caches warm
/// without polling.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, service: &str, addr: &str) -> Result<()>;

    async fn deregister(&self, service: &str, addr: &str) -> Result<()>;

    /// Current healthy instance addresses (`host:port`).
    async fn list(&self, service: &str) -> Result<Vec<String>>;

    /// Watch membership changes for a service.
    fn subscribe(&self, service: &str) -> watch::Receiver<Vec<String>>;
}

struct ServiceEntry {
    addrs: Vec<String>,
    tx: watch::Sender<Vec<String>>,
}

impl ServiceEntry {
    fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            addrs: Vec::new(),
            tx,
        }
    }
}

/// In-memory registry for single-process deployments and tests; a
/// production deployment swaps in a real discovery backend behind the same
/// trait.
pub struct MemoryRegistry {
    services: Mutex<HashMap<String, ServiceEntry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Registry pre-seeded with a static instance list, e.g. from an
    /// environment variable in mesh binaries.
    pub fn with_static(service: &str, addrs: &[String]) -> Self {
        let registry = Self::new();
        let mut services = registry.services.lock().expect("registry map poisoned");
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.addrs = addrs.to_vec();
        let _ = entry.tx.send(entry.addrs.clone());
        drop(services);
        registry
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: &str, addr: &str) -> Result<()> {
        let mut services = self.services.lock().expect("registry map poisoned");
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        if !entry.addrs.iter().any(|a| a == addr) {
            entry.addrs.push(addr.to_string());
            let _ = entry.tx.send(entry.addrs.clone());
            info!(service, addr, instances = entry.addrs.len(), "instance registered");
        }
        Ok(())
    }

    async fn deregister(&self, service: &str, addr: &str) -> Result<()> {
        let mut services = self.services.lock().expect("registry map poisoned");
        if let Some(entry) = services.get_mut(service) {
            entry.addrs.retain(|a| a != addr);
            let _ = entry.tx.send(entry.addrs.clone());
            info!(service, addr, instances = entry.addrs.len(), "instance deregistered");
        }
        Ok(())
    }

    async fn list(&self, service: &str) -> Result<Vec<String>> {
        let services = self.services.lock().expect("registry map poisoned");
        Ok(services
            .get(service)
            .map(|e| e.addrs.clone())
            .unwrap_or_default())
    }

    fn subscribe(&self, service: &str) -> watch::Receiver<Vec<String>> {
        let mut services = self.services.lock().expect("registry map poisoned");
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_list_deregister() {
        let registry = MemoryRegistry::new();
        registry.register("gateway-service", "127.0.0.1:8001").await.unwrap();
        registry.register("gateway-service", "127.0.0.1:8002").await.unwrap();
        // Double register is a no-op
        registry.register("gateway-service", "127.0.0.1:8001").await.unwrap();

        let addrs = registry.list("gateway-service").await.unwrap();
        assert_eq!(addrs.len(), 2);

        registry.deregister("gateway-service", "127.0.0.1:8001").await.unwrap();
        let addrs = registry.list("gateway-service").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8002".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_membership_changes() {
        let registry = MemoryRegistry::new();
        let mut rx = registry.subscribe("gateway-service");

        registry.register("gateway-service", "127.0.0.1:9000").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), vec!["127.0.0.1:9000".to_string()]);
    }
}
