//! Services and the registered-service lookup
//!
//! The service registry is read concurrently by every request. The in-memory
//! manager keeps an immutable snapshot behind a lock and swaps it whole on
//! reload, so a reader never sees a half-applied change.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stepgate_common::config::{MultifactorPolicyConfig, ServiceConfig, compile_service_pattern};
use stepgate_common::{FailureMode, RegisteredServiceId};

use crate::matcher::AttributeMatcher;

/// The service a principal is accessing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    /// Service URL
    pub id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Multifactor requirements of a registered service
#[derive(Debug, Clone, Default)]
pub struct MultifactorPolicy {
    /// Providers required by the service
    pub providers: Vec<String>,
    /// Service-level failure mode
    pub failure_mode: FailureMode,
    /// Skip multifactor authentication for this service
    pub bypass_enabled: bool,
    /// Require the providers only for matching principals
    pub principal_attribute_trigger: Option<AttributeMatcher>,
    /// Bypass for matching principals
    pub bypass_principal_attribute: Option<AttributeMatcher>,
}

impl MultifactorPolicy {
    /// Policy requiring the given providers
    pub fn with_providers(providers: Vec<String>) -> Self {
        Self {
            providers,
            ..Self::default()
        }
    }

    fn from_config(
        service_id: u64,
        config: &MultifactorPolicyConfig,
    ) -> stepgate_common::Result<Self> {
        let field = format!("services[{service_id}].multifactor_policy");
        let principal_attribute_trigger = config
            .principal_attribute_name_trigger
            .as_deref()
            .map(|name| {
                AttributeMatcher::from_config(
                    &format!("{field}.principal_attribute_value_to_match"),
                    name,
                    config.principal_attribute_value_to_match.as_deref(),
                )
            })
            .transpose()?;
        let bypass_principal_attribute = config
            .bypass_principal_attribute_name
            .as_deref()
            .map(|name| {
                AttributeMatcher::from_config(
                    &format!("{field}.bypass_principal_attribute_value"),
                    name,
                    config.bypass_principal_attribute_value.as_deref(),
                )
            })
            .transpose()?;

        Ok(Self {
            providers: config.providers.clone(),
            failure_mode: config.failure_mode,
            bypass_enabled: config.bypass_enabled,
            principal_attribute_trigger,
            bypass_principal_attribute,
        })
    }
}

/// A relying service and its authentication requirements
#[derive(Debug, Clone)]
pub struct RegisteredService {
    pub id: RegisteredServiceId,
    pub name: String,
    /// Pattern matched against the whole of [`Service::id`]
    pub service_id: Regex,
    /// Lower values are matched first
    pub evaluation_order: i32,
    pub multifactor_policy: Option<MultifactorPolicy>,
}

impl RegisteredService {
    pub fn new(id: u64, name: impl Into<String>, service_id: Regex) -> Self {
        Self {
            id: RegisteredServiceId(id),
            name: name.into(),
            service_id,
            evaluation_order: 0,
            multifactor_policy: None,
        }
    }

    /// Set the multifactor policy
    pub fn with_multifactor_policy(mut self, policy: MultifactorPolicy) -> Self {
        self.multifactor_policy = Some(policy);
        self
    }

    /// Set evaluation order
    pub fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    /// Build from configuration. The `service_id` pattern must match the
    /// whole service URL.
    pub fn from_config(config: &ServiceConfig) -> stepgate_common::Result<Self> {
        let service_id = compile_service_pattern(
            &format!("services[{}].service_id", config.id),
            &config.service_id,
        )?;
        let multifactor_policy = config
            .multifactor_policy
            .as_ref()
            .map(|policy| MultifactorPolicy::from_config(config.id, policy))
            .transpose()?;

        Ok(Self {
            id: RegisteredServiceId(config.id),
            name: config.name.clone(),
            service_id,
            evaluation_order: config.evaluation_order,
            multifactor_policy,
        })
    }

    /// Check whether this registration covers `service`
    pub fn matches(&self, service: &Service) -> bool {
        self.service_id.is_match(&service.id)
    }
}

/// Lookup of registered services
pub trait ServicesManager: Send + Sync {
    /// Find the registration covering `service`
    fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>>;
}

type ServiceSnapshot = Arc<Vec<Arc<RegisteredService>>>;

/// In-memory service registry
///
/// In production, this would be backed by the service registry store
pub struct InMemoryServicesManager {
    /// Services sorted by evaluation order, then id
    services: RwLock<ServiceSnapshot>,
}

impl Default for InMemoryServicesManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServicesManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Create a registry holding `services`
    pub fn with_services(services: Vec<RegisteredService>) -> Self {
        let manager = Self::new();
        manager.replace_all(services);
        manager
    }

    /// Add or replace a single registration
    pub fn save(&self, service: RegisteredService) {
        let mut guard = self.services.write();
        let mut next: Vec<Arc<RegisteredService>> = guard
            .iter()
            .filter(|s| s.id != service.id)
            .cloned()
            .collect();
        next.push(Arc::new(service));
        sort_services(&mut next);
        *guard = Arc::new(next);
    }

    /// Replace every registration at once
    pub fn replace_all(&self, services: Vec<RegisteredService>) {
        let mut next: Vec<Arc<RegisteredService>> =
            services.into_iter().map(Arc::new).collect();
        sort_services(&mut next);
        *self.services.write() = Arc::new(next);
    }

    /// Current snapshot of all registrations
    pub fn all(&self) -> Vec<Arc<RegisteredService>> {
        self.snapshot().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> ServiceSnapshot {
        Arc::clone(&self.services.read())
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>> {
        self.snapshot().iter().find(|s| s.matches(service)).cloned()
    }
}

fn sort_services(services: &mut [Arc<RegisteredService>]) {
    services.sort_by_key(|s| (s.evaluation_order, s.id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: u64, pattern: &str, order: i32) -> RegisteredService {
        RegisteredService::new(id, format!("svc-{id}"), Regex::new(pattern).unwrap())
            .with_evaluation_order(order)
    }

    #[test]
    fn test_find_service_by_evaluation_order() {
        let manager = InMemoryServicesManager::with_services(vec![
            service(1, "^https://.*", 100),
            service(2, "^https://portal\\.example\\.org/.*", 1),
        ]);

        let found = manager
            .find_service_by(&Service::new("https://portal.example.org/home"))
            .unwrap();
        assert_eq!(found.id, RegisteredServiceId(2));

        let fallback = manager
            .find_service_by(&Service::new("https://other.example.org"))
            .unwrap();
        assert_eq!(fallback.id, RegisteredServiceId(1));

        assert!(manager.find_service_by(&Service::new("ftp://x")).is_none());
    }

    #[test]
    fn test_save_replaces_same_id() {
        let manager = InMemoryServicesManager::new();
        manager.save(service(1, "^a$", 0));
        manager.save(service(1, "^b$", 0));
        assert_eq!(manager.len(), 1);
        assert!(manager.find_service_by(&Service::new("b")).is_some());
        assert!(manager.find_service_by(&Service::new("a")).is_none());
    }

    #[test]
    fn test_replace_all_keeps_old_snapshot_alive() {
        let manager = InMemoryServicesManager::with_services(vec![service(1, "^a$", 0)]);
        let held = manager.find_service_by(&Service::new("a")).unwrap();

        manager.replace_all(vec![service(2, "^b$", 0)]);
        assert!(manager.find_service_by(&Service::new("a")).is_none());
        assert_eq!(held.name, "svc-1");
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = ServiceConfig {
            id: 7,
            name: "portal".to_string(),
            service_id: "^https://portal/.*".to_string(),
            evaluation_order: 3,
            multifactor_policy: Some(MultifactorPolicyConfig {
                providers: vec!["mfa-duo".to_string()],
                failure_mode: FailureMode::Open,
                principal_attribute_name_trigger: Some("memberOf".to_string()),
                principal_attribute_value_to_match: Some("^staff$".to_string()),
                ..MultifactorPolicyConfig::default()
            }),
        };

        let registered = RegisteredService::from_config(&config).unwrap();
        assert!(registered.matches(&Service::new("https://portal/x")));
        let policy = registered.multifactor_policy.unwrap();
        assert_eq!(policy.providers, vec!["mfa-duo".to_string()]);
        assert_eq!(policy.failure_mode, FailureMode::Open);
        assert_eq!(policy.principal_attribute_trigger.unwrap().name(), "memberOf");
        assert!(policy.bypass_principal_attribute.is_none());
    }

    #[test]
    fn test_configured_pattern_matches_whole_url() {
        let config = ServiceConfig {
            id: 9,
            name: "portal".to_string(),
            service_id: r"https://portal\.example\.org/.*".to_string(),
            evaluation_order: 0,
            multifactor_policy: None,
        };
        let registered = RegisteredService::from_config(&config).unwrap();

        assert!(registered.matches(&Service::new("https://portal.example.org/home")));
        assert!(!registered.matches(&Service::new(
            "https://evil.example.com/?next=https://portal.example.org/home"
        )));
        assert!(!registered.matches(&Service::new("xhttps://portal.example.org/")));
    }
}
