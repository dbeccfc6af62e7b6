//! Engine assembly from configuration
//!
//! Strategies are chosen here, once per load, and owned by the provider
//! descriptors and the orchestrator. A reload builds a complete new set
//! before anything is swapped, so a bad configuration leaves the running
//! engine untouched.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use stepgate_common::Config;
use stepgate_common::config::ProviderConfig;

use crate::authentication::{Assertion, Authentication};
use crate::bypass::ChainingBypassEvaluator;
use crate::context::DefaultAuthenticationContextValidator;
use crate::error::ContextValidationError;
use crate::failure_mode::DefaultFailureModeEvaluator;
use crate::metrics::EngineMetrics;
use crate::provider::{MultifactorProvider, ToggleAvailability};
use crate::registry::{DefaultProviderRegistry, ProviderRegistry};
use crate::request::RequestContext;
use crate::service::{InMemoryServicesManager, RegisteredService, Service, ServicesManager};
use crate::trigger::ChainingTriggerSelectionStrategy;
use crate::validator::{AuthenticationContextValidationResult, RequestedContextValidator};

/// Everything built from one configuration.
///
/// An assembly is never modified after it is published. The orchestrator
/// holds the same registry and services as the assembly, so one request
/// only ever sees one configuration.
struct Assembly {
    registry: Arc<DefaultProviderRegistry>,
    services: Arc<InMemoryServicesManager>,
    toggles: HashMap<String, Arc<ToggleAvailability>>,
    validator: Arc<RequestedContextValidator>,
}

/// The configured context validation engine
pub struct Engine {
    current: RwLock<Arc<Assembly>>,
    metrics: Arc<EngineMetrics>,
}

impl Engine {
    /// Build an engine from validated configuration
    pub fn from_config(config: &Config) -> stepgate_common::Result<Self> {
        let metrics = Arc::new(EngineMetrics::new());
        let assembly = assemble(config, &metrics)?;

        tracing::info!(
            providers = assembly.registry.len(),
            services = assembly.services.len(),
            "Context validation engine configured"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(assembly)),
            metrics,
        })
    }

    /// Replace providers, services and strategies with a new configuration.
    /// Requests already running finish against the configuration they started with.
    pub fn reload(&self, config: &Config) -> stepgate_common::Result<()> {
        let assembly = assemble(config, &self.metrics)?;
        let (providers, services) = (assembly.registry.len(), assembly.services.len());

        *self.current.write() = Arc::new(assembly);
        self.metrics.record_reload();

        tracing::info!(providers, services, "Configuration reloaded");
        Ok(())
    }

    fn snapshot(&self) -> Arc<Assembly> {
        Arc::clone(&self.current.read())
    }

    /// The current orchestrator
    pub fn validator(&self) -> Arc<RequestedContextValidator> {
        Arc::clone(&self.snapshot().validator)
    }

    pub fn validate_authentication_context(
        &self,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        service: &Service,
    ) -> AuthenticationContextValidationResult {
        self.validator().validate_authentication_context(
            request,
            registered_service,
            authentication,
            service,
        )
    }

    pub fn validate_assertion(
        &self,
        assertion: &Assertion,
        request: &RequestContext,
    ) -> Result<AuthenticationContextValidationResult, ContextValidationError> {
        self.validator().validate_assertion(assertion, request)
    }

    /// Registered service covering `service`
    pub fn find_service(&self, service: &Service) -> Option<Arc<RegisteredService>> {
        self.snapshot().services.find_service_by(service)
    }

    /// Flip a provider's availability. Returns false for unknown providers.
    pub fn set_provider_available(&self, provider_id: &str, available: bool) -> bool {
        let snapshot = self.snapshot();
        let Some(provider) = snapshot.registry.get_provider_by_id(provider_id) else {
            return false;
        };
        match snapshot.toggles.get(provider.id()) {
            Some(toggle) => {
                toggle.set_available(available);
                tracing::info!(
                    provider = provider.id(),
                    available,
                    "Provider availability changed"
                );
                true
            }
            None => false,
        }
    }

    /// Providers of the current configuration
    pub fn registry(&self) -> Arc<dyn ProviderRegistry> {
        self.snapshot().registry.clone()
    }

    /// Registered services of the current configuration, in evaluation order
    pub fn services(&self) -> Vec<Arc<RegisteredService>> {
        self.snapshot().services.all()
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }
}

fn assemble(config: &Config, metrics: &Arc<EngineMetrics>) -> stepgate_common::Result<Assembly> {
    config.validate()?;

    let failure_mode_evaluator = Arc::new(DefaultFailureModeEvaluator::new(
        config.engine.global_failure_mode,
    ));
    let mut providers = Vec::with_capacity(config.providers.len());
    let mut toggles = HashMap::with_capacity(config.providers.len());
    for provider_config in &config.providers {
        let toggle = Arc::new(ToggleAvailability::new(provider_config.available));
        let provider = build_provider(provider_config, &toggle)?
            .with_failure_mode_evaluator(failure_mode_evaluator.clone());
        toggles.insert(provider_config.id.clone(), toggle);
        providers.push(provider);
    }

    let services = config
        .services
        .iter()
        .map(RegisteredService::from_config)
        .collect::<stepgate_common::Result<Vec<_>>>()?;

    let registry = Arc::new(DefaultProviderRegistry::with_providers(providers));
    let services = Arc::new(InMemoryServicesManager::with_services(services));

    let provider_registry: Arc<dyn ProviderRegistry> = registry.clone();
    let trigger =
        ChainingTriggerSelectionStrategy::from_config(&config.engine.triggers, &provider_registry)?;
    tracing::debug!(triggers = ?trigger.names(), "Trigger chain assembled");

    let context_validator = DefaultAuthenticationContextValidator::from_config(
        Arc::clone(&provider_registry),
        &config.engine,
    );
    let validator = RequestedContextValidator::new(
        services.clone(),
        Arc::new(trigger),
        Arc::new(context_validator),
        provider_registry,
    )
    .with_metrics(Arc::clone(metrics));

    Ok(Assembly {
        registry,
        services,
        toggles,
        validator: Arc::new(validator),
    })
}

fn build_provider(
    config: &ProviderConfig,
    toggle: &Arc<ToggleAvailability>,
) -> stepgate_common::Result<MultifactorProvider> {
    let mut provider = MultifactorProvider::new(config.id.clone())
        .with_order(config.order)
        .with_failure_mode(config.failure_mode)
        .with_availability(toggle.clone());
    for alias in &config.aliases {
        provider = provider.with_alias(alias.clone());
    }
    if let Some(bypass) = &config.bypass {
        let chain = ChainingBypassEvaluator::from_config(&config.id, bypass)?;
        provider = provider.with_bypass_evaluator(Arc::new(chain));
    }
    Ok(provider)
}
