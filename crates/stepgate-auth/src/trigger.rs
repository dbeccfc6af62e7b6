//! Trigger selection
//!
//! A trigger decides which provider, if any, a request requires. Triggers
//! are pure: they never fail and never mutate the authentication. When
//! several triggers fire, the composed strategy keeps the strongest
//! requirement, so a request parameter can raise what a service requires
//! but never lower it.

use std::sync::Arc;

use stepgate_common::config::{AttributeTriggerConfig, TriggerConfig, compile_pattern};

use crate::authentication::Authentication;
use crate::matcher::PatternMatcher;
use crate::registry::ProviderRegistry;
use crate::request::RequestContext;
use crate::service::{RegisteredService, Service};

/// Produces at most one required provider id
pub trait TriggerSelectionStrategy: Send + Sync {
    /// Trigger name for logging
    fn name(&self) -> &str;

    /// The provider required for this request, or `None`
    fn resolve(
        &self,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        service: &Service,
    ) -> Option<String>;
}

/// Highest-ranked registered provider among `candidates`
fn highest_ranked<'a>(
    registry: &dyn ProviderRegistry,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    candidates
        .into_iter()
        .filter_map(|id| registry.get_provider_by_id(id))
        .max_by(|a, b| a.order().cmp(&b.order()).then_with(|| b.id().cmp(a.id())))
        .map(|p| p.id().to_string())
}

/// Requires the same provider for every request
pub struct GlobalTrigger {
    provider_id: String,
}

impl GlobalTrigger {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl TriggerSelectionStrategy for GlobalTrigger {
    fn name(&self) -> &str {
        "global"
    }

    fn resolve(
        &self,
        _request: &RequestContext,
        _registered_service: Option<&RegisteredService>,
        _authentication: &Authentication,
        _service: &Service,
    ) -> Option<String> {
        Some(self.provider_id.clone())
    }
}

/// Reads the provider from a request parameter, or a header of the same name
pub struct RequestParameterTrigger {
    parameter: String,
}

impl RequestParameterTrigger {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
        }
    }
}

impl TriggerSelectionStrategy for RequestParameterTrigger {
    fn name(&self) -> &str {
        "request-parameter"
    }

    fn resolve(
        &self,
        request: &RequestContext,
        _registered_service: Option<&RegisteredService>,
        _authentication: &Authentication,
        _service: &Service,
    ) -> Option<String> {
        request
            .parameter(&self.parameter)
            .or_else(|| request.header(&self.parameter))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Requires the providers named by the registered service's policy
pub struct RegisteredServiceTrigger {
    registry: Arc<dyn ProviderRegistry>,
}

impl RegisteredServiceTrigger {
    pub fn new(registry: Arc<dyn ProviderRegistry>) -> Self {
        Self { registry }
    }
}

impl TriggerSelectionStrategy for RegisteredServiceTrigger {
    fn name(&self) -> &str {
        "registered-service"
    }

    fn resolve(
        &self,
        _request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        _service: &Service,
    ) -> Option<String> {
        let policy = registered_service?.multifactor_policy.as_ref()?;
        if policy.providers.is_empty() {
            return None;
        }
        if let Some(trigger) = &policy.principal_attribute_trigger
            && !trigger.matches(&authentication.principal().attributes)
        {
            return None;
        }

        // an unknown provider still yields a requirement; the lookup fails later
        highest_ranked(
            self.registry.as_ref(),
            policy.providers.iter().map(String::as_str),
        )
        .or_else(|| policy.providers.first().cloned())
    }
}

/// Where an attribute trigger reads its attributes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeSource {
    Principal,
    Authentication,
}

/// Selects a provider from matching attribute values
struct AttributeTrigger {
    source: AttributeSource,
    matcher: PatternMatcher,
    provider_id: Option<String>,
    registry: Arc<dyn ProviderRegistry>,
}

impl AttributeTrigger {
    fn from_config(
        source: AttributeSource,
        field: &str,
        config: &AttributeTriggerConfig,
        registry: Arc<dyn ProviderRegistry>,
    ) -> stepgate_common::Result<Self> {
        let matcher = PatternMatcher::new(
            compile_pattern(&format!("{field}.name_pattern"), &config.name_pattern)?,
            compile_pattern(&format!("{field}.value_pattern"), &config.value_pattern)?,
        );
        Ok(Self {
            source,
            matcher,
            provider_id: config.provider_id.clone(),
            registry,
        })
    }

    fn resolve(&self, authentication: &Authentication) -> Option<String> {
        let owned;
        let attributes = match self.source {
            AttributeSource::Principal => &authentication.principal().attributes,
            AttributeSource::Authentication => {
                owned = authentication.attributes();
                &owned
            }
        };
        let values = self.matcher.matching_values(attributes);
        if values.is_empty() {
            return None;
        }
        match &self.provider_id {
            Some(id) => Some(id.clone()),
            None => highest_ranked(self.registry.as_ref(), values),
        }
    }
}

/// Selects a provider from principal attributes
pub struct PrincipalAttributeTrigger(AttributeTrigger);

impl PrincipalAttributeTrigger {
    /// Build from configuration; the registry resolves value-named providers
    pub fn from_config(
        config: &AttributeTriggerConfig,
        registry: Arc<dyn ProviderRegistry>,
    ) -> stepgate_common::Result<Self> {
        AttributeTrigger::from_config(
            AttributeSource::Principal,
            "engine.triggers.principal_attribute",
            config,
            registry,
        )
        .map(Self)
    }
}

impl TriggerSelectionStrategy for PrincipalAttributeTrigger {
    fn name(&self) -> &str {
        "principal-attribute"
    }

    fn resolve(
        &self,
        _request: &RequestContext,
        _registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        _service: &Service,
    ) -> Option<String> {
        self.0.resolve(authentication)
    }
}

/// Selects a provider from authentication attributes
pub struct AuthenticationAttributeTrigger(AttributeTrigger);

impl AuthenticationAttributeTrigger {
    pub fn from_config(
        config: &AttributeTriggerConfig,
        registry: Arc<dyn ProviderRegistry>,
    ) -> stepgate_common::Result<Self> {
        AttributeTrigger::from_config(
            AttributeSource::Authentication,
            "engine.triggers.authentication_attribute",
            config,
            registry,
        )
        .map(Self)
    }
}

impl TriggerSelectionStrategy for AuthenticationAttributeTrigger {
    fn name(&self) -> &str {
        "authentication-attribute"
    }

    fn resolve(
        &self,
        _request: &RequestContext,
        _registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        _service: &Service,
    ) -> Option<String> {
        self.0.resolve(authentication)
    }
}

/// Chain of triggers.
///
/// Every trigger is consulted and the highest-ranked provider wins. An id
/// unknown to the registry cannot be ranked and only its exact marker can
/// satisfy it, so it is kept over registered providers. Ties go to the
/// earlier trigger.
pub struct ChainingTriggerSelectionStrategy {
    triggers: Vec<Arc<dyn TriggerSelectionStrategy>>,
    registry: Arc<dyn ProviderRegistry>,
}

impl ChainingTriggerSelectionStrategy {
    /// Create an empty chain ranking providers through `registry`
    pub fn new(registry: Arc<dyn ProviderRegistry>) -> Self {
        Self {
            triggers: Vec::new(),
            registry,
        }
    }

    /// Add a trigger to the chain
    pub fn add<T: TriggerSelectionStrategy + 'static>(&mut self, trigger: T) -> &mut Self {
        self.triggers.push(Arc::new(trigger));
        self
    }

    /// Add a trigger wrapped in Arc
    pub fn add_arc(&mut self, trigger: Arc<dyn TriggerSelectionStrategy>) -> &mut Self {
        self.triggers.push(trigger);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Names of the chained triggers, in evaluation order
    pub fn names(&self) -> Vec<&str> {
        self.triggers.iter().map(|t| t.name()).collect()
    }

    /// Build the trigger chain described by configuration
    pub fn from_config(
        config: &TriggerConfig,
        registry: &Arc<dyn ProviderRegistry>,
    ) -> stepgate_common::Result<Self> {
        let mut chain = Self::new(Arc::clone(registry));
        if let Some(id) = &config.global_provider_id {
            chain.add(GlobalTrigger::new(id.clone()));
        }
        if let Some(parameter) = &config.request_parameter {
            chain.add(RequestParameterTrigger::new(parameter.clone()));
        }
        if config.registered_service {
            chain.add(RegisteredServiceTrigger::new(Arc::clone(registry)));
        }
        if let Some(trigger) = &config.principal_attribute {
            chain.add(PrincipalAttributeTrigger::from_config(
                trigger,
                Arc::clone(registry),
            )?);
        }
        if let Some(trigger) = &config.authentication_attribute {
            chain.add(AuthenticationAttributeTrigger::from_config(
                trigger,
                Arc::clone(registry),
            )?);
        }
        Ok(chain)
    }
}

impl TriggerSelectionStrategy for ChainingTriggerSelectionStrategy {
    fn name(&self) -> &str {
        "chain"
    }

    fn resolve(
        &self,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        service: &Service,
    ) -> Option<String> {
        // rank None marks an unregistered id
        let mut selected: Option<(String, Option<i32>)> = None;
        for trigger in &self.triggers {
            let Some(provider_id) =
                trigger.resolve(request, registered_service, authentication, service)
            else {
                continue;
            };
            let rank = self
                .registry
                .get_provider_by_id(&provider_id)
                .map(|p| p.order());
            tracing::debug!(
                trigger = trigger.name(),
                provider = %provider_id,
                service = %service,
                "Trigger resolved provider"
            );
            let stronger = match (&selected, rank) {
                (None, _) => true,
                (Some((_, Some(_))), None) => true,
                (Some((_, Some(best))), Some(rank)) => rank > *best,
                (Some((_, None)), _) => false,
            };
            if stronger {
                selected = Some((provider_id, rank));
            }
        }
        selected.map(|(provider_id, _)| provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::Principal;
    use crate::matcher::AttributeMatcher;
    use crate::provider::MultifactorProvider;
    use crate::registry::DefaultProviderRegistry;
    use crate::service::MultifactorPolicy;
    use regex::Regex;

    fn registry() -> Arc<dyn ProviderRegistry> {
        Arc::new(DefaultProviderRegistry::with_providers(vec![
            MultifactorProvider::new("mfa-duo").with_order(10).with_alias("duo"),
            MultifactorProvider::new("mfa-gauth").with_order(1),
        ]))
    }

    fn staff() -> Authentication {
        Authentication::new(
            Principal::new("casuser").with_attribute("memberOf", vec!["staff".to_string()]),
        )
    }

    fn service_requiring(providers: &[&str]) -> RegisteredService {
        RegisteredService::new(1, "svc", Regex::new(".*").unwrap()).with_multifactor_policy(
            MultifactorPolicy::with_providers(providers.iter().map(|p| p.to_string()).collect()),
        )
    }

    fn resolve(
        trigger: &dyn TriggerSelectionStrategy,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
    ) -> Option<String> {
        trigger.resolve(
            request,
            registered_service,
            authentication,
            &Service::new("https://app.example.org"),
        )
    }

    #[test]
    fn test_global_trigger() {
        let trigger = GlobalTrigger::new("mfa-duo");
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), None, &staff()).as_deref(),
            Some("mfa-duo")
        );
    }

    #[test]
    fn test_request_parameter_trigger() {
        let trigger = RequestParameterTrigger::new("authn_method");
        let auth = staff();

        let by_param = RequestContext::new().with_parameter("authn_method", "mfa-gauth");
        assert_eq!(resolve(&trigger, &by_param, None, &auth).as_deref(), Some("mfa-gauth"));

        let by_header = RequestContext::new().with_header("authn_method", "mfa-duo");
        assert_eq!(resolve(&trigger, &by_header, None, &auth).as_deref(), Some("mfa-duo"));

        let blank = RequestContext::new().with_parameter("authn_method", "  ");
        assert!(resolve(&trigger, &blank, None, &auth).is_none());
        assert!(resolve(&trigger, &RequestContext::new(), None, &auth).is_none());
    }

    #[test]
    fn test_registered_service_trigger_picks_highest_rank() {
        let trigger = RegisteredServiceTrigger::new(registry());
        let service = service_requiring(&["mfa-gauth", "duo"]);
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), Some(&service), &staff()).as_deref(),
            Some("mfa-duo")
        );
    }

    #[test]
    fn test_registered_service_trigger_unknown_provider() {
        let trigger = RegisteredServiceTrigger::new(registry());
        let service = service_requiring(&["mfa-yubikey"]);
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), Some(&service), &staff()).as_deref(),
            Some("mfa-yubikey")
        );
        assert!(resolve(&trigger, &RequestContext::new(), None, &staff()).is_none());
    }

    #[test]
    fn test_registered_service_principal_attribute_trigger() {
        let trigger = RegisteredServiceTrigger::new(registry());
        let mut policy = MultifactorPolicy::with_providers(vec!["mfa-duo".to_string()]);
        policy.principal_attribute_trigger = Some(AttributeMatcher::with_value(
            "memberOf",
            Regex::new("^faculty$").unwrap(),
        ));
        let service = RegisteredService::new(1, "svc", Regex::new(".*").unwrap())
            .with_multifactor_policy(policy);

        assert!(resolve(&trigger, &RequestContext::new(), Some(&service), &staff()).is_none());

        let faculty = Authentication::new(
            Principal::new("prof").with_attribute("memberOf", vec!["faculty".to_string()]),
        );
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), Some(&service), &faculty).as_deref(),
            Some("mfa-duo")
        );
    }

    #[test]
    fn test_principal_attribute_trigger_value_names_provider() {
        let config = AttributeTriggerConfig {
            name_pattern: "^mfaPolicy$".to_string(),
            value_pattern: "^mfa-".to_string(),
            provider_id: None,
        };
        let trigger = PrincipalAttributeTrigger::from_config(&config, registry()).unwrap();
        let auth = Authentication::new(Principal::new("casuser").with_attribute(
            "mfaPolicy",
            vec!["mfa-gauth".to_string(), "mfa-duo".to_string(), "mfa-unknown".to_string()],
        ));
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), None, &auth).as_deref(),
            Some("mfa-duo")
        );
        assert!(resolve(&trigger, &RequestContext::new(), None, &staff()).is_none());
    }

    #[test]
    fn test_authentication_attribute_trigger_fixed_provider() {
        let config = AttributeTriggerConfig {
            name_pattern: "^riskLevel$".to_string(),
            value_pattern: "^high$".to_string(),
            provider_id: Some("mfa-gauth".to_string()),
        };
        let trigger = AuthenticationAttributeTrigger::from_config(&config, registry()).unwrap();
        let auth = staff();
        assert!(resolve(&trigger, &RequestContext::new(), None, &auth).is_none());

        auth.set_attribute("riskLevel", vec!["high".to_string()]);
        assert_eq!(
            resolve(&trigger, &RequestContext::new(), None, &auth).as_deref(),
            Some("mfa-gauth")
        );
    }

    #[test]
    fn test_chain_keeps_strongest_requirement() {
        let mut chain = ChainingTriggerSelectionStrategy::new(registry());
        chain
            .add(RequestParameterTrigger::new("authn_method"))
            .add(GlobalTrigger::new("mfa-gauth"));
        assert_eq!(chain.names(), vec!["request-parameter", "global"]);

        let request = RequestContext::new().with_parameter("authn_method", "mfa-duo");
        assert_eq!(resolve(&chain, &request, None, &staff()).as_deref(), Some("mfa-duo"));
        assert_eq!(
            resolve(&chain, &RequestContext::new(), None, &staff()).as_deref(),
            Some("mfa-gauth")
        );

        let empty = ChainingTriggerSelectionStrategy::new(registry());
        assert!(resolve(&empty, &request, None, &staff()).is_none());
    }

    #[test]
    fn test_request_parameter_cannot_lower_service_requirement() {
        let mut chain = ChainingTriggerSelectionStrategy::new(registry());
        chain
            .add(RequestParameterTrigger::new("authn_method"))
            .add(RegisteredServiceTrigger::new(registry()));
        let service = service_requiring(&["mfa-duo"]);

        let weaker = RequestContext::new().with_parameter("authn_method", "mfa-gauth");
        assert_eq!(
            resolve(&chain, &weaker, Some(&service), &staff()).as_deref(),
            Some("mfa-duo")
        );

        // an unregistered id is never traded for a registered one
        let unknown = RequestContext::new().with_parameter("authn_method", "mfa-bogus");
        assert_eq!(
            resolve(&chain, &unknown, Some(&service), &staff()).as_deref(),
            Some("mfa-bogus")
        );

        // raising the requirement is allowed
        let gauth_service = service_requiring(&["mfa-gauth"]);
        let stronger = RequestContext::new().with_parameter("authn_method", "duo");
        assert_eq!(
            resolve(&chain, &stronger, Some(&gauth_service), &staff()).as_deref(),
            Some("duo")
        );
    }

    #[test]
    fn test_chain_from_config() {
        let config = TriggerConfig {
            global_provider_id: Some("mfa-duo".to_string()),
            principal_attribute: Some(AttributeTriggerConfig {
                name_pattern: ".*".to_string(),
                value_pattern: "^mfa-".to_string(),
                provider_id: None,
            }),
            ..TriggerConfig::default()
        };
        let chain = ChainingTriggerSelectionStrategy::from_config(&config, &registry()).unwrap();
        assert_eq!(
            chain.names(),
            vec!["global", "request-parameter", "registered-service", "principal-attribute"]
        );
    }
}
