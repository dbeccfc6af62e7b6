//! Bypass evaluation
//!
//! A bypass evaluator decides whether a provider should be skipped for an
//! authentication attempt, and remembers that decision on the
//! authentication so later requests in the session see it.

use chrono::{Duration, Utc};
use regex::Regex;
use std::sync::Arc;

use stepgate_common::config::{BypassConfig, compile_pattern};

use crate::authentication::Authentication;
use crate::error::ProviderError;
use crate::matcher::AttributeMatcher;
use crate::provider::MultifactorProvider;
use crate::request::RequestContext;
use crate::service::RegisteredService;

/// Trait for pluggable bypass evaluators
pub trait BypassEvaluator: Send + Sync {
    /// Evaluator name for logging
    fn name(&self) -> &str;

    /// `false` means the provider should be skipped for this attempt
    fn should_execute(
        &self,
        authentication: &Authentication,
        registered_service: Option<&RegisteredService>,
        provider: &MultifactorProvider,
        request: &RequestContext,
    ) -> Result<bool, ProviderError>;

    /// `true` when a bypass was already remembered for `provider_id`
    fn is_bypassed(
        &self,
        authentication: &Authentication,
        provider_id: &str,
    ) -> Result<bool, ProviderError> {
        Ok(authentication.bypass_record(provider_id).is_some())
    }

    /// Persist the bypass on the authentication. Idempotent.
    fn remember_bypass(&self, authentication: &Authentication, provider: &MultifactorProvider) {
        authentication.remember_bypass(provider.id());
    }

    /// Drop a remembered bypass
    fn forget_bypass(&self, authentication: &Authentication, provider: &MultifactorProvider) {
        authentication.forget_bypass(provider.id());
    }
}

/// Never bypasses
pub struct NeverBypass;

impl BypassEvaluator for NeverBypass {
    fn name(&self) -> &str {
        "never"
    }

    fn should_execute(
        &self,
        _authentication: &Authentication,
        _registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Bypasses when the principal carries a matching attribute
pub struct PrincipalAttributeBypass {
    matcher: AttributeMatcher,
}

impl PrincipalAttributeBypass {
    pub fn new(matcher: AttributeMatcher) -> Self {
        Self { matcher }
    }
}

impl BypassEvaluator for PrincipalAttributeBypass {
    fn name(&self) -> &str {
        "principal-attribute"
    }

    fn should_execute(
        &self,
        authentication: &Authentication,
        _registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        Ok(!self.matcher.matches(&authentication.principal().attributes))
    }
}

/// Bypasses when the authentication carries a matching attribute
pub struct AuthenticationAttributeBypass {
    matcher: AttributeMatcher,
}

impl AuthenticationAttributeBypass {
    pub fn new(matcher: AttributeMatcher) -> Self {
        Self { matcher }
    }
}

impl BypassEvaluator for AuthenticationAttributeBypass {
    fn name(&self) -> &str {
        "authentication-attribute"
    }

    fn should_execute(
        &self,
        authentication: &Authentication,
        _registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        let matched = authentication
            .attribute(self.matcher.name())
            .is_some_and(|values| self.matcher.matches_values(&values));
        Ok(!matched)
    }
}

/// Bypasses when a successful authentication method matches
pub struct AuthenticationMethodBypass {
    pattern: Regex,
}

impl AuthenticationMethodBypass {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl BypassEvaluator for AuthenticationMethodBypass {
    fn name(&self) -> &str {
        "authentication-method"
    }

    fn should_execute(
        &self,
        authentication: &Authentication,
        _registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        let matched = authentication
            .successful_methods()
            .iter()
            .any(|m| self.pattern.is_match(m));
        Ok(!matched)
    }
}

/// Bypasses requests from matching client addresses or with matching headers
pub struct HttpRequestBypass {
    remote_address: Option<Regex>,
    headers: Option<Regex>,
}

impl HttpRequestBypass {
    pub fn new(remote_address: Option<Regex>, headers: Option<Regex>) -> Self {
        Self {
            remote_address,
            headers,
        }
    }
}

impl BypassEvaluator for HttpRequestBypass {
    fn name(&self) -> &str {
        "http-request"
    }

    fn should_execute(
        &self,
        _authentication: &Authentication,
        _registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        if let (Some(pattern), Some(ip)) = (&self.remote_address, request.client_ip)
            && pattern.is_match(&ip.to_string())
        {
            return Ok(false);
        }
        if let Some(pattern) = &self.headers
            && request.header_values().any(|v| pattern.is_match(v))
        {
            return Ok(false);
        }
        Ok(true)
    }
}

/// Bypasses when the registered service policy disables multifactor
pub struct RegisteredServiceBypass;

impl BypassEvaluator for RegisteredServiceBypass {
    fn name(&self) -> &str {
        "registered-service"
    }

    fn should_execute(
        &self,
        _authentication: &Authentication,
        registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        let bypass = registered_service
            .and_then(|s| s.multifactor_policy.as_ref())
            .is_some_and(|p| p.bypass_enabled);
        Ok(!bypass)
    }
}

/// Bypasses principals matching the service policy's bypass attribute
pub struct RegisteredServicePrincipalAttributeBypass;

impl BypassEvaluator for RegisteredServicePrincipalAttributeBypass {
    fn name(&self) -> &str {
        "registered-service-principal-attribute"
    }

    fn should_execute(
        &self,
        authentication: &Authentication,
        registered_service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
        _request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        let bypass = registered_service
            .and_then(|s| s.multifactor_policy.as_ref())
            .and_then(|p| p.bypass_principal_attribute.as_ref())
            .is_some_and(|m| m.matches(&authentication.principal().attributes));
        Ok(!bypass)
    }
}

/// Chain of bypass evaluators.
///
/// The provider executes only if every member says so; a remembered bypass
/// is honored for `remember_ttl` (or the whole session when unset). A chain
/// bound to specific providers never bypasses any other provider.
pub struct ChainingBypassEvaluator {
    evaluators: Vec<Arc<dyn BypassEvaluator>>,
    supported_providers: Vec<String>,
    remember_ttl: Option<Duration>,
}

impl ChainingBypassEvaluator {
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
            supported_providers: Vec::new(),
            remember_ttl: None,
        }
    }

    /// Add an evaluator to the chain
    pub fn add<E: BypassEvaluator + 'static>(&mut self, evaluator: E) -> &mut Self {
        self.evaluators.push(Arc::new(evaluator));
        self
    }

    /// Add an evaluator wrapped in Arc
    pub fn add_arc(&mut self, evaluator: Arc<dyn BypassEvaluator>) -> &mut Self {
        self.evaluators.push(evaluator);
        self
    }

    /// Restrict the chain to one provider id
    pub fn for_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.supported_providers.push(provider_id.into());
        self
    }

    /// True when the chain applies to `provider`
    pub fn supports(&self, provider: &MultifactorProvider) -> bool {
        self.supported_providers.is_empty()
            || self.supported_providers.iter().any(|id| provider.matches(id))
    }

    /// Limit how long a remembered bypass stays valid
    pub fn with_remember_ttl(mut self, ttl: Duration) -> Self {
        self.remember_ttl = Some(ttl);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    /// Build the chain described by a provider's bypass configuration
    pub fn from_config(provider_id: &str, config: &BypassConfig) -> stepgate_common::Result<Self> {
        let field = |name: &str| format!("providers[{provider_id}].bypass.{name}");
        let mut chain = Self::new().for_provider(provider_id);

        if let Some(name) = &config.principal_attribute_name {
            chain.add(PrincipalAttributeBypass::new(AttributeMatcher::from_config(
                &field("principal_attribute_value"),
                name,
                config.principal_attribute_value.as_deref(),
            )?));
        }
        if let Some(name) = &config.authentication_attribute_name {
            chain.add(AuthenticationAttributeBypass::new(AttributeMatcher::from_config(
                &field("authentication_attribute_value"),
                name,
                config.authentication_attribute_value.as_deref(),
            )?));
        }
        if let Some(pattern) = &config.authentication_method_name {
            chain.add(AuthenticationMethodBypass::new(compile_pattern(
                &field("authentication_method_name"),
                pattern,
            )?));
        }
        if config.http_request_remote_address.is_some() || config.http_request_headers.is_some() {
            let remote_address = config
                .http_request_remote_address
                .as_deref()
                .map(|p| compile_pattern(&field("http_request_remote_address"), p))
                .transpose()?;
            let headers = config
                .http_request_headers
                .as_deref()
                .map(|p| compile_pattern(&field("http_request_headers"), p))
                .transpose()?;
            chain.add(HttpRequestBypass::new(remote_address, headers));
        }
        if config.honor_service_policy {
            chain.add(RegisteredServiceBypass);
            chain.add(RegisteredServicePrincipalAttributeBypass);
        }

        if let Some(secs) = config.remember_ttl_secs {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            chain = chain.with_remember_ttl(Duration::try_seconds(secs).unwrap_or(Duration::MAX));
        }

        Ok(chain)
    }
}

impl Default for ChainingBypassEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl BypassEvaluator for ChainingBypassEvaluator {
    fn name(&self) -> &str {
        "chain"
    }

    fn should_execute(
        &self,
        authentication: &Authentication,
        registered_service: Option<&RegisteredService>,
        provider: &MultifactorProvider,
        request: &RequestContext,
    ) -> Result<bool, ProviderError> {
        if !self.supports(provider) {
            return Ok(true);
        }
        for evaluator in &self.evaluators {
            if !evaluator.should_execute(authentication, registered_service, provider, request)? {
                tracing::debug!(
                    provider = provider.id(),
                    evaluator = evaluator.name(),
                    "Bypass rule matched"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_bypassed(
        &self,
        authentication: &Authentication,
        provider_id: &str,
    ) -> Result<bool, ProviderError> {
        let Some(record) = authentication.bypass_record(provider_id) else {
            return Ok(false);
        };
        match self.remember_ttl {
            Some(ttl) => Ok(Utc::now() - record.recorded_at <= ttl),
            None => Ok(true),
        }
    }
}
