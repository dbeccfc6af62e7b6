//! Requested authentication context validation
//!
//! Composes trigger selection, provider lookup, availability, bypass and
//! failure-mode handling, and the strict context validator into one
//! decision. The steps run in a fixed order:
//!
//! 1. resolve the required provider; none means success
//! 2. look the provider up; a missing entry skips to step 4 with the raw id
//! 3. if available, apply bypass rules; if unavailable, apply the failure
//!    mode, where only `CLOSED` continues to step 4
//! 4. run the context validator and report its outcome
//!
//! Bypass and failure-mode outcomes never carry a provider id. Errors from
//! provider-supplied checks mark the provider unavailable.

use serde::Serialize;
use std::sync::Arc;

use stepgate_common::FailureMode;

use crate::authentication::{Assertion, Authentication};
use crate::context::AuthenticationContextValidator;
use crate::error::ContextValidationError;
use crate::metrics::{Decision, EngineMetrics};
use crate::provider::MultifactorProvider;
use crate::registry::ProviderRegistry;
use crate::request::RequestContext;
use crate::service::{RegisteredService, Service, ServicesManager};
use crate::trigger::TriggerSelectionStrategy;

/// Final decision of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationContextValidationResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_id: Option<String>,
}

impl AuthenticationContextValidationResult {
    /// Success without a matched provider
    pub fn success() -> Self {
        Self {
            success: true,
            provider_id: None,
        }
    }

    /// Success because `provider_id` was satisfied
    pub fn satisfied(provider_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_id: Some(provider_id.into()),
        }
    }

    pub fn denied() -> Self {
        Self {
            success: false,
            provider_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }
}

/// Outcome of the availability and bypass checks for a registered provider
enum ProviderCheck {
    Bypassed,
    RememberedBypass,
    Unavailable,
    Proceed,
}

/// The orchestrator
pub struct RequestedContextValidator {
    services_manager: Arc<dyn ServicesManager>,
    trigger: Arc<dyn TriggerSelectionStrategy>,
    context_validator: Arc<dyn AuthenticationContextValidator>,
    registry: Arc<dyn ProviderRegistry>,
    metrics: Arc<EngineMetrics>,
}

impl RequestedContextValidator {
    pub fn new(
        services_manager: Arc<dyn ServicesManager>,
        trigger: Arc<dyn TriggerSelectionStrategy>,
        context_validator: Arc<dyn AuthenticationContextValidator>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self {
            services_manager,
            trigger,
            context_validator,
            registry,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Share a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Validate the context of a completed assertion.
    ///
    /// The registered service is looked up from the assertion's service;
    /// a missing primary authentication is the only error.
    pub fn validate_assertion(
        &self,
        assertion: &Assertion,
        request: &RequestContext,
    ) -> Result<AuthenticationContextValidationResult, ContextValidationError> {
        let authentication = assertion.primary_authentication.as_deref().ok_or_else(|| {
            ContextValidationError::MissingAuthentication(assertion.service.id.clone())
        })?;
        let registered_service = self.services_manager.find_service_by(&assertion.service);

        Ok(self.validate_authentication_context(
            request,
            registered_service.as_deref(),
            authentication,
            &assertion.service,
        ))
    }

    /// Decide whether `authentication` meets the context required for `service`
    pub fn validate_authentication_context(
        &self,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
        service: &Service,
    ) -> AuthenticationContextValidationResult {
        let Some(requested) =
            self.trigger
                .resolve(request, registered_service, authentication, service)
        else {
            tracing::debug!(service = %service, "No multifactor context requested");
            return self.finish(
                Decision::NotRequired,
                AuthenticationContextValidationResult::success(),
            );
        };

        match self.registry.get_provider_by_id(&requested) {
            Some(provider) => {
                match self.check_provider(&provider, request, registered_service, authentication) {
                    ProviderCheck::Bypassed => {
                        tracing::info!(
                            provider = provider.id(),
                            principal = %authentication.principal().id,
                            "Provider bypassed"
                        );
                        return self.finish(
                            Decision::Bypassed,
                            AuthenticationContextValidationResult::success(),
                        );
                    }
                    ProviderCheck::RememberedBypass => {
                        tracing::debug!(provider = provider.id(), "Honoring remembered bypass");
                        return self.finish(
                            Decision::RememberedBypass,
                            AuthenticationContextValidationResult::success(),
                        );
                    }
                    ProviderCheck::Unavailable => {
                        let mode = self.failure_mode(&provider, registered_service);
                        if !mode.is_strict() {
                            tracing::warn!(
                                provider = provider.id(),
                                failure_mode = %mode,
                                "Provider unavailable; failure mode allows access"
                            );
                            return self.finish(
                                Decision::FailureModeExcused,
                                AuthenticationContextValidationResult::success(),
                            );
                        }
                        tracing::warn!(
                            provider = provider.id(),
                            "Provider unavailable; failure mode is CLOSED"
                        );
                    }
                    ProviderCheck::Proceed => {}
                }
            }
            None => {
                tracing::warn!(provider = %requested, "Requested provider is not registered");
                self.metrics.record_unknown_provider();
            }
        }

        let validation = self
            .context_validator
            .validate(authentication, &requested, registered_service);
        if !validation.success {
            tracing::debug!(
                requested = %requested,
                principal = %authentication.principal().id,
                "Context not satisfied"
            );
            return self.finish(Decision::Denied, AuthenticationContextValidationResult::denied());
        }

        let result = match validation.matched_provider_id {
            Some(matched) => {
                tracing::debug!(requested = %requested, matched = %matched, "Context satisfied");
                AuthenticationContextValidationResult::satisfied(matched)
            }
            None => AuthenticationContextValidationResult::success(),
        };
        self.finish(Decision::Satisfied, result)
    }

    fn check_provider(
        &self,
        provider: &MultifactorProvider,
        request: &RequestContext,
        registered_service: Option<&RegisteredService>,
        authentication: &Authentication,
    ) -> ProviderCheck {
        match provider.is_available(registered_service) {
            Ok(true) => {}
            Ok(false) => return ProviderCheck::Unavailable,
            Err(e) => {
                tracing::warn!(provider = provider.id(), error = %e, "Availability check failed");
                self.metrics.record_provider_error();
                return ProviderCheck::Unavailable;
            }
        }

        let Some(bypass) = provider.bypass_evaluator() else {
            return ProviderCheck::Proceed;
        };

        let result = bypass
            .should_execute(authentication, registered_service, provider, request)
            .and_then(|execute| {
                if !execute {
                    return Ok(ProviderCheck::Bypassed);
                }
                if bypass.is_bypassed(authentication, provider.id())? {
                    return Ok(ProviderCheck::RememberedBypass);
                }
                Ok(ProviderCheck::Proceed)
            });

        match result {
            Ok(ProviderCheck::Bypassed) => {
                bypass.remember_bypass(authentication, provider);
                ProviderCheck::Bypassed
            }
            // the record stands as is; re-recording would extend its window
            Ok(check) => check,
            Err(e) => {
                tracing::warn!(
                    provider = provider.id(),
                    evaluator = bypass.name(),
                    error = %e,
                    "Bypass evaluation failed"
                );
                self.metrics.record_provider_error();
                ProviderCheck::Unavailable
            }
        }
    }

    fn failure_mode(
        &self,
        provider: &MultifactorProvider,
        registered_service: Option<&RegisteredService>,
    ) -> FailureMode {
        provider
            .evaluate_failure_mode(registered_service)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    provider = provider.id(),
                    error = %e,
                    "Failure-mode evaluation failed; treating as CLOSED"
                );
                self.metrics.record_provider_error();
                FailureMode::Closed
            })
    }

    fn finish(
        &self,
        decision: Decision,
        result: AuthenticationContextValidationResult,
    ) -> AuthenticationContextValidationResult {
        self.metrics.record_decision(decision);
        result
    }
}
