//! Multifactor provider descriptors
//!
//! A descriptor owns its policies: the availability check, the optional
//! bypass evaluator and the failure-mode evaluator. Concrete strategies are
//! chosen when configuration is loaded and never inspected at runtime.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stepgate_common::FailureMode;

use crate::bypass::BypassEvaluator;
use crate::error::ProviderError;
use crate::failure_mode::{DefaultFailureModeEvaluator, FailureModeEvaluator};
use crate::service::RegisteredService;

/// Health check for a provider's backing service
pub trait AvailabilityCheck: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str {
        "availability"
    }

    /// Probe the provider. May perform I/O; errors mean "unavailable".
    fn ping(&self, provider_id: &str) -> Result<bool, ProviderError>;
}

/// Availability check that always succeeds
pub struct AlwaysAvailable;

impl AvailabilityCheck for AlwaysAvailable {
    fn name(&self) -> &str {
        "always"
    }

    fn ping(&self, _provider_id: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Availability flag flipped by an external health monitor
pub struct ToggleAvailability {
    available: AtomicBool,
}

impl ToggleAvailability {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

impl AvailabilityCheck for ToggleAvailability {
    fn name(&self) -> &str {
        "toggle"
    }

    fn ping(&self, _provider_id: &str) -> Result<bool, ProviderError> {
        Ok(self.is_set())
    }
}

/// One multifactor provider and its policies
#[derive(Clone)]
pub struct MultifactorProvider {
    id: String,
    order: i32,
    aliases: Vec<String>,
    failure_mode: FailureMode,
    availability: Arc<dyn AvailabilityCheck>,
    bypass_evaluator: Option<Arc<dyn BypassEvaluator>>,
    failure_mode_evaluator: Arc<dyn FailureModeEvaluator>,
}

impl MultifactorProvider {
    /// Create a provider that is always available, never bypassed, and
    /// fails closed unless configured otherwise
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order: 0,
            aliases: Vec::new(),
            failure_mode: FailureMode::Undefined,
            availability: Arc::new(AlwaysAvailable),
            bypass_evaluator: None,
            failure_mode_evaluator: Arc::new(DefaultFailureModeEvaluator::default()),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Provider-level failure mode, consulted by the failure-mode evaluator
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_availability(mut self, availability: Arc<dyn AvailabilityCheck>) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_bypass_evaluator(mut self, evaluator: Arc<dyn BypassEvaluator>) -> Self {
        self.bypass_evaluator = Some(evaluator);
        self
    }

    pub fn with_failure_mode_evaluator(mut self, evaluator: Arc<dyn FailureModeEvaluator>) -> Self {
        self.failure_mode_evaluator = evaluator;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// The bypass evaluator; `None` means bypass is never applicable
    pub fn bypass_evaluator(&self) -> Option<&Arc<dyn BypassEvaluator>> {
        self.bypass_evaluator.as_ref()
    }

    /// True when `identifier` names this provider or one of its aliases
    pub fn matches(&self, identifier: &str) -> bool {
        self.id == identifier || self.aliases.iter().any(|a| a == identifier)
    }

    /// Resolve the effective failure mode for `service`
    pub fn evaluate_failure_mode(
        &self,
        service: Option<&RegisteredService>,
    ) -> Result<FailureMode, ProviderError> {
        self.failure_mode_evaluator.evaluate(service, self)
    }

    /// Check whether the provider can be used for `service`.
    ///
    /// A provider whose effective failure mode is `NONE` is never pinged.
    pub fn is_available(&self, service: Option<&RegisteredService>) -> Result<bool, ProviderError> {
        if self.evaluate_failure_mode(service)? == FailureMode::None {
            return Ok(true);
        }
        self.availability.ping(&self.id)
    }
}

impl fmt::Debug for MultifactorProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultifactorProvider")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("aliases", &self.aliases)
            .field("failure_mode", &self.failure_mode)
            .field("availability", &self.availability.name())
            .field(
                "bypass_evaluator",
                &self.bypass_evaluator.as_ref().map(|b| b.name().to_string()),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure_mode::StaticFailureModeEvaluator;

    struct BrokenCheck;

    impl AvailabilityCheck for BrokenCheck {
        fn ping(&self, provider_id: &str) -> Result<bool, ProviderError> {
            Err(ProviderError::Unavailable(provider_id.to_string()))
        }
    }

    #[test]
    fn test_provider_defaults() {
        let provider = MultifactorProvider::new("mfa-duo");
        assert_eq!(provider.id(), "mfa-duo");
        assert_eq!(provider.order(), 0);
        assert!(provider.bypass_evaluator().is_none());
        assert!(provider.is_available(None).unwrap());
        assert_eq!(provider.evaluate_failure_mode(None).unwrap(), FailureMode::Closed);
    }

    #[test]
    fn test_matches_aliases() {
        let provider = MultifactorProvider::new("mfa-duo").with_alias("duo");
        assert!(provider.matches("mfa-duo"));
        assert!(provider.matches("duo"));
        assert!(!provider.matches("mfa-gauth"));
    }

    #[test]
    fn test_toggle_availability() {
        let toggle = Arc::new(ToggleAvailability::new(true));
        let provider = MultifactorProvider::new("mfa-duo").with_availability(toggle.clone());
        assert!(provider.is_available(None).unwrap());

        toggle.set_available(false);
        assert!(!provider.is_available(None).unwrap());
    }

    #[test]
    fn test_failure_mode_none_skips_ping() {
        let provider = MultifactorProvider::new("mfa-duo")
            .with_availability(Arc::new(BrokenCheck))
            .with_failure_mode_evaluator(Arc::new(StaticFailureModeEvaluator::new(
                FailureMode::None,
            )));
        assert!(provider.is_available(None).unwrap());
    }

    #[test]
    fn test_ping_error_propagates() {
        let provider = MultifactorProvider::new("mfa-duo").with_availability(Arc::new(BrokenCheck));
        assert!(provider.is_available(None).is_err());
    }
}
