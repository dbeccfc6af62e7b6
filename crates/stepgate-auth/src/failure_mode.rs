//! Failure-mode evaluation for unavailable providers

use stepgate_common::FailureMode;

use crate::error::ProviderError;
use crate::provider::MultifactorProvider;
use crate::service::RegisteredService;

/// Decides how to treat an unavailable provider.
///
/// Implementations must be pure functions of configuration.
pub trait FailureModeEvaluator: Send + Sync {
    fn evaluate(
        &self,
        service: Option<&RegisteredService>,
        provider: &MultifactorProvider,
    ) -> Result<FailureMode, ProviderError>;
}

/// Resolves the mode from the most specific defined level:
/// service policy, then provider, then the global default.
#[derive(Debug, Clone, Copy)]
pub struct DefaultFailureModeEvaluator {
    global: FailureMode,
}

impl DefaultFailureModeEvaluator {
    pub const fn new(global: FailureMode) -> Self {
        Self { global }
    }
}

impl Default for DefaultFailureModeEvaluator {
    fn default() -> Self {
        Self::new(FailureMode::Closed)
    }
}

impl FailureModeEvaluator for DefaultFailureModeEvaluator {
    fn evaluate(
        &self,
        service: Option<&RegisteredService>,
        provider: &MultifactorProvider,
    ) -> Result<FailureMode, ProviderError> {
        let mut mode = self.global;

        if !provider.failure_mode().is_undefined() {
            mode = provider.failure_mode();
        }

        if let Some(policy) = service.and_then(|s| s.multifactor_policy.as_ref())
            && !policy.failure_mode.is_undefined()
        {
            mode = policy.failure_mode;
        }

        Ok(mode)
    }
}

/// Always yields the same mode
#[derive(Debug, Clone, Copy)]
pub struct StaticFailureModeEvaluator {
    mode: FailureMode,
}

impl StaticFailureModeEvaluator {
    pub const fn new(mode: FailureMode) -> Self {
        Self { mode }
    }
}

impl FailureModeEvaluator for StaticFailureModeEvaluator {
    fn evaluate(
        &self,
        _service: Option<&RegisteredService>,
        _provider: &MultifactorProvider,
    ) -> Result<FailureMode, ProviderError> {
        Ok(self.mode)
    }
}
