//! Stepgate step-up authentication context validation
//!
//! This crate decides, for a principal who already completed primary
//! authentication, whether a service requires a multifactor provider and
//! whether that requirement is met, bypassed or excused:
//! - Trigger selection (global, request parameter, service policy, attributes)
//! - Provider registry with alias lookup and atomic reload
//! - Per-provider bypass and failure-mode policies
//! - Strict validation of satisfied-context markers
//!
//! # Example
//!
//! ```rust,ignore
//! use stepgate_auth::{Engine, RequestContext, Assertion, Service};
//! use stepgate_common::Config;
//!
//! let engine = Engine::from_config(&Config::load("stepgate.toml")?)?;
//! let result = engine.validate_assertion(&assertion, &RequestContext::new())?;
//! if !result.is_success() {
//!     // challenge the user for a second factor
//! }
//! ```

// Data model
pub mod authentication;
pub mod error;
pub mod matcher;
pub mod request;
pub mod service;

// Policies
pub mod bypass;
pub mod failure_mode;
pub mod provider;
pub mod registry;
pub mod trigger;

// Decision
pub mod context;
pub mod engine;
pub mod metrics;
pub mod validator;

pub use authentication::{
    Assertion, AttributeMap, Authentication, BYPASSED_PROVIDERS_ATTRIBUTE, BypassRecord, Principal,
};
pub use bypass::{
    AuthenticationAttributeBypass, AuthenticationMethodBypass, BypassEvaluator,
    ChainingBypassEvaluator, HttpRequestBypass, NeverBypass, PrincipalAttributeBypass,
    RegisteredServiceBypass, RegisteredServicePrincipalAttributeBypass,
};
pub use context::{
    AuthenticationContextValidator, ContextValidation, DefaultAuthenticationContextValidator,
};
pub use engine::Engine;
pub use error::{ContextValidationError, ProviderError};
pub use failure_mode::{
    DefaultFailureModeEvaluator, FailureModeEvaluator, StaticFailureModeEvaluator,
};
pub use matcher::{AttributeMatcher, PatternMatcher};
pub use metrics::{Decision, EngineMetrics};
pub use provider::{AlwaysAvailable, AvailabilityCheck, MultifactorProvider, ToggleAvailability};
pub use registry::{DefaultProviderRegistry, ProviderRegistry};
pub use request::RequestContext;
pub use service::{
    InMemoryServicesManager, MultifactorPolicy, RegisteredService, Service, ServicesManager,
};
pub use trigger::{
    AuthenticationAttributeTrigger, ChainingTriggerSelectionStrategy, GlobalTrigger,
    PrincipalAttributeTrigger, RegisteredServiceTrigger, RequestParameterTrigger,
    TriggerSelectionStrategy,
};
pub use validator::{AuthenticationContextValidationResult, RequestedContextValidator};

pub use stepgate_common::FailureMode;
