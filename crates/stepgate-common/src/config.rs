//! Configuration types for Stepgate
//!
//! This module defines the configuration loaded at startup: engine-wide
//! settings, the multifactor providers and the registered services.
//! Strategies are selected from this model once, at load time.

use crate::error::{Error, Result};
use crate::types::FailureMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Prefix for environment overrides, e.g. `STEPGATE__ENGINE__GLOBAL_FAILURE_MODE`
pub const ENV_PREFIX: &str = "STEPGATE";

/// Default authentication attribute carrying satisfied contexts
pub const DEFAULT_CONTEXT_ATTRIBUTE: &str = "authnContextClass";

/// Default request parameter naming a requested provider
pub const DEFAULT_REQUEST_PARAMETER: &str = "authn_method";

/// Root configuration for Stepgate
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide settings
    pub engine: EngineConfig,
    /// Multifactor providers
    pub providers: Vec<ProviderConfig>,
    /// Registered services
    pub services: Vec<ServiceConfig>,
}

impl Config {
    /// Load configuration from a TOML file with environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.display().to_string()));
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(Error::EmptyProviderId);
            }
            for id in std::iter::once(&provider.id).chain(provider.aliases.iter()) {
                if !ids.insert(id.as_str()) {
                    return Err(Error::DuplicateProvider(id.clone()));
                }
            }
            if let Some(bypass) = &provider.bypass {
                bypass.validate(&provider.id)?;
            }
        }

        let mut service_ids = HashSet::new();
        for service in &self.services {
            if !service_ids.insert(service.id) {
                return Err(Error::DuplicateService(service.id));
            }
            compile_service_pattern(
                &format!("services[{}].service_id", service.id),
                &service.service_id,
            )?;
            if let Some(policy) = &service.multifactor_policy {
                policy.validate(service.id)?;
            }
        }

        self.engine.triggers.validate()
    }
}

/// Engine-wide settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Failure mode used when neither provider nor service define one
    pub global_failure_mode: FailureMode,
    /// Authentication attribute listing satisfied contexts
    pub authentication_context_attribute: String,
    /// Authentication attribute marking a trusted (remembered) device
    pub trusted_authentication_attribute: Option<String>,
    /// Accept a satisfied provider of equal or higher rank than the requested one
    pub allow_ranked_satisfaction: bool,
    /// Trigger selection settings
    pub triggers: TriggerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_failure_mode: FailureMode::Closed,
            authentication_context_attribute: DEFAULT_CONTEXT_ATTRIBUTE.to_string(),
            trusted_authentication_attribute: None,
            allow_ranked_satisfaction: true,
            triggers: TriggerConfig::default(),
        }
    }
}

/// Trigger selection settings, evaluated in the order of the fields
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Provider required for every request
    pub global_provider_id: Option<String>,
    /// Request parameter (or header) naming the provider
    pub request_parameter: Option<String>,
    /// Honor the multifactor policy of registered services
    pub registered_service: bool,
    /// Select a provider from principal attributes
    pub principal_attribute: Option<AttributeTriggerConfig>,
    /// Select a provider from authentication attributes
    pub authentication_attribute: Option<AttributeTriggerConfig>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            global_provider_id: None,
            request_parameter: Some(DEFAULT_REQUEST_PARAMETER.to_string()),
            registered_service: true,
            principal_attribute: None,
            authentication_attribute: None,
        }
    }
}

impl TriggerConfig {
    fn validate(&self) -> Result<()> {
        if let Some(trigger) = &self.principal_attribute {
            trigger.validate("engine.triggers.principal_attribute")?;
        }
        if let Some(trigger) = &self.authentication_attribute {
            trigger.validate("engine.triggers.authentication_attribute")?;
        }
        Ok(())
    }
}

/// Attribute-driven trigger settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeTriggerConfig {
    /// Regex matched against attribute names
    pub name_pattern: String,
    /// Regex matched against attribute values
    pub value_pattern: String,
    /// Fixed provider to require; when absent the matching value names the provider
    #[serde(default)]
    pub provider_id: Option<String>,
}

impl AttributeTriggerConfig {
    fn validate(&self, field: &str) -> Result<()> {
        compile_pattern(&format!("{field}.name_pattern"), &self.name_pattern)?;
        compile_pattern(&format!("{field}.value_pattern"), &self.value_pattern)?;
        Ok(())
    }
}

/// A multifactor provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier, e.g. "mfa-duo"
    pub id: String,
    /// Rank; higher ranks satisfy lower requirements
    #[serde(default)]
    pub order: i32,
    /// Alternative identifiers accepted for this provider
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Provider-level failure mode
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Initial availability
    #[serde(default = "default_true")]
    pub available: bool,
    /// Bypass rules; absent means bypass is never applicable
    #[serde(default)]
    pub bypass: Option<BypassConfig>,
}

impl ProviderConfig {
    /// Create a provider config with defaults
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order: 0,
            aliases: Vec::new(),
            failure_mode: FailureMode::Undefined,
            available: true,
            bypass: None,
        }
    }
}

/// Bypass rules for a provider. Each configured criterion becomes one
/// member of the provider's bypass chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassConfig {
    /// Bypass when the principal has this attribute
    pub principal_attribute_name: Option<String>,
    /// ... with a value matching this regex
    pub principal_attribute_value: Option<String>,
    /// Bypass when the authentication has this attribute
    pub authentication_attribute_name: Option<String>,
    /// ... with a value matching this regex
    pub authentication_attribute_value: Option<String>,
    /// Bypass when a successful authentication method matches this regex
    pub authentication_method_name: Option<String>,
    /// Bypass when the client address matches this regex
    pub http_request_remote_address: Option<String>,
    /// Bypass when any request header value matches this regex
    pub http_request_headers: Option<String>,
    /// Honor bypass flags on registered service policies
    pub honor_service_policy: bool,
    /// Lifetime of a remembered bypass in seconds; absent means the session.
    /// The window restarts whenever a bypass rule matches again.
    pub remember_ttl_secs: Option<u64>,
}

impl BypassConfig {
    fn validate(&self, provider_id: &str) -> Result<()> {
        let patterns = [
            ("principal_attribute_value", &self.principal_attribute_value),
            ("authentication_attribute_value", &self.authentication_attribute_value),
            ("authentication_method_name", &self.authentication_method_name),
            ("http_request_remote_address", &self.http_request_remote_address),
            ("http_request_headers", &self.http_request_headers),
        ];
        for (name, pattern) in patterns {
            if let Some(pattern) = pattern {
                compile_pattern(&format!("providers[{provider_id}].bypass.{name}"), pattern)?;
            }
        }
        Ok(())
    }
}

/// A registered service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Numeric identifier
    pub id: u64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Regex matched against the whole service URL
    pub service_id: String,
    /// Lower values are matched first
    #[serde(default)]
    pub evaluation_order: i32,
    /// Multifactor policy
    #[serde(default)]
    pub multifactor_policy: Option<MultifactorPolicyConfig>,
}

/// Multifactor policy attached to a registered service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultifactorPolicyConfig {
    /// Providers required by the service
    pub providers: Vec<String>,
    /// Service-level failure mode
    pub failure_mode: FailureMode,
    /// Skip multifactor authentication for this service
    pub bypass_enabled: bool,
    /// Require the providers only for principals with this attribute
    pub principal_attribute_name_trigger: Option<String>,
    /// ... whose value matches this regex
    pub principal_attribute_value_to_match: Option<String>,
    /// Bypass for principals with this attribute
    pub bypass_principal_attribute_name: Option<String>,
    /// ... whose value matches this regex
    pub bypass_principal_attribute_value: Option<String>,
}

impl MultifactorPolicyConfig {
    fn validate(&self, service_id: u64) -> Result<()> {
        let field = format!("services[{service_id}].multifactor_policy");
        if let Some(pattern) = &self.principal_attribute_value_to_match {
            compile_pattern(&format!("{field}.principal_attribute_value_to_match"), pattern)?;
        }
        if let Some(pattern) = &self.bypass_principal_attribute_value {
            compile_pattern(&format!("{field}.bypass_principal_attribute_value"), pattern)?;
        }
        Ok(())
    }
}

/// Compile a configured regex, naming the field on failure
pub fn compile_pattern(field: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid_pattern(field, e))
}

/// Compile a service URL pattern so that it only matches whole URLs
pub fn compile_service_pattern(field: &str, pattern: &str) -> Result<Regex> {
    // the pattern must stand on its own so it cannot escape the group
    compile_pattern(field, pattern)?;
    compile_pattern(field, &format!("^(?:{pattern})$"))
}

const fn default_true() -> bool {
    true
}
