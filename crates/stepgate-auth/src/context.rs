//! Authentication context validation
//!
//! Decides whether an authentication already carries proof of a provider's
//! context. Validation is total: every input yields success or failure.

use serde::Serialize;
use std::sync::Arc;

use stepgate_common::config::{DEFAULT_CONTEXT_ATTRIBUTE, EngineConfig};

use crate::authentication::Authentication;
use crate::registry::ProviderRegistry;
use crate::service::RegisteredService;

/// Outcome of context validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextValidation {
    pub success: bool,
    /// Provider actually satisfied, on success
    pub matched_provider_id: Option<String>,
}

impl ContextValidation {
    pub fn satisfied(provider_id: impl Into<String>) -> Self {
        Self {
            success: true,
            matched_provider_id: Some(provider_id.into()),
        }
    }

    pub fn unsatisfied() -> Self {
        Self {
            success: false,
            matched_provider_id: None,
        }
    }
}

/// Strict check of satisfied-context markers
pub trait AuthenticationContextValidator: Send + Sync {
    fn validate(
        &self,
        authentication: &Authentication,
        provider_id: &str,
        registered_service: Option<&RegisteredService>,
    ) -> ContextValidation;
}

/// Matches markers by id, alias and optionally by rank
pub struct DefaultAuthenticationContextValidator {
    registry: Arc<dyn ProviderRegistry>,
    context_attribute: String,
    trusted_attribute: Option<String>,
    allow_ranked_satisfaction: bool,
}

impl DefaultAuthenticationContextValidator {
    pub fn new(registry: Arc<dyn ProviderRegistry>) -> Self {
        Self {
            registry,
            context_attribute: DEFAULT_CONTEXT_ATTRIBUTE.to_string(),
            trusted_attribute: None,
            allow_ranked_satisfaction: true,
        }
    }

    pub fn from_config(registry: Arc<dyn ProviderRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            context_attribute: config.authentication_context_attribute.clone(),
            trusted_attribute: config.trusted_authentication_attribute.clone(),
            allow_ranked_satisfaction: config.allow_ranked_satisfaction,
        }
    }

    /// Attribute listing satisfied contexts
    pub fn with_context_attribute(mut self, name: impl Into<String>) -> Self {
        self.context_attribute = name.into();
        self
    }

    /// Attribute whose `true` value marks a trusted device
    pub fn with_trusted_attribute(mut self, name: impl Into<String>) -> Self {
        self.trusted_attribute = Some(name.into());
        self
    }

    pub fn with_ranked_satisfaction(mut self, enabled: bool) -> Self {
        self.allow_ranked_satisfaction = enabled;
        self
    }

    fn is_trusted(&self, authentication: &Authentication) -> bool {
        self.trusted_attribute
            .as_deref()
            .and_then(|name| authentication.attribute(name))
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
    }
}

impl AuthenticationContextValidator for DefaultAuthenticationContextValidator {
    fn validate(
        &self,
        authentication: &Authentication,
        provider_id: &str,
        _registered_service: Option<&RegisteredService>,
    ) -> ContextValidation {
        let markers = authentication
            .attribute(&self.context_attribute)
            .unwrap_or_default();
        let trusted = self.is_trusted(authentication);

        if markers.is_empty() && !trusted {
            tracing::debug!(provider = provider_id, "No satisfied contexts on authentication");
            return ContextValidation::unsatisfied();
        }

        let provider = self.registry.get_provider_by_id(provider_id);
        let canonical = provider.as_ref().map_or(provider_id, |p| p.id());

        if trusted {
            tracing::debug!(provider = canonical, "Authentication is trusted");
            return ContextValidation::satisfied(canonical);
        }

        let direct = markers.iter().any(|m| {
            m == provider_id || provider.as_ref().is_some_and(|p| p.matches(m))
        });
        if direct {
            return ContextValidation::satisfied(canonical);
        }

        if self.allow_ranked_satisfaction
            && let Some(requested) = &provider
        {
            let ranked = markers
                .iter()
                .filter_map(|m| self.registry.get_provider_by_id(m))
                .filter(|p| p.order() >= requested.order())
                .max_by(|a, b| a.order().cmp(&b.order()).then_with(|| b.id().cmp(a.id())));
            if let Some(satisfied) = ranked {
                tracing::debug!(
                    requested = requested.id(),
                    satisfied = satisfied.id(),
                    "Requested context satisfied by higher-ranked provider"
                );
                return ContextValidation::satisfied(satisfied.id());
            }
        }

        ContextValidation::unsatisfied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::Principal;
    use crate::provider::MultifactorProvider;
    use crate::registry::DefaultProviderRegistry;

    fn validator() -> DefaultAuthenticationContextValidator {
        DefaultAuthenticationContextValidator::new(Arc::new(
            DefaultProviderRegistry::with_providers(vec![
                MultifactorProvider::new("mfa-duo").with_order(10).with_alias("duo"),
                MultifactorProvider::new("mfa-gauth").with_order(1),
            ]),
        ))
    }

    fn auth() -> Authentication {
        Authentication::new(Principal::new("casuser"))
    }

    #[test]
    fn test_no_markers_fails() {
        let result = validator().validate(&auth(), "mfa-duo", None);
        assert_eq!(result, ContextValidation::unsatisfied());
    }

    #[test]
    fn test_exact_match() {
        let auth = auth().with_satisfied_context("mfa-duo");
        assert_eq!(
            validator().validate(&auth, "mfa-duo", None),
            ContextValidation::satisfied("mfa-duo")
        );
    }

    #[test]
    fn test_alias_match_reports_canonical_id() {
        let auth = auth().with_satisfied_context("duo");
        assert_eq!(
            validator().validate(&auth, "mfa-duo", None),
            ContextValidation::satisfied("mfa-duo")
        );

        let auth = self::auth().with_satisfied_context("mfa-duo");
        assert_eq!(
            validator().validate(&auth, "duo", None),
            ContextValidation::satisfied("mfa-duo")
        );
    }

    #[test]
    fn test_unregistered_provider_raw_match() {
        let auth = auth().with_satisfied_context("mfa-custom");
        assert_eq!(
            validator().validate(&auth, "mfa-custom", None),
            ContextValidation::satisfied("mfa-custom")
        );
        assert!(!validator().validate(&auth, "mfa-other", None).success);
    }

    #[test]
    fn test_ranked_satisfaction() {
        let auth = auth().with_satisfied_context("mfa-duo");
        assert_eq!(
            validator().validate(&auth, "mfa-gauth", None),
            ContextValidation::satisfied("mfa-duo")
        );

        let lower = self::auth().with_satisfied_context("mfa-gauth");
        assert!(!validator().validate(&lower, "mfa-duo", None).success);

        let strict = validator().with_ranked_satisfaction(false);
        assert!(!strict.validate(&auth, "mfa-gauth", None).success);
    }

    #[test]
    fn test_trusted_authentication() {
        let validator = validator().with_trusted_attribute("mfaTrustedAuthentication");
        let auth = auth().with_attribute("mfaTrustedAuthentication", vec!["TRUE".to_string()]);
        assert_eq!(
            validator.validate(&auth, "duo", None),
            ContextValidation::satisfied("mfa-duo")
        );

        let untrusted =
            self::auth().with_attribute("mfaTrustedAuthentication", vec!["false".to_string()]);
        assert!(!validator.validate(&untrusted, "mfa-duo", None).success);
    }

    #[test]
    fn test_custom_context_attribute() {
        let validator = validator().with_context_attribute("amr");
        let auth = auth().with_attribute("amr", vec!["mfa-duo".to_string()]);
        assert!(validator.validate(&auth, "mfa-duo", None).success);
        assert!(!self::validator().validate(&auth, "mfa-duo", None).success);
    }
}
