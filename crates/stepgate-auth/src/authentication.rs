//! Authentication evidence and its attribute map
//!
//! An [`Authentication`] is shared by every request of a session. Its
//! identity fields are immutable; the attribute map sits behind a lock so
//! that remembering a bypass from one request never tears a concurrent read
//! from another. Every effective write bumps the map version.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use stepgate_common::AuthenticationId;
use stepgate_common::config::DEFAULT_CONTEXT_ATTRIBUTE;

use crate::service::Service;

/// Attribute listing the providers bypassed for this authentication
pub const BYPASSED_PROVIDERS_ATTRIBUTE: &str = "bypassedMultifactorAuthenticationProviderId";

/// The authenticated subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier (username, subject claim, etc.)
    pub id: String,
    /// Multi-valued attributes released by the identity store
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(key.into(), values);
        self
    }
}

/// A remembered bypass for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BypassRecord {
    /// When a bypass rule last matched
    pub recorded_at: DateTime<Utc>,
    /// Attribute map version at which it was first recorded
    pub version: u64,
}

/// Versioned attribute map with upsert semantics.
///
/// `set` overwrites a key, `add_value` merges a value into a key, and the
/// bypass table is an upsert keyed by provider id. Writes that change
/// nothing leave the version untouched.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    values: HashMap<String, Vec<String>>,
    bypass: HashMap<String, BypassRecord>,
    version: u64,
}

impl AttributeMap {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.values.get(name)
    }

    pub fn values(&self) -> &HashMap<String, Vec<String>> {
        &self.values
    }

    /// Overwrite an attribute. Returns true if the map changed.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) -> bool {
        let name = name.into();
        if self.values.get(&name) == Some(&values) {
            return false;
        }
        self.values.insert(name, values);
        self.version += 1;
        true
    }

    /// Merge a single value into an attribute. Returns true if the map changed.
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        let entry = self.values.entry(name.into()).or_default();
        if entry.contains(&value) {
            return false;
        }
        entry.push(value);
        self.version += 1;
        true
    }

    /// Remove an attribute. Returns true if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        if self.values.remove(name).is_some() {
            self.version += 1;
            true
        } else {
            false
        }
    }

    pub fn bypass(&self, provider_id: &str) -> Option<&BypassRecord> {
        self.bypass.get(provider_id)
    }

    /// Record a bypass for `provider_id`. Idempotent: an existing record
    /// only has its timestamp moved to `now`, which restarts its expiry
    /// window without bumping the version. Returns true if a new record was
    /// inserted.
    pub fn upsert_bypass(&mut self, provider_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(record) = self.bypass.get_mut(provider_id) {
            record.recorded_at = record.recorded_at.max(now);
            return false;
        }
        self.version += 1;
        self.bypass.insert(
            provider_id.to_string(),
            BypassRecord {
                recorded_at: now,
                version: self.version,
            },
        );
        self.values
            .entry(BYPASSED_PROVIDERS_ATTRIBUTE.to_string())
            .or_default()
            .push(provider_id.to_string());
        true
    }

    /// Drop the bypass for `provider_id`. Returns true if one was present.
    pub fn remove_bypass(&mut self, provider_id: &str) -> bool {
        if self.bypass.remove(provider_id).is_none() {
            return false;
        }
        if let Some(ids) = self.values.get_mut(BYPASSED_PROVIDERS_ATTRIBUTE) {
            ids.retain(|id| id != provider_id);
            if ids.is_empty() {
                self.values.remove(BYPASSED_PROVIDERS_ATTRIBUTE);
            }
        }
        self.version += 1;
        true
    }
}

/// Evidence that a principal completed one or more authentication events
#[derive(Debug)]
pub struct Authentication {
    id: AuthenticationId,
    principal: Principal,
    authentication_date: DateTime<Utc>,
    successful_methods: Vec<String>,
    attributes: RwLock<AttributeMap>,
}

impl Authentication {
    /// Create an authentication for `principal`, dated now
    pub fn new(principal: Principal) -> Self {
        Self {
            id: AuthenticationId::new(),
            principal,
            authentication_date: Utc::now(),
            successful_methods: Vec::new(),
            attributes: RwLock::new(AttributeMap::default()),
        }
    }

    /// Set the authentication date
    pub fn with_authentication_date(mut self, date: DateTime<Utc>) -> Self {
        self.authentication_date = date;
        self
    }

    /// Record a successful authentication method/handler name
    pub fn with_successful_method(mut self, method: impl Into<String>) -> Self {
        self.successful_methods.push(method.into());
        self
    }

    /// Add an attribute
    pub fn with_attribute(self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.write().set(key, values);
        self
    }

    /// Mark a provider context as satisfied under the default context attribute
    pub fn with_satisfied_context(self, provider_id: impl Into<String>) -> Self {
        self.attributes
            .write()
            .add_value(DEFAULT_CONTEXT_ATTRIBUTE, provider_id);
        self
    }

    pub fn id(&self) -> AuthenticationId {
        self.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn authentication_date(&self) -> DateTime<Utc> {
        self.authentication_date
    }

    pub fn successful_methods(&self) -> &[String] {
        &self.successful_methods
    }

    /// Current values of one attribute
    pub fn attribute(&self, name: &str) -> Option<Vec<String>> {
        self.attributes.read().get(name).cloned()
    }

    /// Consistent copy of all attributes
    pub fn attributes(&self) -> HashMap<String, Vec<String>> {
        self.attributes.read().values().clone()
    }

    /// Version of the attribute map
    pub fn version(&self) -> u64 {
        self.attributes.read().version()
    }

    /// Overwrite an attribute
    pub fn set_attribute(&self, name: impl Into<String>, values: Vec<String>) -> bool {
        self.attributes.write().set(name, values)
    }

    /// Merge a value into an attribute
    pub fn add_attribute_value(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.attributes.write().add_value(name, value)
    }

    /// Remember a bypass for `provider_id`; see [`AttributeMap::upsert_bypass`]
    pub fn remember_bypass(&self, provider_id: &str) -> bool {
        self.attributes.write().upsert_bypass(provider_id, Utc::now())
    }

    /// Forget a bypass for `provider_id`
    pub fn forget_bypass(&self, provider_id: &str) -> bool {
        self.attributes.write().remove_bypass(provider_id)
    }

    /// The remembered bypass for `provider_id`, if any
    pub fn bypass_record(&self, provider_id: &str) -> Option<BypassRecord> {
        self.attributes.read().bypass(provider_id).copied()
    }
}

impl Clone for Authentication {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            principal: self.principal.clone(),
            authentication_date: self.authentication_date,
            successful_methods: self.successful_methods.clone(),
            attributes: RwLock::new(self.attributes.read().clone()),
        }
    }
}

/// A completed ticket/credential validation handed over by the protocol layer
#[derive(Debug, Clone)]
pub struct Assertion {
    /// The service the validation was performed for
    pub service: Service,
    /// The authentication that established the session
    pub primary_authentication: Option<Arc<Authentication>>,
}

impl Assertion {
    pub fn new(service: Service, primary_authentication: Arc<Authentication>) -> Self {
        Self {
            service,
            primary_authentication: Some(primary_authentication),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_builder() {
        let auth = Authentication::new(
            Principal::new("casuser").with_attribute("memberOf", vec!["staff".to_string()]),
        )
        .with_successful_method("LdapAuthenticationHandler")
        .with_satisfied_context("mfa-duo")
        .with_attribute("clientIp", vec!["10.0.0.1".to_string()]);

        assert_eq!(auth.principal().id, "casuser");
        assert_eq!(auth.successful_methods(), ["LdapAuthenticationHandler"]);
        assert_eq!(
            auth.attribute(DEFAULT_CONTEXT_ATTRIBUTE),
            Some(vec!["mfa-duo".to_string()])
        );
        assert_eq!(auth.version(), 2);
    }

    #[test]
    fn test_set_overwrites_and_versions() {
        let auth = Authentication::new(Principal::new("casuser"));
        assert!(auth.set_attribute("a", vec!["1".to_string()]));
        assert!(!auth.set_attribute("a", vec!["1".to_string()]));
        assert!(auth.set_attribute("a", vec!["2".to_string()]));
        assert_eq!(auth.attribute("a"), Some(vec!["2".to_string()]));
        assert_eq!(auth.version(), 2);
    }

    #[test]
    fn test_add_value_merges() {
        let auth = Authentication::new(Principal::new("casuser"));
        assert!(auth.add_attribute_value("ctx", "mfa-duo"));
        assert!(!auth.add_attribute_value("ctx", "mfa-duo"));
        assert!(auth.add_attribute_value("ctx", "mfa-gauth"));
        assert_eq!(
            auth.attribute("ctx"),
            Some(vec!["mfa-duo".to_string(), "mfa-gauth".to_string()])
        );
    }

    #[test]
    fn test_remember_bypass_is_idempotent() {
        let auth = Authentication::new(Principal::new("casuser"));
        assert!(auth.remember_bypass("mfa-duo"));
        let version = auth.version();
        let record = auth.bypass_record("mfa-duo").unwrap();

        assert!(!auth.remember_bypass("mfa-duo"));
        assert_eq!(auth.version(), version);
        assert_eq!(auth.bypass_record("mfa-duo").unwrap().version, record.version);
        assert_eq!(
            auth.attribute(BYPASSED_PROVIDERS_ATTRIBUTE),
            Some(vec!["mfa-duo".to_string()])
        );
    }

    #[test]
    fn test_repeated_bypass_restarts_window() {
        let first = Utc::now() - chrono::Duration::hours(2);
        let later = first + chrono::Duration::hours(1);
        let mut map = AttributeMap::default();

        assert!(map.upsert_bypass("mfa-duo", first));
        let version = map.version();
        assert!(!map.upsert_bypass("mfa-duo", later));

        let record = map.bypass("mfa-duo").unwrap();
        assert_eq!(record.recorded_at, later);
        assert_eq!(record.version, version);
        assert_eq!(map.version(), version);

        assert!(!map.upsert_bypass("mfa-duo", first));
        assert_eq!(map.bypass("mfa-duo").unwrap().recorded_at, later);
    }

    #[test]
    fn test_forget_bypass() {
        let auth = Authentication::new(Principal::new("casuser"));
        auth.remember_bypass("mfa-duo");
        auth.remember_bypass("mfa-gauth");

        assert!(auth.forget_bypass("mfa-duo"));
        assert!(!auth.forget_bypass("mfa-duo"));
        assert!(auth.bypass_record("mfa-duo").is_none());
        assert_eq!(
            auth.attribute(BYPASSED_PROVIDERS_ATTRIBUTE),
            Some(vec!["mfa-gauth".to_string()])
        );

        auth.forget_bypass("mfa-gauth");
        assert!(auth.attribute(BYPASSED_PROVIDERS_ATTRIBUTE).is_none());
    }

    #[test]
    fn test_concurrent_bypass_writes() {
        let auth = Arc::new(Authentication::new(Principal::new("casuser")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let auth = Arc::clone(&auth);
                std::thread::spawn(move || {
                    auth.remember_bypass("mfa-duo");
                    auth.set_attribute(format!("attr-{i}"), vec![i.to_string()]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(auth.bypass_record("mfa-duo").is_some());
        assert_eq!(
            auth.attribute(BYPASSED_PROVIDERS_ATTRIBUTE),
            Some(vec!["mfa-duo".to_string()])
        );
        // one bypass insert plus eight distinct attributes
        assert_eq!(auth.version(), 9);
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let auth = Authentication::new(Principal::new("casuser"));
        let copy = auth.clone();
        auth.remember_bypass("mfa-duo");
        assert!(copy.bypass_record("mfa-duo").is_none());
        assert_eq!(copy.id(), auth.id());
    }
}
