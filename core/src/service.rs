//! Target services and the registry of services allowed to use the broker.
//!
//! A [`Service`] is the identifier a client application presents (usually a
//! URL). A [`RegisteredService`] is the broker-side policy entry that decides
//! whether that service may receive tickets, participate in single sign-on,
//! or request proxy-granting tickets, and which principal attributes it may
//! see. The [`ServicesManager`] trait is the lookup seam the ticket engine
//! depends on.

use crate::authentication::{Attributes, Principal};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors raised while building service registry entries.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service pattern is not a valid regular expression.
    #[error("Invalid service pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },
}

/// A service identifier presented by a client application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(String);

impl Service {
    /// Create a service from its identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier as presented.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Whether `other` designates the same service.
    ///
    /// URLs are compared after normalization (scheme and host case, default
    /// ports, empty paths, fragments). Identifiers that do not parse as URLs
    /// must match exactly.
    ///
    /// # Examples
    ///
    /// ```
    /// use sso_broker_core::service::Service;
    ///
    /// let granted = Service::new("https://app.example");
    /// assert!(granted.matches(&Service::new("HTTPS://App.Example:443/")));
    /// assert!(!granted.matches(&Service::new("https://other.example")));
    /// ```
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> Cow<'_, str> {
        match Url::parse(&self.0) {
            Ok(mut url) => {
                url.set_fragment(None);
                Cow::Owned(url.into())
            }
            Err(_) => Cow::Borrowed(&self.0),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Service {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Service {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which principal attributes a registered service may receive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "attributes", rename_all = "snake_case")]
pub enum AttributeReleasePolicy {
    /// Release every attribute.
    ReturnAll,
    /// Release only the named attributes.
    ReturnAllowed(BTreeSet<String>),
    /// Release nothing.
    #[default]
    DenyAll,
}

impl AttributeReleasePolicy {
    /// Filter `attributes` according to this policy.
    #[must_use]
    pub fn release(&self, attributes: &Attributes) -> Attributes {
        match self {
            Self::ReturnAll => attributes.clone(),
            Self::ReturnAllowed(allowed) => attributes
                .iter()
                .filter(|(name, _)| allowed.contains(*name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            Self::DenyAll => Attributes::new(),
        }
    }
}

/// Broker-side policy entry for a family of services.
#[derive(Debug, Clone)]
pub struct RegisteredService {
    /// Numeric id; lower ids are evaluated first.
    pub id: u64,
    /// Human readable name.
    pub name: String,
    service_pattern: Regex,
    /// Whether the service may receive tickets at all.
    pub enabled: bool,
    /// Whether the service may reuse an existing single sign-on session.
    pub sso_enabled: bool,
    /// Whether the service may request proxy-granting tickets.
    pub allowed_to_proxy: bool,
    /// Attribute release policy applied to assertions.
    pub attribute_release: AttributeReleasePolicy,
    /// Principal attribute used as the released username, if any.
    pub username_attribute: Option<String>,
}

impl RegisteredService {
    /// Create an enabled, SSO-participating entry matching `pattern`.
    ///
    /// Proxying is off and no attributes are released until configured.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn new(id: u64, name: impl Into<String>, pattern: &str) -> Result<Self, ServiceError> {
        let service_pattern = Regex::new(pattern).map_err(|source| ServiceError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            id,
            name: name.into(),
            service_pattern,
            enabled: true,
            sso_enabled: true,
            allowed_to_proxy: false,
            attribute_release: AttributeReleasePolicy::default(),
            username_attribute: None,
        })
    }

    /// Enable or disable the entry.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Allow or forbid single sign-on participation.
    #[must_use]
    pub const fn with_sso_enabled(mut self, sso_enabled: bool) -> Self {
        self.sso_enabled = sso_enabled;
        self
    }

    /// Allow or forbid proxy-granting ticket requests.
    #[must_use]
    pub const fn with_proxy_allowed(mut self, allowed: bool) -> Self {
        self.allowed_to_proxy = allowed;
        self
    }

    /// Set the attribute release policy.
    #[must_use]
    pub fn with_attribute_release(mut self, policy: AttributeReleasePolicy) -> Self {
        self.attribute_release = policy;
        self
    }

    /// Release the value of `attribute` as the principal id.
    #[must_use]
    pub fn with_username_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.username_attribute = Some(attribute.into());
        self
    }

    /// Pattern this entry matches service identifiers against.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.service_pattern.as_str()
    }

    /// Whether `service` belongs to this entry.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        self.service_pattern.is_match(service.id())
    }

    /// The principal as this service is allowed to see it.
    ///
    /// Applies the attribute release policy and, when a username attribute is
    /// configured and present as a string, substitutes it for the id.
    #[must_use]
    pub fn released_principal(&self, principal: &Principal) -> Principal {
        let id = self
            .username_attribute
            .as_ref()
            .and_then(|name| principal.attributes().get(name))
            .and_then(|value| value.as_str())
            .unwrap_or_else(|| principal.id())
            .to_string();

        Principal::new(id).with_attributes(self.attribute_release.release(principal.attributes()))
    }
}

/// Lookup of registered services.
///
/// Implementations must be cheap to call; the engine consults them on
/// every grant and validation.
pub trait ServicesManager: Send + Sync {
    /// Find the registered entry governing `service`, if any.
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService>;
}

/// Static, in-memory services manager.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServicesManager {
    services: Vec<RegisteredService>,
}

impl InMemoryServicesManager {
    /// Create a manager over `services`, evaluated in ascending id order.
    #[must_use]
    pub fn new(mut services: Vec<RegisteredService>) -> Self {
        services.sort_by_key(|service| service.id);
        Self { services }
    }

    /// Add an entry.
    #[must_use]
    pub fn with_service(mut self, service: RegisteredService) -> Self {
        self.services.push(service);
        self.services.sort_by_key(|service| service.id);
        self
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<RegisteredService> {
        let found = self.services.iter().find(|entry| entry.matches(service)).cloned();
        if found.is_none() {
            tracing::debug!(service = %service, "No registered service matches");
        }
        found
    }
}
