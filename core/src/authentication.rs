//! Authentication results handed to the ticket subsystem.
//!
//! These values are produced by authentication handlers (out of scope) and
//! carried, unmodified, inside ticket-granting tickets. The broker reads the
//! principal id and attributes when building assertions; everything else is
//! opaque metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map shared by principals and authentications.
pub type Attributes = BTreeMap<String, Value>;

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: String,
    #[serde(default)]
    attributes: Attributes,
}

impl Principal {
    /// Create a principal with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Replace all attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Principal identifier (e.g. username).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Principal attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Metadata about a credential that took part in an authentication.
///
/// Secrets never reach this type; only what is useful for auditing and
/// assertions (identifier and credential class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Identifier presented with the credential (e.g. username, certificate subject).
    pub id: String,
    /// Credential class (e.g. `"password"`, `"x509"`, `"proxy-callback"`).
    pub credential_type: String,
}

impl CredentialMetadata {
    /// Create credential metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, credential_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential_type: credential_type.into(),
        }
    }
}

/// Outcome of a successful primary authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: Principal,
    #[serde(default)]
    attributes: Attributes,
    authenticated_at: DateTime<Utc>,
    #[serde(default)]
    credentials: Vec<CredentialMetadata>,
}

impl Authentication {
    /// Create an authentication for `principal` at `authenticated_at`.
    #[must_use]
    pub fn new(principal: Principal, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authenticated_at,
            credentials: Vec::new(),
        }
    }

    /// Attach an authentication-level attribute (e.g. authentication method).
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Record a credential that took part in this authentication.
    #[must_use]
    pub fn with_credential(mut self, credential: CredentialMetadata) -> Self {
        self.credentials.push(credential);
        self
    }

    /// The authenticated principal.
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Authentication-level attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// When the authentication happened.
    #[must_use]
    pub const fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }

    /// Credentials that took part.
    #[must_use]
    pub fn credentials(&self) -> &[CredentialMetadata] {
        &self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn test_authentication_survives_json_storage() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let authentication = Authentication::new(
            Principal::new("alice").with_attribute("mail", "alice@example.com"),
            at,
        )
        .with_attribute("method", "password")
        .with_credential(CredentialMetadata::new("alice", "password"));

        let json = serde_json::to_string(&authentication).unwrap();
        let decoded: Authentication = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, authentication);
        assert_eq!(decoded.credentials().len(), 1);
    }

    #[test]
    fn test_principal_display_is_id() {
        assert_eq!(Principal::new("bob").to_string(), "bob");
    }
}
