//! Token payload model
//!
//! [`Claims`] carries the RFC 7519 registered claims used by this service plus
//! the profile and authorization extensions. Field names are the wire names;
//! empty fields are omitted from the serialized payload.

use serde::{Deserialize, Serialize};

/// Access to the registered claims the verification routine checks
///
/// Implement this for a custom payload type to decode it with
/// [`TokenManager::verify_as`](crate::TokenManager::verify_as) and friends.
pub trait RegisteredClaims {
    /// Audiences the token was issued for
    fn audience(&self) -> &[String];
    /// Issuer
    fn issuer(&self) -> Option<&str>;
    /// Not-before, Unix seconds
    fn not_before(&self) -> Option<i64>;
    /// Expiration, Unix seconds
    fn expires_at(&self) -> Option<i64>;
}

/// Token claims
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID (jti), shared by an access token and its refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Subject (sub), the user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud)
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "audience")]
    pub aud: Vec<String>,

    /// Issuer (iss)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued At (iat) - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Expiration Time (exp) - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Organization id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,

    /// Project id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Granted permissions, in grant order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl Claims {
    /// Claims for a subject with no other fields set
    pub fn for_subject(sub: impl Into<String>) -> Self {
        Self {
            sub: Some(sub.into()),
            ..Self::default()
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the organization id
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// Set the project id
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Replace the permission list
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Check if the claims grant a specific permission
    pub fn has_permission(&self, perm: &str) -> bool {
        self.permissions.iter().any(|p| p == perm)
    }

    /// Check if the claims grant any of the permissions
    pub fn has_any_permission(&self, perms: &[&str]) -> bool {
        perms.iter().any(|p| self.has_permission(p))
    }

    /// Check if the claims grant all of the permissions
    ///
    /// An empty requirement is trivially satisfied.
    pub fn has_all_permissions(&self, perms: &[&str]) -> bool {
        perms.iter().all(|p| self.has_permission(p))
    }
}

impl RegisteredClaims for Claims {
    fn audience(&self) -> &[String] {
        &self.aud
    }

    fn issuer(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    fn not_before(&self) -> Option<i64> {
        self.nbf
    }

    fn expires_at(&self) -> Option<i64> {
        self.exp
    }
}

/// `aud` is a string or an array of strings on the wire
mod audience {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub(super) fn serialize<S: Serializer>(aud: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match aud {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(aud) => vec![aud],
            OneOrMany::Many(aud) => aud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_empty_fields_are_omitted() {
        let claims = Claims::for_subject("u1");
        assert_eq!(serde_json::to_value(&claims).unwrap(), json!({ "sub": "u1" }));
    }

    #[test]
    fn test_wire_field_names() {
        let claims = Claims {
            jti: Some("id".into()),
            aud: vec!["api".into()],
            iss: Some("issuer".into()),
            iat: Some(1),
            nbf: Some(2),
            exp: Some(3),
            ..Claims::for_subject("u1")
                .with_name("Ada")
                .with_email("ada@example.com")
                .with_org("o1")
                .with_project("p1")
                .with_permissions(["topics:read"])
        };
        assert_eq!(
            serde_json::to_value(&claims).unwrap(),
            json!({
                "jti": "id",
                "sub": "u1",
                "aud": "api",
                "iss": "issuer",
                "iat": 1,
                "nbf": 2,
                "exp": 3,
                "name": "Ada",
                "email": "ada@example.com",
                "org": "o1",
                "project": "p1",
                "permissions": ["topics:read"],
            })
        );
    }

    #[test]
    fn test_audience_accepts_string_or_array() {
        let single: Claims = serde_json::from_value(json!({ "aud": "a" })).unwrap();
        assert_eq!(single.aud, vec!["a".to_string()]);

        let many: Claims = serde_json::from_value(json!({ "aud": ["a", "b"] })).unwrap();
        assert_eq!(many.aud, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(serde_json::to_value(&many).unwrap()["aud"], json!(["a", "b"]));
    }

    #[test]
    fn test_permission_checks() {
        let claims = Claims::for_subject("u1").with_permissions(["a", "b"]);
        assert!(claims.has_permission("a"));
        assert!(!claims.has_permission("c"));
        assert!(claims.has_all_permissions(&["a", "b"]));
        assert!(!claims.has_all_permissions(&["a", "c"]));
        assert!(claims.has_any_permission(&["c", "b"]));
        assert!(!claims.has_any_permission(&["c"]));
        assert!(claims.has_all_permissions(&[]));
    }

    proptest! {
        #[test]
        fn prop_has_all_permissions_iff_subset(
            granted in proptest::collection::vec("[a-d]{1,2}", 0..6),
            required in proptest::collection::vec("[a-d]{1,2}", 0..6),
        ) {
            let claims = Claims::for_subject("u").with_permissions(granted.clone());
            let required_refs: Vec<&str> = required.iter().map(String::as_str).collect();
            let expected = required.iter().all(|r| granted.contains(r));
            prop_assert_eq!(claims.has_all_permissions(&required_refs), expected);
        }
    }
}
