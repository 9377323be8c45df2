//! Authentication tokens.

use crate::types::{BoltDict, BoltValue};

/// Credentials sent in INIT, HELLO or LOGON.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthToken {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    Bearer {
        token: String,
    },
    Custom {
        scheme: String,
        principal: String,
        credentials: String,
        realm: Option<String>,
        parameters: Option<BoltDict>,
    },
}

impl AuthToken {
    pub fn none() -> Self {
        Self::None
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer { token: token.into() }
    }

    pub fn custom(
        scheme: impl Into<String>,
        principal: impl Into<String>,
        credentials: impl Into<String>,
        realm: Option<String>,
        parameters: Option<BoltDict>,
    ) -> Self {
        Self::Custom {
            scheme: scheme.into(),
            principal: principal.into(),
            credentials: credentials.into(),
            realm,
            parameters,
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// The auth map as it goes on the wire. Empty realms and parameters are
    /// left out.
    pub fn to_dict(&self) -> BoltDict {
        let mut dict = BoltDict::from([("scheme".to_string(), BoltValue::from(self.scheme()))]);
        let mut put = |key: &str, value: BoltValue| {
            dict.insert(key.to_string(), value);
        };
        match self {
            Self::None => {}
            Self::Basic {
                username,
                password,
                realm,
            } => {
                put("principal", username.as_str().into());
                put("credentials", password.as_str().into());
                if let Some(realm) = realm.as_deref().filter(|r| !r.is_empty()) {
                    put("realm", realm.into());
                }
            }
            Self::Bearer { token } => put("credentials", token.as_str().into()),
            Self::Custom {
                principal,
                credentials,
                realm,
                parameters,
                ..
            } => {
                put("principal", principal.as_str().into());
                put("credentials", credentials.as_str().into());
                if let Some(realm) = realm.as_deref().filter(|r| !r.is_empty()) {
                    put("realm", realm.into());
                }
                if let Some(parameters) = parameters.as_ref().filter(|p| !p.is_empty()) {
                    put("parameters", BoltValue::Dict(parameters.clone()));
                }
            }
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_has_only_scheme() {
        let dict = AuthToken::none().to_dict();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict["scheme"].as_str(), Some("none"));
    }

    #[test]
    fn basic_with_realm() {
        let dict = AuthToken::basic_with_realm("neo4j", "secret", "native").to_dict();
        assert_eq!(dict["scheme"].as_str(), Some("basic"));
        assert_eq!(dict["principal"].as_str(), Some("neo4j"));
        assert_eq!(dict["credentials"].as_str(), Some("secret"));
        assert_eq!(dict["realm"].as_str(), Some("native"));
        assert!(!AuthToken::basic("a", "b").to_dict().contains_key("realm"));
    }

    #[test]
    fn bearer_carries_token_as_credentials() {
        let dict = AuthToken::bearer("jwt").to_dict();
        assert_eq!(dict["scheme"].as_str(), Some("bearer"));
        assert_eq!(dict["credentials"].as_str(), Some("jwt"));
        assert!(!dict.contains_key("principal"));
    }

    #[test]
    fn custom_includes_parameters() {
        let parameters = BoltDict::from([("ttl".to_string(), BoltValue::Integer(60))]);
        let token = AuthToken::custom("kerberos", "me", "ticket", None, Some(parameters.clone()));
        let dict = token.to_dict();
        assert_eq!(token.scheme(), "kerberos");
        assert_eq!(dict["parameters"], BoltValue::Dict(parameters));
        assert!(!dict.contains_key("realm"));
    }
}
