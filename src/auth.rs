//! Bearer-token identity: each configured token maps to a role and, for
//! doctors and patients, the user id it acts as.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
    Finance,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Patient => "patient",
            Self::Finance => "finance",
        }
    }

    /// Doctor and patient tokens act on behalf of one user row.
    pub fn needs_subject(self) -> bool {
        matches!(self, Self::Doctor | Self::Patient)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("unknown token")]
    Unknown,
    #[error("role {role} may not perform this operation")]
    Forbidden { role: &'static str },
    #[error("token for role {role} has no subject id")]
    MissingSubject { role: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    pub subject_id: Option<String>,
}

impl Principal {
    pub fn new(role: Role, subject_id: Option<String>) -> Self {
        Self { role, subject_id }
    }

    pub fn require(&self, roles: &[Role]) -> Result<(), AuthError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                role: self.role.as_str(),
            })
        }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn subject(&self) -> Result<&str, AuthError> {
        self.subject_id
            .as_deref()
            .ok_or(AuthError::MissingSubject {
                role: self.role.as_str(),
            })
    }
}

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub role: Role,
    pub subject_id: Option<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("role", &self.role)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

impl AccessToken {
    pub fn new(token: impl Into<String>, role: Role) -> Self {
        Self {
            token: token.into(),
            role,
            subject_id: None,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

#[derive(Clone, Default)]
pub struct Authenticator {
    tokens: HashMap<String, Principal>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Authenticator {
    pub fn new(tokens: impl IntoIterator<Item = AccessToken>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|token| {
                (
                    token.token,
                    Principal::new(token.role, token.subject_id),
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let provided = extract_bearer(headers)
            .or_else(|| extract_header(headers, "x-ims-token"))
            .ok_or(AuthError::Missing)?;
        self.tokens
            .get(&provided)
            .cloned()
            .ok_or(AuthError::Unknown)
    }
}

pub(crate) fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim()
        .to_string();
    let rest = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let token = rest.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new([
            AccessToken::new("admin-token", Role::Admin),
            AccessToken::new("doc-token", Role::Doctor).with_subject("doc-1"),
        ])
    }

    #[test]
    fn resolves_bearer_and_header_tokens() {
        let auth = authenticator();

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer doc-token"));
        let principal = auth.authenticate(&headers).unwrap();
        assert_eq!(principal.role, Role::Doctor);
        assert_eq!(principal.subject().unwrap(), "doc-1");

        let mut headers = HeaderMap::new();
        headers.insert("x-ims-token", HeaderValue::from_static("admin-token"));
        assert_eq!(auth.authenticate(&headers).unwrap().role, Role::Admin);
    }

    #[test]
    fn rejects_missing_and_unknown_tokens() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&HeaderMap::new()).unwrap_err(),
            AuthError::Missing
        );

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer nope"));
        assert_eq!(auth.authenticate(&headers).unwrap_err(), AuthError::Unknown);
    }

    #[test]
    fn require_checks_role_membership() {
        let principal = Principal::new(Role::Finance, None);
        assert!(principal.require(&[Role::Finance, Role::Admin]).is_ok());
        assert_eq!(
            principal.require(&[Role::Admin]).unwrap_err(),
            AuthError::Forbidden { role: "finance" }
        );
        assert!(principal.subject().is_err());
    }
}
