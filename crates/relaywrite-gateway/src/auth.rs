// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP basic authentication against the configured user list.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderMap, AUTHORIZATION};

use crate::config::User;

/// All variants map to a 401 without detail; the distinction only
/// matters for logs.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("malformed authorization header")]
    InvalidHeader,

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Resolves the request's user.
///
/// When no users are configured the request is treated as an anonymous
/// user with no topic override. Otherwise the `Authorization` header
/// must carry basic credentials matching one of the configured users;
/// the first match in configuration order wins.
pub fn authenticate(headers: &HeaderMap, users: Option<&[User]>) -> Result<User, AuthError> {
    let users = match users {
        Some(users) if !users.is_empty() => users,
        _ => return Ok(User::default()),
    };

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let (scheme, encoded) = header.split_once(' ').ok_or(AuthError::InvalidHeader)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::InvalidHeader);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidHeader)?;
    let (login, password) = decoded.split_once(':').ok_or(AuthError::InvalidHeader)?;

    users
        .iter()
        .find(|user| user.login == login && user.password == password)
        .cloned()
        .ok_or(AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn users() -> Vec<User> {
        vec![
            User {
                login: "scraper".to_string(),
                password: "secret".to_string(),
                topic: Some("series_scraper".to_string()),
            },
            User {
                login: "agent".to_string(),
                password: "hunter2".to_string(),
                topic: None,
            },
        ]
    }

    fn with_authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(login: &str, password: &str) -> HeaderMap {
        with_authorization(&format!(
            "Basic {}",
            STANDARD.encode(format!("{login}:{password}"))
        ))
    }

    #[test]
    fn anonymous_when_no_users_configured() {
        let user = authenticate(&HeaderMap::new(), None).unwrap();
        assert_eq!(user, User::default());

        let user = authenticate(&HeaderMap::new(), Some(&[])).unwrap();
        assert_eq!(user, User::default());
    }

    #[test]
    fn matches_configured_user() {
        let users = users();
        let user = authenticate(&basic("scraper", "secret"), Some(&users)).unwrap();
        assert_eq!(user.topic.as_deref(), Some("series_scraper"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let users = users();
        let headers = with_authorization(&format!(
            "basic {}",
            STANDARD.encode("agent:hunter2")
        ));
        let user = authenticate(&headers, Some(&users)).unwrap();
        assert_eq!(user.login, "agent");
    }

    #[test]
    fn missing_header() {
        let users = users();
        assert_eq!(
            authenticate(&HeaderMap::new(), Some(&users)),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn wrong_password() {
        let users = users();
        assert_eq!(
            authenticate(&basic("scraper", "wrong"), Some(&users)),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn unknown_user() {
        let users = users();
        assert_eq!(
            authenticate(&basic("nobody", "secret"), Some(&users)),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn rejects_bearer_scheme() {
        let users = users();
        assert_eq!(
            authenticate(&with_authorization("Bearer token"), Some(&users)),
            Err(AuthError::InvalidHeader)
        );
    }

    #[test]
    fn rejects_invalid_base64() {
        let users = users();
        assert_eq!(
            authenticate(&with_authorization("Basic !!!"), Some(&users)),
            Err(AuthError::InvalidHeader)
        );
    }

    #[test]
    fn rejects_payload_without_separator() {
        let users = users();
        let headers = with_authorization(&format!("Basic {}", STANDARD.encode("no-colon")));
        assert_eq!(
            authenticate(&headers, Some(&users)),
            Err(AuthError::InvalidHeader)
        );
    }
}
