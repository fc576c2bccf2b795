//! Authentication: HTTP Basic Auth for plain routes, and shared-credential
//! checking of the WebSocket `InitMessage.AuthToken` field.
//!
//! Security invariant: the configured credential is never logged.

use base64::Engine;
use tracing::warn;

use crate::config::Config;

/// Result of checking a credential against configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    Authenticated,
    NoAuthRequired,
    Failed(AuthError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    MissingCredential,
    MalformedHeader,
    InvalidCredential,
}

/// Realm presented in `WWW-Authenticate`, kept for wire compatibility with
/// existing front-ends that key off this exact string.
pub const REALM: &str = "GoTTY";

/// Check an HTTP `Authorization` header against `config.credential`.
///
/// Gated on `config.enable_basic_auth`: `credential` also serves as the
/// WebSocket `AuthToken` (see `check_init_token`), so a deployment may set
/// a credential for WS auth alone without demanding Basic Auth on every
/// HTTP route.
pub fn check_basic_auth(config: &Config, auth_header: Option<&str>) -> AuthResult {
    if !config.enable_basic_auth {
        return AuthResult::NoAuthRequired;
    }

    let Some(expected) = &config.credential else {
        return AuthResult::NoAuthRequired;
    };

    let Some(header) = auth_header else {
        return AuthResult::Failed(AuthError::MissingCredential);
    };

    let Some(encoded) = header.strip_prefix("Basic ") else {
        warn!("auth failed: malformed Authorization header");
        return AuthResult::Failed(AuthError::MalformedHeader);
    };

    let decoded = match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!("auth failed: invalid base64 in Authorization header");
            return AuthResult::Failed(AuthError::MalformedHeader);
        }
    };

    let Ok(provided) = String::from_utf8(decoded) else {
        warn!("auth failed: non-utf8 Authorization header");
        return AuthResult::Failed(AuthError::MalformedHeader);
    };

    if &provided == expected {
        AuthResult::Authenticated
    } else {
        warn!("auth failed: credential mismatch");
        AuthResult::Failed(AuthError::InvalidCredential)
    }
}

/// Check the `AuthToken` carried by a WebSocket `InitMessage` against
/// `config.credential`. Used only when credential auth is configured; the
/// front-end is expected to have already prompted for it via Basic Auth on
/// the initial page load and replays it here.
pub fn check_init_token(config: &Config, auth_token: &str) -> AuthResult {
    let Some(expected) = &config.credential else {
        return AuthResult::NoAuthRequired;
    };

    if auth_token.is_empty() {
        return AuthResult::Failed(AuthError::MissingCredential);
    }

    if auth_token == expected {
        AuthResult::Authenticated
    } else {
        warn!("auth failed: WebSocket init token mismatch");
        AuthResult::Failed(AuthError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A config with `credential` set and Basic Auth enabled, the
    /// configuration `check_basic_auth`'s tests exercise.
    fn config_with_credential(credential: Option<&str>) -> Config {
        let mut config = Config::default();
        config.credential = credential.map(|s| s.to_string());
        config.enable_basic_auth = credential.is_some();
        config
    }

    fn basic_header(user_pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(user_pass)
        )
    }

    #[test]
    fn no_auth_required_when_unconfigured() {
        let config = config_with_credential(None);
        assert_eq!(check_basic_auth(&config, None), AuthResult::NoAuthRequired);
    }

    #[test]
    fn basic_auth_success() {
        let config = config_with_credential(Some("alice:hunter2"));
        let header = basic_header("alice:hunter2");
        assert_eq!(
            check_basic_auth(&config, Some(&header)),
            AuthResult::Authenticated
        );
    }

    #[test]
    fn basic_auth_missing_header_fails() {
        let config = config_with_credential(Some("alice:hunter2"));
        assert_eq!(
            check_basic_auth(&config, None),
            AuthResult::Failed(AuthError::MissingCredential)
        );
    }

    #[test]
    fn basic_auth_wrong_scheme_fails() {
        let config = config_with_credential(Some("alice:hunter2"));
        assert_eq!(
            check_basic_auth(&config, Some("Bearer sometoken")),
            AuthResult::Failed(AuthError::MalformedHeader)
        );
    }

    #[test]
    fn basic_auth_not_required_when_disabled_even_with_credential_set() {
        // `credential` alone only gates the WebSocket AuthToken; HTTP routes
        // stay open unless `enable_basic_auth` is also set.
        let mut config = Config::default();
        config.credential = Some("alice:hunter2".to_string());
        config.enable_basic_auth = false;
        assert_eq!(check_basic_auth(&config, None), AuthResult::NoAuthRequired);
    }

    #[test]
    fn basic_auth_mismatch_fails() {
        let config = config_with_credential(Some("alice:hunter2"));
        let header = basic_header("alice:wrongpass");
        assert_eq!(
            check_basic_auth(&config, Some(&header)),
            AuthResult::Failed(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn init_token_success() {
        let config = config_with_credential(Some("alice:hunter2"));
        assert_eq!(
            check_init_token(&config, "alice:hunter2"),
            AuthResult::Authenticated
        );
    }

    #[test]
    fn init_token_empty_fails() {
        let config = config_with_credential(Some("alice:hunter2"));
        assert_eq!(
            check_init_token(&config, ""),
            AuthResult::Failed(AuthError::MissingCredential)
        );
    }

    #[test]
    fn init_token_no_auth_required_when_unconfigured() {
        let config = config_with_credential(None);
        assert_eq!(
            check_init_token(&config, "anything"),
            AuthResult::NoAuthRequired
        );
    }
}
