//! ---
//! rota_section: "06-security-access-control"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Identity contracts, RBAC tables, and navigation policy."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::identity::IdentityError;

/// User-facing authentication error taxonomy.
///
/// Every code renders a fixed message; upstream error text never reaches the
/// person at the keyboard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    /// Email/password pair rejected.
    InvalidCredentials,
    /// Credential valid but no user record exists.
    UserNotFound,
    /// User record exists but is deactivated.
    UserInactive,
    /// Session or token no longer valid.
    SessionExpired,
    /// Identity provider or profile store unreachable.
    NetworkError,
    /// Anything else.
    UnknownError,
}

impl AuthErrorCode {
    /// Fixed message shown for the code.
    pub fn message(self) -> &'static str {
        match self {
            AuthErrorCode::InvalidCredentials => "Email or password is incorrect.",
            AuthErrorCode::UserNotFound => "No account is registered for this login.",
            AuthErrorCode::UserInactive => {
                "This account has been deactivated. Contact your administrator."
            }
            AuthErrorCode::SessionExpired => "Your session has expired. Please sign in again.",
            AuthErrorCode::NetworkError => {
                "Unable to reach the server. Check your connection and try again."
            }
            AuthErrorCode::UnknownError => "An unexpected error occurred. Please try again.",
        }
    }
}

impl std::error::Error for AuthErrorCode {}

impl From<&IdentityError> for AuthErrorCode {
    fn from(err: &IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials => AuthErrorCode::InvalidCredentials,
            IdentityError::UserNotFound => AuthErrorCode::UserNotFound,
            IdentityError::InvalidToken | IdentityError::TokenExpired => {
                AuthErrorCode::SessionExpired
            }
            IdentityError::Unavailable(_) => AuthErrorCode::NetworkError,
            IdentityError::UserExists => AuthErrorCode::UnknownError,
        }
    }
}

impl From<IdentityError> for AuthErrorCode {
    fn from(err: IdentityError) -> Self {
        AuthErrorCode::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn upstream_text_is_never_exposed() {
        let err = IdentityError::Unavailable("tcp connect 10.0.0.7:5432 refused".into());
        let code = AuthErrorCode::from(&err);
        assert_eq!(code, AuthErrorCode::NetworkError);
        assert!(!code.message().contains("10.0.0.7"));
    }

    #[test]
    fn codes_serialize_in_screaming_case() {
        assert_eq!(
            serde_json::to_string(&AuthErrorCode::InvalidCredentials).unwrap(),
            "\"INVALID_CREDENTIALS\""
        );
        assert_eq!(AuthErrorCode::SessionExpired.to_string(), "SESSION_EXPIRED");
    }

    #[test]
    fn every_code_has_a_message() {
        for code in AuthErrorCode::iter() {
            assert!(!code.message().is_empty());
        }
    }
}
