//! # Secret Generation & Verification
//!
//! Random identifiers for scope databases, scope secrets, and access-token
//! credentials, plus the constant-time privilege-secret membership check.

use crate::{SCOPE_DB_NAME_LEN, SCOPE_SECRET_LEN, TOKEN_PASSWORD_LEN};
use rand::distributions::Slice;
use rand::Rng;
use subtle::ConstantTimeEq;

const LOWERCASE: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z',
];

const ALPHANUMERIC: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L',
    'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9',
];

const ALPHANUMERIC_DASH: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L',
    'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9', '-',
];

/// Lowercase alphanumeric suffix used for generated role names.
const LOWER_ALNUM: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

fn random_string(alphabet: &'static [char], len: usize) -> String {
    let dist = Slice::new(alphabet).expect("alphabet is non-empty");
    rand::thread_rng().sample_iter(dist).take(len).collect()
}

/// Generate a scope database name: lowercase letters only, so it is a valid
/// unquoted identifier on any SQL dialect.
#[must_use]
pub fn scope_db_name() -> String {
    random_string(LOWERCASE, SCOPE_DB_NAME_LEN)
}

/// Generate the opaque 64-char scope secret handed to agents.
#[must_use]
pub fn scope_secret() -> String {
    random_string(ALPHANUMERIC, SCOPE_SECRET_LEN)
}

/// Generate an opaque role name for an access token.
///
/// Starts with a letter so it needs no quoting as a database identifier.
#[must_use]
pub fn token_username() -> String {
    format!("v{}", random_string(LOWER_ALNUM, 15))
}

/// Generate an access-token password (alphanumeric plus dash).
#[must_use]
pub fn token_password() -> String {
    random_string(ALPHANUMERIC_DASH, TOKEN_PASSWORD_LEN)
}

/// Constant-time membership check of `presented` against the configured
/// privilege secrets.
///
/// Every configured secret is compared regardless of earlier matches, and
/// each comparison is constant-time in the secret contents. Only the count
/// and lengths of configured secrets influence timing.
#[must_use]
pub fn privilege_secret_matches(presented: &str, configured: &[String]) -> bool {
    let presented = presented.as_bytes();
    let mut matched = 0u8;
    for secret in configured {
        matched |= secret.as_bytes().ct_eq(presented).unwrap_u8();
    }
    matched == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_name_shape() {
        let name = scope_db_name();
        assert_eq!(name.len(), SCOPE_DB_NAME_LEN);
        assert!(name.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_scope_secret_shape() {
        let secret = scope_secret();
        assert_eq!(secret.len(), SCOPE_SECRET_LEN);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_token_credentials_shape() {
        let user = token_username();
        assert_eq!(user.len(), 16);
        assert!(user.starts_with('v'));
        let password = token_password();
        assert_eq!(password.len(), TOKEN_PASSWORD_LEN);
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_generated_values_differ() {
        assert_ne!(scope_secret(), scope_secret());
        assert_ne!(token_password(), token_password());
    }

    #[test]
    fn test_privilege_membership() {
        let configured = vec!["alpha-secret".to_string(), "beta-secret".to_string()];
        assert!(privilege_secret_matches("alpha-secret", &configured));
        assert!(privilege_secret_matches("beta-secret", &configured));
        assert!(!privilege_secret_matches("gamma-secret", &configured));
        assert!(!privilege_secret_matches("", &configured));
        assert!(!privilege_secret_matches("alpha-secret", &[]));
    }
}
