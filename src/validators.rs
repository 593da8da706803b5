/// Email address handling
///
/// Emails are the lookup key for credentials, so every flow passes them through
/// `normalize_email` first. Registration additionally runs `parse_email`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AuthError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MIN_EMAIL_LENGTH: usize = 5;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$"
    ).unwrap();
}

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize an email address and check that it is well formed.
pub fn parse_email(email: &str) -> Result<String, AuthError> {
    let normalized = normalize_email(email);

    if normalized.len() < MIN_EMAIL_LENGTH || normalized.len() > MAX_EMAIL_LENGTH {
        return Err(AuthError::InvalidEmail);
    }

    if normalized.contains('\0') || normalized.matches('@').count() != 1 {
        return Err(AuthError::InvalidEmail);
    }

    if let Some(at_pos) = normalized.find('@') {
        if at_pos > MAX_LOCAL_PART_LENGTH {
            return Err(AuthError::InvalidEmail);
        }
    }

    if !EMAIL_REGEX.is_match(&normalized) {
        return Err(AuthError::InvalidEmail);
    }

    Ok(normalized)
}
