/// Password Hashing and Verification
///
/// Stored form is `salt_hex:derived_key_hex`. The derived key is
/// PBKDF2-HMAC-SHA512 (64 bytes) over `HMAC-SHA256(pepper, password)`, so a
/// leaked credential table is useless without the server-side pepper.

use std::collections::HashSet;
use std::fmt;

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use sha2::{Sha256, Sha512};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;
const SALT_LENGTH: usize = 32;
const KEY_LENGTH: usize = 64;

/// Characters that satisfy the symbol requirement.
pub const PASSWORD_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";

lazy_static! {
    static ref COMMON_PASSWORDS: HashSet<&'static str> = [
        "password",
        "password1",
        "password123",
        "password!",
        "passw0rd",
        "p@ssw0rd",
        "p@ssword1",
        "123456",
        "12345678",
        "123456789",
        "1234567890",
        "qwerty",
        "qwerty123",
        "qwerty123!",
        "abc123",
        "111111",
        "letmein",
        "letmein1!",
        "welcome",
        "welcome1",
        "welcome1!",
        "monkey",
        "dragon",
        "iloveyou",
        "admin",
        "admin123",
        "admin123!",
        "changeme",
        "sunshine",
        "football",
    ]
    .into_iter()
    .collect();
}

type HmacSha256 = Hmac<Sha256>;

/// One unmet password rule
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort { min: usize },
    TooLong { max: usize },
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
    CommonPassword,
}

impl fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordViolation::TooShort { min } => {
                write!(f, "password must be at least {} characters", min)
            }
            PasswordViolation::TooLong { max } => {
                write!(f, "password must be at most {} characters", max)
            }
            PasswordViolation::MissingLowercase => {
                write!(f, "password must contain a lowercase letter")
            }
            PasswordViolation::MissingUppercase => {
                write!(f, "password must contain an uppercase letter")
            }
            PasswordViolation::MissingDigit => write!(f, "password must contain a digit"),
            PasswordViolation::MissingSymbol => write!(
                f,
                "password must contain one of the symbols {}",
                PASSWORD_SYMBOLS
            ),
            PasswordViolation::CommonPassword => write!(f, "password is too common"),
        }
    }
}

/// Result of a strength check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    pub valid: bool,
    pub violations: Vec<PasswordViolation>,
}

/// Check every strength rule and report all that fail.
pub fn validate_strength(password: &str) -> PasswordStrength {
    let mut violations = Vec::new();
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        violations.push(PasswordViolation::TooShort {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    if length > MAX_PASSWORD_LENGTH {
        violations.push(PasswordViolation::TooLong {
            max: MAX_PASSWORD_LENGTH,
        });
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push(PasswordViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push(PasswordViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordViolation::MissingDigit);
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        violations.push(PasswordViolation::MissingSymbol);
    }

    PasswordStrength {
        valid: violations.is_empty(),
        violations,
    }
}

/// Case-insensitive deny-list lookup
pub fn is_common_password(password: &str) -> bool {
    COMMON_PASSWORDS.contains(password.to_lowercase().as_str())
}

/// Salted, peppered PBKDF2-HMAC-SHA512 hasher
pub struct PasswordHasher {
    pepper: Vec<u8>,
    iterations: u32,
}

impl PasswordHasher {
    /// Build a hasher with the given pepper and KDF iteration count.
    ///
    /// Configuration enforces the production floor of 100 000 iterations; this
    /// constructor does not, so tests can run with a cheap count.
    pub fn with_iterations(pepper: impl AsRef<[u8]>, iterations: u32) -> Self {
        Self {
            pepper: pepper.as_ref().to_vec(),
            iterations: iterations.max(1),
        }
    }

    /// Hash a password with a fresh random salt
    pub fn hash_password(&self, password: &str) -> String {
        let mut salt_bytes = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);

        let key = self.derive_key(password, &salt);
        format!("{}:{}", salt, hex::encode(key))
    }

    /// Verify a password against a stored `salt:key` form.
    ///
    /// Malformed stored forms verify as `false`.
    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt, key_hex)) = stored.split_once(':') else {
            return false;
        };
        if salt.is_empty() {
            return false;
        }
        let Ok(expected) = hex::decode(key_hex) else {
            return false;
        };
        if expected.len() != KEY_LENGTH {
            return false;
        }

        let actual = self.derive_key(password, salt);
        constant_time_eq(&actual, &expected)
    }

    fn derive_key(&self, password: &str, salt: &str) -> [u8; KEY_LENGTH] {
        let mut mac = HmacSha256::new_from_slice(&self.pepper)
            .expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(password.as_bytes());
        let peppered = mac.finalize().into_bytes();

        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha512>(&peppered, salt.as_bytes(), self.iterations, &mut key);
        key
    }
}
