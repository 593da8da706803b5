/// Authentication module
///
/// Password hashing and strength rules, signed access/refresh tokens,
/// lockout policy, and the `CredentialService` that runs the flows.

mod claims;
mod lockout;
mod models;
mod password;
mod service;
mod token;

pub use claims::{TokenPayload, TokenSubject, TokenType};
pub use lockout::{FailureOutcome, LockStatus, LockoutPolicy};
pub use models::{
    Acknowledgement, AuthSession, Credential, CredentialUpdate, Origin, PasswordHistoryEntry,
    Profile, RefreshTokenRecord, RegisterRequest, SessionRecord,
};
pub use password::{
    is_common_password, validate_strength, PasswordHasher, PasswordStrength, PasswordViolation,
    PASSWORD_SYMBOLS,
};
pub use service::{CredentialService, FORGOT_PASSWORD_MESSAGE, RESEND_VERIFICATION_MESSAGE};
pub use token::{
    encode, hash_for_storage, random_opaque_token, verify_with_secret, TokenCodec, TokenPair,
};
