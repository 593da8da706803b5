use crate::error::ConfigError;

/// Lowest KDF iteration count accepted from configuration.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Longest token, reset or lock duration accepted from configuration (10 years).
pub const MAX_DURATION_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub jwt: JwtSettings,
    pub password: PasswordSettings,
    #[serde(default)]
    pub lockout: LockoutSettings,
}

/// Signed token settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64, // seconds
}

/// Password hashing and password-reset settings
#[derive(serde::Deserialize, Clone)]
pub struct PasswordSettings {
    pub pepper: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default = "default_reset_token_expiry")]
    pub reset_token_expiry: i64, // seconds
    /// How many previous hashes a new password is checked against. 0 disables the check.
    #[serde(default)]
    pub history_depth: usize,
}

/// Failed-login lockout settings
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LockoutSettings {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lock_duration_minutes")]
    pub lock_duration_minutes: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lock_duration_minutes: default_lock_duration_minutes(),
        }
    }
}

fn default_access_token_expiry() -> i64 {
    3600
}

fn default_refresh_token_expiry() -> i64 {
    604_800
}

fn default_kdf_iterations() -> u32 {
    MIN_KDF_ITERATIONS
}

fn default_reset_token_expiry() -> i64 {
    3600
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lock_duration_minutes() -> i64 {
    15
}

impl Settings {
    /// Reject settings the credential core cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.access_token_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_token_secret".to_string()));
        }
        if self.jwt.refresh_token_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_token_secret".to_string()));
        }
        if self.jwt.access_token_secret == self.jwt.refresh_token_secret {
            return Err(ConfigError::InvalidValue(
                "access and refresh token secrets must differ".to_string(),
            ));
        }
        if self.password.pepper.is_empty() {
            return Err(ConfigError::MissingRequired("password.pepper".to_string()));
        }
        if self.jwt.access_token_expiry <= 0 || self.jwt.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiries must be positive".to_string(),
            ));
        }
        if self.password.reset_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "password.reset_token_expiry must be positive".to_string(),
            ));
        }
        if self.jwt.access_token_expiry > MAX_DURATION_SECONDS
            || self.jwt.refresh_token_expiry > MAX_DURATION_SECONDS
            || self.password.reset_token_expiry > MAX_DURATION_SECONDS
        {
            return Err(ConfigError::InvalidValue(format!(
                "token expiries must not exceed {} seconds",
                MAX_DURATION_SECONDS
            )));
        }
        if self.password.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(ConfigError::InvalidValue(format!(
                "password.kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }
        if self.lockout.max_failed_attempts == 0 || self.lockout.lock_duration_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "lockout threshold and duration must be positive".to_string(),
            ));
        }
        if self.lockout.lock_duration_minutes > MAX_DURATION_SECONDS / 60 {
            return Err(ConfigError::InvalidValue(format!(
                "lockout.lock_duration_minutes must not exceed {}",
                MAX_DURATION_SECONDS / 60
            )));
        }
        Ok(())
    }
}

/// Load settings from `configuration.*` (optional) and `APP_`-prefixed
/// environment variables, e.g. `APP_JWT__ACCESS_TOKEN_SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_settings() -> Settings {
        Settings {
            jwt: JwtSettings {
                access_token_secret: "access-secret-at-least-32-characters-long".to_string(),
                refresh_token_secret: "refresh-secret-at-least-32-characters-long".to_string(),
                access_token_expiry: 3600,
                refresh_token_expiry: 604_800,
            },
            password: PasswordSettings {
                pepper: "pepper".to_string(),
                kdf_iterations: MIN_KDF_ITERATIONS,
                reset_token_expiry: 3600,
                history_depth: 0,
            },
            lockout: LockoutSettings::default(),
        }
    }

    #[test]
    fn test_valid_settings() {
        assert!(get_test_settings().validate().is_ok());
    }

    #[test]
    fn test_shared_secret_rejected() {
        let mut settings = get_test_settings();
        settings.jwt.refresh_token_secret = settings.jwt.access_token_secret.clone();
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_missing_pepper_rejected() {
        let mut settings = get_test_settings();
        settings.password.pepper = String::new();
        assert!(matches!(settings.validate(), Err(ConfigError::MissingRequired(_))));
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let mut settings = get_test_settings();
        settings.password.kdf_iterations = 10_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut settings = get_test_settings();
        settings.jwt.access_token_expiry = i64::MAX;
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));

        let mut settings = get_test_settings();
        settings.jwt.refresh_token_expiry = MAX_DURATION_SECONDS + 1;
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));

        let mut settings = get_test_settings();
        settings.password.reset_token_expiry = i64::MAX;
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));

        let mut settings = get_test_settings();
        settings.lockout.lock_duration_minutes = i64::MAX;
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));

        let mut settings = get_test_settings();
        settings.jwt.refresh_token_expiry = MAX_DURATION_SECONDS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_defaults_from_partial_source() {
        let source = serde_json::json!({
            "jwt": {
                "access_token_secret": "a-secret",
                "refresh_token_secret": "r-secret"
            },
            "password": { "pepper": "pepper" }
        });
        let settings: Settings = serde_json::from_value(source).expect("Failed to deserialize");

        assert_eq!(settings.jwt.access_token_expiry, 3600);
        assert_eq!(settings.jwt.refresh_token_expiry, 604_800);
        assert_eq!(settings.password.kdf_iterations, MIN_KDF_ITERATIONS);
        assert_eq!(settings.password.history_depth, 0);
        assert_eq!(settings.lockout, LockoutSettings::default());
        assert!(settings.validate().is_ok());
    }
}
