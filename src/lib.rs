pub mod auth;
pub mod clock;
pub mod configuration;
pub mod error;
pub mod events;
pub mod store;
pub mod telemetry;
pub mod validators;
