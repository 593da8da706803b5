/// Domain events emitted by the credential flows
///
/// Publishing is fire-and-forget. A flow never waits for delivery and never
/// fails because of it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sink for domain events (message bus, mailer queue, ...)
pub trait EventPublisher: Send + Sync {
    fn emit(&self, event_name: &str, payload: serde_json::Value);
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AuthEvent {
    UserCreated {
        user_id: Uuid,
        email: String,
        name: Option<String>,
    },
    /// Carries the raw verification token. Only its digest is stored.
    SendVerificationEmail {
        user_id: Uuid,
        email: String,
        name: Option<String>,
        token: String,
    },
    UserLoggedIn {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
        at: DateTime<Utc>,
    },
    AccountLocked {
        user_id: Uuid,
        locked_until: DateTime<Utc>,
    },
    /// Carries the raw reset token. Only its digest is stored.
    SendPasswordReset {
        user_id: Uuid,
        email: String,
        name: Option<String>,
        token: String,
    },
    PasswordChanged {
        user_id: Uuid,
        via_reset: bool,
    },
    EmailVerified {
        user_id: Uuid,
        email: String,
    },
    UserDeactivated {
        user_id: Uuid,
    },
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::UserCreated { .. } => "user.created",
            AuthEvent::SendVerificationEmail { .. } => "email.send-verification",
            AuthEvent::UserLoggedIn { .. } => "user.logged-in",
            AuthEvent::AccountLocked { .. } => "user.account-locked",
            AuthEvent::SendPasswordReset { .. } => "email.send-password-reset",
            AuthEvent::PasswordChanged { .. } => "user.password-changed",
            AuthEvent::EmailVerified { .. } => "user.email-verified",
            AuthEvent::UserDeactivated { .. } => "user.deactivated",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// An event as it left the publisher
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Publisher backed by an unbounded channel; `emit` never blocks.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<PublishedEvent>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelPublisher {
    fn emit(&self, event_name: &str, payload: serde_json::Value) {
        let event = PublishedEvent {
            name: event_name.to_string(),
            payload,
        };
        if self.sender.send(event).is_err() {
            tracing::warn!(event = event_name, "Event receiver dropped, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let user_id = Uuid::new_v4();
        assert_eq!(
            AuthEvent::UserCreated { user_id, email: "a@x.com".to_string(), name: None }.name(),
            "user.created"
        );
        assert_eq!(
            AuthEvent::SendPasswordReset {
                user_id,
                email: "a@x.com".to_string(),
                name: None,
                token: "raw".to_string(),
            }
            .name(),
            "email.send-password-reset"
        );
    }

    #[test]
    fn test_payload_is_flat_object() {
        let user_id = Uuid::new_v4();
        let payload = AuthEvent::SendVerificationEmail {
            user_id,
            email: "a@x.com".to_string(),
            name: Some("A".to_string()),
            token: "raw-token".to_string(),
        }
        .payload();

        assert_eq!(payload["email"], "a@x.com");
        assert_eq!(payload["token"], "raw-token");
        assert_eq!(payload["user_id"], user_id.to_string());
    }

    #[test]
    fn test_channel_publisher_delivers_without_blocking() {
        let (publisher, mut receiver) = ChannelPublisher::new();
        publisher.emit("user.created", serde_json::json!({"id": 1}));

        let event = receiver.try_recv().expect("Event was not delivered");
        assert_eq!(event.name, "user.created");
        assert_eq!(event.payload["id"], 1);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (publisher, receiver) = ChannelPublisher::new();
        drop(receiver);
        publisher.emit("user.created", serde_json::Value::Null);
    }
}
