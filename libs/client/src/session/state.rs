//! Observable session state and the types it is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Manager,
    Staff,
    Customer,
}

/// Account standing. `Suspended` and `Inactive` are terminal for a session:
/// detecting either clears all client-side credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Suspended,
    Inactive,
    PendingVerification,
}

impl UserStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UserStatus::Suspended | UserStatus::Inactive)
    }
}

/// Authenticated user identity, as returned by the backend.
///
/// This is the only record the SDK persists to durable client storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why the last auth operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    InvalidOtp,
    AccountSuspended,
    AccountInactive,
    ServerError,
    Network,
}

/// Result of a successful `login` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A full session was established.
    Authenticated,
    /// Credentials were accepted but a one-time code must be verified before
    /// any session exists.
    OtpRequired,
}

/// Point-in-time view of the session, for UI flow control.
///
/// Consumers read this (or subscribe to [`SessionEvent`]s) instead of
/// catching errors; auth failures never propagate as exceptions.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<AuthFailure>,
}

/// Partial identity update merged by `update_user`.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    pub email_verified: Option<bool>,
}

/// Session lifecycle notifications fanned out to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    /// The session was cleared. `redirect_to_login` is set when the clear was
    /// server-driven (failed refresh); consumers on public routes ignore it.
    SignedOut { redirect_to_login: bool },
    /// The account became suspended or inactive. Consumers should route to a
    /// suspension notice rather than the login entry point.
    AccountSuspended,
    UserUpdated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_format() {
        let s: UserStatus = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(s, UserStatus::Suspended);
        assert!(s.is_terminal());
        assert!(!UserStatus::PendingVerification.is_terminal());
    }

    #[test]
    fn user_roundtrip_uses_camel_case() {
        let raw = serde_json::json!({
            "id": "usr_01J0000000000000000000000",
            "email": "ops@tably.test",
            "name": "Ops",
            "role": "MANAGER",
            "status": "ACTIVE",
            "emailVerified": true,
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
        });
        let user: User = serde_json::from_value(raw).unwrap();
        assert_eq!(user.role, UserRole::Manager);
        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["emailVerified"], true);
    }
}
