use serde::{Deserialize, Serialize};

use crate::api::UserResponse;

/// Where the controller is in its sign-in lifecycle. `LoggedOut` is only ever
/// published to listeners; the controller settles on `Anonymous` right after
/// and publishes that too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    LoggedOut,
}

#[derive(Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    /// Epoch milliseconds.
    pub token_expiry: Option<i64>,
    pub user: Option<UserResponse>,
    pub remember_me: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("token_expiry", &self.token_expiry)
            .field("user", &self.user)
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    /// Inclusive: a token whose expiry equals `now_millis` is already dead.
    pub fn is_token_expired(&self, now_millis: i64) -> bool {
        self.token_expiry
            .map(|expiry| expiry <= now_millis)
            .unwrap_or(true)
    }
}

/// What listeners see on every change. Carries no token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserResponse>,
    pub is_authenticated: bool,
    pub token_expiry: Option<i64>,
}

impl AuthSnapshot {
    pub(crate) fn capture(status: SessionStatus, session: &Session) -> Self {
        Self {
            status,
            user: session.user.clone(),
            is_authenticated: session.is_authenticated(),
            token_expiry: session.token_expiry,
        }
    }
}

/// Durable "remember me" record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedSession {
    pub user: Option<UserResponse>,
    pub is_authenticated: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_expiry: Option<i64>,
}

impl PersistedSession {
    pub(crate) fn from_session(session: &Session) -> Self {
        Self {
            user: session.user.clone(),
            is_authenticated: session.is_authenticated(),
            access_token: session.access_token.clone(),
            token_expiry: session.token_expiry,
        }
    }

    /// `None` when the record cannot stand for a signed-in session.
    pub(crate) fn into_session(self) -> Option<Session> {
        if !self.is_authenticated {
            return None;
        }
        let session = Session {
            access_token: self.access_token,
            token_expiry: self.token_expiry,
            user: self.user,
            remember_me: true,
        };
        session.is_authenticated().then_some(session)
    }
}
