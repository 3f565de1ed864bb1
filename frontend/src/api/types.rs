use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub user: Option<UserResponse>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UserResponse {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNKNOWN: &str = "UNKNOWN";
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const MALFORMED_RESPONSE: &str = "MALFORMED_RESPONSE";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<ApiError> for String {
    fn from(error: ApiError) -> Self {
        error.error
    }
}

impl ApiError {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(codes::UNKNOWN, msg)
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::REQUEST_FAILED, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(codes::MALFORMED_RESPONSE, msg)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == codes::UNAUTHORIZED || self.code == codes::INVALID_CREDENTIALS
    }

    pub fn is_network(&self) -> bool {
        self.code == codes::REQUEST_FAILED
    }
}

/// Error body as the API sends it. Different endpoints use different keys
/// for the message, so all of them are accepted.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub(crate) fn message(&self) -> Option<String> {
        if let Some(error) = self.error.as_ref().filter(|e| !e.is_empty()) {
            return Some(error.clone());
        }
        match &self.detail {
            Some(Value::String(detail)) if !detail.is_empty() => return Some(detail.clone()),
            _ => {}
        }
        self.message.clone().filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_request_debug_hides_password() {
        let request = LoginRequest {
            username: "ansel".into(),
            password: "password123".into(),
            remember_me: true,
        };
        let rendered = format!("{:?}", request);
        assert!(rendered.contains("ansel"));
        assert!(!rendered.contains("password123"));
    }

    #[test]
    fn login_request_serializes_remember_me() {
        let request = LoginRequest {
            username: "ansel".into(),
            password: "pw".into(),
            remember_me: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({ "username": "ansel", "password": "pw", "remember_me": false })
        );
    }

    #[test]
    fn login_response_requires_token_and_user() {
        let missing_token = json!({
            "token_type": "bearer",
            "expires_in": 900,
            "user": { "id": "1", "username": "ansel" }
        });
        assert!(serde_json::from_value::<LoginResponse>(missing_token).is_err());

        let missing_user = json!({ "access_token": "t", "expires_in": 900 });
        assert!(serde_json::from_value::<LoginResponse>(missing_user).is_err());
    }

    #[test]
    fn user_response_defaults_optional_fields() {
        let user: UserResponse =
            serde_json::from_value(json!({ "id": "1", "username": "ansel" })).unwrap();
        assert_eq!(user.email, None);
        assert!(!user.is_admin);
        assert!(user.is_active);
        assert_eq!(user.label(), "ansel");

        let named = UserResponse {
            display_name: Some("Ansel Adams".into()),
            ..user
        };
        assert_eq!(named.label(), "Ansel Adams");
    }

    #[test]
    fn refresh_response_user_is_optional() {
        let refresh: RefreshResponse =
            serde_json::from_value(json!({ "access_token": "t2", "expires_in": 60 })).unwrap();
        assert!(refresh.user.is_none());
        assert_eq!(refresh.expires_in, 60);
    }

    #[test]
    fn api_error_helpers_set_codes() {
        let validation = ApiError::validation("invalid payload");
        assert_eq!(validation.code, "VALIDATION_ERROR");
        assert_eq!(validation.error, "invalid payload");
        assert!(validation.details.is_none());

        assert_eq!(ApiError::unknown("x").code, "UNKNOWN");
        assert!(ApiError::request_failed("x").is_network());
        assert!(ApiError::unauthorized("x").is_unauthorized());
        assert_eq!(ApiError::malformed("x").code, "MALFORMED_RESPONSE");
    }

    #[test]
    fn api_error_display_and_string_conversion_match_error_text() {
        let error = ApiError::unknown("boom");
        assert_eq!(format!("{}", error), "boom");

        let raw: String = ApiError::validation("bad input").into();
        assert_eq!(raw, "bad input");
    }

    #[test]
    fn error_body_prefers_error_then_detail_then_message() {
        let body: ErrorBody =
            serde_json::from_value(json!({ "error": "Invalid credentials", "detail": "x" }))
                .unwrap();
        assert_eq!(body.message().as_deref(), Some("Invalid credentials"));

        let body: ErrorBody = serde_json::from_value(json!({ "detail": "Token expired" })).unwrap();
        assert_eq!(body.message().as_deref(), Some("Token expired"));

        let body: ErrorBody =
            serde_json::from_value(json!({ "detail": [{ "loc": ["body"] }], "message": "Bad" }))
                .unwrap();
        assert_eq!(body.message().as_deref(), Some("Bad"));

        assert_eq!(ErrorBody::default().message(), None);
    }
}
