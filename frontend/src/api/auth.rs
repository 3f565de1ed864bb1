use reqwest::{RequestBuilder, StatusCode};

use super::{
    client::ApiClient,
    types::{codes, ApiError, LoginRequest, LoginResponse, RefreshResponse},
};

pub const LOGIN_PATH: &str = "/auth/login";
pub const ME_PATH: &str = "/auth/me";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REVOKE_ALL_PATH: &str = "/auth/revoke-all-sessions";

/// Lets the browser attach the httpOnly refresh cookie.
pub(crate) fn with_credentials(builder: RequestBuilder) -> RequestBuilder {
    #[cfg(target_arch = "wasm32")]
    let builder = builder.fetch_credentials_include();
    builder
}

fn with_bearer(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

impl ApiClient {
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let url = self.endpoint(LOGIN_PATH).await;
        let response = self
            .execute(with_credentials(self.http_client().post(&url).json(request)))
            .await?;

        if response.is_success() {
            let login: LoginResponse = response.json()?;
            if login.access_token.is_empty() || login.expires_in <= 0 {
                return Err(ApiError::malformed("Login response is missing a usable token"));
            }
            Ok(login)
        } else if response.status() == StatusCode::UNAUTHORIZED {
            let mut error = response.error("Invalid credentials");
            if error.code == codes::UNAUTHORIZED {
                error.code = codes::INVALID_CREDENTIALS.to_string();
            }
            Err(error)
        } else {
            Err(response.error("Login failed"))
        }
    }

    pub async fn refresh_token(&self, access_token: Option<&str>) -> Result<RefreshResponse, ApiError> {
        let url = self.endpoint(REFRESH_PATH).await;
        let builder = with_bearer(self.http_client().post(&url), access_token);
        let response = self.execute(with_credentials(builder)).await?;

        if response.is_success() {
            let refreshed: RefreshResponse = response.json()?;
            if refreshed.access_token.is_empty() || refreshed.expires_in <= 0 {
                return Err(ApiError::malformed("Refresh response is missing a usable token"));
            }
            Ok(refreshed)
        } else {
            Err(response.error("Session expired"))
        }
    }

    pub async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError> {
        let url = self.endpoint(LOGOUT_PATH).await;
        let builder = with_bearer(self.http_client().post(&url), access_token);
        self.execute(with_credentials(builder))
            .await?
            .error_for_status("Logout failed")
            .map(|_| ())
    }
}
