use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{LetPotError, Result};
use crate::models::{AuthenticationInfo, LetPotDevice};

pub const API_URL: &str = "https://api.letpot.net/app/";

/// Envelope around every API response body.
#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct Token {
    token: String,
    exp: i64,
}

#[derive(Deserialize)]
struct LoginData {
    token: Token,
    #[serde(rename = "refreshToken")]
    refresh_token: Token,
    user_id: String,
}

/// HTTP client for the LetPot account API.
pub struct LetPotClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<AuthenticationInfo>,
}

impl LetPotClient {
    /// Create a client, optionally resuming from earlier authentication info.
    pub fn new(http: reqwest::Client, auth: Option<AuthenticationInfo>) -> Self {
        Self {
            http,
            base_url: API_URL.to_string(),
            auth,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        self
    }

    /// Current authentication info, refreshed tokens included.
    pub fn auth(&self) -> Option<&AuthenticationInfo> {
        self.auth.as_ref()
    }

    /// Log in and create new authentication info.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthenticationInfo> {
        let form = [
            ("loginType", "EMAIL"),
            ("email", email),
            ("password", password),
            ("refresh_token", ""),
        ];
        let auth = self.request_tokens(&form, email).await?;
        info!("Logged in to LetPot as {}", email);
        Ok(auth)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh_token(&mut self) -> Result<AuthenticationInfo> {
        let current = self.auth.clone().ok_or_else(|| {
            LetPotError::Authentication("Missing refresh token, log in first".into())
        })?;
        if !current.is_refresh_valid() {
            return Err(LetPotError::Authentication(
                "Refresh token expired, log in again".into(),
            ));
        }

        let form = [
            ("loginType", "REFRESH_TOKEN"),
            ("email", ""),
            ("password", ""),
            ("refresh_token", current.refresh_token.as_str()),
        ];
        let auth = self.request_tokens(&form, &current.email).await?;
        info!("Refreshed LetPot access token");
        Ok(auth)
    }

    /// Get the devices linked to the account.
    pub async fn get_devices(&mut self) -> Result<Vec<LetPotDevice>> {
        let auth = self.valid_auth().await?;
        let response = self
            .http
            .get(self.url("devices"))
            .header(AUTHORIZATION, auth.access_token.as_str())
            .header("uid", auth.user_id.as_str())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LetPotError::Authentication(format!(
                "get_devices returned {}",
                status.as_u16()
            )));
        }
        if status != StatusCode::OK {
            let text = response.text().await?;
            return Err(LetPotError::Api(format!(
                "get_devices returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let body: ApiResponse<Vec<LetPotDevice>> = response.json().await?;
        if !body.ok {
            return Err(LetPotError::Api(format!(
                "Status not OK: {}",
                body.message.unwrap_or_default()
            )));
        }
        let devices = body
            .data
            .ok_or_else(|| LetPotError::Api("Devices response without data".into()))?;
        debug!("Account has {} devices", devices.len());
        Ok(devices)
    }

    /// Get the devices, logging in with `email` and `password` when there is
    /// no stored authentication or the API rejects it.
    pub async fn get_devices_with_login(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<Vec<LetPotDevice>> {
        if self.auth.is_some() {
            match self.get_devices().await {
                Err(LetPotError::Authentication(e)) => {
                    warn!("Stored login rejected ({}), logging in again", e);
                }
                other => return other,
            }
        }
        self.login(email, password).await?;
        self.get_devices().await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authentication info with a usable access token, refreshing if needed.
    async fn valid_auth(&mut self) -> Result<AuthenticationInfo> {
        let Some(auth) = self.auth.clone() else {
            return Err(LetPotError::Authentication(
                "Missing access token, log in first".into(),
            ));
        };
        if auth.is_valid() {
            return Ok(auth);
        }
        debug!("Access token expired, refreshing");
        self.refresh_token().await
    }

    async fn request_tokens(
        &mut self,
        form: &[(&str, &str)],
        email: &str,
    ) -> Result<AuthenticationInfo> {
        let response = self
            .http
            .post(self.url("auth/login"))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LetPotError::Authentication("Invalid credentials".into()));
        }

        let body: ApiResponse<LoginData> = response.json().await?;
        if !body.ok {
            return Err(LetPotError::Api(format!(
                "Status not OK: {}",
                body.message.unwrap_or_default()
            )));
        }
        let data = body
            .data
            .ok_or_else(|| LetPotError::Api("Login response without data".into()))?;

        let auth = AuthenticationInfo {
            access_token: data.token.token,
            access_token_expires: data.token.exp,
            refresh_token: data.refresh_token.token,
            refresh_token_expires: data.refresh_token.exp,
            user_id: data.user_id,
            email: email.to_string(),
        };
        self.auth = Some(auth.clone());
        Ok(auth)
    }
}
