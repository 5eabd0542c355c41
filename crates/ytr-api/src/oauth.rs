//! OAuth2 refresh-token flow for the reporting API.

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use ytr_storage::{FetchRequest, HttpFetcher};

use crate::ApiError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Long-expired default so the first request always refreshes.
pub const DEFAULT_EXPIRY_DATE_MS: i64 = 1_447_278_755_869;

/// Tokens this close to their recorded expiry are refreshed.
const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry in epoch milliseconds.
    pub expiry_date_ms: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expiry_date_ms: i64,
}

impl AccessToken {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date_ms - EXPIRY_MARGIN_MS <= now_ms
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out a valid access token, refreshing it through the token endpoint when stale.
#[derive(Debug)]
pub struct TokenSource {
    credentials: OAuthCredentials,
    token_url: String,
    current: Mutex<AccessToken>,
}

impl TokenSource {
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self::with_token_url(credentials, GOOGLE_TOKEN_URL)
    }

    pub fn with_token_url(credentials: OAuthCredentials, token_url: impl Into<String>) -> Self {
        let current = AccessToken {
            value: credentials.access_token.clone(),
            expiry_date_ms: credentials.expiry_date_ms,
        };
        Self {
            credentials,
            token_url: token_url.into(),
            current: Mutex::new(current),
        }
    }

    pub async fn access_token(&self, http: &HttpFetcher, run_id: Uuid) -> Result<String, ApiError> {
        let mut current = self.current.lock().await;
        if !current.is_expired(Utc::now().timestamp_millis()) {
            return Ok(current.value.clone());
        }

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), self.credentials.refresh_token.clone()),
            ("client_id".to_string(), self.credentials.client_id.clone()),
            ("client_secret".to_string(), self.credentials.client_secret.clone()),
        ];
        let response = http
            .fetch_bytes(run_id, "oauth", &FetchRequest::post_form(&self.token_url, form))
            .await
            .map_err(|err| ApiError::TokenRefresh(err.to_string()))?;
        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|err| ApiError::TokenRefresh(format!("decoding token response: {err}")))?;

        let now_ms = Utc::now().timestamp_millis();
        *current = AccessToken {
            value: token.access_token,
            expiry_date_ms: now_ms + token.expires_in.unwrap_or(3600) * 1000,
        };
        info!(expires_in = token.expires_in, "access token refreshed");
        Ok(current.value.clone())
    }
}
