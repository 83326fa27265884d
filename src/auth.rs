//! OAuth2 access tokens for XOAUTH2 mail sessions
//!
//! [`OAuthTokenProvider`] hands out a usable access token per account:
//! cached while valid, refreshed once expired, and obtained through the
//! interactive authorization-code flow the first time an account is used.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::OAuthConfig;
use crate::error::{AssistantError, Result};
use crate::models::Credential;
use crate::token_store::TokenStore;

/// OAuth2 client registration used for every account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub scope: String,
}

impl ClientSecret {
    /// Build from configuration, preferring a Google `credentials.json` when one is configured
    pub async fn from_config(config: &OAuthConfig) -> Result<Self> {
        let mut secret = Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_uri: config.auth_uri.clone(),
            token_uri: config.token_uri.clone(),
            scope: config.scope.clone(),
        };

        if let Some(path) = &config.credentials_file {
            let credentials = load_credentials(path).await?;
            let app = credentials.installed;
            secret.client_id = app.client_id;
            secret.client_secret = app.client_secret;
            secret.auth_uri = app.auth_uri;
            secret.token_uri = app.token_uri;
            if let Some(uri) = app.redirect_uris.into_iter().next() {
                secret.redirect_uri = uri;
            }
        }

        if secret.client_id.is_empty() || secret.client_secret.is_empty() {
            return Err(AssistantError::ConfigError(
                "OAuth2 client id and secret are not configured".to_string(),
            ));
        }
        Ok(secret)
    }

    /// Consent page the operator opens to grant mail access
    pub fn consent_url(&self) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("scope", self.scope.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| AssistantError::ConfigError(format!("Invalid oauth.auth_uri: {}", e)))?;
        Ok(url.to_string())
    }
}

/// Credential structure matching Google's OAuth2 credentials JSON format
#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub installed: InstalledApp,
}

/// Installed application credentials (desktop/CLI app)
#[derive(Debug, Serialize, Deserialize)]
pub struct InstalledApp {
    pub client_id: String,
    #[serde(default)]
    pub project_id: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Load OAuth2 credentials from a JSON file
pub async fn load_credentials(path: &Path) -> Result<Credentials> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        AssistantError::ConfigError(format!("Failed to read credentials {:?}: {}", path, e))
    })?;
    let creds = serde_json::from_str(&content)?;
    Ok(creds)
}

/// Token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// The provider's token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for the first token pair
    async fn exchange_code(&self, secret: &ClientSecret, code: &str) -> Result<TokenResponse>;

    /// Trade a refresh token for a new access token
    async fn refresh(&self, secret: &ClientSecret, refresh_token: &str) -> Result<TokenResponse>;
}

/// Form-encoded POSTs against `token_uri`
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(token_uri).form(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::TokenExchange {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

impl Default for HttpTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, secret: &ClientSecret, code: &str) -> Result<TokenResponse> {
        self.post(
            &secret.token_uri,
            &[
                ("client_id", secret.client_id.as_str()),
                ("client_secret", secret.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", secret.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ],
        )
        .await
    }

    async fn refresh(&self, secret: &ClientSecret, refresh_token: &str) -> Result<TokenResponse> {
        self.post(
            &secret.token_uri,
            &[
                ("client_id", secret.client_id.as_str()),
                ("client_secret", secret.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        )
        .await
    }
}

/// Human in the loop for first-time authorization
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Show `consent_url` to the operator and return the code they obtained
    async fn request_code(&self, account_id: &str, consent_url: &str) -> Result<String>;
}

/// Prints the consent URL and reads the code from the terminal
pub struct TerminalPrompt;

#[async_trait]
impl AuthorizationPrompt for TerminalPrompt {
    async fn request_code(&self, account_id: &str, consent_url: &str) -> Result<String> {
        println!(
            "\nAuthorize {}: open the URL in a browser and grant permission:\n{}\n",
            account_id, consent_url
        );

        let code = tokio::task::spawn_blocking(|| {
            inquire::Text::new("Enter verification code:").prompt()
        })
        .await
        .map_err(|e| AssistantError::AuthorizationCancelled(e.to_string()))?
        .map_err(|e| AssistantError::AuthorizationCancelled(e.to_string()))?;

        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(AssistantError::AuthorizationCancelled(
                "empty verification code".to_string(),
            ));
        }
        Ok(code)
    }
}

/// Hands out access tokens, refreshing or authorizing as needed
pub struct OAuthTokenProvider {
    secret: ClientSecret,
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    prompt: Arc<dyn AuthorizationPrompt>,
}

impl OAuthTokenProvider {
    pub fn new(
        secret: ClientSecret,
        store: Arc<dyn TokenStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            secret,
            store,
            endpoint,
            prompt,
        }
    }

    /// A currently valid access token for `account_id`
    pub async fn get_access_token(&self, account_id: &str) -> Result<String> {
        match self.store.load(account_id).await? {
            Some(credential) if credential.is_valid_at(Utc::now()) => {
                tracing::debug!("Access token for {} is still valid", account_id);
                Ok(credential.access_token)
            }
            Some(credential) => {
                tracing::info!("Access token for {} expired, refreshing", account_id);
                self.refresh(credential).await
            }
            None => {
                tracing::info!("No stored credential for {}, starting authorization", account_id);
                self.authorize(account_id).await
            }
        }
    }

    async fn refresh(&self, credential: Credential) -> Result<String> {
        if credential.refresh_token.is_empty() {
            return Err(AssistantError::AuthError(format!(
                "No refresh token stored for {}; run `auth --force`",
                credential.account_id
            )));
        }

        let response = self
            .endpoint
            .refresh(&self.secret, &credential.refresh_token)
            .await?;
        let refreshed = credential.refreshed(
            response.access_token,
            response.expires_in,
            response.refresh_token,
            Utc::now(),
        );
        self.store.save(&refreshed.account_id, &refreshed).await?;

        tracing::info!(
            "Refreshed access token for {} (expires {})",
            refreshed.account_id,
            refreshed.expires_at.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(refreshed.access_token)
    }

    /// Run the authorization-code flow and store the resulting credential
    pub async fn authorize(&self, account_id: &str) -> Result<String> {
        let consent_url = self.secret.consent_url()?;
        let code = self.prompt.request_code(account_id, &consent_url).await?;

        let response = self.endpoint.exchange_code(&self.secret, &code).await?;
        let refresh_token = response.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AssistantError::AuthError(format!(
                "Authorization for {} returned no refresh token",
                account_id
            ))
        })?;

        let credential = Credential {
            account_id: account_id.to_string(),
            access_token: response.access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        };
        self.store.save(account_id, &credential).await?;

        tracing::info!("Stored new credential for {}", account_id);
        Ok(credential.access_token)
    }

    /// Drop the stored credential so the next call re-authorizes
    pub async fn forget(&self, account_id: &str) -> Result<()> {
        self.store.remove(account_id).await
    }
}
