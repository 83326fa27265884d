use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AssistantError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_inbound")]
    pub inbound: AccountConfig,
    #[serde(default = "default_outbound")]
    pub outbound: AccountConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inbound: default_inbound(),
            outbound: default_outbound(),
            oauth: OAuthConfig::default(),
            operator: OperatorConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

/// How an account authenticates against its mail server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Password,
    Oauth2,
}

impl AuthKind {
    /// Kind used when the configuration leaves `auth` out
    pub fn for_address(address: &str) -> Self {
        match address.rsplit_once('@').map(|(_, domain)| domain.to_lowercase()) {
            Some(domain) if domain == "gmail.com" || domain == "googlemail.com" => AuthKind::Oauth2,
            _ => AuthKind::Password,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub address: String,
    pub server: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Mailbox folder (inbound only)
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Leave fetched messages unseen (inbound only)
    #[serde(default)]
    pub keep_unseen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    /// Google installed-app `credentials.json`, overrides client id/secret when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            scope: default_scope(),
            token_dir: default_token_dir(),
            credentials_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperatorConfig {
    /// Display name used in the `From` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// How the operator is referred to inside the drafting prompt
    #[serde(default)]
    pub identity: String,
    /// Send every reply and the digest here instead of the real recipients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_response_model")]
    pub response_model: String,
    #[serde(default = "default_response_model")]
    pub resume_model: String,
    #[serde(default = "default_digest_model")]
    pub digest_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            response_model: default_response_model(),
            resume_model: default_response_model(),
            digest_model: default_digest_model(),
            temperature: default_temperature(),
            max_prompt_chars: default_max_prompt_chars(),
            api_key: None,
            api_base: None,
        }
    }
}

fn default_inbound() -> AccountConfig {
    AccountConfig {
        address: String::new(),
        server: "imap.gmail.com".to_string(),
        port: 993,
        auth: None,
        password: None,
        folder: default_folder(),
        keep_unseen: false,
    }
}

fn default_outbound() -> AccountConfig {
    AccountConfig {
        address: String::new(),
        server: "smtp.googlemail.com".to_string(),
        port: 465,
        auth: None,
        password: None,
        folder: default_folder(),
        keep_unseen: false,
    }
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_redirect_uri() -> String {
    "https://oauth2.dance/".to_string()
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scope() -> String {
    "https://mail.google.com/".to_string()
}

fn default_token_dir() -> PathBuf {
    PathBuf::from(".email-assistant/tokens")
}

fn default_response_model() -> String {
    "gpt-3.5-turbo-16k".to_string()
}

fn default_digest_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_prompt_chars() -> usize {
    10_000
}

/// Account authentication resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountAuth {
    Password(String),
    OAuth2,
}

/// Runtime view of an inbound or outbound account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAccount {
    pub address: String,
    pub server: String,
    pub port: u16,
    pub auth: AccountAuth,
}

impl AccountConfig {
    /// Resolve the auth tag and secrets into a runtime account
    pub fn resolve(&self, section: &str) -> Result<MailAccount> {
        let kind = self.auth.unwrap_or_else(|| AuthKind::for_address(&self.address));
        let auth = match kind {
            AuthKind::Oauth2 => AccountAuth::OAuth2,
            AuthKind::Password => {
                let password = self.password.clone().filter(|p| !p.is_empty()).ok_or_else(|| {
                    AssistantError::ConfigError(format!(
                        "{}.password is required for password authentication",
                        section
                    ))
                })?;
                AccountAuth::Password(password)
            }
        };

        Ok(MailAccount {
            address: self.address.clone(),
            server: self.server.clone(),
            port: self.port,
            auth,
        })
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AssistantError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AssistantError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AssistantError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AssistantError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| AssistantError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Overlay secrets and overrides from the process environment
    ///
    /// Called once at startup; nothing else in the crate reads the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IMAP_SERVER") {
            self.inbound.server = v;
        }
        if let Some(v) = lookup("IMAP_USER") {
            self.inbound.address = v;
        }
        if let Some(v) = lookup("IMAP_PASS") {
            self.inbound.password = Some(v);
        }
        if let Some(v) = lookup("IMAP_KEEP_UNSEEN_ON_FETCH") {
            self.inbound.keep_unseen = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("SMTP_SERVER") {
            self.outbound.server = v;
        }
        if let Some(v) = lookup("SMTP_USER") {
            self.outbound.address = v;
        }
        if let Some(v) = lookup("SMTP_PASS") {
            self.outbound.password = Some(v);
        }
        if let Some(v) = lookup("GMAIL_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = lookup("GMAIL_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = lookup("GMAIL_REDIRECT_URI") {
            self.oauth.redirect_uri = v;
        }
        if let Some(v) = lookup("KEYS_DIR") {
            self.oauth.token_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("USER_FULLNAME") {
            self.operator.full_name = Some(v);
        }
        if let Some(v) = lookup("ME_IN_PROMPTS") {
            self.operator.identity = v;
        }
        if let Some(v) = lookup("OVERRIDE_TO") {
            self.operator.override_to = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.assistant.api_key = Some(v);
        }
    }

    /// Whether any account needs the OAuth2 flow
    pub fn uses_oauth(&self) -> bool {
        [&self.inbound, &self.outbound].iter().any(|account| {
            account.auth.unwrap_or_else(|| AuthKind::for_address(&account.address)) == AuthKind::Oauth2
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (section, account) in [("inbound", &self.inbound), ("outbound", &self.outbound)] {
            if account.address.is_empty() {
                return Err(AssistantError::ConfigError(format!(
                    "{}.address must be set",
                    section
                )));
            }
            if !account.address.contains('@') {
                return Err(AssistantError::ConfigError(format!(
                    "{}.address '{}' is not an email address",
                    section, account.address
                )));
            }
            if account.server.is_empty() {
                return Err(AssistantError::ConfigError(format!(
                    "{}.server cannot be empty",
                    section
                )));
            }
            if account.port == 0 {
                return Err(AssistantError::ConfigError(format!(
                    "{}.port must be greater than 0",
                    section
                )));
            }
            account.resolve(section)?;
        }

        if self.inbound.folder.is_empty() {
            return Err(AssistantError::ConfigError(
                "inbound.folder cannot be empty".to_string(),
            ));
        }

        if self.uses_oauth() && self.oauth.credentials_file.is_none() {
            if self.oauth.client_id.is_empty() || self.oauth.client_secret.is_empty() {
                return Err(AssistantError::ConfigError(
                    "oauth.client_id and oauth.client_secret are required for OAuth2 accounts"
                        .to_string(),
                ));
            }
        }

        if self.operator.identity.trim().is_empty() {
            return Err(AssistantError::ConfigError(
                "operator.identity cannot be empty".to_string(),
            ));
        }

        if let Some(override_to) = &self.operator.override_to {
            if !override_to.contains('@') {
                return Err(AssistantError::ConfigError(format!(
                    "operator.override_to '{}' is not an email address",
                    override_to
                )));
            }
        }

        if !(0.0..=2.0).contains(&self.assistant.temperature) {
            return Err(AssistantError::ConfigError(
                "assistant.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.assistant.max_prompt_chars == 0 {
            return Err(AssistantError::ConfigError(
                "assistant.max_prompt_chars must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.inbound.address = "me@gmail.com".to_string();
        config.outbound.address = "me@gmail.com".to_string();
        config.operator.identity = "Jane Doe, an AI engineer".to_string();
        config.operator.full_name = Some("Jane Doe".to_string());
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.inbound.address = "me@gmail.com".to_string();
        config.outbound.address = "me@gmail.com".to_string();
        config.oauth.client_id = "client-id".to_string();
        config.oauth.client_secret = "client-secret".to_string();
        config.operator.identity = "Jane Doe".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.inbound.server, "imap.gmail.com");
        assert_eq!(config.inbound.port, 993);
        assert_eq!(config.inbound.folder, "INBOX");
        assert!(!config.inbound.keep_unseen);
        assert_eq!(config.outbound.server, "smtp.googlemail.com");
        assert_eq!(config.outbound.port, 465);

        assert_eq!(config.oauth.redirect_uri, "https://oauth2.dance/");
        assert_eq!(config.oauth.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(config.oauth.scope, "https://mail.google.com/");
        assert_eq!(config.oauth.token_dir, PathBuf::from(".email-assistant/tokens"));

        assert_eq!(config.assistant.response_model, "gpt-3.5-turbo-16k");
        assert_eq!(config.assistant.digest_model, "gpt-4");
        assert_eq!(config.assistant.max_prompt_chars, 10_000);
        assert!((config.assistant.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_auth_kind_from_domain() {
        assert_eq!(AuthKind::for_address("me@gmail.com"), AuthKind::Oauth2);
        assert_eq!(AuthKind::for_address("me@GoogleMail.com"), AuthKind::Oauth2);
        assert_eq!(AuthKind::for_address("me@example.org"), AuthKind::Password);
        assert_eq!(AuthKind::for_address("not-an-address"), AuthKind::Password);
    }

    #[test]
    fn test_resolve_explicit_auth_wins() {
        let mut account = default_inbound();
        account.address = "me@gmail.com".to_string();
        account.auth = Some(AuthKind::Password);
        account.password = Some("app-password".to_string());

        let resolved = account.resolve("inbound").unwrap();
        assert_eq!(resolved.auth, AccountAuth::Password("app-password".to_string()));
    }

    #[test]
    fn test_resolve_password_required() {
        let mut account = default_outbound();
        account.address = "me@example.org".to_string();

        let result = account.resolve("outbound");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("outbound.password is required"));
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_missing_address() {
        let mut config = valid_config();
        config.inbound.address = String::new();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("inbound.address must be set"));
    }

    #[test]
    fn test_config_validation_missing_client_secret() {
        let mut config = valid_config();
        config.oauth.client_secret = String::new();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("oauth.client_id"));
    }

    #[test]
    fn test_config_validation_password_accounts_need_no_oauth() {
        let mut config = valid_config();
        config.oauth.client_id = String::new();
        config.oauth.client_secret = String::new();
        for account in [&mut config.inbound, &mut config.outbound] {
            account.address = "me@example.org".to_string();
            account.password = Some("secret".to_string());
        }
        assert!(!config.uses_oauth());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_identity() {
        let mut config = valid_config();
        config.operator.identity = "   ".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("identity cannot be empty"));
    }

    #[test]
    fn test_config_validation_bad_override() {
        let mut config = valid_config();
        config.operator.override_to = Some("nobody".to_string());
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("override_to"));
    }

    #[test]
    fn test_config_validation_temperature_range() {
        let mut config = valid_config();
        config.assistant.temperature = 2.5;
        assert!(config.validate().is_err());

        config.assistant.temperature = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = [
            ("IMAP_PASS", "imap-secret"),
            ("GMAIL_CLIENT_SECRET", "from-env"),
            ("OVERRIDE_TO", "test@example.com"),
            ("KEYS_DIR", "/tmp/keys"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.inbound.password.as_deref(), Some("imap-secret"));
        assert_eq!(config.oauth.client_secret, "from-env");
        assert_eq!(config.oauth.client_id, "client-id");
        assert_eq!(config.operator.override_to.as_deref(), Some("test@example.com"));
        assert_eq!(config.oauth.token_dir, PathBuf::from("/tmp/keys"));
    }

    #[test]
    fn test_apply_overrides_servers_and_operator() {
        let env: HashMap<&str, &str> = [
            ("IMAP_SERVER", "imap.example.com"),
            ("SMTP_SERVER", "smtp.example.com"),
            ("IMAP_KEEP_UNSEEN_ON_FETCH", "True"),
            ("USER_FULLNAME", "Jane Q. Doe"),
            ("ME_IN_PROMPTS", "Jane Doe, ML engineer"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        assert!(!config.inbound.keep_unseen);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.inbound.server, "imap.example.com");
        assert_eq!(config.outbound.server, "smtp.example.com");
        assert!(config.inbound.keep_unseen);
        assert_eq!(config.operator.full_name.as_deref(), Some("Jane Q. Doe"));
        assert_eq!(config.operator.identity, "Jane Doe, ML engineer");
    }

    #[test]
    fn test_keep_unseen_override_only_accepts_true() {
        let mut config = valid_config();
        config.inbound.keep_unseen = true;
        config.apply_overrides(|key| {
            (key == "IMAP_KEEP_UNSEEN_ON_FETCH").then(|| "yes".to_string())
        });
        assert!(!config.inbound.keep_unseen);
    }

    #[test]
    #[serial_test::serial]
    fn test_apply_env_overrides() {
        std::env::set_var("SMTP_PASS", "smtp-secret");
        std::env::set_var("OPENAI_API_KEY", "sk-test");

        let mut config = valid_config();
        config.apply_env_overrides();

        assert_eq!(config.outbound.password.as_deref(), Some("smtp-secret"));
        assert_eq!(config.assistant.api_key.as_deref(), Some("sk-test"));

        std::env::remove_var("SMTP_PASS");
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[tokio::test]
    async fn test_config_load_save_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let config = valid_config();
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.inbound.address, "me@gmail.com");
        assert_eq!(loaded.oauth.client_id, "client-id");
        assert_eq!(loaded.operator.identity, "Jane Doe");
        assert_eq!(loaded.assistant.digest_model, "gpt-4");
    }

    #[tokio::test]
    async fn test_config_load_nonexistent_returns_default() {
        let path = Path::new("/tmp/nonexistent-email-assistant-12345.toml");
        let config = Config::load(path).await.unwrap();
        assert_eq!(config.inbound.port, 993);
    }

    #[tokio::test]
    async fn test_config_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "this is not valid toml {[}]")
            .await
            .unwrap();

        let result = Config::load(temp_file.path()).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_config_partial_with_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let partial_config = r#"
[inbound]
address = "me@example.org"
server = "mail.example.org"
port = 993
auth = "password"
password = "hunter2"
keep_unseen = true

[operator]
identity = "Jane"
"#;
        tokio::fs::write(temp_file.path(), partial_config).await.unwrap();

        let config = Config::load(temp_file.path()).await.unwrap();

        assert_eq!(config.inbound.server, "mail.example.org");
        assert_eq!(config.inbound.auth, Some(AuthKind::Password));
        assert!(config.inbound.keep_unseen);
        assert_eq!(config.inbound.folder, "INBOX");
        assert_eq!(config.outbound.server, "smtp.googlemail.com");
        assert_eq!(config.assistant.response_model, "gpt-3.5-turbo-16k");
    }

    #[tokio::test]
    async fn test_config_create_example() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::create_example(path).await.unwrap();

        let config = Config::load(path).await.unwrap();
        assert_eq!(config.inbound.address, "me@gmail.com");
        assert!(config.uses_oauth());
    }
}
