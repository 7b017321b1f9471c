use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, CRM_SCOPE, TOKEN_EXPIRY_MARGIN_SECS};
use crate::error::{AppError, Result};

/// OAuth tokens as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds after which `access_token` must be refreshed.
    #[serde(default)]
    pub expiry_time: i64,
}

impl OAuthTokens {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs + TOKEN_EXPIRY_MARGIN_SECS >= self.expiry_time
    }
}

/// Token endpoint response. Refresh responses omit `refresh_token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
    error: Option<String>,
}

/// JSON file holding the current tokens.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<OAuthTokens>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, tokens: &OAuthTokens) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(tokens)?).await?;
        Ok(())
    }
}

/// Authorization-code + refresh-token flow against the CRM's accounts server.
pub struct CrmAuth {
    http: reqwest::Client,
    accounts_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    store: TokenStore,
    cached: Mutex<Option<OAuthTokens>>,
}

impl CrmAuth {
    pub fn new(cfg: &Config, http: reqwest::Client) -> Self {
        Self {
            http,
            accounts_url: cfg.crm_accounts_url.trim_end_matches('/').to_string(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
            store: TokenStore::new(&cfg.token_path),
            cached: Mutex::new(None),
        }
    }

    /// Consent URL the operator visits once to grant offline access.
    pub fn authorization_url(&self) -> Result<String> {
        let base = format!("{}/auth", self.accounts_url);
        let url = reqwest::Url::parse_with_params(
            &base,
            &[
                ("client_id", self.client_id.as_str()),
                ("scope", CRM_SCOPE),
                ("response_type", "code"),
                ("access_type", "offline"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| AppError::Config(format!("invalid CRM accounts URL {base:?}: {e}")))?;
        Ok(url.into())
    }

    /// Trade the callback `code` for tokens and persist them.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let resp = self.request_token(&params).await?;
        let access_token = resp
            .access_token
            .ok_or_else(|| AppError::Auth("token response had no access_token".to_string()))?;

        let tokens = OAuthTokens {
            access_token,
            refresh_token: resp.refresh_token,
            expiry_time: now_secs() + resp.expires_in,
        };
        self.store.save(&tokens).await?;
        *self.cached.lock().await = Some(tokens.clone());
        info!(path = %self.store.path().display(), "CRM tokens saved");
        Ok(tokens)
    }

    /// A valid access token, refreshing it first if it has expired.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load().await?;
        }
        let tokens = cached
            .as_ref()
            .ok_or_else(|| AppError::Auth("no CRM tokens found, authorize via /auth/url first".to_string()))?;

        if !tokens.is_expired(now_secs()) {
            return Ok(tokens.access_token.clone());
        }

        let refreshed = self.refresh_tokens(tokens).await?;
        let access_token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access_token)
    }

    /// Force a refresh regardless of expiry.
    pub async fn refresh(&self) -> Result<OAuthTokens> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load().await?;
        }
        let tokens = cached
            .as_ref()
            .ok_or_else(|| AppError::Auth("no CRM tokens to refresh".to_string()))?;
        let refreshed = self.refresh_tokens(tokens).await?;
        *cached = Some(refreshed.clone());
        Ok(refreshed)
    }

    async fn refresh_tokens(&self, current: &OAuthTokens) -> Result<OAuthTokens> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AppError::Auth("stored tokens have no refresh_token".to_string()))?;
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let resp = self.request_token(&params).await?;
        let access_token = resp
            .access_token
            .ok_or_else(|| AppError::Auth("refresh response had no access_token".to_string()))?;

        let tokens = OAuthTokens {
            access_token,
            refresh_token: resp.refresh_token.or_else(|| current.refresh_token.clone()),
            expiry_time: now_secs() + resp.expires_in,
        };
        if let Err(e) = self.store.save(&tokens).await {
            warn!("Failed to persist refreshed CRM tokens: {e}");
        }
        info!("CRM access token refreshed");
        Ok(tokens)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/token", self.accounts_url);
        let resp: TokenResponse = self.http.post(&url).form(params).send().await?.json().await?;
        if let Some(err) = resp.error.as_deref() {
            return Err(AppError::Auth(format!("token endpoint returned {err}")));
        }
        Ok(resp)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulse-{}-{name}", std::process::id()))
    }

    #[test]
    fn expiry_respects_margin() {
        let tokens = OAuthTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expiry_time: 1_000,
        };
        assert!(!tokens.is_expired(1_000 - TOKEN_EXPIRY_MARGIN_SECS - 1));
        assert!(tokens.is_expired(1_000 - TOKEN_EXPIRY_MARGIN_SECS));
        assert!(tokens.is_expired(2_000));
    }

    #[tokio::test]
    async fn store_round_trips_and_reports_missing() {
        let dir = temp_path("tokens");
        let store = TokenStore::new(dir.join("nested").join("tokens.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let tokens = OAuthTokens {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expiry_time: 42,
        };
        store.save(&tokens).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(tokens));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn authorization_url_carries_client_and_scope() {
        let cfg = Config {
            crm_accounts_url: "https://accounts.example/oauth/v2/".to_string(),
            client_id: "cid".to_string(),
            ..Config::for_tests()
        };
        let auth = CrmAuth::new(&cfg, reqwest::Client::new());
        let url = auth.authorization_url().unwrap();
        assert!(url.starts_with("https://accounts.example/oauth/v2/auth?client_id=cid&"));
        assert!(url.contains("scope=ZohoBigin.modules.ALL%2CZohoBigin.settings.ALL"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains("test-secret"));
    }

    #[test]
    fn authorization_url_encodes_redirect_uri() {
        let cfg = Config {
            redirect_uri: "http://localhost:8000/auth/callback?next=/metrics&x=1".to_string(),
            ..Config::for_tests()
        };
        let url = CrmAuth::new(&cfg, reqwest::Client::new()).authorization_url().unwrap();
        assert!(url.ends_with(
            "redirect_uri=http%3A%2F%2Flocalhost%3A8000%2Fauth%2Fcallback%3Fnext%3D%2Fmetrics%26x%3D1"
        ));

        let parsed = reqwest::Url::parse(&url).unwrap();
        let redirect = parsed
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned());
        assert_eq!(redirect.as_deref(), Some(cfg.redirect_uri.as_str()));
    }

    #[test]
    fn bad_accounts_url_is_config_error() {
        let cfg = Config {
            crm_accounts_url: "not a url".to_string(),
            ..Config::for_tests()
        };
        let auth = CrmAuth::new(&cfg, reqwest::Client::new());
        assert!(matches!(auth.authorization_url(), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn access_token_without_tokens_is_auth_error() {
        let auth = CrmAuth::new(&Config::for_tests(), reqwest::Client::new());
        assert!(matches!(auth.access_token().await, Err(AppError::Auth(_))));
    }
}
