use super::pkce;
use crate::config::Config;
use crate::error::{error_from_response, ErrorKind, PlaylistError, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_SCOPES: &[&str] = &[
    "playlist-read-private",
    "playlist-read-collaborative",
    "playlist-modify-private",
    "playlist-modify-public",
];

/// Body of a successful token endpoint response, for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Everything the caller must keep between sending the user to the
/// authorize URL and receiving the redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Client for the remote service's OAuth endpoints.
///
/// Confidential clients (with a secret) authenticate the token request with
/// HTTP Basic; public PKCE clients send `client_id` in the form body instead.
#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    auth_base: String,
}

impl OAuthClient {
    pub fn new(
        client_id: String,
        client_secret: Option<String>,
        redirect_uri: String,
        auth_base: String,
    ) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret: client_secret.filter(|s| !s.is_empty()),
            redirect_uri,
            auth_base: auth_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.redirect_uri.clone(),
            cfg.auth_base.clone(),
        )
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(PlaylistError::new(
                ErrorKind::MissingClientCredentials,
                "client_id is not configured",
            ));
        }
        Ok(())
    }

    /// Build the authorize URL with a fresh PKCE verifier and state.
    pub fn authorization_request(&self, scopes: &[&str]) -> Result<AuthorizationRequest> {
        self.ensure_configured()?;
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let challenge = pkce::code_challenge_s256(&code_verifier);
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base)).map_err(|e| {
            PlaylistError::new(ErrorKind::MissingClientCredentials, format!("invalid auth_base: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", &state)
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", &challenge);
        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
            code_verifier,
        })
    }

    /// Extract the authorization code from the URL the user was redirected to.
    pub fn parse_redirect(redirect_url: &str, expected_state: &str) -> Result<String> {
        let parsed = Url::parse(redirect_url.trim()).map_err(|e| {
            PlaylistError::new(ErrorKind::InvalidRequest, format!("invalid redirect url: {}", e))
        })?;
        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };

        if let Some(err) = param("error") {
            let kind = match err.as_str() {
                "access_denied" => ErrorKind::AccessDenied,
                "invalid_client" | "unauthorized_client" => ErrorKind::InvalidClient,
                "invalid_scope" => ErrorKind::InsufficientScope,
                _ => ErrorKind::InvalidRequest,
            };
            return Err(PlaylistError::new(kind, format!("authorization failed: {}", err)));
        }
        if param("state").as_deref() != Some(expected_state) {
            return Err(PlaylistError::new(
                ErrorKind::StateMismatch,
                "state in redirect does not match the authorization request",
            ));
        }
        param("code").ok_or_else(|| {
            PlaylistError::new(ErrorKind::InvalidRequest, "no code in redirect URL")
        })
    }

    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        self.ensure_configured()?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        let tr = self.token_request(&params).await?;
        info!("authorization code exchanged for tokens");
        Ok(tr)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.ensure_configured()?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let tr = self.token_request(&params).await?;
        debug!("access token refreshed, expires_in={}", tr.expires_in);
        Ok(tr)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/api/token", self.auth_base);
        let mut form: Vec<(&str, &str)> = params.to_vec();
        let mut req = self.client.post(&url);
        match &self.client_secret {
            Some(secret) => {
                let auth_header = format!(
                    "Basic {}",
                    general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, secret))
                );
                req = req.header(AUTHORIZATION, auth_header);
            }
            None => form.push(("client_id", self.client_id.as_str())),
        }
        let resp = req.form(&form).send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }
}
