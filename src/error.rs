use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed taxonomy of failures surfaced by the credential manager, the remote
/// playlist adapter and the synchronizer's mutation paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401 where the service says the token expired; refresh and retry once.
    TokenExpired,
    /// 401 for any other reason; the user must authorize again.
    TokenInvalid,
    /// No credential stored yet.
    NoCredential,
    AccessDenied,
    InvalidClient,
    /// OAuth `state` did not round-trip; the authorization attempt should be restarted.
    StateMismatch,
    InvalidRequest,
    /// Refresh token rejected by the token endpoint.
    InvalidGrant,
    InsufficientScope,
    UserNotRegistered,
    RateLimited { retry_after: Option<Duration> },
    MissingClientCredentials,
    RedirectUriMismatch,
    Network,
    Timeout,
    Server,
    NotFound,
    Decode,
    Storage,
    /// No playlist is loaded into the synchronizer.
    NotConnected,
}

/// What a caller (usually the UI) should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    Retry,
    RetryAfter(Duration),
    RefreshAndRetry,
    Reauthorize,
    RestartAuthorization,
    FixConfiguration,
    ReloadPlaylist,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::TokenInvalid => "token_invalid",
            ErrorKind::NoCredential => "no_credential",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidClient => "invalid_client",
            ErrorKind::StateMismatch => "state_mismatch",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidGrant => "invalid_grant",
            ErrorKind::InsufficientScope => "insufficient_scope",
            ErrorKind::UserNotRegistered => "user_not_registered",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::MissingClientCredentials => "missing_client_credentials",
            ErrorKind::RedirectUriMismatch => "redirect_uri_mismatch",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Server => "server",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Decode => "decode",
            ErrorKind::Storage => "storage",
            ErrorKind::NotConnected => "not_connected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PlaylistError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T, E = PlaylistError> = std::result::Result<T, E>;

impl PlaylistError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TokenExpired
                | ErrorKind::StateMismatch
                | ErrorKind::RateLimited { .. }
                | ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::Server
        )
    }

    pub fn action(&self) -> RecoveryAction {
        match &self.kind {
            ErrorKind::TokenExpired => RecoveryAction::RefreshAndRetry,
            ErrorKind::TokenInvalid
            | ErrorKind::NoCredential
            | ErrorKind::InvalidGrant
            | ErrorKind::AccessDenied
            | ErrorKind::InsufficientScope => RecoveryAction::Reauthorize,
            ErrorKind::StateMismatch => RecoveryAction::RestartAuthorization,
            ErrorKind::InvalidClient
            | ErrorKind::MissingClientCredentials
            | ErrorKind::RedirectUriMismatch
            | ErrorKind::UserNotRegistered => RecoveryAction::FixConfiguration,
            ErrorKind::RateLimited { retry_after } => match retry_after {
                Some(d) => RecoveryAction::RetryAfter(*d),
                None => RecoveryAction::Retry,
            },
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server => RecoveryAction::Retry,
            ErrorKind::NotFound | ErrorKind::NotConnected => RecoveryAction::ReloadPlaylist,
            ErrorKind::InvalidRequest | ErrorKind::Decode | ErrorKind::Storage => {
                RecoveryAction::None
            }
        }
    }

    /// Short text suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::TokenExpired => "Your session expired. Retrying with a fresh token.",
            ErrorKind::TokenInvalid | ErrorKind::InvalidGrant | ErrorKind::NoCredential => {
                "The playlist connection needs to be authorized again."
            }
            ErrorKind::AccessDenied => "Access to the playlist service was denied.",
            ErrorKind::InvalidClient | ErrorKind::MissingClientCredentials => {
                "The playlist service client is not configured correctly."
            }
            ErrorKind::RedirectUriMismatch => {
                "The configured redirect URI does not match the registered one."
            }
            ErrorKind::StateMismatch => "Authorization could not be verified. Please try again.",
            ErrorKind::InvalidRequest => "The playlist service rejected the request.",
            ErrorKind::InsufficientScope => {
                "The connection lacks permission to edit this playlist. Please reconnect."
            }
            ErrorKind::UserNotRegistered => {
                "This account is not registered with the playlist application."
            }
            ErrorKind::RateLimited { .. } => "Too many requests. Please wait a moment.",
            ErrorKind::Network | ErrorKind::Server => {
                "Could not reach the playlist service. Please try again."
            }
            ErrorKind::Timeout => "The playlist service took too long to respond.",
            ErrorKind::NotFound => "The playlist or track no longer exists.",
            ErrorKind::Decode => "The playlist service sent an unexpected response.",
            ErrorKind::Storage => "Local storage failed.",
            ErrorKind::NotConnected => "No playlist is connected.",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlaylistError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_decode() {
            ErrorKind::Decode
        } else {
            ErrorKind::Network
        };
        PlaylistError::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for PlaylistError {
    fn from(e: serde_json::Error) -> Self {
        PlaylistError::new(ErrorKind::Decode, e.to_string())
    }
}

/// Drain a failed response into a `PlaylistError`, honouring `Retry-After`.
pub async fn error_from_response(resp: reqwest::Response) -> PlaylistError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = resp.text().await.unwrap_or_default();
    classify_response(status, retry_after.as_deref(), &body)
}

/// Map a non-success HTTP response to the taxonomy.
///
/// Understands both the OAuth error shape (`{"error": "invalid_grant",
/// "error_description": ...}`) and the Web API shape
/// (`{"error": {"status": 401, "message": ...}}`).
pub fn classify_response(status: StatusCode, retry_after: Option<&str>, body: &str) -> PlaylistError {
    let json: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let oauth_code = json["error"].as_str().unwrap_or("").to_ascii_lowercase();
    let description = json["error_description"]
        .as_str()
        .or_else(|| json["error"]["message"].as_str())
        .unwrap_or("")
        .to_string();
    let lowered = description.to_ascii_lowercase();
    let message = if description.is_empty() {
        format!("{} => {}", status, body)
    } else {
        format!("{} => {}", status, description)
    };

    if !oauth_code.is_empty() {
        let kind = match oauth_code.as_str() {
            "invalid_grant" => Some(ErrorKind::InvalidGrant),
            "invalid_client" | "unauthorized_client" => Some(ErrorKind::InvalidClient),
            "access_denied" => Some(ErrorKind::AccessDenied),
            "invalid_scope" => Some(ErrorKind::InsufficientScope),
            "invalid_request" if lowered.contains("redirect") => {
                Some(ErrorKind::RedirectUriMismatch)
            }
            "invalid_request" => Some(ErrorKind::InvalidRequest),
            _ => None,
        };
        if let Some(kind) = kind {
            return PlaylistError::new(kind, message);
        }
    }

    let kind = match status.as_u16() {
        401 if lowered.contains("expired") => ErrorKind::TokenExpired,
        401 => ErrorKind::TokenInvalid,
        403 if lowered.contains("not be registered") || lowered.contains("not registered") => {
            ErrorKind::UserNotRegistered
        }
        403 => ErrorKind::InsufficientScope,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited {
            retry_after: retry_after
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        s if s >= 500 => ErrorKind::Server,
        _ => ErrorKind::InvalidRequest,
    };
    PlaylistError::new(kind, message)
}
