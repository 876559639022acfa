use async_trait::async_trait;
use http::HeaderValue;
use http::header::USER_AGENT;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

pub mod score;

pub use score::{ScoreParseErr, ScoreRecord};

pub const CRYPTOHACK_BASE_URL: &str = "https://cryptohack.org";

/// Substring the userscore endpoint includes in its body when a lookup fails
pub const LOOKUP_FAILED_MARKER: &str = "failed";

const TOKEN_STRIPPED_CHARS: [char; 3] = ['/', '.', '%'];

/// Operations consumed from the remote CryptoHack service.
#[async_trait]
pub trait ScoreApi: Send + Sync {
    /// Redeems a one-time account token for the CryptoHack username it belongs to.
    async fn resolve_identity(&self, token: &str) -> CryptoHackResult<String>;

    /// Fetches and parses the current score of a CryptoHack user.
    async fn fetch_score(&self, username: &str) -> CryptoHackResult<ScoreRecord>;

    /// Public profile page of a CryptoHack user.
    fn profile_url(&self, username: &str) -> String;
}

/// Strips characters that could move a token out of its URL path segment.
pub fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| !TOKEN_STRIPPED_CHARS.contains(c))
        .collect()
}

#[derive(Debug, Clone)]
pub struct CryptoHack {
    client: reqwest::Client,
    /// Always usable as a base for path segments; checked in [`CryptoHack::new`]
    base_url: Url,
}

impl CryptoHack {
    pub fn new(base_url: &str) -> CryptoHackResult<Self> {
        let user_agent = HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));

        let mut headers = http::HeaderMap::new();
        headers.insert(USER_AGENT, user_agent);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let parsed = Url::parse(base_url)
            .map_err(|e| CryptoHackErr::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(CryptoHackErr::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }

    pub fn token_uri(&self, token: &str) -> Url {
        self.endpoint(&["discord_token", &sanitize_token(token), ""])
    }

    pub fn userscore_uri(&self) -> Url {
        self.endpoint(&["wechall", "userscore", ""])
    }

    /// Raw userscore body for `username`, rejected early if it carries the failure marker.
    #[instrument(skip(self))]
    async fn fetch_raw_score(&self, username: &str) -> CryptoHackResult<String> {
        let res = self
            .client
            .get(self.userscore_uri())
            .query(&[("username", username)])
            .send()
            .await?;

        tracing::debug!(status = %res.status(), "userscore response");
        let body = res.text().await?;

        if body.contains(LOOKUP_FAILED_MARKER) {
            tracing::warn!(username, body = %body, "userscore lookup failed");
            return Err(CryptoHackErr::LookupFailed(username.to_string()));
        }

        Ok(body)
    }
}

#[async_trait]
impl ScoreApi for CryptoHack {
    #[instrument(skip(self, token))]
    async fn resolve_identity(&self, token: &str) -> CryptoHackResult<String> {
        if sanitize_token(token).is_empty() {
            return Err(CryptoHackErr::TokenRejected(
                "token is empty once sanitized".to_string(),
            ));
        }

        let res = self.client.get(self.token_uri(token)).send().await?;
        tracing::debug!(status = %res.status(), "token redemption response");

        match res.json::<TokenResponse>().await? {
            TokenResponse::Rejected { error } => {
                tracing::warn!(reason = %error, "token rejected by cryptohack");
                Err(CryptoHackErr::TokenRejected(error))
            }
            TokenResponse::Linked { user } => {
                tracing::info!(cryptohack_user = %user, "token redeemed");
                Ok(user)
            }
        }
    }

    #[instrument(skip(self))]
    async fn fetch_score(&self, username: &str) -> CryptoHackResult<ScoreRecord> {
        let raw = self.fetch_raw_score(username).await?;
        ScoreRecord::parse(&raw).map_err(|e| {
            tracing::error!(error = %e, raw = %raw, "malformed userscore response");
            CryptoHackErr::MalformedScore(e)
        })
    }

    fn profile_url(&self, username: &str) -> String {
        self.endpoint(&["user", username, ""]).into()
    }
}

/// Body of `/discord_token/{token}/`; an `error` field wins over a `user` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Rejected { error: String },
    Linked { user: String },
}

pub type CryptoHackResult<T> = core::result::Result<T, CryptoHackErr>;

#[derive(Debug, Error)]
pub enum CryptoHackErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("cryptohack rejected the token: {0}")]
    TokenRejected(String),

    #[error("cryptohack score lookup failed for '{0}'")]
    LookupFailed(String),

    #[error("malformed userscore response: {0}")]
    MalformedScore(#[from] ScoreParseErr),

    #[error("invalid cryptohack base url: {0}")]
    InvalidBaseUrl(String),
}

impl CryptoHackErr {
    /// Failures that came from talking to CryptoHack, as opposed to bad data or bad config.
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            CryptoHackErr::MalformedScore(_) | CryptoHackErr::InvalidBaseUrl(_)
        )
    }
}
