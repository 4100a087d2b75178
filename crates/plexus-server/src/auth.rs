//! Bearer-token identity resolution.
//!
//! Resolvers never fail across the boundary: a token that cannot be
//! resolved, for whatever reason, is logged and yields `None`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use plexus_core::ConnectionInfo;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IdentityConfig;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<ConnectionInfo>;
}

/// Build the resolver described by `config`.
pub fn resolver_from_config(config: &IdentityConfig) -> Arc<dyn IdentityResolver> {
    match config {
        IdentityConfig::Static { tokens } => Arc::new(StaticIdentityResolver::new(tokens.clone())),
        IdentityConfig::Jwt { secret } => Arc::new(JwtIdentityResolver::new(secret.as_bytes())),
        IdentityConfig::Http { url } => Arc::new(HttpIdentityResolver::new(url.clone())),
    }
}

/// Fixed token table.
#[derive(Default)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, ConnectionInfo>,
}

impl StaticIdentityResolver {
    pub fn new(tokens: HashMap<String, ConnectionInfo>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, info: ConnectionInfo) -> Self {
        let _ = self.tokens.insert(token.into(), info);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &str) -> Option<ConnectionInfo> {
        let info = self.tokens.get(token).cloned();
        if info.is_none() {
            debug!("unknown static token");
        }
        info
    }
}

/// HS256 tokens whose claims carry `workspace`, `personalWorkspace` and
/// `socialId`. `exp` is checked when present.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, token: &str) -> Option<ConnectionInfo> {
        match jsonwebtoken::decode::<ConnectionInfo>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                warn!(error = %e, "rejected jwt");
                None
            }
        }
    }
}

/// Accounts service lookup: `POST url` with `Authorization: Bearer <token>`.
///
/// The body may be the identity itself or wrapped as `{"result": ...}`.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AccountsReply {
    Wrapped { result: ConnectionInfo },
    Bare(ConnectionInfo),
}

impl HttpIdentityResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, token: &str) -> Option<ConnectionInfo> {
        let resp = match self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "method": "getLoginInfoByToken", "params": [] }))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %self.url, error = %e, "accounts service unreachable");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "accounts service refused token");
            return None;
        }

        match resp.json::<AccountsReply>().await {
            Ok(AccountsReply::Wrapped { result }) => Some(result),
            Ok(AccountsReply::Bare(info)) => Some(info),
            Err(e) => {
                warn!(url = %self.url, error = %e, "unreadable accounts reply");
                None
            }
        }
    }
}
