use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::Unauthorized;

pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const ACCEPTED_ALGORITHMS: [Algorithm; 8] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: Option<String>,
    pub leeway_secs: u64,
    pub cache_ttl: Duration,
}

impl AuthConfig {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_url: None,
            leeway_secs: 0,
            cache_ttl: JWKS_CACHE_TTL,
        }
    }

    /// Explicit key-set URL, or the issuer's well-known location.
    pub fn resolved_jwks_url(&self) -> String {
        self.jwks_url.clone().unwrap_or_else(|| {
            format!("{}/.well-known/jwks.json", self.issuer.trim_end_matches('/'))
        })
    }
}

/// Identity proven by a verified bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub issuer: String,
    pub scope: Option<String>,
    pub claims: Value,
}

/// Why a token was rejected. Logged, never returned to the client.
#[derive(Debug, thiserror::Error)]
enum AuthFailure {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("authorization scheme is not Bearer")]
    WrongScheme,
    #[error("empty bearer token")]
    EmptyToken,
    #[error("malformed token header: {0}")]
    MalformedHeader(jsonwebtoken::errors::Error),
    #[error("token header has no kid")]
    MissingKid,
    #[error("algorithm {0:?} is not accepted")]
    UnsupportedAlgorithm(Algorithm),
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
    #[error("no key with kid {0}")]
    UnknownKid(String),
    #[error("unusable key {kid}: {source}")]
    InvalidKey {
        kid: String,
        source: jsonwebtoken::errors::Error,
    },
    #[error("token rejected: {0}")]
    Rejected(jsonwebtoken::errors::Error),
    #[error("token has no subject")]
    MissingSubject,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies bearer JWTs against the issuer's published key set.
pub struct BearerVerifier {
    config: AuthConfig,
    jwks_url: String,
    http: reqwest::Client,
    keys: ArcSwapOption<CachedKeys>,
    /// Serializes key-set fetches; holds the time of the last forced refresh.
    fetch_lock: Mutex<Option<Instant>>,
}

impl BearerVerifier {
    pub fn new(config: AuthConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(JWKS_FETCH_TIMEOUT)
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            jwks_url: config.resolved_jwks_url(),
            config,
            http,
            keys: ArcSwapOption::empty(),
            fetch_lock: Mutex::new(None),
        })
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Verify an `Authorization` header value. Every failure looks the same
    /// to the caller.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<Principal, Unauthorized> {
        match self.verify_token(authorization).await {
            Ok(principal) => Ok(principal),
            Err(failure) => {
                tracing::debug!(
                    token = %authorization.map(fingerprint).unwrap_or_else(|| "-".into()),
                    "Bearer token rejected: {failure}"
                );
                Err(Unauthorized)
            }
        }
    }

    async fn verify_token(&self, authorization: Option<&str>) -> Result<Principal, AuthFailure> {
        let raw = authorization.ok_or(AuthFailure::MissingHeader)?;
        let token = raw
            .strip_prefix("Bearer ")
            .ok_or(AuthFailure::WrongScheme)?
            .trim();
        if token.is_empty() {
            return Err(AuthFailure::EmptyToken);
        }

        let header = decode_header(token).map_err(AuthFailure::MalformedHeader)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthFailure::UnsupportedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(AuthFailure::MissingKid)?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway_secs;

        let data = decode::<Value>(token, &key, &validation).map_err(AuthFailure::Rejected)?;
        principal_from_claims(data.claims)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthFailure> {
        let cached = self.current_keys().await?;
        let keys = match cached.keys.find(kid) {
            Some(_) => cached,
            None => self.refresh_for_unknown_kid().await?,
        };
        let jwk = keys
            .keys
            .find(kid)
            .ok_or_else(|| AuthFailure::UnknownKid(kid.to_string()))?;
        DecodingKey::from_jwk(jwk).map_err(|source| AuthFailure::InvalidKey {
            kid: kid.to_string(),
            source,
        })
    }

    /// Cached key set, fetching when absent or stale. Concurrent callers
    /// share one fetch.
    async fn current_keys(&self) -> Result<Arc<CachedKeys>, AuthFailure> {
        if let Some(cached) = self.fresh_keys() {
            return Ok(cached);
        }
        let _guard = self.fetch_lock.lock().await;
        if let Some(cached) = self.fresh_keys() {
            return Ok(cached);
        }
        self.fetch_and_store().await
    }

    /// Unknown kid: refetch at most once per `FORCED_REFRESH_INTERVAL`.
    async fn refresh_for_unknown_kid(&self) -> Result<Arc<CachedKeys>, AuthFailure> {
        let mut last_forced = self.fetch_lock.lock().await;
        let recently = last_forced
            .map(|at| at.elapsed() < FORCED_REFRESH_INTERVAL)
            .unwrap_or(false);
        if recently {
            return self
                .keys
                .load_full()
                .ok_or_else(|| AuthFailure::KeySetUnavailable("no cached key set".into()));
        }
        *last_forced = Some(Instant::now());
        self.fetch_and_store().await
    }

    fn fresh_keys(&self) -> Option<Arc<CachedKeys>> {
        self.keys
            .load_full()
            .filter(|cached| cached.fetched_at.elapsed() < self.config.cache_ttl)
    }

    async fn fetch_and_store(&self) -> Result<Arc<CachedKeys>, AuthFailure> {
        tracing::debug!("Fetching key set from {}", self.jwks_url);
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|err| AuthFailure::KeySetUnavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AuthFailure::KeySetUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|err| AuthFailure::KeySetUnavailable(err.to_string()))?;
        let cached = Arc::new(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        self.keys.store(Some(cached.clone()));
        Ok(cached)
    }
}

fn principal_from_claims(claims: Value) -> Result<Principal, AuthFailure> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|sub| !sub.is_empty())
        .ok_or(AuthFailure::MissingSubject)?
        .to_string();
    let issuer = claims
        .get("iss")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let scope = match claims.get("scope").or_else(|| claims.get("scp")) {
        Some(Value::String(scope)) => Some(scope.clone()),
        Some(Value::Array(scopes)) => Some(
            scopes
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    };
    Ok(Principal {
        subject,
        issuer,
        scope,
        claims,
    })
}

/// Short stable digest of a credential, safe for logs.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest[..6]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
