//! Authentication for the Analyst gateway.
//!
//! HS256 tokens are issued at login and checked in two places: the HTTP
//! middleware (open when no secret is configured) and the WebSocket upgrade
//! (always closed without a secret). Each WebSocket channel declares which
//! [`IdentityPolicy`] it accepts.

use analyst_common::AuthConfig;
use analyst_store::{User, UserId, ANONYMOUS_USER};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (numeric user ID). `None` when absent or not a number.
    #[serde(
        default,
        deserialize_with = "lenient_user_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub sub: Option<UserId>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Accept `sub` as a JSON number (whole floats included) or a numeric
/// string. Zero and negative ids carry no identity.
fn lenient_user_id<'de, D>(deserializer: D) -> Result<Option<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let id = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(whole_id)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(id.filter(|id| *id > 0))
}

fn whole_id(f: f64) -> Option<UserId> {
    (f.fract() == 0.0 && (1.0..=i64::MAX as f64).contains(&f)).then_some(f as UserId)
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("server jwt not configured")]
    NotConfigured,

    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Authentication state shared across requests and connections.
#[derive(Clone)]
pub struct AuthState {
    secret: Option<Arc<String>>,
    pub token_expiry_secs: u64,
}

impl AuthState {
    pub fn new(secret: Option<String>, token_expiry_secs: u64) -> Self {
        Self {
            secret: secret
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(Arc::new),
            token_expiry_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.secret().map(str::to_string), config.token_expiry_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign a token for `user`.
    pub fn issue_token(&self, user: &User) -> Result<String, AuthError> {
        let secret = self.secret.as_ref().ok_or(AuthError::NotConfigured)?;
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Some(user.id),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            iat: now,
            exp: now + self.token_expiry_secs as i64,
        };

        encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(AuthError::Signing)
    }

    /// Verify signature, algorithm and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let secret = self.secret.as_ref().ok_or(AuthError::NotConfigured)?;
        let token = strip_bearer(token);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("Bearer ").unwrap_or(raw).trim()
}

// ============================================================================
// WebSocket channel auth
// ============================================================================

/// Credentials captured once at upgrade time.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub auth_header: Option<String>,
    pub query_token: Option<String>,
}

impl ConnectionContext {
    pub fn from_request(headers: &HeaderMap, query_token: Option<String>) -> Self {
        Self {
            auth_header: headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            query_token,
        }
    }

    fn token(&self, source: TokenSource) -> Option<&str> {
        let header = self.auth_header.as_deref().filter(|h| !h.trim().is_empty());
        let query = self.query_token.as_deref().filter(|q| !q.trim().is_empty());
        match source {
            TokenSource::HeaderThenQuery => header.or(query),
            TokenSource::QueryOnly => query,
        }
    }
}

/// Where a channel looks for its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    HeaderThenQuery,
    QueryOnly,
}

/// What a channel does with a valid token that names no user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Proceed with [`ANONYMOUS_USER`] as the owner.
    AllowAnonymous,
    /// Reject the connection.
    RequireIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAuth {
    pub source: TokenSource,
    pub identity: IdentityPolicy,
}

/// Agent channel: header or query token, anonymous owner allowed.
pub const AGENT_CHANNEL: ChannelAuth = ChannelAuth {
    source: TokenSource::HeaderThenQuery,
    identity: IdentityPolicy::AllowAnonymous,
};

/// Peer channel: query token only, identity required.
pub const PEER_CHANNEL: ChannelAuth = ChannelAuth {
    source: TokenSource::QueryOnly,
    identity: IdentityPolicy::RequireIdentity,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated { user_id: UserId },
    Anonymous,
    Rejected { reason: String },
}

impl AuthOutcome {
    fn rejected(err: AuthError) -> Self {
        Self::Rejected {
            reason: err.to_string(),
        }
    }

    /// Owner id to record, or `None` when rejected.
    pub fn owner(&self) -> Option<UserId> {
        match self {
            Self::Authenticated { user_id } => Some(*user_id),
            Self::Anonymous => Some(ANONYMOUS_USER),
            Self::Rejected { .. } => None,
        }
    }
}

impl AuthState {
    /// Decide whether a WebSocket connection may proceed.
    pub fn authenticate(&self, ctx: &ConnectionContext, channel: ChannelAuth) -> AuthOutcome {
        if !self.is_configured() {
            return AuthOutcome::rejected(AuthError::NotConfigured);
        }
        let Some(token) = ctx.token(channel.source) else {
            return AuthOutcome::rejected(AuthError::MissingToken);
        };

        let claims = match self.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = ?e, "WebSocket token rejected");
                return AuthOutcome::rejected(e);
            }
        };

        match (claims.sub, channel.identity) {
            (Some(user_id), _) => AuthOutcome::Authenticated { user_id },
            (None, IdentityPolicy::AllowAnonymous) => {
                tracing::warn!("Token has no numeric subject, continuing as anonymous");
                AuthOutcome::Anonymous
            }
            (None, IdentityPolicy::RequireIdentity) => AuthOutcome::Rejected {
                reason: "invalid token".into(),
            },
        }
    }
}

// ============================================================================
// HTTP middleware
// ============================================================================

/// User info extracted from authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// Authentication middleware.
///
/// Without a configured secret every request passes through and no
/// [`AuthUser`] is attached.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !auth_state.is_configured() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = auth_state
        .verify(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub.unwrap_or(ANONYMOUS_USER),
        email: claims.email,
        name: claims.name,
        role: claims.role,
    });
    Ok(next.run(request).await)
}
