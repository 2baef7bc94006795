//! Bearer-token authentication and per-route-group permission checks.

use anyhow::Result;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::TARGET_WEB_REQUEST;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Classify,
    CompaniesRead,
    CompaniesAdmin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Classify => "veriaidpo.classify",
            Permission::CompaniesRead => "companies.read",
            Permission::CompaniesAdmin => "companies.admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents the claims stored in a JWT token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl Claims {
    /// `companies.admin` implies `companies.read`.
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions.iter().any(|held| {
            held == permission.as_str()
                || (permission == Permission::CompaniesRead
                    && held == Permission::CompaniesAdmin.as_str())
        })
    }
}

/// HS256 key pair for issuing and validating tokens.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        JwtKeys {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Random 256-bit secret; tokens do not survive a restart.
    pub fn random() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key_bytes = vec![0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate secure random bytes"))?;
        Ok(Self::from_secret(&key_bytes))
    }

    pub fn from_settings(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(secret) => Ok(Self::from_secret(secret.as_bytes())),
            None => {
                warn!(target: TARGET_WEB_REQUEST, "JWT_SECRET not set, using a random signing key");
                Self::random()
            }
        }
    }

    pub fn issue(
        &self,
        sub: &str,
        permissions: &[Permission],
        tenant_id: Option<&str>,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
            permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
            tenant_id: tenant_id.map(str::to_string),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
    }
}

/// Middleware state: the keys plus the permission a route group requires.
#[derive(Clone)]
pub struct PermissionGuard {
    keys: Arc<JwtKeys>,
    required: Permission,
}

impl PermissionGuard {
    pub fn new(keys: &Arc<JwtKeys>, required: Permission) -> Self {
        PermissionGuard {
            keys: Arc::clone(keys),
            required,
        }
    }
}

/// Rejects the request with 403 unless it carries a valid token granting
/// the group's permission. Verified claims are added to the request
/// extensions.
pub async fn authorize(
    State(guard): State<PermissionGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>() else {
        warn!(target: TARGET_WEB_REQUEST, "Rejected unauthenticated request to {}", path);
        return Err(ApiError::Unauthenticated);
    };

    let claims = guard.keys.verify(bearer.token()).map_err(|e| {
        warn!(target: TARGET_WEB_REQUEST, "JWT validation failed for {}: {}", path, e);
        ApiError::Unauthenticated
    })?;

    if !claims.grants(guard.required) {
        warn!(
            target: TARGET_WEB_REQUEST,
            "{} lacks {} for {}", claims.sub, guard.required, path
        );
        return Err(ApiError::Forbidden(guard.required));
    }

    debug!(
        target: TARGET_WEB_REQUEST,
        "Authorized {} (tenant {:?}) for {}", claims.sub, claims.tenant_id, path
    );
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_implies_read() {
        let claims = Claims {
            sub: "ops".to_string(),
            exp: 0,
            permissions: vec!["companies.admin".to_string()],
            tenant_id: None,
        };
        assert!(claims.grants(Permission::CompaniesAdmin));
        assert!(claims.grants(Permission::CompaniesRead));
        assert!(!claims.grants(Permission::Classify));
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = JwtKeys::from_secret(b"unit-test-secret");
        let token = keys
            .issue(
                "analyst",
                &[Permission::Classify],
                Some("tenant-1"),
                chrono::Duration::hours(1),
            )
            .unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "analyst");
        assert_eq!(claims.permissions, vec!["veriaidpo.classify"]);
        assert_eq!(claims.tenant_id.as_deref(), Some("tenant-1"));

        let other = JwtKeys::random().unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = JwtKeys::from_secret(b"unit-test-secret");
        let token = keys
            .issue("late", &[Permission::Classify], None, chrono::Duration::hours(-2))
            .unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
