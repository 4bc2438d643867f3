//! # Auth Gate
//!
//! Authenticates inbound requests against either a bearer JWT or an
//! `mcp_`-prefixed API key, and produces an [`AuthPrincipal`] the request
//! router can check scopes against.
//!
//! Deliberately not a global: an [`AuthGate`] is built once in
//! `create_server` from [`crate::config::AuthConfig`] and threaded through
//! `AppState` as an `Arc<AuthGate>`, the same way the registry and load
//! balancer are. There is no module-level `OnceLock` here — two `AuthGate`s
//! built with different secrets in the same process (as happens in tests)
//! must not be able to see each other's state.
//!
//! ## Authentication Methods
//!
//! - **API keys** — `mcp_<random>` tokens. Only a SHA-256 hash is ever
//!   stored; a stolen key list on disk can't be replayed into working keys.
//! - **Bearer JWTs** — HS256, signed with `jwt_secret`, issued by `/auth/token`
//!   after a username/password check against an argon2 password hash.

use crate::gateway_error::GatewayError;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A registered gateway operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

/// An issued API key. `key_hash` is the only thing persisted or compared
/// against — the plaintext key is shown to the caller exactly once, at
/// creation time, and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub user_id: String,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp < Utc::now()).unwrap_or(false)
    }
}

/// The authenticated identity behind a request, regardless of which
/// method (API key or JWT) produced it.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub subject: String,
    pub is_superuser: bool,
    pub scopes: Vec<String>,
}

impl AuthPrincipal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.is_superuser || self.scopes.iter().any(|s| s == scope || s == "*")
    }

    /// Admin-only routes (registration, deregistration, stats, registry
    /// listing) require a superuser principal; anyone else gets `Forbidden`.
    pub fn require_admin(&self) -> Result<(), GatewayError> {
        if self.is_superuser {
            Ok(())
        } else {
            Err(GatewayError::Forbidden { message: format!("'{}' is not an administrator", self.subject) })
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    iat: usize,
    is_superuser: bool,
}

/// Placeholder secret shipped in the default config. Auth must refuse to
/// start enabled with this value still in place.
pub const DEFAULT_JWT_SECRET: &str = "change-this-in-production";

pub struct AuthGate {
    jwt_secret: String,
    access_token_expire_minutes: i64,
    api_key_expire_days: i64,
    users_by_username: DashMap<String, User>,
    api_keys_by_hash: DashMap<String, ApiKey>,
}

impl AuthGate {
    pub fn new(jwt_secret: impl Into<String>, access_token_expire_minutes: i64, api_key_expire_days: i64) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_expire_minutes,
            api_key_expire_days,
            users_by_username: DashMap::new(),
            api_keys_by_hash: DashMap::new(),
        }
    }

    /// Refuse to come up with auth enabled and the secret still at its
    /// documented default — a mistake that would otherwise let anyone
    /// forge a valid bearer token.
    pub fn sanity_check(&self, auth_enabled: bool) -> Result<(), GatewayError> {
        if auth_enabled && self.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(GatewayError::internal(
                "auth is enabled but GATEWAY_JWT_SECRET is still the default placeholder",
            ));
        }
        Ok(())
    }

    pub fn create_user(
        &self,
        username: impl Into<String>,
        password: &str,
        is_superuser: bool,
    ) -> Result<User, GatewayError> {
        let username = username.into();
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(GatewayError::internal)?
            .to_string();

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.clone(),
            email: None,
            full_name: None,
            is_active: true,
            is_superuser,
            hashed_password,
            created_at: Utc::now(),
        };
        self.users_by_username.insert(username, user.clone());
        Ok(user)
    }

    /// Validate a username/password pair and issue a bearer JWT.
    pub fn login(&self, username: &str, password: &str) -> Result<String, GatewayError> {
        let user = self
            .users_by_username
            .get(username)
            .filter(|u| u.is_active)
            .ok_or_else(|| GatewayError::Unauthenticated { message: "invalid credentials".to_string() })?;

        let parsed_hash = PasswordHash::new(&user.hashed_password).map_err(GatewayError::internal)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| GatewayError::Unauthenticated { message: "invalid credentials".to_string() })?;

        self.issue_token(&user)
    }

    fn issue_token(&self, user: &User) -> Result<String, GatewayError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as usize;
        let exp = (Utc::now() + ChronoDuration::minutes(self.access_token_expire_minutes)).timestamp() as usize;
        let claims = Claims { sub: user.id.clone(), exp, iat: now, is_superuser: user.is_superuser };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(GatewayError::internal)
    }

    fn verify_jwt(&self, token: &str) -> Result<AuthPrincipal, GatewayError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| GatewayError::Unauthenticated { message: format!("invalid token: {e}") })?;

        Ok(AuthPrincipal { subject: data.claims.sub, is_superuser: data.claims.is_superuser, scopes: vec![] })
    }

    /// Mint a new API key for `user_id`, returning the plaintext key once.
    /// Only its hash is retained.
    pub fn issue_api_key(
        &self,
        user_id: impl Into<String>,
        name: impl Into<String>,
        scopes: Vec<String>,
    ) -> (String, ApiKey) {
        let plaintext = format!("mcp_{}", Uuid::new_v4().simple());
        let key_hash = hash_api_key(&plaintext);
        let record = ApiKey {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            scopes,
            is_active: true,
            expires_at: Some(Utc::now() + ChronoDuration::days(self.api_key_expire_days)),
            key_hash: key_hash.clone(),
            user_id: user_id.into(),
            last_used: None,
            created_at: Utc::now(),
        };
        self.api_keys_by_hash.insert(key_hash, record.clone());
        (plaintext, record)
    }

    fn verify_api_key(&self, plaintext: &str) -> Result<AuthPrincipal, GatewayError> {
        let key_hash = hash_api_key(plaintext);
        let mut record = self
            .api_keys_by_hash
            .get_mut(&key_hash)
            .ok_or_else(|| GatewayError::Unauthenticated { message: "invalid API key".to_string() })?;

        if !record.is_active || record.is_expired() {
            return Err(GatewayError::Unauthenticated { message: "API key is inactive or expired".to_string() });
        }
        record.last_used = Some(Utc::now());

        Ok(AuthPrincipal { subject: record.user_id.clone(), is_superuser: false, scopes: record.scopes.clone() })
    }

    /// Authenticate a request from its `Authorization` header, its
    /// `X-API-Key` header, or both — `X-API-Key` is checked first since
    /// it names the credential unambiguously, falling back to parsing
    /// `Authorization` if it's absent.
    ///
    /// `Authorization` accepts `Bearer <jwt>` or `ApiKey mcp_...` (a bare
    /// `mcp_`-prefixed token is also accepted for curl-friendliness,
    /// matching how API keys are documented to callers). `X-API-Key`
    /// takes the raw key with no scheme prefix.
    pub fn authenticate(
        &self,
        authorization_header: Option<&str>,
        api_key_header: Option<&str>,
    ) -> Result<AuthPrincipal, GatewayError> {
        if let Some(key) = api_key_header {
            return self.verify_api_key(key);
        }

        let header = authorization_header
            .ok_or_else(|| GatewayError::Unauthenticated { message: "missing Authorization header".to_string() })?;

        if let Some(token) = header.strip_prefix("Bearer ") {
            if token.starts_with("mcp_") {
                return self.verify_api_key(token);
            }
            return self.verify_jwt(token);
        }
        if let Some(key) = header.strip_prefix("ApiKey ") {
            return self.verify_api_key(key);
        }
        if header.starts_with("mcp_") {
            return self.verify_api_key(header);
        }

        Err(GatewayError::Unauthenticated { message: "unrecognized Authorization scheme".to_string() })
    }
}

fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("test-secret-not-the-default", 30, 30)
    }

    #[test]
    fn sanity_check_rejects_default_secret_when_enabled() {
        let gate = AuthGate::new(DEFAULT_JWT_SECRET, 30, 30);
        assert!(gate.sanity_check(true).is_err());
        assert!(gate.sanity_check(false).is_ok());
    }

    #[test]
    fn login_round_trips_through_jwt() {
        let gate = gate();
        gate.create_user("alice", "hunter2", true).unwrap();
        let token = gate.login("alice", "hunter2").unwrap();
        let principal = gate.authenticate(Some(&format!("Bearer {token}")), None).unwrap();
        assert!(principal.is_superuser);
        assert!(principal.require_admin().is_ok());
    }

    #[test]
    fn login_rejects_wrong_password() {
        let gate = gate();
        gate.create_user("alice", "hunter2", false).unwrap();
        assert!(gate.login("alice", "wrong").is_err());
    }

    #[test]
    fn api_key_round_trips_and_enforces_scope() {
        let gate = gate();
        let (plaintext, _) = gate.issue_api_key("user-1", "ci key", vec!["tools:call".to_string()]);
        let principal = gate.authenticate(Some(&plaintext), None).unwrap();
        assert!(principal.has_scope("tools:call"));
        assert!(!principal.has_scope("admin:write"));
        assert!(principal.require_admin().is_err());
    }

    #[test]
    fn x_api_key_header_is_accepted_and_takes_priority_over_authorization() {
        let gate = gate();
        let (plaintext, _) = gate.issue_api_key("user-1", "ci key", vec!["tools:call".to_string()]);
        // A garbage Authorization header is present but must be ignored
        // since X-API-Key is supplied.
        let principal = gate.authenticate(Some("Bearer not-a-real-token"), Some(&plaintext)).unwrap();
        assert!(principal.has_scope("tools:call"));
    }

    #[test]
    fn unknown_api_key_is_rejected() {
        let gate = gate();
        assert!(gate.authenticate(Some("mcp_not_a_real_key"), None).is_err());
    }

    #[test]
    fn missing_both_headers_is_rejected() {
        let gate = gate();
        assert!(gate.authenticate(None, None).is_err());
    }
}
