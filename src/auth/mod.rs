//! Authentication facade: maps `Authorization` headers to a caller
//! context and mints bearer tokens.
//!
//! Two header schemes are understood. `Basic` credentials are checked
//! against the configured admin table and yield admin mode (no context,
//! no access checks). `Bearer` tokens are looked up in the token model
//! and yield a [`Context`] carrying the token's user, projected to the
//! configured user fields.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AuthConfig;
use crate::context::Context;
use crate::storage::Storage;
use crate::{Error, Result};

pub mod password;

/// Bytes of entropy in a bearer token.
const TOKEN_LEN: usize = 32;

/// Body of a `POST /token` request.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// Must be `password`.
    pub grant_type: String,
    /// Login name, matched against the configured username field.
    pub username: String,
    /// Plaintext password.
    pub password: String,
}

/// Body of a successful `POST /token` response.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Always `bearer`.
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

/// Maps inbound credentials to contexts and issues tokens.
pub struct Authenticator {
    storage: Arc<Storage>,
    config: AuthConfig,
}

impl Authenticator {
    /// Bind the facade to storage and its configuration.
    #[must_use]
    pub fn new(storage: Arc<Storage>, config: AuthConfig) -> Self {
        Self { storage, config }
    }

    /// Resolve an `Authorization` header into a caller identity.
    ///
    /// `Ok(None)` is admin mode (valid Basic credentials); `Ok(Some)`
    /// carries the token's user. Anything else is
    /// [`Error::InvalidCredentials`].
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Option<Context>> {
        let header = header.ok_or(Error::InvalidCredentials)?;
        if let Some(encoded) = header.strip_prefix("Basic ") {
            return self.authenticate_basic(encoded).map(|()| None);
        }
        if let Some(token) = header.strip_prefix("Bearer ") {
            return self.authenticate_bearer(token).await.map(Some);
        }
        Err(Error::InvalidCredentials)
    }

    fn authenticate_basic(&self, encoded: &str) -> Result<()> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| Error::InvalidCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| Error::InvalidCredentials)?;
        let (username, plaintext) = decoded
            .split_once(':')
            .ok_or(Error::InvalidCredentials)?;

        let hashed = self
            .config
            .admins
            .get(username)
            .ok_or(Error::InvalidCredentials)?;
        if password::is_valid(hashed, plaintext) {
            debug!(admin = %username, "Basic authentication succeeded");
            Ok(())
        } else {
            Err(Error::InvalidCredentials)
        }
    }

    async fn authenticate_bearer(&self, token: &str) -> Result<Context> {
        let query = format!("{{tokens: list{}(token: ?)}}", self.config.token_model);
        let found = self
            .storage
            .query(&query, None, Some(&json!([token])))
            .await?;
        let record = found["tokens"]
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .ok_or(Error::InvalidCredentials)?;

        if let Some(expires_at) = record.get("expiresAt").and_then(Value::as_i64) {
            if Utc::now().timestamp() >= expires_at {
                return Err(Error::InvalidCredentials);
            }
        }

        let user_id = record
            .get("userId")
            .cloned()
            .ok_or(Error::InvalidCredentials)?;
        let selection = self.config.user_fields.join(" ");
        let query = format!(
            "{{user: {}(id: ?) {{ {selection} }}}}",
            self.config.user_model
        );
        let found = self
            .storage
            .query(&query, None, Some(&json!([user_id])))
            .await?;
        let user = found["user"].clone();
        if user.is_null() {
            return Err(Error::InvalidCredentials);
        }
        Ok(Context::new(user))
    }

    /// Exchange a password grant for a fresh bearer token.
    pub async fn issue_token(&self, grant: &GrantRequest) -> Result<TokenResponse> {
        if grant.grant_type != "password" {
            return Err(Error::InvalidGrant(format!(
                "unsupported grant type '{}'",
                grant.grant_type
            )));
        }
        if grant.username.is_empty() || grant.password.is_empty() {
            return Err(Error::InvalidGrant(
                "username and password are required".to_string(),
            ));
        }

        let query = format!(
            "{{users: list{}({}: ?)}}",
            self.config.user_model, self.config.username_field
        );
        let found = self
            .storage
            .query(&query, None, Some(&json!([grant.username])))
            .await?;
        let user = found["users"]
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .ok_or(Error::InvalidCredentials)?;

        let hashed = user
            .get("password")
            .and_then(Value::as_str)
            .ok_or(Error::InvalidCredentials)?;
        if !password::is_valid(hashed, &grant.password) {
            return Err(Error::InvalidCredentials);
        }

        let mut raw = [0u8; TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = BASE64_URL.encode(raw);
        let expires_at = Utc::now().timestamp() + self.config.token_ttl_secs as i64;

        let query = format!(
            "{{token: create{}(token: ?, userId: ?, expiresAt: ?)}}",
            self.config.token_model
        );
        self.storage
            .query(
                &query,
                None,
                Some(&json!([token, user["id"], expires_at])),
            )
            .await?;

        debug!(user = %user["id"], "Issued bearer token");
        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer".to_string(),
            expires_in: self.config.token_ttl_secs,
        })
    }
}
