//! Server-side credential service
//!
//! Issues an access/refresh pair on login and on every refresh. Refresh
//! tokens are opaque, stored hashed and single use: presenting one revokes
//! it in the same statement that looks it up.

use rollcall_core::protocol::TokenPair;
use rollcall_core::{unix_timestamp, Config, Database, Error, Principal, Result};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::account::{self, Account, AccountInfo, NewAccount};
use crate::jwt::{generate_refresh_token, hash_token, JwtManager};
use crate::password;

#[derive(Clone)]
pub struct CredentialService {
    db: Database,
    jwt: JwtManager,
    refresh_ttl_secs: i64,
}

impl CredentialService {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            jwt: JwtManager::new(config.jwt_secret.as_bytes(), config.access_ttl_secs),
            refresh_ttl_secs: config.refresh_ttl_secs,
        }
    }

    /// Provision an account (operator CLI only)
    pub async fn create_account(&self, new: NewAccount) -> Result<AccountInfo> {
        let username = new.username.trim().to_string();
        if username.len() < 3 {
            return Err(Error::validation("Username must be at least 3 characters"));
        }
        password::check_length(&new.password)?;
        let password_hash = password::hash_password(&new.password)?;

        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            username,
            password_hash,
            role: new.role,
            display_name: new.display_name,
            entity_id: new.entity_id.filter(|id| !id.trim().is_empty()),
            created_at: unix_timestamp(),
        };

        let mut conn = self.db.pool().acquire().await?;
        account::insert_account(&mut conn, &account)
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => Error::conflict("Username already taken"),
                other => other,
            })?;

        info!(account_id = %account.id, username = %account.username, role = %account.role, "Account created");
        Ok(AccountInfo::from(&account))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let mut conn = self.db.pool().acquire().await?;
        let Some(account) = account::get_by_username(&mut conn, username.trim()).await? else {
            password::verify_unknown_account(password);
            return Err(Error::Unauthenticated("Invalid credentials".to_string()));
        };

        if !password::verify_password(password, &account.password_hash)? {
            warn!(username = %account.username, "Failed login attempt");
            return Err(Error::Unauthenticated("Invalid credentials".to_string()));
        }

        let pair = self.issue_pair(&mut conn, &account).await?;
        info!(account_id = %account.id, role = %account.role, "Logged in");
        Ok(pair)
    }

    /// Rotate a refresh token into a new pair.
    ///
    /// An unknown, expired or already rotated token is `AuthExpired`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let now = unix_timestamp();
        let mut tx = self.db.begin_write().await?;

        let account_id = account::consume_refresh_token(&mut tx, &hash_token(refresh_token), now)
            .await?
            .ok_or(Error::AuthExpired)?;
        let account = account::get_by_id(&mut tx, &account_id)
            .await?
            .ok_or(Error::AuthExpired)?;

        let pair = self.issue_pair(&mut tx, &account).await?;
        tx.commit().await?;
        Ok(pair)
    }

    /// Revoke a refresh token. Unknown tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        if account::revoke_refresh_token(&mut conn, &hash_token(refresh_token)).await? {
            info!("Refresh token revoked");
        }
        Ok(())
    }

    /// Verify an access token on an incoming request
    pub fn authenticate(&self, access_token: &str) -> Result<Principal> {
        self.jwt
            .validate(access_token)
            .map(Principal::from)
            .map_err(|e| Error::Unauthenticated(format!("invalid access token: {e}")))
    }

    /// Remove revoked and expired refresh tokens
    pub async fn purge_expired(&self) -> Result<u64> {
        let mut conn = self.db.pool().acquire().await?;
        account::purge_refresh_tokens(&mut conn, unix_timestamp()).await
    }

    async fn issue_pair(&self, conn: &mut SqliteConnection, account: &Account) -> Result<TokenPair> {
        let (access_token, expires_in) = self
            .jwt
            .issue_access_token(account)
            .map_err(|e| Error::Internal(format!("token creation failed: {e}")))?;

        let now = unix_timestamp();
        let refresh_token = generate_refresh_token();
        account::insert_refresh_token(
            conn,
            &account.id,
            &hash_token(&refresh_token),
            now + self.refresh_ttl_secs,
            now,
        )
        .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}
