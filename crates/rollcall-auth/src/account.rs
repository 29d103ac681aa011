//! Accounts and refresh-token records

use rollcall_core::{Result, Role};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// An account row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: String,
    pub entity_id: Option<String>,
    pub created_at: i64,
}

/// Account provisioning input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Account summary, without the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub entity_id: Option<String>,
}

impl From<&Account> for AccountInfo {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            username: account.username.clone(),
            role: account.role,
            display_name: account.display_name.clone(),
            entity_id: account.entity_id.clone(),
        }
    }
}

pub async fn insert_account(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
    sqlx::query(
        "INSERT INTO accounts (id, username, password_hash, role, display_name, entity_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&account.id)
    .bind(&account.username)
    .bind(&account.password_hash)
    .bind(account.role)
    .bind(&account.display_name)
    .bind(&account.entity_id)
    .bind(account.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_by_username(conn: &mut SqliteConnection, username: &str) -> Result<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(account)
}

pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> Result<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(account)
}

// Refresh tokens

pub async fn insert_refresh_token(
    conn: &mut SqliteConnection,
    account_id: &str,
    token_hash: &str,
    expires_at: i64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO refresh_tokens (id, account_id, token_hash, expires_at, revoked, created_at)
         VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(account_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Revoke a live refresh token and return its account.
///
/// `None` when the token is unknown, expired or already used. Of two
/// concurrent rotations of the same token exactly one gets the account.
pub async fn consume_refresh_token(
    conn: &mut SqliteConnection,
    token_hash: &str,
    now: i64,
) -> Result<Option<String>> {
    let account_id = sqlx::query_scalar::<_, String>(
        "UPDATE refresh_tokens SET revoked = 1
         WHERE token_hash = ? AND revoked = 0 AND expires_at > ?
         RETURNING account_id",
    )
    .bind(token_hash)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(account_id)
}

/// Revoke a refresh token. Returns whether a live token was revoked.
pub async fn revoke_refresh_token(conn: &mut SqliteConnection, token_hash: &str) -> Result<bool> {
    let done = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ? AND revoked = 0")
        .bind(token_hash)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Drop expired and revoked refresh tokens
pub async fn purge_refresh_tokens(conn: &mut SqliteConnection, now: i64) -> Result<u64> {
    let done = sqlx::query("DELETE FROM refresh_tokens WHERE revoked = 1 OR expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}
