//! Postgres implementations of the store traits.

use super::{CredentialStore, LoginCommit, SessionStore};
use crate::error::{AuthError, Result};
use crate::models::{Device, NewRefreshToken, RefreshToken, Role, RoleClaim, SessionView, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str = r#"
    id, username, email, phone_number, password_hash, display_name,
    is_active, two_factor_enabled, email_verified, security_stamp,
    locked_until, failed_login_attempts, last_login_at, created_at, updated_at
"#;

const DEVICE_COLUMNS: &str = r#"
    id, user_id, device_id, device_name, device_type, os_name, browser,
    ip_address, first_login_at, last_login_at, is_active, revoked, revoked_at
"#;

const REFRESH_TOKEN_COLUMNS: &str =
    "id, user_id, device_id, token, created_at, expires_at, revoked_at, revoked_reason";

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR lower(email) = lower($1)"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_secs: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        let locked_until = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                locked_until = CASE
                    WHEN failed_login_attempts + 1 >= $2
                    THEN NOW() + make_interval(secs => $3)
                    ELSE locked_until
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING locked_until
            "#,
        )
        .bind(user_id)
        .bind(max_attempts)
        .bind(lockout_secs as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok(locked_until.filter(|until| *until > Utc::now()))
    }

    async fn reset_failed_login(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL,
                last_login_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    async fn claims_for_roles(&self, role_ids: &[Uuid]) -> Result<Vec<RoleClaim>> {
        let claims = sqlx::query_as::<_, RoleClaim>(
            r#"
            SELECT role_id, claim_type, claim_value
            FROM role_claims
            WHERE role_id = ANY($1)
            ORDER BY role_id, claim_type, claim_value
            "#,
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(claims)
    }

    async fn confirm_email(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET email_verified = true, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_login_link(&self, provider: &str, subject: &str) -> Result<Option<Uuid>> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM user_logins WHERE provider = $1 AND provider_subject = $2",
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    async fn create_login_link(&self, user_id: Uuid, provider: &str, subject: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_logins (user_id, provider, provider_subject, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (provider, provider_subject) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(subject)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_auth_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, purpose, name, value, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id, purpose, name)
            DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .bind(name)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_auth_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        name: &str,
    ) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM user_tokens
            WHERE user_id = $1 AND purpose = $2 AND name = $3 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn remove_auth_token(&self, user_id: Uuid, purpose: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_tokens WHERE user_id = $1 AND purpose = $2 AND name = $3")
            .bind(user_id)
            .bind(purpose)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_device(&self, user_id: Uuid, device_id: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 AND device_id = $2"
        ))
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn active_devices(&self, user_id: Uuid) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            r#"
            SELECT {DEVICE_COLUMNS} FROM devices
            WHERE user_id = $1 AND is_active = true AND revoked = false
            ORDER BY last_login_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    async fn commit_login(&self, commit: LoginCommit) -> Result<Device> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // LRU eviction when the device ceiling was reached
        if let Some(evict_id) = &commit.evict_device_id {
            sqlx::query(
                r#"
                UPDATE devices
                SET is_active = false, revoked = true, revoked_at = $3
                WHERE user_id = $1 AND device_id = $2
                "#,
            )
            .bind(commit.user_id)
            .bind(evict_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $3, revoked_reason = $4
                WHERE user_id = $1 AND device_id = $2 AND revoked_at IS NULL
                "#,
            )
            .bind(commit.user_id)
            .bind(evict_id)
            .bind(now)
            .bind(super::revocation_reason::DEVICE_LIMIT)
            .execute(&mut *tx)
            .await?;
        }

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            INSERT INTO devices (
                id, user_id, device_id, device_name, device_type, os_name,
                browser, ip_address, first_login_at, last_login_at,
                is_active, revoked, revoked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, true, false, NULL)
            ON CONFLICT (user_id, device_id)
            DO UPDATE SET
                device_name = EXCLUDED.device_name,
                device_type = EXCLUDED.device_type,
                os_name = EXCLUDED.os_name,
                browser = EXCLUDED.browser,
                ip_address = EXCLUDED.ip_address,
                last_login_at = EXCLUDED.last_login_at,
                is_active = true, revoked = false, revoked_at = NULL
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(commit.user_id)
        .bind(&commit.device.device_id)
        .bind(&commit.device.device_name)
        .bind(&commit.device.device_type)
        .bind(&commit.device.os_name)
        .bind(&commit.device.browser)
        .bind(&commit.device.ip_address)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        // A stale session on the same device must not keep a usable token
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3, revoked_reason = $4
            WHERE user_id = $1 AND device_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(commit.user_id)
        .bind(&commit.device.device_id)
        .bind(now)
        .bind(super::revocation_reason::SUPERSEDED)
        .execute(&mut *tx)
        .await?;

        insert_refresh_token(&mut tx, &commit.new_token).await?;

        tx.commit().await?;
        Ok(device)
    }

    async fn find_refresh_token(
        &self,
        user_id: Uuid,
        device_id: &str,
        token: &str,
    ) -> Result<Option<RefreshToken>> {
        let row = sqlx::query_as::<_, RefreshToken>(&format!(
            r#"
            SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens
            WHERE user_id = $1 AND device_id = $2 AND token = $3
            "#
        ))
        .bind(user_id)
        .bind(device_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        new_token: NewRefreshToken,
    ) -> Result<RefreshToken> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(old_token_id)
        .bind(super::revocation_reason::ROTATED)
        .execute(&mut *tx)
        .await?;

        // Lost the race against a concurrent rotation of the same token
        if revoked.rows_affected() == 0 {
            return Err(AuthError::RefreshTokenRevoked);
        }

        let inserted = insert_refresh_token(&mut tx, &new_token).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn revoke_device(&self, user_id: Uuid, device_id: &str, reason: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let updated = sqlx::query(
            r#"
            UPDATE devices
            SET is_active = false, revoked = true, revoked_at = $3
            WHERE user_id = $1 AND device_id = $2 AND revoked = false
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3, revoked_reason = $4
            WHERE user_id = $1 AND device_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(now)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep_device_id: Option<&str>,
        reason: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let keep = keep_device_id.unwrap_or("");

        let updated = sqlx::query(
            r#"
            UPDATE devices
            SET is_active = false, revoked = true, revoked_at = $3
            WHERE user_id = $1 AND device_id <> $2 AND revoked = false
            "#,
        )
        .bind(user_id)
        .bind(keep)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $3, revoked_reason = $4
            WHERE user_id = $1 AND device_id <> $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(keep)
        .bind(now)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.rows_affected())
    }

    async fn sessions_overview(&self, user_id: Uuid) -> Result<Vec<SessionView>> {
        #[derive(sqlx::FromRow)]
        struct OverviewRow {
            device_id: String,
            device_name: Option<String>,
            device_type: Option<String>,
            os_name: Option<String>,
            browser: Option<String>,
            ip_address: Option<String>,
            last_login_at: DateTime<Utc>,
            has_active_token: bool,
        }

        let rows = sqlx::query_as::<_, OverviewRow>(
            r#"
            SELECT d.device_id, d.device_name, d.device_type, d.os_name,
                   d.browser, d.ip_address, d.last_login_at,
                   EXISTS (
                       SELECT 1 FROM refresh_tokens rt
                       WHERE rt.user_id = d.user_id
                         AND rt.device_id = d.device_id
                         AND rt.revoked_at IS NULL
                         AND rt.expires_at > NOW()
                   ) AS has_active_token
            FROM devices d
            WHERE d.user_id = $1 AND d.is_active = true AND d.revoked = false
            ORDER BY d.last_login_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SessionView {
                device_id: r.device_id,
                device_name: r.device_name,
                device_type: r.device_type,
                os_name: r.os_name,
                browser: r.browser,
                ip_address: r.ip_address,
                last_login_at: r.last_login_at,
                has_active_token: r.has_active_token,
            })
            .collect())
    }
}

async fn insert_refresh_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token: &NewRefreshToken,
) -> Result<RefreshToken> {
    let row = sqlx::query_as::<_, RefreshToken>(&format!(
        r#"
        INSERT INTO refresh_tokens (id, user_id, device_id, token, created_at, expires_at)
        VALUES ($1, $2, $3, $4, NOW(), $5)
        RETURNING {REFRESH_TOKEN_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(token.user_id)
    .bind(&token.device_id)
    .bind(&token.token)
    .bind(token.expires_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}
