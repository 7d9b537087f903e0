//! SQLite-backed device store
//!
//! Users and leases live in two tables, `users(token)` and
//! `device(id, node, user_token, config, ip)` keyed by `(id, node)`, so
//! leases survive a controller restart.

use crate::devices::{DeviceRecord, DeviceStore};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users (token TEXT PRIMARY KEY)";

const CREATE_DEVICE: &str = r#"
    CREATE TABLE IF NOT EXISTS device (
        id INTEGER NOT NULL,
        node TEXT NOT NULL,
        user_token TEXT NOT NULL,
        config TEXT NOT NULL,
        ip TEXT NOT NULL,
        FOREIGN KEY (user_token) REFERENCES users (token),
        PRIMARY KEY (id, node)
    )
"#;

/// [`DeviceStore`] persisted in a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool).await?;
        info!("Device store opened at {}", path.display());
        Ok(store)
    }

    /// Wrap an existing pool, creating the tables if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_USERS).execute(&pool).await?;
        sqlx::query(CREATE_DEVICE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn parse_device_row(row: &SqliteRow) -> Result<DeviceRecord> {
    let id: i64 = row.try_get("id")?;
    let id = u8::try_from(id)
        .map_err(|_| FleetError::Database(format!("Device id out of range: {}", id)))?;
    Ok(DeviceRecord {
        id,
        node: row.try_get("node")?,
        owner_token: row.try_get("user_token")?,
        config: row.try_get("config")?,
        assigned_ip: row.try_get("ip")?,
    })
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn add_user(&self, token: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (token) VALUES (?)")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_known_token(&self, token: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn taken_ids(&self, node: &str) -> Result<Vec<u8>> {
        let rows = sqlx::query("SELECT id FROM device WHERE node = ?")
            .bind(node)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                u8::try_from(id)
                    .map_err(|_| FleetError::Database(format!("Device id out of range: {}", id)))
            })
            .collect()
    }

    async fn insert(&self, record: DeviceRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO device (id, node, user_token, config, ip) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(i64::from(record.id))
        .bind(&record.node)
        .bind(&record.owner_token)
        .bind(&record.config)
        .bind(&record.assigned_ip)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Stored device {} on node '{}'", record.id, record.node);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(FleetError::Validation(format!(
                    "Device {} already exists on node '{}'",
                    record.id, record.node
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, node: &str, owner: &str) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, node, user_token, config, ip
            FROM device
            WHERE node = ? AND user_token = ?
            ORDER BY id
            "#,
        )
        .bind(node)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_device_row).collect()
    }

    async fn delete(&self, node: &str, id: u8, owner: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM device WHERE node = ? AND id = ? AND user_token = ?")
            .bind(node)
            .bind(i64::from(id))
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
