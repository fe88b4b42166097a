use crate::config_store::ConfigMutation;
use crate::types::{UserConfig, UserId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Background task failed: {0}")]
    Join(String),
}

/// SQLite table of user configs, one JSON document per user id.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ConfigStoreError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                password TEXT,
                config TEXT
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn load_user(&self, user_id: UserId) -> Result<Option<UserConfig>, ConfigStoreError> {
        let conn = self.conn.lock();
        read_config(&conn, user_id)
    }

    pub fn save_user(&self, user_id: UserId, config: &UserConfig) -> Result<(), ConfigStoreError> {
        let conn = self.conn.lock();
        write_config(&conn, user_id, config)
    }

    /// Every stored config. Rows that no longer parse are skipped.
    pub fn load_all_users(&self) -> Result<HashMap<UserId, UserConfig>, ConfigStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT user_id, config FROM users")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, UserId>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut configs = HashMap::new();
        for row in rows {
            let (user_id, raw) = row?;
            match serde_json::from_str::<UserConfig>(raw.as_deref().unwrap_or("{}")) {
                Ok(config) => {
                    configs.insert(user_id, config);
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable config for user {}: {}", user_id, e);
                }
            }
        }

        Ok(configs)
    }

    /// Applies `mutation` inside one transaction. A row that no longer parses
    /// is treated as a fresh default config.
    pub fn update_user(
        &self,
        user_id: UserId,
        mutation: ConfigMutation,
    ) -> Result<UserConfig, ConfigStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut config = match read_config(&tx, user_id) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(ConfigStoreError::Json(e)) => {
                // Rewritten below, so an unreadable row heals on the next write.
                tracing::warn!("Replacing unreadable config for user {}: {}", user_id, e);
                UserConfig::default()
            }
            Err(e) => return Err(e),
        };
        mutation(&mut config);
        write_config(&tx, user_id, &config)?;

        tx.commit()?;
        Ok(config)
    }
}

fn read_config(conn: &Connection, user_id: UserId) -> Result<Option<UserConfig>, ConfigStoreError> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT config FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw.flatten() {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_config(
    conn: &Connection,
    user_id: UserId,
    config: &UserConfig,
) -> Result<(), ConfigStoreError> {
    let json = serde_json::to_string(config)?;
    conn.execute(
        "INSERT OR REPLACE INTO users (user_id, username, password, config) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, config.username, config.password, json],
    )?;
    Ok(())
}
