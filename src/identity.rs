//! Local identity: the display name and colour theme that survive restarts.
//!
//! Stored as plain key/value pairs under `chat_username` and `chat_theme`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

pub const USERNAME_KEY: &str = "chat_username";
pub const THEME_KEY: &str = "chat_theme";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggle(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("Unknown theme: {other}")),
        }
    }
}

/// Trim a display name and reject blank ones.
pub fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ChatError::InvalidName);
    }
    Ok(name.to_string())
}

/// Persistence for the local user's name and theme.
pub trait IdentityStore {
    fn current_user(&self) -> Result<Option<String>>;
    fn set_current_user(&mut self, name: &str) -> Result<()>;
    /// Unknown or missing stored values read as [`Theme::Light`].
    fn theme(&self) -> Result<Theme>;
    fn set_theme(&mut self, theme: Theme) -> Result<()>;
}

/// Identity that lives only as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    values: HashMap<String, String>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn current_user(&self) -> Result<Option<String>> {
        Ok(self.values.get(USERNAME_KEY).cloned())
    }

    fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.values.insert(USERNAME_KEY.to_string(), name.to_string());
        Ok(())
    }

    fn theme(&self) -> Result<Theme> {
        Ok(self
            .values
            .get(THEME_KEY)
            .and_then(|t| t.parse().ok())
            .unwrap_or_default())
    }

    fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.values.insert(THEME_KEY.to_string(), theme.to_string());
        Ok(())
    }
}

/// Identity persisted in a SQLite key/value table.
pub struct SqliteIdentityStore {
    conn: Connection,
}

impl SqliteIdentityStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(SqliteIdentityStore { conn })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn current_user(&self) -> Result<Option<String>> {
        self.get(USERNAME_KEY)
    }

    fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.put(USERNAME_KEY, name)
    }

    fn theme(&self) -> Result<Theme> {
        Ok(self
            .get(THEME_KEY)?
            .and_then(|t| t.parse().ok())
            .unwrap_or_default())
    }

    fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.put(THEME_KEY, &theme.to_string())
    }
}

/// Either store, picked at startup from configuration.
pub enum AnyIdentityStore {
    Memory(MemoryIdentityStore),
    Sqlite(SqliteIdentityStore),
}

impl AnyIdentityStore {
    /// SQLite at `path` when given, otherwise in-memory.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(AnyIdentityStore::Sqlite(SqliteIdentityStore::open(p)?)),
            None => Ok(AnyIdentityStore::Memory(MemoryIdentityStore::new())),
        }
    }

    fn inner(&self) -> &dyn IdentityStore {
        match self {
            AnyIdentityStore::Memory(s) => s,
            AnyIdentityStore::Sqlite(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn IdentityStore {
        match self {
            AnyIdentityStore::Memory(s) => s,
            AnyIdentityStore::Sqlite(s) => s,
        }
    }
}

impl IdentityStore for AnyIdentityStore {
    fn current_user(&self) -> Result<Option<String>> {
        self.inner().current_user()
    }

    fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.inner_mut().set_current_user(name)
    }

    fn theme(&self) -> Result<Theme> {
        self.inner().theme()
    }

    fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.inner_mut().set_theme(theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_toggle() {
        assert_eq!(Theme::Light.toggle(), Theme::Dark);
        assert_eq!(Theme::Dark.toggle(), Theme::Light);
    }

    #[test]
    fn test_theme_parse_and_display() {
        assert_eq!("Dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert_eq!(Theme::Light.to_string(), "light");
        assert!("sepia".parse::<Theme>().is_err());
    }

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  alice \n").unwrap(), "alice");
    }

    #[test]
    fn test_validate_name_rejects_blank() {
        assert!(matches!(validate_name("   "), Err(ChatError::InvalidName)));
    }

    #[test]
    fn test_memory_store_defaults() {
        let store = MemoryIdentityStore::new();
        assert_eq!(store.current_user().unwrap(), None);
        assert_eq!(store.theme().unwrap(), Theme::Light);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryIdentityStore::new();
        store.set_current_user("alice").unwrap();
        store.set_theme(Theme::Dark).unwrap();
        assert_eq!(store.current_user().unwrap().as_deref(), Some("alice"));
        assert_eq!(store.theme().unwrap(), Theme::Dark);
    }

    #[test]
    fn test_sqlite_store_overwrites_value() {
        let mut store = SqliteIdentityStore::open_in_memory().unwrap();
        store.set_current_user("alice").unwrap();
        store.set_current_user("alicia").unwrap();
        assert_eq!(store.current_user().unwrap().as_deref(), Some("alicia"));
    }

    #[test]
    fn test_sqlite_store_unknown_theme_reads_light() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store.put(THEME_KEY, "neon").unwrap();
        assert_eq!(store.theme().unwrap(), Theme::Light);
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        {
            let mut store = SqliteIdentityStore::open(&path).unwrap();
            store.set_current_user("bob").unwrap();
            store.set_theme(Theme::Dark).unwrap();
        }
        let store = SqliteIdentityStore::open(&path).unwrap();
        assert_eq!(store.current_user().unwrap().as_deref(), Some("bob"));
        assert_eq!(store.theme().unwrap(), Theme::Dark);
    }

    #[test]
    fn test_any_store_without_path_is_memory() {
        let store = AnyIdentityStore::open(None).unwrap();
        assert!(matches!(store, AnyIdentityStore::Memory(_)));
    }
}
