//! Forka Storage
//!
//! SQLite persistence for the bot mode and the sudo user set

use anyhow::{anyhow, Result};
use forka_identity::CanonicalId;
use rusqlite::OptionalExtension;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const MODE_KEY: &str = "mode";

/// Who may run commands: everyone, or only the owner and sudo users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BotMode {
    #[default]
    Public,
    Private,
}

impl FromStr for BotMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(anyhow!("Unknown bot mode '{}' (expected public|private)", other)),
        }
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
        }
    }
}

/// Persisted bot settings consulted by permission checks and mutated by
/// owner commands.
pub trait SettingsStore: Send + Sync {
    fn mode(&self) -> Result<BotMode>;
    fn set_mode(&mut self, mode: BotMode) -> Result<()>;
    fn is_sudo(&self, id: &CanonicalId) -> Result<bool>;
    /// Returns false when `id` was already a sudo user.
    fn add_sudo(&mut self, id: &CanonicalId, added_by: Option<&CanonicalId>) -> Result<bool>;
    /// Returns false when `id` was not a sudo user.
    fn remove_sudo(&mut self, id: &CanonicalId) -> Result<bool>;
    fn sudo_users(&self) -> Result<Vec<CanonicalId>>;
}

pub struct Storage {
    conn: Mutex<rusqlite::Connection>,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bot_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS sudo_users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT NOT NULL UNIQUE,
                added_by TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Storage connection lock poisoned"))
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM bot_settings WHERE key = ?1")?;
        let value: Option<String> = stmt.query_row([key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO bot_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key)
             DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            (key, value),
        )?;
        Ok(())
    }

    /// Who granted sudo to `id`, if recorded.
    pub fn sudo_granted_by(&self, id: &CanonicalId) -> Result<Option<CanonicalId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT added_by FROM sudo_users WHERE number = ?1")?;
        let added_by: Option<Option<String>> = stmt
            .query_row([id.as_str()], |row| row.get(0))
            .optional()?;
        Ok(added_by
            .flatten()
            .and_then(|value| CanonicalId::parse(&value)))
    }
}

impl SettingsStore for Storage {
    fn mode(&self) -> Result<BotMode> {
        match self.get_setting(MODE_KEY)? {
            Some(value) => value.parse(),
            None => Ok(BotMode::default()),
        }
    }

    fn set_mode(&mut self, mode: BotMode) -> Result<()> {
        self.put_setting(MODE_KEY, &mode.to_string())?;
        info!("Bot mode set to {}", mode);
        Ok(())
    }

    fn is_sudo(&self, id: &CanonicalId) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT 1 FROM sudo_users WHERE number = ?1 LIMIT 1")?;
        let found: Option<i64> = stmt.query_row([id.as_str()], |row| row.get(0)).optional()?;
        Ok(found.is_some())
    }

    fn add_sudo(&mut self, id: &CanonicalId, added_by: Option<&CanonicalId>) -> Result<bool> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO sudo_users (number, added_by) VALUES (?1, ?2)",
            (id.as_str(), added_by.map(CanonicalId::as_str)),
        )?;
        if changed > 0 {
            info!("Sudo granted to {}", id);
        }
        Ok(changed > 0)
    }

    fn remove_sudo(&mut self, id: &CanonicalId) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM sudo_users WHERE number = ?1", [id.as_str()])?;
        if changed > 0 {
            info!("Sudo revoked from {}", id);
        }
        Ok(changed > 0)
    }

    fn sudo_users(&self) -> Result<Vec<CanonicalId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT number FROM sudo_users ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut users = Vec::new();
        for row in rows {
            if let Some(id) = CanonicalId::parse(&row?) {
                users.push(id);
            }
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::{BotMode, SettingsStore, Storage};
    use forka_identity::CanonicalId;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("forka-storage-{}-{}.db", name, ts))
    }

    fn id(value: &str) -> CanonicalId {
        CanonicalId::parse(value).expect("digits")
    }

    #[test]
    fn mode_defaults_to_public_and_persists() {
        let path = temp_db_path("mode");
        {
            let mut storage = Storage::new(&path).expect("storage init");
            assert_eq!(storage.mode().expect("mode"), BotMode::Public);
            storage.set_mode(BotMode::Private).expect("set mode");
        }

        let reopened = Storage::new(&path).expect("reopen");
        assert_eq!(reopened.mode().expect("mode"), BotMode::Private);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sudo_add_is_idempotent_and_remove_reports_absence() {
        let mut storage = Storage::in_memory().expect("storage init");
        let owner = id("100");

        assert!(storage.add_sudo(&id("5551234"), Some(&owner)).expect("add"));
        assert!(!storage.add_sudo(&id("5551234"), Some(&owner)).expect("add again"));
        assert!(storage.is_sudo(&id("5551234")).expect("is sudo"));
        assert_eq!(
            storage.sudo_granted_by(&id("5551234")).expect("granted by"),
            Some(owner)
        );

        assert!(storage.remove_sudo(&id("5551234")).expect("remove"));
        assert!(!storage.remove_sudo(&id("5551234")).expect("remove again"));
        assert!(!storage.is_sudo(&id("5551234")).expect("is sudo"));
    }

    #[test]
    fn sudo_users_listed_in_insertion_order() {
        let mut storage = Storage::in_memory().expect("storage init");
        storage.add_sudo(&id("3"), None).expect("add");
        storage.add_sudo(&id("1"), None).expect("add");
        assert_eq!(storage.sudo_users().expect("list"), vec![id("3"), id("1")]);
    }

    #[test]
    fn parse_mode_accepts_mixed_case() {
        assert_eq!(" Private ".parse::<BotMode>().expect("parse"), BotMode::Private);
        assert!("secret".parse::<BotMode>().is_err());
    }

    #[test]
    fn sudo_grants_survive_reopen() {
        let path = temp_db_path("reopen");
        {
            let mut storage = Storage::new(&path).expect("storage init");
            storage.add_sudo(&id("777"), Some(&id("100"))).expect("add");
            storage.add_sudo(&id("778"), None).expect("add");
        }

        let storage = Storage::new(&path).expect("reopen");
        assert_eq!(storage.sudo_users().expect("list"), vec![id("777"), id("778")]);
        assert_eq!(
            storage.sudo_granted_by(&id("777")).expect("granted by"),
            Some(id("100"))
        );
        assert_eq!(storage.sudo_granted_by(&id("778")).expect("granted by"), None);
        std::fs::remove_file(&path).ok();
    }
}
