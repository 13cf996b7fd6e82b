use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use std::path::Path;

const USERNAME_KEY: &str = "username";

/// Settings that survive a restart. Only the chosen username is kept;
/// messages and connections are never written.
pub struct ClientDatabase {
    conn: Connection,
}

impl ClientDatabase {
    /// Open (or create) the database at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn load_username(&self) -> SqlResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![USERNAME_KEY],
                |row| row.get(0),
            )
            .optional()
    }

    /// Stores the trimmed name; a blank name clears the setting.
    pub fn save_username(&self, username: &str) -> SqlResult<()> {
        let username = username.trim();
        if username.is_empty() {
            return self.clear_username();
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![USERNAME_KEY, username],
        )?;
        Ok(())
    }

    pub fn clear_username(&self) -> SqlResult<()> {
        self.conn.execute(
            "DELETE FROM settings WHERE key = ?1",
            params![USERNAME_KEY],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_round_trips_and_clears() {
        let db = ClientDatabase::in_memory().unwrap();
        assert_eq!(db.load_username().unwrap(), None);

        db.save_username("alice").unwrap();
        db.save_username("bob").unwrap();
        assert_eq!(db.load_username().unwrap().as_deref(), Some("bob"));

        db.clear_username().unwrap();
        assert_eq!(db.load_username().unwrap(), None);
    }

    #[test]
    fn username_is_stored_trimmed() {
        let db = ClientDatabase::in_memory().unwrap();
        db.save_username("  carol \n").unwrap();
        assert_eq!(db.load_username().unwrap().as_deref(), Some("carol"));

        db.save_username("   ").unwrap();
        assert_eq!(db.load_username().unwrap(), None);
    }
}
