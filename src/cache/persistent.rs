use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

/// SQLite tables backing the offline cache. Records are stored as JSON
/// payloads grouped by kind, in the order the server returned them.
#[derive(Debug)]
pub struct PersistentStore {
    conn: Mutex<Connection>,
}

impl PersistentStore {
    pub fn new(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS records (
  kind TEXT NOT NULL,
  position INTEGER NOT NULL,
  payload TEXT NOT NULL,
  PRIMARY KEY (kind, position)
);
CREATE TABLE IF NOT EXISTS refreshes (
  kind TEXT PRIMARY KEY,
  refreshed_at TEXT NOT NULL
);
",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn replace_all(
        &self,
        kind: &str,
        payloads: &[String],
        refreshed_at: &str,
    ) -> Result<(), rusqlite::Error> {
        let mut conn = self.conn.lock().expect("persistent store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records WHERE kind = ?1", params![kind])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO records(kind, position, payload) VALUES (?1, ?2, ?3)",
            )?;
            for (position, payload) in payloads.iter().enumerate() {
                insert.execute(params![kind, position as i64, payload])?;
            }
        }
        tx.execute(
            "
INSERT INTO refreshes(kind, refreshed_at) VALUES (?1, ?2)
ON CONFLICT(kind) DO UPDATE SET refreshed_at = excluded.refreshed_at
",
            params![kind, refreshed_at],
        )?;
        tx.commit()
    }

    pub fn load_all(&self, kind: &str) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn.lock().expect("persistent store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT payload FROM records WHERE kind = ?1 ORDER BY position ASC")?;
        let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
        let payloads = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(payloads)
    }

    pub fn refreshed_at(&self, kind: &str) -> Result<Option<String>, rusqlite::Error> {
        let conn = self.conn.lock().expect("persistent store mutex poisoned");
        conn.query_row(
            "SELECT refreshed_at FROM refreshes WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn clear(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().expect("persistent store mutex poisoned");
        conn.execute_batch("DELETE FROM records; DELETE FROM refreshes;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_and_reads_in_order() {
        let db = PersistentStore::new(Path::new(":memory:")).expect("db open");
        db.replace_all("projects", &["a".into(), "b".into()], "t1")
            .expect("first write");
        db.replace_all("projects", &["c".into()], "t2")
            .expect("second write");
        db.replace_all("trackers", &["x".into()], "t3")
            .expect("other kind");

        assert_eq!(db.load_all("projects").expect("read"), vec!["c".to_string()]);
        assert_eq!(db.refreshed_at("projects").expect("read").as_deref(), Some("t2"));
        assert_eq!(db.refreshed_at("queries").expect("read"), None);

        db.clear().expect("clear");
        assert!(db.load_all("trackers").expect("read").is_empty());
    }
}
