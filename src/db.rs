use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use std::path::PathBuf;

use crate::models::ApplicationRec;

/// Local record store: one JSON document per application, keyed by
/// (record id, user id), last-write-wins per record. The sync flow is
/// load -> merge -> save; this layer never inspects record contents.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrail") {
            Ok(proj_dirs.data_dir().join("jobtrail.db"))
        } else {
            Ok(PathBuf::from("jobtrail.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Store not initialized. Run 'jobtrail init' first."));
        }
        Ok(())
    }

    pub fn load(&self, user_id: &str) -> Result<Vec<ApplicationRec>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, data FROM applications WHERE user_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data) = row.context("Failed to read application row")?;
            match serde_json::from_str::<ApplicationRec>(&data) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    // One bad row should not make the whole collection
                    // unloadable
                    log::warn!("skipping undecodable record {}: {}", id, e);
                }
            }
        }
        Ok(records)
    }

    pub fn save(&self, records: &[ApplicationRec], user_id: &str) -> Result<()> {
        for rec in records {
            let data = serde_json::to_string(rec)
                .with_context(|| format!("Failed to serialize record {}", rec.id))?;
            self.conn.execute(
                "INSERT OR REPLACE INTO applications (id, user_id, data, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![rec.id, user_id, data],
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractedJob;
    use crate::merge::{WorkingSet, dedup_key};
    use crate::models::AppStatus;
    use chrono::{TimeZone, Utc};

    fn sample_record(company: &str) -> ApplicationRec {
        let extracted = ExtractedJob {
            company: company.to_string(),
            position: "Engineer".to_string(),
            ..ExtractedJob::default()
        };
        let key = dedup_key(&extracted);
        let mut set = WorkingSet::new();
        set.merge(
            &key,
            &extracted,
            AppStatus::Pending,
            Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap(),
            "m1",
            "subject",
        );
        set.into_records().remove(0)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.init().unwrap();

        let records = vec![sample_record("Acme"), sample_record("Globex")];
        store.save(&records, "alice").unwrap();

        let loaded = store.load("alice").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "acme::engineer");
        assert_eq!(loaded[0].status, AppStatus::Pending);
        assert_eq!(loaded[0].status_history.len(), 1);
    }

    #[test]
    fn test_save_is_last_write_wins_per_record() {
        let store = Store::open_in_memory().unwrap();
        store.init().unwrap();

        let mut rec = sample_record("Acme");
        store.save(std::slice::from_ref(&rec), "alice").unwrap();

        rec.notes = Some("followed up".to_string());
        store.save(std::slice::from_ref(&rec), "alice").unwrap();

        let loaded = store.load("alice").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].notes.as_deref(), Some("followed up"));
    }

    #[test]
    fn test_records_are_scoped_per_user() {
        let store = Store::open_in_memory().unwrap();
        store.init().unwrap();

        store.save(&[sample_record("Acme")], "alice").unwrap();
        store.save(&[sample_record("Globex")], "bob").unwrap();

        assert_eq!(store.load("alice").unwrap().len(), 1);
        assert_eq!(store.load("bob").unwrap().len(), 1);
        assert_eq!(store.load("carol").unwrap().len(), 0);
    }

    #[test]
    fn test_load_skips_undecodable_rows() {
        let store = Store::open_in_memory().unwrap();
        store.init().unwrap();

        store.save(&[sample_record("Acme")], "alice").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO applications (id, user_id, data) VALUES ('bad', 'alice', 'not json')",
                [],
            )
            .unwrap();

        let loaded = store.load("alice").unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_ensure_initialized() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.ensure_initialized().is_err());
        store.init().unwrap();
        assert!(store.ensure_initialized().is_ok());
    }
}
