use std::path::{Path, PathBuf};

use crawld_model::{DEFAULT_PRIORITY, Document, Priority};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{StorageError, StorageResult};

/// A queued payload together with its priority.
pub type Entry = (Document, Priority);

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;

    CREATE TABLE IF NOT EXISTS queue (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      priority REAL NOT NULL,
      payload TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS queue_pop_order ON queue (priority DESC, id ASC);
"#;

// Shared by pop, peek and iterate: highest priority first, oldest insert first on ties.
const ORDER: &str = "ORDER BY priority DESC, id ASC";

/// Persistent priority queue of structured documents.
///
/// Rows are keyed by an `AUTOINCREMENT` id, so ids strictly increase per
/// insert and are never reused, even after the newest row is popped.
#[derive(Debug)]
pub struct PriorityQueue {
    conn: Connection,
    path: Option<PathBuf>,
}

impl PriorityQueue {
    /// Open (or create) the queue stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        let queue = Self {
            conn,
            path: Some(path),
        };
        queue.migrate()?;
        debug!(target: "crawld.store", path = ?queue.path, entries = queue.count()?, "queue opened");
        Ok(queue)
    }

    /// Queue that lives only as long as this value.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let queue = Self { conn, path: None };
        queue.migrate()?;
        Ok(queue)
    }

    fn migrate(&self) -> StorageResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Backing file, `None` for in-memory queues.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store `payload` with `priority`; returns the assigned row id.
    pub fn insert(&mut self, payload: &Document, priority: Priority) -> StorageResult<i64> {
        if priority.is_nan() {
            return Err(StorageError::InvalidPriority(priority));
        }
        let text = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO queue (priority, payload) VALUES (?1, ?2)",
            params![priority, text],
        )?;
        let id = self.conn.last_insert_rowid();
        trace!(target: "crawld.store", id, priority, "entry inserted");
        Ok(id)
    }

    /// [`insert`](Self::insert) with the default priority.
    pub fn push(&mut self, payload: &Document) -> StorageResult<i64> {
        self.insert(payload, DEFAULT_PRIORITY)
    }

    /// Serialize `value` into a document and insert it.
    pub fn insert_as<T: Serialize>(&mut self, value: &T, priority: Priority) -> StorageResult<i64> {
        let payload = serde_json::to_value(value)?;
        self.insert(&payload, priority)
    }

    /// Remove and return the entry with the greatest priority.
    pub fn pop_highest(&mut self) -> StorageResult<Option<Entry>> {
        let tx = self.conn.transaction()?;
        let row: Option<(i64, f64, String)> = tx
            .query_row(
                &format!("SELECT id, priority, payload FROM queue {ORDER} LIMIT 1"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, priority, text)) = row else {
            return Ok(None);
        };
        // Decode before deleting: a row that cannot be read stays in place.
        let payload: Document = serde_json::from_str(&text)?;
        tx.execute("DELETE FROM queue WHERE id = ?1", params![id])?;
        tx.commit()?;

        trace!(target: "crawld.store", id, priority, "entry popped");
        Ok(Some((payload, priority)))
    }

    /// The entry [`pop_highest`](Self::pop_highest) would return, left in place.
    pub fn peek_highest(&self) -> StorageResult<Option<Entry>> {
        let row: Option<(f64, String)> = self
            .conn
            .query_row(
                &format!("SELECT priority, payload FROM queue {ORDER} LIMIT 1"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((priority, text)) => Ok(Some((serde_json::from_str(&text)?, priority))),
            None => Ok(None),
        }
    }

    /// Delete every entry whose payload satisfies `predicate`.
    ///
    /// Runs in one transaction; returns how many entries were removed.
    pub fn remove<F>(&mut self, mut predicate: F) -> StorageResult<usize>
    where
        F: FnMut(&Document) -> bool,
    {
        let tx = self.conn.transaction()?;
        let doomed = {
            let mut stmt = tx.prepare("SELECT id, payload FROM queue")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut doomed = Vec::new();
            for row in rows {
                let (id, text) = row?;
                let payload: Document = serde_json::from_str(&text)?;
                if predicate(&payload) {
                    doomed.push(id);
                }
            }
            doomed
        };

        {
            let mut delete = tx.prepare("DELETE FROM queue WHERE id = ?1")?;
            for id in &doomed {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;

        if !doomed.is_empty() {
            debug!(target: "crawld.store", removed = doomed.len(), "entries removed");
        }
        Ok(doomed.len())
    }

    /// Snapshot of all entries in pop order. Does not mutate the queue.
    pub fn iterate(&self) -> StorageResult<Vec<Entry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT priority, payload FROM queue {ORDER}"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (priority, text) = row?;
            out.push((serde_json::from_str(&text)?, priority));
        }
        Ok(out)
    }

    pub fn count(&self) -> StorageResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    #[inline]
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Delete every entry in one statement.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM queue", [])?;
        debug!(target: "crawld.store", path = ?self.path, "queue cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> PriorityQueue {
        PriorityQueue::open_in_memory().expect("in-memory queue")
    }

    fn msg(s: &str) -> Document {
        Document::String(s.to_string())
    }

    #[test]
    fn empty_queue_pops_nothing() {
        let mut q = queue();
        assert!(q.pop_highest().unwrap().is_none());
        assert!(q.peek_highest().unwrap().is_none());
        assert_eq!(q.count().unwrap(), 0);
    }

    #[test]
    fn single_entry_gets_default_priority() {
        let mut q = queue();
        q.push(&msg("a message")).unwrap();
        assert_eq!(q.pop_highest().unwrap(), Some((msg("a message"), 0.0)));
        assert!(q.pop_highest().unwrap().is_none());
    }

    #[test]
    fn equal_priorities_each_pop_once() {
        let mut q = queue();
        q.push(&msg("first message")).unwrap();
        q.push(&msg("second message")).unwrap();

        let out = vec![q.pop_highest().unwrap(), q.pop_highest().unwrap()];
        assert!(out.contains(&Some((msg("first message"), 0.0))));
        assert!(out.contains(&Some((msg("second message"), 0.0))));
        assert!(q.pop_highest().unwrap().is_none());
    }

    #[test]
    fn equal_priorities_pop_in_insertion_order() {
        let mut q = queue();
        for i in 0..5 {
            q.insert(&json!(i), 1.0).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pop_highest().unwrap(), Some((json!(i), 1.0)));
        }
    }

    fn fill_messages(q: &mut PriorityQueue) {
        q.insert(&msg("message 1"), 1.0).unwrap();
        q.insert(&msg("message 2"), 5.0).unwrap();
        q.insert(&msg("message 3"), 3.0).unwrap();
        q.insert(&msg("message 4"), 2.0).unwrap();
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut q = queue();
        fill_messages(&mut q);

        assert_eq!(q.pop_highest().unwrap(), Some((msg("message 2"), 5.0)));
        assert_eq!(q.pop_highest().unwrap(), Some((msg("message 3"), 3.0)));
        assert_eq!(q.pop_highest().unwrap(), Some((msg("message 4"), 2.0)));
        assert_eq!(q.pop_highest().unwrap(), Some((msg("message 1"), 1.0)));
        assert!(q.pop_highest().unwrap().is_none());
    }

    #[test]
    fn negative_and_fractional_priorities_order_numerically() {
        let mut q = queue();
        let priorities = [0.5, -3.0, 10.25, -0.5, 2.0];
        for p in priorities {
            q.insert(&json!(p), p).unwrap();
        }

        let mut popped = Vec::new();
        while let Some((_, p)) = q.pop_highest().unwrap() {
            popped.push(p);
        }
        assert_eq!(popped, vec![10.25, 2.0, 0.5, -0.5, -3.0]);
    }

    #[test]
    fn peek_matches_pop_and_does_not_consume() {
        let mut q = queue();
        fill_messages(&mut q);

        let peeked = q.peek_highest().unwrap();
        assert_eq!(peeked, Some((msg("message 2"), 5.0)));
        assert_eq!(q.count().unwrap(), 4);
        assert_eq!(q.pop_highest().unwrap(), peeked);
    }

    #[test]
    fn iterate_count_clear() {
        let mut q = queue();
        assert_eq!(q.count().unwrap(), 0);
        assert!(q.iterate().unwrap().is_empty());

        fill_messages(&mut q);
        assert_eq!(q.count().unwrap(), 4);
        assert_eq!(
            q.iterate().unwrap(),
            vec![
                (msg("message 2"), 5.0),
                (msg("message 3"), 3.0),
                (msg("message 4"), 2.0),
                (msg("message 1"), 1.0),
            ]
        );
        // iterate is a snapshot, not a drain
        assert_eq!(q.count().unwrap(), 4);

        q.clear().unwrap();
        assert_eq!(q.count().unwrap(), 0);
        assert!(q.iterate().unwrap().is_empty());
    }

    #[test]
    fn count_tracks_inserts_minus_pops() {
        let mut q = queue();
        for i in 0..7 {
            q.insert(&json!({ "n": i }), f64::from(i)).unwrap();
        }
        for _ in 0..3 {
            q.pop_highest().unwrap();
        }
        assert_eq!(q.count().unwrap(), 4);
    }

    #[test]
    fn remove_keeps_complement_in_order() {
        let mut q = queue();
        for m in ["good message 1", "bad message 2", "good message 3", "bad message 4"] {
            q.push(&msg(m)).unwrap();
        }

        let removed = q
            .remove(|doc| doc.as_str().is_some_and(|s| s.starts_with("bad")))
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(
            q.iterate().unwrap(),
            vec![(msg("good message 1"), 0.0), (msg("good message 3"), 0.0)]
        );
    }

    #[test]
    fn remove_without_match_is_noop() {
        let mut q = queue();
        fill_messages(&mut q);
        assert_eq!(q.remove(|_| false).unwrap(), 0);
        assert_eq!(q.count().unwrap(), 4);
    }

    #[test]
    fn supported_payloads_roundtrip() {
        let values = vec![
            json!("native ascii str"),
            json!("\u{a3} \u{4e2d}\u{6587} \u{1f577}"),
            json!(123),
            json!(-9_007_199_254_740_993_i64),
            json!(1.2),
            json!(true),
            json!(null),
            json!(["a", "list", 1]),
            json!({ "a": "dict" }),
            json!({ "nested": { "list": [1, 2.5, { "deep": [null, false] }] }, "z": 1, "a": 2 }),
        ];

        let mut q = queue();
        for v in values {
            q.push(&v).unwrap();
            assert_eq!(q.pop_highest().unwrap(), Some((v, 0.0)));
        }
    }

    #[test]
    fn floats_come_back_bit_for_bit() {
        let values = [
            1.0715660391465826e-75,
            -1.603964615428183e143,
            0.1 + 0.2,
            f64::MIN_POSITIVE,
            5e-324,
            f64::MAX,
            -2.2250738585072014e-308,
        ];

        let mut q = queue();
        for v in values {
            q.insert(&json!({ "x": v, "list": [v] }), v).unwrap();
            let (doc, priority) = q.pop_highest().unwrap().unwrap();
            assert_eq!(priority.to_bits(), v.to_bits());
            assert_eq!(doc["x"].as_f64().unwrap().to_bits(), v.to_bits(), "{v:e}");
            assert_eq!(doc["list"][0].as_f64().unwrap().to_bits(), v.to_bits(), "{v:e}");
        }
    }

    #[test]
    fn map_key_order_is_preserved() {
        let mut q = queue();
        let doc = json!({ "zeta": 1, "alpha": 2, "mid": 3 });
        q.push(&doc).unwrap();

        let (back, _) = q.pop_highest().unwrap().unwrap();
        let keys: Vec<_> = back.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn nan_priority_is_rejected() {
        let mut q = queue();
        let err = q.insert(&msg("x"), f64::NAN).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPriority(_)));
        assert_eq!(q.count().unwrap(), 0);
    }

    #[test]
    fn ids_strictly_increase_after_pops() {
        let mut q = queue();
        let a = q.push(&msg("a")).unwrap();
        q.pop_highest().unwrap();
        let b = q.push(&msg("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queues").join("shop.db");

        {
            let mut q = PriorityQueue::open(&path).unwrap();
            fill_messages(&mut q);
            q.pop_highest().unwrap();
        }

        let mut q = PriorityQueue::open(&path).unwrap();
        assert_eq!(q.path(), Some(path.as_path()));
        assert_eq!(q.count().unwrap(), 3);
        assert_eq!(q.pop_highest().unwrap(), Some((msg("message 3"), 3.0)));
    }
}
