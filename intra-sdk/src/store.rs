//! Local message history backed by SQLite.
//!
//! Every chat message the session sends or receives lands here, whether or
//! not its conversation is open, so history can be shown when the
//! conversation is opened later.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::error::StoreError;
use crate::protocol::{ChatBody, ChatEvent};

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    /// Row id; 0 until inserted.
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    /// `"text"` or `"file"`.
    pub kind: String,
    /// Message text, or `"Shared File: {filename}"` for files.
    pub text: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Sent by the local identity.
    pub is_self: bool,
}

impl ChatRecord {
    /// Project a chat event into a record from the point of view of `me`.
    pub fn from_event(event: &ChatEvent, me: &str) -> Self {
        let (text, file_url, file_name) = match &event.body {
            ChatBody::Text(text) => (text.clone(), None, None),
            ChatBody::File { url, filename } => (
                format!("Shared File: {filename}"),
                Some(url.clone()),
                Some(filename.clone()),
            ),
        };
        Self {
            id: 0,
            sender: event.sender.clone(),
            receiver: event.receiver.clone(),
            kind: event.kind().to_string(),
            text,
            file_url,
            file_name,
            timestamp: event.timestamp,
            is_self: event.sender == me,
        }
    }
}

/// Storage collaborator used by the session.
pub trait MessageStore: Send + Sync {
    /// Store a record, returning its row id.
    fn insert(&self, record: &ChatRecord) -> Result<i64, StoreError>;

    /// Both directions of the conversation between `peer` and `me`, oldest first.
    fn messages_with(&self, peer: &str, me: &str) -> Result<Vec<ChatRecord>, StoreError>;

    /// Everything addressed to `broadcast`, oldest first.
    fn broadcast_messages(&self, broadcast: &str) -> Result<Vec<ChatRecord>, StoreError>;

    /// All stored messages, oldest first.
    fn all_messages(&self) -> Result<Vec<ChatRecord>, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// SQLite message store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str =
    "SELECT id, sender, receiver, kind, text, file_url, file_name, timestamp, is_self FROM messages";

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                file_url TEXT,
                file_name TEXT,
                timestamp INTEGER NOT NULL,
                is_self INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON messages(sender, receiver, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver
                ON messages(receiver, timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ChatRecord>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("{SELECT_COLUMNS} {filter} ORDER BY timestamp ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(ChatRecord {
                    id: row.get(0)?,
                    sender: row.get(1)?,
                    receiver: row.get(2)?,
                    kind: row.get(3)?,
                    text: row.get(4)?,
                    file_url: row.get(5)?,
                    file_name: row.get(6)?,
                    timestamp: row.get(7)?,
                    is_self: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl MessageStore for SqliteStore {
    fn insert(&self, record: &ChatRecord) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (sender, receiver, kind, text, file_url, file_name, timestamp, is_self)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.sender,
                record.receiver,
                record.kind,
                record.text,
                record.file_url,
                record.file_name,
                record.timestamp,
                record.is_self,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn messages_with(&self, peer: &str, me: &str) -> Result<Vec<ChatRecord>, StoreError> {
        self.query(
            "WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
            &[&peer, &me],
        )
    }

    fn broadcast_messages(&self, broadcast: &str) -> Result<Vec<ChatRecord>, StoreError> {
        self.query("WHERE receiver = ?1", &[&broadcast])
    }

    fn all_messages(&self) -> Result<Vec<ChatRecord>, StoreError> {
        self.query("", &[])
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn.lock().execute("DELETE FROM messages", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(sender: &str, receiver: &str, body: &str, ts: i64) -> ChatRecord {
        ChatRecord::from_event(&ChatEvent::text(sender, receiver, body, ts), "bob")
    }

    #[test]
    fn conversation_includes_both_directions_in_order() {
        let db = SqliteStore::open_memory().unwrap();
        db.insert(&text("alice", "bob", "second", 2000)).unwrap();
        db.insert(&text("bob", "alice", "first", 1000)).unwrap();
        db.insert(&text("carol", "bob", "other", 1500)).unwrap();

        let msgs = db.messages_with("alice", "bob").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text, "first");
        assert!(msgs[0].is_self);
        assert_eq!(msgs[1].text, "second");
        assert!(!msgs[1].is_self);
    }

    #[test]
    fn broadcast_isolated_from_direct() {
        let db = SqliteStore::open_memory().unwrap();
        db.insert(&text("alice", "Family Group", "hi all", 1000)).unwrap();
        db.insert(&text("alice", "bob", "hi bob", 1001)).unwrap();

        let group = db.broadcast_messages("Family Group").unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].text, "hi all");
        assert!(db.messages_with("alice", "bob").unwrap().iter().all(|m| m.receiver == "bob"));
    }

    #[test]
    fn file_record_keeps_metadata() {
        let db = SqliteStore::open_memory().unwrap();
        let ev = ChatEvent::file("alice", "bob", "/uploads/a.pdf", "a.pdf", 5);
        let id = db.insert(&ChatRecord::from_event(&ev, "bob")).unwrap();
        assert!(id > 0);

        let all = db.all_messages().unwrap();
        assert_eq!(all[0].kind, "file");
        assert_eq!(all[0].text, "Shared File: a.pdf");
        assert_eq!(all[0].file_url.as_deref(), Some("/uploads/a.pdf"));
        assert_eq!(all[0].file_name.as_deref(), Some("a.pdf"));
    }

    #[test]
    fn clear_removes_everything() {
        let db = SqliteStore::open_memory().unwrap();
        db.insert(&text("alice", "bob", "x", 1)).unwrap();
        db.clear().unwrap();
        assert!(db.all_messages().unwrap().is_empty());
    }

    #[test]
    fn reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        {
            let db = SqliteStore::open(&path).unwrap();
            db.insert(&text("alice", "bob", "persisted", 1)).unwrap();
        }
        let db = SqliteStore::open(&path).unwrap();
        assert_eq!(db.all_messages().unwrap()[0].text, "persisted");
    }
}
