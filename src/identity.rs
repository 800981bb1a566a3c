//! Durable session identity.
//!
//! The identity is the triple (session id, display name, participant record)
//! that lets a restarted client rejoin the game it left. It lives in an
//! [`IdentityStore`] as three string entries under fixed keys, which are
//! written and cleared together.
//!
//! The participant record is a cache. The roster inside the latest
//! [`GameState`](crate::protocol::GameState) is authoritative.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{Participant, ParticipantId, SessionId};

/// Key of the last joined session id.
pub const KEY_SESSION_ID: &str = "last_session_id";

/// Key of the last used display name.
pub const KEY_DISPLAY_NAME: &str = "last_display_name";

/// Key of the last resolved participant record (JSON).
pub const KEY_PARTICIPANT: &str = "last_participant";

/// A string key-value store that survives process restarts.
pub trait IdentityStore: Send + 'static {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns an error if the value could not be made durable.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the removal could not be made durable.
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// In-memory store. Nothing survives the process; meant for tests and
/// throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries.
    ///
    /// A missing file is an empty store. A corrupt file is logged and treated
    /// as empty; it is replaced on the next write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`](crate::SessionError::Io) if the file
    /// exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: HashMap<String, String> = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("ignoring corrupt identity file {}: {e}", path.display());
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "identity store opened");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl IdentityStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Who this client is, across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub display_name: String,
    /// Filled once the server confirms which roster entry is ours.
    pub participant: Option<Participant>,
}

impl SessionIdentity {
    pub fn new(session_id: impl Into<SessionId>, display_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            display_name: display_name.into(),
            participant: None,
        }
    }

    /// Read the identity persisted in `store`. Missing entries come back
    /// empty; an unreadable participant record is dropped.
    pub fn load(store: &dyn IdentityStore) -> Self {
        let participant = store.get(KEY_PARTICIPANT).and_then(|raw| {
            serde_json::from_str::<Participant>(&raw)
                .map_err(|e| warn!("discarding unreadable stored participant: {e}"))
                .ok()
        });
        Self {
            session_id: store.get(KEY_SESSION_ID).unwrap_or_default(),
            display_name: store.get(KEY_DISPLAY_NAME).unwrap_or_default(),
            participant,
        }
    }

    /// Both the session id and display name are present, so a join can be
    /// issued on the user's behalf.
    pub fn is_resumable(&self) -> bool {
        !self.session_id.trim().is_empty() && !self.display_name.trim().is_empty()
    }

    pub fn participant_id(&self) -> Option<&ParticipantId> {
        self.participant.as_ref().map(|p| &p.id)
    }

    /// Persist the session id and display name.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn save_credentials(&self, store: &mut dyn IdentityStore) -> Result<()> {
        store.set(KEY_SESSION_ID, &self.session_id)?;
        store.set(KEY_DISPLAY_NAME, &self.display_name)
    }

    /// Persist the participant record, or remove it when unset.
    ///
    /// # Errors
    ///
    /// Propagates store and serialization failures.
    pub fn save_participant(&self, store: &mut dyn IdentityStore) -> Result<()> {
        match &self.participant {
            Some(participant) => store.set(KEY_PARTICIPANT, &serde_json::to_string(participant)?),
            None => store.remove(KEY_PARTICIPANT),
        }
    }

    /// Persist all three entries.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn save(&self, store: &mut dyn IdentityStore) -> Result<()> {
        self.save_credentials(store)?;
        self.save_participant(store)
    }

    /// Remove all three entries from `store`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn clear(store: &mut dyn IdentityStore) -> Result<()> {
        store.remove(KEY_SESSION_ID)?;
        store.remove(KEY_DISPLAY_NAME)?;
        store.remove(KEY_PARTICIPANT)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn ana() -> Participant {
        Participant {
            id: "p1".into(),
            display_name: "Ana".into(),
            symbol: "X".into(),
            score: 2,
            is_active: false,
            capabilities: vec!["EXTRA_TURN".into()],
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ttt-session-{}-{name}/identity.json",
            std::process::id()
        ))
    }

    #[test]
    fn empty_store_loads_empty_identity() {
        let identity = SessionIdentity::load(&MemoryStore::new());
        assert_eq!(identity, SessionIdentity::default());
        assert!(!identity.is_resumable());
    }

    #[test]
    fn whitespace_is_not_resumable() {
        assert!(!SessionIdentity::new("  ", "Ana").is_resumable());
        assert!(!SessionIdentity::new("G1", "").is_resumable());
        assert!(SessionIdentity::new("G1", "Ana").is_resumable());
    }

    #[test]
    fn save_then_load_round_trips_through_memory() {
        let mut store = MemoryStore::new();
        let mut identity = SessionIdentity::new("G1", "Ana");
        identity.participant = Some(ana());
        identity.save(&mut store).unwrap();

        assert_eq!(store.get(KEY_SESSION_ID).as_deref(), Some("G1"));
        assert_eq!(SessionIdentity::load(&store), identity);
    }

    #[test]
    fn unreadable_participant_is_dropped() {
        let mut store = MemoryStore::new();
        store.set(KEY_SESSION_ID, "G1").unwrap();
        store.set(KEY_DISPLAY_NAME, "Ana").unwrap();
        store.set(KEY_PARTICIPANT, "{not json").unwrap();

        let identity = SessionIdentity::load(&store);
        assert!(identity.is_resumable());
        assert!(identity.participant.is_none());
    }

    #[test]
    fn clear_removes_all_entries() {
        let mut store = MemoryStore::new();
        let mut identity = SessionIdentity::new("G1", "Ana");
        identity.participant = Some(ana());
        identity.save(&mut store).unwrap();

        SessionIdentity::clear(&mut store).unwrap();
        assert!(store.get(KEY_SESSION_ID).is_none());
        assert!(store.get(KEY_DISPLAY_NAME).is_none());
        assert!(store.get(KEY_PARTICIPANT).is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let mut store = FileStore::open(&path).unwrap();
            let mut identity = SessionIdentity::new("G7", "Bruno");
            identity.participant = Some(ana());
            identity.save(&mut store).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let identity = SessionIdentity::load(&store);
        assert_eq!(identity.session_id, "G7");
        assert_eq!(identity.display_name, "Bruno");
        assert_eq!(identity.participant_id().map(String::as_str), Some("p1"));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "garbage").unwrap();

        let mut store = FileStore::open(&path).unwrap();
        assert!(store.get(KEY_SESSION_ID).is_none());
        store.set(KEY_SESSION_ID, "G2").unwrap();
        assert_eq!(
            FileStore::open(&path).unwrap().get(KEY_SESSION_ID).as_deref(),
            Some("G2")
        );

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
