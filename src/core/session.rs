//! Conversation persistence as one JSON file per chat id
//!
//! Records are read once when a session starts and written once when it ends.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::fs;
use uuid::Uuid;

use crate::config::{PromptTemplate, TemplateError};
use crate::conversation::{ConversationRecord, Transcript, TranscriptError};

/// Length of the random part of a generated chat id
const CHAT_ID_SUFFIX_LEN: usize = 8;

/// A record ready for a session, fresh or loaded
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub chat_id: String,
    pub record: ConversationRecord,
    pub is_new: bool,
}

/// A stored chat, as listed from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub chat_id: String,
    pub modified: DateTime<Utc>,
}

/// Errors from resolving or saving sessions
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No saved chat with id '{0}'")]
    NotFound(String),

    #[error("Invalid chat id '{0}'")]
    InvalidChatId(String),

    #[error("I/O error while {operation} {path}: {source}")]
    Persistence {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not (de)serialize chat record {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),
}

impl SessionError {
    fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Build a fresh id like `test_chat_1f0c9a2e`
pub fn make_chat_id(chat_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", chat_name, &suffix[..CHAT_ID_SUFFIX_LEN])
}

fn validate_chat_id(chat_id: &str) -> Result<(), SessionError> {
    let invalid = chat_id.trim().is_empty()
        || chat_id.contains(['/', '\\'])
        || chat_id.contains("..")
        || chat_id.starts_with('.');
    if invalid {
        return Err(SessionError::InvalidChatId(chat_id.to_string()));
    }
    Ok(())
}

/// Maps chat ids to record files under one directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File holding the record for `chat_id`
    pub fn path_for(&self, chat_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", chat_id))
    }

    /// Load an existing chat by id, or start a new one named `chat_name`.
    ///
    /// For a loaded chat the participant names come from the record and
    /// `user_name`/`agent_name` are ignored.
    pub async fn resolve(
        &self,
        chat_id: Option<&str>,
        chat_name: &str,
        user_name: &str,
        agent_name: &str,
        template: &PromptTemplate,
    ) -> Result<ResolvedSession, SessionError> {
        if let Some(chat_id) = chat_id {
            let record = self.load(chat_id).await?;
            tracing::info!(
                chat_id,
                turns = record.turns.len(),
                "Resumed chat"
            );
            return Ok(ResolvedSession {
                chat_id: chat_id.to_string(),
                record,
                is_new: false,
            });
        }

        let chat_id = make_chat_id(chat_name);
        validate_chat_id(&chat_id)?;

        let opening = template.render_opening(user_name, agent_name)?;
        let transcript = Transcript::with_opening(&opening)?;
        tracing::info!(chat_id = %chat_id, "Started new chat");

        Ok(ResolvedSession {
            record: transcript.to_record(&chat_id, user_name, agent_name),
            chat_id,
            is_new: true,
        })
    }

    /// Read the record stored under exactly `chat_id`
    pub async fn load(&self, chat_id: &str) -> Result<ConversationRecord, SessionError> {
        validate_chat_id(chat_id)?;
        let path = self.path_for(chat_id);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SessionError::NotFound(chat_id.to_string()))
            }
            Err(e) => return Err(SessionError::io("reading", path, e)),
        };

        let mut record: ConversationRecord = serde_json::from_str(&content)
            .map_err(|source| SessionError::Serialization { path, source })?;

        if record.chat_id != chat_id {
            tracing::warn!(
                stored = %record.chat_id,
                requested = chat_id,
                "Chat record id does not match its file name, using the file name"
            );
            record.chat_id = chat_id.to_string();
        }

        Ok(record)
    }

    /// Write the whole record, replacing any earlier save
    pub async fn persist(&self, record: &ConversationRecord) -> Result<PathBuf, SessionError> {
        validate_chat_id(&record.chat_id)?;
        let path = self.path_for(&record.chat_id);

        let json = serde_json::to_string_pretty(record).map_err(|source| {
            SessionError::Serialization {
                path: path.clone(),
                source,
            }
        })?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SessionError::io("creating", &self.root, e))?;

        // Write beside the target, then swap it in
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| SessionError::io("writing", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::io("replacing", &path, e))?;

        tracing::info!(chat_id = %record.chat_id, path = %path.display(), "Saved chat");
        Ok(path)
    }

    /// Stored chats, most recently saved first
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io("listing", &self.root, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::io("listing", &self.root, e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };

            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| SessionError::io("inspecting", &path, e))?;

            sessions.push(SessionSummary {
                chat_id: stem.to_string_lossy().to_string(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        sessions.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.chat_id.cmp(&b.chat_id)));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Speaker;

    fn template() -> PromptTemplate {
        PromptTemplate::load("Hello {user_name}, {agent_name} here.\n######\n{transcript}").unwrap()
    }

    #[test]
    fn test_make_chat_id() {
        let id = make_chat_id("test_chat");
        assert!(id.starts_with("test_chat_"));
        assert_eq!(id.len(), "test_chat_".len() + CHAT_ID_SUFFIX_LEN);
        assert_ne!(make_chat_id("test_chat"), make_chat_id("test_chat"));
    }

    #[tokio::test]
    async fn test_new_session_seeded_with_opening() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let session = store
            .resolve(None, "demo", "Ann", "Bo", &template())
            .await
            .unwrap();

        assert!(session.is_new);
        assert!(session.chat_id.starts_with("demo_"));
        assert_eq!(session.record.chat_id, session.chat_id);

        let turns = session.record.turns.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker(), Speaker::Agent);
        assert_eq!(turns[0].text(), "Hello Ann, Bo here.");

        // Nothing is written until persist
        assert!(!store.path_for(&session.chat_id).exists());
    }

    #[tokio::test]
    async fn test_persist_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("turns"));

        let session = store
            .resolve(None, "demo", "Ann", "Bo", &template())
            .await
            .unwrap();
        let mut transcript = Transcript::from_record(&session.record);
        transcript.append(Speaker::User, "hi there").unwrap();
        transcript.append(Speaker::Agent, "hello!").unwrap();
        let record = transcript.to_record(&session.chat_id, "Ann", "Bo");

        let path = store.persist(&record).await.unwrap();
        assert_eq!(path, store.path_for(&session.chat_id));

        // Names passed on resume are ignored in favor of the stored ones
        let resumed = store
            .resolve(Some(&session.chat_id), "other", "Zed", "Max", &template())
            .await
            .unwrap();

        assert!(!resumed.is_new);
        assert_eq!(resumed.record, record);
        assert_eq!(resumed.record.user_name, "Ann");
        assert_eq!(resumed.record.agent_name, "Bo");
    }

    #[tokio::test]
    async fn test_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("turns"));

        let err = store
            .resolve(Some("missing-id"), "demo", "Ann", "Bo", &template())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::NotFound(ref id) if id == "missing-id"));
        assert!(!dir.path().join("turns").exists());
    }

    #[tokio::test]
    async fn test_path_like_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        for bad in ["../secrets", "a/b", "", ".hidden"] {
            let err = store.load(bad).await.unwrap_err();
            assert!(matches!(err, SessionError::InvalidChatId(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path_for("broken_1234abcd"), "{not json").unwrap();

        let err = store.load("broken_1234abcd").await.unwrap_err();
        assert!(matches!(err, SessionError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_record_with_blank_turn_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let json = r#"{
            "chat_id": "blank_1234abcd",
            "user_name": "Ann",
            "agent_name": "Bo",
            "turns": [{"speaker": "agent", "text": "Hello"}, {"speaker": "user", "text": ""}]
        }"#;
        std::fs::write(store.path_for("blank_1234abcd"), json).unwrap();

        let err = store.load("blank_1234abcd").await.unwrap_err();
        assert!(matches!(err, SessionError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_persist_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the directory should be
        let blocker = dir.path().join("turns");
        std::fs::write(&blocker, "").unwrap();
        let store = SessionStore::new(&blocker);

        let record = Transcript::with_opening("hi")
            .unwrap()
            .to_record("demo_1234abcd", "Ann", "Bo");
        let err = store.persist(&record).await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        for id in ["alpha_00000001", "beta_00000002"] {
            let record = Transcript::with_opening("hi").unwrap().to_record(id, "Ann", "Bo");
            store.persist(&record).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.chat_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["alpha_00000001", "beta_00000002"]);
    }
}
