//! Session store — in-memory conversation state with batched durable writes.
//!
//! Layout on disk:
//! - `<base>/memory.json` — snapshot of aggregate state (conversations,
//!   notes, session metadata, current session id), replaced atomically via
//!   write-temp-then-rename
//! - `<base>/sessions/<session-id>` — append-only log, one JSON-encoded
//!   `ChatMessage` per line
//!
//! All mutations are enqueued onto a bounded queue drained by a single
//! writer task; the writer applies them in order under the in-memory lock
//! and re-emits the snapshot every flush interval or every batch-size
//! tasks. When the queue is full (or the store is closed) the caller
//! applies the task inline — degraded but loss-free.
//!
//! Durability is "at most one flush interval of loss on hard crash" unless
//! `durable_sync` is enabled, which fsyncs after each append and snapshot.

use chrono::{DateTime, Utc};
use oxbow_core::message::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

const MEMORY_FILE_NAME: &str = "memory.json";
const SESSION_DIR_NAME: &str = "sessions";

/// Tuning knobs for the store; the defaults match production behavior.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub durable_sync: bool,
    /// Most recent messages kept in memory per session at startup; disk
    /// remains the authority on the total count.
    pub session_load_limit: usize,
    pub queue_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            batch_size: 50,
            durable_sync: false,
            session_load_limit: 200,
            queue_capacity: 1000,
        }
    }
}

/// Snapshot record persisted as `memory.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStorePersist {
    #[serde(default)]
    pub conversations: Vec<String>,

    #[serde(default)]
    pub notes: Vec<String>,

    #[serde(default)]
    pub sessions_meta: HashMap<String, SessionMeta>,

    #[serde(default)]
    pub current_session_id: String,
}

/// Metadata for one conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Count of messages persisted to the session log on disk; may exceed
    /// the count held in memory.
    pub message_count: usize,
}

struct SessionState {
    meta: SessionMeta,
    messages: Vec<ChatMessage>,
}

#[derive(Default)]
struct StoreState {
    conversations: Vec<String>,
    notes: Vec<String>,
    sessions: HashMap<String, SessionState>,
    current_session_id: String,
}

/// One queued mutation. Applied in enqueue order by the writer task.
enum StoreTask {
    AddConversation(String),
    AddNote(String),
    CreateSession { id: String, title: String },
    SetCurrent(String),
    AppendMessage { session_id: String, message: ChatMessage },
    Shutdown,
}

#[derive(Clone)]
struct StorePaths {
    base_dir: PathBuf,
    memory_path: PathBuf,
    session_dir: PathBuf,
}

/// The session store. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct SessionStore {
    state: Arc<RwLock<StoreState>>,
    paths: StorePaths,
    durable_sync: bool,
    dirty: Arc<AtomicBool>,
    queue: mpsc::Sender<StoreTask>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionStore {
    /// Open (or create) a store rooted at `base_dir` with default options.
    pub async fn open(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::open_with(base_dir, StoreOptions::default()).await
    }

    /// Open (or create) a store with explicit options.
    pub async fn open_with(
        base_dir: impl Into<PathBuf>,
        options: StoreOptions,
    ) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        let paths = StorePaths {
            memory_path: base_dir.join(MEMORY_FILE_NAME),
            session_dir: base_dir.join(SESSION_DIR_NAME),
            base_dir,
        };
        std::fs::create_dir_all(&paths.session_dir)?;

        let state = load_from_disk(&paths, options.session_load_limit);
        let state = Arc::new(RwLock::new(state));
        let dirty = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel(options.queue_capacity);
        let writer = tokio::spawn(writer_loop(
            rx,
            state.clone(),
            paths.clone(),
            options.durable_sync,
            dirty.clone(),
            options.flush_interval,
            options.batch_size,
        ));

        Ok(Self {
            state,
            paths,
            durable_sync: options.durable_sync,
            dirty,
            queue: tx,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Record a user prompt in the aggregate conversation list.
    pub async fn add_conversation(&self, text: impl Into<String>) {
        self.enqueue(StoreTask::AddConversation(text.into())).await;
    }

    /// Record a final answer as a note.
    pub async fn add_note(&self, text: impl Into<String>) {
        self.enqueue(StoreTask::AddNote(text.into())).await;
    }

    /// Create a session and make it current. Applied synchronously so a
    /// caller can append to the session right away; the snapshot still
    /// rides the writer's flush cadence.
    pub async fn create_session(&self, id: impl Into<String>, title: impl Into<String>) {
        let task = StoreTask::CreateSession {
            id: id.into(),
            title: title.into(),
        };
        apply_task(&self.state, &self.paths, self.durable_sync, task).await;
        self.dirty.store(true, Ordering::Release);
    }

    /// Switch the current session. Returns false (and changes nothing) for
    /// an unknown id.
    pub async fn set_current_session(&self, id: &str) -> bool {
        if !self.state.read().await.sessions.contains_key(id) {
            return false;
        }
        self.enqueue(StoreTask::SetCurrent(id.to_string())).await;
        true
    }

    /// Append a message to a session's history and its on-disk log.
    /// Returns false for an unknown session id.
    pub async fn append_message(&self, session_id: &str, message: ChatMessage) -> bool {
        if !self.state.read().await.sessions.contains_key(session_id) {
            return false;
        }
        self.enqueue(StoreTask::AppendMessage {
            session_id: session_id.to_string(),
            message,
        })
        .await;
        true
    }

    /// The in-memory message window for a session (a copy), or `None` for
    /// an unknown id.
    pub async fn get_session_messages(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        let state = self.state.read().await;
        state.sessions.get(session_id).map(|s| s.messages.clone())
    }

    /// Whether a session exists.
    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.state.read().await.sessions.contains_key(session_id)
    }

    /// The current session id, or an empty string when none is set.
    pub async fn current_session_id(&self) -> String {
        self.state.read().await.current_session_id.clone()
    }

    /// Metadata for every session (copies).
    pub async fn all_sessions(&self) -> HashMap<String, SessionMeta> {
        let state = self.state.read().await;
        state
            .sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.meta.clone()))
            .collect()
    }

    pub async fn conversations(&self) -> Vec<String> {
        self.state.read().await.conversations.clone()
    }

    pub async fn notes(&self) -> Vec<String> {
        self.state.read().await.notes.clone()
    }

    /// Drain the write queue, persist a final snapshot, and stop the writer.
    /// Tasks enqueued after close are applied inline (best-effort).
    pub async fn close(&self) {
        let _ = self.queue.send(StoreTask::Shutdown).await;
        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn enqueue(&self, task: StoreTask) {
        match self.queue.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                // Queue saturated or writer gone: apply on the caller so the
                // mutation is never dropped.
                apply_task(&self.state, &self.paths, self.durable_sync, task).await;
                self.dirty.store(true, Ordering::Release);
            }
        }
    }
}

async fn writer_loop(
    mut rx: mpsc::Receiver<StoreTask>,
    state: Arc<RwLock<StoreState>>,
    paths: StorePaths,
    durable_sync: bool,
    dirty: Arc<AtomicBool>,
    flush_interval: Duration,
    batch_size: usize,
) {
    let mut interval = tokio::time::interval(flush_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut applied_since_snapshot = 0usize;

    loop {
        tokio::select! {
            task = rx.recv() => {
                match task {
                    None | Some(StoreTask::Shutdown) => break,
                    Some(task) => {
                        apply_task(&state, &paths, durable_sync, task).await;
                        dirty.store(true, Ordering::Release);
                        applied_since_snapshot += 1;
                        if applied_since_snapshot >= batch_size {
                            persist_snapshot(&state, &paths, durable_sync).await;
                            dirty.store(false, Ordering::Release);
                            applied_since_snapshot = 0;
                        }
                    }
                }
            }
            _ = interval.tick() => {
                if dirty.swap(false, Ordering::AcqRel) {
                    persist_snapshot(&state, &paths, durable_sync).await;
                    applied_since_snapshot = 0;
                }
            }
        }
    }

    // Drain whatever is still queued, then take the final snapshot.
    while let Ok(task) = rx.try_recv() {
        if !matches!(task, StoreTask::Shutdown) {
            apply_task(&state, &paths, durable_sync, task).await;
        }
    }
    persist_snapshot(&state, &paths, durable_sync).await;
    debug!("Session store writer stopped");
}

async fn apply_task(
    state: &RwLock<StoreState>,
    paths: &StorePaths,
    durable_sync: bool,
    task: StoreTask,
) {
    match task {
        StoreTask::AddConversation(text) => {
            state.write().await.conversations.push(text);
        }
        StoreTask::AddNote(text) => {
            state.write().await.notes.push(text);
        }
        StoreTask::CreateSession { id, title } => {
            let now = Utc::now();
            let mut s = state.write().await;
            s.sessions.insert(
                id.clone(),
                SessionState {
                    meta: SessionMeta {
                        id: id.clone(),
                        title,
                        created_at: now,
                        last_active_at: now,
                        message_count: 0,
                    },
                    messages: Vec::new(),
                },
            );
            s.current_session_id = id;
        }
        StoreTask::SetCurrent(id) => {
            let mut s = state.write().await;
            if let Some(session) = s.sessions.get_mut(&id) {
                session.meta.last_active_at = Utc::now();
            } else {
                return;
            }
            s.current_session_id = id;
        }
        StoreTask::AppendMessage {
            session_id,
            message,
        } => {
            {
                let mut s = state.write().await;
                let Some(session) = s.sessions.get_mut(&session_id) else {
                    warn!(session_id = %session_id, "Append to unknown session dropped");
                    return;
                };
                session.messages.push(message.clone());
                session.meta.message_count += 1;
                session.meta.last_active_at = Utc::now();
            }
            if let Err(e) = append_session_line(paths, durable_sync, &session_id, &message) {
                warn!(session_id = %session_id, error = %e, "Failed to append session log line");
            }
        }
        StoreTask::Shutdown => {}
    }
}

fn append_session_line(
    paths: &StorePaths,
    durable_sync: bool,
    session_id: &str,
    message: &ChatMessage,
) -> std::io::Result<()> {
    use std::io::Write;

    let path = paths.session_dir.join(session_id);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)?;

    let line = serde_json::to_string(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    if durable_sync {
        file.sync_all()?;
    }
    Ok(())
}

async fn persist_snapshot(state: &RwLock<StoreState>, paths: &StorePaths, durable_sync: bool) {
    let snapshot = {
        let s = state.read().await;
        MemoryStorePersist {
            conversations: s.conversations.clone(),
            notes: s.notes.clone(),
            sessions_meta: s
                .sessions
                .iter()
                .map(|(id, session)| (id.clone(), session.meta.clone()))
                .collect(),
            current_session_id: s.current_session_id.clone(),
        }
    };

    let bytes = match serde_json::to_string_pretty(&snapshot) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "Failed to serialize memory snapshot");
            return;
        }
    };

    // Write-temp-then-rename so a concurrent reader sees either the old or
    // the new snapshot, never a partial one.
    let tmp_path = paths.memory_path.with_extension("json.tmp");
    if let Err(e) = std::fs::write(&tmp_path, bytes.as_bytes()) {
        warn!(error = %e, "Failed to write memory snapshot temp file");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp_path, &paths.memory_path) {
        warn!(error = %e, "Failed to replace memory snapshot");
        return;
    }
    if durable_sync {
        if let Ok(dir) = std::fs::File::open(&paths.base_dir) {
            let _ = dir.sync_all();
        }
    }
}

fn load_from_disk(paths: &StorePaths, session_load_limit: usize) -> StoreState {
    let mut state = StoreState::default();

    // Snapshot first: absence and corruption are both non-fatal.
    match std::fs::read_to_string(&paths.memory_path) {
        Ok(content) => match serde_json::from_str::<MemoryStorePersist>(&content) {
            Ok(persisted) => {
                state.conversations = persisted.conversations;
                state.notes = persisted.notes;
                state.current_session_id = persisted.current_session_id;
                for (id, meta) in persisted.sessions_meta {
                    state.sessions.insert(
                        id,
                        SessionState {
                            meta,
                            messages: Vec::new(),
                        },
                    );
                }
            }
            Err(e) => {
                warn!(path = %paths.memory_path.display(), error = %e,
                    "Corrupt memory snapshot ignored, starting empty");
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %paths.memory_path.display(), error = %e,
                "Could not read memory snapshot, starting empty");
        }
    }

    // Session logs: stream-parse each file, keep only the most recent
    // window in memory but record the true on-disk count.
    let entries = match std::fs::read_dir(&paths.session_dir) {
        Ok(entries) => entries,
        Err(_) => return state,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let session_id = entry.file_name().to_string_lossy().to_string();
        let (messages, total) = load_session_file(&path, session_load_limit);
        if total == 0 {
            continue;
        }

        match state.sessions.get_mut(&session_id) {
            Some(session) => {
                session.messages = messages;
                session.meta.message_count = total;
            }
            None => {
                let now = Utc::now();
                state.sessions.insert(
                    session_id.clone(),
                    SessionState {
                        meta: SessionMeta {
                            id: session_id.clone(),
                            title: session_id,
                            created_at: now,
                            last_active_at: now,
                            message_count: total,
                        },
                        messages,
                    },
                );
            }
        }
    }

    info!(
        sessions = state.sessions.len(),
        conversations = state.conversations.len(),
        "Session store loaded"
    );
    state
}

/// Parse a session log, skipping corrupt lines, returning the retained tail
/// and the count of valid lines on disk.
fn load_session_file(path: &Path, limit: usize) -> (Vec<ChatMessage>, usize) {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return (Vec::new(), 0),
    };

    let mut messages = Vec::new();
    let mut total = 0usize;
    for line in std::io::BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChatMessage>(&line) {
            Ok(msg) => {
                total += 1;
                messages.push(msg);
                if messages.len() > limit {
                    let excess = messages.len() - limit;
                    messages.drain(..excess);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupt session log line");
            }
        }
    }
    (messages, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxbow_core::message::Role;
    use std::io::Write;

    fn fast_options() -> StoreOptions {
        StoreOptions {
            flush_interval: Duration::from_millis(20),
            batch_size: 4,
            ..StoreOptions::default()
        }
    }

    #[tokio::test]
    async fn create_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();

        store.create_session("s1", "First session").await;
        assert!(store.append_message("s1", ChatMessage::user("hello")).await);
        assert!(
            store
                .append_message("s1", ChatMessage::assistant("hi there"))
                .await
        );
        store.close().await;

        let messages = store.get_session_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(store.current_session_id().await, "s1");

        let meta = store.all_sessions().await;
        assert_eq!(meta["s1"].message_count, 2);
        assert_eq!(meta["s1"].title, "First session");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
            store.create_session("s1", "Persisted").await;
            store.append_message("s1", ChatMessage::user("one")).await;
            store.append_message("s1", ChatMessage::assistant("two")).await;
            store.add_conversation("one").await;
            store.add_note("two").await;
            store.close().await;
        }

        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        let messages = store.get_session_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "two");
        assert_eq!(store.current_session_id().await, "s1");
        assert_eq!(store.conversations().await, vec!["one"]);
        assert_eq!(store.notes().await, vec!["two"]);
        assert_eq!(store.all_sessions().await["s1"].title, "Persisted");
        store.close().await;
    }

    #[tokio::test]
    async fn session_log_is_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        store.create_session("s1", "t").await;
        store.append_message("s1", ChatMessage::user("line one")).await;
        store.append_message("s1", ChatMessage::user("line two")).await;
        store.close().await;

        let content =
            std::fs::read_to_string(dir.path().join(SESSION_DIR_NAME).join("s1")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let msg: ChatMessage = serde_json::from_str(line).unwrap();
            assert_eq!(msg.role, Role::User);
        }
    }

    #[tokio::test]
    async fn snapshot_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        store.create_session("s1", "t").await;
        store.close().await;

        let content = std::fs::read_to_string(dir.path().join(MEMORY_FILE_NAME)).unwrap();
        let snapshot: MemoryStorePersist = serde_json::from_str(&content).unwrap();
        assert_eq!(snapshot.current_session_id, "s1");
        assert!(snapshot.sessions_meta.contains_key("s1"));
    }

    #[tokio::test]
    async fn corrupt_session_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join(SESSION_DIR_NAME);
        std::fs::create_dir_all(&session_dir).unwrap();

        let mut file = std::fs::File::create(session_dir.join("s1")).unwrap();
        writeln!(file, r#"{{"role":"user","content":"valid"}}"#).unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file, r#"{{"role":"assistant","content":"also valid"}}"#).unwrap();

        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        let messages = store.get_session_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(store.all_sessions().await["s1"].message_count, 2);
        store.close().await;
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(MEMORY_FILE_NAME), "{ not json").unwrap();

        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        assert!(store.conversations().await.is_empty());
        assert_eq!(store.current_session_id().await, "");
        store.close().await;
    }

    #[tokio::test]
    async fn set_current_unknown_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        store.create_session("known", "t").await;

        assert!(!store.set_current_session("unknown").await);
        store.close().await;
        assert_eq!(store.current_session_id().await, "known");
    }

    #[tokio::test]
    async fn append_to_unknown_session_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        assert!(!store.append_message("nope", ChatMessage::user("x")).await);
        store.close().await;
    }

    #[tokio::test]
    async fn load_truncates_to_limit_but_counts_all() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
            store.create_session("s1", "long").await;
            for i in 0..10 {
                store
                    .append_message("s1", ChatMessage::user(format!("msg {i}")))
                    .await;
            }
            store.close().await;
        }

        let options = StoreOptions {
            session_load_limit: 3,
            ..fast_options()
        };
        let store = SessionStore::open_with(dir.path(), options).await.unwrap();
        let messages = store.get_session_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 3);
        // the retained window is the tail of the log
        assert_eq!(messages[0].content, "msg 7");
        assert_eq!(messages[2].content, "msg 9");
        assert_eq!(store.all_sessions().await["s1"].message_count, 10);
        store.close().await;
    }

    #[tokio::test]
    async fn readers_get_copies() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        store.create_session("s1", "t").await;
        store.append_message("s1", ChatMessage::user("a")).await;
        store.close().await;

        let mut copy = store.get_session_messages("s1").await.unwrap();
        copy.push(ChatMessage::user("mutated copy"));
        assert_eq!(store.get_session_messages("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_after_close_apply_inline() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_with(dir.path(), fast_options()).await.unwrap();
        store.create_session("s1", "t").await;
        store.close().await;

        // The writer is gone, so this takes the inline path.
        assert!(store.append_message("s1", ChatMessage::user("late")).await);
        let messages = store.get_session_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "late");
    }
}
