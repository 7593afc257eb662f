//! Conversation sessions
//!
//! A session owns one conversation log and runs the per-turn cycle:
//! append the user turn, bound the log through the memory policy, ask the
//! model, append the reply. The memory policy itself holds no state.
//!
//! A session may also pin a reference document. The pinned context turn is
//! kept beside the log rather than in it and is put in front of every model
//! call, so the memory policies never count, drop or summarize it.

use crate::documents::context_turn;
use crate::llm::ChatModel;
use crate::memory::{BoundedMemory, ConversationLog, MemoryPolicy, Turn};
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Output cap for conversational replies
pub const REPLY_MAX_TOKENS: u32 = 1500;

pub const DEFAULT_MAX_SESSIONS: usize = 1_000;
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// What the memory policy did on this turn
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub policy: MemoryPolicy,
    /// Turns handed to the model, pinned context included
    pub turns_sent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<usize>,
    pub summarized: bool,
    pub dropped: usize,
    pub tail_exceeds_budget: bool,
    pub context_pinned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub reply: String,
    pub memory: MemoryReport,
}

pub struct ConversationSession {
    session_id: Uuid,
    log: ConversationLog,
    memory: Arc<dyn BoundedMemory>,
    context: Option<Turn>,
    turns_completed: u64,
}

impl ConversationSession {
    pub fn new(session_id: Uuid, memory: Arc<dyn BoundedMemory>, greeting: Option<&str>) -> Result<Self> {
        let log = match greeting {
            Some(text) => ConversationLog::with_greeting(text)?,
            None => ConversationLog::new(),
        };

        Ok(Self {
            session_id,
            log,
            memory,
            context: None,
            turns_completed: 0,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The last known-good bounded log, including the latest reply
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// The pinned context turn, if a document is attached
    pub fn context(&self) -> Option<&Turn> {
        self.context.as_ref()
    }

    /// Pin `document` to the conversation, replacing any earlier one.
    /// The log is left as it is.
    pub fn set_context(&mut self, document: &str) -> Result<()> {
        self.context = Some(context_turn(document)?);
        info!(
            session_id = %self.session_id,
            chars = document.len(),
            "Context document pinned"
        );
        Ok(())
    }

    pub fn clear_context(&mut self) -> bool {
        self.context.take().is_some()
    }

    pub fn turns_completed(&self) -> u64 {
        self.turns_completed
    }

    /// No completed turn and no pinned document: nothing worth keeping
    pub fn is_pristine(&self) -> bool {
        self.turns_completed == 0 && self.context.is_none()
    }

    /// Clear the conversation. A pinned document stays pinned.
    pub fn reset(&mut self, greeting: Option<&str>) -> Result<()> {
        self.log = match greeting {
            Some(text) => ConversationLog::with_greeting(text)?,
            None => ConversationLog::new(),
        };
        Ok(())
    }

    /// Run one conversation turn.
    ///
    /// Work happens on a copy; the session log is only replaced once the
    /// model has replied. Any failure (memory update or model call) leaves
    /// the previous log in place and the user turn uncommitted.
    pub async fn send(&mut self, user_text: &str, model: &dyn ChatModel) -> Result<TurnReport> {
        let mut working = self.log.clone();
        working.push(Turn::user(user_text)?);

        let bounded = match self.memory.bound(&working).await {
            Ok(bounded) => bounded,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    "Memory update failed, keeping previous log: {}", e
                );
                return Err(e);
            }
        };

        let reply = match &self.context {
            Some(context) => {
                let mut outgoing = Vec::with_capacity(bounded.log.len() + 1);
                outgoing.push(context.clone());
                outgoing.extend_from_slice(bounded.log.turns());
                model.complete(&outgoing, REPLY_MAX_TOKENS).await?
            }
            None => model.complete(bounded.log.turns(), REPLY_MAX_TOKENS).await?,
        };

        let memory = MemoryReport {
            policy: self.memory.policy(),
            turns_sent: bounded.log.len() + usize::from(self.context.is_some()),
            total_tokens: bounded.total_tokens,
            summarized: bounded.summarized,
            dropped: bounded.dropped,
            tail_exceeds_budget: bounded.tail_exceeds_budget,
            context_pinned: self.context.is_some(),
        };

        let mut next = bounded.log;
        next.push(Turn::assistant(reply.clone())?);
        self.log = next;
        self.turns_completed += 1;

        info!(
            session_id = %self.session_id,
            turns = self.log.len(),
            summarized = memory.summarized,
            dropped = memory.dropped,
            "Turn completed"
        );

        Ok(TurnReport { reply, memory })
    }
}

type SharedSession = Arc<Mutex<ConversationSession>>;

struct SessionEntry {
    session: SharedSession,
    /// Milliseconds since the store's epoch
    last_active_ms: AtomicU64,
    /// Store-wide access counter value at the last touch, for LRU order
    last_used: AtomicU64,
}

impl SessionEntry {
    /// Someone outside the store still holds the session
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

/// In-memory registry of live sessions.
///
/// Each session sits behind its own mutex, so turns within one conversation
/// are serialized while different conversations proceed independently.
///
/// The map is bounded: creating a session first sweeps out sessions idle for
/// longer than the idle TTL, then evicts least recently used ones until there
/// is room under `max_sessions`. Sessions a request is currently holding are
/// never evicted.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    memory: Arc<dyn BoundedMemory>,
    greeting: Option<String>,
    max_sessions: usize,
    idle_ttl: Duration,
    epoch: Instant,
    clock: AtomicU64,
}

impl SessionStore {
    pub fn new(memory: Arc<dyn BoundedMemory>, greeting: Option<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            memory,
            greeting,
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            epoch: Instant::now(),
            clock: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, max_sessions: usize, idle_ttl: Duration) -> Self {
        self.max_sessions = max_sessions.max(1);
        self.idle_ttl = idle_ttl;
        self
    }

    pub async fn get_or_create(&self, session_id: Uuid) -> Result<SharedSession> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(&session_id) {
                self.touch(entry);
                return Ok(entry.session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(&session_id) {
            self.touch(entry);
            return Ok(entry.session.clone());
        }

        self.make_room(&mut sessions);

        let session = Arc::new(Mutex::new(ConversationSession::new(
            session_id,
            self.memory.clone(),
            self.greeting.as_deref(),
        )?));
        let entry = SessionEntry {
            session: session.clone(),
            last_active_ms: AtomicU64::new(0),
            last_used: AtomicU64::new(0),
        };
        self.touch(&entry);
        sessions.insert(session_id, entry);

        info!(%session_id, live = sessions.len(), "Session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Option<SharedSession> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).map(|entry| {
            self.touch(entry);
            entry.session.clone()
        })
    }

    pub async fn remove(&self, session_id: Uuid) -> bool {
        self.sessions.write().await.remove(&session_id).is_some()
    }

    /// Drop a session nobody is using that never completed a turn. Used
    /// after a failed first turn so failed requests leave nothing behind.
    pub async fn discard_if_pristine(&self, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;

        let pristine = match sessions.get(&session_id) {
            Some(entry) if !entry.in_use() => entry
                .session
                .try_lock()
                .map(|session| session.is_pristine())
                .unwrap_or(false),
            _ => false,
        };

        if pristine {
            sessions.remove(&session_id);
            debug!(%session_id, "Discarded session with no completed turns");
        }
        pristine
    }

    /// Remove every idle session not currently in use
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let evicted = self.sweep_idle(&mut sessions);
        if evicted > 0 {
            info!(evicted, live = sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self, entry: &SessionEntry) {
        entry.last_active_ms.store(self.elapsed_ms(), Ordering::Relaxed);
        entry
            .last_used
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
    }

    fn sweep_idle(&self, sessions: &mut HashMap<Uuid, SessionEntry>) -> usize {
        let now = self.elapsed_ms();
        let before = sessions.len();

        sessions.retain(|_, entry| {
            let idle = now.saturating_sub(entry.last_active_ms.load(Ordering::Relaxed));
            entry.in_use() || Duration::from_millis(idle) < self.idle_ttl
        });

        before - sessions.len()
    }

    fn make_room(&self, sessions: &mut HashMap<Uuid, SessionEntry>) {
        let mut evicted = self.sweep_idle(sessions);

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, entry)| !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(id, _)| *id);

            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    evicted += 1;
                }
                None => {
                    warn!(
                        live = sessions.len(),
                        max_sessions = self.max_sessions,
                        "Every session is in use, exceeding the session cap"
                    );
                    break;
                }
            }
        }

        if evicted > 0 {
            info!(evicted, live = sessions.len(), "Sessions evicted");
        }
    }
}

fn stable_uuid_from_string(input: &str) -> Uuid {
    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Resolve a client-supplied session id. UUIDs are used as-is, any other
/// string maps to a stable UUID, and no id starts a fresh session.
pub fn resolve_session_id(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v.trim()).unwrap_or_else(|_| stable_uuid_from_string(v.trim()))
        }
        _ => Uuid::new_v4(),
    }
}
