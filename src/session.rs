//! Per-session rolling conversation history.
//!
//! Each session keeps at most `max_history_turns` turns; the oldest turn is
//! dropped first. The store itself is bounded too: at most `max_sessions`
//! sessions are kept (the least recently active one is dropped to make
//! room), and with an idle timeout configured, sessions untouched for
//! longer are swept whenever a turn is appended.
//!
//! All state sits behind one mutex, so a turn append and its eviction are
//! atomic with respect to concurrent requests.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::models::Turn;

struct Session {
    turns: VecDeque<Turn>,
    last_active: Instant,
}

pub struct SessionStore {
    max_history_turns: usize,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_history_turns: config.max_history_turns.max(1),
            max_sessions: config.max_sessions.max(1),
            idle_timeout: config.idle_timeout_secs.map(Duration::from_secs),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_history_turns(&self) -> usize {
        self.max_history_turns
    }

    /// Transcript of a session, oldest turn first. Empty for unknown ids.
    ///
    /// ```text
    /// User: <prompt>
    /// Assistant: <answer>
    /// User: ...
    /// ```
    pub fn get_history(&self, session_id: &str) -> String {
        let sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(session) => format_transcript(&session.turns),
            None => String::new(),
        }
    }

    /// Turns held for a session, oldest first.
    pub fn turns(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of turns held for a session.
    pub fn depth(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.turns.len())
            .unwrap_or(0)
    }

    /// Record a completed exchange and return the session's new depth.
    pub fn append_turn(&self, session_id: &str, user: &str, assistant: &str) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();

        if let Some(timeout) = self.idle_timeout {
            let before = sessions.len();
            sessions.retain(|id, s| id == session_id || now.duration_since(s.last_active) <= timeout);
            let swept = before - sessions.len();
            if swept > 0 {
                tracing::debug!(swept, "dropped idle sessions");
            }
        }

        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_active)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                tracing::debug!(session_id = %id, "session cap reached, dropping least recently active");
                sessions.remove(&id);
            }
        }

        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                turns: VecDeque::with_capacity(self.max_history_turns + 1),
                last_active: now,
            });

        session.turns.push_back(Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
        while session.turns.len() > self.max_history_turns {
            session.turns.pop_front();
        }
        session.last_active = now;

        session.turns.len()
    }

    /// Forget a session. Returns whether it existed; unknown ids are fine.
    pub fn reset(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn format_transcript(turns: &VecDeque<Turn>) -> String {
    turns
        .iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
        .collect::<Vec<_>>()
        .join("\n")
}
