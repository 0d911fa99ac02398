//! Per-connection session state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Registry key for a session. Allocated from a process-wide counter;
/// ids are unique and monotonic in admission order.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound queue depth per session. A peer that stops reading fills its
/// queue and starts losing lines; it never blocks the sender or anyone
/// else.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Session lifecycle. "Private linked" is not a separate state: it is
/// `Active` with a partner set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admission handshake: prompt sent, nickname not yet received. The
    /// session is not in the registry and invisible to the room.
    Naming,
    /// Registered; the receive loop is routing lines.
    Active,
    /// The close sequence has been claimed by exactly one caller.
    Closing,
    Closed,
}

/// State for one connected client. Shared between the connection's
/// receive loop, the registry, and whoever routes messages at it; all
/// interior mutability, no lock is ever held across an await point.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    nickname: Mutex<Option<String>>,
    outbound: mpsc::Sender<String>,
    /// Private-chat partner, by id. Resolved through the registry at send
    /// time, so a disconnected partner turns up as "gone" instead of a
    /// dangling reference.
    partner: Mutex<Option<SessionId>>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Wrap the outbound queue of a freshly accepted connection. The
    /// receiver half belongs to the connection's writer task.
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            nickname: Mutex::new(None),
            outbound,
            partner: Mutex::new(None),
            state: Mutex::new(SessionState::Naming),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The nickname given at admission. `None` only while `Naming`.
    pub fn nickname(&self) -> Option<String> {
        self.nickname.lock().unwrap().clone()
    }

    /// Complete admission: record the nickname (verbatim, set once) and
    /// advance to `Active`.
    pub fn admit(&self, nickname: String) {
        *self.nickname.lock().unwrap() = Some(nickname);
        *self.state.lock().unwrap() = SessionState::Active;
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn partner(&self) -> Option<SessionId> {
        *self.partner.lock().unwrap()
    }

    /// Point the private link at `partner`, or clear it. Re-linking
    /// overwrites whatever was there.
    pub fn set_partner(&self, partner: Option<SessionId>) {
        *self.partner.lock().unwrap() = partner;
    }

    /// Claim the close sequence. Returns the state the session was in,
    /// or `None` if another path (read error, `/chao`, server shutdown)
    /// already claimed it.
    pub fn begin_close(&self) -> Option<SessionState> {
        let mut state = self.state.lock().unwrap();
        match *state {
            SessionState::Closing | SessionState::Closed => None,
            prev => {
                *state = SessionState::Closing;
                Some(prev)
            }
        }
    }

    pub fn finish_close(&self) {
        *self.state.lock().unwrap() = SessionState::Closed;
    }

    /// Queue one line for delivery, appending the terminator. Delivery is
    /// best-effort: a full or closed queue drops the line and it is never
    /// retried.
    pub fn send_line(&self, line: impl Into<String>) {
        let mut line = line.into();
        line.push('\n');
        if self.outbound.try_send(line).is_err() {
            tracing::debug!(session_id = self.id, "outbound queue full or closed, line dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Session::new(tx), rx)
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let (a, _rx_a) = make_session();
        let (b, _rx_b) = make_session();
        assert!(b.id() > a.id());
    }

    #[test]
    fn admit_sets_nickname_and_activates() {
        let (session, _rx) = make_session();
        assert_eq!(session.state(), SessionState::Naming);
        assert_eq!(session.nickname(), None);

        session.admit("alice".to_string());
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.nickname().as_deref(), Some("alice"));
    }

    #[test]
    fn begin_close_claims_exactly_once() {
        let (session, _rx) = make_session();
        session.admit("alice".to_string());

        assert_eq!(session.begin_close(), Some(SessionState::Active));
        assert_eq!(session.begin_close(), None);
        session.finish_close();
        assert_eq!(session.begin_close(), None);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn send_line_appends_terminator() {
        let (session, mut rx) = make_session();
        session.send_line("hola");
        assert_eq!(rx.try_recv().unwrap(), "hola\n");
    }

    #[test]
    fn send_to_full_queue_drops_silently() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(tx);
        session.send_line("first");
        // Queue is full; the line is dropped, nothing panics or blocks.
        session.send_line("second");
    }

    #[test]
    fn send_after_receiver_dropped_is_graceful() {
        let (session, rx) = make_session();
        drop(rx);
        session.send_line("hola");
    }
}
