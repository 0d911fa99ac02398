//! Per-client connection handling.
//!
//! Each accepted stream gets two tasks: the receive loop here and a
//! writer task draining the session's outbound queue. The session enters
//! the registry once the admission handshake names it, and leaves through
//! a close sequence that runs at most once no matter which path reaches
//! it first (read error, `/chao`, server shutdown).

pub mod router;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, ServerLine};
use crate::registry::Registry;
use crate::session::{OUTBOUND_CAPACITY, Session, SessionId, SessionState};
use router::RouteOutcome;

/// Serve one client connection until it disconnects or the server shuts
/// down.
pub async fn handle(
    stream: TcpStream,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let session = Arc::new(Session::new(tx));
    tracing::info!(session_id = session.id(), %peer, "client connected");
    spawn_writer(rx, writer, session.id());

    let result = serve(BufReader::new(reader), &session, &registry, &shutdown).await;

    // Every exit path converges here; a second invocation is a no-op.
    close(&session, &registry);
    tracing::info!(session_id = session.id(), %peer, "client disconnected");
    result
}

/// Writer task: drains the outbound queue onto the socket. Lines queued
/// behind the first are written before the flush; a write error ends the
/// task and subsequent deliveries to this session are dropped.
fn spawn_writer<W>(mut rx: mpsc::Receiver<String>, mut writer: W, session_id: SessionId)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(session_id, "write error: {e}");
                break;
            }
            let mut batched = 0;
            while let Ok(queued) = rx.try_recv() {
                if let Err(e) = writer.write_all(queued.as_bytes()).await {
                    tracing::warn!(session_id, "write error: {e}");
                    return;
                }
                batched += 1;
                if batched >= 64 {
                    break;
                }
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!(session_id, "flush error: {e}");
                break;
            }
        }
    });
}

async fn serve<R>(
    mut reader: BufReader<R>,
    session: &Arc<Session>,
    registry: &Arc<Registry>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    session.send_line(protocol::NICKNAME_PROMPT);

    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read_line(&mut line_buf) => read?,
        };
        if n == 0 {
            return Ok(()); // EOF
        }
        let line = strip_terminator(&line_buf);

        match session.state() {
            SessionState::Naming => admit(session, registry, line)?,
            SessionState::Active => {
                if router::route(line, session, registry) == RouteOutcome::Disconnect {
                    return Ok(());
                }
            }
            // A racing shutdown can close the session under the loop.
            SessionState::Closing | SessionState::Closed => return Ok(()),
        }
    }
}

/// Complete the admission handshake: the first line is the nickname,
/// verbatim, with no trimming and no uniqueness check. Admission registers the
/// session and announces it to the whole room, the joiner included.
fn admit(session: &Arc<Session>, registry: &Registry, nickname: &str) -> Result<()> {
    session.admit(nickname.to_string());
    registry.add(Arc::clone(session))?;
    tracing::info!(session_id = session.id(), nickname, "user joined");
    router::broadcast(registry, ServerLine::Joined(nickname).to_string());
    Ok(())
}

/// The close sequence. Guarded: exactly one caller runs it, so the
/// departure notice goes out once and the registry drops the session
/// once. Sessions that never finished admission vanish silently.
pub fn close(session: &Arc<Session>, registry: &Registry) {
    let Some(previous) = session.begin_close() else {
        return;
    };
    if previous == SessionState::Active {
        // Broadcast before removal: the departing session still sees its
        // own departure notice, like everyone else.
        let nickname = session.nickname().unwrap_or_default();
        router::broadcast(registry, ServerLine::Left(&nickname).to_string());
        tracing::info!(session_id = session.id(), nickname = %nickname, "user left");
    }
    registry.remove(session.id());
    session.finish_close();
}

/// Strip the line terminator and nothing else: leading and interior
/// whitespace are part of the message.
fn strip_terminator(raw: &str) -> &str {
    match raw.strip_suffix('\n') {
        Some(line) => line.strip_suffix('\r').unwrap_or(line),
        None => raw,
    }
}
