//! Line routing for active sessions.
//!
//! Stateless: each incoming line is interpreted against the sender's
//! session and the registry, in the order the protocol checks commands:
//! `/chao`, `/usuarios`, `/privado`, then private delivery if a partner
//! is linked, then room broadcast. Prefix matches are case-sensitive.

use std::sync::Arc;

use crate::protocol::ServerLine;
use crate::registry::Registry;
use crate::session::Session;

/// What the connection loop should do after a line was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    /// `/chao`: run the close sequence and drop the connection.
    Disconnect,
}

/// Route one line from an active session. Empty and whitespace-only
/// lines are ordinary messages; nothing here filters them.
pub fn route(line: &str, sender: &Arc<Session>, registry: &Registry) -> RouteOutcome {
    if line.starts_with("/chao") {
        return RouteOutcome::Disconnect;
    }
    if line.starts_with("/usuarios") {
        send_directory(sender, registry);
        return RouteOutcome::Continue;
    }
    if line.starts_with("/privado") {
        link_private(line, sender, registry);
        return RouteOutcome::Continue;
    }

    let nickname = sender.nickname().unwrap_or_default();
    if let Some(partner_id) = sender.partner() {
        match registry.get(partner_id) {
            Some(partner) => {
                let rendered =
                    ServerLine::Private { from: &nickname, body: line }.to_string();
                sender.send_line(rendered.clone());
                partner.send_line(rendered);
            }
            None => {
                // The partner disconnected since the link was made. Clear
                // the stale link; a line composed for a private chat is
                // dropped, never rerouted to the room.
                sender.set_partner(None);
                sender.send_line(ServerLine::NoSuchUser.to_string());
            }
        }
        return RouteOutcome::Continue;
    }

    broadcast(registry, ServerLine::Broadcast { from: &nickname, body: line }.to_string());
    RouteOutcome::Continue
}

/// Deliver one rendered line to every member of the current snapshot,
/// sender included. Sessions joining mid-delivery catch the next message,
/// not this one.
pub(crate) fn broadcast(registry: &Registry, line: String) {
    for member in registry.snapshot() {
        member.send_line(line.clone());
    }
}

/// `/usuarios`: directory listing, directed only at the requester, one
/// line per registered session in snapshot order.
fn send_directory(sender: &Arc<Session>, registry: &Registry) {
    for member in registry.snapshot() {
        let name = member.nickname().unwrap_or_default();
        sender.send_line(ServerLine::DirectoryEntry(&name).to_string());
    }
}

/// `/privado <name>`: establish or replace a private link.
fn link_private(line: &str, sender: &Arc<Session>, registry: &Registry) {
    // The target is everything after the first space, verbatim: nicknames
    // are arbitrary lines and may contain spaces.
    let target = match line.split_once(' ') {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => {
            sender.send_line(ServerLine::PrivadoUsage.to_string());
            return;
        }
    };

    let Some(found) = registry.find_by_nickname(target) else {
        sender.send_line(ServerLine::NoSuchUser.to_string());
        return;
    };

    // Two independent writes with no cross-session lock: establishment is
    // best-effort, and concurrent pairings against a shared target can
    // interleave. The slots hold ids, so the worst case is a stale link,
    // not a dangling reference.
    sender.set_partner(Some(found.id()));
    found.set_partner(Some(sender.id()));

    let sender_name = sender.nickname().unwrap_or_default();
    let target_name = found.nickname().unwrap_or_default();
    sender.send_line(ServerLine::LinkEstablished(&target_name).to_string());
    found.send_line(ServerLine::LinkEstablished(&sender_name).to_string());
}
