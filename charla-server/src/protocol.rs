//! Wire line templates.
//!
//! The protocol is newline-delimited UTF-8 text in both directions. Every
//! line the server originates is rendered through [`ServerLine`], so the
//! literal formats live in exactly one place and interoperability tests
//! have a single source of truth. Templates carry no line terminator;
//! the outbound sink appends it.

use std::fmt;

/// Admission prompt, sent as the first line of every connection. The next
/// client line is taken verbatim as the nickname.
pub const NICKNAME_PROMPT: &str = "Por favor ingrese un nombre de usuario: ";

/// A server-originated line, ready to render onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine<'a> {
    /// `<name> se unio al chat.`
    Joined(&'a str),
    /// `<name> se fue del chat.`
    Left(&'a str),
    /// `El usuario <name> esta conectado.`: one per registered session,
    /// in reply to `/usuarios`.
    DirectoryEntry(&'a str),
    /// `<name>: <body>`: room-wide message.
    Broadcast { from: &'a str, body: &'a str },
    /// `<name>(privado): <body>`: delivered to both ends of a private
    /// link, the sender included.
    Private { from: &'a str, body: &'a str },
    /// `Te has conectado a un chat privado con <name>`: link
    /// confirmation, sent to each side naming the other.
    LinkEstablished(&'a str),
    /// `El usuario no existe.`: unknown `/privado` target, or a partner
    /// that disconnected since the link was made.
    NoSuchUser,
    /// `Uso: /privado <usuario>`: `/privado` with no target.
    PrivadoUsage,
}

impl fmt::Display for ServerLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Joined(name) => write!(f, "{name} se unio al chat."),
            ServerLine::Left(name) => write!(f, "{name} se fue del chat."),
            ServerLine::DirectoryEntry(name) => {
                write!(f, "El usuario {name} esta conectado.")
            }
            ServerLine::Broadcast { from, body } => write!(f, "{from}: {body}"),
            ServerLine::Private { from, body } => write!(f, "{from}(privado): {body}"),
            ServerLine::LinkEstablished(name) => {
                write!(f, "Te has conectado a un chat privado con {name}")
            }
            ServerLine::NoSuchUser => write!(f, "El usuario no existe."),
            ServerLine::PrivadoUsage => write!(f, "Uso: /privado <usuario>"),
        }
    }
}
