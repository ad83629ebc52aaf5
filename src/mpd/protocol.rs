//! MPD text protocol: command encoding and response parsing
//!
//! A request is a single line, arguments double-quoted with `"` and `\`
//! escaped. A response is a sequence of `key: value` lines terminated by
//! either `OK` or `ACK [code@index] {command} message`.

use std::collections::HashMap;

use super::RemoteError;

/// ACK code for "no such object" (unknown song, missing sticker)
pub const ACK_NO_EXIST: u32 = 50;

/// Sticker type used for songs in the database
const SONG: &str = "song";

/// A parsed `ACK [code@index] {command} message` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub code: u32,
    pub index: u32,
    pub command: String,
    pub message: String,
}

impl Ack {
    /// Parse an ACK line, returning `None` if it is malformed
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("ACK [")?;
        let (position, rest) = rest.split_once("] {")?;
        let (code, index) = position.split_once('@')?;
        let (command, message) = match rest.split_once("} ") {
            Some(parts) => parts,
            None => (rest.strip_suffix('}')?, ""),
        };

        Some(Self {
            code: code.parse().ok()?,
            index: index.parse().ok()?,
            command: command.to_string(),
            message: message.to_string(),
        })
    }
}

/// One line of a server response
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Ok,
    Ack(Ack),
    Pair(&'a str, &'a str),
}

/// Classify a single response line (without its trailing newline)
pub fn parse_line(line: &str) -> Result<Line<'_>, RemoteError> {
    if line == "OK" {
        return Ok(Line::Ok);
    }

    if line.starts_with("ACK ") {
        return Ack::parse(line)
            .map(Line::Ack)
            .ok_or_else(|| RemoteError::Protocol(format!("malformed ACK line: {}", line)));
    }

    line.split_once(": ")
        .map(|(key, value)| Line::Pair(key, value))
        .ok_or_else(|| RemoteError::Protocol(format!("unexpected line: {}", line)))
}

/// Extract the protocol version from the `OK MPD <version>` greeting
pub fn parse_greeting(line: &str) -> Result<String, RemoteError> {
    line.strip_prefix("OK MPD ")
        .map(|version| version.trim().to_string())
        .ok_or_else(|| RemoteError::Protocol(format!("not an MPD greeting: {}", line)))
}

/// Quote a command argument
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// A sticker attached to a song in the device database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sticker {
    /// Song URI relative to the music directory
    pub uri: String,
    pub name: String,
    pub value: String,
}

/// Protocol operations used by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `sticker find song <base> <name>`
    FindStickers { base: String, name: String },
    /// `sticker set song <uri> <name> <value>`
    SetSticker { uri: String, name: String, value: String },
    /// `find file <uri>`
    FindFile { uri: String },
    /// `update`
    Update,
    /// `status`
    Status,
}

/// Decoded answer to an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stickers(Vec<Sticker>),
    Exists(bool),
    Status(HashMap<String, String>),
    Done,
}

impl Operation {
    /// Short name for log messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FindStickers { .. } => "sticker find",
            Operation::SetSticker { .. } => "sticker set",
            Operation::FindFile { .. } => "find",
            Operation::Update => "update",
            Operation::Status => "status",
        }
    }

    /// Encode as a request line (without the trailing newline)
    pub fn encode(&self) -> Result<String, RemoteError> {
        let args: Vec<&str> = match self {
            Operation::FindStickers { base, name } => {
                vec!["sticker", "find", SONG, base.as_str(), name.as_str()]
            }
            Operation::SetSticker { uri, name, value } => {
                vec!["sticker", "set", SONG, uri.as_str(), name.as_str(), value.as_str()]
            }
            Operation::FindFile { uri } => vec!["find", "file", uri.as_str()],
            Operation::Update => vec!["update"],
            Operation::Status => vec!["status"],
        };

        if args.iter().any(|arg| arg.contains('\n')) {
            return Err(RemoteError::Protocol(format!(
                "{} argument contains a newline",
                self.name()
            )));
        }

        // Command words are sent bare, everything after them quoted
        let words = match self {
            Operation::FindStickers { .. } | Operation::SetSticker { .. } => 3,
            Operation::FindFile { .. } => 2,
            Operation::Update | Operation::Status => 1,
        };

        let mut line = args[..words].join(" ");
        for arg in &args[words..] {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        Ok(line)
    }

    /// Decode the `key: value` pairs of a successful response
    pub fn decode(&self, pairs: Vec<(String, String)>) -> Result<Reply, RemoteError> {
        match self {
            Operation::FindStickers { .. } => decode_stickers(pairs).map(Reply::Stickers),
            Operation::FindFile { .. } => Ok(Reply::Exists(
                pairs.iter().any(|(key, _)| key == "file"),
            )),
            Operation::Status => Ok(Reply::Status(pairs.into_iter().collect())),
            Operation::SetSticker { .. } | Operation::Update => Ok(Reply::Done),
        }
    }

    /// Turn an ACK into either a reply or an error
    ///
    /// Older servers answer `sticker find` with "no such sticker" when
    /// nothing matches; that is an empty result, not a failure.
    pub fn on_ack(&self, ack: Ack) -> Result<Reply, RemoteError> {
        match self {
            Operation::FindStickers { .. } if ack.code == ACK_NO_EXIST => {
                Ok(Reply::Stickers(Vec::new()))
            }
            _ => Err(RemoteError::Ack(ack)),
        }
    }
}

fn decode_stickers(pairs: Vec<(String, String)>) -> Result<Vec<Sticker>, RemoteError> {
    let mut stickers = Vec::new();
    let mut current_uri: Option<String> = None;

    for (key, value) in pairs {
        match key.as_str() {
            "file" => current_uri = Some(value),
            "sticker" => {
                let uri = current_uri.clone().ok_or_else(|| {
                    RemoteError::Protocol(format!("sticker without a file: {}", value))
                })?;
                let (name, sticker_value) = value.split_once('=').ok_or_else(|| {
                    RemoteError::Protocol(format!("malformed sticker: {}", value))
                })?;
                stickers.push(Sticker {
                    uri,
                    name: name.to_string(),
                    value: sticker_value.to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(stickers)
}
