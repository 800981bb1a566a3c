//! STOMP 1.2 frame codec.
//!
//! The game server speaks STOMP over WebSocket. A frame on the wire is:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! A lone end-of-line between frames is a heart-beat. A single transport
//! message may carry several frames, so [`decode_frames`] returns all of them.
//!
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) in every frame
//! except `CONNECT` and `CONNECTED`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SessionError};

/// Protocol versions offered in the `CONNECT` frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Frame commands defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// The command as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(stomp_error(format!("unknown command {other:?}"))),
        })
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// A frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// `CONNECT` with heart-beats disabled in both directions.
    pub fn connect(host: &str) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
    }

    /// `SUBSCRIBE` with automatic acknowledgement.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// `SEND` carrying a JSON body.
    pub fn send(destination: &str, json: impl Into<String>) -> Self {
        let body = json.into();
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header("receipt", receipt)
    }

    /// Look up the first header with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize the frame, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame contained in one transport message.
///
/// Heart-beat end-of-lines before, between and after frames are skipped, so a
/// heart-beat-only message yields an empty vector.
///
/// # Errors
///
/// Returns [`SessionError::Stomp`] if any frame is malformed.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            break;
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
    Ok(frames)
}

fn decode_one(input: &str) -> Result<(Frame, &str)> {
    let (command_line, mut rest) =
        next_line(input).ok_or_else(|| stomp_error("truncated command line"))?;
    let command = command_line.parse::<Command>()?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remaining) =
            next_line(rest).ok_or_else(|| stomp_error("truncated header block"))?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| stomp_error(format!("header without colon: {line:?}")))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .map_err(|e| stomp_error(format!("bad content-length: {e}")))?;

    let (body, after) = match content_length {
        Some(len) => {
            let body = rest
                .get(..len)
                .ok_or_else(|| stomp_error("body shorter than content-length"))?;
            let after = rest
                .get(len..)
                .and_then(|tail| tail.strip_prefix('\0'))
                .ok_or_else(|| stomp_error("missing NUL after body"))?;
            (body, after)
        }
        None => rest
            .split_once('\0')
            .ok_or_else(|| stomp_error("missing NUL after body"))?,
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, after))
}

fn next_line(input: &str) -> Option<(&str, &str)> {
    let (line, rest) = input.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(stomp_error(format!(
                    "undefined header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn stomp_error(msg: impl Into<String>) -> SessionError {
    SessionError::Stomp(msg.into())
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

    #[test]
    fn connect_frame_is_not_escaped() {
        let wire = Frame::connect("localhost").encode();
        assert_eq!(
            wire,
            "CONNECT\naccept-version:1.2,1.1,1.0\nhost:localhost\nheart-beat:0,0\n\n\0"
        );
    }

    #[test]
    fn send_frame_carries_content_length() {
        let wire = Frame::send("/app/game/move", r#"{"position":4}"#).encode();
        assert!(wire.starts_with("SEND\ndestination:/app/game/move\n"));
        assert!(wire.contains("content-length:14\n"));
        assert!(wire.ends_with("\n\n{\"position\":4}\0"));
    }

    #[test]
    fn decodes_message_from_spring_broker() {
        let wire = "MESSAGE\r\ndestination:/topic/game/G1\r\ncontent-type:application/json\r\n\
                    subscription:sub-0\r\nmessage-id:abc-1\r\ncontent-length:2\r\n\r\n{}\0";
        let frames = decode_frames(wire).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.header("destination"), Some("/topic/game/G1"));
        assert_eq!(frame.body, "{}");
    }

    #[test]
    fn body_with_nul_is_delimited_by_content_length() {
        let wire = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frames = decode_frames(wire).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn heartbeats_and_batched_frames() {
        let wire = "\n\nCONNECTED\nversion:1.2\n\n\0\nRECEIPT\nreceipt-id:r1\n\n\0\r\n";
        let frames = decode_frames(wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].header("version"), Some("1.2"));
        assert_eq!(frames[1].header("receipt-id"), Some("r1"));

        assert!(decode_frames("\n").unwrap().is_empty());
    }

    #[test]
    fn first_repeated_header_wins() {
        let frames = decode_frames("MESSAGE\nfoo:first\nfoo:second\n\n\0").unwrap();
        assert_eq!(frames[0].header("foo"), Some("first"));
    }

    #[test]
    fn header_escapes_survive_encoding() {
        let frame = Frame::new(Command::Send).with_header("note", "a:b\\c\nd");
        let wire = frame.encode();
        assert!(wire.contains("note:a\\cb\\\\c\\nd\n"));
        let decoded = decode_frames(&wire).unwrap();
        assert_eq!(decoded[0].header("note"), Some("a:b\\c\nd"));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            decode_frames("BOGUS\n\n\0"),
            Err(SessionError::Stomp(_))
        ));
        assert!(decode_frames("MESSAGE\nfoo:bar\n\nno terminator").is_err());
        assert!(decode_frames("MESSAGE\nno-colon\n\n\0").is_err());
        assert!(decode_frames("MESSAGE\ncontent-length:50\n\nshort\0").is_err());
        assert!(decode_frames("MESSAGE\nbad:\\x\n\n\0").is_err());
    }

    #[test]
    fn error_frame_exposes_message_header() {
        let frames = decode_frames("ERROR\nmessage:Session closed.\n\ndetails\0").unwrap();
        assert_eq!(frames[0].command, Command::Error);
        assert_eq!(frames[0].header("message"), Some("Session closed."));
        assert_eq!(frames[0].body, "details");
    }
}
