//! Minimal STOMP 1.2 frame codec.
//!
//! Only what a subscribing client needs: CONNECT / SUBSCRIBE / DISCONNECT
//! out, CONNECTED / MESSAGE / RECEIPT / ERROR in, heart-beat EOLs in both
//! directions.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```

use std::time::Duration;

use crate::error::{Result, SyncError};

pub const CONNECT: &str = "CONNECT";
pub const CONNECTED: &str = "CONNECTED";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const DISCONNECT: &str = "DISCONNECT";
pub const MESSAGE: &str = "MESSAGE";
pub const ERROR: &str = "ERROR";
pub const RECEIPT: &str = "RECEIPT";

/// Versions offered in `accept-version`.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// A single heart-beat on the wire.
pub const HEARTBEAT: &str = "\n";

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame for `host` with the client heart-beat offer in ms.
    pub fn connect(host: &str, heartbeat_out_ms: u64, heartbeat_in_ms: u64) -> Self {
        Self::new(CONNECT)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{heartbeat_out_ms},{heartbeat_in_ms}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(SUBSCRIBE)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn disconnect() -> Self {
        Self::new(DISCONNECT)
    }

    /// Serialize to wire text, NUL-terminated.
    pub fn encode(&self) -> String {
        let escape = !is_connect_frame(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
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
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn is_connect_frame(command: &str) -> bool {
    command == CONNECT || command == CONNECTED
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
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
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(SyncError::Transport(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Decode every frame in one WebSocket message. Heart-beat EOLs between
/// frames are skipped; a message made only of EOLs yields no frames.
pub fn decode_all(input: &str) -> Result<Vec<Frame>> {
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

fn read_line(input: &str) -> Result<(&str, &str)> {
    let end = input
        .find('\n')
        .ok_or_else(|| SyncError::Transport("truncated frame header".into()))?;
    let line = input[..end].strip_suffix('\r').unwrap_or(&input[..end]);
    Ok((line, &input[end + 1..]))
}

fn decode_one(input: &str) -> Result<(Frame, &str)> {
    let (command, mut rest) = read_line(input)?;
    let escaped = !is_connect_frame(command);
    let mut frame = Frame::new(command);

    loop {
        let (line, remaining) = read_line(rest)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SyncError::Transport(format!("malformed header line: {line}")))?;
        if escaped {
            frame.headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let body_len = match frame.get("content-length") {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| SyncError::Transport(format!("invalid content-length: {raw}")))?,
        None => rest
            .find('\0')
            .ok_or_else(|| SyncError::Transport("frame missing NUL terminator".into()))?,
    };

    let body = rest
        .get(..body_len)
        .ok_or_else(|| SyncError::Transport("frame body shorter than content-length".into()))?;
    let after = rest
        .get(body_len..)
        .and_then(|tail| tail.strip_prefix('\0'))
        .ok_or_else(|| SyncError::Transport("frame missing NUL terminator".into()))?;

    frame.body = body.to_string();
    Ok((frame, after))
}

/// Negotiated heart-beat periods `(send_every, expect_every)`.
///
/// `client` is our `(cx, cy)` offer, `server_header` the `heart-beat` value
/// of CONNECTED (`sx,sy`). Either side sending 0 disables that direction.
pub fn negotiate_heartbeat(
    client: (u64, u64),
    server_header: Option<&str>,
) -> (Option<Duration>, Option<Duration>) {
    let (cx, cy) = client;
    let (sx, sy) = server_header
        .and_then(|raw| raw.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse::<u64>().ok()?, y.trim().parse::<u64>().ok()?)))
        .unwrap_or((0, 0));

    let send_every = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy)));
    let expect_every = (cy != 0 && sx != 0).then(|| Duration::from_millis(cy.max(sx)));
    (send_every, expect_every)
}
