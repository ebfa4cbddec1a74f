//! Minimal blocking IMAP4rev1 client over rustls.
//!
//! Only the commands the watcher needs: LOGIN / AUTHENTICATE XOAUTH2, EXAMINE,
//! IDLE, UID SEARCH, UID FETCH and LOGOUT. The session is generic over its
//! byte stream so tests can drive it with a scripted transport.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, trace};

/// Read timeout for ordinary commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the IMAP session.
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IMAP {command} rejected: {response}")]
    Rejected { command: String, response: String },
}

impl ImapError {
    fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

/// A byte stream an IMAP session can run on.
pub trait ImapStream: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;
}

/// TLS stream used against real servers.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

impl ImapStream for TlsStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.sock.set_read_timeout(timeout)
    }
}

/// One server response: the line text plus any literals it carried.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// State of the folder after EXAMINE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    pub uid_next: u32,
    pub uid_validity: Option<u32>,
    pub exists: u32,
}

/// What ended an IDLE wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server pushed untagged responses (e.g. `* 12 EXISTS`).
    Notified(Vec<String>),
    /// Nothing arrived before the timeout.
    TimedOut,
}

/// An authenticated (or about to be) IMAP session.
pub struct ImapSession<S: ImapStream> {
    reader: BufReader<S>,
    tag_counter: u32,
    partial: Vec<u8>,
}

impl<S: ImapStream> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            tag_counter: 0,
            partial: Vec::new(),
        }
    }

    /// Consume the server greeting.
    pub fn read_greeting(&mut self) -> Result<(), ImapError> {
        let greeting = self.read_response()?;
        if greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(ImapError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text.trim_end()
            )))
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), ImapError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        self.command_redacted(&cmd, "LOGIN").map(|_| ())
    }

    /// SASL XOAUTH2 with an initial response.
    pub fn authenticate_xoauth2(&mut self, username: &str, token: &str) -> Result<(), ImapError> {
        let cmd = format!("AUTHENTICATE XOAUTH2 {}", xoauth2_payload(username, token));
        self.command_redacted(&cmd, "AUTHENTICATE").map(|_| ())
    }

    /// Open a folder read-only.
    pub fn examine(&mut self, mailbox: &str) -> Result<FolderStatus, ImapError> {
        let responses = self.command(&format!("EXAMINE {}", quote(mailbox)))?;
        let uid_next = parse_uid_next(&responses).ok_or_else(|| {
            ImapError::Protocol(format!("EXAMINE {mailbox} returned no UIDNEXT"))
        })?;
        Ok(FolderStatus {
            uid_next,
            uid_validity: parse_bracket_number(&responses, "UIDVALIDITY"),
            exists: parse_exists(&responses).unwrap_or(0),
        })
    }

    /// Wait for a server push, bounded by `timeout`, then leave IDLE.
    pub fn idle(&mut self, timeout: Duration) -> Result<IdleOutcome, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{tag} IDLE"))?;

        loop {
            let resp = self.read_response()?;
            if resp.text.starts_with('+') {
                break;
            }
            if resp.text.starts_with(&tag) {
                return Err(ImapError::Rejected {
                    command: "IDLE".to_string(),
                    response: resp.text.trim_end().to_string(),
                });
            }
        }

        self.reader.get_mut().set_read_timeout(Some(timeout))?;
        let waited = self.read_response();
        self.reader.get_mut().set_read_timeout(Some(COMMAND_TIMEOUT))?;

        let mut notifications = Vec::new();
        match waited {
            Ok(resp) => notifications.push(resp.text.trim_end().to_string()),
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e),
        }

        self.write_line("DONE")?;
        loop {
            let resp = self.read_response()?;
            let text = resp.text.trim_end().to_string();
            if text.starts_with(&tag) {
                check_status(&tag, &text, "IDLE")?;
                break;
            }
            notifications.push(text);
        }

        if notifications.is_empty() {
            Ok(IdleOutcome::TimedOut)
        } else {
            Ok(IdleOutcome::Notified(notifications))
        }
    }

    /// UIDs strictly greater than `cursor`, ascending.
    pub fn uid_search_since(&mut self, cursor: u32) -> Result<Vec<u32>, ImapError> {
        let start = cursor.saturating_add(1);
        let responses = self.command(&format!("UID SEARCH UID {start}:*"))?;
        let mut uids: Vec<u32> = parse_search(&responses)
            .into_iter()
            .filter(|uid| *uid > cursor)
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// Full RFC 822 source of one message, without setting \Seen.
    pub fn uid_fetch(&mut self, uid: u32) -> Result<Vec<u8>, ImapError> {
        let responses = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        responses
            .into_iter()
            .filter(|r| r.text.contains("FETCH"))
            .find_map(|r| r.literals.into_iter().next())
            .ok_or_else(|| ImapError::Protocol(format!("no message body returned for UID {uid}")))
    }

    pub fn logout(&mut self) -> Result<(), ImapError> {
        self.command("LOGOUT").map(|_| ())
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    // ── protocol plumbing ───────────────────────────────────────────

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    fn write_line(&mut self, line: &str) -> Result<(), ImapError> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ImapError> {
        let n = self.reader.read_until(b'\n', &mut self.partial)?;
        if n == 0 && self.partial.is_empty() {
            return Err(ImapError::Protocol("IMAP connection closed".to_string()));
        }
        Ok(std::mem::take(&mut self.partial))
    }

    /// Read one logical response, following `{n}` literals.
    fn read_response(&mut self) -> Result<Response, ImapError> {
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line).to_string();
            match literal_len(&line) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.reader.read_exact(&mut literal)?;
                    response.text.push_str(text.trim_end());
                    response.literals.push(literal);
                }
                None => {
                    response.text.push_str(&text);
                    trace!(line = %response.text.trim_end(), "IMAP <");
                    return Ok(response);
                }
            }
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Vec<Response>, ImapError> {
        let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        debug!(command = %verb, "IMAP >");
        self.run_command(cmd, &verb)
    }

    /// Like `command` but never logs the arguments.
    fn command_redacted(&mut self, cmd: &str, verb: &str) -> Result<Vec<Response>, ImapError> {
        debug!(command = %verb, "IMAP > (arguments redacted)");
        self.run_command(cmd, verb)
    }

    fn run_command(&mut self, cmd: &str, verb: &str) -> Result<Vec<Response>, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{tag} {cmd}"))?;

        let mut untagged = Vec::new();
        loop {
            let resp = self.read_response()?;
            if resp.text.starts_with(&tag) {
                check_status(&tag, resp.text.trim_end(), verb)?;
                return Ok(untagged);
            }
            if resp.text.starts_with('+') {
                // SASL error challenge: an empty reply makes the server finish with NO.
                self.write_line("")?;
                continue;
            }
            untagged.push(resp);
        }
    }
}

/// Open a TLS connection and read the greeting.
pub fn connect_tls(host: &str, port: u16) -> Result<ImapSession<TlsStream>, ImapError> {
    let tcp = TcpStream::connect((host, port))?;
    tcp.set_read_timeout(Some(COMMAND_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| ImapError::Tls(format!("invalid server name {host}: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| ImapError::Tls(e.to_string()))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    session.read_greeting()?;
    Ok(session)
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote a string argument.
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Base64 SASL XOAUTH2 initial response.
pub fn xoauth2_payload(username: &str, token: &str) -> String {
    BASE64.encode(format!("user={username}\x01auth=Bearer {token}\x01\x01"))
}

/// Length of the literal announced at the end of a line (`... {123}\r\n`).
pub fn literal_len(line: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(line).ok()?.trim_end_matches(['\r', '\n']);
    let inner = text.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

fn check_status(tag: &str, line: &str, verb: &str) -> Result<(), ImapError> {
    let status = line[tag.len()..].trim_start();
    if status.starts_with("OK") {
        Ok(())
    } else {
        Err(ImapError::Rejected {
            command: verb.to_string(),
            response: status.to_string(),
        })
    }
}

fn parse_bracket_number(responses: &[Response], key: &str) -> Option<u32> {
    let needle = format!("[{key} ");
    responses.iter().find_map(|r| {
        let start = r.text.find(&needle)? + needle.len();
        let rest = &r.text[start..];
        let end = rest.find(']')?;
        rest[..end].trim().parse().ok()
    })
}

/// `UIDNEXT` from an EXAMINE/SELECT response.
pub fn parse_uid_next(responses: &[Response]) -> Option<u32> {
    parse_bracket_number(responses, "UIDNEXT")
}

fn parse_exists(responses: &[Response]) -> Option<u32> {
    responses.iter().find_map(|r| {
        let mut parts = r.text.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("*"), Some(n), Some("EXISTS")) => n.parse().ok(),
            _ => None,
        }
    })
}

/// Numbers from `* SEARCH ...` lines.
pub fn parse_search(responses: &[Response]) -> Vec<u32> {
    responses
        .iter()
        .filter(|r| r.text.starts_with("* SEARCH"))
        .flat_map(|r| {
            r.text["* SEARCH".len()..]
                .split_whitespace()
                .filter_map(|n| n.parse::<u32>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}
