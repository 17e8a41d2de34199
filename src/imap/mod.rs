/*
 * mualib - imap backend.
 *
 * This file is part of mualib.
 *
 * mualib is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mualib is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mualib. If not, see <http://www.gnu.org/licenses/>.
 */

//! IMAP accounts: connect, authenticate, list mailboxes.
//!
//! The wire usage is deliberately narrow: CONNECT (plain or TLS), LOGIN
//! (plain or CRAM-MD5), LIST and LSUB. Connection and authentication failures
//! are surfaced once and never retried here; retry policy belongs to the
//! caller.

use std::{
    collections::HashSet,
    io::{Read, Write},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use crate::{
    accounts::{Account, AccountKind},
    conf::{get_conf_val, AccountSettings},
    email::{Flag, MessageSummary},
    error::{Error, ErrorKind, Result},
    mailbox::{
        mailbox_cmp, Mailbox, MailboxState, ScanCallback, UpdateStatus,
    },
    utils::connections::{tcp_stream_connect, Connection},
    EngineContext,
};

pub mod protocol_parser;

use protocol_parser::{list_entry, ImapMboxFlags, ListEntry};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthType {
    Plain,
    CramMd5,
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "cram-md5" | "md5" => Ok(Self::CramMd5),
            other => Err(Error::new(format!(
                "authentication type `{}` is not known; expected `plain` or `cram-md5`",
                other
            ))
            .set_kind(ErrorKind::Configuration)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImapServerConf {
    pub server_hostname: String,
    pub server_port: Option<u16>,
    pub use_tls: bool,
    pub danger_accept_invalid_certs: bool,
    pub server_username: String,
    pub server_password: String,
    /// `None` selects a mechanism from the server's `AUTH=` capabilities.
    pub auth_type: Option<AuthType>,
    /// Restrict `get_mboxes` to LSUB-subscribed mailboxes.
    pub subscribed_only: bool,
    pub timeout: Option<Duration>,
}

impl ImapServerConf {
    pub fn from_settings(s: &AccountSettings) -> Result<Self> {
        let server_hostname = get_conf_val!(s["server_hostname"])?.clone();
        let server_username = get_conf_val!(s["server_username"])?.clone();
        let server_password: String = get_conf_val!(s["server_password"], String::new())?;
        let server_port = match s.extra.get("server_port") {
            Some(v) => Some(u16::from_str(v).map_err(|e| {
                Error::new(format!(
                    "Configuration error ({}): invalid value for field `server_port`: {}\n{}",
                    s.name, v, e
                ))
                .set_kind(ErrorKind::Configuration)
            })?),
            None => None,
        };
        let use_tls: bool = get_conf_val!(s["use_tls"], true)?;
        let danger_accept_invalid_certs: bool =
            get_conf_val!(s["danger_accept_invalid_certs"], false)?;
        let subscribed_only: bool = get_conf_val!(s["subscribed_only"], true)?;
        let timeout: u64 = get_conf_val!(s["timeout"], 60_u64)?;
        let auth_type = match s.extra.get("server_auth") {
            Some(v) => Some(AuthType::from_str(v)?),
            None => None,
        };
        Ok(Self {
            server_hostname,
            server_port,
            use_tls,
            danger_accept_invalid_certs,
            server_username,
            server_password,
            auth_type,
            subscribed_only,
            timeout: if timeout == 0 {
                None
            } else {
                Some(Duration::from_secs(timeout))
            },
        })
    }

    /// Configured port, or the protocol default: 993 under TLS, 143 plain.
    pub fn port(&self) -> u16 {
        self.server_port
            .unwrap_or(if self.use_tls { 993 } else { 143 })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ResponseStatus {
    Ok,
    No,
    Bad,
}

#[derive(Debug)]
struct CommandResponse {
    untagged: Vec<Vec<u8>>,
    status: ResponseStatus,
    text: String,
}

/// A blocking, single-threaded IMAP connection.
#[derive(Debug)]
pub struct ImapConnection {
    conf: ImapServerConf,
    stream: Connection,
    cmd_id: usize,
    /// Carryover bytes past the last consumed CRLF.
    buf: Vec<u8>,
    pub capabilities: Vec<String>,
}

impl ImapConnection {
    /// Establish the connection and read greeting and capabilities. Does not
    /// log in; call [`ImapConnection::login`] next.
    pub fn open(conf: ImapServerConf) -> Result<Self> {
        let port = conf.port();
        log::debug!(
            "connecting to {}:{}, tls {}",
            conf.server_hostname,
            port,
            conf.use_tls
        );
        let tcp = tcp_stream_connect(&conf.server_hostname, port, conf.timeout)?;
        let stream = if conf.use_tls {
            let mut builder = native_tls::TlsConnector::builder();
            if conf.danger_accept_invalid_certs {
                builder.danger_accept_invalid_certs(true);
            }
            let connector = builder.build()?;
            let tls = connector
                .connect(&conf.server_hostname, tcp)
                .map_err(|err| {
                    Error::new(format!(
                        "could not initiate TLS negotiation to {}: {}",
                        conf.server_hostname, err
                    ))
                    .set_kind(ErrorKind::Network)
                })?;
            Connection::Tls(tls)
        } else {
            Connection::Tcp(tcp)
        };
        let mut ret = Self {
            conf,
            stream,
            cmd_id: 0,
            buf: Vec::new(),
            capabilities: Vec::new(),
        };
        let greeting = ret.read_line()?;
        if greeting.starts_with(b"* BYE") {
            return Err(Error::new(format!(
                "{} refused the connection: {}",
                ret.conf.server_hostname,
                String::from_utf8_lossy(&greeting).trim_end()
            ))
            .set_kind(ErrorKind::Network));
        }
        let resp = ret.send_command("CAPABILITY")?;
        if resp.status == ResponseStatus::Ok {
            for line in &resp.untagged {
                if let Some(rest) = line.strip_prefix(b"* CAPABILITY ") {
                    ret.capabilities = String::from_utf8_lossy(rest)
                        .split_ascii_whitespace()
                        .map(str::to_string)
                        .collect();
                }
            }
        }
        Ok(ret)
    }

    /// Authenticate with the configured mechanism, or the first supported
    /// `AUTH=` capability the server advertised. A rejected login is an
    /// [`ErrorKind::Authentication`] error, distinct from connection errors.
    pub fn login(&mut self) -> Result<()> {
        let auth = match self.conf.auth_type {
            Some(auth) => auth,
            None => auth_from_capabilities(&self.capabilities)?,
        };
        log::debug!("logging in user {}", self.conf.server_username);
        match auth {
            AuthType::Plain => {
                let body = format!(
                    "LOGIN {} {}",
                    quote(&self.conf.server_username),
                    quote(&self.conf.server_password)
                );
                let resp = self.send_command(&body)?;
                if resp.status != ResponseStatus::Ok {
                    return Err(Error::new(format!("Login failed: {}", resp.text))
                        .set_kind(ErrorKind::Authentication));
                }
            }
            AuthType::CramMd5 => self.authenticate_cram_md5()?,
        }
        Ok(())
    }

    fn authenticate_cram_md5(&mut self) -> Result<()> {
        self.cmd_id += 1;
        let tag = format!("M{}", self.cmd_id);
        self.stream
            .write_all(format!("{} AUTHENTICATE CRAM-MD5\r\n", tag).as_bytes())?;
        self.stream.flush()?;
        let challenge = loop {
            let line = self.read_line()?;
            if let Some(rest) = line.strip_prefix(b"+") {
                let b64: Vec<u8> = rest
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                break base64::decode(b64).map_err(|err| {
                    Error::new(format!("invalid CRAM-MD5 challenge: {}", err))
                        .set_kind(ErrorKind::ProtocolError)
                })?;
            }
            if is_tagged(&line, &tag) {
                let (_, text) = split_status(&line, &tag)?;
                return Err(Error::new(format!("Login failed: {}", text))
                    .set_kind(ErrorKind::Authentication));
            }
        };
        let digest = hmac_md5(self.conf.server_password.as_bytes(), &challenge);
        let response = format!("{} {}", self.conf.server_username, hex_digest(&digest));
        self.stream.write_all(base64::encode(response).as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        let resp = self.read_until_tagged(&tag)?;
        if resp.status != ResponseStatus::Ok {
            return Err(
                Error::new(format!("Login failed: {}", resp.text))
                    .set_kind(ErrorKind::Authentication),
            );
        }
        Ok(())
    }

    /// Log out. Call once per successful [`ImapConnection::open`].
    pub fn logout(&mut self) -> Result<()> {
        log::debug!("logout user {}", self.conf.server_username);
        self.send_command("LOGOUT")?;
        Ok(())
    }

    /// Issue LIST (and LSUB when subscription filtering is on) and build the
    /// mailbox list: unparseable lines are skipped, `\Noselect` entries are
    /// dropped, INBOX is always considered subscribed, and the result is in
    /// specials-first order.
    pub fn list_mailboxes(&mut self, subscribed_only: bool) -> Result<Vec<ImapMbox>> {
        let resp = self.send_command("LIST \"\" \"*\"")?;
        if resp.status != ResponseStatus::Ok {
            return Err(Error::new(format!("LIST failed: {}", resp.text))
                .set_kind(ErrorKind::ProtocolError));
        }
        let entries = self.collect_entries(&resp, b"* LIST ");
        let subbed = if subscribed_only {
            let resp = self.send_command("LSUB \"\" \"*\"")?;
            if resp.status == ResponseStatus::Ok {
                let mut subbed: HashSet<String> = self
                    .collect_entries(&resp, b"* LSUB ")
                    .into_iter()
                    .map(|e| e.name)
                    .collect();
                // Servers disagree on whether INBOX shows up in LSUB.
                subbed.insert("INBOX".to_string());
                Some(subbed)
            } else {
                log::warn!(
                    "{}: LSUB failed, not filtering subscriptions: {}",
                    self.conf.server_hostname,
                    resp.text
                );
                None
            }
        } else {
            None
        };
        Ok(filter_mailboxes(entries, subbed))
    }

    fn collect_entries(&self, resp: &CommandResponse, prefix: &[u8]) -> Vec<ListEntry> {
        let mut entries = Vec::new();
        for line in &resp.untagged {
            if !line.starts_with(prefix) {
                continue;
            }
            match list_entry(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    log::warn!("{}: skipping response line: {}", self.conf.server_hostname, err);
                }
            }
        }
        entries
    }

    fn send_command(&mut self, body: &str) -> Result<CommandResponse> {
        self.cmd_id += 1;
        let tag = format!("M{}", self.cmd_id);
        if body.starts_with("LOGIN") {
            log::trace!("{} >>> {} LOGIN <redacted>", self.conf.server_hostname, tag);
        } else {
            log::trace!("{} >>> {} {}", self.conf.server_hostname, tag, body);
        }
        self.stream
            .write_all(format!("{} {}\r\n", tag, body).as_bytes())?;
        self.stream.flush()?;
        self.read_until_tagged(&tag)
    }

    fn read_until_tagged(&mut self, tag: &str) -> Result<CommandResponse> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            if is_tagged(&line, tag) {
                let (status, text) = split_status(&line, tag)?;
                return Ok(CommandResponse {
                    untagged,
                    status,
                    text,
                });
            }
            untagged.push(line);
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.buf.drain(..pos + 2).collect();
                log::trace!(
                    "{} <<< {}",
                    self.conf.server_hostname,
                    String::from_utf8_lossy(&line).trim_end()
                );
                return Ok(line);
            }
            let mut chunk = [0_u8; 4096];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::new(format!(
                    "{} closed the connection",
                    self.conf.server_hostname
                ))
                .set_kind(ErrorKind::Network));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn is_tagged(line: &[u8], tag: &str) -> bool {
    line.starts_with(tag.as_bytes()) && line.get(tag.len()) == Some(&b' ')
}

fn split_status(line: &[u8], tag: &str) -> Result<(ResponseStatus, String)> {
    let text = String::from_utf8_lossy(&line[tag.len() + 1..])
        .trim_end()
        .to_string();
    let status = if text.starts_with("OK") {
        ResponseStatus::Ok
    } else if text.starts_with("NO") {
        ResponseStatus::No
    } else if text.starts_with("BAD") {
        ResponseStatus::Bad
    } else {
        return Err(
            Error::new(format!("unexpected tagged response: {}", text))
                .set_kind(ErrorKind::ProtocolError),
        );
    };
    Ok((status, text))
}

/// First advertised `AUTH=` capability decides the mechanism; no `AUTH=` at
/// all falls back to plain LOGIN.
fn auth_from_capabilities(capabilities: &[String]) -> Result<AuthType> {
    for cap in capabilities {
        if let Some(mech) = cap.strip_prefix("AUTH=") {
            return AuthType::from_str(mech).map_err(|_| {
                Error::new(format!(
                    "authentication type {} advertised by the server is not supported",
                    mech
                ))
                .set_kind(ErrorKind::Configuration)
            });
        }
    }
    Ok(AuthType::Plain)
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Keyed MD5 per RFC 2104, as CRAM-MD5 (RFC 2195) requires.
fn hmac_md5(key: &[u8], message: &[u8]) -> [u8; 16] {
    const BLOCK: usize = 64;
    let mut key = if key.len() > BLOCK {
        md5::compute(key).0.to_vec()
    } else {
        key.to_vec()
    };
    key.resize(BLOCK, 0);
    let mut inner = Vec::with_capacity(BLOCK + message.len());
    inner.extend(key.iter().map(|b| b ^ 0x36));
    inner.extend_from_slice(message);
    let inner_digest = md5::compute(&inner);
    let mut outer = Vec::with_capacity(BLOCK + 16);
    outer.extend(key.iter().map(|b| b ^ 0x5c));
    outer.extend_from_slice(&inner_digest.0);
    md5::compute(&outer).0
}

fn hex_digest(digest: &[u8; 16]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(32);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn filter_mailboxes(
    mut entries: Vec<ListEntry>,
    subbed: Option<HashSet<String>>,
) -> Vec<ImapMbox> {
    if let Some(subbed) = subbed {
        entries.retain(|e| subbed.contains(&e.name));
    }
    entries.retain(|e| !e.flags.contains(ImapMboxFlags::NO_SELECT));
    let mut boxes: Vec<ImapMbox> = entries.into_iter().map(ImapMbox::from).collect();
    boxes.sort_by(|a, b| mailbox_cmp(a.name(), b.name()));
    boxes
}

/// A mailbox on an IMAP server, as reported by LIST.
#[derive(Clone, Debug)]
pub struct ImapMbox {
    name: String,
    separator: Option<u8>,
    flags: ImapMboxFlags,
    state: MailboxState,
}

impl From<ListEntry> for ImapMbox {
    fn from(entry: ListEntry) -> Self {
        Self {
            name: entry.name,
            separator: entry.separator,
            flags: entry.flags,
            state: MailboxState::Empty,
        }
    }
}

impl ImapMbox {
    pub fn flags(&self) -> ImapMboxFlags {
        self.flags
    }

    pub fn separator(&self) -> Option<u8> {
        self.separator
    }

    /// Marker column for mailbox listings.
    pub fn flag_letters(&self) -> char {
        if self.flags.contains(ImapMboxFlags::MARKED) {
            '*'
        } else {
            ' '
        }
    }
}

impl Mailbox for ImapMbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MailboxState {
        self.state
    }

    fn updates(&self) -> UpdateStatus {
        UpdateStatus::NoUpdates
    }

    fn len(&self) -> usize {
        0
    }

    fn summaries(&self) -> &[MessageSummary] {
        &[]
    }

    fn counts(&self) -> (usize, usize) {
        (0, 0)
    }

    fn get_overview(
        &mut self,
        _interrupt: Option<&std::sync::atomic::AtomicBool>,
        _callback: &mut ScanCallback,
    ) -> Result<MailboxState> {
        Err(
            Error::new("Message overview is currently unimplemented for the imap backend.")
                .set_kind(ErrorKind::NotImplemented),
        )
    }

    fn check_for_updates(&mut self) -> Result<UpdateStatus> {
        Err(
            Error::new("Update checks are currently unimplemented for the imap backend.")
                .set_kind(ErrorKind::NotImplemented),
        )
    }

    fn message_bytes(&self, _n: usize) -> Result<Vec<u8>> {
        Err(
            Error::new("Fetching messages is currently unimplemented for the imap backend.")
                .set_kind(ErrorKind::NotImplemented),
        )
    }

    fn change_flags(&mut self, _n: usize, _set: Flag, _clear: Flag) -> Result<Flag> {
        Err(
            Error::new("Setting flags is currently unimplemented for the imap backend.")
                .set_kind(ErrorKind::NotImplemented),
        )
    }

    fn delete_message(&mut self, _n: usize) -> Result<()> {
        Err(
            Error::new("Deleting messages is currently unimplemented for the imap backend.")
                .set_kind(ErrorKind::NotImplemented),
        )
    }
}

/// An account on a remote IMAP server.
#[derive(Debug)]
pub struct ImapAccount {
    name: String,
    conf: ImapServerConf,
    connection: Option<ImapConnection>,
    boxes: Vec<Box<dyn Mailbox>>,
}

impl ImapAccount {
    pub fn new(s: &AccountSettings, _ctx: Arc<EngineContext>) -> Result<Self> {
        Ok(Self {
            name: s.name.clone(),
            conf: ImapServerConf::from_settings(s)?,
            connection: None,
            boxes: Vec::new(),
        })
    }
}

impl Account for ImapAccount {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AccountKind {
        AccountKind::Imap
    }

    fn connect(&mut self) -> Result<()> {
        let mut connection = ImapConnection::open(self.conf.clone())?;
        if let Err(err) = connection.login() {
            let _ = connection.logout();
            return Err(err);
        }
        self.connection = Some(connection);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(mut connection) => connection.logout(),
            None => Ok(()),
        }
    }

    fn get_mboxes(&mut self) -> Result<&mut [Box<dyn Mailbox>]> {
        let connection = self.connection.as_mut().ok_or_else(|| {
            Error::new("account is not connected; call connect() first")
                .set_kind(ErrorKind::Network)
        })?;
        let boxes = connection.list_mailboxes(self.conf.subscribed_only)?;
        self.boxes = boxes
            .into_iter()
            .map(|b| Box::new(b) as Box<dyn Mailbox>)
            .collect();
        Ok(&mut self.boxes)
    }

    fn mboxes(&mut self) -> &mut [Box<dyn Mailbox>] {
        &mut self.boxes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_md5_rfc2195_vector() {
        let digest = hmac_md5(
            b"tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        );
        assert_eq!(hex_digest(&digest), "b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("pa\"ss\\word"), "\"pa\\\"ss\\\\word\"");
    }

    #[test]
    fn test_auth_selection_first_match_wins() {
        let caps: Vec<String> = ["IMAP4rev1", "STARTTLS", "AUTH=CRAM-MD5", "AUTH=PLAIN"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(auth_from_capabilities(&caps).unwrap(), AuthType::CramMd5);

        let caps: Vec<String> = ["IMAP4rev1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(auth_from_capabilities(&caps).unwrap(), AuthType::Plain);

        let caps: Vec<String> = ["AUTH=GSSAPI"].iter().map(|s| s.to_string()).collect();
        let err = auth_from_capabilities(&caps).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_configured_mechanism_is_configuration_error() {
        let err = AuthType::from_str("gssapi").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);

        let mut settings = AccountSettings {
            name: "work".into(),
            kind: "imap".into(),
            ..Default::default()
        };
        settings
            .extra
            .insert("server_hostname".into(), "imap.example.com".into());
        settings.extra.insert("server_username".into(), "me".into());
        settings.extra.insert("server_auth".into(), "gssapi".into());
        let err = ImapServerConf::from_settings(&settings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_default_ports() {
        let mut settings = AccountSettings {
            name: "work".into(),
            kind: "imap".into(),
            ..Default::default()
        };
        settings
            .extra
            .insert("server_hostname".into(), "imap.example.com".into());
        settings.extra.insert("server_username".into(), "me".into());
        let conf = ImapServerConf::from_settings(&settings).unwrap();
        assert!(conf.use_tls);
        assert_eq!(conf.port(), 993);

        settings.extra.insert("use_tls".into(), "false".into());
        let conf = ImapServerConf::from_settings(&settings).unwrap();
        assert_eq!(conf.port(), 143);

        settings.extra.insert("server_port".into(), "10143".into());
        let conf = ImapServerConf::from_settings(&settings).unwrap();
        assert_eq!(conf.port(), 10143);
    }

    #[test]
    fn test_filter_mailboxes_subscriptions_and_noselect() {
        let lines: Vec<&[u8]> = vec![
            b"* LIST (\\HasChildren) \"/\" INBOX\r\n",
            b"* LIST (\\Noselect \\HasChildren) \"/\" lists\r\n",
            b"* LIST (\\HasNoChildren) \"/\" lists/rust\r\n",
            b"* LIST (\\Drafts) \"/\" Drafts\r\n",
            b"* LIST (\\HasNoChildren) \"/\" unsubscribed\r\n",
        ];
        let entries: Vec<ListEntry> = lines.iter().map(|l| list_entry(l).unwrap()).collect();
        let mut subbed: HashSet<String> = ["lists/rust", "Drafts", "lists"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // INBOX is readmitted by the caller even when LSUB omits it.
        subbed.insert("INBOX".into());

        let boxes = filter_mailboxes(entries, Some(subbed));
        let names: Vec<&str> = boxes.iter().map(|b| b.name()).collect();
        // `lists` is dropped for \Noselect, `unsubscribed` for LSUB, and the
        // specials sort first.
        assert_eq!(names, vec!["INBOX", "Drafts", "lists/rust"]);
    }
}
