/*
 * mualib - library root.
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

//! mualib - the storage and protocol engine behind a terminal mail reader.
//!
//! The crate turns a raw on-disk mailbox file (Berkeley mbox) or a remote
//! IMAP server into an indexed, incrementally updatable collection of message
//! summaries, while guaranteeing exclusive, crash-safe access to the
//! underlying file against both local and NFS-shared concurrent writers.
//!
//! - [`accounts`]: the [`Account`](accounts::Account) capability interface
//!   and the kind registry.
//! - [`mbox`]: locked, resumable, cancellable scanning of mbox files.
//! - [`imap`]: connect, authenticate (LOGIN or CRAM-MD5) and list mailboxes.
//! - [`mailbox`]: mailbox state machine, counters, specials-aware ordering.
//! - [`email`]: message summaries, status flags, RFC 2047 header decoding.
//! - [`utils::lock`]: the dotlock/advisory-lock pair serializing mailbox
//!   access across processes and hosts.
//! - [`workers`]: the bounded background task queue that keeps long scans off
//!   the interactive thread.
//!
//! A typical session: build an [`EngineContext`], construct accounts from
//! [`conf::AccountSettings`] via [`accounts::from_settings`], `connect()`,
//! `get_mboxes()`, then `get_overview` each mailbox with a progress callback,
//! optionally from inside a [`workers::TaskQueue`] unit of work.
//!
//! This crate uses the `log` crate facade; the embedding application decides
//! where the records go.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod accounts;
pub mod conf;
pub mod email;
pub mod error;
pub mod imap;
pub mod mailbox;
pub mod mbox;
pub mod utils;
pub mod workers;

pub use crate::{
    accounts::{Account, AccountKind},
    email::{Flag, MessageSummary},
    error::{Error, ErrorKind, Result},
    mailbox::{Mailbox, MailboxState, ScanProgress, UpdateStatus},
};

/// Process-wide engine state, passed to account constructors.
///
/// Owns what would otherwise be module-level globals: the cached hostname and
/// the synthetic message-id counter. The counter only promises uniqueness
/// within one process lifetime; its seed is arbitrary.
#[derive(Debug)]
pub struct EngineContext {
    hostname: String,
    dummy_mid: AtomicU64,
}

impl EngineContext {
    pub fn new() -> Arc<Self> {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Arc::new(Self {
            hostname,
            dummy_mid: AtomicU64::new(1233),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Synthetic message key for messages carrying neither a UID nor a
    /// Message-Id.
    pub fn next_message_key(&self) -> String {
        let n = self.dummy_mid.fetch_add(1, Ordering::Relaxed) + 1;
        format!("<{}Generated@{}>", n, self.hostname)
    }
}
