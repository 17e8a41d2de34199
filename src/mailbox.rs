/*
 * mualib - mailbox model.
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

//! The abstract mailbox: state machine, scan progress contract, counters and
//! the specials-aware sort order shared by all backends.

use std::{
    borrow::Cow,
    cmp::Ordering,
    fmt,
    sync::atomic::AtomicBool,
    time::Duration,
};

use crate::{
    email::{Flag, MessageSummary},
    error::Result,
};

/// Lock acquisition budget used by local mailbox scans, per lock type.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a mailbox's summary index.
///
/// `Empty → Reading → {Finished | Interrupted | Locked}`; a finished mailbox
/// re-enters `Reading` on re-scan; any state may pass through `Saving` during
/// write-back and return to `Finished`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MailboxState {
    #[default]
    Empty,
    Reading,
    Finished,
    Interrupted,
    Locked,
    Saving,
}

impl fmt::Display for MailboxState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Empty => "empty",
                Self::Reading => "reading",
                Self::Finished => "finished",
                Self::Interrupted => "interrupted",
                Self::Locked => "locked",
                Self::Saving => "saving",
            }
        )
    }
}

/// What changed in the backing store since the last completed scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpdateStatus {
    #[default]
    NoUpdates,
    /// Mail was appended past the old end; a resumed scan is safe.
    Appended,
    /// The mailbox was rewritten; the index must be rebuilt from scratch.
    Changed,
}

/// Progress report passed to the overview callback: at most one per ~0.5 s
/// while reading, plus exactly one at the terminal state. `percent` is 0-100
/// and monotonic within a scan.
#[derive(Clone, Debug)]
pub struct ScanProgress<'a> {
    pub mailbox: &'a str,
    pub count: usize,
    pub percent: f32,
    pub state: MailboxState,
    pub message: Option<Cow<'a, str>>,
}

pub type ScanCallback<'a> = dyn FnMut(ScanProgress<'_>) + 'a;

/// One mailbox on a server or one folder on the local system.
///
/// At most one `get_overview` may be in flight per mailbox instance; the
/// engine does not guard against concurrent calls on the same instance.
pub trait Mailbox: fmt::Debug + Send {
    fn name(&self) -> &str;
    fn state(&self) -> MailboxState;
    fn updates(&self) -> UpdateStatus;

    /// Number of indexed message summaries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn summaries(&self) -> &[MessageSummary];

    /// `(unread, new)` running counts. Always equal to a direct count over
    /// [`Mailbox::summaries`]; maintained incrementally on flag changes.
    fn counts(&self) -> (usize, usize);

    /// Scan or resume scanning the mailbox, reporting progress through
    /// `callback`. `interrupt` is polled between messages; a set flag stops
    /// the scan, keeping partial progress for a later resume. Returns the
    /// terminal state (`Finished`, `Interrupted` or `Locked`).
    fn get_overview(
        &mut self,
        interrupt: Option<&AtomicBool>,
        callback: &mut ScanCallback,
    ) -> Result<MailboxState>;

    /// Classify external modifications since the last completed scan.
    fn check_for_updates(&mut self) -> Result<UpdateStatus>;

    /// Full raw text of the `n`-th message.
    fn message_bytes(&self, n: usize) -> Result<Vec<u8>>;

    /// Apply a combined flag delta to the `n`-th summary, updating the
    /// aggregate counters, and return the resulting flags.
    fn change_flags(&mut self, n: usize, set: Flag, clear: Flag) -> Result<Flag>;

    /// Remove the `n`-th summary from the index, moving it to the deleted
    /// list.
    fn delete_message(&mut self, n: usize) -> Result<()>;

    fn next_unread(&self, n: usize) -> Option<usize> {
        self.summaries()
            .iter()
            .skip(n + 1)
            .position(|m| !m.status().contains(Flag::READ))
            .map(|p| p + n + 1)
    }

    fn previous_unread(&self, n: usize) -> Option<usize> {
        self.summaries()[..n.min(self.len())]
            .iter()
            .rposition(|m| !m.status().contains(Flag::READ))
    }
}

/// Conventionally named mailboxes that sort before everything else, in fixed
/// priority order. Matched case-insensitively.
const SPECIALS: &[&str] = &[
    "inbox",
    "drafts",
    "sent",
    "sent messages",
    "junk",
    "deleted messages",
    "trash",
    "archive",
];

fn special_rank(name: &str) -> Option<usize> {
    let lower = name.to_lowercase();
    SPECIALS.iter().position(|s| *s == lower)
}

/// Specials first in table order, the rest lexicographically. The fallback
/// comparison is case-sensitive while the specials lookup is not; callers
/// rely on that exact ordering.
pub fn mailbox_cmp(a: &str, b: &str) -> Ordering {
    match (special_rank(a), special_rank(b)) {
        (Some(ra), Some(rb)) => ra.cmp(&rb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Shared counter bookkeeping for a combined flag delta. Returns the
/// summary's resulting flags.
pub(crate) fn apply_flag_delta(
    msg: &mut MessageSummary,
    n_unread: &mut usize,
    n_new: &mut usize,
    set: Flag,
    clear: Flag,
) -> Flag {
    let (before, after) = msg.apply_delta(set, clear);
    match (before.contains(Flag::READ), after.contains(Flag::READ)) {
        (false, true) => *n_unread -= 1,
        (true, false) => *n_unread += 1,
        _ => {}
    }
    match (before.contains(Flag::NEW), after.contains(Flag::NEW)) {
        (false, true) => *n_new += 1,
        (true, false) => *n_new -= 1,
        _ => {}
    }
    after
}
