/*
 * mualib - email module.
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

//! Message summaries and their status flags.
//!
//! A [`MessageSummary`] is the indexed header/metadata record for one
//! message, distinct from its full body: just enough to draw an index line
//! and find the message bytes again.

use bitflags::bitflags;

pub mod parser;

bitflags! {
    /// Message status bits.
    ///
    /// `NEW` and `READ` are independent bits because the mbox `Status` header
    /// encodes them independently: `R` asserts READ, while NEW is asserted by
    /// the *absence* of `O` (old).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Flag: u16 {
        const DELETED   = 0x1;
        const NEW       = 0x2;
        const READ      = 0x4;
        const ANSWERED  = 0x8;
        const FORWARDED = 0x10;
        const DIRECT    = 0x20;
        const CC        = 0x40;
        const SELECTED  = 0x80;
        const FLAGGED   = 0x100;
    }
}

/// Summary data of one message.
///
/// `offset`/`size` locate the message in the backing file (local mailboxes
/// only). Header values are stored RFC 2047-decoded. The status bit field is
/// private on purpose: all mutation goes through the owning mailbox's flag
/// change operation so the mailbox's unread/new counters stay consistent.
#[derive(Clone, Debug)]
pub struct MessageSummary {
    pub offset: u64,
    pub size: u64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    status: Flag,
    pub uid: Option<String>,
    pub message_id: Option<String>,
    /// Deduplication key: `uid` if present, else `message_id`, else a
    /// process-unique generated id.
    pub key: String,
    /// Position in the owning mailbox, counting from 0.
    pub idx: usize,
}

impl MessageSummary {
    pub fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            from: None,
            to: None,
            subject: None,
            date: None,
            status: Flag::empty(),
            uid: None,
            message_id: None,
            key: String::new(),
            idx: 0,
        }
    }

    pub fn status(&self) -> Flag {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Flag) {
        self.status = status;
    }

    /// Single mutation entry point: set then clear, returning (before, after).
    pub(crate) fn apply_delta(&mut self, set: Flag, clear: Flag) -> (Flag, Flag) {
        let before = self.status;
        self.status = (self.status | set) & !clear;
        (before, self.status)
    }

    pub fn is_seen(&self) -> bool {
        self.status.contains(Flag::READ)
    }

    /// Three-column status cell for index listings: flagged marker, state
    /// letter, direct/cc marker.
    pub fn status_chars(&self) -> [char; 3] {
        let status = self.status;
        let c1 = if status.contains(Flag::FLAGGED) { '*' } else { ' ' };
        let c2 = if status.contains(Flag::DELETED) {
            'D'
        } else if !status.contains(Flag::READ) {
            'U'
        } else if status.contains(Flag::ANSWERED) {
            'A'
        } else if status.contains(Flag::FORWARDED) {
            'F'
        } else if status.contains(Flag::NEW) {
            'N'
        } else {
            ' '
        };
        let c3 = if status.contains(Flag::DIRECT) {
            '+'
        } else if status.contains(Flag::CC) {
            '-'
        } else {
            ' '
        };
        [c1, c2, c3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_delta_is_combined() {
        let mut msg = MessageSummary::new(0, 10);
        msg.set_status(Flag::NEW);
        let (before, after) = msg.apply_delta(Flag::READ, Flag::NEW);
        assert_eq!(before, Flag::NEW);
        assert_eq!(after, Flag::READ);
        // Clearing wins over setting the same bit.
        let (_, after) = msg.apply_delta(Flag::READ, Flag::READ);
        assert_eq!(after, Flag::empty());
    }

    #[test]
    fn test_status_chars() {
        let mut msg = MessageSummary::new(0, 10);
        msg.set_status(Flag::NEW);
        assert_eq!(msg.status_chars(), [' ', 'U', ' ']);
        msg.set_status(Flag::READ | Flag::ANSWERED | Flag::FLAGGED | Flag::CC);
        assert_eq!(msg.status_chars(), ['*', 'A', '-']);
        msg.set_status(Flag::DELETED | Flag::READ);
        assert_eq!(msg.status_chars()[1], 'D');
    }
}
