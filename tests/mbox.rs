/*
 * mualib - integration tests for the mbox engine.
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

use std::io::Write;

use mualib::{
    mbox::MboxMailbox, Flag, Mailbox, MailboxState, ScanProgress, UpdateStatus, EngineContext,
};

fn message(n: usize, read: bool) -> String {
    format!(
        "From sender{n}@example.com Thu Oct  5 12:0{m}:00 2023\n\
         From: Sender {n} <sender{n}@example.com>\n\
         To: me@example.com\n\
         Subject: message number {n}\n\
         Date: Thu, 5 Oct 2023 12:0{m}:00 +0200\n\
         Status: {status}\n\
         Message-Id: <msg-{n}@example.com>\n\
         \n\
         This is the body of message {n}.\n\
         \n",
        n = n,
        m = n % 10,
        status = if read { "RO" } else { "O" }
    )
}

fn write_mbox(path: &std::path::Path, range: std::ops::Range<usize>) {
    let mut file = std::fs::File::create(path).unwrap();
    for n in range {
        file.write_all(message(n, n % 3 == 0).as_bytes()).unwrap();
    }
    file.flush().unwrap();
}

fn scan(mbox: &mut MboxMailbox) -> MailboxState {
    let mut cb = |_: ScanProgress<'_>| {};
    mbox.get_overview(None, &mut cb).unwrap()
}

/// Resuming after an `Appended` classification yields a summary list that is
/// a strict prefix-preserving extension of a from-scratch scan of the final
/// file state.
#[test]
fn test_resumed_scan_equals_fresh_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox");
    write_mbox(&path, 0..40);

    let ctx = EngineContext::new();
    let mut resumed = MboxMailbox::new("INBOX", &path, ctx.clone());
    assert_eq!(scan(&mut resumed), MailboxState::Finished);
    assert_eq!(resumed.len(), 40);

    // Deliver more mail.
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        for n in 40..60 {
            file.write_all(message(n, false).as_bytes()).unwrap();
        }
    }
    assert_eq!(resumed.check_for_updates().unwrap(), UpdateStatus::Appended);
    assert_eq!(scan(&mut resumed), MailboxState::Finished);

    let mut fresh = MboxMailbox::new("INBOX", &path, ctx);
    assert_eq!(scan(&mut fresh), MailboxState::Finished);

    assert_eq!(resumed.len(), fresh.len());
    for (a, b) in resumed.summaries().iter().zip(fresh.summaries()) {
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.size, b.size);
        assert_eq!(a.key, b.key);
        assert_eq!(a.status(), b.status());
        assert_eq!(a.idx, b.idx);
    }
    assert_eq!(resumed.counts(), fresh.counts());
    let (n_unread, _) = resumed.counts();
    assert_eq!(
        n_unread,
        resumed.summaries().iter().filter(|m| !m.is_seen()).count()
    );
}

/// Progress callbacks are strictly ordered and monotonic in count and
/// percent, and the terminal callback reports the final state exactly once.
#[test]
fn test_progress_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox");
    write_mbox(&path, 0..500);

    let mut mbox = MboxMailbox::new("INBOX", &path, EngineContext::new());
    let mut calls: Vec<(usize, f32, MailboxState)> = Vec::new();
    let mut cb = |p: ScanProgress<'_>| calls.push((p.count, p.percent, p.state));
    assert_eq!(mbox.get_overview(None, &mut cb).unwrap(), MailboxState::Finished);

    assert!(!calls.is_empty());
    for pair in calls.windows(2) {
        assert!(pair[0].0 <= pair[1].0);
        assert!(pair[0].1 <= pair[1].1);
    }
    let terminal: Vec<_> = calls
        .iter()
        .filter(|c| c.2 == MailboxState::Finished)
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].0, 500);
    assert_eq!(terminal[0].1, 100.0);
}

/// A full reload after `Changed` rebuilds counts that match a direct count
/// over the final summary list.
#[test]
fn test_changed_triggers_consistent_full_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox");
    write_mbox(&path, 0..30);

    let mut mbox = MboxMailbox::new("INBOX", &path, EngineContext::new());
    scan(&mut mbox);
    let first_len = mbox.len();
    assert_eq!(first_len, 30);

    // Mark a few read through the engine, then rewrite the mailbox with
    // fewer, different messages.
    mbox.change_flags(0, Flag::READ, Flag::empty()).unwrap();
    mbox.change_flags(1, Flag::READ, Flag::empty()).unwrap();
    write_mbox(&path, 100..110);

    assert_eq!(mbox.check_for_updates().unwrap(), UpdateStatus::Changed);
    scan(&mut mbox);
    assert_eq!(mbox.len(), 10);
    let (n_unread, n_new) = mbox.counts();
    assert_eq!(
        n_unread,
        mbox.summaries().iter().filter(|m| !m.is_seen()).count()
    );
    assert_eq!(
        n_new,
        mbox.summaries()
            .iter()
            .filter(|m| m.status().contains(Flag::NEW))
            .count()
    );
    assert_eq!(mbox.summaries()[0].key, "<msg-100@example.com>");
}
