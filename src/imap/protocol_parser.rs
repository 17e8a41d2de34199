/*
 * mualib - imap response parsing.
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

//! Parsing for LIST/LSUB response lines, RFC 3501 §7.2.2:
//!
//! ```text
//! * LIST (\HasNoChildren) "." INBOX.Sent
//! * LIST (\Noselect \HasChildren) "." "INBOX.archive"
//! ```
//!
//! A line is tokenized into parenthesized lists, quoted strings and bare
//! atoms; the three tokens of a list entry are then interpreted as flags,
//! hierarchy separator and mailbox name.

use bitflags::bitflags;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_until},
    sequence::delimited,
    IResult,
};
use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result};

bitflags! {
    /// Mailbox attributes reported by LIST, plus the special-use hints.
    /// More important flags have higher values.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ImapMboxFlags: u32 {
        const MARKED          = 0x1;
        const UNMARKED        = 0x2;
        const NO_INFERIORS    = 0x4;
        const HAS_CHILDREN    = 0x8;
        const HAS_NO_CHILDREN = 0x10;
        const NO_SELECT       = 0x20;
        const FLAGGED         = 0x100;
        const TRASH           = 0x200;
        const JUNK            = 0x400;
        const SENT            = 0x1000;
        const DRAFTS          = 0x2000;
        const ARCHIVE         = 0x4000;
        const ALL             = 0x8000;
    }
}

impl ImapMboxFlags {
    /// Map one `\Attribute` atom, case-insensitively. Unknown attributes map
    /// to nothing rather than an error; servers keep inventing them.
    pub fn from_attribute(attr: &[u8]) -> Self {
        const TABLE: &[(&[u8], ImapMboxFlags)] = &[
            (b"\\Marked", ImapMboxFlags::MARKED),
            (b"\\Unmarked", ImapMboxFlags::UNMARKED),
            (b"\\Noinferiors", ImapMboxFlags::NO_INFERIORS),
            (b"\\HasChildren", ImapMboxFlags::HAS_CHILDREN),
            (b"\\HasNoChildren", ImapMboxFlags::HAS_NO_CHILDREN),
            (b"\\Noselect", ImapMboxFlags::NO_SELECT),
            (b"\\NonExistent", ImapMboxFlags::NO_SELECT),
            (b"\\Flagged", ImapMboxFlags::FLAGGED),
            (b"\\Trash", ImapMboxFlags::TRASH),
            (b"\\Junk", ImapMboxFlags::JUNK),
            (b"\\Sent", ImapMboxFlags::SENT),
            (b"\\Drafts", ImapMboxFlags::DRAFTS),
            (b"\\Archive", ImapMboxFlags::ARCHIVE),
            (b"\\All", ImapMboxFlags::ALL),
        ];
        for (name, flag) in TABLE {
            if attr.eq_ignore_ascii_case(name) {
                return *flag;
            }
        }
        Self::empty()
    }
}

/// One parsed LIST/LSUB entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListEntry {
    pub flags: ImapMboxFlags,
    /// Hierarchy separator; `None` when the server sent `NIL` (flat name).
    pub separator: Option<u8>,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Token<'a> {
    List(SmallVec<[&'a [u8]; 8]>),
    Atom(&'a [u8]),
}

fn paren_list(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, inner) = delimited(tag("("), take_until(")"), tag(")"))(input)?;
    Ok((
        input,
        Token::List(inner.split(|&b| b == b' ').filter(|a| !a.is_empty()).collect()),
    ))
}

fn quoted(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, inner) = delimited(tag("\""), take_until("\""), tag("\""))(input)?;
    Ok((input, Token::Atom(inner)))
}

fn bare(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, atom) = take_till1(|b| b == b' ')(input)?;
    Ok((input, Token::Atom(atom)))
}

/// Tokenize a whole response payload: parenthesized lists and quoted strings
/// are atomic, everything else splits on spaces.
fn tokens(mut input: &[u8]) -> IResult<&[u8], Vec<Token<'_>>> {
    let mut out = Vec::new();
    loop {
        while let [b' ', rest @ ..] = input {
            input = rest;
        }
        if input.is_empty() {
            return Ok((input, out));
        }
        let (rest, token) = alt((paren_list, quoted, bare))(input)?;
        out.push(token);
        input = rest;
    }
}

/// Parse one `* LIST ...` or `* LSUB ...` line (the untagged prefix is
/// optional, so raw payloads can be fed directly).
pub fn list_entry(input: &[u8]) -> Result<ListEntry> {
    let malformed = |_| {
        Error::new(format!(
            "Malformed LIST response: `{}`",
            String::from_utf8_lossy(input).trim_end()
        ))
        .set_kind(ErrorKind::ProtocolError)
    };
    let mut line = input;
    while line.last().map_or(false, |b| *b == b'\r' || *b == b'\n') {
        line = &line[..line.len() - 1];
    }
    for prefix in [&b"* LIST "[..], &b"* LSUB "[..]] {
        if line.starts_with(prefix) {
            line = &line[prefix.len()..];
            break;
        }
    }
    let (_, tokens) = tokens(line).map_err(malformed)?;
    match tokens.as_slice() {
        [Token::List(attrs), Token::Atom(sep), Token::Atom(name), ..] => {
            let flags = attrs
                .iter()
                .copied()
                .fold(ImapMboxFlags::empty(), |acc, a| {
                    acc | ImapMboxFlags::from_attribute(a)
                });
            let separator = if sep.eq_ignore_ascii_case(b"NIL") {
                None
            } else {
                sep.first().copied()
            };
            Ok(ListEntry {
                flags,
                separator,
                name: String::from_utf8_lossy(name).into_owned(),
            })
        }
        _ => Err(Error::new(format!(
            "Malformed LIST response: `{}`",
            String::from_utf8_lossy(input).trim_end()
        ))
        .set_kind(ErrorKind::ProtocolError)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_entry_quoted_name() {
        let entry =
            list_entry(b"* LIST (\\Marked \\HasNoChildren) \".\" \"INBOX.Sent\"\r\n").unwrap();
        assert_eq!(
            entry.flags,
            ImapMboxFlags::MARKED | ImapMboxFlags::HAS_NO_CHILDREN
        );
        assert_eq!(entry.separator, Some(b'.'));
        assert_eq!(entry.name, "INBOX.Sent");
    }

    #[test]
    fn test_list_entry_without_untagged_prefix() {
        let entry = list_entry(b"(\\Marked \\HasNoChildren) \".\" \"INBOX.Sent\"").unwrap();
        assert_eq!(
            entry.flags,
            ImapMboxFlags::MARKED | ImapMboxFlags::HAS_NO_CHILDREN
        );
        assert_eq!(entry.separator, Some(b'.'));
        assert_eq!(entry.name, "INBOX.Sent");
    }

    #[test]
    fn test_list_entry_bare_name_and_case_insensitive_flags() {
        let entry = list_entry(b"* LIST (\\NOSELECT \\HASCHILDREN) \"/\" lists\r\n").unwrap();
        assert!(entry.flags.contains(ImapMboxFlags::NO_SELECT));
        assert!(entry.flags.contains(ImapMboxFlags::HAS_CHILDREN));
        assert_eq!(entry.separator, Some(b'/'));
        assert_eq!(entry.name, "lists");
    }

    #[test]
    fn test_list_entry_nil_separator() {
        let entry = list_entry(b"* LIST () NIL inbox\r\n").unwrap();
        assert_eq!(entry.separator, None);
        assert_eq!(entry.name, "inbox");
        assert_eq!(entry.flags, ImapMboxFlags::empty());
    }

    #[test]
    fn test_special_use_hints() {
        let entry = list_entry(b"* LSUB (\\Drafts \\HasNoChildren) \"/\" Drafts\r\n").unwrap();
        assert!(entry.flags.contains(ImapMboxFlags::DRAFTS));
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(list_entry(b"* LIST (\\Marked \".\"").is_err());
        assert!(list_entry(b"* LIST \r\n").is_err());
        assert!(list_entry(b"").is_err());
    }

    #[test]
    fn test_unknown_attribute_ignored() {
        let entry = list_entry(b"* LIST (\\XListItem \\Junk) \"/\" Spam\r\n").unwrap();
        assert_eq!(entry.flags, ImapMboxFlags::JUNK);
    }
}
