/*
 * mualib - header value parsing.
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

//! RFC 2047 encoded-word decoding for header values.
//!
//! Decode failures never abort a scan: an unknown charset decodes to the
//! `"???"` placeholder, undecodable base64 falls back to the raw bytes, and a
//! malformed encoded word is kept verbatim. There is a lot of broken mail out
//! there and an index that shows *something* beats a scan that dies.

use nom::error::{Error as NomError, ErrorKind as NomErrorKind};
use nom::IResult;

/// Placeholder for header text we could not decode.
const UNDECODABLE: &str = "???";

fn parse_err(input: &[u8]) -> nom::Err<NomError<&[u8]>> {
    nom::Err::Error(NomError::new(input, NomErrorKind::Verify))
}

/// One encoded word, `=?charset?encoding?encoded text?=`.
fn encoded_word(input: &[u8]) -> IResult<&[u8], String> {
    if input.len() < 5 || input[0] != b'=' || input[1] != b'?' {
        return Err(parse_err(input));
    }
    /* find end of charset tag:
     * =?charset?encoding?encoded text?=
     * ---------^
     */
    let tag_end_idx = match input[2..].iter().position(|&b| b == b'?') {
        Some(idx) => idx + 2,
        None => return Err(parse_err(input)),
    };
    if tag_end_idx + 2 >= input.len() || input[tag_end_idx + 2] != b'?' {
        return Err(parse_err(input));
    }
    /* See if input ends with "?=" and get ending index:
     * =?charset?encoding?encoded text?=
     * -------------------------------^
     */
    let mut encoded_end_idx = None;
    for i in (tag_end_idx + 3)..input.len() {
        if input[i] == b'?' && input.get(i + 1) == Some(&b'=') {
            encoded_end_idx = Some(i);
            break;
        }
    }
    let encoded_end_idx = match encoded_end_idx {
        Some(idx) => idx,
        None => return Err(parse_err(input)),
    };
    let encoded_text = &input[tag_end_idx + 3..encoded_end_idx];

    let bytes: Vec<u8> = match input[tag_end_idx + 1] {
        b'b' | b'B' => base64::decode(encoded_text).unwrap_or_else(|_| encoded_text.to_vec()),
        b'q' | b'Q' => quoted_printable_header(encoded_text),
        _ => return Err(parse_err(input)),
    };

    // RFC 2231 permits a language suffix after `*` in the charset tag.
    let charset: &[u8] = input[2..tag_end_idx]
        .split(|&b| b == b'*')
        .next()
        .unwrap_or(&[]);
    let decoded = match encoding_rs::Encoding::for_label(charset) {
        Some(enc) => enc.decode(&bytes).0.into_owned(),
        None => UNDECODABLE.to_string(),
    };
    Ok((&input[encoded_end_idx + 2..], decoded))
}

/// Quoted-printable in header context: `_` means space, `=XX` is a hex byte.
/// Invalid escapes pass through verbatim.
fn quoted_printable_header(input: &[u8]) -> Vec<u8> {
    fn hex_digit(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'A'..=b'F' => Some(b - b'A' + 10),
            b'a'..=b'f' => Some(b - b'a' + 10),
            _ => None,
        }
    }
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < input.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(input[i + 1]), hex_digit(input[i + 2])) {
                    out.push(hi * 16 + lo);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decode a header value that may mix plain text and RFC 2047 encoded words
/// into normalized display text. Whitespace between two adjacent encoded
/// words is dropped per RFC 2047 §6.2; CR/LF never survive into the result.
pub fn decode_header_value(input: &[u8]) -> String {
    if !input.windows(2).any(|w| w == b"=?") {
        return strip_crlf(&String::from_utf8_lossy(input));
    }

    let mut out = String::new();
    let mut pending_ws = String::new();
    let mut last_was_encoded = false;
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'=' && input.get(i + 1) == Some(&b'?') {
            if let Ok((rest, decoded)) = encoded_word(&input[i..]) {
                if !last_was_encoded {
                    out.push_str(&pending_ws);
                }
                pending_ws.clear();
                out.push_str(&decoded);
                i = input.len() - rest.len();
                last_was_encoded = true;
                continue;
            }
        }
        let b = input[i];
        if b == b' ' || b == b'\t' {
            pending_ws.push(b as char);
            i += 1;
            continue;
        }
        out.push_str(&pending_ws);
        pending_ws.clear();
        let start = i;
        while i < input.len()
            && input[i] != b' '
            && input[i] != b'\t'
            && !(input[i] == b'=' && input.get(i + 1) == Some(&b'?'))
        {
            i += 1;
        }
        out.push_str(&String::from_utf8_lossy(&input[start..i]));
        last_was_encoded = false;
    }
    out.push_str(&pending_ws);
    strip_crlf(&out)
}

fn strip_crlf(s: &str) -> String {
    if !s.contains('\r') && !s.contains('\n') {
        return s.to_string();
    }
    s.chars().filter(|&c| c != '\r' && c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_passes_through() {
        assert_eq!(decode_header_value(b"Hello world"), "Hello world");
        assert_eq!(decode_header_value(b"a = b"), "a = b");
    }

    #[test]
    fn test_base64_encoded_word() {
        assert_eq!(
            decode_header_value(b"=?UTF-8?B?zprOsc67zrfOvM6tz4HOsQ==?="),
            "\u{39a}\u{3b1}\u{3bb}\u{3b7}\u{3bc}\u{3ad}\u{3c1}\u{3b1}"
        );
    }

    #[test]
    fn test_quoted_printable_encoded_word() {
        assert_eq!(
            decode_header_value(b"=?iso-8859-1?q?this=20is=20some=20text?="),
            "this is some text"
        );
        assert_eq!(
            decode_header_value(b"=?iso-8859-7?Q?_underscore_is_space?="),
            " underscore is space"
        );
    }

    #[test]
    fn test_mixed_plain_and_encoded() {
        assert_eq!(
            decode_header_value(b"Re: =?utf-8?q?caf=C3=A9?= meeting"),
            "Re: caf\u{e9} meeting"
        );
    }

    #[test]
    fn test_adjacent_encoded_words_drop_separating_whitespace() {
        assert_eq!(
            decode_header_value(b"=?utf-8?q?one?= =?utf-8?q?two?="),
            "onetwo"
        );
    }

    #[test]
    fn test_encoded_word_adjacent_to_address() {
        // The motivating production sample: no space between the encoded word
        // and the address that follows it.
        assert_eq!(
            decode_header_value(b"=?UTF-8?B?VFJFTkQgTE9BTiBDT01QQU5Z?=<notification@teemi.my>"),
            "TREND LOAN COMPANY<notification@teemi.my>"
        );
    }

    #[test]
    fn test_unknown_charset_becomes_placeholder() {
        assert_eq!(
            decode_header_value(b"=?x-no-such-charset?q?abc?="),
            UNDECODABLE
        );
    }

    #[test]
    fn test_malformed_encoded_word_kept_verbatim() {
        assert_eq!(decode_header_value(b"=?broken"), "=?broken");
    }

    #[test]
    fn test_crlf_stripped() {
        assert_eq!(
            decode_header_value(b"=?utf-8?q?one?=\r\n tail"),
            "one tail"
        );
    }
}
