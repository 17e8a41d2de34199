/*
 * mualib - file range views.
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

//! A read-only window over a byte range of a larger reader, used to hand a
//! single message's bytes out of an mbox file without copying the mailbox.

use std::io::{self, Read, Seek, SeekFrom};

#[derive(Debug)]
pub struct FileRange<R> {
    base: R,
    start: u64,
    size: u64,
    /// Cursor, relative to `start`.
    pos: u64,
}

impl<R: Read + Seek> FileRange<R> {
    pub fn new(mut base: R, start: u64, size: u64) -> io::Result<Self> {
        base.seek(SeekFrom::Start(start))?;
        Ok(Self {
            base,
            start,
            size,
            pos: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn into_inner(self) -> R {
        self.base
    }
}

impl<R: Read + Seek> Read for FileRange<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - self.pos) as usize;
        let take = buf.len().min(remaining);
        let n = self.base.read(&mut buf[..take])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for FileRange<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: i64 = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of range",
            ));
        }
        self.pos = target as u64;
        self.base.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(self.pos)
    }
}
