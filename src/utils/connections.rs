/*
 * mualib - connection layer.
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

//! Connection layers (TCP/TLS) for remote accounts.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Tls(native_tls::TlsStream<TcpStream>),
}

use Connection::*;

impl Connection {
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self {
            Tcp(t) => t.set_read_timeout(dur),
            Tls(t) => t.get_ref().set_read_timeout(dur),
        }
    }

    pub fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self {
            Tcp(t) => t.set_write_timeout(dur),
            Tls(t) => t.get_ref().set_write_timeout(dur),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Tcp(t) => t.read(buf),
            Tls(t) => t.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Tcp(t) => t.write(buf),
            Tls(t) => t.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Tcp(t) => t.flush(),
            Tls(t) => t.flush(),
        }
    }
}

/// Resolve and connect, honoring an optional connect timeout. The first
/// resolved address is used; resolution or connection failure is a
/// [`ErrorKind::Network`] error that is never retried here.
pub fn tcp_stream_connect(hostname: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addr = (hostname, port)
        .to_socket_addrs()
        .map_err(|err| {
            Error::from(err)
                .set_summary(format!("could not resolve {}", hostname))
                .set_kind(ErrorKind::Network)
        })?
        .next()
        .ok_or_else(|| {
            Error::new(format!("no address found for {}", hostname)).set_kind(ErrorKind::Network)
        })?;
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|err| {
        Error::from(err)
            .set_summary(format!("failed to connect to {}:{}", hostname, port))
            .set_kind(ErrorKind::Network)
    })?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(stream)
}
