/*
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::handle::{ConnHandle, HandleError};
use log::debug;
use std::io::{self, Read, Write};
use std::net;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::time::Duration;

pub const OK_HEADER: &[u8] = b"HTTP/1.0 200 OK\nContent-Type:text/plain\n\n";
pub const NOT_FOUND_HEADER: &[u8] = b"HTTP/1.0 404 Not Found\nContent-Type:text/plain\n\n";
pub const NOT_FOUND_BODY: &[u8] = b"FOUR ZERO FOUR\n";

pub const WRITE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("reply must have 2 parts, got {0}")]
    PartCount(usize),

    #[error("bad handle: {0}")]
    Handle(#[from] HandleError),

    #[error("write to {0} failed: {1}")]
    Io(ConnHandle, io::Error),
}

pub fn into_std(stream: mio::net::TcpStream) -> net::TcpStream {
    // SAFETY: the descriptor comes straight from an owned stream
    unsafe { net::TcpStream::from_raw_fd(stream.into_raw_fd()) }
}

// Discard whatever the client sent beyond the request line. Closing a
// socket with unread input makes the OS reset the connection, which can
// destroy the response before the client reads it.
fn drain_input(stream: &mut net::TcpStream) -> Result<(), io::Error> {
    stream.set_nonblocking(true)?;

    let mut buf = [0; 1024];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

// Writes a complete response and closes the stream.
pub fn respond(
    mut stream: net::TcpStream,
    header: &[u8],
    body: &[u8],
    timeout: Duration,
) -> Result<(), io::Error> {
    drain_input(&mut stream)?;

    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(timeout))?;

    stream.write_all(header)?;
    stream.write_all(body)?;
    stream.flush()?;

    Ok(())
}

pub fn respond_not_found(stream: net::TcpStream, timeout: Duration) -> Result<(), io::Error> {
    respond(stream, NOT_FOUND_HEADER, NOT_FOUND_BODY, timeout)
}

// Splits a broker reply into its handle and payload.
pub fn parse_reply(parts: &[Vec<u8>]) -> Result<(ConnHandle, &[u8]), RouteError> {
    if parts.len() != 2 {
        return Err(RouteError::PartCount(parts.len()));
    }

    let handle = ConnHandle::from_bytes(&parts[0])?;

    Ok((handle, &parts[1]))
}

pub struct ReplyRouter {
    write_timeout: Duration,
}

impl ReplyRouter {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    // Delivers a broker reply to the client it names. The handle is trusted:
    // it must be one this process released when forwarding the request.
    pub fn route(&self, parts: &[Vec<u8>]) -> Result<ConnHandle, RouteError> {
        let (handle, payload) = parse_reply(parts)?;

        debug!("routing {} bytes to {}", payload.len(), handle);

        // SAFETY: handles only ever come back from the broker after being
        // released in dispatch, and each one is answered once
        let stream = unsafe { handle.into_stream() };

        respond(stream, OK_HEADER, payload, self.write_timeout)
            .map_err(|e| RouteError::Io(handle, e))?;

        Ok(handle)
    }
}

impl Default for ReplyRouter {
    fn default() -> Self {
        Self::new(WRITE_TIMEOUT_DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (peer, _) = listener.accept().unwrap();

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        (client, peer)
    }

    #[test]
    fn test_parse_reply() {
        let h = ConnHandle::from_bytes(&9i32.to_ne_bytes()).unwrap();

        let parts = vec![h.to_bytes().to_vec(), b"body".to_vec()];
        let (handle, payload) = parse_reply(&parts).unwrap();
        assert_eq!(handle, h);
        assert_eq!(payload, b"body");

        let parts = vec![h.to_bytes().to_vec()];
        assert!(matches!(parse_reply(&parts), Err(RouteError::PartCount(1))));

        let parts = vec![h.to_bytes().to_vec(), vec![], vec![]];
        assert!(matches!(parse_reply(&parts), Err(RouteError::PartCount(3))));

        let parts = vec![b"12345678".to_vec(), b"body".to_vec()];
        assert!(matches!(
            parse_reply(&parts),
            Err(RouteError::Handle(HandleError::BadSize(8)))
        ));
    }

    #[test]
    fn test_respond_not_found() {
        let (mut client, peer) = stream_pair();

        // unread input must not interfere with the response
        client.write_all(b"GET /x HTTP/1.0\r\nHost: a\r\n\r\n").unwrap();

        respond_not_found(peer, WRITE_TIMEOUT_DEFAULT).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(
            buf,
            &b"HTTP/1.0 404 Not Found\nContent-Type:text/plain\n\nFOUR ZERO FOUR\n"[..]
        );
    }

    #[test]
    fn test_route() {
        let (mut client, peer) = stream_pair();

        let handle = ConnHandle::release(peer);

        let router = ReplyRouter::default();
        assert_eq!(router.write_timeout(), Duration::from_secs(5));

        let parts = vec![handle.to_bytes().to_vec(), b"route-xyz".to_vec()];
        assert_eq!(router.route(&parts).unwrap(), handle);

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(
            buf,
            &b"HTTP/1.0 200 OK\nContent-Type:text/plain\n\nroute-xyz"[..]
        );
    }

    #[test]
    fn test_route_large() {
        let (mut client, peer) = stream_pair();

        let handle = ConnHandle::release(peer);

        // larger than a socket send buffer, so the write has to wait
        let body = vec![b'x'; 8 * 1024 * 1024];

        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            client.read_to_end(&mut buf).unwrap();
            buf
        });

        let router = ReplyRouter::default();
        router
            .route(&[handle.to_bytes().to_vec(), body.clone()])
            .unwrap();

        let buf = reader.join().unwrap();
        assert_eq!(buf.len(), OK_HEADER.len() + body.len());
        assert_eq!(&buf[..OK_HEADER.len()], OK_HEADER);
    }
}
