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

//! Connection identity carried through the broker.
//!
//! Once a request is dispatched, the gateway keeps no record of the client
//! connection. The only thing that survives is the raw descriptor, which
//! travels by value as the first part of the broker message and comes back
//! unchanged in the reply. A [`ConnHandle`] is that value. It is not a table
//! index: it is a capability to write on one specific socket.

use std::convert::TryInto;
use std::fmt;
use std::net;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

pub const HANDLE_SIZE: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HandleError {
    #[error("handle must be 4 bytes, got {0}")]
    BadSize(usize),

    #[error("invalid descriptor {0}")]
    Invalid(RawFd),
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnHandle(RawFd);

impl ConnHandle {
    /// Returns the handle of a socket without taking ownership of it.
    pub fn of<S: AsRawFd>(s: &S) -> Self {
        Self(s.as_raw_fd())
    }

    /// Consumes a socket, leaving its descriptor open. The returned handle
    /// becomes the sole owner of the descriptor.
    pub fn release<S: IntoRawFd>(s: S) -> Self {
        Self(s.into_raw_fd())
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0
    }

    pub fn to_bytes(self) -> [u8; HANDLE_SIZE] {
        self.0.to_ne_bytes()
    }

    pub fn from_bytes(src: &[u8]) -> Result<Self, HandleError> {
        let bytes: [u8; HANDLE_SIZE] = src
            .try_into()
            .map_err(|_| HandleError::BadSize(src.len()))?;

        let fd = RawFd::from_ne_bytes(bytes);

        if fd < 0 {
            return Err(HandleError::Invalid(fd));
        }

        Ok(Self(fd))
    }

    /// Reclaims ownership of the descriptor as a stream.
    ///
    /// # Safety
    ///
    /// The handle must refer to an open socket previously given up with
    /// [`ConnHandle::release`], and it must not be used again afterwards.
    pub unsafe fn into_stream(self) -> net::TcpStream {
        net::TcpStream::from_raw_fd(self.0)
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd={}", self.0)
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
