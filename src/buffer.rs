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

use std::io;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Status {
    NeedMore,
    LineComplete,
    PeerClosed,
    Overflow,
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.iter().position(|&b| b == b'\r' || b == b'\n')
}

// Accumulates bytes until the first line terminator. The memory is
// allocated once and reused by every connection that occupies the slot.
pub struct LineBuffer {
    data: Box<[u8]>,
    len: usize,
    line_end: Option<usize>,
}

impl LineBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            len: 0,
            line_end: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.line_end = None;
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    // Bytes strictly before the terminator, once one has been seen.
    pub fn line(&self) -> Option<&[u8]> {
        self.line_end.map(|end| &self.data[..end])
    }

    pub fn append(&mut self, src: &[u8]) -> Status {
        if self.line_end.is_some() {
            return Status::LineComplete;
        }

        if src.is_empty() {
            return Status::PeerClosed;
        }

        let start = self.len;
        let size = src.len().min(self.data.len() - start);

        self.data[start..(start + size)].copy_from_slice(&src[..size]);

        self.commit(start, size)
    }

    // Reads until the line is complete, the buffer is full, the peer
    // closes, or the reader would block.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> Result<Status, io::Error> {
        loop {
            if self.line_end.is_some() {
                return Ok(Status::LineComplete);
            }

            if self.len == self.data.len() {
                return Ok(Status::Overflow);
            }

            let start = self.len;

            let size = match r.read(&mut self.data[start..]) {
                Ok(0) => return Ok(Status::PeerClosed),
                Ok(size) => size,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Status::NeedMore),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            match self.commit(start, size) {
                Status::NeedMore => {}
                status => return Ok(status),
            }
        }
    }

    fn commit(&mut self, start: usize, size: usize) -> Status {
        self.len += size;

        // only the newly written bytes need scanning
        if let Some(pos) = find_terminator(&self.data[start..self.len]) {
            let end = start + pos;

            self.data[end] = 0;
            self.line_end = Some(end);

            return Status::LineComplete;
        }

        if self.len == self.data.len() {
            return Status::Overflow;
        }

        Status::NeedMore
    }
}

// One buffer per table slot. Buffers never move between pools and are
// never freed while the gateway runs.
pub struct BufferPool {
    buffers: Vec<LineBuffer>,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let mut buffers = Vec::with_capacity(count);

        for _ in 0..count {
            buffers.push(LineBuffer::new(buffer_size));
        }

        Self { buffers }
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn get(&self, index: usize) -> &LineBuffer {
        &self.buffers[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut LineBuffer {
        &mut self.buffers[index]
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.buffers.swap(a, b);
    }
}
