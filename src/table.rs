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

//! The open-connection table.
//!
//! Slots are kept dense: the active connections always occupy indices
//! `0..len()`, and slot `i` is registered with the poller under
//! [`slot_token(i)`](crate::poller::slot_token). Removal is a swap-delete,
//! which moves the last slot into the hole and re-registers it under its new
//! token. Indices are therefore only stable until the next removal, which is
//! why removals go through a [`RemovalQueue`] and are applied once per loop
//! iteration, after every index-using step is done.

use crate::buffer::{BufferPool, LineBuffer, Status};
use crate::handle::ConnHandle;
use crate::poller::slot_token;
use log::{debug, error, log_enabled, trace, Level};
use mio::net::TcpStream;
use mio::{Interest, Registry};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AddError {
    #[error("connection table at capacity")]
    CapacityExceeded,

    #[error("failed to register connection: {0}")]
    Register(io::Error),
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("slot index out of range")]
pub struct RemoveError;

struct Slot {
    stream: Option<TcpStream>,
    interest: bool,
    scheduled: bool,
}

pub struct ConnectionTable {
    slots: Vec<Slot>,
    buffers: BufferPool,
}

impl ConnectionTable {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            buffers: BufferPool::new(capacity, buffer_size),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffers.count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.buffers.count()
    }

    pub fn add(&mut self, registry: &Registry, mut stream: TcpStream) -> Result<usize, AddError> {
        if self.is_full() {
            // stream is dropped, closing the connection
            return Err(AddError::CapacityExceeded);
        }

        let index = self.slots.len();

        if let Err(e) = registry.register(&mut stream, slot_token(index), Interest::READABLE) {
            return Err(AddError::Register(e));
        }

        debug!("adding connection {} at slot {}", ConnHandle::of(&stream), index);

        self.slots.push(Slot {
            stream: Some(stream),
            interest: true,
            scheduled: false,
        });

        self.dump();

        Ok(index)
    }

    pub fn remove(&mut self, registry: &Registry, index: usize) -> Result<(), RemoveError> {
        if index >= self.slots.len() {
            return Err(RemoveError);
        }

        let last = self.slots.len() - 1;

        let removed = self.slots.swap_remove(index);

        if let Some(mut stream) = removed.stream {
            debug!(
                "removing connection {} at slot {}",
                ConnHandle::of(&stream),
                index
            );

            if removed.interest {
                if let Err(e) = registry.deregister(&mut stream) {
                    error!("failed to deregister connection: {:?}", e);
                }
            }

            // dropping the stream closes it
        } else {
            debug!("removing released slot {}", index);
        }

        // keep the buffer memory, discard its contents
        self.buffers.swap(index, last);
        self.buffers.get_mut(last).clear();

        if index < last {
            let slot = &mut self.slots[index];

            if slot.interest {
                if let Some(stream) = &mut slot.stream {
                    if let Err(e) =
                        registry.reregister(stream, slot_token(index), Interest::READABLE)
                    {
                        error!("failed to reregister connection: {:?}", e);

                        slot.interest = false;
                    }
                }
            }
        }

        self.dump();

        Ok(())
    }

    // Deregisters the stream of a slot and moves it out. The slot itself
    // stays in the table until it is removed.
    pub fn take_stream(&mut self, registry: &Registry, index: usize) -> Option<TcpStream> {
        let slot = self.slots.get_mut(index)?;

        let mut stream = slot.stream.take()?;

        if slot.interest {
            if let Err(e) = registry.deregister(&mut stream) {
                error!("failed to deregister connection: {:?}", e);
            }

            slot.interest = false;
        }

        Some(stream)
    }

    pub fn read(&mut self, index: usize) -> Result<Status, io::Error> {
        let slot = match self.slots.get_mut(index) {
            Some(slot) => slot,
            None => return Err(io::Error::from(io::ErrorKind::NotFound)),
        };

        let stream = match &mut slot.stream {
            Some(stream) => stream,
            None => return Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        self.buffers.get_mut(index).read_from(stream)
    }

    pub fn buffer(&self, index: usize) -> &LineBuffer {
        self.buffers.get(index)
    }

    pub fn line(&self, index: usize) -> Option<&[u8]> {
        if index >= self.slots.len() {
            return None;
        }

        self.buffers.get(index).line()
    }

    pub fn has_interest(&self, index: usize) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.interest,
            None => false,
        }
    }

    pub fn handle(&self, index: usize) -> Option<ConnHandle> {
        self.slots.get(index)?.stream.as_ref().map(ConnHandle::of)
    }

    fn schedule(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.scheduled => {
                slot.scheduled = true;
                true
            }
            _ => false,
        }
    }

    fn dump(&self) {
        if !log_enabled!(Level::Trace) {
            return;
        }

        trace!("active connections: {}", self.slots.len());

        for (i, slot) in self.slots.iter().enumerate() {
            let handle = match &slot.stream {
                Some(stream) => ConnHandle::of(stream).to_string(),
                None => "released".to_string(),
            };

            trace!(
                "slot {:02}: {} buf={:?}",
                i,
                handle,
                String::from_utf8_lossy(self.buffers.get(i).filled())
            );
        }
    }
}

// Table indices scheduled for removal during the current iteration.
pub struct RemovalQueue {
    pending: Vec<usize>,
}

impl RemovalQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    // Returns false if the index is out of range or already scheduled.
    pub fn enqueue(&mut self, table: &mut ConnectionTable, index: usize) -> bool {
        if !table.schedule(index) {
            return false;
        }

        self.pending.push(index);

        true
    }

    // Removes every scheduled slot and returns the number removed.
    pub fn apply_all(&mut self, table: &mut ConnectionTable, registry: &Registry) -> usize {
        // highest first: a swap-delete then only ever moves a slot that is
        // not itself scheduled
        self.pending.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0;

        for index in self.pending.drain(..) {
            match table.remove(registry, index) {
                Ok(()) => removed += 1,
                Err(e) => error!("failed to remove slot {}: {}", index, e),
            }
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::io::{Read, Write};
    use std::net;
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    fn stream_pairs(count: usize) -> (Vec<net::TcpStream>, Vec<TcpStream>) {
        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut clients = Vec::new();
        let mut peers = Vec::new();

        for _ in 0..count {
            clients.push(net::TcpStream::connect(addr).unwrap());

            let (peer, _) = listener.accept().unwrap();
            peer.set_nonblocking(true).unwrap();
            peers.push(TcpStream::from_std(peer));
        }

        (clients, peers)
    }

    fn poll_tokens(poll: &mut Poll) -> Vec<Token> {
        let mut events = Events::with_capacity(16);
        poll.poll(&mut events, Some(Duration::from_millis(1000)))
            .unwrap();

        events.iter().map(|e| e.token()).collect()
    }

    #[test]
    fn test_add_capacity() {
        let poll = Poll::new().unwrap();
        let (_clients, peers) = stream_pairs(3);

        let mut table = ConnectionTable::new(2, 64);
        assert_eq!(table.capacity(), 2);
        assert!(table.is_empty());

        let mut results = Vec::new();
        for peer in peers {
            results.push(table.add(poll.registry(), peer));
        }

        assert_eq!(results[0].as_ref().unwrap(), &0);
        assert_eq!(results[1].as_ref().unwrap(), &1);
        assert!(matches!(results[2], Err(AddError::CapacityExceeded)));

        assert_eq!(table.len(), 2);
        assert!(table.is_full());
        assert!(table.has_interest(0));
        assert!(table.has_interest(1));
    }

    #[test]
    fn test_swap_delete() {
        let mut poll = Poll::new().unwrap();
        let (mut clients, peers) = stream_pairs(3);

        let fds: Vec<i32> = peers.iter().map(|p| p.as_raw_fd()).collect();

        let mut table = ConnectionTable::new(3, 64);
        for peer in peers {
            table.add(poll.registry(), peer).unwrap();
        }

        table.buffers.get_mut(0).append(b"zero");
        table.buffers.get_mut(1).append(b"one");
        table.buffers.get_mut(2).append(b"two");

        assert_eq!(table.remove(poll.registry(), 0), Ok(()));
        assert_eq!(table.len(), 2);

        // the formerly-last slot now lives at index 0
        assert_eq!(table.handle(0).unwrap().as_raw_fd(), fds[2]);
        assert_eq!(table.buffer(0).filled(), b"two");
        assert_eq!(table.handle(1).unwrap().as_raw_fd(), fds[1]);
        assert_eq!(table.buffer(1).filled(), b"one");

        // the vacated buffer is reset
        assert_eq!(table.buffer(2).len(), 0);

        // the relocated stream reports under its new token
        clients[2].write_all(b"x").unwrap();
        assert_eq!(poll_tokens(&mut poll), vec![slot_token(0)]);

        // removing the last slot only shrinks the table
        assert_eq!(table.remove(poll.registry(), 1), Ok(()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.handle(0).unwrap().as_raw_fd(), fds[2]);
        assert_eq!(table.buffer(1).len(), 0);

        assert_eq!(table.remove(poll.registry(), 1), Err(RemoveError));
        assert_eq!(table.remove(poll.registry(), 5), Err(RemoveError));
        assert_eq!(table.len(), 1);

        // removed connections are closed
        let mut buf = [0; 8];
        clients[0]
            .set_read_timeout(Some(Duration::from_millis(1000)))
            .unwrap();
        assert_eq!(clients[0].read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_take_stream() {
        let poll = Poll::new().unwrap();
        let (_clients, peers) = stream_pairs(2);

        let mut table = ConnectionTable::new(2, 64);
        for peer in peers {
            table.add(poll.registry(), peer).unwrap();
        }

        let stream = table.take_stream(poll.registry(), 0).unwrap();
        assert!(!table.has_interest(0));
        assert!(table.handle(0).is_none());
        assert!(table.take_stream(poll.registry(), 0).is_none());
        assert_eq!(table.len(), 2);

        assert!(table.read(0).is_err());

        // removing a released slot leaves the taken stream alone
        table.remove(poll.registry(), 0).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.has_interest(0));

        let handle = ConnHandle::release(stream);
        drop(unsafe { handle.into_stream() });
    }

    #[test]
    fn test_read() {
        let mut poll = Poll::new().unwrap();
        let (mut clients, peers) = stream_pairs(1);

        let mut table = ConnectionTable::new(1, 64);
        for peer in peers {
            table.add(poll.registry(), peer).unwrap();
        }

        clients[0].write_all(b"GET /plan?a=1").unwrap();
        assert_eq!(poll_tokens(&mut poll), vec![slot_token(0)]);
        assert_eq!(table.read(0).unwrap(), Status::NeedMore);
        assert_eq!(table.line(0), None);

        clients[0].write_all(b" HTTP/1.0\r\n").unwrap();
        assert_eq!(poll_tokens(&mut poll), vec![slot_token(0)]);
        assert_eq!(table.read(0).unwrap(), Status::LineComplete);
        assert_eq!(table.line(0), Some(&b"GET /plan?a=1 HTTP/1.0"[..]));

        drop(clients);
        table.buffers.get_mut(0).clear();
        assert_eq!(poll_tokens(&mut poll), vec![slot_token(0)]);
        assert_eq!(table.read(0).unwrap(), Status::PeerClosed);
    }

    #[test]
    fn test_removal_queue() {
        for order in &[[0, 2], [2, 0]] {
            let poll = Poll::new().unwrap();
            let (_clients, peers) = stream_pairs(4);
            let fds: Vec<i32> = peers.iter().map(|p| p.as_raw_fd()).collect();

            let mut table = ConnectionTable::new(4, 64);
            for peer in peers {
                table.add(poll.registry(), peer).unwrap();
            }

            let mut queue = RemovalQueue::with_capacity(4);
            for &i in order {
                assert!(queue.enqueue(&mut table, i));
            }

            // scheduling twice in the same iteration is refused
            assert!(!queue.enqueue(&mut table, order[0]));
            assert!(!queue.enqueue(&mut table, 9));
            assert_eq!(queue.len(), 2);

            assert_eq!(queue.apply_all(&mut table, poll.registry()), 2);
            assert!(queue.is_empty());
            assert_eq!(table.len(), 2);

            let mut left: Vec<i32> = (0..table.len())
                .map(|i| table.handle(i).unwrap().as_raw_fd())
                .collect();
            left.sort();
            assert_eq!(left, vec![fds[1], fds[3]]);

            // markers don't survive the commit
            assert!(queue.enqueue(&mut table, 0));
            assert_eq!(queue.apply_all(&mut table, poll.registry()), 1);
            assert_eq!(table.len(), 1);
        }
    }

    #[test]
    fn test_removal_queue_all() {
        let poll = Poll::new().unwrap();
        let (_clients, peers) = stream_pairs(5);

        let mut table = ConnectionTable::new(5, 64);
        for peer in peers {
            table.add(poll.registry(), peer).unwrap();
        }

        let mut queue = RemovalQueue::with_capacity(5);
        for &i in &[3, 0, 4, 1, 2] {
            assert!(queue.enqueue(&mut table, i));
        }

        assert_eq!(queue.apply_all(&mut table, poll.registry()), 5);
        assert!(table.is_empty());

        for i in 0..5 {
            assert!(table.buffer(i).is_empty());
        }
    }
}
