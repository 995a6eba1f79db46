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

use crate::broker::{Broker, BrokerError};
use crate::buffer::Status;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::handle::ConnHandle;
use crate::poller::{Poller, WaitError};
use crate::reply::{self, ReplyRouter};
use crate::table::{ConnectionTable, RemovalQueue};
use log::{debug, error, info, trace, warn};
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

// Errors that concern only the connection being accepted.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stats {
    pub accepted: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub send_failed: u64,
    pub overflowed: u64,
    pub closed: u64,
    pub replied: u64,
    pub replies_dropped: u64,
}

pub struct Server {
    poller: Poller,
    listener: TcpListener,
    broker: Broker,
    table: ConnectionTable,
    removals: RemovalQueue,
    dispatcher: Dispatcher,
    router: ReplyRouter,
    stats: Stats,
}

impl Server {
    pub fn new(
        listener: std::net::TcpListener,
        broker: Broker,
        maxconn: usize,
        buffer_size: usize,
        dispatcher: Dispatcher,
        router: ReplyRouter,
    ) -> Result<Self, ServerError> {
        listener.set_nonblocking(true)?;

        let listener = TcpListener::from_std(listener);

        let poller = Poller::new(maxconn)?;
        poller.register_broker(broker.fd()?)?;

        Ok(Self {
            poller,
            listener,
            broker,
            table: ConnectionTable::new(maxconn, buffer_size),
            removals: RemovalQueue::with_capacity(maxconn),
            dispatcher,
            router,
            stats: Stats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.listener.local_addr()
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    // Runs until the wait is interrupted or the stop flag is raised.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), ServerError> {
        info!("accepting connections on {}", self.local_addr()?);

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested");
                break;
            }

            match self.poll_once(None) {
                Ok(_) => {}
                Err(ServerError::Wait(WaitError::Interrupted)) => {
                    info!("wait interrupted");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!("stopping, {:?}", self.stats);

        Ok(())
    }

    // One pass of the loop. Returns the number of ready members the wait
    // reported, which is 0 if the timeout elapsed.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        self.broker.update_events()?;

        let room = !self.table.is_full();
        self.poller.set_listening(&mut self.listener, room)?;

        let count = self.poller.wait(self.broker.has_input(), timeout)?;

        if count == 0 {
            return Ok(0);
        }

        trace!("wait returned {} ready", count);

        if self.poller.broker_ready() {
            self.process_replies();
        }

        if self.poller.listener_ready() {
            self.accept_pending();
        }

        // the table is only compacted after this, so reported indices
        // still name the slots they were reported for
        for i in 0..self.poller.ready_slots().len() {
            let index = self.poller.ready_slots()[i];

            self.process_slot(index);
        }

        let removed = self
            .removals
            .apply_all(&mut self.table, self.poller.registry());

        if removed > 0 {
            debug!("removed {}, {} active", removed, self.table.len());
        }

        Ok(count)
    }

    fn process_replies(&mut self) {
        loop {
            let parts = match self.broker.recv_reply() {
                Ok(Some(parts)) => parts,
                Ok(None) => break,
                Err(e) => {
                    error!("{}", e);
                    break;
                }
            };

            match self.router.route(&parts) {
                Ok(handle) => {
                    debug!("replied to {}", handle);

                    self.stats.replied += 1;
                }
                Err(e) => {
                    warn!("dropping broker reply: {}", e);

                    self.stats.replies_dropped += 1;
                }
            }
        }
    }

    fn accept_pending(&mut self) {
        while !self.table.is_full() {
            let (stream, peer_addr) = match self.listener.accept() {
                Ok(ret) => ret,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_transient_accept_error(&e) => {
                    debug!("accept failed: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("accept failed: {}", e);

                    // the listener won't signal again for connections that
                    // are already queued. re-adding it on the next pass
                    // reports them
                    if let Err(e) = self.poller.set_listening(&mut self.listener, false) {
                        error!("failed to suspend listener: {}", e);
                    }

                    break;
                }
            };

            self.stats.accepted += 1;

            match self.table.add(self.poller.registry(), stream) {
                Ok(index) => debug!("accepted {} into slot {}", peer_addr, index),
                Err(e) => warn!("dropping connection from {}: {}", peer_addr, e),
            }
        }
    }

    fn process_slot(&mut self, index: usize) {
        // released slots and new arrivals without events are skipped
        if index >= self.table.len() || !self.table.has_interest(index) {
            return;
        }

        match self.table.read(index) {
            Ok(Status::NeedMore) => return,
            Ok(Status::LineComplete) => self.dispatch_slot(index),
            Ok(Status::PeerClosed) => {
                debug!("slot {}: peer closed", index);

                self.stats.closed += 1;
            }
            Ok(Status::Overflow) => {
                warn!(
                    "slot {}: no line within {} bytes, closing",
                    index,
                    self.table.buffer(index).capacity()
                );

                self.stats.overflowed += 1;
            }
            Err(e) => {
                debug!("slot {}: read failed: {}", index, e);

                self.stats.closed += 1;
            }
        }

        self.removals.enqueue(&mut self.table, index);
    }

    fn dispatch_slot(&mut self, index: usize) {
        let dispatch = match self.table.line(index) {
            Some(line) => {
                debug!("slot {}: {}", index, String::from_utf8_lossy(line));

                self.dispatcher.dispatch(line)
            }
            None => return,
        };

        let stream = match self.table.take_stream(self.poller.registry(), index) {
            Some(stream) => stream,
            None => return,
        };

        match dispatch {
            Dispatch::Forward(payload) => {
                let handle = ConnHandle::release(stream);

                match self.broker.send_request(handle, &payload) {
                    Ok(()) => {
                        debug!("forwarded request from {}", handle);

                        self.stats.forwarded += 1;
                    }
                    Err(e) => {
                        error!("failed to forward request from {}: {}", handle, e);

                        // SAFETY: the handle was released just above and
                        // never reached the broker
                        drop(unsafe { handle.into_stream() });

                        self.stats.send_failed += 1;
                    }
                }
            }
            Dispatch::Reject(reason) => {
                debug!("slot {}: rejecting: {}", index, reason);

                let stream = reply::into_std(stream);

                if let Err(e) = reply::respond_not_found(stream, self.router.write_timeout()) {
                    debug!("slot {}: failed to write response: {}", index, e);
                }

                self.stats.rejected += 1;
            }
        }
    }
}
