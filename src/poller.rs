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

use log::trace;
use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub const LISTENER: Token = Token(0);
pub const BROKER: Token = Token(1);

// tokens below this are reserved for the listener and the broker
const SLOT_TOKEN_BASE: usize = 2;

pub fn slot_token(index: usize) -> Token {
    Token(SLOT_TOKEN_BASE + index)
}

pub fn token_slot(token: Token) -> Option<usize> {
    token.0.checked_sub(SLOT_TOKEN_BASE)
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("poll interrupted")]
    Interrupted,

    #[error("poll failed: {0}")]
    Failed(io::Error),
}

pub struct Poller {
    poll: Poll,
    events: Events,
    listening: bool,
    broker_ready: bool,
    listener_ready: bool,
    ready_slots: Vec<usize>,
}

impl Poller {
    pub fn new(slots_max: usize) -> Result<Self, io::Error> {
        let events_max = SLOT_TOKEN_BASE + slots_max;

        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(events_max),
            listening: false,
            broker_ready: false,
            listener_ready: false,
            ready_slots: Vec::with_capacity(slots_max),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn register_broker(&self, fd: RawFd) -> Result<(), io::Error> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), BROKER, Interest::READABLE)
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    // Adds or removes the listener from the waited set. While it is out of
    // the set, pending connections stay queued in the OS.
    pub fn set_listening(
        &mut self,
        listener: &mut TcpListener,
        enabled: bool,
    ) -> Result<(), io::Error> {
        if enabled == self.listening {
            return Ok(());
        }

        if enabled {
            self.poll
                .registry()
                .register(listener, LISTENER, Interest::READABLE)?;

            trace!("listener resumed");
        } else {
            self.poll.registry().deregister(listener)?;

            trace!("listener suspended");
        }

        self.listening = enabled;

        Ok(())
    }

    // Blocks until something is ready and returns the number of ready
    // members. The broker socket only signals edges, so the caller passes
    // in whether it still holds unread input, in which case we don't block.
    pub fn wait(
        &mut self,
        broker_pending: bool,
        timeout: Option<Duration>,
    ) -> Result<usize, WaitError> {
        self.broker_ready = false;
        self.listener_ready = false;
        self.ready_slots.clear();

        let timeout = if broker_pending {
            Some(Duration::from_millis(0))
        } else {
            timeout
        };

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Err(WaitError::Interrupted);
            }

            return Err(WaitError::Failed(e));
        }

        self.broker_ready = broker_pending;

        for event in self.events.iter() {
            match event.token() {
                BROKER => self.broker_ready = true,
                LISTENER => self.listener_ready = self.listening,
                token => {
                    if let Some(index) = token_slot(token) {
                        self.ready_slots.push(index);
                    }
                }
            }
        }

        Ok(self.ready_count())
    }

    pub fn ready_count(&self) -> usize {
        let mut count = self.ready_slots.len();

        if self.broker_ready {
            count += 1;
        }

        if self.listener_ready {
            count += 1;
        }

        count
    }

    pub fn broker_ready(&self) -> bool {
        self.broker_ready
    }

    pub fn listener_ready(&self) -> bool {
        self.listener_ready
    }

    // Slot indices as of the last wait, in the order reported.
    pub fn ready_slots(&self) -> &[usize] {
        &self.ready_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net;

    #[test]
    fn test_tokens() {
        assert_eq!(slot_token(0), Token(2));
        assert_eq!(token_slot(slot_token(7)), Some(7));
        assert_eq!(token_slot(LISTENER), None);
        assert_eq!(token_slot(BROKER), None);
    }

    #[test]
    fn test_listening() {
        let mut poller = Poller::new(4).unwrap();

        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        poller.set_listening(&mut listener, true).unwrap();
        assert!(poller.is_listening());

        // registering twice is a no-op
        poller.set_listening(&mut listener, true).unwrap();

        let _client = net::TcpStream::connect(addr).unwrap();

        let count = poller.wait(false, None).unwrap();
        assert_eq!(count, 1);
        assert!(poller.listener_ready());
        assert!(!poller.broker_ready());
        assert!(poller.ready_slots().is_empty());

        poller.set_listening(&mut listener, false).unwrap();
        assert!(!poller.is_listening());

        let _client2 = net::TcpStream::connect(addr).unwrap();

        let count = poller
            .wait(false, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(count, 0);
        assert!(!poller.listener_ready());

        // pending connections are reported again once resumed
        poller.set_listening(&mut listener, true).unwrap();

        let count = poller.wait(false, None).unwrap();
        assert_eq!(count, 1);
        assert!(poller.listener_ready());
    }

    #[test]
    fn test_slots_and_broker_pending() {
        let mut poller = Poller::new(4).unwrap();

        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        peer.set_nonblocking(true).unwrap();

        let mut peer = mio::net::TcpStream::from_std(peer);

        poller
            .registry()
            .register(&mut peer, slot_token(3), Interest::READABLE)
            .unwrap();

        // pending broker input never blocks
        let count = poller.wait(true, None).unwrap();
        assert_eq!(count, 1);
        assert!(poller.broker_ready());

        client.write_all(b"hello\n").unwrap();

        let count = poller.wait(false, None).unwrap();
        assert_eq!(count, 1);
        assert_eq!(poller.ready_slots(), &[3]);
        assert!(!poller.broker_ready());
    }
}
