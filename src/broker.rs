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

use crate::handle::ConnHandle;
use log::debug;
use std::fmt;
use std::os::unix::io::RawFd;

#[derive(Clone, PartialEq)]
pub struct SpecInfo {
    pub spec: String,
    pub bind: bool,
}

impl fmt::Display for SpecInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bind {
            write!(f, "bind:{}", self.spec)
        } else {
            write!(f, "connect:{}", self.spec)
        }
    }
}

impl fmt::Debug for SpecInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("create socket: {0}")]
    Socket(zmq::Error),

    #[error("connect {0}: {1}")]
    Connect(String, zmq::Error),

    #[error("bind {0}: {1}")]
    Bind(String, zmq::Error),

    #[error("send: {0}")]
    Send(zmq::Error),

    #[error("recv: {0}")]
    Recv(zmq::Error),
}

// The DEALER side of the broker channel. Requests go out as
// [handle, payload] and replies come back the same way.
pub struct Broker {
    sock: zmq::Socket,
    events: zmq::PollEvents,
}

impl Broker {
    pub fn new(ctx: &zmq::Context, spec: &SpecInfo) -> Result<Self, BrokerError> {
        let sock = ctx.socket(zmq::DEALER).map_err(BrokerError::Socket)?;

        // don't hold the process open with undelivered requests
        sock.set_linger(0).map_err(BrokerError::Socket)?;

        if spec.bind {
            sock.bind(&spec.spec)
                .map_err(|e| BrokerError::Bind(spec.spec.clone(), e))?;
        } else {
            sock.connect(&spec.spec)
                .map_err(|e| BrokerError::Connect(spec.spec.clone(), e))?;
        }

        let mut broker = Self {
            sock,
            events: zmq::PollEvents::empty(),
        };

        broker.update_events()?;

        Ok(broker)
    }

    pub fn fd(&self) -> Result<RawFd, BrokerError> {
        self.sock.get_fd().map_err(BrokerError::Socket)
    }

    pub fn update_events(&mut self) -> Result<(), BrokerError> {
        loop {
            match self.sock.get_events() {
                Ok(events) => {
                    self.events = events;
                    break;
                }
                Err(zmq::Error::EINTR) => continue,
                Err(e) => return Err(BrokerError::Socket(e)),
            }
        }

        Ok(())
    }

    // Whether a reply can be read without waiting, as of the last
    // operation on the socket.
    pub fn has_input(&self) -> bool {
        self.events.contains(zmq::POLLIN)
    }

    pub fn send_request(&mut self, handle: ConnHandle, payload: &[u8]) -> Result<(), BrokerError> {
        let header = handle.to_bytes();
        let parts: [&[u8]; 2] = [&header, payload];

        let ret = self.sock.send_multipart(parts, zmq::DONTWAIT);

        self.update_events()?;

        ret.map_err(BrokerError::Send)
    }

    // Returns the parts of the next reply, or None if nothing is waiting.
    pub fn recv_reply(&mut self) -> Result<Option<Vec<Vec<u8>>>, BrokerError> {
        let ret = self.sock.recv_multipart(zmq::DONTWAIT);

        self.update_events()?;

        match ret {
            Ok(parts) => {
                debug!("broker reply with {} parts", parts.len());

                Ok(Some(parts))
            }
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(BrokerError::Recv(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_readable(sock: &zmq::Socket) {
        let mut items = [sock.as_poll_item(zmq::POLLIN)];
        assert_eq!(zmq::poll(&mut items, 5000).unwrap(), 1);
    }

    #[test]
    fn test_spec_display() {
        let spec = SpecInfo {
            spec: "tcp://127.0.0.1:9292".to_string(),
            bind: false,
        };
        assert_eq!(spec.to_string(), "connect:tcp://127.0.0.1:9292");

        let spec = SpecInfo {
            spec: "ipc:///tmp/qgate".to_string(),
            bind: true,
        };
        assert_eq!(spec.to_string(), "bind:ipc:///tmp/qgate");
    }

    #[test]
    fn test_bad_spec() {
        let ctx = zmq::Context::new();

        let spec = SpecInfo {
            spec: "nope://x".to_string(),
            bind: false,
        };
        assert!(matches!(
            Broker::new(&ctx, &spec),
            Err(BrokerError::Connect(_, _))
        ));
    }

    #[test]
    fn test_request_reply() {
        let ctx = zmq::Context::new();

        let router = ctx.socket(zmq::ROUTER).unwrap();
        router.bind("inproc://broker-test").unwrap();

        let spec = SpecInfo {
            spec: "inproc://broker-test".to_string(),
            bind: false,
        };

        let mut broker = Broker::new(&ctx, &spec).unwrap();
        assert!(!broker.has_input());
        assert!(broker.recv_reply().unwrap().is_none());

        let handle = ConnHandle::from_bytes(&7i32.to_ne_bytes()).unwrap();
        broker.send_request(handle, b"payload").unwrap();

        wait_readable(&router);

        let parts = router.recv_multipart(0).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], handle.to_bytes());
        assert_eq!(parts[2], b"payload");

        router
            .send_multipart([&parts[0][..], &parts[1][..], &b"route-xyz"[..]], 0)
            .unwrap();

        wait_readable(&broker.sock);
        broker.update_events().unwrap();
        assert!(broker.has_input());

        let reply = broker.recv_reply().unwrap().unwrap();
        assert_eq!(reply.len(), 2);
        assert_eq!(ConnHandle::from_bytes(&reply[0]).unwrap(), handle);
        assert_eq!(reply[1], b"route-xyz");

        assert!(!broker.has_input());
    }
}
