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

use crate::broker::{Broker, BrokerError, SpecInfo};
use crate::config::Gateway;
use crate::dispatch::Dispatcher;
use crate::reply::ReplyRouter;
use crate::server::{Server, ServerError};
use log::info;
use signal_hook::consts::TERM_SIGNALS;
use socket2::{Domain, Socket, Type};
use std::convert::TryFrom;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

pub const CONNS_MAX: usize = 10_000;
pub const BUFFER_SIZE_MIN: usize = 16;
pub const BUFFER_SIZE_MAX: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to listen on {0}: {1}")]
    Listen(SocketAddr, io::Error),

    #[error("failed to register signal handler: {0}")]
    Signal(io::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub listen_backlog: i32,
    pub maxconn: usize,
    pub buffer_size: usize,
    pub broker: SpecInfo,
    pub write_timeout: Duration,
}

impl Config {
    pub fn from_gateway(gateway: &Gateway) -> Result<Self, AppError> {
        let addr: IpAddr = gateway.http_addr.parse().map_err(|e| {
            AppError::Config(format!("bad http_addr {:?}: {}", gateway.http_addr, e))
        })?;

        let maxconn = gateway.maxconn as usize;

        if maxconn < 1 || maxconn > CONNS_MAX {
            return Err(AppError::Config(format!(
                "maxconn must be between 1 and {}, got {}",
                CONNS_MAX, maxconn
            )));
        }

        let buffer_size = gateway.buffer_size as usize;

        if buffer_size < BUFFER_SIZE_MIN || buffer_size > BUFFER_SIZE_MAX {
            return Err(AppError::Config(format!(
                "buffer_size must be between {} and {}, got {}",
                BUFFER_SIZE_MIN, BUFFER_SIZE_MAX, buffer_size
            )));
        }

        if gateway.broker_spec.is_empty() {
            return Err(AppError::Config("broker_spec must not be empty".into()));
        }

        // sockets reject a zero write timeout
        if gateway.write_timeout == 0 {
            return Err(AppError::Config("write_timeout must be at least 1".into()));
        }

        let listen_backlog = i32::try_from(gateway.listen_backlog).map_err(|_| {
            AppError::Config(format!("listen_backlog too large: {}", gateway.listen_backlog))
        })?;

        Ok(Self {
            listen_addr: SocketAddr::new(addr, gateway.http_port),
            listen_backlog,
            maxconn,
            buffer_size,
            broker: SpecInfo {
                spec: gateway.broker_spec.clone(),
                bind: gateway.broker_bind,
            },
            write_timeout: Duration::from_secs(u64::from(gateway.write_timeout)),
        })
    }
}

pub fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener, io::Error> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

pub struct App {
    server: Server,
}

impl App {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let listener = listen(config.listen_addr, config.listen_backlog)
            .map_err(|e| AppError::Listen(config.listen_addr, e))?;

        let zmq_context = zmq::Context::new();

        info!("broker {}", config.broker);

        let broker = Broker::new(&zmq_context, &config.broker)?;

        let server = Server::new(
            listener,
            broker,
            config.maxconn,
            config.buffer_size,
            Dispatcher::default(),
            ReplyRouter::new(config.write_timeout),
        )?;

        Ok(Self { server })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.server.local_addr()
    }

    // Runs the server until a termination signal arrives.
    pub fn run(&mut self) -> Result<(), AppError> {
        let term_now = Arc::new(AtomicBool::new(false));

        // ensure two term signals in a row causes the app to immediately exit
        for signal_type in TERM_SIGNALS {
            signal_hook::flag::register_conditional_shutdown(
                *signal_type,
                1, // exit code
                Arc::clone(&term_now),
            )
            .map_err(AppError::Signal)?;

            signal_hook::flag::register(*signal_type, Arc::clone(&term_now))
                .map_err(AppError::Signal)?;
        }

        self.server.run(&term_now)?;

        Ok(())
    }
}
