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

use crate::config::Gateway;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

// Struct to hold the command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "qgate",
    version,
    about = "HTTP GET to ZeroMQ broker gateway."
)]
pub struct CliArgs {
    /// Set path to the configuration file
    #[arg(short, long, value_name = "file")]
    pub config_file: Option<PathBuf>,

    /// Set path to the log file
    #[arg(short = 'l', long, value_name = "file")]
    pub log_file: Option<PathBuf>,

    /// Set log level (0=error, 1=warn, 2=info, 3=debug, 4=trace)
    #[arg(short = 'L', long, value_name = "x", default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=4))]
    pub log_level: u8,

    /// Override http_port config option
    #[arg(short, long, value_name = "port")]
    pub port: Option<u16>,

    /// Override maxconn config option, the number of concurrent connections
    #[arg(short, long, value_name = "n")]
    pub maxconn: Option<u32>,

    /// Override broker_spec config option, the ZeroMQ endpoint of the broker
    #[arg(short, long, value_name = "spec")]
    pub broker: Option<String>,

    /// Bind the broker endpoint instead of connecting to it
    #[arg(long, default_value_t = false)]
    pub broker_bind: bool,
}

impl CliArgs {
    /// Applies the command line overrides to the configured values.
    pub fn apply(&self, gateway: &mut Gateway) {
        if let Some(port) = self.port {
            gateway.http_port = port;
        }

        if let Some(maxconn) = self.maxconn {
            gateway.maxconn = maxconn;
        }

        if let Some(broker) = &self.broker {
            gateway.broker_spec = broker.clone();
        }

        if self.broker_bind {
            gateway.broker_bind = true;
        }
    }

    pub fn log_level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            4..=u8::MAX => LevelFilter::Trace,
        }
    }
}
