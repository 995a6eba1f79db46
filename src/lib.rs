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

pub mod app;
pub mod broker;
pub mod buffer;
pub mod cliargs;
pub mod config;
pub mod dispatch;
pub mod handle;
pub mod log;
pub mod poller;
pub mod reply;
pub mod server;
pub mod table;
pub mod tnetstring;

use crate::app::{App, Config};
use crate::cliargs::CliArgs;
use crate::config::CustomConfig;
use std::error::Error;

pub fn run(args: &CliArgs) -> Result<(), Box<dyn Error>> {
    let mut custom_config = CustomConfig::new(args.config_file.as_deref())?;

    if let Some(path) = &args.config_file {
        ::log::info!("using config: {}", path.display());
    }

    args.apply(&mut custom_config.gateway);

    let config = Config::from_gateway(&custom_config.gateway)?;

    ::log::info!("starting...");

    {
        let mut a = App::new(&config)?;

        ::log::info!("started");

        a.run()?;

        ::log::info!("stopping...");
    }

    ::log::info!("stopped");

    Ok(())
}
