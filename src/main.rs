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

use clap::Parser;
use log::error;
use qgate::cliargs::CliArgs;
use qgate::log::{ensure_init_simple_logger, get_simple_logger, local_offset_check, open_log_file};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let log_file = match &args.log_file {
        Some(path) => match open_log_file(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: unable to open log file {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    ensure_init_simple_logger(log_file);

    if let Err(e) = log::set_logger(get_simple_logger()) {
        eprintln!("error: failed to set logger: {}", e);
        return ExitCode::FAILURE;
    }

    log::set_max_level(args.log_level_filter());

    local_offset_check();

    if let Err(e) = qgate::run(&args) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
