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

use log::{Level, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str;
use std::sync::{Mutex, OnceLock};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub struct SimpleLogger {
    local_offset: Option<UtcOffset>,
    output_file: Option<Mutex<File>>,
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

// Formats a line without the trailing newline.
fn format_line(
    out: &mut dyn Write,
    now: OffsetDateTime,
    record: &Record,
) -> Result<(), io::Error> {
    let format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

    let mut ts = [0u8; 64];

    let size = {
        let mut ts = io::Cursor::new(&mut ts[..]);

        now.format_into(&mut ts, &format)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        ts.position() as usize
    };

    let ts = str::from_utf8(&ts[..size]).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let lname = level_name(record.level());

    if record.level() <= Level::Info {
        write!(out, "[{}] {} {}", lname, ts, record.args())
    } else {
        write!(
            out,
            "[{}] {} [{}] {}",
            lname,
            ts,
            record.target(),
            record.args()
        )
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = OffsetDateTime::now_utc().to_offset(self.local_offset.unwrap_or(UtcOffset::UTC));

        // a whole line is written at once so lines never interleave
        let mut line = Vec::with_capacity(256);

        if format_line(&mut line, now, record).is_err() {
            return;
        }

        line.push(b'\n');

        // nowhere to report a failed log write
        let _ = match &self.output_file {
            Some(f) => match f.lock() {
                Ok(mut f) => f.write_all(&line),
                Err(_) => return,
            },
            None => io::stdout().lock().write_all(&line),
        };
    }

    fn flush(&self) {
        if let Some(f) = &self.output_file {
            if let Ok(mut f) = f.lock() {
                let _ = f.flush();
            }
        }
    }
}

// SAFETY: this method is unsound on platforms where another thread may
// modify environment vars
unsafe fn get_offset() -> Option<UtcOffset> {
    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound);

    let offset = UtcOffset::current_local_offset().ok();

    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Sound);

    offset
}

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

fn new_logger(output_file: Option<File>) -> SimpleLogger {
    // SAFETY: called once at startup, before any other threads exist
    let local_offset = unsafe { get_offset() };

    SimpleLogger {
        local_offset,
        output_file: output_file.map(Mutex::new),
    }
}

// Has no effect if the logger was already initialized.
pub fn ensure_init_simple_logger(output_file: Option<File>) {
    LOGGER.get_or_init(|| new_logger(output_file));
}

pub fn get_simple_logger() -> &'static SimpleLogger {
    LOGGER.get_or_init(|| new_logger(None))
}

pub fn local_offset_check() {
    if get_simple_logger().local_offset.is_none() {
        log::warn!("failed to determine local time offset, log timestamps will be in UTC");
    }
}

pub fn open_log_file(path: &Path) -> Result<File, io::Error> {
    OpenOptions::new().create(true).append(true).open(path)
}
