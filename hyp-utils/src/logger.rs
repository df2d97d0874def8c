// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `log` backend writing to the system console.

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::println;

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Installs the console logger, emitting records at `level` and above. Fails if a logger has
/// already been installed.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Logger that prefixes each record with its level and writes it through `println!`.
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} {}", format_level(record.level()), record.args());
        }
    }

    fn flush(&self) {}
}

fn format_level(level: Level) -> &'static str {
    match level {
        Level::Trace => "[TRACE]",
        Level::Debug => "[DEBUG]",
        Level::Info => "[INFO ]",
        Level::Warn => "[WARN ]",
        Level::Error => "[ERROR]",
    }
}
