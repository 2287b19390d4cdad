// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Logging boilerplate shared by all crates in this workspace:
//! a global `slog` logger behind `lazy_static`, an asynchronous drain,
//! `RUST_LOG` filtering and macros operating on the global instance.
//!
//! The global logger is created the first time it is accessed and cannot be
//! re-configured afterwards; call `setup()` or `setup_for_app()` before any
//! logging happens. Without an explicit setup the logger falls back to
//! `LoggingConfig::for_testing()` so that test runs don't pollute the
//! terminal (the test harness has no common setup hook to do this in).

use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::mem;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};

use lazy_static::lazy_static;
use slog::{o, Discard, Drain, Logger};
use slog_async::{Async, AsyncGuard};
use slog_envlogger::EnvLogger;

// Re-export slog so that all crates share one slog dependency and the
// macros below can refer to it.
pub use slog;
pub use slog::Level;

/// Where the global logger writes
#[derive(Clone, Debug)]
pub enum LoggingTarget {
    Stderr,
    Stdout,
    File(PathBuf),
    /// Discard everything
    None,
}

/// Configuration the global logger is built from
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub target: LoggingTarget,
    /// Default level, overridable with the `RUST_LOG` env variable
    pub level: Level,
    /// Channel size of the asynchronous drain; bigger channels don't drop
    /// records during logging bursts
    pub drain_channel_size: usize,
}

impl LoggingConfig {
    pub const ASYNC_LOGGER_DRAIN_CHANNEL_SIZE: usize = 128;

    /// Configuration for test runs, logs into a file in the system tmp
    /// location
    pub fn for_testing() -> Self {
        Self {
            target: LoggingTarget::File(env::temp_dir().join("test-log.txt")),
            level: Level::Trace,
            drain_channel_size: Self::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE,
        }
    }

    /// Configuration for standalone programs, `Debug` level in debug builds
    /// and `Info` in release builds
    pub fn for_app(drain_channel_size: usize) -> Self {
        Self {
            target: LoggingTarget::Stderr,
            level: if cfg!(debug_assertions) {
                Level::Debug
            } else {
                Level::Info
            },
            drain_channel_size,
        }
    }

    pub fn no_logging() -> Self {
        Self {
            target: LoggingTarget::None,
            level: Level::Error,
            drain_channel_size: Self::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_testing()
    }
}

#[inline(always)]
fn lock_logger_config() -> MutexGuard<'static, Option<LoggingConfig>> {
    LOGGER_CONFIG
        .lock()
        .expect("BUG: Could not lock logger config mutex")
}

/// Set the configuration the global logger will be built from.
///
/// # Panics
///
/// Panics if `LOGGER` is already instantiated, ie. its configuration
/// can no longer be changed.
pub fn set_logger_config(config: LoggingConfig) -> LoggingConfig {
    lock_logger_config()
        .replace(config)
        .expect("BUG: Could not set logger config, LOGGER already instantiated")
}

/// Set the configuration and force-instantiate the global logger,
/// returning its `FlushGuard`. Convenience function.
pub fn setup(config: LoggingConfig) -> FlushGuard {
    set_logger_config(config);
    LOGGER.take_guard()
}

/// Setup suitable for `main()`: stderr target, level based on build kind.
pub fn setup_for_app(drain_channel_size: usize) -> FlushGuard {
    setup(LoggingConfig::for_app(drain_channel_size))
}

/// Logging setup for integration tests. Safe to call from multiple tests
/// running in parallel, only the first call performs the setup.
pub fn init_test_logging() -> Option<FlushGuard> {
    static INITIALIZED: AtomicBool = AtomicBool::new(false);

    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        Some(setup(LoggingConfig::default()))
    } else {
        None
    }
}

/// Level name in the format the env-logger filter parser understands
fn level_filter_str(level: Level) -> &'static str {
    match level {
        Level::Critical | Level::Error => "error",
        Level::Warning => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

/// Wrap a drain in an `RUST_LOG`-driven filter; `default_level` applies
/// when the variable is unset or empty
fn build_envlogger<D: Drain>(drain: D, default_level: Level) -> EnvLogger<D> {
    let builder = slog_envlogger::LogBuilder::new(drain);
    let builder = match env::var("RUST_LOG") {
        Ok(ref rust_log) if !rust_log.is_empty() => builder.parse(rust_log),
        _ => builder.parse(level_filter_str(default_level)),
    };
    builder.build()
}

fn terminal_drain(stderr: bool) -> impl Drain<Ok = (), Err = impl fmt::Debug> {
    let decorator = slog_term::TermDecorator::new();
    let decorator = if stderr {
        decorator.stderr()
    } else {
        decorator.stdout()
    };
    slog_term::FullFormat::new(decorator.build()).build()
}

fn file_drain(path: &Path) -> impl Drain<Ok = (), Err = impl fmt::Debug> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap_or_else(|e| {
            panic!(
                "Logging setup error: Could not open file `{}` for logging: {}",
                path.display(),
                e
            )
        });

    slog_term::FullFormat::new(slog_term::PlainDecorator::new(file)).build()
}

/// Logger flush RAII guard.
///
/// `slog_async` cannot flush on application exit by itself; keep the guard
/// alive for the lifetime of the program and records get flushed when it
/// drops.
#[must_use = "When dropped, FlushGuard flushes and stops its associated logger instance"]
pub struct FlushGuard(Option<AsyncGuard>);

/// The global `Logger` bundled with the `FlushGuard` of its asynchronous
/// drain. The guard can be taken out exactly once, typically in `main()`.
pub struct GuardedLogger {
    pub logger: Logger,
    guard: Mutex<FlushGuard>,
}

impl GuardedLogger {
    fn new(config: &LoggingConfig) -> Self {
        use LoggingTarget::*;

        match &config.target {
            None => Self::with_discard(),
            Stderr => Self::with_drain(config, terminal_drain(true)),
            Stdout => Self::with_drain(config, terminal_drain(false)),
            File(path) => Self::with_drain(config, file_drain(path)),
        }
    }

    fn with_drain<D, E>(config: &LoggingConfig, drain: D) -> Self
    where
        D: Drain<Ok = (), Err = E> + Send + 'static,
        E: fmt::Debug,
    {
        let drain = build_envlogger(drain, config.level);
        let (drain, guard) = Async::new(drain.fuse())
            .chan_size(config.drain_channel_size)
            .build_with_guard();
        Self {
            logger: Logger::root(drain.fuse(), o!()),
            guard: Mutex::new(FlushGuard(Some(guard))),
        }
    }

    fn with_discard() -> Self {
        Self {
            logger: Logger::root(Discard, o!()),
            guard: Mutex::new(FlushGuard(None)),
        }
    }

    /// Take the `FlushGuard`; subsequent calls return an empty guard.
    pub fn take_guard(&self) -> FlushGuard {
        let mut locked = self
            .guard
            .lock()
            .expect("BUG: Could not lock GuardedLogger mutex");
        mem::replace(&mut *locked, FlushGuard(None))
    }

    /// Flush immediately by dropping the guard. No effect if the guard has
    /// been taken before.
    pub fn flush(&self) {
        drop(self.take_guard());
    }
}

impl Deref for GuardedLogger {
    type Target = Logger;

    fn deref(&self) -> &Logger {
        &self.logger
    }
}

lazy_static! {
    static ref LOGGER_CONFIG: Mutex<Option<LoggingConfig>> =
        Mutex::new(Some(LoggingConfig::default()));

    /// The global logger instance
    pub static ref LOGGER: GuardedLogger = {
        let mut config_lock = lock_logger_config();
        let config = config_lock
            .take()
            .expect("BUG: LOGGER_CONFIG empty in LOGGER initialization");

        GuardedLogger::new(&config)
    };
}

/// Log critical level record in the global logger
#[macro_export]
macro_rules! crit(
    ($($args:tt)+) => { $crate::slog::crit!(&$crate::LOGGER.logger, $($args)+) };
);

/// Log error level record in the global logger
#[macro_export]
macro_rules! error(
    ($($args:tt)+) => { $crate::slog::error!(&$crate::LOGGER.logger, $($args)+) };
);

/// Log warning level record in the global logger
#[macro_export]
macro_rules! warn(
    ($($args:tt)+) => { $crate::slog::warn!(&$crate::LOGGER.logger, $($args)+) };
);

/// Log info level record in the global logger
#[macro_export]
macro_rules! info(
    ($($args:tt)+) => { $crate::slog::info!(&$crate::LOGGER.logger, $($args)+) };
);

/// Log debug level record in the global logger
#[macro_export]
macro_rules! debug(
    ($($args:tt)+) => { $crate::slog::debug!(&$crate::LOGGER.logger, $($args)+) };
);

/// Log trace level record in the global logger
#[macro_export]
macro_rules! trace(
    ($($args:tt)+) => { $crate::slog::trace!(&$crate::LOGGER.logger, $($args)+) };
);

/// All logging macros re-exported for easy inclusion in user code.
/// Usage: `use ii_logging::macros::*;`
pub mod macros {
    pub use super::{crit, debug, error, info, trace, warn};
}
