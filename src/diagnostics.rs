//! Diagnostic messages emitted while encoding or decoding.
//!
//! Each [`Encoder`](crate::Encoder) and [`OpbReader`](crate::OpbReader)
//! carries its own optional log sink.
//! Logging is best effort: a sink cannot fail the operation.

use core::fmt;

pub use log::Level;

/// A destination for diagnostic messages
pub trait LogSink {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);
}

/// Any function taking a level and a message is a log sink
impl<F> LogSink for F
where
    F: Fn(Level, &str),
{
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self(level, s),
            None => self(level, &args.to_string()),
        }
    }
}

/// A log sink forwarding every message to the [`log`] crate.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogFacade;

impl LogSink for LogFacade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "opbcodec", level, "{}", args);
    }
}

/// The optional log sink of an encoder or decoder
#[derive(Default)]
pub(crate) struct Logger<'a> {
    sink: Option<Box<dyn LogSink + 'a>>,
}

impl<'a> Logger<'a> {
    pub fn new(sink: impl LogSink + 'a) -> Self {
        Logger {
            sink: Some(Box::new(sink)),
        }
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            sink.log(level, args);
        }
    }

    /// Whether a sink is attached
    pub fn enabled(&self) -> bool {
        self.sink.is_some()
    }
}

impl fmt::Debug for Logger<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}

macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::diagnostics::Level::Error, format_args!($($arg)+))
    };
}

macro_rules! warning {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::diagnostics::Level::Warn, format_args!($($arg)+))
    };
}

macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::diagnostics::Level::Info, format_args!($($arg)+))
    };
}

macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::diagnostics::Level::Debug, format_args!($($arg)+))
    };
}

macro_rules! trace {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::diagnostics::Level::Trace, format_args!($($arg)+))
    };
}

pub(crate) use {debug, error, info, trace, warning};
