//! Logging configuration of the node.
use std::fmt;
use std::panic::PanicInfo;

use backtrace::Backtrace;
use serde::Deserialize;
use serde::Serialize;
use tracing::Level;

#[cfg(feature = "node")]
pub use self::node::init_logging;

#[cfg_attr(feature = "node", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            x => Err(crate::error::Error::InvalidLoggingLevel(x.to_string())),
        }
    }
}

/// A panic, rendered for the log: message, source position and backtrace.
pub struct PanicReport {
    message: String,
    position: Option<String>,
    backtrace: Backtrace,
}

impl PanicReport {
    /// Capture the report of `info`, with the current backtrace.
    pub fn capture(info: &PanicInfo<'_>) -> Self {
        let message = match info.payload().downcast_ref::<&str>() {
            Some(s) => s.to_string(),
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Box<dyn Any>".to_string(),
            },
        };
        Self {
            message,
            position: info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            backtrace: Backtrace::new(),
        }
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[panic] {}", self.message)?;
        if let Some(p) = &self.position {
            write!(f, " at {}", p)?;
        }
        write!(f, "\n{:?}", self.backtrace)
    }
}

/// Send panics to the log at the error level, instead of stderr only.
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("{}", PanicReport::capture(info));
    }));
}

/// Subscriber of the daemon.
#[cfg(feature = "node")]
pub mod node {
    use tracing_log::LogTracer;
    use tracing_subscriber::filter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;
    use tracing_subscriber::Registry;

    use super::*;

    /// Log to stderr at `level` and above. Only the first call installs anything.
    pub fn init_logging(level: LogLevel) {
        set_panic_hook();

        let stderr = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter::LevelFilter::from_level(level.into()));
        let subscriber = Registry::default().with(stderr);

        // records of crates logging through `log`
        let _ = LogTracer::init();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("WARN").unwrap(), LogLevel::Warn);
        assert!(LogLevel::from_str("loud").is_err());
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }
}
