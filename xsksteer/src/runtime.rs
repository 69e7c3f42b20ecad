use std::{error::Error, fmt};

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{Layer, format::FmtSpan},
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::runtime::{
    cli::Cli,
    conf::{Conf, ConfError},
};

pub mod capabilities;
pub mod cli;
pub mod commands;
pub mod conf;

pub struct Runtime {
    pub cli: Cli,
    pub conf: Conf,
}

impl Runtime {
    pub fn new() -> Result<Self, RuntimeError> {
        let cli = Cli::parse();
        let (conf, cli) = Conf::new(cli)?;

        Ok(Runtime { cli, conf })
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise our own targets log at `level` and
/// everything else at `warn`, except kernel trace records forwarded by
/// `aya-log`, which follow `level` too. Records arriving through the `log`
/// facade are bridged in by the subscriber.
pub fn init_tracing(level: Level) {
    let mut fmt_layer = Layer::new()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    match level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn default_directives(level: Level) -> String {
    format!("warn,xsksteer={level},xsksteer_ebpf={level}")
}

#[derive(Debug)]
pub enum RuntimeError {
    Conf(ConfError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Conf(e) => e.fmt(f),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Conf(e) => Some(e),
        }
    }
}

impl From<ConfError> for RuntimeError {
    fn from(e: ConfError) -> Self {
        RuntimeError::Conf(e)
    }
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn default_directives_follow_level() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,xsksteer=DEBUG,xsksteer_ebpf=DEBUG"
        );
    }

    #[test]
    fn runtime_error_displays_conf_error() {
        let err = RuntimeError::from(ConfError::EmptyInterface);
        assert_eq!(err.to_string(), "interface must not be empty");
        assert!(err.source().is_some());
    }
}
