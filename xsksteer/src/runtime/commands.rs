//! Command handlers for CLI subcommands
//!
//! This module provides a clean separation between CLI argument parsing
//! and command execution logic.

pub mod diagnose;
pub mod pins;
pub mod run;
pub mod sockets;

use crate::{
    error::Result,
    runtime::{cli::CliSubcommand, conf::Conf},
};

/// Execute a CLI subcommand
pub async fn execute(subcommand: &CliSubcommand, conf: &Conf) -> Result<()> {
    match *subcommand {
        CliSubcommand::Register { queue, pid, fd } => sockets::register(conf, queue, pid, fd),
        CliSubcommand::Unregister { queue } => sockets::unregister(conf, queue),
        CliSubcommand::Detach => pins::detach(conf),
        CliSubcommand::Unpin => pins::unpin(conf),
        CliSubcommand::Status => pins::status(conf),
        CliSubcommand::Diagnose => diagnose::execute(conf).await,
    }
}
