use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

#[derive(Parser, Debug, Serialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "config.yaml").
    #[arg(short, long, value_name = "FILE", env = "XSKSTEER_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(short, long, value_name = "LEVEL", env = "XSKSTEER_LOG_LEVEL")]
    #[serde(
        serialize_with = "level::serialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,

    /// Network interface the XDP program is attached to (e.g., "eth0").
    #[arg(short, long, value_name = "IFACE", env = "XSKSTEER_INTERFACE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<CliSubcommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliSubcommand {
    /// Register an AF_XDP socket owned by another process for a receive queue.
    Register {
        /// Receive queue whose frames are steered to the socket.
        #[arg(short, long)]
        queue: u32,
        /// Process that owns the socket.
        #[arg(long)]
        pid: i32,
        /// Socket file descriptor number inside that process.
        #[arg(long)]
        fd: i32,
    },
    /// Remove the socket registered for a receive queue.
    Unregister {
        #[arg(short, long)]
        queue: u32,
    },
    /// Detach a program left attached through a pinned link.
    Detach,
    /// Remove the pinned socket map.
    Unpin,
    /// Show the state of pinned objects.
    Status,
    /// Check capabilities, bpffs and an attach/detach round trip on the interface.
    Diagnose,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser as _;
    use figment::Jail;
    use tracing::Level;

    use super::{Cli, CliSubcommand};

    #[test]
    fn parses_long_flags() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("XSKSTEER_CONFIG_PATH", "/tmp/xsksteer.yaml");
            jail.set_env("XSKSTEER_LOG_LEVEL", "debug");

            let args = [
                "xsksteer",
                "--config",
                "/path/to/conf.yaml",
                "--log-level",
                "warn",
                "--interface",
                "enp1s0",
            ];
            let cli = Cli::parse_from(args);
            assert_eq!(cli.config, Some(PathBuf::from("/path/to/conf.yaml")));
            assert_eq!(cli.log_level, Some(Level::WARN));
            assert_eq!(cli.interface.as_deref(), Some("enp1s0"));
            assert_eq!(cli.command, None);

            Ok(())
        });
    }

    #[test]
    fn parses_from_env_when_no_args() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("XSKSTEER_CONFIG_PATH", "/tmp/xsksteer.yaml");
            jail.set_env("XSKSTEER_LOG_LEVEL", "debug");
            jail.set_env("XSKSTEER_INTERFACE", "eth1");

            let cli = Cli::parse_from(["xsksteer"]);
            assert_eq!(cli.config, Some(PathBuf::from("/tmp/xsksteer.yaml")));
            assert_eq!(cli.log_level, Some(Level::DEBUG));
            assert_eq!(cli.interface.as_deref(), Some("eth1"));

            Ok(())
        });
    }

    #[test]
    fn log_level_is_unset_without_flag_or_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let cli = Cli::parse_from(["xsksteer"]);
            assert_eq!(cli.log_level, None);

            Ok(())
        });
    }

    #[test]
    fn parses_register_subcommand() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let cli = Cli::parse_from([
                "xsksteer", "register", "--queue", "3", "--pid", "4242", "--fd", "7",
            ]);
            assert_eq!(
                cli.command,
                Some(CliSubcommand::Register {
                    queue: 3,
                    pid: 4242,
                    fd: 7
                })
            );

            Ok(())
        });
    }

    #[test]
    fn global_flags_precede_subcommand() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let cli = Cli::parse_from(["xsksteer", "-i", "eth2", "unregister", "-q", "9"]);
            assert_eq!(cli.interface.as_deref(), Some("eth2"));
            assert_eq!(cli.command, Some(CliSubcommand::Unregister { queue: 9 }));

            Ok(())
        });
    }
}
