//! User-space side of xsksteer: loading and attaching the XDP program that
//! steers frames to AF_XDP sockets per receive queue, and managing the
//! queue-to-socket map it redirects through.
//!
//! Processes that own AF_XDP sockets can embed [`socket_map::SocketMap`] to
//! register them directly instead of going through the `xsksteer register`
//! command.

pub mod error;
pub mod pidfd;
pub mod program;
pub mod runtime;
pub mod socket_map;
pub mod table;

pub use error::{Result, SteerError};
pub use xsksteer_common as common;
