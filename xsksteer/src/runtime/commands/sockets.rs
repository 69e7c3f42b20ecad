//! `register` / `unregister`: edit the pinned socket map from outside the loader.

use std::os::fd::RawFd;

use tracing::info;
use xsksteer_common::QueueIndex;

use crate::{
    error::Result,
    pidfd,
    runtime::{capabilities, conf::Conf},
    socket_map::SocketMap,
};

pub fn register(conf: &Conf, queue: QueueIndex, pid: i32, fd: RawFd) -> Result<()> {
    capabilities::check_required_capabilities(capabilities::REGISTER)?;

    let mut sockets = SocketMap::open_pinned(conf.socket_map.map_path())?;
    let socket = pidfd::duplicate_from(pid, fd)?;
    sockets.register(queue, &socket)?;

    info!(
        event.name = "cli.register.completed",
        queue.index = queue,
        process.pid = pid,
        socket.fd = fd,
        "frames on queue {queue} now go to fd {fd} of pid {pid}"
    );
    Ok(())
}

pub fn unregister(conf: &Conf, queue: QueueIndex) -> Result<()> {
    capabilities::check_required_capabilities(capabilities::MAP_ADMIN)?;

    let mut sockets = SocketMap::open_pinned(conf.socket_map.map_path())?;
    sockets.unregister(queue)?;

    info!(
        event.name = "cli.unregister.completed",
        queue.index = queue,
        "frames on queue {queue} now pass to the network stack"
    );
    Ok(())
}
