//! User-space handle on the kernel queue-to-socket map.

use std::{
    io, mem,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    path::Path,
};

use aya::{
    Ebpf,
    maps::{Map, MapData, XskMap},
};
use tracing::{debug, info};
use xsksteer_common::{QueueIndex, SOCKET_MAP_NAME};

use crate::error::{Result, SteerError};

const BPF_MAP_DELETE_ELEM: libc::c_int = 3;

/// `bpf_attr` layout for the map element commands.
#[repr(C)]
#[derive(Clone, Copy)]
struct BpfMapElem {
    map_fd: u32,
    key: u64,
    value_or_next_key: u64,
    flags: u64,
}

/// Clears slot `key` of the map behind `map_fd`.
fn bpf_map_delete_elem(map_fd: BorrowedFd<'_>, key: u32) -> io::Result<()> {
    let attr = BpfMapElem {
        map_fd: map_fd.as_raw_fd() as u32,
        key: &key as *const u32 as u64,
        value_or_next_key: 0,
        flags: 0,
    };

    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_MAP_DELETE_ELEM,
            &attr as *const BpfMapElem as *const libc::c_void,
            mem::size_of::<BpfMapElem>(),
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Rejects queues the map has no slot for.
pub fn check_queue(queue: QueueIndex, capacity: u32) -> Result<()> {
    if queue >= capacity {
        return Err(SteerError::CapacityExceeded { queue, capacity });
    }
    Ok(())
}

/// Writes registrations into the `XSKMAP` the XDP program redirects through.
///
/// The kernel is the only record of what is registered: user space cannot read
/// `XSKMAP` slots back, so this handle keeps no state beyond the map itself.
pub struct SocketMap {
    map: XskMap<MapData>,
    // aya's XskMap has no delete, so removals go through this duplicate.
    map_fd: OwnedFd,
    capacity: u32,
}

impl SocketMap {
    /// Opens the map pinned at `path` by a running (or exited, persistent) loader.
    pub fn open_pinned(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SteerError::MapUnavailable(path.to_path_buf()));
        }

        let socket_map = Self::new(MapData::from_pin(path)?)?;
        debug!(
            event.name = "socket_map.opened",
            ebpf.map.pin_path = %path.display(),
            ebpf.map.capacity = socket_map.capacity,
            "opened pinned socket map"
        );
        Ok(socket_map)
    }

    /// Takes ownership of the socket map out of a loaded object.
    pub fn take_from(ebpf: &mut Ebpf) -> Result<Self> {
        match ebpf.take_map(SOCKET_MAP_NAME) {
            Some(Map::XskMap(data)) => Self::new(data),
            Some(_) => Err(SteerError::internal(format!(
                "ebpf map '{SOCKET_MAP_NAME}' is not an XSKMAP"
            ))),
            None => Err(SteerError::internal(format!(
                "ebpf map '{SOCKET_MAP_NAME}' not found in loaded object"
            ))),
        }
    }

    fn new(data: MapData) -> Result<Self> {
        let map_fd = data
            .fd()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| SteerError::io("failed to duplicate socket map fd", e))?;
        let map = XskMap::try_from(Map::XskMap(data))?;
        let capacity = map.len();
        Ok(Self {
            map,
            map_fd,
            capacity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Steers frames received on `queue` to `socket`, replacing any socket
    /// already registered for it.
    ///
    /// The kernel takes its own reference on the socket; `socket` may be
    /// closed afterwards.
    pub fn register(&mut self, queue: QueueIndex, socket: impl AsFd) -> Result<()> {
        check_queue(queue, self.capacity)?;

        let socket = socket.as_fd();
        self.map.set(queue, socket, 0)?;

        info!(
            event.name = "socket_map.registered",
            queue.index = queue,
            socket.fd = socket.as_raw_fd(),
            "registered AF_XDP socket for receive queue"
        );
        Ok(())
    }

    /// Clears the slot for `queue`; frames on it are passed to the stack again.
    ///
    /// The kernel accepts clearing an empty slot, so this succeeds whether or
    /// not a socket was registered.
    pub fn unregister(&mut self, queue: QueueIndex) -> Result<()> {
        check_queue(queue, self.capacity)?;

        bpf_map_delete_elem(self.map_fd.as_fd(), queue).map_err(|e| {
            SteerError::io(format!("failed to clear socket map slot {queue}"), e)
        })?;

        info!(
            event.name = "socket_map.unregistered",
            queue.index = queue,
            "cleared receive queue slot"
        );
        Ok(())
    }
}
