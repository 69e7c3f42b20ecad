//! Loading, attaching and detaching the XDP steering program.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use aya::{
    Ebpf, EbpfLoader,
    programs::{
        Xdp, XdpFlags,
        links::{FdLink, PinnedLink},
        xdp::XdpLinkId,
    },
};
use pnet::datalink;
use tracing::{debug, info, warn};
use xsksteer_common::{PROGRAM_NAME, SOCKET_MAP_NAME, TRACE_ENABLED_GLOBAL};

use crate::{
    error::{Result, SteerError},
    runtime::conf::{AttachMode, Conf},
    socket_map::SocketMap,
};

pub fn xdp_flags(mode: AttachMode) -> XdpFlags {
    match mode {
        AttachMode::Default => XdpFlags::default(),
        AttachMode::Skb => XdpFlags::SKB_MODE,
        AttachMode::Driver => XdpFlags::DRV_MODE,
        AttachMode::Hardware => XdpFlags::HW_MODE,
    }
}

/// Bump the memlock rlimit. This is needed for older kernels that don't use the
/// new memcg based accounting, see https://lwn.net/Articles/837122/
pub fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!(
            event.name = "system.rlimit_failed",
            system.rlimit.type = "memlock",
            error.code = ret,
            "failed to remove limit on locked memory"
        );
    } else {
        debug!(
            event.name = "system.rlimit_set",
            system.rlimit.type = "memlock",
            "memlock rlimit removed"
        );
    }
}

/// Fails unless `name` is a network interface in the current namespace.
pub fn ensure_interface(name: &str) -> Result<()> {
    if datalink::interfaces().iter().any(|iface| iface.name == name) {
        Ok(())
    } else {
        Err(SteerError::InterfaceNotFound(name.to_string()))
    }
}

/// How the program ended up attached.
enum Attachment {
    Owned(XdpLinkId),
    Pinned(PathBuf),
}

/// The loaded eBPF object and its attachment to one interface.
pub struct SteeringProgram {
    ebpf: Ebpf,
    interface: String,
    attachment: Option<Attachment>,
}

impl SteeringProgram {
    /// Loads the object at `conf.program.object_path`.
    ///
    /// The socket map is sized to `conf.socket_map.capacity` and pinned under
    /// `conf.socket_map.pin_path`; a map already pinned there is reused along
    /// with its registrations.
    pub fn load(conf: &Conf) -> Result<Self> {
        let pin_dir = &conf.socket_map.pin_path;
        fs::create_dir_all(pin_dir).map_err(|e| {
            SteerError::io(
                format!("failed to create pin directory {}", pin_dir.display()),
                e,
            )
        })?;

        let trace_enabled = u8::from(conf.trace.enabled);
        let ebpf = EbpfLoader::new()
            .map_pin_path(pin_dir)
            .set_max_entries(SOCKET_MAP_NAME, conf.socket_map.capacity)
            .set_global(TRACE_ENABLED_GLOBAL, &trace_enabled, true)
            .load_file(&conf.program.object_path)?;

        info!(
            event.name = "ebpf.loaded",
            ebpf.object.path = %conf.program.object_path.display(),
            ebpf.map.pin_path = %conf.socket_map.map_path().display(),
            ebpf.map.capacity = conf.socket_map.capacity,
            trace.enabled = conf.trace.enabled,
            "eBPF object loaded"
        );

        Ok(Self {
            ebpf,
            interface: conf.interface.clone(),
            attachment: None,
        })
    }

    /// Forwards kernel log records into the `log` facade.
    pub fn init_logger(&mut self) {
        if let Err(e) = aya_log::EbpfLogger::init(&mut self.ebpf) {
            // No log statements survived in the object, or tracing was compiled out.
            warn!(
                event.name = "ebpf_log.init_failed",
                error.message = %e,
                "failed to initialize eBPF logger"
            );
        }
    }

    fn program_mut(&mut self) -> Result<&mut Xdp> {
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| {
                SteerError::internal(format!(
                    "ebpf program '{PROGRAM_NAME}' not found in loaded object"
                ))
            })?
            .try_into()?;
        Ok(program)
    }

    /// Verifies and attaches the program, pinning the link when
    /// `conf.program.pin_link` is set.
    pub fn attach(&mut self, conf: &Conf) -> Result<()> {
        ensure_interface(&self.interface)?;
        let interface = self.interface.clone();
        let program = self.program_mut()?;
        program.load()?;
        let link_id = program.attach(&interface, xdp_flags(conf.attach_mode))?;

        info!(
            event.name = "xdp.attached",
            network.interface.name = %interface,
            xdp.attach_mode = conf.attach_mode.as_str(),
            "XDP program attached"
        );

        if !conf.program.pin_link {
            self.attachment = Some(Attachment::Owned(link_id));
            return Ok(());
        }

        let pin_path = conf.link_pin_path();
        let link = program.take_link(link_id)?;
        let fd_link = FdLink::try_from(link)?;
        // Dropping the handle closes our fd; the pin keeps the link alive.
        fd_link
            .pin(&pin_path)
            .map_err(|e| SteerError::pin(&pin_path, e))?;

        info!(
            event.name = "xdp.link_pinned",
            network.interface.name = %interface,
            ebpf.link.pin_path = %pin_path.display(),
            "XDP link pinned, program stays attached after exit"
        );
        self.attachment = Some(Attachment::Pinned(pin_path));
        Ok(())
    }

    pub fn take_socket_map(&mut self) -> Result<SocketMap> {
        SocketMap::take_from(&mut self.ebpf)
    }

    /// Detaches an owned link. A pinned link is left in place.
    pub fn detach(mut self) -> Result<()> {
        let interface = self.interface.clone();
        match self.attachment.take() {
            Some(Attachment::Owned(link_id)) => {
                self.program_mut()?.detach(link_id)?;
                info!(
                    event.name = "xdp.detached",
                    network.interface.name = %interface,
                    "XDP program detached"
                );
            }
            Some(Attachment::Pinned(path)) => {
                info!(
                    event.name = "xdp.left_attached",
                    network.interface.name = %interface,
                    ebpf.link.pin_path = %path.display(),
                    "leaving pinned XDP link attached"
                );
            }
            None => {}
        }
        Ok(())
    }
}

/// Detaches the program behind the link pinned at `path`.
///
/// Returns `false` when nothing is pinned there.
pub fn detach_pinned(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let pinned = PinnedLink::from_pin(path)?;
    // The returned FdLink is the last reference; dropping it detaches.
    let fd_link = pinned.unpin().map_err(|e| {
        SteerError::io(format!("failed to unpin link {}", path.display()), e)
    })?;
    drop(fd_link);

    info!(
        event.name = "xdp.detached",
        ebpf.link.pin_path = %path.display(),
        "detached XDP program from pinned link"
    );
    Ok(true)
}

/// Removes the socket map pin at `path`. The map itself lives on while a
/// loaded program still references it.
///
/// Returns `false` when nothing is pinned there.
pub fn unpin_map(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(
                event.name = "socket_map.unpinned",
                ebpf.map.pin_path = %path.display(),
                "removed socket map pin"
            );
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SteerError::io(
            format!("failed to remove pin {}", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_modes_map_to_xdp_flags() {
        assert_eq!(xdp_flags(AttachMode::Default).bits(), 0);
        assert_eq!(
            xdp_flags(AttachMode::Skb).bits(),
            XdpFlags::SKB_MODE.bits()
        );
        assert_eq!(
            xdp_flags(AttachMode::Driver).bits(),
            XdpFlags::DRV_MODE.bits()
        );
        assert_eq!(xdp_flags(AttachMode::Hardware).bits(), XdpFlags::HW_MODE.bits());
        assert_ne!(XdpFlags::SKB_MODE.bits(), XdpFlags::DRV_MODE.bits());
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let err = ensure_interface("xsksteer-no-such-if0").expect_err("interface must not exist");
        assert_eq!(err.to_string(), "interface 'xsksteer-no-such-if0' not found");
    }

    #[test]
    fn unpin_of_missing_map_is_not_an_error() {
        let path = std::env::temp_dir().join("xsksteer-missing-map-pin");
        assert!(!unpin_map(&path).unwrap());
    }

    #[test]
    fn unpin_removes_existing_pin_file() {
        let path = std::env::temp_dir().join(format!("xsksteer-pin-{}", std::process::id()));
        fs::write(&path, b"").unwrap();
        assert!(unpin_map(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn detach_of_missing_link_is_not_an_error() {
        let path = std::env::temp_dir().join("xsksteer-missing-link-pin");
        assert!(!detach_pinned(&path).unwrap());
    }
}
