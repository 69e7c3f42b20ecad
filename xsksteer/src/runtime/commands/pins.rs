//! Commands operating on objects left in the BPF filesystem.

use std::path::Path;

use tracing::{info, warn};

use crate::{
    error::Result,
    program,
    runtime::{capabilities, conf::Conf},
    socket_map::SocketMap,
};

pub fn detach(conf: &Conf) -> Result<()> {
    capabilities::check_required_capabilities(&[
        capabilities::Capability::Bpf,
        capabilities::Capability::NetAdmin,
    ])?;

    let path = conf.link_pin_path();
    if !program::detach_pinned(&path)? {
        warn!(
            event.name = "cli.detach.no_link",
            ebpf.link.pin_path = %path.display(),
            "no pinned link found, nothing to detach"
        );
    }
    Ok(())
}

pub fn unpin(conf: &Conf) -> Result<()> {
    capabilities::check_required_capabilities(capabilities::MAP_ADMIN)?;

    let path = conf.socket_map.map_path();
    if !program::unpin_map(&path)? {
        warn!(
            event.name = "cli.unpin.no_map",
            ebpf.map.pin_path = %path.display(),
            "no pinned socket map found"
        );
    }
    Ok(())
}

struct Status {
    map_capacity: Option<u32>,
    link_pinned: bool,
}

pub fn status(conf: &Conf) -> Result<()> {
    let map_path = conf.socket_map.map_path();
    let link_path = conf.link_pin_path();

    let map_capacity = if map_path.exists() {
        Some(SocketMap::open_pinned(&map_path)?.capacity())
    } else {
        None
    };
    let status = Status {
        map_capacity,
        link_pinned: link_path.exists(),
    };

    info!(
        event.name = "cli.status",
        ebpf.map.pinned = status.map_capacity.is_some(),
        ebpf.link.pinned = status.link_pinned,
        "collected pinned object status"
    );
    print!("{}", render_status(conf, &map_path, &link_path, &status));
    Ok(())
}

fn render_status(conf: &Conf, map_path: &Path, link_path: &Path, status: &Status) -> String {
    let mut out = String::new();
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out.push_str("xsksteer status\n");
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out.push_str(&format!("Interface:     {}\n", conf.interface));
    out.push_str(&format!("Socket map:    {}\n", map_path.display()));
    match status.map_capacity {
        Some(capacity) => out.push_str(&format!("  Pinned:      ✓ yes ({capacity} queues)\n")),
        None => out.push_str("  Pinned:      ✗ no\n"),
    }
    out.push_str(&format!("XDP link:      {}\n", link_path.display()));
    if status.link_pinned {
        out.push_str("  Pinned:      ✓ yes (program stays attached)\n");
    } else {
        out.push_str("  Pinned:      ✗ no\n");
    }
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pinned_map_and_missing_link() {
        let conf = Conf::default();
        let out = render_status(
            &conf,
            &conf.socket_map.map_path(),
            &conf.link_pin_path(),
            &Status {
                map_capacity: Some(64),
                link_pinned: false,
            },
        );
        assert!(out.contains("Socket map:    /sys/fs/bpf/xsksteer/socket_map\n  Pinned:      ✓ yes (64 queues)"));
        assert!(out.contains("XDP link:      /sys/fs/bpf/xsksteer/link_eth0\n  Pinned:      ✗ no"));
    }

    #[test]
    fn status_without_pins_reports_nothing_pinned() {
        let mut conf = Conf::default();
        conf.socket_map.pin_path = std::env::temp_dir().join("xsksteer-status-empty");
        assert!(status(&conf).is_ok());
    }
}
