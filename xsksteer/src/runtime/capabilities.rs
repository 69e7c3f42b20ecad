//! Capability checking for required Linux capabilities.
//!
//! Loading and attaching needs CAP_BPF, CAP_NET_ADMIN, CAP_PERFMON and
//! CAP_SYS_RESOURCE (CAP_SYS_ADMIN on kernels older than 5.8). Registering a
//! socket owned by another process additionally needs CAP_SYS_PTRACE for
//! `pidfd_getfd`.

use std::fs;

use tracing::{debug, warn};

use crate::error::{Result, SteerError};

/// Linux capability constants from <linux/capability.h>
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    NetAdmin = 12,
    SysPtrace = 19,
    SysAdmin = 21,
    SysResource = 24,
    Perfmon = 38,
    Bpf = 39,
}

/// Needed to load the object, pin its map and attach to an interface.
pub const LOADER: &[Capability] = &[
    Capability::SysAdmin,
    Capability::NetAdmin,
    Capability::Bpf,
    Capability::Perfmon,
    Capability::SysResource,
];

/// Needed to take a socket from another process and write it into the pinned map.
pub const REGISTER: &[Capability] = &[Capability::Bpf, Capability::SysPtrace];

/// Needed to update or remove pinned objects.
pub const MAP_ADMIN: &[Capability] = &[Capability::Bpf];

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::NetAdmin => "CAP_NET_ADMIN",
            Capability::SysAdmin => "CAP_SYS_ADMIN",
            Capability::SysPtrace => "CAP_SYS_PTRACE",
            Capability::SysResource => "CAP_SYS_RESOURCE",
            Capability::Perfmon => "CAP_PERFMON",
            Capability::Bpf => "CAP_BPF",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Capability::NetAdmin => "attach XDP programs to network interfaces",
            Capability::SysAdmin => "load eBPF programs on kernels older than 5.8",
            Capability::SysPtrace => "duplicate AF_XDP sockets from other processes",
            Capability::SysResource => "modify resource limits (e.g., memlock rlimit)",
            Capability::Perfmon => "performance monitoring (eBPF program loading on kernel >= 5.8)",
            Capability::Bpf => "load eBPF programs and update pinned maps",
        }
    }

    /// CAP_BPF and CAP_PERFMON were split out of CAP_SYS_ADMIN in 5.8.
    fn has_sys_admin_fallback(&self) -> bool {
        matches!(self, Capability::Perfmon | Capability::Bpf)
    }
}

/// Extracts the effective capability mask from the contents of `/proc/<pid>/status`.
fn effective_mask(status: &str) -> Result<u64> {
    let caps_hex = status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .map(str::trim)
        .ok_or_else(|| SteerError::internal("CapEff line not found in /proc/self/status"))?;

    u64::from_str_radix(caps_hex, 16).map_err(|e| {
        SteerError::internal(format!("failed to parse capability mask '{caps_hex}': {e}"))
    })
}

fn mask_has(mask: u64, cap: Capability) -> bool {
    mask & (1u64 << (cap as u32)) != 0
}

/// Check if the process has a specific capability.
/// Reads from /proc/self/status CapEff (effective capabilities).
pub fn has_capability(cap: Capability) -> Result<bool> {
    let status = fs::read_to_string("/proc/self/status")
        .map_err(|e| SteerError::io("failed to read /proc/self/status", e))?;
    Ok(mask_has(effective_mask(&status)?, cap))
}

/// Check the given capabilities.
/// Returns a detailed error if any of them is missing.
pub fn check_required_capabilities(required: &[Capability]) -> Result<()> {
    let mut missing_caps = Vec::new();

    for cap in required {
        debug!(
            event.name = "capabilities.checking",
            capability = cap.name(),
            "checking for required capability"
        );

        match has_capability(*cap) {
            Ok(true) => {
                debug!(
                    event.name = "capabilities.present",
                    capability = cap.name(),
                    "capability is present"
                );
            }
            Ok(false) if cap.has_sys_admin_fallback() => {
                warn!(
                    event.name = "capabilities.missing_fallback",
                    capability = cap.name(),
                    description = cap.description(),
                    "capability not found, but may work on older kernels with CAP_SYS_ADMIN"
                );
            }
            Ok(false) => missing_caps.push(*cap),
            Err(e) => {
                // Operations that really need the capability fail with their own error.
                warn!(
                    event.name = "capabilities.check_failed",
                    capability = cap.name(),
                    error = %e,
                    "failed to check capability, assuming present"
                );
            }
        }
    }

    if !missing_caps.is_empty() {
        return Err(SteerError::internal(missing_message(&missing_caps)));
    }

    Ok(())
}

fn missing_message(missing_caps: &[Capability]) -> String {
    let mut error_msg = String::from("Missing required capabilities:\n\n");
    for cap in missing_caps {
        error_msg.push_str(&format!(
            "  ❌ {} - required to {}\n",
            cap.name(),
            cap.description()
        ));
    }
    error_msg.push_str("\n💡 Solutions:\n");
    error_msg.push_str("  1. Run as root: sudo xsksteer\n");
    error_msg.push_str("  2. Grant file capabilities: setcap cap_bpf,cap_net_admin,cap_perfmon,cap_sys_resource+ep xsksteer\n");
    error_msg.push_str("  3. In Docker: use --privileged flag\n");
    error_msg
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\txsksteer\nCapInh:\t0000000000000000\nCapPrm:\t000001ffffffffff\nCapEff:\t0000000000003000\nCapBnd:\t000001ffffffffff\n";

    #[test]
    #[ignore] // Only works when running with appropriate capabilities
    fn test_check_capabilities() {
        let result = check_required_capabilities(LOADER);
        let _ = result;
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::NetAdmin.name(), "CAP_NET_ADMIN");
        assert_eq!(Capability::SysPtrace.name(), "CAP_SYS_PTRACE");
        assert_eq!(Capability::Bpf.name(), "CAP_BPF");
    }

    #[test]
    fn parses_effective_mask() {
        let mask = effective_mask(STATUS).unwrap();
        assert_eq!(mask, 0x3000);
        assert!(mask_has(mask, Capability::NetAdmin));
        assert!(!mask_has(mask, Capability::Bpf));
        assert!(!mask_has(mask, Capability::SysPtrace));
    }

    #[test]
    fn missing_cap_eff_line_is_an_error() {
        let err = effective_mask("Name:\txsksteer\n").unwrap_err();
        assert!(err.to_string().contains("CapEff line not found"));
    }

    #[test]
    fn malformed_mask_is_an_error() {
        let err = effective_mask("CapEff:\tzzzz\n").unwrap_err();
        assert!(err.to_string().contains("failed to parse capability mask 'zzzz'"));
    }

    #[test]
    fn register_requires_ptrace() {
        assert!(REGISTER.contains(&Capability::SysPtrace));
        assert!(!LOADER.contains(&Capability::SysPtrace));
    }

    #[test]
    fn missing_message_lists_each_capability() {
        let msg = missing_message(&[Capability::NetAdmin, Capability::SysPtrace]);
        assert!(msg.contains("CAP_NET_ADMIN - required to attach XDP programs"));
        assert!(msg.contains("CAP_SYS_PTRACE - required to duplicate AF_XDP sockets"));
    }
}
