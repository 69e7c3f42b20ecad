//! BPF diagnostic command
//!
//! Tests capabilities, BPF filesystem writeability, program verification and an
//! attach/pin/detach round trip on the configured interface. Everything is
//! pinned in a scratch directory so a running loader is left alone.

use std::{fs, path::Path};

use aya::{
    Ebpf, EbpfLoader,
    programs::{
        Xdp,
        links::{FdLink, PinnedLink},
    },
    util::KernelVersion,
};
use tracing::{error, info, warn};
use xsksteer_common::{PROGRAM_NAME, SOCKET_MAP_NAME, TRACE_ENABLED_GLOBAL};

use crate::{
    error::{Result, SteerError},
    program,
    runtime::{
        capabilities,
        conf::{AttachMode, Conf},
    },
};

const SCRATCH_DIR: &str = "diagnose";

struct DiagnoseResult {
    interface: String,
    attach_mode: AttachMode,
    capabilities_ok: bool,
    bpf_fs_writable: bool,
    program_loaded: bool,
    attach_success: bool,
    pin_success: Option<bool>,
    detach_success: bool,
}

impl DiagnoseResult {
    fn overall_status(&self) -> bool {
        self.program_loaded && self.attach_success && self.detach_success
    }
}

/// Execute the BPF diagnostic command
pub async fn execute(conf: &Conf) -> Result<()> {
    let interface = conf.interface.as_str();
    info!(
        event.name = "diagnose.started",
        network.interface.name = %interface,
        "starting BPF filesystem and attach/detach tests"
    );

    let mut result = DiagnoseResult {
        interface: interface.to_string(),
        attach_mode: conf.attach_mode,
        capabilities_ok: false,
        bpf_fs_writable: false,
        program_loaded: false,
        attach_success: false,
        pin_success: None,
        detach_success: false,
    };

    info!(
        event.name = "diagnose.checking_capabilities",
        "checking required capabilities"
    );
    match capabilities::check_required_capabilities(capabilities::LOADER) {
        Ok(()) => {
            result.capabilities_ok = true;
            info!(
                event.name = "diagnose.capabilities_ok",
                "all required capabilities present"
            );
        }
        Err(e) => warn!(
            event.name = "diagnose.capabilities_missing",
            error = %e,
            "continuing with missing capabilities"
        ),
    }

    program::ensure_interface(interface)?;
    program::bump_memlock_rlimit();

    let kernel_version = KernelVersion::current().unwrap_or(KernelVersion::new(0, 0, 0));
    info!(
        event.name = "diagnose.kernel_info",
        system.kernel.version = %kernel_version,
        "kernel version determined"
    );

    let scratch = conf.socket_map.pin_path.join(SCRATCH_DIR);
    info!(
        event.name = "diagnose.testing_bpf_fs",
        pin_path = %scratch.display(),
        "testing BPF filesystem writeability"
    );
    if let Err(e) = fs::create_dir_all(&scratch) {
        warn!(
            event.name = "diagnose.bpf_fs_not_writable",
            pin_path = %scratch.display(),
            error = %e,
            "✗ failed to create pin directory"
        );
    }

    let trace_enabled = u8::from(conf.trace.enabled);
    let loaded = EbpfLoader::new()
        .map_pin_path(&scratch)
        .set_max_entries(SOCKET_MAP_NAME, conf.socket_map.capacity)
        .set_global(TRACE_ENABLED_GLOBAL, &trace_enabled, true)
        .load_file(&conf.program.object_path);

    let mut ebpf = match loaded {
        Ok(ebpf) => ebpf,
        Err(e) => {
            error!(
                event.name = "diagnose.load_failed",
                ebpf.object.path = %conf.program.object_path.display(),
                error = %e,
                "✗ failed to load eBPF object"
            );
            cleanup_scratch(&scratch);
            print_results(&result, &kernel_version);
            return Err(e.into());
        }
    };
    result.bpf_fs_writable = scratch.join(SOCKET_MAP_NAME).exists();
    if result.bpf_fs_writable {
        info!(
            event.name = "diagnose.bpf_fs_writable",
            "✓ BPF filesystem is writable - map and link pinning will work"
        );
    } else {
        warn!(
            event.name = "diagnose.bpf_fs_not_writable",
            "✗ socket map was not pinned - is /sys/fs/bpf mounted?"
        );
    }

    let xdp = cleanup_on_error(&scratch, xdp_program(&mut ebpf))?;
    match xdp.load() {
        Ok(()) => {
            result.program_loaded = true;
            info!(
                event.name = "diagnose.program_loaded",
                "✓ eBPF program passed the verifier"
            );
        }
        Err(e) => error!(
            event.name = "diagnose.program_load_failed",
            error = %e,
            "✗ eBPF program rejected"
        ),
    }

    if result.program_loaded {
        attach_round_trip(xdp, &scratch, &mut result);
    }

    drop(ebpf);
    cleanup_scratch(&scratch);
    print_results(&result, &kernel_version);

    if !result.overall_status() {
        return Err(SteerError::internal(format!(
            "diagnose failed on interface {interface}"
        )));
    }
    Ok(())
}

fn attach_round_trip(xdp: &mut Xdp, scratch: &Path, result: &mut DiagnoseResult) {
    let interface = result.interface.clone();
    info!(
        event.name = "diagnose.attaching",
        network.interface.name = %interface,
        xdp.attach_mode = result.attach_mode.as_str(),
        "attaching XDP program"
    );

    let link_id = match xdp.attach(&interface, program::xdp_flags(result.attach_mode)) {
        Ok(id) => {
            result.attach_success = true;
            info!(
                event.name = "diagnose.attach_success",
                network.interface.name = %interface,
                "✓ successfully attached program to interface"
            );
            id
        }
        Err(e) => {
            error!(
                event.name = "diagnose.attach_failed",
                network.interface.name = %interface,
                error = %e,
                "✗ failed to attach program to interface"
            );
            return;
        }
    };

    if !result.bpf_fs_writable {
        match xdp.detach(link_id) {
            Ok(()) => {
                result.detach_success = true;
                info!(
                    event.name = "diagnose.detach_success",
                    network.interface.name = %interface,
                    "✓ successfully detached program"
                );
            }
            Err(e) => error!(
                event.name = "diagnose.detach_failed",
                network.interface.name = %interface,
                error = %e,
                "✗ failed to detach program"
            ),
        }
        return;
    }

    let pin_path = scratch.join(format!("link_{interface}"));
    let pinned = xdp
        .take_link(link_id)
        .map_err(SteerError::from)
        .and_then(|link| FdLink::try_from(link).map_err(SteerError::from))
        .and_then(|fd_link| {
            fd_link
                .pin(&pin_path)
                .map_err(|e| SteerError::pin(&pin_path, e))
        });

    match pinned {
        Ok(pinned_link) => {
            result.pin_success = Some(true);
            info!(
                event.name = "diagnose.pin_success",
                pin_path = %pin_path.display(),
                "✓ successfully pinned XDP link"
            );
            drop(pinned_link);
        }
        Err(e) => {
            // The link was consumed on the way; dropping it already detached.
            result.pin_success = Some(false);
            result.detach_success = true;
            error!(
                event.name = "diagnose.pin_failed",
                pin_path = %pin_path.display(),
                error = %e,
                "✗ failed to pin XDP link (kernels before 5.9 attach XDP through netlink)"
            );
            return;
        }
    }

    match PinnedLink::from_pin(&pin_path).map(PinnedLink::unpin) {
        Ok(Ok(fd_link)) => {
            drop(fd_link);
            result.detach_success = true;
            info!(
                event.name = "diagnose.detach_success",
                network.interface.name = %interface,
                pin_path = %pin_path.display(),
                "✓ successfully detached program via unpinned link"
            );
        }
        Ok(Err(e)) => error!(
            event.name = "diagnose.unpin_failed",
            pin_path = %pin_path.display(),
            error = %e,
            "✗ failed to unpin link"
        ),
        Err(e) => error!(
            event.name = "diagnose.pin_not_found",
            pin_path = %pin_path.display(),
            error = %e,
            "✗ pinned link could not be reopened"
        ),
    }
}

fn xdp_program(ebpf: &mut Ebpf) -> Result<&mut Xdp> {
    let xdp: &mut Xdp = ebpf
        .program_mut(PROGRAM_NAME)
        .ok_or_else(|| {
            SteerError::internal(format!(
                "ebpf program '{PROGRAM_NAME}' not found in loaded object"
            ))
        })?
        .try_into()?;
    Ok(xdp)
}

/// Removes the scratch pins before an error is propagated.
fn cleanup_on_error<T>(scratch: &Path, result: Result<T>) -> Result<T> {
    if result.is_err() {
        cleanup_scratch(scratch);
    }
    result
}

fn cleanup_scratch(scratch: &Path) {
    if let Err(e) = fs::remove_dir_all(scratch) {
        warn!(
            event.name = "diagnose.cleanup_failed",
            pin_path = %scratch.display(),
            error = %e,
            "failed to remove scratch pin directory"
        );
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "✓ PASS" } else { "✗ FAIL" }
}

fn render_results(result: &DiagnoseResult, kernel_version: &KernelVersion) -> String {
    let mut out = String::new();
    out.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out.push_str("BPF Test Results Summary\n");
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out.push_str(&format!("Interface: {}\n", result.interface));
    out.push_str(&format!("Kernel: {kernel_version}\n"));
    out.push_str(&format!("Mode: {}\n\n", result.attach_mode.as_str()));
    out.push_str(&format!(
        "Capabilities:             {}\n",
        mark(result.capabilities_ok)
    ));
    out.push_str(&format!(
        "BPF Filesystem Writeable: {}\n",
        mark(result.bpf_fs_writable)
    ));
    out.push_str(&format!(
        "Program Verified:         {}\n",
        mark(result.program_loaded)
    ));
    out.push_str(&format!(
        "Program Attach:           {}\n",
        mark(result.attach_success)
    ));
    out.push_str(&format!(
        "Link Pinning:             {}\n",
        match result.pin_success {
            Some(ok) => mark(ok),
            None => "N/A (BPF FS not writable)",
        }
    ));
    out.push_str(&format!(
        "Program Detach:           {}\n",
        mark(result.detach_success)
    ));
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    if !result.bpf_fs_writable {
        out.push_str("\n WARNING: BPF filesystem is not writable!\n");
        out.push_str("   Mount it with: mount -t bpf bpf /sys/fs/bpf\n");
    }
    out
}

fn print_results(result: &DiagnoseResult, kernel_version: &KernelVersion) {
    print!("{}", render_results(result, kernel_version));
}
