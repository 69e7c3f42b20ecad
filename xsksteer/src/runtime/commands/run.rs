//! Default mode: load, attach, wait for Ctrl-C, clean up.

use tracing::{info, warn};

use crate::{
    error::{Result, SteerError},
    program::{self, SteeringProgram},
    runtime::{capabilities, conf::Conf},
};

pub async fn execute(conf: &Conf) -> Result<()> {
    capabilities::check_required_capabilities(capabilities::LOADER)?;
    program::bump_memlock_rlimit();

    let mut steering = SteeringProgram::load(conf)?;
    steering.init_logger();
    steering.attach(conf)?;

    // Kept open until shutdown.
    let sockets = steering.take_socket_map()?;
    info!(
        event.name = "xsksteer.ready",
        network.interface.name = %conf.interface,
        ebpf.map.capacity = sockets.capacity(),
        ebpf.map.pin_path = %conf.socket_map.map_path().display(),
        "steering ready, register sockets with `xsksteer register`. Press Ctrl-C to exit."
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| SteerError::io("failed to listen for ctrl-c", e))?;
    info!(event.name = "xsksteer.shutdown", "shutting down");

    drop(sockets);
    let detached = steering.detach();
    let released = release_map(conf);
    shutdown_result(detached, released)
}

fn release_map(conf: &Conf) -> Result<()> {
    if conf.socket_map.persist {
        info!(
            event.name = "socket_map.persisted",
            ebpf.map.pin_path = %conf.socket_map.map_path().display(),
            "keeping pinned socket map and its registrations"
        );
        return Ok(());
    }
    program::unpin_map(&conf.socket_map.map_path()).map(|_| ())
}

/// Both cleanup steps always run; the detach error wins when both fail.
fn shutdown_result(detached: Result<()>, released: Result<()>) -> Result<()> {
    if let Err(e) = &detached {
        warn!(
            event.name = "xdp.detach_failed",
            error.message = %e,
            "failed to detach XDP program"
        );
    }
    if let Err(e) = &released {
        warn!(
            event.name = "socket_map.unpin_failed",
            error.message = %e,
            "failed to remove socket map pin"
        );
    }
    detached.and(released)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_error_is_kept_when_unpin_also_fails() {
        let err = shutdown_result(
            Err(SteerError::internal("detach failed")),
            Err(SteerError::internal("unpin failed")),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "detach failed");
    }

    #[test]
    fn unpin_error_surfaces_after_clean_detach() {
        let err =
            shutdown_result(Ok(()), Err(SteerError::internal("unpin failed"))).unwrap_err();
        assert_eq!(err.to_string(), "unpin failed");
        assert!(shutdown_result(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn persistent_map_is_left_pinned() {
        let mut conf = Conf::default();
        conf.socket_map.pin_path =
            std::env::temp_dir().join(format!("xsksteer-run-{}", std::process::id()));
        std::fs::create_dir_all(&conf.socket_map.pin_path).unwrap();
        std::fs::write(conf.socket_map.map_path(), b"").unwrap();

        release_map(&conf).unwrap();
        assert!(conf.socket_map.map_path().exists());

        conf.socket_map.persist = false;
        release_map(&conf).unwrap();
        assert!(!conf.socket_map.map_path().exists());

        std::fs::remove_dir_all(&conf.socket_map.pin_path).unwrap();
    }
}
