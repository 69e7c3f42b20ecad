//! Borrowing a socket from another process.
//!
//! AF_XDP sockets are created by the process that owns the UMEM. To place one
//! in the socket map from a separate control process, the socket is duplicated
//! into this process with `pidfd_open(2)` + `pidfd_getfd(2)`. The caller needs
//! `CAP_SYS_PTRACE` over the owner (or to be the owner's parent/same user under
//! a permissive Yama scope).

use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use tracing::debug;

use crate::error::{Result, SteerError};

/// Opens a pidfd referring to `pid`.
pub fn open(pid: i32) -> Result<OwnedFd> {
    if pid <= 0 {
        return Err(SteerError::internal(format!("invalid pid {pid}")));
    }

    let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if ret < 0 {
        return Err(SteerError::io(
            format!("failed to open pidfd for pid {pid}"),
            io::Error::last_os_error(),
        ));
    }

    // SAFETY: pidfd_open returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(ret as RawFd) })
}

/// Duplicates `target_fd` of the process behind `pidfd` into this process.
pub fn get_fd(pidfd: &OwnedFd, target_fd: RawFd) -> Result<OwnedFd> {
    if target_fd < 0 {
        return Err(SteerError::internal(format!(
            "invalid file descriptor {target_fd}"
        )));
    }

    let ret = unsafe { libc::syscall(libc::SYS_pidfd_getfd, pidfd.as_raw_fd(), target_fd, 0) };
    if ret < 0 {
        return Err(SteerError::io(
            format!("failed to duplicate fd {target_fd} through pidfd"),
            io::Error::last_os_error(),
        ));
    }

    // SAFETY: pidfd_getfd installs a new descriptor in this process and hands ownership to us.
    Ok(unsafe { OwnedFd::from_raw_fd(ret as RawFd) })
}

/// Duplicates descriptor `fd` owned by process `pid`.
pub fn duplicate_from(pid: i32, fd: RawFd) -> Result<OwnedFd> {
    let pidfd = open(pid)?;
    let local = get_fd(&pidfd, fd)?;
    debug!(
        event.name = "pidfd.fd_duplicated",
        process.pid = pid,
        remote.fd = fd,
        local.fd = local.as_raw_fd(),
        "duplicated descriptor from owning process"
    );
    Ok(local)
}

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        io::{Read, Seek, SeekFrom, Write},
    };

    use super::*;

    #[test]
    fn rejects_non_positive_pid() {
        assert!(open(0).is_err());
        assert!(open(-4).is_err());
    }

    #[test]
    fn unknown_pid_reports_io_context() {
        // pid_max is at most 2^22, so this pid cannot exist.
        let err = open(i32::MAX).expect_err("pid should not exist");
        assert!(
            err.to_string()
                .starts_with(&format!("failed to open pidfd for pid {}", i32::MAX)),
            "unexpected error: {err}"
        );
    }

    #[test]
    #[ignore] // pidfd_getfd needs kernel >= 5.6 and ptrace access to ourselves
    fn duplicates_own_descriptor() {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(std::env::temp_dir().join("xsksteer-pidfd-test"))
            .unwrap();
        file.write_all(b"steer").unwrap();

        let dup = duplicate_from(std::process::id() as i32, file.as_raw_fd()).unwrap();
        let mut dup = File::from(dup);
        dup.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        dup.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "steer");
    }
}
