use std::io;

use log::info;

use crate::error_handling::types::ControllerError;

/// Soft and hard `RLIMIT_NOFILE` of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLimit {
    pub soft: u64,
    pub hard: u64,
}

pub fn fd_limit() -> io::Result<FdLimit> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is valid for writes.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(FdLimit {
        soft: rlim.rlim_cur as u64,
        hard: rlim.rlim_max as u64,
    })
}

/// Sets both limits of `RLIMIT_NOFILE` to `max_fd`. Raising the hard limit
/// needs `CAP_SYS_RESOURCE`.
pub fn raise_fd_limit(max_fd: u64) -> Result<FdLimit, ControllerError> {
    let rlim = libc::rlimit {
        rlim_cur: max_fd as libc::rlim_t,
        rlim_max: max_fd as libc::rlim_t,
    };
    // SAFETY: `rlim` is a valid rlimit.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
        return Err(ControllerError::InitializationFailed(format!(
            "unable to set the open files limit to {}: {}",
            max_fd,
            io::Error::last_os_error()
        )));
    }
    let limit = fd_limit().map_err(|e| {
        ControllerError::InitializationFailed(format!("unable to read the open files limit: {}", e))
    })?;
    info!("Open files limit set to {}", limit.soft);
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn reads_current_limit() {
        let limit = fd_limit().unwrap();
        assert!(limit.soft > 0);
        assert!(limit.soft <= limit.hard);
    }

    #[test]
    #[serial]
    fn lowering_to_the_current_soft_limit_succeeds() {
        let before = fd_limit().unwrap();
        // hard limit drops to the soft one; never raise it back in tests
        let after = raise_fd_limit(before.soft).unwrap();
        assert_eq!(after.soft, before.soft);
        assert_eq!(after.hard, before.soft);
    }
}
