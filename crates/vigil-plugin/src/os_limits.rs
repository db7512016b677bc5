//! Process resource ceilings (`setrlimit`) and usage sampling (`getrusage`).
//!
//! In-process ceilings are process-wide: lowering them for one plugin call
//! constrains the whole host. Child processes get their own hard limits in
//! a `pre_exec` hook instead.

use serde::Serialize;
use std::io;

use vigil_config::SandboxLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// `RLIMIT_AS`
    AddressSpace,
    /// `RLIMIT_CPU`
    CpuTime,
    /// `RLIMIT_NOFILE`
    OpenFiles,
}

/// A point-in-time sample of the host process's resource usage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_seconds: f64,
    pub open_files: u64,
}

#[cfg(unix)]
fn get_limit(resource: Resource) -> io::Result<libc::rlimit> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we own.
    let rc = unsafe {
        match resource {
            Resource::AddressSpace => libc::getrlimit(libc::RLIMIT_AS, &mut lim),
            Resource::CpuTime => libc::getrlimit(libc::RLIMIT_CPU, &mut lim),
            Resource::OpenFiles => libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim),
        }
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(lim)
}

/// Async-signal-safe: safe to call between `fork` and `exec`.
#[cfg(unix)]
fn set_limit(resource: Resource, lim: &libc::rlimit) -> io::Result<()> {
    // SAFETY: setrlimit reads the struct and performs a single syscall.
    let rc = unsafe {
        match resource {
            Resource::AddressSpace => libc::setrlimit(libc::RLIMIT_AS, lim),
            Resource::CpuTime => libc::setrlimit(libc::RLIMIT_CPU, lim),
            Resource::OpenFiles => libc::setrlimit(libc::RLIMIT_NOFILE, lim),
        }
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Current soft limit for a resource.
#[cfg(unix)]
pub fn soft_limit(resource: Resource) -> io::Result<u64> {
    get_limit(resource).map(|l| l.rlim_cur as u64)
}

#[cfg(not(unix))]
pub fn soft_limit(_resource: Resource) -> io::Result<u64> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "rlimits are unix-only"))
}

/// Lowers the host's soft limits while alive and restores them on drop.
///
/// Hard limits are never touched, so restoring always succeeds for an
/// unprivileged process. Limits already below the target are left alone.
pub struct OsLimitGuard {
    #[cfg(unix)]
    saved: Vec<(Resource, libc::rlimit)>,
}

impl OsLimitGuard {
    #[cfg(unix)]
    pub fn apply(limits: &SandboxLimits) -> io::Result<Self> {
        // The CPU limit is cumulative for the process, so it is set relative
        // to what has already been used.
        let cpu_used = process_usage()
            .map(|u| u.cpu_seconds.ceil() as u64)
            .unwrap_or(0);
        let targets = [
            (Resource::AddressSpace, limits.max_memory_bytes()),
            (
                Resource::CpuTime,
                cpu_used.saturating_add(limits.max_cpu_time_seconds),
            ),
            (Resource::OpenFiles, limits.max_open_files),
        ];

        let mut guard = Self { saved: Vec::new() };
        for (resource, target) in targets {
            let current = get_limit(resource)?;
            let soft = (target as libc::rlim_t)
                .min(current.rlim_cur)
                .min(current.rlim_max);
            if soft == current.rlim_cur {
                continue;
            }
            // On error the guard drops and restores what was already lowered.
            set_limit(
                resource,
                &libc::rlimit {
                    rlim_cur: soft,
                    rlim_max: current.rlim_max,
                },
            )?;
            guard.saved.push((resource, current));
        }
        Ok(guard)
    }

    #[cfg(not(unix))]
    pub fn apply(_limits: &SandboxLimits) -> io::Result<Self> {
        tracing::warn!("OS resource ceilings are not supported on this platform");
        Ok(Self {})
    }
}

impl Drop for OsLimitGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        for (resource, previous) in self.saved.drain(..).rev() {
            if let Err(e) = set_limit(resource, &previous) {
                tracing::error!(?resource, error = %e, "failed to restore resource limit");
            }
        }
    }
}

/// Sample memory, CPU time and open descriptors of the host process.
#[cfg(unix)]
pub fn process_usage() -> io::Result<ResourceUsage> {
    // SAFETY: rusage is plain data; getrusage fills it in.
    let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    let cpu_seconds = seconds(ru.ru_utime) + seconds(ru.ru_stime);

    Ok(ResourceUsage {
        memory_bytes: resident_bytes().unwrap_or_else(|| peak_rss_bytes(&ru)),
        cpu_seconds,
        open_files: open_descriptors()?,
    })
}

#[cfg(not(unix))]
pub fn process_usage() -> io::Result<ResourceUsage> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "usage sampling is unix-only",
    ))
}

/// Current resident set from `/proc/self/statm`.
#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size).ok().map(|size| pages * size)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn resident_bytes() -> Option<u64> {
    None
}

/// Peak RSS; Linux reports KiB, macOS reports bytes.
#[cfg(unix)]
fn peak_rss_bytes(ru: &libc::rusage) -> u64 {
    let raw = ru.ru_maxrss.max(0) as u64;
    if cfg!(target_os = "macos") {
        raw
    } else {
        raw * 1024
    }
}

#[cfg(unix)]
fn open_descriptors() -> io::Result<u64> {
    let dir = if cfg!(target_os = "linux") {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    // The directory handle used for listing shows up in its own listing.
    let count = std::fs::read_dir(dir)?.count() as u64;
    Ok(count.saturating_sub(1))
}

/// Install hard limits on a child before it execs.
#[cfg(unix)]
pub fn apply_child_limits(command: &mut tokio::process::Command, limits: &SandboxLimits) {
    let targets = [
        (Resource::AddressSpace, limits.max_memory_bytes() as libc::rlim_t),
        (Resource::CpuTime, limits.max_cpu_time_seconds as libc::rlim_t),
        (Resource::OpenFiles, limits.max_open_files as libc::rlim_t),
    ];
    // SAFETY: the closure runs between fork() and exec() and only calls
    // getrlimit/setrlimit, which are async-signal-safe. Nothing allocates.
    unsafe {
        command.pre_exec(move || {
            for (resource, value) in targets {
                // An unprivileged child cannot raise its hard limit.
                let value = value.min(get_limit(resource)?.rlim_max);
                set_limit(
                    resource,
                    &libc::rlimit {
                        rlim_cur: value,
                        rlim_max: value,
                    },
                )?;
            }
            Ok(())
        });
    }
}
