//! Reading page-fault counts of the current process.

#[derive(Debug, thiserror::Error)]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) enum PageFaultError {
    #[cfg(target_os = "linux")]
    #[error("I/O error reading `/proc/self/stat`: {0}")]
    Read(#[source] std::io::Error),
    #[error("malformed `/proc/self/stat`: {0}")]
    Parse(&'static str),
    #[cfg(windows)]
    #[error("failed getting process memory info: {0}")]
    Os(#[source] std::io::Error),
}

/// Returns the number of page faults incurred by the current process since its start.
///
/// On Linux, this is the sum of minor and major faults from `/proc/self/stat`; on Windows,
/// `PageFaultCount` of the process memory counters (which includes soft faults).
///
/// The count is read fresh on each call and should only be used differentially. On platforms
/// without a supported source of page-fault counts, this always returns 0.
pub fn current_process_page_faults() -> u64 {
    #[cfg(target_os = "linux")]
    {
        read_proc_stat().unwrap_or(0)
    }

    #[cfg(windows)]
    {
        read_process_memory_info().unwrap_or(0)
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    {
        0
    }
}

#[cfg(windows)]
fn read_process_memory_info() -> Result<u64, PageFaultError> {
    use std::{io, mem};

    use windows_sys::Win32::System::{
        ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS},
        Threading::GetCurrentProcess,
    };

    #[allow(clippy::cast_possible_truncation)] // the struct is a few dozen bytes
    const COUNTERS_SIZE: u32 = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;

    // SAFETY: the struct only contains integers, for which all-zero bytes are valid.
    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { mem::zeroed() };
    counters.cb = COUNTERS_SIZE;
    // SAFETY: the current process pseudo-handle is always valid and needs no closing;
    // `counters` is a writable struct of the declared size.
    let success =
        unsafe { GetProcessMemoryInfo(GetCurrentProcess(), &mut counters, COUNTERS_SIZE) };
    if success == 0 {
        return Err(PageFaultError::Os(io::Error::last_os_error()));
    }
    Ok(counters.PageFaultCount.into())
}

#[cfg(target_os = "linux")]
fn read_proc_stat() -> Result<u64, PageFaultError> {
    let stat = std::fs::read_to_string("/proc/self/stat").map_err(PageFaultError::Read)?;
    parse_proc_stat(&stat)
}

/// Sums `minflt` (field 10) and `majflt` (field 12) from the contents of `/proc/<pid>/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_proc_stat(stat: &str) -> Result<u64, PageFaultError> {
    // The command name (field 2) is parenthesized and may contain spaces or parentheses itself.
    let (_, fields) = stat
        .rsplit_once(')')
        .ok_or(PageFaultError::Parse("no command name"))?;
    let mut fields = fields.split_whitespace();

    // `fields` starts from the process state (field 3).
    let minor = fields
        .nth(7)
        .ok_or(PageFaultError::Parse("no `minflt` field"))?;
    let major = fields
        .nth(1)
        .ok_or(PageFaultError::Parse("no `majflt` field"))?;
    let minor: u64 = minor
        .parse()
        .map_err(|_| PageFaultError::Parse("`minflt` is not an u64"))?;
    let major: u64 = major
        .parse()
        .map_err(|_| PageFaultError::Parse("`majflt` is not an u64"))?;
    Ok(minor + major)
}
