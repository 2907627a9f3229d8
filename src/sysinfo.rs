//! Process and system resource sampling
//!
//! Thin helpers over `/proc` and libc used by the aggregator (per-entry
//! memory sampling) and the health orchestrator (memory and disk checks).
//! Every function degrades to a zero value instead of failing: resource
//! sampling must never take the pipeline down.

/// Current resident memory of this process, in bytes
///
/// Reads `/proc/self/status` on Linux and falls back to `getrusage`
/// elsewhere. Returns 0 if the value cannot be determined.
pub fn process_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        use std::fs;

        if let Ok(status) = fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return kb * 1024;
                        }
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    {
        // getrusage reports peak rather than current RSS; acceptable fallback
        unsafe {
            let mut usage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                #[cfg(target_os = "linux")]
                return (usage.ru_maxrss * 1024) as u64;

                #[cfg(not(target_os = "linux"))]
                return usage.ru_maxrss as u64;
            }
        }
    }

    #[allow(unreachable_code)]
    0
}

/// Average CPU usage of this process since start, as a percentage
///
/// Computed from cumulative user+system time over process wall-clock
/// uptime. Returns 0.0 when either value is unavailable.
pub fn process_cpu_percent(uptime_secs: f64) -> f64 {
    if uptime_secs <= 0.0 {
        return 0.0;
    }

    unsafe {
        let mut usage = std::mem::zeroed::<libc::rusage>();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            let cpu_secs = usage.ru_utime.tv_sec as f64
                + usage.ru_utime.tv_usec as f64 / 1_000_000.0
                + usage.ru_stime.tv_sec as f64
                + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
            return (cpu_secs / uptime_secs * 100.0).min(100.0);
        }
    }

    0.0
}

/// System memory usage as a used/total ratio in 0.0 - 1.0
///
/// Parses `/proc/meminfo` (used = MemTotal - MemAvailable). Returns 0.0 if
/// the file is missing or malformed, which reads as healthy.
pub fn memory_usage_ratio() -> f64 {
    #[cfg(target_os = "linux")]
    {
        use std::fs;

        fn parse_kb(line: &str) -> Option<u64> {
            line.split_whitespace().nth(1)?.parse().ok()
        }

        if let Ok(meminfo) = fs::read_to_string("/proc/meminfo") {
            let mut total = None;
            let mut available = None;
            for line in meminfo.lines() {
                if line.starts_with("MemTotal:") {
                    total = parse_kb(line);
                } else if line.starts_with("MemAvailable:") {
                    available = parse_kb(line);
                }
            }
            if let (Some(total), Some(available)) = (total, available) {
                if total > 0 {
                    return (total.saturating_sub(available)) as f64 / total as f64;
                }
            }
        }
    }

    0.0
}

/// Disk usage of the filesystem holding `path` as a used/total ratio
///
/// Uses `statvfs`. Returns 0.0 on failure.
pub fn disk_usage_ratio(path: &str) -> f64 {
    use std::ffi::CString;

    let Ok(c_path) = CString::new(path) else {
        return 0.0;
    };

    unsafe {
        let mut stats = std::mem::zeroed::<libc::statvfs>();
        if libc::statvfs(c_path.as_ptr(), &mut stats) == 0 && stats.f_blocks > 0 {
            let total = stats.f_blocks as f64;
            let free = stats.f_bavail as f64;
            return ((total - free) / total).clamp(0.0, 1.0);
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_memory_is_sane() {
        // A running test process has a nonzero RSS on Linux
        let bytes = process_memory_bytes();
        #[cfg(target_os = "linux")]
        assert!(bytes > 0);
        let _ = bytes;
    }

    #[test]
    fn test_memory_ratio_in_range() {
        let ratio = memory_usage_ratio();
        assert!((0.0..=1.0).contains(&ratio));
    }

    #[test]
    fn test_disk_ratio_in_range() {
        let ratio = disk_usage_ratio("/");
        assert!((0.0..=1.0).contains(&ratio));
    }

    #[test]
    fn test_disk_ratio_bad_path() {
        assert_eq!(disk_usage_ratio("\0bad"), 0.0);
    }

    #[test]
    fn test_cpu_percent_zero_uptime() {
        assert_eq!(process_cpu_percent(0.0), 0.0);
    }

    #[test]
    fn test_cpu_percent_in_range() {
        let pct = process_cpu_percent(10.0);
        assert!((0.0..=100.0).contains(&pct));
    }
}
