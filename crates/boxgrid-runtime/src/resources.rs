//! Host utilization probes: cpu from /proc/stat deltas, memory and disk
//! via POSIX, hostname via `gethostname`.

use std::ffi::CString;

/// Aggregate cpu jiffies from the first line of /proc/stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line of /proc/stat. Idle time includes iowait.
pub fn parse_proc_stat(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }

    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 5 {
        return None;
    }

    let idle = values[3] + values[4];
    let total = values.iter().sum();
    Some(CpuTimes { idle, total })
}

/// Computes busy-cpu percentage from successive /proc/stat readings.
///
/// The first reading has no baseline and reports 0.0.
#[derive(Debug, Default)]
pub struct CpuTracker {
    last: Option<CpuTimes>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a new reading and return busy% over the elapsed window.
    pub fn update(&mut self, times: CpuTimes) -> f64 {
        let pct = match self.last {
            Some(prev) if times.total > prev.total => {
                let total = (times.total - prev.total) as f64;
                let idle = times.idle.saturating_sub(prev.idle) as f64;
                ((total - idle) / total * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        };
        self.last = Some(times);
        pct
    }

    /// Read /proc/stat and update. Returns 0.0 when the file is unreadable.
    pub fn sample(&mut self) -> f64 {
        match std::fs::read_to_string("/proc/stat") {
            Ok(stat) => match parse_proc_stat(&stat) {
                Some(times) => self.update(times),
                None => 0.0,
            },
            Err(_) => 0.0,
        }
    }
}

/// Physical memory utilization in percent, via sysconf page counts.
pub fn memory_percent() -> f64 {
    unsafe {
        let phys = libc::sysconf(libc::_SC_PHYS_PAGES);
        let avail = libc::sysconf(libc::_SC_AVPHYS_PAGES);
        if phys > 0 && avail >= 0 && avail <= phys {
            (phys - avail) as f64 / phys as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Filesystem utilization in percent for the filesystem holding `path`.
pub fn disk_percent(path: &str) -> f64 {
    let Ok(c_path) = CString::new(path) else {
        return 0.0;
    };
    unsafe {
        let mut stats: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stats) != 0 || stats.f_blocks == 0 {
            return 0.0;
        }
        let used = stats.f_blocks.saturating_sub(stats.f_bavail);
        used as f64 / stats.f_blocks as f64 * 100.0
    }
}

/// The host's name, or `"unknown"` when it cannot be read.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
