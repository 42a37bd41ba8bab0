/// Container-aware CPU limit detection for sizing the tokio worker pool.
///
/// Order: `IRIS_CPU_LIMIT` env var (supports "4" or "4000m"), then cgroup
/// v2 `cpu.max`, then host CPU count. Without this, tokio defaults to the
/// host CPU count, which over-provisions threads in CPU-limited containers.
pub fn worker_threads() -> usize {
    if let Ok(limit) = std::env::var("IRIS_CPU_LIMIT") {
        if let Some(cores) = parse_cpu_value(&limit) {
            return cores.max(1);
        }
    }

    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_cpu_max(&max) {
            return cores.max(1);
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// "4" (cores) or "4000m" (millicores).
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix('m') {
        millis.parse::<usize>().ok().map(|m| m / 1000)
    } else {
        value.parse::<usize>().ok()
    }
}

/// cgroup v2 `cpu.max`: "quota period" or "max period" (unlimited).
fn parse_cgroup_cpu_max(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period: i64 = parts.next()?.parse().ok()?;
    if quota == "max" {
        return None;
    }
    let quota: i64 = quota.parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}
