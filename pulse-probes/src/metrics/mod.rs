//! System metrics collection for the Pulse kernel
//!
//! Provides cross-platform host monitoring:
//! - CPU usage, per-core load, frequency, temperature and load averages
//! - Memory and swap usage
//! - Disk usage per mounted filesystem plus aggregate I/O throughput
//! - Network throughput of the primary interface
//! - Process table summary and top consumers
//! - Uptime and battery status
//!
//! `HostProbe` keeps the sysinfo handles between calls: CPU usage and
//! network/disk rates are deltas against the previous refresh.

use crate::{bytes_to_gb, bytes_to_mb, round2, ProbeError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;
use sysinfo::{Components, Disks, Networks, ProcessStatus, System};
use tracing::debug;

/// Number of processes reported in the top list
pub const TOP_PROCESSES: usize = 20;

/// CPU usage metrics
#[derive(Debug, Clone, Serialize)]
pub struct CpuMetrics {
    pub overall_percent: f32,
    pub per_core_percent: Vec<f32>,
    pub frequency_mhz: Option<u64>,
    pub temperature_celsius: Option<f32>,
    pub load_avg: [f64; 3], // [1min, 5min, 15min]
}

/// Processor facts that cannot change while the process runs
#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub brand: String,
    pub vendor: String,
    pub logical_cores: usize,
    pub physical_cores: Option<usize>,
    pub base_frequency_mhz: Option<u64>,
}

/// Memory usage metrics (GB)
#[derive(Debug, Clone, Serialize)]
pub struct MemoryMetrics {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub available_gb: f64,
    pub percent_used: f64,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    pub swap_percent: f64,
}

/// Disk usage metrics per filesystem
#[derive(Debug, Clone, Serialize)]
pub struct DiskMetrics {
    pub name: String,
    pub mount: String,
    pub file_system: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent_used: f64,
    pub removable: bool,
}

/// Aggregate block device throughput, MB/s
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskIo {
    pub read_mb_s: Option<f64>,
    pub write_mb_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub disks: Vec<DiskMetrics>,
    pub io: DiskIo,
}

/// Network throughput summary
#[derive(Debug, Clone, Serialize)]
pub struct NetworkMetrics {
    pub primary_interface: Option<String>,
    pub download_mb_s: f64,
    pub upload_mb_s: f64,
    pub total_download_gb: f64,
    pub total_upload_gb: f64,
    pub interfaces: Vec<NetworkInterfaceStats>,
}

/// Per-interface network statistics
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterfaceStats {
    pub name: String,
    pub rx_mb_s: f64,
    pub tx_mb_s: f64,
    pub total_received: u64,
    pub total_transmitted: u64,
}

/// Process information summary
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub total_count: usize,
    pub running_count: usize,
    pub top: Vec<ProcessEntry>,
}

/// Individual process entry
#[derive(Debug, Clone, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// Uptime and power figures
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub uptime_seconds: u64,
    pub boot_time: u64,
    pub battery: Option<BatteryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatteryStatus {
    pub percent: Option<f64>,
    pub charging: bool,
}

/// Host identity
#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: String,
}

struct RateState<T> {
    handle: T,
    last_refresh: Instant,
}

#[derive(Default)]
struct DiskCounters {
    sectors: Option<(u64, u64)>,
    at: Option<Instant>,
}

/// Long-lived probe over the local host
pub struct HostProbe {
    sys: Mutex<System>,
    components: Mutex<Components>,
    networks: Mutex<RateState<Networks>>,
    disks: Mutex<Disks>,
    disk_counters: Mutex<DiskCounters>,
}

impl HostProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            sys: Mutex::new(sys),
            components: Mutex::new(Components::new_with_refreshed_list()),
            networks: Mutex::new(RateState {
                handle: Networks::new_with_refreshed_list(),
                last_refresh: Instant::now(),
            }),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            disk_counters: Mutex::new(DiskCounters::default()),
        }
    }

    /// CPU load since the previous call (the very first call reads near zero)
    pub fn cpu(&self) -> Result<CpuMetrics> {
        let (overall_percent, per_core_percent, frequency_mhz) = {
            let mut sys = self.sys.lock();
            sys.refresh_cpu();
            let cpus = sys.cpus();
            if cpus.is_empty() {
                return Err(ProbeError::Unavailable("no CPU reported".into()));
            }
            let per_core: Vec<f32> = cpus.iter().map(|c| round1(c.cpu_usage())).collect();
            let avg_freq = cpus.iter().map(|c| c.frequency()).sum::<u64>() / cpus.len() as u64;
            (
                round1(sys.global_cpu_info().cpu_usage()),
                per_core,
                (avg_freq > 0).then_some(avg_freq),
            )
        };

        let load_avg = if cfg!(unix) {
            let load = System::load_average();
            [load.one, load.five, load.fifteen]
        } else {
            [0.0, 0.0, 0.0]
        };

        Ok(CpuMetrics {
            overall_percent,
            per_core_percent,
            frequency_mhz,
            temperature_celsius: self.cpu_temperature(),
            load_avg,
        })
    }

    pub fn cpu_info(&self) -> Result<CpuInfo> {
        let sys = self.sys.lock();
        let first = sys
            .cpus()
            .first()
            .ok_or_else(|| ProbeError::Unavailable("no CPU reported".into()))?;

        Ok(CpuInfo {
            brand: first.brand().trim().to_string(),
            vendor: first.vendor_id().to_string(),
            logical_cores: sys.cpus().len(),
            physical_cores: sys.physical_core_count(),
            base_frequency_mhz: (first.frequency() > 0).then_some(first.frequency()),
        })
    }

    /// Temperature of the processor package, if any sensor exposes one
    fn cpu_temperature(&self) -> Option<f32> {
        let mut components = self.components.lock();
        components.refresh();

        let valid = |t: f32| t.is_finite() && t > 0.0;
        let mut package = None;
        let mut cores = Vec::new();

        for component in components.list() {
            let label = component.label().to_lowercase();
            let temp = component.temperature();
            if !valid(temp) {
                continue;
            }
            if label.contains("package") || label.contains("tctl") || label.contains("cpu") {
                package.get_or_insert(temp);
            } else if label.contains("core") {
                cores.push(temp);
            }
        }

        package.or_else(|| {
            (!cores.is_empty()).then(|| round1(cores.iter().sum::<f32>() / cores.len() as f32))
        })
    }

    pub fn memory(&self) -> Result<MemoryMetrics> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable("memory size not reported".into()));
        }
        let used = sys.used_memory();
        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();

        Ok(MemoryMetrics {
            total_gb: bytes_to_gb(total),
            used_gb: bytes_to_gb(used),
            free_gb: bytes_to_gb(sys.free_memory()),
            available_gb: bytes_to_gb(sys.available_memory()),
            percent_used: percent(used, total),
            swap_total_gb: bytes_to_gb(swap_total),
            swap_used_gb: bytes_to_gb(swap_used),
            swap_percent: if swap_total > 0 { percent(swap_used, swap_total) } else { 0.0 },
        })
    }

    pub fn disks(&self) -> Result<DiskReport> {
        let disks = {
            let mut handle = self.disks.lock();
            handle.refresh_list();
            handle
                .list()
                .iter()
                .map(|disk| {
                    let total = disk.total_space();
                    let free = disk.available_space();
                    let used = total.saturating_sub(free);
                    DiskMetrics {
                        name: disk.name().to_string_lossy().into_owned(),
                        mount: disk.mount_point().to_string_lossy().into_owned(),
                        file_system: disk.file_system().to_string_lossy().into_owned(),
                        total_gb: bytes_to_gb(total),
                        used_gb: bytes_to_gb(used),
                        free_gb: bytes_to_gb(free),
                        percent_used: if total > 0 { percent(used, total) } else { 0.0 },
                        removable: disk.is_removable(),
                    }
                })
                .collect::<Vec<_>>()
        };

        if disks.is_empty() {
            return Err(ProbeError::Unavailable("no mounted filesystem reported".into()));
        }

        Ok(DiskReport { disks, io: self.disk_io() })
    }

    /// Throughput since the previous call, from /proc/diskstats
    fn disk_io(&self) -> DiskIo {
        let Some(sectors) = read_diskstats() else {
            return DiskIo::default();
        };
        let now = Instant::now();
        let mut counters = self.disk_counters.lock();

        let io = match (counters.sectors, counters.at) {
            (Some((prev_read, prev_write)), Some(at)) => {
                let secs = now.duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    // 512-byte sectors regardless of the device's physical sector size
                    let rate = |cur: u64, prev: u64| bytes_to_mb(cur.saturating_sub(prev) as f64 * 512.0 / secs);
                    DiskIo {
                        read_mb_s: Some(rate(sectors.0, prev_read)),
                        write_mb_s: Some(rate(sectors.1, prev_write)),
                    }
                } else {
                    DiskIo::default()
                }
            }
            _ => DiskIo::default(),
        };

        counters.sectors = Some(sectors);
        counters.at = Some(now);
        io
    }

    pub fn network(&self) -> Result<NetworkMetrics> {
        let mut state = self.networks.lock();
        state.handle.refresh();
        let now = Instant::now();
        let secs = now.duration_since(state.last_refresh).as_secs_f64().max(0.001);
        state.last_refresh = now;

        let mut interfaces: Vec<NetworkInterfaceStats> = state
            .handle
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .map(|(name, data)| NetworkInterfaceStats {
                name: name.clone(),
                rx_mb_s: bytes_to_mb(data.received() as f64 / secs),
                tx_mb_s: bytes_to_mb(data.transmitted() as f64 / secs),
                total_received: data.total_received(),
                total_transmitted: data.total_transmitted(),
            })
            .collect();
        drop(state);

        if interfaces.is_empty() {
            return Err(ProbeError::Unavailable("no network interface reported".into()));
        }

        // Primary = busiest interface since boot
        interfaces.sort_by(|a, b| {
            (b.total_received + b.total_transmitted).cmp(&(a.total_received + a.total_transmitted))
        });
        let primary = &interfaces[0];

        Ok(NetworkMetrics {
            primary_interface: Some(primary.name.clone()),
            download_mb_s: primary.rx_mb_s,
            upload_mb_s: primary.tx_mb_s,
            total_download_gb: bytes_to_gb(primary.total_received),
            total_upload_gb: bytes_to_gb(primary.total_transmitted),
            interfaces,
        })
    }

    pub fn processes(&self) -> Result<ProcessInfo> {
        let mut sys = self.sys.lock();
        sys.refresh_processes();

        let processes: Vec<_> = sys.processes().values().collect();
        let total_count = processes.len();
        let running_count = processes
            .iter()
            .filter(|p| matches!(p.status(), ProcessStatus::Run))
            .count();

        let mut sorted: Vec<_> = processes
            .into_iter()
            .filter(|p| p.cpu_usage() > 0.0 || p.memory() > 0)
            .collect();
        sorted.sort_by(|a, b| {
            b.cpu_usage()
                .partial_cmp(&a.cpu_usage())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top = sorted
            .into_iter()
            .take(TOP_PROCESSES)
            .map(|p| ProcessEntry {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cpu_percent: round1(p.cpu_usage()),
                memory_mb: round2(p.memory() as f64 / (1024.0 * 1024.0)),
            })
            .collect();

        debug!(total_count, "process table scanned");
        Ok(ProcessInfo { total_count, running_count, top })
    }

    pub fn system(&self) -> Result<SystemMetrics> {
        Ok(SystemMetrics {
            uptime_seconds: System::uptime(),
            boot_time: System::boot_time(),
            battery: read_battery(),
        })
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo {
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

fn percent(part: u64, whole: u64) -> f64 {
    round2(part as f64 / whole as f64 * 100.0)
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_lowercase().contains("loopback")
}

/// Total (read, written) sectors of whole block devices
#[cfg(target_os = "linux")]
fn read_diskstats() -> Option<(u64, u64)> {
    let content = std::fs::read_to_string("/proc/diskstats").ok()?;
    Some(parse_diskstats(&content, |name| {
        std::path::Path::new("/sys/block").join(name).exists()
    }))
}

#[cfg(not(target_os = "linux"))]
fn read_diskstats() -> Option<(u64, u64)> {
    None
}

/// Sum sectors read (field 6) and written (field 10) over accepted devices
fn parse_diskstats(content: &str, is_whole_device: impl Fn(&str) -> bool) -> (u64, u64) {
    let mut read = 0u64;
    let mut written = 0u64;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }
        let name = parts[2];
        if name.starts_with("loop") || name.starts_with("ram") || !is_whole_device(name) {
            continue;
        }
        read += parts[5].parse::<u64>().unwrap_or(0);
        written += parts[9].parse::<u64>().unwrap_or(0);
    }

    (read, written)
}

#[cfg(target_os = "linux")]
fn read_battery() -> Option<BatteryStatus> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_battery = std::fs::read_to_string(path.join("type"))
            .map(|t| t.trim() == "Battery")
            .unwrap_or(false);
        if !is_battery {
            continue;
        }
        let percent = std::fs::read_to_string(path.join("capacity"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok());
        let charging = std::fs::read_to_string(path.join("status"))
            .map(|s| s.trim() == "Charging")
            .unwrap_or(false);
        return Some(BatteryStatus { percent, charging });
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_battery() -> Option<BatteryStatus> {
    None
}
