//! Pulse probes - hardware and OS telemetry for the Pulse kernel
//!
//! This crate is the only place where platform specifics live:
//! - CPU, memory, disk, network, process and uptime figures via `sysinfo`
//! - GPU utilization and VRAM via the Linux DRM sysfs tree
//! - USB and audio device enumeration (Linux sysfs / procfs)
//! - Host identity and network addresses for the dashboard
//!
//! Every probe returns typed structs; the kernel flattens them into readings.

pub mod discovery;
pub mod gpu;
pub mod metrics;
pub mod peripherals;

pub use discovery::NetworkInfo;
pub use gpu::{GpuAdapter, GpuMetrics, GpuReport};
pub use metrics::{
    BatteryStatus, CpuInfo, CpuMetrics, DiskIo, DiskMetrics, DiskReport, HostInfo, HostProbe,
    MemoryMetrics, NetworkInterfaceStats, NetworkMetrics, ProcessEntry, ProcessInfo, SystemMetrics,
};
pub use peripherals::{AudioDevice, UsbDevice};

/// Failure of a single probe call
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The platform has no such sensor or device class
    #[error("not available on this platform: {0}")]
    Unavailable(String),
    /// Reading the platform source failed this time
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe failed: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Round to two decimals, the precision the dashboard displays
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn bytes_to_gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

pub(crate) fn bytes_to_mb(bytes: f64) -> f64 {
    round2(bytes / BYTES_PER_MB)
}
