//! Graphics adapter probing through the Linux DRM sysfs tree
//!
//! Each `/sys/class/drm/cardN` directory with a PCI device behind it is an
//! adapter. Utilization, VRAM and hwmon sensors are read when the driver
//! exposes them (amdgpu does, most others expose a subset or nothing).
//! A machine without any adapter is not an error: the report is empty.

use crate::{ProbeError, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const DRM_ROOT: &str = "/sys/class/drm";

/// Adapter facts that do not change while the process runs
#[derive(Debug, Clone, Serialize)]
pub struct GpuAdapter {
    pub card: String,
    pub vendor: String,
    pub device_id: Option<String>,
    pub driver: Option<String>,
}

/// Live figures for one adapter
#[derive(Debug, Clone, Serialize)]
pub struct GpuMetrics {
    pub card: String,
    pub vendor: String,
    pub usage_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub memory_used_mb: Option<f64>,
    pub memory_total_mb: Option<f64>,
    pub fan_rpm: Option<f64>,
    pub power_watts: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpuReport {
    pub gpus: Vec<GpuMetrics>,
}

impl GpuReport {
    pub fn primary(&self) -> Option<&GpuMetrics> {
        self.gpus.first()
    }
}

/// Live figures for every adapter
pub fn collect() -> Result<GpuReport> {
    collect_from(Path::new(DRM_ROOT))
}

/// Static facts for every adapter
pub fn adapters() -> Result<Vec<GpuAdapter>> {
    adapters_from(Path::new(DRM_ROOT))
}

pub(crate) fn collect_from(root: &Path) -> Result<GpuReport> {
    let gpus = cards(root)?
        .into_iter()
        .map(|card_path| {
            let device = card_path.join("device");
            let hwmon = find_hwmon_path(&device);
            GpuMetrics {
                card: card_name(&card_path),
                vendor: vendor_name(&read_string(&device.join("vendor")).unwrap_or_default()),
                usage_percent: read_metric(&device.join("gpu_busy_percent")),
                temperature_celsius: hwmon
                    .as_ref()
                    .and_then(|h| read_metric(&h.join("temp1_input")))
                    .map(|v| v / 1000.0),
                memory_used_mb: read_metric(&device.join("mem_info_vram_used")).map(crate::bytes_to_mb),
                memory_total_mb: read_metric(&device.join("mem_info_vram_total")).map(crate::bytes_to_mb),
                fan_rpm: hwmon.as_ref().and_then(|h| read_metric(&h.join("fan1_input"))),
                power_watts: hwmon
                    .as_ref()
                    .and_then(|h| read_metric(&h.join("power1_average")))
                    .map(|v| v / 1_000_000.0),
            }
        })
        .collect();

    Ok(GpuReport { gpus })
}

pub(crate) fn adapters_from(root: &Path) -> Result<Vec<GpuAdapter>> {
    Ok(cards(root)?
        .into_iter()
        .map(|card_path| {
            let device = card_path.join("device");
            GpuAdapter {
                card: card_name(&card_path),
                vendor: vendor_name(&read_string(&device.join("vendor")).unwrap_or_default()),
                device_id: read_string(&device.join("device")),
                driver: fs::read_link(device.join("driver"))
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())),
            }
        })
        .collect())
}

/// `cardN` directories backed by a device, sorted by name
fn cards(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(ProbeError::Unavailable(format!("{} not present", root.display())));
    }

    let mut cards: Vec<PathBuf> = fs::read_dir(root)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            let name = card_name(path);
            // card0-DP-1 style entries are connectors, not adapters
            name.starts_with("card") && !name.contains('-') && path.join("device/vendor").exists()
        })
        .collect();
    cards.sort();
    Ok(cards)
}

fn card_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn vendor_name(id: &str) -> String {
    match id {
        "0x1002" => "AMD".to_string(),
        "0x10de" => "NVIDIA".to_string(),
        "0x8086" => "Intel".to_string(),
        "" => "unknown".to_string(),
        other => other.to_string(),
    }
}

fn read_string(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_metric(path: &Path) -> Option<f64> {
    read_string(path)?.parse::<f64>().ok()
}

fn find_hwmon_path(device_path: &Path) -> Option<PathBuf> {
    fs::read_dir(device_path.join("hwmon"))
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.is_dir())
}
