/**
 * SONDE HÔTE - Implémentation de Probe sur pulse-probes
 *
 * Aplatit les structures typées de pulse-probes en champs de mesure :
 * les listes deviennent des clés pointées (`disk.<nom>.used_gb`,
 * `top.01.name`, `usb.0.name`).
 *
 * GPU : absence de matériel (pas de /sys/class/drm ou aucune carte)
 * = mesure stable avec `count = 0` et champs primaires absents, pas
 * une erreur à chaque tick.
 */

use super::Probe;
use crate::error::ProbeError;
use crate::models::{FieldValue, Fields, MetricKind};
use pulse_probes::{gpu, peripherals, GpuReport, HostProbe, NetworkInfo};

pub struct HostSampler {
    host: HostProbe,
}

impl HostSampler {
    pub fn new() -> Self {
        Self { host: HostProbe::new() }
    }

    pub fn host(&self) -> &HostProbe {
        &self.host
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn put(fields: &mut Fields, key: impl Into<String>, value: impl Into<FieldValue>) {
    fields.insert(key.into(), value.into());
}

impl Probe for HostSampler {
    fn probe(&self, kind: MetricKind) -> Result<Fields, ProbeError> {
        let mut f = Fields::new();
        match kind {
            MetricKind::Cpu => {
                let cpu = self.host.cpu()?;
                put(&mut f, "usage", cpu.overall_percent);
                put(&mut f, "temperature", cpu.temperature_celsius);
                put(&mut f, "frequency_mhz", cpu.frequency_mhz);
                put(&mut f, "load_1", cpu.load_avg[0]);
                put(&mut f, "load_5", cpu.load_avg[1]);
                put(&mut f, "load_15", cpu.load_avg[2]);
                put(&mut f, "cores", cpu.per_core_percent.len());
                for (i, usage) in cpu.per_core_percent.iter().enumerate() {
                    put(&mut f, format!("core.{i}.usage"), *usage);
                }
            }
            MetricKind::Gpu => {
                let report = match gpu::collect() {
                    Ok(report) => report,
                    Err(pulse_probes::ProbeError::Unavailable(_)) => GpuReport { gpus: Vec::new() },
                    Err(e) => return Err(e.into()),
                };
                flatten_gpu(&mut f, &report);
            }
            MetricKind::Memory => {
                let mem = self.host.memory()?;
                put(&mut f, "total_gb", mem.total_gb);
                put(&mut f, "used_gb", mem.used_gb);
                put(&mut f, "free_gb", mem.free_gb);
                put(&mut f, "available_gb", mem.available_gb);
                put(&mut f, "percent", mem.percent_used);
                put(&mut f, "swap_total_gb", mem.swap_total_gb);
                put(&mut f, "swap_used_gb", mem.swap_used_gb);
                put(&mut f, "swap_percent", mem.swap_percent);
            }
            MetricKind::Disk => {
                let report = self.host.disks()?;
                put(&mut f, "count", report.disks.len());
                put(&mut f, "read_mb_s", report.io.read_mb_s);
                put(&mut f, "write_mb_s", report.io.write_mb_s);
                for disk in &report.disks {
                    let prefix = format!("disk.{}", disk.name);
                    put(&mut f, format!("{prefix}.mount"), disk.mount.as_str());
                    put(&mut f, format!("{prefix}.fs"), disk.file_system.as_str());
                    put(&mut f, format!("{prefix}.total_gb"), disk.total_gb);
                    put(&mut f, format!("{prefix}.used_gb"), disk.used_gb);
                    put(&mut f, format!("{prefix}.free_gb"), disk.free_gb);
                    put(&mut f, format!("{prefix}.percent"), disk.percent_used);
                }
            }
            MetricKind::Network => {
                let net = self.host.network()?;
                put(&mut f, "interface", net.primary_interface);
                put(&mut f, "download_mb_s", net.download_mb_s);
                put(&mut f, "upload_mb_s", net.upload_mb_s);
                put(&mut f, "total_download_gb", net.total_download_gb);
                put(&mut f, "total_upload_gb", net.total_upload_gb);
                put(&mut f, "interface_count", net.interfaces.len());
                for iface in &net.interfaces {
                    put(&mut f, format!("iface.{}.rx_mb_s", iface.name), iface.rx_mb_s);
                    put(&mut f, format!("iface.{}.tx_mb_s", iface.name), iface.tx_mb_s);
                }
            }
            MetricKind::Processes => {
                let procs = self.host.processes()?;
                put(&mut f, "total", procs.total_count);
                put(&mut f, "running", procs.running_count);
                for (rank, p) in procs.top.iter().enumerate() {
                    let prefix = format!("top.{:02}", rank + 1);
                    put(&mut f, format!("{prefix}.pid"), p.pid);
                    put(&mut f, format!("{prefix}.name"), p.name.as_str());
                    put(&mut f, format!("{prefix}.cpu"), p.cpu_percent);
                    put(&mut f, format!("{prefix}.memory_mb"), p.memory_mb);
                }
            }
            MetricKind::System => {
                let sys = self.host.system()?;
                put(&mut f, "uptime_seconds", sys.uptime_seconds);
                put(&mut f, "boot_time", sys.boot_time);
                put(&mut f, "battery_percent", sys.battery.as_ref().and_then(|b| b.percent));
                put(
                    &mut f,
                    "battery_state",
                    sys.battery
                        .as_ref()
                        .map(|b| if b.charging { "charging" } else { "discharging" }),
                );
            }
            MetricKind::Usb => {
                let devices = peripherals::usb_devices()?;
                put(&mut f, "count", devices.len());
                for (i, dev) in devices.iter().enumerate() {
                    put(&mut f, format!("usb.{i}.name"), dev.name.as_str());
                    put(&mut f, format!("usb.{i}.manufacturer"), dev.manufacturer.clone());
                    put(&mut f, format!("usb.{i}.vendor_id"), dev.vendor_id.clone());
                    put(&mut f, format!("usb.{i}.product_id"), dev.product_id.clone());
                }
            }
            MetricKind::Audio => {
                let cards = peripherals::audio_devices()?;
                put(&mut f, "count", cards.len());
                for card in &cards {
                    put(&mut f, format!("audio.{}.name", card.index), card.name.as_str());
                    put(&mut f, format!("audio.{}.driver", card.index), card.driver.as_str());
                }
            }
        }
        Ok(f)
    }

    fn static_facts(&self, kind: MetricKind) -> Result<Fields, ProbeError> {
        let mut f = Fields::new();
        match kind {
            MetricKind::Cpu => {
                let info = self.host.cpu_info()?;
                put(&mut f, "model", info.brand);
                put(&mut f, "vendor", info.vendor);
                put(&mut f, "logical_cores", info.logical_cores);
                put(&mut f, "physical_cores", info.physical_cores);
                put(&mut f, "base_frequency_mhz", info.base_frequency_mhz);
            }
            MetricKind::Gpu => {
                // pas de carte = pas de faits, pas une erreur
                let adapters = gpu::adapters().unwrap_or_default();
                for (i, adapter) in adapters.iter().enumerate() {
                    put(&mut f, format!("adapter.{i}.card"), adapter.card.as_str());
                    put(&mut f, format!("adapter.{i}.vendor"), adapter.vendor.as_str());
                    put(&mut f, format!("adapter.{i}.device_id"), adapter.device_id.clone());
                    put(&mut f, format!("adapter.{i}.driver"), adapter.driver.clone());
                }
            }
            MetricKind::System => {
                let host = self.host.host_info();
                put(&mut f, "hostname", host.hostname);
                put(&mut f, "os_name", host.os_name);
                put(&mut f, "os_version", host.os_version);
                put(&mut f, "kernel_version", host.kernel_version);
                put(&mut f, "architecture", host.architecture);
            }
            _ => {}
        }
        Ok(f)
    }

    fn network_info(&self) -> Result<NetworkInfo, ProbeError> {
        Ok(NetworkInfo::discover()?)
    }
}

fn flatten_gpu(f: &mut Fields, report: &GpuReport) {
    put(f, "count", report.gpus.len());
    let primary = report.primary();
    put(f, "vendor", primary.map(|g| g.vendor.clone()));
    put(f, "usage", primary.and_then(|g| g.usage_percent));
    put(f, "temperature", primary.and_then(|g| g.temperature_celsius));
    put(f, "memory_used_mb", primary.and_then(|g| g.memory_used_mb));
    put(f, "memory_total_mb", primary.and_then(|g| g.memory_total_mb));
    put(f, "fan_rpm", primary.and_then(|g| g.fan_rpm));
    put(f, "power_watts", primary.and_then(|g| g.power_watts));
    for (i, g) in report.gpus.iter().enumerate().skip(1) {
        put(f, format!("gpu.{i}.usage"), g.usage_percent);
        put(f, format!("gpu.{i}.temperature"), g.temperature_celsius);
    }
}
