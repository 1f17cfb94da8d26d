//! Peripheral enumeration: USB devices and audio cards
//!
//! Linux only (sysfs and procfs). Other platforms report the device class
//! as unavailable so the kernel can stop warning about it after once.

use crate::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsbDevice {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDevice {
    pub index: u32,
    pub name: String,
    pub driver: String,
}

#[cfg(target_os = "linux")]
pub fn usb_devices() -> Result<Vec<UsbDevice>> {
    usb_devices_from(Path::new("/sys/bus/usb/devices"))
}

#[cfg(not(target_os = "linux"))]
pub fn usb_devices() -> Result<Vec<UsbDevice>> {
    Err(crate::ProbeError::Unavailable("USB enumeration is Linux-only".into()))
}

#[cfg(target_os = "linux")]
pub fn audio_devices() -> Result<Vec<AudioDevice>> {
    let path = Path::new("/proc/asound/cards");
    if !path.exists() {
        return Err(crate::ProbeError::Unavailable("no ALSA sound subsystem".into()));
    }
    Ok(parse_asound_cards(&std::fs::read_to_string(path)?))
}

#[cfg(not(target_os = "linux"))]
pub fn audio_devices() -> Result<Vec<AudioDevice>> {
    Err(crate::ProbeError::Unavailable("audio enumeration is Linux-only".into()))
}

pub(crate) fn usb_devices_from(root: &Path) -> Result<Vec<UsbDevice>> {
    if !root.exists() {
        return Err(crate::ProbeError::Unavailable(format!("{} not present", root.display())));
    }

    let read = |dir: &Path, file: &str| {
        std::fs::read_to_string(dir.join(file))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut devices: Vec<UsbDevice> = std::fs::read_dir(root)?
        .flatten()
        .map(|entry| entry.path())
        // interfaces (1-1:1.0) have no idVendor; devices do
        .filter(|dir| dir.join("idVendor").exists())
        .map(|dir| {
            let id = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let vendor_id = read(&dir, "idVendor");
            let product_id = read(&dir, "idProduct");
            let name = read(&dir, "product").unwrap_or_else(|| {
                format!(
                    "{}:{}",
                    vendor_id.as_deref().unwrap_or("????"),
                    product_id.as_deref().unwrap_or("????")
                )
            });
            UsbDevice {
                id,
                name,
                manufacturer: read(&dir, "manufacturer"),
                vendor_id,
                product_id,
                serial_number: read(&dir, "serial"),
            }
        })
        .collect();

    devices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(devices)
}

/// Parse `/proc/asound/cards`, where each card spans two lines:
/// ` 0 [PCH            ]: HDA-Intel - HDA Intel PCH`
pub(crate) fn parse_asound_cards(content: &str) -> Vec<AudioDevice> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (index, rest) = line.split_once(' ')?;
            let index = index.parse::<u32>().ok()?;
            let (_, description) = rest.split_once("]:")?;
            let (driver, name) = description
                .split_once(" - ")
                .unwrap_or((description, description));
            Some(AudioDevice {
                index,
                name: name.trim().to_string(),
                driver: driver.trim().to_string(),
            })
        })
        .collect()
}
