use std::fmt;

use serde::Serialize;
use sysinfo::System;

use crate::shared::settings::{DevicePreference, ModelSettings, Quantization};

/// Compute class, ordered by preference (`Accelerated` is best).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Cpu,
    Gpu,
    Accelerated,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Gpu => "gpu",
            ComputeDevice::Accelerated => "accelerated",
        };
        f.write_str(name)
    }
}

/// Host capabilities, consulted only while loading.
pub trait DeviceInfoProvider: Send + Sync {
    fn available_devices(&self) -> Vec<ComputeDevice>;

    /// Free memory in MB, `None` when it cannot be read.
    fn available_memory_mb(&self) -> Option<u64>;
}

/// Reads the host through `sysinfo`. GPU probing belongs to the engine
/// backend, so this only reports the CPU plus the unified-memory
/// accelerator on Apple Silicon.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDeviceInfo;

impl DeviceInfoProvider for SystemDeviceInfo {
    fn available_devices(&self) -> Vec<ComputeDevice> {
        let mut devices = vec![ComputeDevice::Cpu];
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            devices.push(ComputeDevice::Accelerated);
        }
        devices
    }

    fn available_memory_mb(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            bytes => Some(bytes / (1024 * 1024)),
        }
    }
}

/// Best available device, honouring an explicit preference when the host
/// actually has it.
pub fn select_device(preference: DevicePreference, available: &[ComputeDevice]) -> ComputeDevice {
    let best = available.iter().copied().max().unwrap_or(ComputeDevice::Cpu);

    let wanted = match preference {
        DevicePreference::Auto => return best,
        DevicePreference::Accelerated => ComputeDevice::Accelerated,
        DevicePreference::Gpu => ComputeDevice::Gpu,
        DevicePreference::Cpu => ComputeDevice::Cpu,
    };

    if wanted == ComputeDevice::Cpu || available.contains(&wanted) {
        wanted
    } else {
        tracing::warn!(
            "[ModelLifecycle] Preferred device {} unavailable, falling back to {}",
            wanted,
            best
        );
        best
    }
}

/// An explicit quantization setting always wins. Otherwise quantize to
/// int8 when free memory is known to be under the configured floor.
pub fn choose_quantization(settings: &ModelSettings, available_memory_mb: Option<u64>) -> Quantization {
    if settings.quantization != Quantization::None {
        return settings.quantization;
    }
    match available_memory_mb {
        Some(mb) if mb < settings.auto_quantize_below_mb => {
            tracing::info!(
                "[ModelLifecycle] {}MB free (< {}MB), enabling int8 quantization",
                mb,
                settings.auto_quantize_below_mb
            );
            Quantization::Int8
        }
        _ => Quantization::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_picks_highest_class() {
        let all = [ComputeDevice::Cpu, ComputeDevice::Accelerated, ComputeDevice::Gpu];
        assert_eq!(select_device(DevicePreference::Auto, &all), ComputeDevice::Accelerated);
        assert_eq!(
            select_device(DevicePreference::Auto, &[ComputeDevice::Gpu, ComputeDevice::Cpu]),
            ComputeDevice::Gpu
        );
        assert_eq!(select_device(DevicePreference::Auto, &[]), ComputeDevice::Cpu);
    }

    #[test]
    fn test_unavailable_preference_falls_back() {
        let cpu_only = [ComputeDevice::Cpu];
        assert_eq!(select_device(DevicePreference::Gpu, &cpu_only), ComputeDevice::Cpu);
        let all = [ComputeDevice::Cpu, ComputeDevice::Accelerated];
        assert_eq!(select_device(DevicePreference::Cpu, &all), ComputeDevice::Cpu);
    }

    #[test]
    fn test_quantization_policy() {
        let mut settings = ModelSettings::default();
        assert_eq!(choose_quantization(&settings, Some(16_000)), Quantization::None);
        assert_eq!(choose_quantization(&settings, Some(2_000)), Quantization::Int8);
        assert_eq!(choose_quantization(&settings, None), Quantization::None);

        settings.quantization = Quantization::Int4;
        assert_eq!(choose_quantization(&settings, Some(16_000)), Quantization::Int4);
    }

    #[test]
    fn test_system_info_always_has_cpu() {
        assert!(SystemDeviceInfo.available_devices().contains(&ComputeDevice::Cpu));
    }
}
