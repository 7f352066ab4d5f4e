//! Device selection for native inference.
//!
//! Picks an accelerator when one is compiled in and present (CUDA first, then
//! Metal), otherwise falls back to the CPU. Dtype selection is per device kind.

use candle_core::{DType, Device};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

impl DeviceKind {
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceKind::Cpu)
    }

    pub fn is_metal(&self) -> bool {
        matches!(self, DeviceKind::Metal)
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, DeviceKind::Cuda)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Metal => "metal",
            DeviceKind::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: Device,
    pub kind: DeviceKind,
    pub supports_bf16: bool,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            kind: DeviceKind::Cpu,
            supports_bf16: false,
        }
    }

    /// Select a dtype for the device kind and requested preference.
    ///
    /// CPU and Metal always run in F32. CUDA honours explicit half-precision
    /// requests and otherwise stays in F32.
    pub fn select_dtype(&self, requested: Option<&str>) -> DType {
        let dtype = match (self.kind, requested.unwrap_or("")) {
            (DeviceKind::Cpu | DeviceKind::Metal, _) => DType::F32,
            (DeviceKind::Cuda, "bfloat16" | "bf16") if self.supports_bf16 => DType::BF16,
            (DeviceKind::Cuda, "float16" | "f16") => DType::F16,
            (DeviceKind::Cuda, _) => DType::F32,
        };

        debug!(
            "Selected dtype {:?} for device {:?} (requested: {:?})",
            dtype, self.kind, requested
        );

        dtype
    }
}

pub struct DeviceSelector;

impl DeviceSelector {
    fn try_metal() -> Option<DeviceProfile> {
        if !candle_core::utils::metal_is_available() {
            return None;
        }
        let device = std::panic::catch_unwind(|| Device::new_metal(0))
            .ok()?
            .ok()?;
        if device.is_metal() {
            Some(DeviceProfile {
                device,
                kind: DeviceKind::Metal,
                supports_bf16: false,
            })
        } else {
            None
        }
    }

    fn try_cuda() -> Option<DeviceProfile> {
        let device = std::panic::catch_unwind(|| Device::cuda_if_available(0))
            .ok()?
            .ok()?;
        if device.is_cuda() {
            Some(DeviceProfile {
                device,
                kind: DeviceKind::Cuda,
                // Compute capability 8.0+ is assumed
                supports_bf16: true,
            })
        } else {
            None
        }
    }

    pub fn detect() -> Result<DeviceProfile> {
        if cfg!(target_os = "macos") {
            if let Some(profile) = Self::try_metal() {
                info!("Using Metal device for inference");
                return Ok(profile);
            }
        } else if let Some(profile) = Self::try_cuda() {
            info!("Using CUDA device for inference");
            return Ok(profile);
        }

        info!("Falling back to CPU for inference");
        Ok(DeviceProfile::cpu())
    }

    pub fn detect_with_preference(preference: Option<&str>) -> Result<DeviceProfile> {
        match preference.unwrap_or("") {
            "cuda" => match Self::try_cuda() {
                Some(profile) => Ok(profile),
                None => Self::detect(),
            },
            "metal" | "mps" => match Self::try_metal() {
                Some(profile) => Ok(profile),
                None => Self::detect(),
            },
            "cpu" => Ok(DeviceProfile::cpu()),
            _ => Self::detect(),
        }
    }
}
