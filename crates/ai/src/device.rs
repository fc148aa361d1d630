use std::{fmt, str::FromStr};

use ort::{ExecutionProvider, ExecutionProviderDispatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where model inference runs, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
	Cuda,
	CoreMl,
	DirectMl,
	Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
	/// First available accelerator, otherwise CPU
	#[default]
	Auto,
	Cpu,
}

impl FromStr for DevicePreference {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"auto" => Ok(Self::Auto),
			"cpu" => Ok(Self::Cpu),
			other => Err(format!("unknown device preference '{other}', expected 'auto' or 'cpu'")),
		}
	}
}

impl Device {
	#[must_use]
	pub fn select(preference: DevicePreference) -> Self {
		let device = match preference {
			DevicePreference::Cpu => Self::Cpu,
			DevicePreference::Auto => Self::accelerators()
				.into_iter()
				.find(|device| device.is_available())
				.unwrap_or(Self::Cpu),
		};

		info!(%device, ?preference, "Selected compute device");

		device
	}

	#[must_use]
	pub const fn is_accelerator(self) -> bool {
		!matches!(self, Self::Cpu)
	}

	fn accelerators() -> Vec<Self> {
		#[cfg(any(target_os = "macos", target_os = "ios"))]
		{
			vec![Self::CoreMl]
		}

		#[cfg(target_os = "windows")]
		{
			vec![Self::Cuda, Self::DirectMl]
		}

		#[cfg(target_os = "linux")]
		{
			vec![Self::Cuda]
		}

		#[cfg(not(any(
			target_os = "macos",
			target_os = "ios",
			target_os = "windows",
			target_os = "linux"
		)))]
		{
			vec![]
		}
	}

	fn is_available(self) -> bool {
		let available = match self {
			#[cfg(any(target_os = "linux", target_os = "windows"))]
			Self::Cuda => ort::CUDAExecutionProvider::default().is_available(),
			#[cfg(any(target_os = "macos", target_os = "ios"))]
			Self::CoreMl => ort::CoreMLExecutionProvider::default().is_available(),
			#[cfg(target_os = "windows")]
			Self::DirectMl => ort::DirectMLExecutionProvider::default().is_available(),
			Self::Cpu => return true,
			#[allow(unreachable_patterns)]
			_ => return false,
		};

		debug!(device = %self, ?available, "Probed execution provider");

		matches!(available, Ok(true))
	}

	/// Execution providers to register, in priority order. ONNX Runtime always falls back to its
	/// default CPU provider for anything left unassigned.
	pub(crate) fn execution_providers(self) -> Vec<ExecutionProviderDispatch> {
		let mut providers = Vec::with_capacity(2);

		match self {
			#[cfg(any(target_os = "linux", target_os = "windows"))]
			Self::Cuda => providers.push(ort::CUDAExecutionProvider::default().build()),
			#[cfg(any(target_os = "macos", target_os = "ios"))]
			Self::CoreMl => providers.push(ort::CoreMLExecutionProvider::default().build()),
			#[cfg(target_os = "windows")]
			Self::DirectMl => providers.push(ort::DirectMLExecutionProvider::default().build()),
			_ => {}
		}

		#[cfg(any(target_os = "macos", target_os = "ios", target_os = "linux"))]
		providers.push(ort::XNNPACKExecutionProvider::default().build());

		providers
	}
}

impl fmt::Display for Device {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Cuda => "cuda",
			Self::CoreMl => "coreml",
			Self::DirectMl => "directml",
			Self::Cpu => "cpu",
		})
	}
}
