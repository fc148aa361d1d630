use crate::{
	error::Error,
	onnx::{Input, OnnxModel},
	stage::ModelKwargs,
};

use std::{borrow::Cow, path::Path};

use ndarray::{Array3, ArrayView1, ArrayView3, Ix3};

/// A point cloud diffusion network: predicts the noise (optionally followed by a learned variance)
/// in `x` at timesteps `t`, conditioned on `kwargs`.
///
/// `x` is `[batch, channels, points]`, the output is `[batch, channels or 2 * channels, points]`.
pub trait Denoiser: Send + Sync {
	fn forward(
		&self,
		x: ArrayView3<'_, f32>,
		t: ArrayView1<'_, i64>,
		kwargs: &ModelKwargs,
	) -> Result<Array3<f32>, Error>;
}

/// Denoiser exported to ONNX with inputs `x`, `t` and one input per conditioning key, and a
/// single `output` tensor.
#[derive(Debug)]
pub struct OnnxDenoiser {
	model: OnnxModel,
}

impl OnnxDenoiser {
	pub fn load(name: &'static str, path: impl AsRef<Path>) -> Result<Self, Error> {
		OnnxModel::load(name, path).map(|model| Self { model })
	}
}

impl Denoiser for OnnxDenoiser {
	fn forward(
		&self,
		x: ArrayView3<'_, f32>,
		t: ArrayView1<'_, i64>,
		kwargs: &ModelKwargs,
	) -> Result<Array3<f32>, Error> {
		if t.len() != x.shape()[0] {
			return Err(Error::InvalidInput(format!(
				"{} timesteps for a batch of {}",
				t.len(),
				x.shape()[0]
			)));
		}

		let mut inputs = Vec::with_capacity(2 + kwargs.len());
		inputs.push((Cow::Borrowed("x"), Input::F32(x.to_owned().into_dyn())));
		inputs.push((Cow::Borrowed("t"), Input::I64(t.to_owned().into_dyn())));

		inputs.extend(
			kwargs
				.iter()
				.map(|(key, value)| (Cow::Owned(key.to_string()), Input::F32(value.clone()))),
		);

		Ok(self.model.run(inputs, "output")?.into_dimensionality::<Ix3>()?)
	}
}
