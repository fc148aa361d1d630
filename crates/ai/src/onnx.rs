use crate::error::Error;

use std::{borrow::Cow, fmt, path::Path};

use ndarray::ArrayD;
use ort::{GraphOptimizationLevel, Session, SessionInputValue, Tensor};
use tracing::debug;

pub(crate) enum Input {
	F32(ArrayD<f32>),
	I64(ArrayD<i64>),
}

impl Input {
	fn into_session_value(self) -> Result<SessionInputValue<'static>, Error> {
		Ok(match self {
			Self::F32(array) => Tensor::from_array(array)?.into(),
			Self::I64(array) => Tensor::from_array(array)?.into(),
		})
	}
}

/// An inference only ONNX Runtime session plus the name it is reported under.
pub(crate) struct OnnxModel {
	name: &'static str,
	session: Session,
}

impl OnnxModel {
	pub(crate) fn load(name: &'static str, path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		let session = Session::builder()?
			.with_optimization_level(GraphOptimizationLevel::Level3)?
			.commit_from_file(path)?;

		debug!(model = name, path = %path.display(), "Loaded ONNX session");

		Ok(Self { name, session })
	}

	pub(crate) const fn name(&self) -> &'static str {
		self.name
	}

	/// Run the graph and copy out the single `f32` output called `output`.
	pub(crate) fn run(
		&self,
		inputs: Vec<(Cow<'static, str>, Input)>,
		output: &'static str,
	) -> Result<ArrayD<f32>, Error> {
		let inputs = inputs
			.into_iter()
			.map(|(name, input)| Ok((name, input.into_session_value()?)))
			.collect::<Result<Vec<_>, Error>>()?;

		let outputs = self.session.run(inputs)?;

		let value = outputs.get(output).ok_or(Error::MissingOutput {
			model: self.name,
			output,
		})?;

		Ok(value.try_extract_tensor::<f32>()?.to_owned())
	}
}

impl fmt::Debug for OnnxModel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OnnxModel").field("name", &self.name).finish_non_exhaustive()
	}
}
