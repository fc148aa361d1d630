use crate::error::DiffusionError;

use std::fmt;

use ndarray::{ArrayD, ArrayView1, Axis, IxDyn};

/// Looks up per timestep coefficients and broadcasts them against a batch of samples.
///
/// The diffusion engine receives its implementation on construction, so the numeric policy is
/// fixed before any sampling can run.
pub trait CoefficientGather: Send + Sync + fmt::Debug {
	/// `table[t]` for every `t` in `timesteps`, right padded with singleton axes and broadcast
	/// to `broadcast_shape`, whose leading axis is the batch.
	fn gather(
		&self,
		table: &[f64],
		timesteps: ArrayView1<'_, i64>,
		broadcast_shape: &[usize],
	) -> Result<ArrayD<f32>, DiffusionError>;
}

/// Narrows the coefficient table to `f32` before any indexing happens.
///
/// Accelerator backends reject (or quietly mangle) 64-bit float tensors, so nothing wider than
/// `f32` may ever reach a device bound computation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Float32Gather;

impl CoefficientGather for Float32Gather {
	fn gather(
		&self,
		table: &[f64],
		timesteps: ArrayView1<'_, i64>,
		broadcast_shape: &[usize],
	) -> Result<ArrayD<f32>, DiffusionError> {
		let table = table.iter().map(|&value| value as f32).collect::<Vec<_>>();

		let gathered = timesteps
			.iter()
			.map(|&timestep| {
				usize::try_from(timestep)
					.ok()
					.and_then(|index| table.get(index).copied())
					.ok_or(DiffusionError::TimestepOutOfRange {
						timestep,
						len: table.len(),
					})
			})
			.collect::<Result<Vec<_>, _>>()?;

		let mut res = ArrayD::from_shape_vec(IxDyn(&[gathered.len()]), gathered).map_err(|_| {
			DiffusionError::Broadcast {
				from: vec![timesteps.len()],
				to: broadcast_shape.to_vec(),
			}
		})?;

		while res.ndim() < broadcast_shape.len() {
			res.insert_axis_inplace(Axis(res.ndim()));
		}

		let zeros = ArrayD::<f32>::zeros(IxDyn(broadcast_shape));
		let broadcast = res
			.broadcast(zeros.raw_dim())
			.ok_or_else(|| DiffusionError::Broadcast {
				from: res.shape().to_vec(),
				to: broadcast_shape.to_vec(),
			})?;

		Ok(&zeros + &broadcast)
	}
}
