use crate::error::{Error, Result};

/// A cube of `resolution³` sample points centered on the origin.
///
/// Samples are laid out x-major: flat index `x * r² + y * r + z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
	resolution: usize,
	side_length: f32,
}

impl VoxelGrid {
	pub const DEFAULT_SIDE_LENGTH: f32 = 1.02;

	pub fn new(resolution: usize, side_length: f32) -> Result<Self> {
		if resolution < 2 {
			return Err(Error::InvalidGrid(resolution));
		}

		Ok(Self {
			resolution,
			side_length,
		})
	}

	pub fn with_resolution(resolution: usize) -> Result<Self> {
		Self::new(resolution, Self::DEFAULT_SIDE_LENGTH)
	}

	#[must_use]
	pub const fn resolution(&self) -> usize {
		self.resolution
	}

	/// Total number of samples
	#[must_use]
	pub const fn len(&self) -> usize {
		self.resolution * self.resolution * self.resolution
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		false
	}

	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn voxel_size(&self) -> f32 {
		self.side_length / (self.resolution - 1) as f32
	}

	#[must_use]
	pub fn min_coord(&self) -> f32 {
		-self.side_length / 2.0
	}

	#[must_use]
	pub const fn flat_index(&self, x: usize, y: usize, z: usize) -> usize {
		(x * self.resolution + y) * self.resolution + z
	}

	/// World position of a (possibly fractional) grid coordinate
	#[must_use]
	pub fn to_world(&self, grid: [f32; 3]) -> [f32; 3] {
		let (size, min) = (self.voxel_size(), self.min_coord());
		grid.map(|c| c.mul_add(size, min))
	}

	/// World position of the sample at `index`
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn point(&self, index: usize) -> [f32; 3] {
		let r = self.resolution;
		self.to_world([
			(index / (r * r)) as f32,
			((index / r) % r) as f32,
			(index % r) as f32,
		])
	}

	/// Sample positions in chunks of at most `batch_size`, in flat index order.
	pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Vec<[f32; 3]>> + '_ {
		let batch_size = batch_size.max(1);
		(0..self.len())
			.step_by(batch_size)
			.map(move |start| {
				(start..(start + batch_size).min(self.len()))
					.map(|index| self.point(index))
					.collect()
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn corners_span_the_side_length() {
		let grid = VoxelGrid::with_resolution(4).unwrap();

		assert_eq!(grid.len(), 64);
		assert_eq!(grid.point(0), [-0.51, -0.51, -0.51]);
		let last = grid.point(63);
		assert!(last.iter().all(|c| (c - 0.51).abs() < 1e-6));
	}

	#[test]
	fn flat_index_is_x_major() {
		let grid = VoxelGrid::with_resolution(3).unwrap();

		assert_eq!(grid.flat_index(1, 0, 0), 9);
		assert_eq!(grid.flat_index(0, 1, 0), 3);
		assert_eq!(grid.flat_index(0, 0, 1), 1);

		let p = grid.point(grid.flat_index(2, 1, 0));
		assert!((p[0] - 0.51).abs() < 1e-6);
		assert!(p[1].abs() < 1e-6);
		assert!((p[2] + 0.51).abs() < 1e-6);
	}

	#[test]
	fn batches_cover_every_sample_once() {
		let grid = VoxelGrid::with_resolution(5).unwrap();
		let batches = grid.batches(16).collect::<Vec<_>>();

		assert_eq!(batches.len(), 8);
		assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 125);
		assert_eq!(batches[7].len(), 13);
	}

	#[test]
	fn tiny_grids_are_rejected() {
		assert!(matches!(
			VoxelGrid::with_resolution(1),
			Err(Error::InvalidGrid(1))
		));
	}
}
