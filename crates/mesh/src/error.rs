use pf_utils::error::FileIOError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("channel '{channel}' has {actual} values but the point cloud has {expected} points")]
	ChannelLength {
		channel: String,
		expected: usize,
		actual: usize,
	},
	#[error("point cloud color channel '{0}' not found")]
	MissingColorChannel(&'static str),
	#[error("point cloud has no points")]
	EmptyPointCloud,
	#[error("face {face} references vertex {index} but the mesh only has {vertex_count} vertices")]
	FaceIndexOutOfBounds {
		face: usize,
		index: u32,
		vertex_count: usize,
	},
	#[error("{0} vertex colors were provided for {1} vertices")]
	ColorCount(usize, usize),
	#[error("voxel grid resolution must be at least 2, got {0}")]
	InvalidGrid(usize),
	#[error("volume has {actual} samples but the grid expects {expected}")]
	VolumeSize { expected: usize, actual: usize },
	#[error("isosurface extraction produced no triangles")]
	EmptySurface,
	#[error("mesh export was cancelled")]
	Cancelled,

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
