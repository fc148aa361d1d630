use crate::error::{Error, Result};

/// Triangle mesh with 0-indexed faces, every index is known to be in bounds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
	vertices: Vec<[f32; 3]>,
	faces: Vec<[u32; 3]>,
}

impl Mesh {
	pub fn new(vertices: Vec<[f32; 3]>, faces: Vec<[u32; 3]>) -> Result<Self> {
		for (face, indices) in faces.iter().enumerate() {
			if let Some(&index) = indices
				.iter()
				.find(|&&index| usize::try_from(index).map_or(true, |i| i >= vertices.len()))
			{
				return Err(Error::FaceIndexOutOfBounds {
					face,
					index,
					vertex_count: vertices.len(),
				});
			}
		}

		Ok(Self { vertices, faces })
	}

	#[must_use]
	pub fn vertices(&self) -> &[[f32; 3]] {
		&self.vertices
	}

	#[must_use]
	pub fn faces(&self) -> &[[u32; 3]] {
		&self.faces
	}
}
