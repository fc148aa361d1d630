use crate::{
	error::{Error, Result},
	grid::VoxelGrid,
	mesh::Mesh,
};

use tracing::{debug, warn};

/// Turns a dense scalar volume sampled on a [`VoxelGrid`] into a triangle mesh of its level set.
///
/// Samples above `level` are inside the surface. Implementations must emit faces wound
/// counter-clockwise when seen from outside (right-hand rule, normals pointing outwards).
pub trait IsosurfaceExtractor: Send + Sync {
	fn extract(&self, volume: &[f32], grid: &VoxelGrid, level: f32) -> Result<Mesh>;
}

/// If every sample lies on the same side of zero there is no surface to extract, shift the
/// volume by its mean so the zero level cuts through it.
///
/// Returns whether the volume was shifted.
#[allow(clippy::cast_precision_loss)]
pub fn center_constant_volume(volume: &mut [f32]) -> bool {
	let all_negative = volume.iter().all(|&v| v < 0.0);
	let all_positive = volume.iter().all(|&v| v > 0.0);

	if volume.is_empty() || !(all_negative || all_positive) {
		return false;
	}

	warn!("All values in the SDF volume have the same sign, centering on the mean");

	let mean = (volume.iter().map(|&v| f64::from(v)).sum::<f64>() / volume.len() as f64) as f32;
	for value in volume.iter_mut() {
		*value -= mean;
	}

	true
}

/// Naive surface nets.
///
/// One vertex per grid cell that straddles the level, placed at the mean of the edge crossings,
/// and one quad (two triangles) per grid edge with a sign change, joining the four cells around
/// it. The result is closed wherever the surface doesn't touch the grid boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfaceNets;

/// Pairs of cell corners joined by a cube edge, corner `i` sits at offset
/// `(i & 1, (i >> 1) & 1, (i >> 2) & 1)`.
const CUBE_EDGES: [(usize, usize); 12] = [
	(0, 1),
	(2, 3),
	(4, 5),
	(6, 7),
	(0, 2),
	(1, 3),
	(4, 6),
	(5, 7),
	(0, 4),
	(1, 5),
	(2, 6),
	(3, 7),
];

const NO_VERTEX: u32 = u32::MAX;

impl IsosurfaceExtractor for SurfaceNets {
	fn extract(&self, volume: &[f32], grid: &VoxelGrid, level: f32) -> Result<Mesh> {
		if volume.len() != grid.len() {
			return Err(Error::VolumeSize {
				expected: grid.len(),
				actual: volume.len(),
			});
		}

		let r = grid.resolution();
		let cells = r - 1;
		let cell_index = |c: [usize; 3]| (c[0] * cells + c[1]) * cells + c[2];
		let inside = |x: usize, y: usize, z: usize| volume[grid.flat_index(x, y, z)] > level;

		let mut vertices = Vec::new();
		let mut cell_vertices = vec![NO_VERTEX; cells * cells * cells];

		for x in 0..cells {
			for y in 0..cells {
				for z in 0..cells {
					let corners: [f32; 8] = std::array::from_fn(|i| {
						volume[grid.flat_index(x + (i & 1), y + ((i >> 1) & 1), z + ((i >> 2) & 1))]
					});

					if let Some(position) = cell_vertex(&corners, level) {
						#[allow(clippy::cast_precision_loss)]
						let origin = [x as f32, y as f32, z as f32];
						#[allow(clippy::cast_possible_truncation)]
						let vertex = vertices.len() as u32;
						cell_vertices[cell_index([x, y, z])] = vertex;
						vertices.push(grid.to_world([
							origin[0] + position[0],
							origin[1] + position[1],
							origin[2] + position[2],
						]));
					}
				}
			}
		}

		let mut faces = Vec::new();

		// Edges along `axis` that have all four surrounding cells inside the grid
		for axis in 0..3 {
			let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);

			for a in 0..cells {
				for b in 1..cells {
					for c in 1..cells {
						let mut start = [0; 3];
						start[axis] = a;
						start[u] = b;
						start[v] = c;
						let mut end = start;
						end[axis] += 1;

						let start_inside = inside(start[0], start[1], start[2]);
						if start_inside == inside(end[0], end[1], end[2]) {
							continue;
						}

						// Counter-clockwise around +axis
						let quad = [(-1, -1), (0, -1), (0, 0), (-1, 0)].map(|(du, dv): (isize, isize)| {
							let mut cell = start;
							cell[u] = cell[u].wrapping_add_signed(du);
							cell[v] = cell[v].wrapping_add_signed(dv);
							cell_vertices[cell_index(cell)]
						});

						if quad.contains(&NO_VERTEX) {
							continue;
						}

						// Normals point from inside to outside
						let [q0, q1, q2, q3] = quad;
						if start_inside {
							faces.push([q0, q1, q2]);
							faces.push([q0, q2, q3]);
						} else {
							faces.push([q0, q2, q1]);
							faces.push([q0, q3, q2]);
						}
					}
				}
			}
		}

		if faces.is_empty() {
			return Err(Error::EmptySurface);
		}

		debug!(
			vertices = vertices.len(),
			faces = faces.len(),
			resolution = r,
			"Extracted isosurface"
		);

		Mesh::new(vertices, faces)
	}
}

/// Position of the cell vertex in cell local coordinates, `None` when the cell doesn't
/// straddle the level.
fn cell_vertex(corners: &[f32; 8], level: f32) -> Option<[f32; 3]> {
	let mut sum = [0.0_f32; 3];
	let mut crossings = 0_u8;

	for &(a, b) in &CUBE_EDGES {
		let (va, vb) = (corners[a], corners[b]);
		if (va > level) == (vb > level) {
			continue;
		}

		let t = (level - va) / (vb - va);
		for (axis, total) in sum.iter_mut().enumerate() {
			let (pa, pb) = (((a >> axis) & 1) as f32, ((b >> axis) & 1) as f32);
			*total += t.mul_add(pb - pa, pa);
		}
		crossings += 1;
	}

	(crossings > 0).then(|| sum.map(|total| total / f32::from(crossings)))
}
