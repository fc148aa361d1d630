use crate::{
	error::{Error, Result},
	point_cloud::PointCloud,
};

/// Bring colors into `[0, 1]`.
///
/// If any component of any color is above `1.0` the whole set is taken to be 8-bit and divided
/// by 255. The decision is made once for all colors, never per point. Components are clamped
/// afterwards, so already normalized input is returned untouched.
#[must_use]
pub fn normalize_colors(mut colors: Vec<[f32; 3]>) -> Vec<[f32; 3]> {
	let is_8bit = colors.iter().flatten().any(|&c| c > 1.0);

	for component in colors.iter_mut().flatten() {
		if is_8bit {
			*component /= 255.0;
		}
		*component = component.clamp(0.0, 1.0);
	}

	colors
}

/// Assign every vertex the normalized color of its nearest point in `cloud`.
pub fn transfer_colors(vertices: &[[f32; 3]], cloud: &PointCloud) -> Result<Vec<[f32; 3]>> {
	let colors = normalize_colors(cloud.colors()?);

	vertices
		.iter()
		.map(|vertex| {
			cloud
				.nearest_point(*vertex)
				.map(|index| colors[index])
				.ok_or(Error::EmptyPointCloud)
		})
		.collect()
}
