use crate::error::{Error, Result};

use std::collections::BTreeMap;

/// Auxiliary channels holding per point color, in `[r, g, b]` order.
pub const COLOR_CHANNELS: [&str; 3] = ["R", "G", "B"];

/// An ordered set of points with named per point scalar channels.
///
/// Every channel holds exactly one value per point, this is checked on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
	coords: Vec<[f32; 3]>,
	channels: BTreeMap<String, Vec<f32>>,
}

impl PointCloud {
	pub fn new(coords: Vec<[f32; 3]>, channels: BTreeMap<String, Vec<f32>>) -> Result<Self> {
		if let Some((channel, values)) = channels
			.iter()
			.find(|(_, values)| values.len() != coords.len())
		{
			return Err(Error::ChannelLength {
				channel: channel.clone(),
				expected: coords.len(),
				actual: values.len(),
			});
		}

		Ok(Self { coords, channels })
	}

	#[must_use]
	pub fn coords(&self) -> &[[f32; 3]] {
		&self.coords
	}

	#[must_use]
	pub fn channel(&self, name: &str) -> Option<&[f32]> {
		self.channels.get(name).map(Vec::as_slice)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.coords.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.coords.is_empty()
	}

	/// Raw per point colors stacked from the `R`, `G` and `B` channels, in whatever range the
	/// producer used.
	pub fn colors(&self) -> Result<Vec<[f32; 3]>> {
		let [r, g, b] = COLOR_CHANNELS;
		let (r, g, b) = (
			self.channel(r).ok_or(Error::MissingColorChannel(r))?,
			self.channel(g).ok_or(Error::MissingColorChannel(g))?,
			self.channel(b).ok_or(Error::MissingColorChannel(b))?,
		);

		Ok(r.iter()
			.zip(g)
			.zip(b)
			.map(|((&r, &g), &b)| [r, g, b])
			.collect())
	}

	/// Index of the point closest to `target` by Euclidean distance, the first one wins ties.
	///
	/// Brute force, `O(n)` per query.
	#[must_use]
	pub fn nearest_point(&self, target: [f32; 3]) -> Option<usize> {
		self.coords
			.iter()
			.map(|point| squared_distance(*point, target))
			.enumerate()
			.fold(None, |best: Option<(usize, f32)>, (index, distance)| match best {
				Some((_, best_distance)) if best_distance <= distance => best,
				_ => Some((index, distance)),
			})
			.map(|(index, _)| index)
	}
}

fn squared_distance(a: [f32; 3], b: [f32; 3]) -> f32 {
	let (dx, dy, dz) = (a[0] - b[0], a[1] - b[1], a[2] - b[2]);
	dz.mul_add(dz, dx.mul_add(dx, dy * dy))
}
