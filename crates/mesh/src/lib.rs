//!
//! # PointForge Mesh
//!
//! Everything that happens after the generative models are done: the [`PointCloud`] they produce,
//! the [`VoxelGrid`] an implicit surface is sampled on, isosurface extraction into a [`Mesh`],
//! nearest neighbour color transfer and the plain text colored OBJ export.
//!

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod color;
mod error;
mod grid;
mod isosurface;
mod mesh;
mod obj;
mod point_cloud;

pub use color::{normalize_colors, transfer_colors};
pub use error::{Error, Result};
pub use grid::VoxelGrid;
pub use isosurface::{center_constant_volume, IsosurfaceExtractor, SurfaceNets};
pub use mesh::Mesh;
pub use obj::{save_colored_obj, write_colored_obj, ObjSummary};
pub use point_cloud::{PointCloud, COLOR_CHANNELS};
