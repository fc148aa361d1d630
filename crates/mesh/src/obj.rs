use crate::{
	color::transfer_colors,
	error::{Error, Result},
	mesh::Mesh,
	point_cloud::PointCloud,
};

use pf_utils::error::FileIOError;

use std::{
	fs,
	io::{self, BufWriter, Write},
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
};

use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjSummary {
	pub vertices: usize,
	pub faces: usize,
}

/// Write `v x y z r g b` lines for every vertex followed by 1-indexed `f i j k` lines.
pub fn write_colored_obj(writer: &mut impl Write, mesh: &Mesh, colors: &[[f32; 3]]) -> io::Result<()> {
	for ([x, y, z], [r, g, b]) in mesh.vertices().iter().zip(colors) {
		writeln!(writer, "v {x} {y} {z} {r} {g} {b}")?;
	}

	for [i, j, k] in mesh.faces() {
		writeln!(
			writer,
			"f {} {} {}",
			u64::from(*i) + 1,
			u64::from(*j) + 1,
			u64::from(*k) + 1
		)?;
	}

	writer.flush()
}

/// Color `mesh` from `cloud` and save it to `path`.
///
/// Colors are resolved before anything touches the disk and the file is written next to
/// `path` and renamed into place, so `path` either holds a complete mesh or is left alone.
/// Once `cancel` is set the rename no longer happens and [`Error::Cancelled`] is returned.
pub fn save_colored_obj(
	path: impl AsRef<Path>,
	mesh: &Mesh,
	cloud: &PointCloud,
	cancel: &AtomicBool,
) -> Result<ObjSummary> {
	let path = path.as_ref();
	let colors = transfer_colors(mesh.vertices(), cloud)?;
	if colors.len() != mesh.vertices().len() {
		return Err(Error::ColorCount(colors.len(), mesh.vertices().len()));
	}

	let partial_path = partial_path(path);

	let written = fs::File::create(&partial_path)
		.map_err(|e| FileIOError::from((&partial_path, e, "Failed to create mesh file")))
		.and_then(|file| {
			write_colored_obj(&mut BufWriter::new(file), mesh, &colors)
				.map_err(|e| FileIOError::from((&partial_path, e, "Failed to write mesh file")))
		})
		.map_err(Error::from)
		.and_then(|()| {
			if cancel.load(Ordering::Relaxed) {
				return Err(Error::Cancelled);
			}

			fs::rename(&partial_path, path)
				.map_err(|e| FileIOError::from((path, e, "Failed to move mesh file into place")).into())
		});

	if let Err(e) = written {
		if let Err(remove_error) = fs::remove_file(&partial_path) {
			if remove_error.kind() != io::ErrorKind::NotFound {
				error!(
					"{:#?}",
					FileIOError::from((&partial_path, remove_error, "Failed to clean up partial mesh"))
				);
			}
		}
		return Err(e);
	}

	debug!(path = %path.display(), vertices = colors.len(), faces = mesh.faces().len(), "Saved colored mesh");

	Ok(ObjSummary {
		vertices: mesh.vertices().len(),
		faces: mesh.faces().len(),
	})
}

fn partial_path(path: &Path) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".part");
	path.with_file_name(name)
}
