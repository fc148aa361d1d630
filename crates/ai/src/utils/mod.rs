use std::{
	env::{args_os, current_exe},
	path::{Path, PathBuf},
};
use tracing::{error, warn};

/// Resolve `path` against the directory holding the running binary, falling back to the raw
/// path when that directory can't be determined.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn get_path_relative_to_exe(path: impl AsRef<Path>) -> PathBuf {
	let exe = current_exe().map_or_else(
		|e| {
			error!("Failed to get current exe path: {e:#?}");
			args_os().next().map(PathBuf::from)
		},
		Some,
	);

	exe.as_deref()
		.and_then(Path::parent)
		.map(|parent_path| {
			let path = parent_path.join(path.as_ref());

			path.canonicalize().unwrap_or_else(|e| {
				warn!("Failed to canonicalize relative path to exe, return raw path and hope: {e:#?}");
				path
			})
		})
		.unwrap_or_else(|| path.as_ref().to_path_buf())
}
