use std::{fmt::Display, path::Path};

use thiserror::Error;
use tracing::error;

/// Report an error with tracing
pub fn report_error(res: &Result<(), impl Display>) {
	if let Err(e) = res {
		error!("{e:#}");
	}
}

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub maybe_context: Option<String>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.as_ref()
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl<P: AsRef<Path>> From<(P, std::io::Error)> for FileIOError {
	fn from((path, source): (P, std::io::Error)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}
}

impl<P: AsRef<Path>> From<(P, std::io::Error, &'static str)> for FileIOError {
	fn from((path, source, context): (P, std::io::Error, &'static str)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(context.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_context_and_path() {
		let err = FileIOError::from((
			"/tmp/models/sdf.onnx",
			std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
			"Failed to open model",
		));

		let rendered = err.to_string();
		assert!(rendered.contains("(Failed to open model)"));
		assert!(rendered.contains("/tmp/models/sdf.onnx"));
		assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
	}

	#[test]
	fn display_without_context() {
		let err = FileIOError::from((
			"out.obj",
			std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
		));

		assert_eq!(err.to_string(), "file I/O error: nope; path: 'out.obj'");
	}
}
