use crate::error::Error;

use pf_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use futures::StreamExt;
use reqwest::Client;
use tokio::{fs, io::AsyncWriteExt, time::sleep};
use tracing::{debug, error, info, warn};
use url::Url;

const DOWNLOAD_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Make sure `file_name` is present in `cache_dir`, fetching it from `base_url` when missing.
///
/// Downloads land in a `.download` sibling first and are only renamed into place once complete,
/// so a file in the cache is always a whole one.
pub(crate) async fn ensure_model(
	client: &Client,
	cache_dir: &Path,
	file_name: &str,
	base_url: Option<&Url>,
) -> Result<PathBuf, Error> {
	let path = cache_dir.join(file_name);

	if fs::try_exists(&path)
		.await
		.map_err(|e| FileIOError::from((&path, e, "Failed to probe model cache")))?
	{
		debug!(path = %path.display(), "Model found in cache");
		return Ok(path);
	}

	let Some(base_url) = base_url else {
		return Err(Error::ModelNotFound {
			name: file_name.to_string(),
			path,
		});
	};

	fs::create_dir_all(cache_dir)
		.await
		.map_err(|e| FileIOError::from((cache_dir, e, "Failed to create model cache")))?;

	let url = model_url(base_url, file_name)?;
	let partial = cache_dir.join(format!("{file_name}.download"));

	let mut attempt = 1;
	loop {
		info!(%url, attempt, "Downloading model");

		match download(client, &url, &partial).await {
			Ok(bytes) => {
				fs::rename(&partial, &path)
					.await
					.map_err(|e| FileIOError::from((&path, e, "Failed to move model into cache")))?;

				info!(path = %path.display(), bytes, "Downloaded model");
				return Ok(path);
			}
			Err(e) => {
				if let Err(remove_error) = fs::remove_file(&partial).await {
					if remove_error.kind() != std::io::ErrorKind::NotFound {
						error!(
							"{:#?}",
							FileIOError::from((&partial, remove_error, "Failed to remove partial download"))
						);
					}
				}

				if attempt >= DOWNLOAD_ATTEMPTS {
					return Err(e);
				}

				warn!(%url, attempt, ?e, "Model download failed, retrying");
				sleep(RETRY_DELAY * attempt).await;
				attempt += 1;
			}
		}
	}
}

/// `file_name` resolved against `base_url` as a directory, with or without a trailing slash.
fn model_url(base_url: &Url, file_name: &str) -> Result<Url, Error> {
	let mut base = base_url.clone();
	if !base.path().ends_with('/') {
		base.set_path(&format!("{}/", base.path()));
	}

	Ok(base.join(file_name)?)
}

async fn download(client: &Client, url: &Url, to: &Path) -> Result<u64, Error> {
	let response = client.get(url.clone()).send().await?.error_for_status()?;

	let mut file = fs::File::create(to)
		.await
		.map_err(|e| FileIOError::from((to, e, "Failed to create model file")))?;

	let mut written = 0;
	let mut stream = response.bytes_stream();
	while let Some(chunk) = stream.next().await {
		let chunk = chunk?;
		file.write_all(&chunk)
			.await
			.map_err(|e| FileIOError::from((to, e, "Failed to write model file")))?;
		written += chunk.len() as u64;
	}

	file.flush()
		.await
		.map_err(|e| FileIOError::from((to, e, "Failed to flush model file")))?;

	Ok(written)
}

#[cfg(test)]
mod tests {
	use super::*;

	use tracing_test::traced_test;

	#[test]
	fn joins_file_names_onto_directories() {
		let with_slash = Url::parse("https://models.example.com/pointforge/").unwrap();
		let without_slash = Url::parse("https://models.example.com/pointforge").unwrap();

		for base in [with_slash, without_slash] {
			assert_eq!(
				model_url(&base, "base40M.onnx").unwrap().as_str(),
				"https://models.example.com/pointforge/base40M.onnx"
			);
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn cached_models_are_not_fetched() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("upsample.onnx"), b"weights").unwrap();

		let path = ensure_model(&Client::new(), dir.path(), "upsample.onnx", None)
			.await
			.unwrap();
		assert_eq!(path, dir.path().join("upsample.onnx"));
		assert!(logs_contain("Model found in cache"));
	}

	#[tokio::test]
	async fn missing_models_without_a_source_are_fatal() {
		let dir = tempfile::tempdir().unwrap();

		let err = ensure_model(&Client::new(), dir.path(), "base40M.onnx", None)
			.await
			.unwrap_err();
		assert!(matches!(err, Error::ModelNotFound { name, .. } if name == "base40M.onnx"));
	}
}
