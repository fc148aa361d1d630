#![allow(dead_code)]

use pf_ai::{Captioner, Device, Error, ModelBank, PointCloudGenerator, Progress, SdfModel};
use pf_mesh::{PointCloud, VoxelGrid};
use pf_server::{router, AppState, Config};

use std::{
	collections::BTreeMap,
	io::Cursor,
	ops::ControlFlow,
	path::PathBuf,
	sync::{atomic::AtomicBool, Arc},
	thread,
	time::{Duration, Instant},
};

use axum::{
	body::{to_bytes, Body},
	http::{header, Request, StatusCode},
	Router,
};
use clap::Parser;
use image::{ImageOutputFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "pointforge-test-boundary";

/// Points on a sphere of radius 0.3, red above the equator and blue below
pub struct SphereCloud {
	pub channels: &'static [&'static str],
	/// Keep reporting progress until told to stop instead of finishing
	pub stall: bool,
}

impl SphereCloud {
	pub const fn colored() -> Self {
		Self {
			channels: &["R", "G", "B"],
			stall: false,
		}
	}

	pub const fn without_blue() -> Self {
		Self {
			channels: &["R", "G"],
			stall: false,
		}
	}

	pub const fn stalled() -> Self {
		Self {
			channels: &["R", "G", "B"],
			stall: true,
		}
	}
}

impl PointCloudGenerator for SphereCloud {
	fn generate(
		&self,
		_image: &RgbImage,
		on_progress: &mut dyn FnMut(Progress<'_>) -> ControlFlow<()>,
	) -> Result<PointCloud, Error> {
		let samples = ndarray::Array3::zeros((1, 6, 1));
		let started = Instant::now();

		for step in 0.. {
			let progress = Progress {
				stage: 0,
				stages: 1,
				step,
				steps: 1,
				sigma: 1.0,
				pred_xstart: samples.view(),
			};

			if on_progress(progress).is_break() {
				return Err(Error::Cancelled);
			}

			if !self.stall || started.elapsed() > Duration::from_secs(3) {
				break;
			}

			thread::sleep(Duration::from_millis(20));
		}

		let coords = (0..300)
			.map(|i| {
				let (theta, phi) = (i as f32 * 0.7, (i as f32 / 300.0).mul_add(2.0, -1.0).acos());
				[
					0.3 * phi.sin() * theta.cos(),
					0.3 * phi.sin() * theta.sin(),
					0.3 * phi.cos(),
				]
			})
			.collect::<Vec<_>>();

		let channels = self
			.channels
			.iter()
			.map(|&name| {
				let values = coords
					.iter()
					.map(|[_, _, z]| match name {
						"R" if *z > 0.0 => 255.0,
						"B" if *z <= 0.0 => 255.0,
						_ => 0.0,
					})
					.collect();
				(name.to_string(), values)
			})
			.collect::<BTreeMap<_, _>>();

		Ok(PointCloud::new(coords, channels)?)
	}
}

/// Exact SDF of the sphere above, positive inside
pub struct SphereSdf;

impl SdfModel for SphereSdf {
	fn sdf_volume(
		&self,
		_cloud: &PointCloud,
		grid: &VoxelGrid,
		_cancel: &AtomicBool,
	) -> Result<Vec<f32>, Error> {
		Ok((0..grid.len())
			.map(|i| {
				let [x, y, z] = grid.point(i);
				0.3 - z.mul_add(z, x.mul_add(x, y * y)).sqrt()
			})
			.collect())
	}
}

pub struct FixedCaption;

impl Captioner for FixedCaption {
	fn caption(&self, image: &RgbImage) -> Result<String, Error> {
		if image.width() == 0 || image.height() == 0 {
			return Err(pf_images::Error::Empty.into());
		}

		Ok("a red square on a white background".to_string())
	}
}

pub struct TestServer {
	pub app: Router,
	pub state: AppState,
	pub config: Config,
	_dir: TempDir,
}

impl TestServer {
	pub async fn start(generator: SphereCloud, extra_args: &[&str]) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let data_dir = dir.path().to_str().unwrap().to_string();

		let mut args = vec!["pointforge", "--data-dir", data_dir.as_str(), "--grid-size", "24"];
		args.extend_from_slice(extra_args);
		let config = Config::parse_from(args);
		config.create_dirs().await.unwrap();

		let bank = ModelBank::from_parts(
			Device::Cpu,
			Arc::new(generator),
			Arc::new(SphereSdf),
			Arc::new(FixedCaption),
		);
		let grid = VoxelGrid::with_resolution(config.grid_size).unwrap();

		let state = AppState::new(bank.image_to_mesh(grid), bank.captioner(), &config);
		let app = router(state.clone(), config.max_upload_bytes);

		Self {
			app,
			state,
			config,
			_dir: dir,
		}
	}

	pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
		let response = self.app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let headers = response.headers().clone();
		let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

		(status, body.to_vec(), headers)
	}

	pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
		let (status, body, _) = self.send(request).await;

		(status, serde_json::from_slice(&body).unwrap())
	}

	pub fn uploads(&self) -> Vec<PathBuf> {
		list(&self.config.uploads_dir())
	}

	pub fn outputs(&self) -> Vec<PathBuf> {
		list(&self.config.output_dir())
	}
}

fn list(dir: &std::path::Path) -> Vec<PathBuf> {
	std::fs::read_dir(dir)
		.unwrap()
		.map(|entry| entry.unwrap().path())
		.collect()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
	let image = RgbImage::from_fn(width, height, |x, y| {
		if (width / 4..3 * width / 4).contains(&x) && (height / 4..3 * height / 4).contains(&y) {
			Rgb([220, 20, 20])
		} else {
			Rgb([255, 255, 255])
		}
	});

	let mut buf = Cursor::new(Vec::new());
	image.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
	buf.into_inner()
}

/// `POST uri` with a single file field
pub fn multipart(uri: &str, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
	let mut body = format!(
		"--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
	)
	.into_bytes();
	body.extend_from_slice(data);
	body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

	Request::post(uri)
		.header(
			header::CONTENT_TYPE,
			format!("multipart/form-data; boundary={BOUNDARY}"),
		)
		.body(Body::from(body))
		.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
	Request::get(uri).body(Body::empty()).unwrap()
}
