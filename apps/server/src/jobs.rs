//! Mesh generation jobs, run one at a time by a single worker in submission order.

use crate::error::ApiError;

use pf_ai::ImageToMesh;
use pf_images::RgbImage;

use std::{
	collections::{HashMap, VecDeque},
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex as StdMutex,
	},
	time::Duration,
};

use async_channel as chan;
use serde::Serialize;
use thiserror::Error;
use tokio::{
	sync::{oneshot, Mutex, RwLock},
	task::{spawn_blocking, JoinError, JoinHandle},
	time::timeout,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Running,
	Done { filename: String },
	Failed { error: String },
	TimedOut,
}

#[derive(Error, Debug)]
pub enum JobError {
	#[error(transparent)]
	Pipeline(#[from] pf_ai::Error),
	#[error("job exceeded its time limit of {0:?}")]
	TimedOut(Duration),
	#[error("job worker failed: {0}")]
	Worker(#[from] JoinError),
}

impl JobError {
	fn status(&self) -> JobStatus {
		match self {
			Self::TimedOut(_) => JobStatus::TimedOut,
			Self::Pipeline(e) if e.is_missing_colors() => JobStatus::Failed {
				error: ApiError::MissingColors.public_message(),
			},
			Self::Pipeline(_) | Self::Worker(_) => JobStatus::Failed {
				error: "Mesh generation failed".to_string(),
			},
		}
	}
}

impl From<JobError> for ApiError {
	fn from(e: JobError) -> Self {
		match e {
			JobError::Pipeline(e) if e.is_missing_colors() => Self::MissingColors,
			JobError::Pipeline(e) => Self::Generation(e),
			JobError::TimedOut(_) => Self::Timeout,
			JobError::Worker(e) => Self::Join(e),
		}
	}
}

/// An image waiting to become `<data dir>/generated_models/<output_name>`
#[derive(Debug)]
pub struct JobRequest {
	pub image: RgbImage,
	pub output_name: String,
}

struct Job {
	id: Uuid,
	request: JobRequest,
	done_tx: oneshot::Sender<Result<String, JobError>>,
}

/// Handle on a submitted job, dropping it leaves the job running
#[derive(Debug)]
pub struct JobTicket {
	pub id: Uuid,
	done_rx: oneshot::Receiver<Result<String, JobError>>,
}

impl JobTicket {
	/// Wait for the job and get the written mesh file name back
	pub async fn wait(self) -> Result<String, ApiError> {
		self.done_rx
			.await
			.map_err(|_| ApiError::ShuttingDown)?
			.map_err(Into::into)
	}
}

/// Status of every live job plus the most recent `history` finished ones
#[derive(Debug)]
struct JobBoard {
	statuses: HashMap<Uuid, JobStatus>,
	finished: VecDeque<Uuid>,
	history: usize,
}

impl JobBoard {
	fn new(history: usize) -> Self {
		Self {
			statuses: HashMap::new(),
			finished: VecDeque::new(),
			history: history.max(1),
		}
	}

	fn set(&mut self, id: Uuid, status: JobStatus) {
		self.statuses.insert(id, status);
	}

	/// Record a terminal status, evicting the oldest finished jobs past the history limit
	fn finish(&mut self, id: Uuid, status: JobStatus) {
		self.statuses.insert(id, status);
		self.finished.push_back(id);

		while self.finished.len() > self.history {
			if let Some(evicted) = self.finished.pop_front() {
				self.statuses.remove(&evicted);
			}
		}
	}

	fn remove(&mut self, id: &Uuid) {
		self.statuses.remove(id);
	}

	fn get(&self, id: &Uuid) -> Option<&JobStatus> {
		self.statuses.get(id)
	}
}

type Statuses = Arc<RwLock<JobBoard>>;

#[derive(Debug)]
pub struct JobQueue {
	jobs_tx: chan::Sender<Job>,
	jobs_rx: chan::Receiver<Job>,
	statuses: Statuses,
	handle: StdMutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
	/// Start the worker. `device_lock` is held for the whole run of each job, so anything else
	/// touching the models must take it too. Only the last `history` finished jobs keep their
	/// status around.
	#[must_use]
	pub fn new(
		pipeline: Arc<ImageToMesh>,
		output_dir: PathBuf,
		device_lock: Arc<Mutex<()>>,
		capacity: usize,
		job_timeout: Duration,
		history: usize,
	) -> Self {
		let (jobs_tx, jobs_rx) = chan::bounded(capacity.max(1));
		let statuses = Arc::new(RwLock::new(JobBoard::new(history)));

		let handle = tokio::spawn(worker(
			Worker {
				pipeline,
				output_dir,
				device_lock,
				job_timeout,
				statuses: Arc::clone(&statuses),
			},
			jobs_rx.clone(),
		));

		Self {
			jobs_tx,
			jobs_rx,
			statuses,
			handle: StdMutex::new(Some(handle)),
		}
	}

	/// Queue a job without waiting for room, a full queue is reported right away.
	pub async fn submit(&self, request: JobRequest) -> Result<JobTicket, ApiError> {
		let id = Uuid::new_v4();
		let (done_tx, done_rx) = oneshot::channel();

		self.statuses.write().await.set(id, JobStatus::Queued);

		if let Err(e) = self.jobs_tx.try_send(Job {
			id,
			request,
			done_tx,
		}) {
			self.statuses.write().await.remove(&id);

			return Err(if e.is_full() {
				warn!(%id, "Job queue is full, rejecting job");
				ApiError::QueueFull
			} else {
				ApiError::ShuttingDown
			});
		}

		debug!(%id, queued = self.jobs_tx.len(), "Job queued");

		Ok(JobTicket { id, done_rx })
	}

	pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
		self.statuses.read().await.get(&id).cloned()
	}

	/// Stop taking jobs, drop the ones still waiting and let the running one finish
	pub async fn shutdown(&self) -> Result<(), JoinError> {
		self.jobs_tx.close();

		let mut dropped = 0;
		while let Ok(Job { id, .. }) = self.jobs_rx.try_recv() {
			self.statuses.write().await.finish(
				id,
				JobStatus::Failed {
					error: ApiError::ShuttingDown.public_message(),
				},
			);
			dropped += 1;
		}

		if dropped > 0 {
			warn!(dropped, "Dropped queued jobs on shutdown");
		}

		let handle = self
			.handle
			.lock()
			.ok()
			.and_then(|mut handle| handle.take());

		if let Some(handle) = handle {
			handle.await?;
		}

		Ok(())
	}
}

struct Worker {
	pipeline: Arc<ImageToMesh>,
	output_dir: PathBuf,
	device_lock: Arc<Mutex<()>>,
	job_timeout: Duration,
	statuses: Statuses,
}

async fn worker(worker: Worker, jobs_rx: chan::Receiver<Job>) {
	while let Ok(Job {
		id,
		request,
		done_tx,
	}) = jobs_rx.recv().await
	{
		worker.statuses.write().await.set(id, JobStatus::Running);
		info!(%id, output = %request.output_name, "Job started");

		let result = worker.run(request).await;

		let status = match &result {
			Ok(filename) => {
				info!(%id, %filename, "Job done");
				JobStatus::Done {
					filename: filename.clone(),
				}
			}
			Err(e) => {
				error!(%id, "Job failed: {e:#?}");
				e.status()
			}
		};

		worker.statuses.write().await.finish(id, status);

		if done_tx.send(result).is_err() {
			debug!(%id, "Nobody waiting on job result");
		}
	}

	debug!("Job queue closed, worker exiting");
}

impl Worker {
	async fn run(&self, JobRequest { image, output_name }: JobRequest) -> Result<String, JobError> {
		let output = self.output_dir.join(&output_name);
		let _device = self.device_lock.lock().await;

		let cancel = Arc::new(AtomicBool::new(false));
		let mut task = spawn_blocking({
			let pipeline = Arc::clone(&self.pipeline);
			let cancel = Arc::clone(&cancel);
			let output = output.clone();
			move || pipeline.run(&image, &output, &cancel)
		});

		match timeout(self.job_timeout, &mut task).await {
			Ok(joined) => {
				let summary = joined??;
				debug!(vertices = summary.vertices, faces = summary.faces, "Mesh written");
				Ok(output_name)
			}
			Err(_) => {
				warn!(output = %output.display(), limit = ?self.job_timeout, "Job timed out, cancelling");
				cancel.store(true, Ordering::Relaxed);

				// The pipeline only notices between steps, wait for it so the device is free again.
				// A cancelled pipeline never moves its mesh into place, so a success here means
				// the mesh was already complete when the limit hit.
				match task.await {
					Ok(Ok(_)) => {
						warn!(output = %output.display(), "Job finished right at its time limit, keeping the mesh");
						Ok(output_name)
					}
					_ => Err(JobError::TimedOut(self.job_timeout)),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn board_forgets_the_oldest_finished_jobs() {
		let mut board = JobBoard::new(2);
		let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

		for id in ids {
			board.set(id, JobStatus::Queued);
		}

		board.finish(ids[0], JobStatus::TimedOut);
		board.finish(
			ids[1],
			JobStatus::Done {
				filename: "cat.obj".to_string(),
			},
		);
		board.finish(
			ids[2],
			JobStatus::Failed {
				error: "Mesh generation failed".to_string(),
			},
		);

		assert_eq!(board.get(&ids[0]), None);
		assert!(matches!(board.get(&ids[1]), Some(JobStatus::Done { .. })));
		assert!(matches!(board.get(&ids[2]), Some(JobStatus::Failed { .. })));
		// Unfinished jobs never count against the history
		assert_eq!(board.get(&ids[3]), Some(&JobStatus::Queued));
	}
}
