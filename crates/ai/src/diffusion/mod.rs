//! Gaussian diffusion math for point cloud sampling.
//!
//! The networks only predict noise, everything needed to walk from pure noise to a sample lives
//! here: the noise schedule and its derived coefficient tables, channel (un)scaling, and the
//! Karras sampler with Heun steps.

mod gather;
mod karras;
mod schedule;

pub use gather::{CoefficientGather, Float32Gather};
pub use karras::{karras_sigmas, sample_heun, HeunStep, KarrasConfig, KarrasDenoiser};
pub use schedule::{DiffusionConfig, GaussianDiffusion, NoiseSchedule};
