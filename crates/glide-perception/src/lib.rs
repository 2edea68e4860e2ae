//! `glide-perception` – Motion state from noisy observations.
//!
//! Turns the detection pipeline's latent, quantized position samples into
//! the quantities the control loops reason with.
//!
//! # Modules
//!
//! - [`velocity`] – [`VelocityEstimator`][velocity::VelocityEstimator]:
//!   delay-weighted EMA velocity with staleness and reset tracking.
//! - [`deceleration`] – [`DecelerationModel`][deceleration::DecelerationModel]
//!   and [`CalibrationContext`][deceleration::CalibrationContext]: the
//!   self-calibrating coast-time predictor, one per movement profile.

pub mod deceleration;
pub mod velocity;

pub use deceleration::{CalibrationContext, DecelerationConfig, DecelerationModel};
pub use velocity::{VelocityConfig, VelocityEstimate, VelocityEstimator};
