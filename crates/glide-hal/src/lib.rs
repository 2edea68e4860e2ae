//! `glide-hal` – Hardware & collaborator seams.
//!
//! Everything the control loops touch in the outside world goes through a
//! trait defined here, so the loops never know whether they are driving a
//! real input backend or the simulator.
//!
//! # Modules
//!
//! - [`keyboard`] – [`KeyActuator`][keyboard::KeyActuator]: physical key
//!   press/release backend.
//! - [`position`] – [`PositionSource`][position::PositionSource],
//!   [`Detector`][position::Detector] and [`Clock`][position::Clock]: the
//!   detection collaborator's outputs and the time base every bounded wait
//!   uses.
//! - [`watch`] – latest-value channel that lets an independent detection
//!   thread publish samples the control loop reads without blocking.
//! - [`sim`] – [`SimWorld`][sim::SimWorld]: a deterministic platformer
//!   simulation implementing every seam, for tests and demos.

pub mod keyboard;
pub mod position;
pub mod sim;
pub mod watch;

pub use keyboard::KeyActuator;
pub use position::{Clock, Detector, PositionSource, SystemClock};
pub use sim::{SimConfig, SimPlatform, SimWorld};
pub use watch::{SamplePublisher, SharedFlags, WatchPositionSource, sample_channel};
