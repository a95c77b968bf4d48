//! flotilla-autoscale — load-driven replica scaling.
//!
//! A periodic control loop over every `active` deployment: compute the
//! mean CPU usage of its `active` replicas, then add or remove one replica
//! when the average leaves the target band.
//!
//! # Scaling rules
//!
//! ```text
//! avg = mean(cpu of active replicas), 0 when none
//!
//! scale up   iff avg > threshold        and replicas < max
//!                                       and scale-up cooldown elapsed
//! scale down iff avg < threshold / 2    and replicas > min
//!                                       and scale-down cooldown elapsed
//! ```
//!
//! The half-threshold asymmetry is a dead band: an average between
//! `threshold/2` and `threshold` changes nothing. Independent up/down
//! cooldowns damp oscillation. At most one action per deployment per tick.

pub mod controller;

pub use controller::{ScaleDecision, ScalerConfig, ScalingController};
