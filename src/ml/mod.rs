//! Feature encoding, training and scoring.
//!
//! The encoder is fitted alongside the trees and serialized with them in a
//! [`ModelArtifact`](artifact::ModelArtifact), so prediction reproduces the
//! training-time vectors exactly.

pub mod artifact;
pub mod features;
pub mod metrics;
pub mod predictor;
pub mod tier;
pub mod trainer;
