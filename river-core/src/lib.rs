//! Core geometry and growth engine for 2-D river networks.
//!
//! Main components:
//! - [`point`] — points, polar offsets and segment distances.
//! - [`branch`] and [`tree`] — branches and the arena that links them.
//! - [`boundary`] — the marked outer loop and holes of the domain.
//! - [`geometry`] — the validated growth state and the mesh-generator contract.
//! - [`mesh`] and [`field`] — the mesh generator and field solver seams.
//! - [`analytic`] — closed-form field solvers.
//! - [`stencil`] and [`flux_buffer`] — sampling of the field around tips.
//! - [`law`] — growth laws and bifurcation criteria.
//! - [`config`] — growth parameters, loadable from TOML.
//! - [`phases`] — the phases of one growth iteration.
//! - [`model`] — the driver loop.
//! - [`error`] and [`types`] — shared error type, aliases and ids.

pub mod analytic;
pub mod boundary;
pub mod branch;
pub mod config;
pub mod error;
pub mod field;
pub mod flux_buffer;
pub mod geometry;
pub mod law;
pub mod mesh;
pub mod model;
pub mod phases;
pub mod point;
pub mod stencil;
pub mod tree;
pub mod types;
