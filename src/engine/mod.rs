//! Engine modules: the decision functions that turn normalized parameters
//! into resources.
//!
//! Each function is pure and independent of the others. It returns its own
//! `ResourcePlan` fragment plus the ids the planner needs to wire edges
//! across fragments.

pub mod config;
pub mod install;
pub mod service;
