//! Integration tests for vidopt
//!
//! Runs the pipeline engine against the simulated platform and checks the
//! behaviour visible at the seams: what the writer received, which
//! resources were released and in what order, and what the caller saw.

#[path = "integration/mux_gating.rs"]
mod mux_gating;
#[path = "integration/progress_properties.rs"]
mod progress_properties;
#[path = "integration/resource_teardown.rs"]
mod resource_teardown;
#[path = "integration/scenario_runs.rs"]
mod scenario_runs;
#[path = "integration/strategy_bounds.rs"]
mod strategy_bounds;
