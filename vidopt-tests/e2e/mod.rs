//! End-to-end tests for vidopt
//!
//! Drive the public engine API the way a front end does: start a transcode,
//! follow its events asynchronously, cancel it, run several at once.

mod transcode_workflow;
