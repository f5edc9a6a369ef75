//! The `ktree` command line: browse resource schemas and live objects
//! across the contexts of a kubeconfig.

pub mod commands;
pub mod output;
pub mod telemetry;
