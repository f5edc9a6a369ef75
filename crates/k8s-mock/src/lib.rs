//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.

pub mod discovery;
mod helpers;
pub mod http;
mod openapi;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{merge_kubeconfigs, HttpMockK8sServer, RunningHttpMockK8sServer};
