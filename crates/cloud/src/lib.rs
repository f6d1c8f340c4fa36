//! Resource proxy: the only code in the workspace that talks to the cloud.
//!
//! [`ResourceProxy`] implements [`opsgate_core::OperationExecutor`] on top of two read-only
//! seams, [`ManagementApi`] and [`ClusterApi`], with HTTP implementations for production
//! and in-memory ones for tests and demos.

pub mod arm;
pub mod costs;
mod http;
pub mod identity;
pub mod kube;
pub mod memory;
pub mod proxy;
pub mod snapshot;

pub use arm::{ArmClient, ManagementApi};
pub use kube::{ClusterApi, ClusterConnector, HttpClusterConnector, Kubeconfig};
pub use memory::{InMemoryCluster, InMemoryConnector, InMemoryControlPlane};
pub use proxy::{ProxySettings, ResourceProxy};
