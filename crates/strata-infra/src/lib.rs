//! GKE platform stack for strata
//!
//! Declares the platform (network, cluster, node pool) and the in-cluster
//! tiers on top of it as a [`strata_graph`] resource graph, synthesizes the
//! kubeconfig the cluster-scoped backends connect with, and provides
//! simulated GCP backends for dry runs and tests.

#![deny(missing_docs)]

pub mod deploy;
pub mod kubeconfig;
pub mod settings;
pub mod simulation;
pub mod stack;

pub use deploy::{deploy, plan};
pub use kubeconfig::{context_name, kubeconfig_value, render_kubeconfig, Kubeconfig};
pub use settings::{ClusterSettings, ExecutorSettings, StackSettings, TierSettings};
pub use simulation::SimulatedCloud;
pub use stack::declare_stack;
