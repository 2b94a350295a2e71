#![cfg_attr(docsrs, feature(doc_cfg))]
//! # halo-update
//!
//! halo-update builds persistent communication plans for irregular halo
//! exchanges. Each process owns one equal-size contiguous block of a global
//! index space and, every iteration, wants fresh copies of a fixed set of
//! indices owned by other processes.
//!
//! Setup resolves owners once, announces each process's requests to their
//! owners and records a compact plan. Update replays that plan as a single
//! neighbor exchange using run-length block descriptors cached per element
//! size. Free retires the plan; a freed handle stays detectable.
//!
//! ## Buffer layout
//! An Update buffer holds `num_owned + num_needed` elements. The first
//! `num_owned` are this process's own data. The rest receive remote values
//! ordered by ascending owner rank, then ascending global index.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! halo-update = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! ```
//! use halo_update::prelude::*;
//!
//! let mut ctx = UpdateContext::new(NoComm);
//! let id = ctx.setup(0, 0, 4, &[1, 2]).unwrap();
//! let mut data = vec![1.0f64, 2.0, 3.0, 4.0];
//! ctx.update(&mut data, id).unwrap();
//! ctx.free(id).unwrap();
//! ```
//!
//! Backends: [`NoComm`](algs::communicator::NoComm) for serial runs,
//! `RayonComm` for an in-process multi-rank world (feature `rayon`), and
//! `MpiComm` for real distributed runs (feature `mpi-support`).

pub mod algs;
pub mod context;
pub mod debug_invariants;
pub mod element;
pub mod index_space;
pub mod plan;
pub mod update_error;

pub use context::{UpdateConfig, UpdateContext};
pub use debug_invariants::DebugInvariants;
pub use update_error::UpdateError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    #[cfg(feature = "rayon")]
    pub use crate::algs::communicator::RayonComm;
    pub use crate::algs::exchange::BulkExchange;
    pub use crate::context::{UpdateConfig, UpdateContext};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::element::{ElementKind, ElementSize};
    pub use crate::index_space::IndexSpace;
    pub use crate::plan::{Block, NeighborTopology, Plan, PlanId, PlanSummary, UpdateDescriptors};
    pub use crate::update_error::UpdateError;
}
