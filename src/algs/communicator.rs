//! Thin layer over intra-process (Rayon) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange stages post
//! every receive and send first and only then call `.wait()`.

use serde::{Deserialize, Serialize};

/// Non-blocking point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`. The bytes are copied before returning.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `buf.len()` bytes from `peer`.
    /// The payload is delivered by [`Wait::wait`], not written into `buf`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) {}

    /// True for the serial stand-in that never moves data.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Message tag, kept distinct per exchange stage and per plan.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    /// Largest tag every MPI library accepts (`MPI_TAG_UB` is at least 32767).
    pub const MAX: CommTag = CommTag(32767);

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `n` steps after this one, wrapping inside the `u16` space.
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        CommTag(self.0.wrapping_add(n))
    }
}

/// Tags used by the two announcement stages of one Setup call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetupCommTags {
    pub sizes: CommTag,
    pub indices: CommTag,
}

impl SetupCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            indices: base.offset(1),
        }
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
#[cfg(feature = "rayon")]
mod rayon_backend {
    use super::{Communicator, Wait};
    use bytes::Bytes;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::sync::{Arc, Barrier};

    type Key = (usize, usize, u16); // (src, dst, tag)
    type Mailbox = DashMap<Key, VecDeque<Bytes>>;

    /// One rank of an in-process SPMD world. Ranks of the same world share a
    /// mailbox; messages between a pair of ranks on one tag arrive in FIFO order.
    #[derive(Clone)]
    pub struct RayonComm {
        rank: usize,
        size: usize,
        mailbox: Arc<Mailbox>,
        barrier: Arc<Barrier>,
    }

    impl std::fmt::Debug for RayonComm {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RayonComm")
                .field("rank", &self.rank)
                .field("size", &self.size)
                .finish()
        }
    }

    impl RayonComm {
        /// Build the `size` ranks of a fresh world.
        pub fn world(size: usize) -> Vec<RayonComm> {
            let mailbox = Arc::new(Mailbox::new());
            let barrier = Arc::new(Barrier::new(size.max(1)));
            (0..size)
                .map(|rank| RayonComm {
                    rank,
                    size,
                    mailbox: Arc::clone(&mailbox),
                    barrier: Arc::clone(&barrier),
                })
                .collect()
        }

        /// Run `op` once per rank of a fresh `size`-rank world, each rank on
        /// its own pool thread, and collect the results in rank order.
        pub fn spmd<R, F>(size: usize, op: F) -> Result<Vec<R>, rayon::ThreadPoolBuildError>
        where
            F: Fn(RayonComm) -> R + Sync,
            R: Send,
        {
            if size == 0 {
                return Ok(Vec::new());
            }
            let comms = Self::world(size);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(size)
                .thread_name(|i| format!("spmd-rank-{i}"))
                .build()?;
            Ok(pool.broadcast(|ctx| op(comms[ctx.index()].clone())))
        }
    }

    pub struct LocalHandle {
        mailbox: Arc<Mailbox>,
        key: Key,
        len: usize,
    }

    impl Wait for LocalHandle {
        fn wait(self) -> Option<Vec<u8>> {
            loop {
                if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                    if let Some(bytes) = queue.pop_front() {
                        let n = bytes.len().min(self.len);
                        return Some(bytes[..n].to_vec());
                    }
                }
                std::thread::yield_now();
            }
        }
    }

    impl Communicator for RayonComm {
        type SendHandle = ();
        type RecvHandle = LocalHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            let key = (self.rank, peer, tag);
            self.mailbox
                .entry(key)
                .or_default()
                .push_back(Bytes::copy_from_slice(buf));
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
            LocalHandle {
                mailbox: Arc::clone(&self.mailbox),
                key: (peer, self.rank, tag),
                len: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.barrier.wait();
        }
    }
}

#[cfg(feature = "rayon")]
pub use rayon_backend::{LocalHandle, RayonComm};

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::update_error::UpdateError;
    use mpi::datatype::UserDatatype;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// World communicator. Dropping it finalizes MPI.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
        /// Indexed send datatypes per descriptor set, see `BulkExchange`.
        pub(crate) send_types: RefCell<BTreeMap<u64, Vec<UserDatatype>>>,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, UpdateError> {
            let universe = mpi::initialize().ok_or(UpdateError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                send_types: RefCell::default(),
                _universe: universe,
            })
        }
    }

    /// Pending send; completes (and releases its staged copy) on wait or drop.
    pub struct MpiSendHandle(Option<Box<dyn FnOnce()>>);

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(finish) = self.0.take() {
                finish();
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(finish) = self.0.take() {
                finish();
            }
        }
    }

    /// Pending receive; yields the bytes actually delivered.
    pub struct MpiRecvHandle(Option<Box<dyn FnOnce() -> Vec<u8>>>);

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            self.0.take().map(|finish| finish())
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(finish) = self.0.take() {
                let _ = finish();
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: `raw` stays allocated until the request has completed below.
            let staged: &'static [u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, staged, i32::from(tag));
            MpiSendHandle(Some(Box::new(move || {
                let _ = req.wait();
                // SAFETY: the request is complete, nothing references `raw` any more.
                drop(unsafe { Box::from_raw(raw) });
            })))
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let raw: *mut [u8] = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            // SAFETY: `raw` is exclusively owned by the request until it completes.
            let staged: &'static mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, staged, i32::from(tag));
            MpiRecvHandle(Some(Box::new(move || {
                let status = req.wait();
                let n = status.count(u8::equivalent_datatype()).max(0) as usize;
                // SAFETY: the request is complete, ownership returns to us.
                let mut data = unsafe { Box::from_raw(raw) }.into_vec();
                data.truncate(n);
                data
            })))
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiRecvHandle, MpiSendHandle};
