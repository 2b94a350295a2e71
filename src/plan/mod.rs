//! Persistent communication plans.
//!
//! A [`Plan`] is built once by Setup and then replayed by every Update. It
//! records who this rank receives from, who it sends to, which of its owned
//! indices each destination wants, and a lazily filled descriptor cache per
//! element size. Plans live in a [`PlanRegistry`] and are addressed by
//! [`PlanId`] handles.
//!
//! Buffer layout contract: `[0, num_owned)` holds owned data and
//! `[num_owned, num_owned + num_needed)` receives remote data ordered by
//! ascending source rank, then ascending global index.

pub mod descriptor;
pub mod registry;
pub mod setup;

pub use descriptor::{Block, PartnerBlocks, UpdateDescriptors};
pub use registry::{PlanId, PlanRegistry};

use crate::algs::communicator::CommTag;
use crate::debug_invariants::DebugInvariants;
use crate::element::ElementSize;
use crate::update_error::UpdateError;
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

/// Sparse communication group of a plan: only its real partners.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborTopology {
    sources: Vec<usize>,
    destinations: Vec<usize>,
    tag: CommTag,
}

impl NeighborTopology {
    pub fn new(sources: Vec<usize>, destinations: Vec<usize>, tag: CommTag) -> Self {
        Self {
            sources,
            destinations,
            tag,
        }
    }

    /// Ranks this process receives from, ascending.
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Ranks this process sends to, ascending.
    pub fn destinations(&self) -> &[usize] {
        &self.destinations
    }

    /// Tag reserved for this plan's data messages.
    pub fn tag(&self) -> CommTag {
        self.tag
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.destinations.is_empty()
    }
}

/// Immutable (after Setup) communication blueprint for one update pattern.
#[derive(Debug)]
pub struct Plan {
    domain: u32,
    owner_rank: usize,
    num_ranks: usize,
    start: u64,
    num_owned: usize,
    num_needed: usize,
    partners_recv: Vec<usize>,
    recv_counts: Vec<usize>,
    partners_send: Vec<usize>,
    send_counts: Vec<usize>,
    local_send_indices: Vec<usize>,
    topology: NeighborTopology,
    descriptors: [OnceCell<UpdateDescriptors>; 4],
}

/// Receive half of a plan, as computed from the caller's needed indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecvSide {
    pub partners: Vec<usize>,
    pub counts: Vec<usize>,
}

/// Send half of a plan, as learned from the reverse announcement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendSide {
    pub partners: Vec<usize>,
    pub counts: Vec<usize>,
    pub local_indices: Vec<usize>,
}

impl Plan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        domain: u32,
        owner_rank: usize,
        num_ranks: usize,
        start: u64,
        num_owned: usize,
        recv: RecvSide,
        send: SendSide,
        tag: CommTag,
    ) -> Self {
        let num_needed = recv.counts.iter().sum();
        let topology = NeighborTopology::new(recv.partners.clone(), send.partners.clone(), tag);
        Self {
            domain,
            owner_rank,
            num_ranks,
            start,
            num_owned,
            num_needed,
            partners_recv: recv.partners,
            recv_counts: recv.counts,
            partners_send: send.partners,
            send_counts: send.counts,
            local_send_indices: send.local_indices,
            topology,
            descriptors: Default::default(),
        }
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    pub fn owner_rank(&self) -> usize {
        self.owner_rank
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// First global index owned by this rank.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    /// Remote indices received per Update, after de-duplication and self-exclusion.
    pub fn num_needed(&self) -> usize {
        self.num_needed
    }

    /// Buffer length (in elements) an Update needs.
    pub fn required_len(&self) -> usize {
        self.num_owned + self.num_needed
    }

    pub fn partners_recv(&self) -> &[usize] {
        &self.partners_recv
    }

    pub fn recv_counts(&self) -> &[usize] {
        &self.recv_counts
    }

    pub fn partners_send(&self) -> &[usize] {
        &self.partners_send
    }

    pub fn send_counts(&self) -> &[usize] {
        &self.send_counts
    }

    /// Local indices sent to others, grouped by destination rank.
    pub fn local_send_indices(&self) -> &[usize] {
        &self.local_send_indices
    }

    /// Per-destination slices of [`Plan::local_send_indices`].
    pub fn send_groups(&self) -> impl Iterator<Item = &[usize]> + '_ {
        let mut rest = self.local_send_indices.as_slice();
        self.send_counts.iter().map(move |&n| {
            let (head, tail) = rest.split_at(n.min(rest.len()));
            rest = tail;
            head
        })
    }

    pub fn topology(&self) -> &NeighborTopology {
        &self.topology
    }

    /// True when Update has nothing to move.
    pub fn is_noop(&self) -> bool {
        self.num_ranks <= 1 || self.topology.is_empty()
    }

    /// Descriptors for `size`, built on first use and cached for the plan's lifetime.
    pub fn descriptors(&self, size: ElementSize) -> &UpdateDescriptors {
        self.descriptors[size.slot()].get_or_init(|| UpdateDescriptors::build(self, size))
    }

    /// Descriptor sets built so far, in element-size order.
    pub fn cached_descriptors(&self) -> impl Iterator<Item = &UpdateDescriptors> + '_ {
        self.descriptors.iter().filter_map(OnceCell::get)
    }

    /// Element sizes whose descriptors have been built so far.
    pub fn cached_sizes(&self) -> Vec<ElementSize> {
        ElementSize::ALL
            .into_iter()
            .filter(|s| self.descriptors[s.slot()].get().is_some())
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            domain: self.domain,
            owner_rank: self.owner_rank,
            num_ranks: self.num_ranks,
            num_owned: self.num_owned,
            num_needed: self.num_needed,
            num_send_indices: self.local_send_indices.len(),
            partners_recv: self.partners_recv.clone(),
            recv_counts: self.recv_counts.clone(),
            partners_send: self.partners_send.clone(),
            send_counts: self.send_counts.clone(),
            cached_sizes: self.cached_sizes().into_iter().map(ElementSize::bytes).collect(),
        }
    }
}

fn strictly_ascending(xs: &[usize]) -> bool {
    xs.windows(2).all(|w| w[0] < w[1])
}

impl DebugInvariants for Plan {
    const KIND: &'static str = "Plan";

    fn validate_invariants(&self) -> Result<(), UpdateError> {
        let fail = |msg: String| Err(UpdateError::InvariantViolation(msg));

        if self.partners_recv.len() != self.recv_counts.len()
            || self.partners_send.len() != self.send_counts.len()
        {
            return fail("partner and count lists differ in length".into());
        }
        for partners in [&self.partners_recv, &self.partners_send] {
            if !strictly_ascending(partners) {
                return fail(format!("partners {partners:?} not strictly ascending"));
            }
            if let Some(&bad) = partners
                .iter()
                .find(|&&r| r == self.owner_rank || r >= self.num_ranks)
            {
                return fail(format!("rank {bad} cannot be a partner of rank {}", self.owner_rank));
            }
        }
        if self.recv_counts.iter().chain(&self.send_counts).any(|&c| c == 0) {
            return fail("partner with zero count".into());
        }
        if self.recv_counts.iter().sum::<usize>() != self.num_needed {
            return fail(format!(
                "recv counts sum to {} but num_needed is {}",
                self.recv_counts.iter().sum::<usize>(),
                self.num_needed
            ));
        }
        if self.send_counts.iter().sum::<usize>() != self.local_send_indices.len() {
            return fail("send counts do not cover the local send indices".into());
        }
        for (rank, group) in self.partners_send.iter().zip(self.send_groups()) {
            if !strictly_ascending(group) {
                return fail(format!("indices for rank {rank} not strictly ascending"));
            }
            if group.last().is_some_and(|&i| i >= self.num_owned) {
                return fail(format!("index for rank {rank} outside owned range"));
            }
        }
        if self.topology.sources() != self.partners_recv.as_slice()
            || self.topology.destinations() != self.partners_send.as_slice()
        {
            return fail("neighbor topology out of sync with partner lists".into());
        }
        Ok(())
    }
}

/// Serializable snapshot of a plan for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub domain: u32,
    pub owner_rank: usize,
    pub num_ranks: usize,
    pub num_owned: usize,
    pub num_needed: usize,
    pub num_send_indices: usize,
    pub partners_recv: Vec<usize>,
    pub recv_counts: Vec<usize>,
    pub partners_send: Vec<usize>,
    pub send_counts: Vec<usize>,
    /// Element sizes (bytes) with cached descriptors.
    pub cached_sizes: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_on_rank2() -> Plan {
        // rank 2 of 4 (100 indices each) serves rank 0 with 50..53 and rank 3 with 10, 12
        Plan::new(
            0,
            2,
            4,
            200,
            100,
            RecvSide {
                partners: vec![1],
                counts: vec![2],
            },
            SendSide {
                partners: vec![0, 3],
                counts: vec![3, 2],
                local_indices: vec![50, 51, 52, 10, 12],
            },
            CommTag::new(7),
        )
    }

    #[test]
    fn derived_counts_and_groups() {
        let plan = plan_on_rank2();
        assert_eq!(plan.num_needed(), 2);
        assert_eq!(plan.required_len(), 102);
        let groups: Vec<&[usize]> = plan.send_groups().collect();
        assert_eq!(groups, vec![&[50, 51, 52][..], &[10, 12][..]]);
        assert_eq!(plan.topology().sources(), &[1]);
        assert_eq!(plan.topology().destinations(), &[0, 3]);
        assert!(!plan.is_noop());
        assert!(plan.validate_invariants().is_ok());
    }

    #[test]
    fn descriptors_are_cached_per_size() {
        let plan = plan_on_rank2();
        assert!(plan.cached_sizes().is_empty());

        let d8 = plan.descriptors(ElementSize::Eight);
        assert_eq!(d8.recv()[0].blocks, vec![Block { offset: 100, length: 2 }]);
        assert_eq!(d8.send()[0].blocks, vec![Block { offset: 50, length: 3 }]);
        assert_eq!(d8.send()[1].blocks.len(), 2);
        assert_eq!(d8.send()[0].spans(), &[400..424]);

        let again = plan.descriptors(ElementSize::Eight);
        assert!(std::ptr::eq(d8, again));
        assert_eq!(plan.cached_sizes(), vec![ElementSize::Eight]);

        plan.descriptors(ElementSize::Four);
        assert_eq!(plan.summary().cached_sizes, vec![4, 8]);
    }

    #[test]
    fn invariant_check_catches_unsorted_group() {
        let plan = Plan::new(
            0,
            0,
            2,
            0,
            10,
            RecvSide::default(),
            SendSide {
                partners: vec![1],
                counts: vec![2],
                local_indices: vec![5, 3],
            },
            CommTag::new(1),
        );
        assert!(matches!(
            plan.validate_invariants(),
            Err(UpdateError::InvariantViolation(_))
        ));
    }

    #[test]
    fn valid_plan_passes_debug_assert() {
        plan_on_rank2().debug_assert_invariants();
    }

    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    #[test]
    #[should_panic(expected = "[invariants] Plan")]
    fn debug_assert_panics_on_foreign_partner() {
        // rank 0 cannot list itself as a receive partner
        let plan = Plan::new(
            0,
            0,
            2,
            0,
            10,
            RecvSide {
                partners: vec![0],
                counts: vec![1],
            },
            SendSide::default(),
            CommTag::new(1),
        );
        plan.debug_assert_invariants();
    }

    #[test]
    fn empty_plan_is_noop() {
        let plan = Plan::new(
            0,
            1,
            4,
            100,
            100,
            RecvSide::default(),
            SendSide::default(),
            CommTag::new(1),
        );
        assert!(plan.is_noop());
        assert!(plan.validate_invariants().is_ok());
    }
}
