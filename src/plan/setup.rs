//! Planner: turn a rank's needed global indices into a [`Plan`].
//!
//! Setup is collective. The steps are
//! 1. validate, de-duplicate and drop self-owned indices,
//! 2. group the rest by owner (ascending rank, then ascending index), which
//!    fixes each received item's slot after the owned block,
//! 3. reverse announcement: every rank tells every other rank how many of its
//!    indices it needs, how many it owns and whether its arguments were valid
//!    ([`exchange_sizes`]). All ranks stop together if any header is bad;
//!    otherwise the index lists go to the owners that have a non-zero count
//!    ([`exchange_indices`]),
//! 4. the ranks that asked for something become the send partners,
//! 5. the neighbor topology is restricted to the actual partners.

use crate::algs::communicator::{CommTag, Communicator, SetupCommTags};
use crate::algs::exchange::{Announcement, exchange_indices, exchange_sizes};
use crate::algs::wire::WireIndex;
use crate::debug_invariants::DebugInvariants;
use crate::index_space::IndexSpace;
use crate::plan::{Plan, RecvSide, SendSide};
use crate::update_error::UpdateError;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

/// Caller-side arguments of one Setup call.
#[derive(Copy, Clone, Debug)]
pub struct SetupRequest<'a> {
    pub domain: u32,
    /// First global index owned by this rank.
    pub start: u64,
    /// Number of indices owned by this rank (the same on every rank).
    pub num_owned: usize,
    /// Globally-addressed indices this rank wants; duplicates allowed.
    pub needed: &'a [i64],
}

/// Needed indices grouped by owning rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecvGroups {
    pub partners: Vec<usize>,
    pub counts: Vec<usize>,
    /// Remote global indices in receive-layout order.
    pub indices: Vec<u64>,
}

/// Steps 1 and 2: validate, de-duplicate, drop self-owned and group by owner.
///
/// # Errors
/// [`UpdateError::OutOfRangeIndex`] for the first index outside the space.
pub fn group_needed(
    space: &IndexSpace,
    my_rank: usize,
    needed: &[i64],
) -> Result<RecvGroups, UpdateError> {
    let mut remote = Vec::with_capacity(needed.len());
    let mut own = 0usize;
    for &g in needed {
        if space.resolve_owner(g)? == my_rank {
            own += 1;
        } else {
            remote.push(g as u64);
        }
    }
    remote.sort_unstable();
    let before = remote.len();
    remote.dedup();
    let duplicates = before - remote.len();
    if own > 0 || duplicates > 0 {
        log::warn!(
            "[rank {my_rank}] dropped {own} self-owned and {duplicates} duplicate needed indices"
        );
    }

    let block = space.block();
    let mut groups = RecvGroups::default();
    for (owner, run) in &remote.iter().chunk_by(|&&g| (g / block) as usize) {
        groups.partners.push(owner);
        groups.counts.push(run.count());
    }
    groups.indices = remote;
    Ok(groups)
}

/// Step 3 tail: turn the index lists other ranks sent us into local offsets.
fn local_send_side(
    space: &IndexSpace,
    my_rank: usize,
    requested: BTreeMap<usize, Vec<u64>>,
) -> Result<SendSide, UpdateError> {
    let mut send = SendSide::default();
    for (requester, globals) in requested {
        let mut prev: Option<usize> = None;
        for g in &globals {
            let local = space.to_local(my_rank, *g).ok_or_else(|| {
                UpdateError::comm(
                    requester,
                    format!("requested index {g} is not owned by rank {my_rank}"),
                )
            })?;
            if prev.is_some_and(|p| p >= local) {
                return Err(UpdateError::comm(
                    requester,
                    "requested indices are not strictly ascending",
                ));
            }
            prev = Some(local);
            send.local_indices.push(local);
        }
        send.partners.push(requester);
        send.counts.push(globals.len());
    }
    Ok(send)
}

/// Build this rank's view of a plan. Collective over `comm`.
///
/// A local argument error is still announced in stage 1, so every rank
/// returns an error from the same Setup call: the failing rank its own error,
/// the others [`UpdateError::PeerSetupFailed`].
pub fn build_plan<C: Communicator>(
    comm: &C,
    req: SetupRequest<'_>,
    tags: SetupCommTags,
    data_tag: CommTag,
) -> Result<Plan, UpdateError> {
    let num_ranks = comm.size();
    let my_rank = comm.rank();

    if num_ranks <= 1 || comm.is_no_comm() {
        log::debug!("single-process setup: plan is a no-op");
        return Ok(Plan::new(
            req.domain,
            my_rank,
            num_ranks.max(1),
            req.start,
            req.num_owned,
            RecvSide::default(),
            SendSide::default(),
            data_tag,
        ));
    }

    let space = IndexSpace::uniform(num_ranks, req.num_owned);
    let local = space
        .check_start(my_rank, req.start)
        .and_then(|()| group_needed(&space, my_rank, req.needed));

    // outgoing requests: owner → the global indices we need from it
    let mut links: BTreeMap<usize, Vec<WireIndex>> = BTreeMap::new();
    if let Ok(groups) = &local {
        for (owner, run) in &groups
            .indices
            .iter()
            .chunk_by(|&&g| (g / space.block()) as usize)
        {
            links.insert(owner, run.map(|&g| WireIndex::of(g)).collect());
        }
    }

    // Stage 1 runs even after a local failure so that every rank learns about
    // it and nobody is left waiting in stage 2.
    let all_neighbors: BTreeSet<usize> = (0..num_ranks).filter(|&r| r != my_rank).collect();
    let announced = exchange_sizes(
        &links,
        comm,
        tags.sizes,
        &all_neighbors,
        req.num_owned,
        local.is_ok(),
    )?;
    let groups = local?;
    check_announcements(&announced, req.num_owned as u64)?;

    let incoming: BTreeMap<usize, usize> =
        announced.iter().map(|(&nbr, a)| (nbr, a.count)).collect();
    let requested = exchange_indices(&links, &incoming, comm, tags.indices)?;
    let send = local_send_side(&space, my_rank, requested)?;

    log::debug!(
        "[rank {my_rank}] setup: recv {:?} counts {:?}; send {:?} counts {:?}",
        groups.partners,
        groups.counts,
        send.partners,
        send.counts
    );

    let plan = Plan::new(
        req.domain,
        my_rank,
        num_ranks,
        req.start,
        req.num_owned,
        RecvSide {
            partners: groups.partners,
            counts: groups.counts,
        },
        send,
        data_tag,
    );
    plan.debug_assert_invariants();
    Ok(plan)
}

/// Every rank sees every other rank's header, so a failure or a block-size
/// disagreement anywhere makes all ranks stop here.
fn check_announcements(
    announced: &BTreeMap<usize, Announcement>,
    block: u64,
) -> Result<(), UpdateError> {
    if let Some(&neighbor) = announced.iter().find(|(_, a)| !a.ok).map(|(n, _)| n) {
        return Err(UpdateError::PeerSetupFailed { neighbor });
    }
    if let Some((&neighbor, a)) = announced.iter().find(|(_, a)| a.block != block) {
        return Err(UpdateError::PartitionMismatch {
            neighbor,
            theirs: a.block,
            ours: block,
        });
    }
    Ok(())
}
