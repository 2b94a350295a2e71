//! Stage 1 of the reverse announcement: exchange counts with each neighbor.
//!
//! Every rank tells every rank in `all_neighbors` how many items it will send
//! in stage 2 (zero included), so a rank learns who needs something from it
//! without knowing it in advance. The same header carries the sender's block
//! size and whether its own Setup arguments were valid, so every rank can
//! agree to fail before stage 2 is posted. Every send/receive handle is
//! drained before returning, even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::update_error::UpdateError;
use bytemuck::Zeroable;
use std::collections::{BTreeMap, BTreeSet};

/// What one neighbor announced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    /// Items it will send in stage 2.
    pub count: usize,
    /// Number of indices it owns.
    pub block: u64,
    /// False if its Setup already failed locally.
    pub ok: bool,
}

/// Posts irecv/isend of the stage-1 header with each neighbor.
/// Returns `nbr → announcement` (zero counts included) once all receives
/// have completed.
///
/// `ok == false` announces a local failure: counts are sent as zero. A list
/// too long for the wire count is such a failure too, and is returned after
/// the exchange.
pub fn exchange_sizes<C, T>(
    links: &BTreeMap<usize, Vec<T>>,
    comm: &C,
    tag: CommTag,
    all_neighbors: &BTreeSet<usize>,
    block: usize,
    ok: bool,
) -> Result<BTreeMap<usize, Announcement>, UpdateError>
where
    C: Communicator,
{
    let mut local_err = None;
    for (&nbr, items) in links {
        if let Err(msg) = WireCount::new(items.len(), block, ok) {
            local_err.get_or_insert_with(|| UpdateError::comm(nbr, msg));
        }
    }
    let ok = ok && local_err.is_none();
    let header = |nbr: usize| {
        let n = if ok { links.get(&nbr).map_or(0, Vec::len) } else { 0 };
        WireCount::new(n, block, ok)
    };

    // 1) post all receives
    let mut recv_size = Vec::with_capacity(all_neighbors.len());
    for &nbr in all_neighbors {
        let mut cnt = WireCount::zeroed();
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.push((nbr, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(all_neighbors.len());
    for &nbr in all_neighbors {
        let count = header(nbr).unwrap_or_else(|_| WireCount::zeroed());
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }

    // 3) wait for all recvs, collect headers (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    let mut cnt = WireCount::zeroed();
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    sizes_in.insert(
                        nbr,
                        Announcement {
                            count: cnt.get(),
                            block: cnt.block(),
                            ok: cnt.ok(),
                        },
                    );
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(UpdateError::comm(
                    nbr,
                    format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(UpdateError::comm(
                    nbr,
                    format!("failed to receive size from rank {nbr}"),
                ));
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match local_err.or(maybe_err) {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}
