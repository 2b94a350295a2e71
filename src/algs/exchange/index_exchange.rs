//! Stage 2 of the reverse announcement: ship the requested global indices.
//!
//! After [`exchange_sizes`](super::exchange_sizes) every rank knows how many
//! indices each neighbor will ask of it, so receives are posted with exact
//! lengths and only to neighbors with a non-zero count.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireIndex, cast_slice, cast_slice_mut, decode_records, expect_exact_len};
use crate::update_error::UpdateError;
use std::collections::BTreeMap;

/// Send each `links[nbr]` index list to `nbr` and receive `incoming[nbr]`
/// indices from every neighbor with a non-zero count.
///
/// Returns `nbr → indices` in the order the neighbor sent them.
pub fn exchange_indices<C>(
    links: &BTreeMap<usize, Vec<WireIndex>>,
    incoming: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<usize, Vec<u64>>, UpdateError>
where
    C: Communicator,
{
    let width = std::mem::size_of::<WireIndex>();

    let mut pending_recvs = Vec::new();
    for (&nbr, &n_items) in incoming.iter().filter(|(_, n)| **n > 0) {
        let mut buffer = vec![WireIndex::of(0); n_items];
        let h = comm.irecv(nbr, tag.as_u16(), cast_slice_mut(&mut buffer));
        pending_recvs.push((nbr, n_items, h));
    }

    let mut pending_sends = Vec::with_capacity(links.len());
    for (&nbr, items) in links.iter().filter(|(_, v)| !v.is_empty()) {
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(items)));
    }

    let mut lists = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, n_items, h) in pending_recvs {
        let Some(raw) = h.wait() else {
            maybe_err.get_or_insert_with(|| {
                UpdateError::comm(nbr, format!("failed to receive indices from rank {nbr}"))
            });
            continue;
        };
        if maybe_err.is_some() {
            continue;
        }
        let decoded = expect_exact_len(raw.len(), n_items * width)
            .and_then(|()| decode_records::<WireIndex>(&raw));
        match decoded {
            Ok(records) => {
                lists.insert(nbr, records.iter().map(WireIndex::get).collect());
            }
            Err(msg) => maybe_err = Some(UpdateError::comm(nbr, msg)),
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(lists),
    }
}
