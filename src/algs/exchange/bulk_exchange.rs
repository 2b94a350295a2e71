//! Update data path: one bulk neighborhood exchange per call.
//!
//! [`BulkExchange`] is implemented per backend. The byte-message backends
//! share [`staged_exchange`]: every receive is posted first, then every send,
//! and only then are handles waited on. A send whose blocks form one run goes
//! out straight from the buffer; otherwise its runs are packed into a scratch
//! vector reused across partners. A receive is copied into its partner's
//! block of the receive region. Failures do not short-circuit the wait loop:
//! every handle is drained and the first error is returned afterwards.
//!
//! The MPI backend describes each send partner's runs with an indexed
//! datatype, built once per descriptor set, and moves data in and out of the
//! caller's buffer without intermediate copies.

use crate::algs::communicator::{Communicator, NoComm, Wait};
use crate::plan::{NeighborTopology, UpdateDescriptors};
use crate::update_error::UpdateError;

/// Collective scatter/gather over a plan's sparse neighbor group.
pub trait BulkExchange {
    /// Move the send blocks of `layout` out of `buffer` and the partners'
    /// data into its receive blocks.
    ///
    /// `buffer` must cover every block of `layout`.
    fn bulk_exchange(
        &self,
        topology: &NeighborTopology,
        layout: &UpdateDescriptors,
        buffer: &mut [u8],
    ) -> Result<(), UpdateError>;

    /// Drop whatever this backend derived from `layout`. Called when the
    /// owning plan is freed.
    fn release(&self, _layout: &UpdateDescriptors) {}
}

/// `layout` and `topology` must name the same partners in the same order.
fn check_layout(
    topology: &NeighborTopology,
    layout: &UpdateDescriptors,
) -> Result<(), UpdateError> {
    let recv = layout.recv().iter().map(|p| p.rank);
    let send = layout.send().iter().map(|p| p.rank);
    if recv.eq(topology.sources().iter().copied())
        && send.eq(topology.destinations().iter().copied())
    {
        Ok(())
    } else {
        Err(UpdateError::InvariantViolation(
            "descriptors do not match the neighbor topology".into(),
        ))
    }
}

/// Exchange over any [`Communicator`] that moves contiguous byte messages.
pub fn staged_exchange<C: Communicator>(
    comm: &C,
    topology: &NeighborTopology,
    layout: &UpdateDescriptors,
    buffer: &mut [u8],
) -> Result<(), UpdateError> {
    check_layout(topology, layout)?;
    let tag = topology.tag().as_u16();

    // 1) post receives; each partner's block is one contiguous run
    let mut pending_recvs = Vec::with_capacity(layout.recv().len());
    for part in layout.recv() {
        let h = comm.irecv(part.rank, tag, &mut buffer[part.extent()]);
        pending_recvs.push((part, h));
    }

    // 2) post sends
    let mut scratch = Vec::new();
    let mut pending_sends = Vec::with_capacity(layout.send().len());
    for part in layout.send() {
        let payload: &[u8] = match part.spans() {
            [only] => &buffer[only.clone()],
            spans => {
                scratch.clear();
                for span in spans {
                    scratch.extend_from_slice(&buffer[span.clone()]);
                }
                &scratch
            }
        };
        pending_sends.push(comm.isend(part.rank, tag, payload));
    }

    // 3) wait on every receive, keep the first error
    let mut maybe_err = None;
    for (part, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == part.byte_len() => {
                if maybe_err.is_none() {
                    buffer[part.extent()].copy_from_slice(&data);
                }
            }
            Some(data) => {
                maybe_err.get_or_insert_with(|| {
                    UpdateError::comm(
                        part.rank,
                        format!(
                            "expected {} bytes from rank {}, got {}",
                            part.byte_len(),
                            part.rank,
                            data.len()
                        ),
                    )
                });
            }
            None => {
                maybe_err.get_or_insert_with(|| {
                    UpdateError::comm(
                        part.rank,
                        format!("failed to receive update data from rank {}", part.rank),
                    )
                });
            }
        }
    }

    // 4) drain sends
    for send in pending_sends {
        let _ = send.wait();
    }

    log::trace!(
        "[rank {}] bulk exchange: {} recv partners, {} send partners, {}-byte elements",
        comm.rank(),
        layout.recv().len(),
        layout.send().len(),
        layout.element_size().bytes()
    );

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl BulkExchange for NoComm {
    fn bulk_exchange(
        &self,
        topology: &NeighborTopology,
        layout: &UpdateDescriptors,
        buffer: &mut [u8],
    ) -> Result<(), UpdateError> {
        staged_exchange(self, topology, layout, buffer)
    }
}

#[cfg(feature = "rayon")]
impl BulkExchange for crate::algs::communicator::RayonComm {
    fn bulk_exchange(
        &self,
        topology: &NeighborTopology,
        layout: &UpdateDescriptors,
        buffer: &mut [u8],
    ) -> Result<(), UpdateError> {
        staged_exchange(self, topology, layout, buffer)
    }
}

#[cfg(feature = "mpi-support")]
mod mpi_exchange {
    use super::{BulkExchange, check_layout};
    use crate::algs::communicator::MpiComm;
    use crate::plan::{NeighborTopology, PartnerBlocks, UpdateDescriptors};
    use crate::update_error::UpdateError;
    use mpi::Count;
    use mpi::datatype::{UserDatatype, View};
    use mpi::traits::*;

    /// One indexed datatype over `u8` covering every span of `part`, with
    /// displacements relative to the start of the buffer.
    fn indexed_type(part: &PartnerBlocks) -> Result<UserDatatype, UpdateError> {
        let count = |n: usize| {
            Count::try_from(n).map_err(|_| {
                UpdateError::comm(part.rank, format!("byte offset {n} exceeds the MPI count range"))
            })
        };
        let mut lengths = Vec::with_capacity(part.spans().len());
        let mut displs = Vec::with_capacity(part.spans().len());
        for span in part.spans() {
            lengths.push(count(span.len())?);
            displs.push(count(span.start)?);
        }
        Ok(UserDatatype::indexed(&lengths, &displs, &u8::equivalent_datatype()))
    }

    impl BulkExchange for MpiComm {
        fn bulk_exchange(
            &self,
            topology: &NeighborTopology,
            layout: &UpdateDescriptors,
            buffer: &mut [u8],
        ) -> Result<(), UpdateError> {
            check_layout(topology, layout)?;
            let tag = i32::from(topology.tag().as_u16());

            let mut cache = self.send_types.borrow_mut();
            if !cache.contains_key(&layout.id()) {
                let types = layout
                    .send()
                    .iter()
                    .map(indexed_type)
                    .collect::<Result<Vec<_>, _>>()?;
                cache.insert(layout.id(), types);
            }
            let send_types = &cache[&layout.id()];

            // sends read the owned region, receives fill disjoint tail chunks
            let (owned, mut rest) = buffer.split_at_mut(layout.owned_bytes());
            let owned: &[u8] = owned;
            // SAFETY: every type was built from spans inside `owned_bytes`.
            let views: Vec<_> = send_types
                .iter()
                .map(|ty| unsafe { View::with_count_and_datatype(owned, 1, ty) })
                .collect();
            let mut slots = Vec::with_capacity(layout.recv().len());
            for part in layout.recv() {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(part.byte_len());
                slots.push((part, head));
                rest = tail;
            }

            let delivered: Vec<(usize, usize, Count)> = mpi::request::scope(|scope| {
                let mut recvs = Vec::with_capacity(slots.len());
                for (part, slot) in slots.iter_mut() {
                    let req = self
                        .world
                        .process_at_rank(part.rank as i32)
                        .immediate_receive_into_with_tag(scope, &mut **slot, tag);
                    recvs.push((part.rank, part.byte_len(), req));
                }
                let mut sends = Vec::with_capacity(views.len());
                for (part, view) in layout.send().iter().zip(&views) {
                    let req = self
                        .world
                        .process_at_rank(part.rank as i32)
                        .immediate_send_with_tag(scope, view, tag);
                    sends.push(req);
                }
                let got = recvs
                    .into_iter()
                    .map(|(rank, want, req)| {
                        let status = req.wait();
                        (rank, want, status.count(u8::equivalent_datatype()))
                    })
                    .collect();
                for req in sends {
                    req.wait();
                }
                got
            });

            match delivered
                .into_iter()
                .find(|&(_, want, got)| usize::try_from(got).ok() != Some(want))
            {
                Some((rank, want, got)) => Err(UpdateError::comm(
                    rank,
                    format!("expected {want} bytes from rank {rank}, got {got}"),
                )),
                None => Ok(()),
            }
        }

        fn release(&self, layout: &UpdateDescriptors) {
            self.send_types.borrow_mut().remove(&layout.id());
        }
    }
}
