//! Descriptor Builder: run-length block layouts for one element size.
//!
//! A plan's index sets never change after Setup, so the gather (send) and
//! scatter (receive) layouts are computed once per element size and replayed
//! by every Update.
//!
//! - Receive side: one block per source partner, starting at
//!   `num_owned + Σ earlier recv_counts`.
//! - Send side: each destination's sorted local index list is split into
//!   maximal runs of consecutive indices.

use crate::element::ElementSize;
use crate::plan::Plan;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LAYOUT: AtomicU64 = AtomicU64::new(1);

/// One contiguous range of buffer elements.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub offset: usize,
    pub length: usize,
}

impl Block {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    fn bytes(&self, size: ElementSize) -> Range<usize> {
        self.offset * size.bytes()..self.end() * size.bytes()
    }
}

/// Compress an index list into runs: a new block starts whenever an index is
/// not exactly one past its predecessor.
pub fn compress_runs(indices: &[usize]) -> Vec<Block> {
    indices
        .iter()
        .map(|&offset| Block { offset, length: 1 })
        .coalesce(|a, b| {
            if a.end() == b.offset {
                Ok(Block {
                    offset: a.offset,
                    length: a.length + 1,
                })
            } else {
                Err((a, b))
            }
        })
        .collect()
}

/// Blocks exchanged with one partner, in elements and in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartnerBlocks {
    pub rank: usize,
    pub blocks: Vec<Block>,
    spans: Vec<Range<usize>>,
    byte_len: usize,
}

impl PartnerBlocks {
    fn new(rank: usize, blocks: Vec<Block>, size: ElementSize) -> Self {
        let spans: Vec<_> = blocks.iter().map(|b| b.bytes(size)).collect();
        let byte_len = spans.iter().map(Range::len).sum();
        Self {
            rank,
            blocks,
            spans,
            byte_len,
        }
    }

    /// Byte ranges of the buffer, in message order.
    #[inline]
    pub fn spans(&self) -> &[Range<usize>] {
        &self.spans
    }

    /// Total payload bytes for this partner.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Number of elements moved.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    /// Smallest byte range covering every span.
    pub fn extent(&self) -> Range<usize> {
        match (self.spans.first(), self.spans.last()) {
            (Some(first), Some(last)) => first.start..last.end,
            _ => 0..0,
        }
    }
}

/// Cached send/receive layout of a plan for one element size.
///
/// Each build gets a process-unique [`UpdateDescriptors::id`], which
/// transports use as the key for state they derive from the layout.
#[derive(Debug)]
pub struct UpdateDescriptors {
    id: u64,
    element_size: ElementSize,
    owned_bytes: usize,
    recv: Vec<PartnerBlocks>,
    send: Vec<PartnerBlocks>,
}

impl UpdateDescriptors {
    pub fn build(plan: &Plan, size: ElementSize) -> Self {
        let mut offset = plan.num_owned();
        let recv = plan
            .partners_recv()
            .iter()
            .zip(plan.recv_counts())
            .map(|(&rank, &length)| {
                let block = Block { offset, length };
                offset += length;
                PartnerBlocks::new(rank, vec![block], size)
            })
            .collect();

        let send = plan
            .partners_send()
            .iter()
            .zip(plan.send_groups())
            .map(|(&rank, group)| PartnerBlocks::new(rank, compress_runs(group), size))
            .collect();

        let desc = Self {
            id: NEXT_LAYOUT.fetch_add(1, Ordering::Relaxed),
            element_size: size,
            owned_bytes: plan.num_owned() * size.bytes(),
            recv,
            send,
        };
        log::debug!(
            "[rank {}] built {}-byte descriptors: {} recv blocks, {} send blocks",
            plan.owner_rank(),
            size.bytes(),
            desc.recv.len(),
            desc.send_block_count()
        );
        desc
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn element_size(&self) -> ElementSize {
        self.element_size
    }

    /// Bytes of the owned region; every receive block lies after it and
    /// every send block inside it.
    #[inline]
    pub fn owned_bytes(&self) -> usize {
        self.owned_bytes
    }

    /// Receive layout, one entry per source partner in ascending rank order.
    #[inline]
    pub fn recv(&self) -> &[PartnerBlocks] {
        &self.recv
    }

    /// Send layout, one entry per destination partner in ascending rank order.
    #[inline]
    pub fn send(&self) -> &[PartnerBlocks] {
        &self.send
    }

    pub fn send_block_count(&self) -> usize {
        self.send.iter().map(|p| p.blocks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_run_is_one_block() {
        assert_eq!(
            compress_runs(&[50, 51, 52]),
            vec![Block {
                offset: 50,
                length: 3
            }]
        );
    }

    #[test]
    fn one_gap_gives_two_blocks() {
        assert_eq!(
            compress_runs(&[4, 5, 7, 8, 9]),
            vec![
                Block {
                    offset: 4,
                    length: 2
                },
                Block {
                    offset: 7,
                    length: 3
                }
            ]
        );
    }

    #[test]
    fn empty_and_singletons() {
        assert!(compress_runs(&[]).is_empty());
        assert_eq!(compress_runs(&[0, 2, 4]).len(), 3);
    }

    #[test]
    fn byte_spans_scale_with_element_size() {
        let p = PartnerBlocks::new(
            1,
            vec![
                Block {
                    offset: 2,
                    length: 3,
                },
                Block {
                    offset: 10,
                    length: 1,
                },
            ],
            ElementSize::Four,
        );
        assert_eq!(p.spans(), &[8..20, 40..44]);
        assert_eq!(p.byte_len(), 16);
        assert_eq!(p.len(), 4);
        assert_eq!(p.extent(), 8..44);
    }
}
