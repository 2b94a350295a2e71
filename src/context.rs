//! Update context: the explicit owner of a communicator, its configuration
//! and its plan registry.
//!
//! All five public operations (Setup, Update, Free, GetNumIndices and
//! GetLocalIndices) are methods here. Several contexts can coexist in one
//! process; handles are only valid for the context that issued them.

use crate::algs::communicator::{CommTag, Communicator, SetupCommTags};
use crate::algs::exchange::BulkExchange;
use crate::debug_invariants::DebugInvariants;
use crate::element::{ElementKind, ElementSize};
use crate::plan::setup::{SetupRequest, build_plan};
use crate::plan::{Plan, PlanId, PlanRegistry, PlanSummary};
use crate::update_error::UpdateError;
use serde::{Deserialize, Serialize};

/// Tags consumed by one Setup call: two announcement stages and one data tag.
const TAGS_PER_SETUP: u16 = 3;

/// Per-context knobs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// First tag of the range this context draws from. Clamped so that one
    /// Setup's three tags fit below [`CommTag::MAX`].
    pub base_tag: CommTag,
    /// Validate every plan right after Setup.
    pub check_invariants: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_tag: CommTag::new(0x4C00),
            check_invariants: cfg!(any(debug_assertions, feature = "check-invariants")),
        }
    }
}

impl UpdateConfig {
    pub fn with_base_tag(mut self, tag: CommTag) -> Self {
        self.base_tag = tag;
        self
    }

    /// Has no effect when the `check-invariants` feature is on.
    pub fn with_check_invariants(mut self, on: bool) -> Self {
        self.check_invariants = on || cfg!(feature = "check-invariants");
        self
    }
}

/// Process-local update state over one communicator.
#[derive(Debug)]
pub struct UpdateContext<C: Communicator + BulkExchange> {
    comm: C,
    config: UpdateConfig,
    registry: PlanRegistry,
    next_tag: u16,
}

impl<C: Communicator + BulkExchange> UpdateContext<C> {
    pub fn new(comm: C) -> Self {
        Self::with_config(comm, UpdateConfig::default())
    }

    pub fn with_config(comm: C, config: UpdateConfig) -> Self {
        Self {
            comm,
            config,
            registry: PlanRegistry::new(),
            next_tag: 0,
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Every process runs the same Setup sequence, so a per-context counter
    /// gives matching tags everywhere without communication. Tags cycle
    /// through `base_tag..=CommTag::MAX`.
    fn reserve_tags(&mut self) -> (SetupCommTags, CommTag) {
        let highest_base = CommTag::MAX.as_u16() - (TAGS_PER_SETUP - 1);
        let base = self.config.base_tag.as_u16().min(highest_base);
        let span = u32::from(CommTag::MAX.as_u16() - base) + 1;
        let next = u32::from(self.next_tag);
        let at = |k: u32| CommTag::new(base + ((next + k) % span) as u16);
        let tags = SetupCommTags {
            sizes: at(0),
            indices: at(1),
        };
        let data = at(2);
        self.next_tag = ((next + u32::from(TAGS_PER_SETUP)) % span) as u16;
        (tags, data)
    }

    /// Build and register a plan. Collective: every process of the
    /// communicator must call it, in the same order relative to other Setups.
    ///
    /// `start` and `num_owned` describe this process's block of the global
    /// index space; `needed` lists global indices to receive on each Update
    /// (unordered, duplicates and self-owned entries are dropped).
    pub fn setup(
        &mut self,
        domain: u32,
        start: u64,
        num_owned: usize,
        needed: &[i64],
    ) -> Result<PlanId, UpdateError> {
        let (setup_tags, data_tag) = self.reserve_tags();
        let req = SetupRequest {
            domain,
            start,
            num_owned,
            needed,
        };
        let plan = build_plan(&self.comm, req, setup_tags, data_tag)?;
        if self.config.check_invariants {
            plan.validate_invariants()?;
        }
        #[cfg(debug_assertions)]
        self.comm.barrier();

        let id = self.registry.insert(plan);
        log::debug!("[rank {}] registered plan {id}", self.comm.rank());
        Ok(id)
    }

    /// Refresh the receive region of `buffer` (typed elements). Collective.
    pub fn update<T: bytemuck::Pod>(
        &self,
        buffer: &mut [T],
        id: PlanId,
    ) -> Result<(), UpdateError> {
        let plan = self.registry.get(id)?;
        let size = ElementSize::of::<T>()?;
        check_buffer(plan, buffer.len())?;
        run_update(&self.comm, plan, size, bytemuck::cast_slice_mut(buffer))
    }

    /// Refresh the receive region of a raw byte buffer holding
    /// `elem_size`-byte elements. Collective.
    pub fn update_bytes(
        &self,
        buffer: &mut [u8],
        elem_size: usize,
        id: PlanId,
    ) -> Result<(), UpdateError> {
        let plan = self.registry.get(id)?;
        let size = ElementSize::try_from(elem_size)?;
        check_buffer(plan, buffer.len() / size.bytes())?;
        run_update(&self.comm, plan, size, buffer)
    }

    /// [`UpdateContext::update_bytes`] with the width taken from a named kind.
    pub fn update_kind(
        &self,
        buffer: &mut [u8],
        kind: ElementKind,
        id: PlanId,
    ) -> Result<(), UpdateError> {
        self.update_bytes(buffer, kind.size().bytes(), id)
    }

    /// Release a plan. Later use of `id` is an [`UpdateError::InvalidState`].
    pub fn free(&mut self, id: PlanId) -> Result<(), UpdateError> {
        let plan = self.registry.remove(id)?;
        plan.cached_descriptors().for_each(|d| self.comm.release(d));
        log::debug!(
            "[rank {}] freed plan {id} ({} cached descriptor sets)",
            self.comm.rank(),
            plan.cached_sizes().len()
        );
        Ok(())
    }

    /// Release every live plan; returns how many were freed.
    pub fn free_all(&mut self) -> usize {
        let plans = self.registry.drain();
        for (_, plan) in &plans {
            plan.cached_descriptors().for_each(|d| self.comm.release(d));
        }
        let n = plans.len();
        if n > 0 {
            log::debug!("[rank {}] freed {n} outstanding plans", self.comm.rank());
        }
        n
    }

    /// Number of local indices this process sends on each Update.
    pub fn num_indices(&self, id: PlanId) -> Result<usize, UpdateError> {
        Ok(self.registry.get(id)?.local_send_indices().len())
    }

    /// Copy the local send indices into `out`, grouped by ascending destination
    /// rank. Returns the number written.
    pub fn local_indices(&self, id: PlanId, out: &mut [usize]) -> Result<usize, UpdateError> {
        let indices = self.registry.get(id)?.local_send_indices();
        if out.len() < indices.len() {
            return Err(UpdateError::BufferTooSmall {
                required: indices.len(),
                actual: out.len(),
            });
        }
        out[..indices.len()].copy_from_slice(indices);
        Ok(indices.len())
    }

    pub fn plan(&self, id: PlanId) -> Result<&Plan, UpdateError> {
        self.registry.get(id)
    }

    pub fn summary(&self, id: PlanId) -> Result<PlanSummary, UpdateError> {
        Ok(self.registry.get(id)?.summary())
    }

    /// Elements an Update buffer must hold: `num_owned + num_needed`.
    pub fn required_len(&self, id: PlanId) -> Result<usize, UpdateError> {
        Ok(self.registry.get(id)?.required_len())
    }

    pub fn live_plans(&self) -> usize {
        self.registry.live()
    }
}

fn check_buffer(plan: &Plan, elements: usize) -> Result<(), UpdateError> {
    let required = plan.required_len();
    if required == 0 {
        return Ok(());
    }
    if elements == 0 {
        return Err(UpdateError::NullBuffer);
    }
    if elements < required {
        return Err(UpdateError::BufferTooSmall {
            required,
            actual: elements,
        });
    }
    Ok(())
}

fn run_update<C: Communicator + BulkExchange>(
    comm: &C,
    plan: &Plan,
    size: ElementSize,
    buffer: &mut [u8],
) -> Result<(), UpdateError> {
    if plan.is_noop() {
        return Ok(());
    }
    let layout = plan.descriptors(size);
    let used = plan.required_len() * size.bytes();
    comm.bulk_exchange(plan.topology(), layout, &mut buffer[..used])
}
