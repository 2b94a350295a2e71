//! Plan Registry: process-local handle table owned by an update context.
//!
//! Freed slots are never reused. They stay behind as tombstones so a stale
//! handle is reported as use-after-free instead of silently aliasing a newer
//! plan. Each registry stamps its handles with its own id, so a handle from a
//! different context is rejected as unknown.

use crate::plan::Plan;
use crate::update_error::UpdateError;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_REGISTRY: AtomicU32 = AtomicU32::new(1);

/// Opaque handle to a registered plan.
///
/// `PlanId::default()` is the unset handle: any operation on it is an
/// [`UpdateError::InvalidState`], as for a plan used before Setup.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PlanId {
    registry: u32,
    slot: u32,
}

impl PlanId {
    /// True for the handle of a plan that was never set up.
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.slot == 0
    }
}

impl fmt::Debug for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlanId")
            .field(&self.registry)
            .field(&self.slot)
            .finish()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            f.write_str("<unset>")
        } else {
            write!(f, "{}:{}", self.registry, self.slot)
        }
    }
}

#[derive(Debug)]
enum Slot {
    Live(Box<Plan>),
    Freed,
}

/// Handle table mapping [`PlanId`]s to plans.
#[derive(Debug)]
pub struct PlanRegistry {
    id: u32,
    slots: Vec<Slot>,
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        }
    }

    /// Register `plan` under a fresh handle.
    pub fn insert(&mut self, plan: Plan) -> PlanId {
        self.slots.push(Slot::Live(Box::new(plan)));
        PlanId {
            registry: self.id,
            slot: self.slots.len() as u32,
        }
    }

    fn position(&self, id: PlanId) -> Result<usize, UpdateError> {
        if id.is_unset() {
            return Err(UpdateError::InvalidState("plan handle used before setup"));
        }
        let pos = id.slot as usize - 1;
        if id.registry != self.id || pos >= self.slots.len() {
            return Err(UpdateError::InvalidHandle(id));
        }
        match self.slots[pos] {
            Slot::Live(_) => Ok(pos),
            Slot::Freed => Err(UpdateError::InvalidState("plan handle used after free")),
        }
    }

    pub fn get(&self, id: PlanId) -> Result<&Plan, UpdateError> {
        let pos = self.position(id)?;
        match &self.slots[pos] {
            Slot::Live(plan) => Ok(plan),
            Slot::Freed => Err(UpdateError::InvalidState("plan handle used after free")),
        }
    }

    /// Retire `id`, leaving a tombstone, and hand back its plan.
    pub fn remove(&mut self, id: PlanId) -> Result<Plan, UpdateError> {
        let pos = self.position(id)?;
        match std::mem::replace(&mut self.slots[pos], Slot::Freed) {
            Slot::Live(plan) => Ok(*plan),
            Slot::Freed => Err(UpdateError::InvalidState("plan handle used after free")),
        }
    }

    /// Retire every live plan.
    pub fn drain(&mut self) -> Vec<(PlanId, Plan)> {
        let registry = self.id;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(pos, slot)| match std::mem::replace(slot, Slot::Freed) {
                Slot::Live(plan) => Some((
                    PlanId {
                        registry,
                        slot: pos as u32 + 1,
                    },
                    *plan,
                )),
                Slot::Freed => None,
            })
            .collect()
    }

    /// Number of plans not yet freed.
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::CommTag;
    use crate::plan::{RecvSide, SendSide};

    fn empty_plan() -> Plan {
        Plan::new(0, 0, 1, 0, 4, RecvSide::default(), SendSide::default(), CommTag::new(0))
    }

    #[test]
    fn insert_get_remove() {
        let mut reg = PlanRegistry::new();
        let id = reg.insert(empty_plan());
        assert!(!id.is_unset());
        assert_eq!(reg.get(id).unwrap().num_owned(), 4);
        assert_eq!(reg.live(), 1);

        reg.remove(id).unwrap();
        assert_eq!(reg.live(), 0);
        assert!(matches!(reg.get(id), Err(UpdateError::InvalidState(_))));
        assert!(matches!(reg.remove(id), Err(UpdateError::InvalidState(_))));
    }

    #[test]
    fn freed_slots_are_not_reused() {
        let mut reg = PlanRegistry::new();
        let a = reg.insert(empty_plan());
        reg.remove(a).unwrap();
        let b = reg.insert(empty_plan());
        assert_ne!(a, b);
        assert!(reg.get(b).is_ok());
        assert!(reg.get(a).is_err());
    }

    #[test]
    fn unset_and_foreign_handles() {
        let reg = PlanRegistry::new();
        let mut other = PlanRegistry::new();
        let foreign = other.insert(empty_plan());
        assert!(matches!(
            reg.get(PlanId::default()),
            Err(UpdateError::InvalidState(_))
        ));
        assert_eq!(reg.get(foreign).unwrap_err(), UpdateError::InvalidHandle(foreign));
        assert_eq!(PlanId::default().to_string(), "<unset>");
    }

    #[test]
    fn drain_retires_everything() {
        let mut reg = PlanRegistry::new();
        let a = reg.insert(empty_plan());
        let b = reg.insert(empty_plan());
        reg.remove(a).unwrap();
        let drained = reg.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, b);
        assert_eq!(reg.live(), 0);
    }
}
