//! Structural self-checks for plans.
//!
//! [`DebugInvariants::validate_invariants`] is always available and reports
//! the first violation. [`DebugInvariants::debug_assert_invariants`] turns a
//! violation into a panic in debug builds or with the `check-invariants`
//! feature, and does nothing otherwise.

use crate::update_error::UpdateError;

pub trait DebugInvariants {
    /// Type name used in panic messages.
    const KIND: &'static str;

    /// Validate invariants and return the first violation.
    fn validate_invariants(&self) -> Result<(), UpdateError>;

    /// Panic on a violation when invariant checking is compiled in.
    #[inline]
    fn debug_assert_invariants(&self) {
        if cfg!(any(debug_assertions, feature = "check-invariants")) {
            if let Err(e) = self.validate_invariants() {
                panic!("[invariants] {}: {e}", Self::KIND);
            }
        }
    }
}
