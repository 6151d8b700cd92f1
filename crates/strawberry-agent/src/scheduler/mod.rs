//! Reconciliation: the per-alias state machine and the pass that drives it

pub mod machine;
pub mod reconciler;

pub use machine::{decide, Effect, Limits};
pub use reconciler::{AliasStates, PassReport, Reconciler};
