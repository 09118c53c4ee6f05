//! Notebook reconciliation: writing cell results back into documents

mod reconciler;

pub use reconciler::{reconcile, render_output, strip_outputs, ReconcileError, ReconcileResult};
