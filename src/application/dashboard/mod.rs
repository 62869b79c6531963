//! Dashboard consumer - reconciles realtime events into order snapshots.

mod reconciler;

pub use reconciler::{DashboardReconciler, DashboardSettings};
