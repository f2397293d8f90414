//! Business counters reported by the consistency engine.
//!
//! The engine only calls these from commit hooks, so each counter moves once per
//! committed transaction and never for a rolled back one.

/// Sink for the engine's business counters.
pub trait InventoryMetrics: Send + Sync {
    /// A reservation was canceled.
    fn order_canceled(&self);

    /// A local-pickup reservation was placed.
    fn local_order_placed(&self);

    /// An internet reservation was placed.
    fn internet_order_placed(&self);
}
