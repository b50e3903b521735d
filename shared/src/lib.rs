pub mod colors;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod state;

pub use error::ReconcileError;
pub use events::*;
pub use reconcile::{Applied, Reconciler, apply_delta, apply_snapshot};
pub use state::*;
