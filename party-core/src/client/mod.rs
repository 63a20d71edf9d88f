//! Participant-side logic, run once per client

mod reconcile;
mod session;

pub use reconcile::{Correction, LocalPlayback, Player, Reconciler};
pub use session::{ClientSession, SessionRole};
