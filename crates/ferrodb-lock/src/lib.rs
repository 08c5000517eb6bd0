//! The Lock Table (§4.7): row-level pessimistic locking with a wait-for
//! graph and timestamped-DFS cycle detection.

mod gate;
mod table;

pub use gate::Gate;
pub use table::{Acquired, LockTable};
