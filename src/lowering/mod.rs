//! Pre-allocation lowering.
//!
//! Two rewrites run before the first CFG the allocator sees: join
//! deconstruction removes phis, and constraint lowering moves every
//! calling-convention or fixed-register requirement onto a pre-colored
//! temporary.

pub mod constraints;
pub mod joins;

pub use constraints::{lower_constraints, Precoloring};
pub use joins::{lower_joins, JoinStats};
