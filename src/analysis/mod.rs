//! Control-flow and data-flow analyses over the linear IR.

pub mod cfg;
pub mod dominators;
pub mod liveness;

pub use cfg::{BasicBlock, Cfg};
pub use dominators::{BlockSet, Dominators, NaturalLoop};
pub use liveness::{Liveness, VRegSet};
