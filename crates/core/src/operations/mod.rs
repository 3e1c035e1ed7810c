//! Operators binding storage backends to file operations
//!
//! [`SingleOperator`] works on one backend; [`DualOperator`] moves data from a
//! source backend to a destination backend. Both report asynchronous outcomes
//! through [`Results`] channels.

mod copy;
mod delete;
mod dual;
mod mv;
pub mod planner;
pub mod pool;
pub mod result;
mod single;
mod sync;
mod tee;
mod transfer;

pub use dual::DualOperator;
pub use planner::{plan_part_size, plan_parts, validate_part_size, PartPlan, DEFAULT_PART_SIZE};
pub use pool::WorkerPool;
pub use result::{EmptyResult, ObjectResult, PartResult, Results};
pub use single::SingleOperator;
pub use sync::{SyncAction, SyncOptions};
