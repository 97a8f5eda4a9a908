//! Run coordination
//!
//! The step executor:
//! 1. Validates that signer sessions can be obtained for both chain families
//! 2. Walks the plan's steps in order, signing each through its family's session
//! 3. Waits on bridge relay, account activation and indexing polls
//! 4. Publishes run events with a decreasing ETA

pub mod executor;
pub mod state;


pub use executor::StepExecutor;
pub use state::{ExecutionState, RunState, StepOutcome, TxRecord};
