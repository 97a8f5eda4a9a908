//! Route planning: step derivation, duration and fee estimates, swap limits

pub mod fees;
pub mod limits;
pub mod planner;

pub use fees::{FeeEstimate, FeeEstimator, StaticFeeEstimator, StepFee};
pub use limits::{Allowance, UserLimits};
pub use planner::{ChainRef, Plan, RoutePlanner, Step, StepKind, StepOwner};
