pub mod debounce;
pub mod manager;
pub mod planner;

pub use manager::{GroupStatus, ManagerSettings, SubscriptionManager};
pub use planner::{DesiredState, GroupState};
