//! The scheduling engine: work items, the priority queue, the timing
//! evaluator, the dispatch worker, and the public facade.

pub mod engine;
pub mod evaluator;
pub mod item;
pub mod queue;
pub mod worker;

pub use engine::{ResponseScheduler, SchedulerStats};
pub use evaluator::{EvalContext, TimingDecision, evaluate};
pub use item::{DeliveryStatus, ScheduledItem};
pub use queue::DispatchQueue;
