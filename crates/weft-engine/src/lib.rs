mod dispatch;
pub mod engine;
pub mod plan;
pub mod run_log;

pub use engine::Engine;
pub use plan::ExecutionPlan;
pub use run_log::RunLogger;
