pub mod builtin;
pub mod coerce;
pub mod context;
pub mod handler;
pub mod http;
pub mod interpolate;
pub mod registry;
pub mod script;
pub mod services;

pub use context::{ExecutionContext, VariableStore};
pub use handler::{StepDescriptor, StepHandler, StepOutput};
pub use http::ReqwestHttpClient;
pub use registry::{BuiltinStep, StepRegistry};
pub use script::RhaiEvaluator;
pub use services::{Disabled, StepServices};
