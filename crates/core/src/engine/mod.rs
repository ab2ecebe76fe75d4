pub mod executor;
pub mod node_executor;
pub mod resolver;

pub use executor::WorkflowExecutor;
pub use node_executor::{
    ApiExecutor, ExecutionContext, FunctionExecutor, LlmExecutor, NodeExecutor, NodeRegistry,
    TriggerExecutor, UtilityExecutor,
};
pub use resolver::InputResolver;
