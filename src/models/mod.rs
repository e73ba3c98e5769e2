pub mod agent;

pub use agent::{AgentResult, AgentStatus, RunParams};
