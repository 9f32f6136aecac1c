pub mod analyze;
pub mod config;
pub mod error;
pub mod operation;
pub mod planner;
pub mod transport;
pub mod types;
pub mod window;

pub use config::ExecutionSettings;
pub use error::{ErrorKind, ExecError, ExecResult};
pub use operation::{LocalJobExecutor, MemoryCluster, ProjectorChain, TerminalMode};
pub use planner::{Plan, QueryThenFetchConsumer};
pub use types::{DataType, Row};
