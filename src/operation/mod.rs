//! Execution engine: symbol evaluation, projectors and their chains, the
//! collect sources and the local job executor.

pub mod chain;
pub mod collect;
pub mod input;
pub mod job;
pub mod projectors;
pub mod ram;
pub mod sort;

pub use chain::{ProjectorChain, TerminalMode};
pub use collect::{DocCollector, DocFetcher, Document, LocalFetcher, MemoryCluster, ShardCollector};
pub use job::LocalJobExecutor;
pub use projectors::{Projector, ProjectorFactory, RowStream};
pub use ram::{MemoryBreaker, RamAccountingContext};
