pub mod batch;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod unit;

pub use batch::{batch_size_for, BatchId, WorkBatch};
pub use pool::{PoolCallbacks, PoolManager, RunMetrics};
pub use protocol::{UnitState, WorkerId, WorkerInMessage, WorkerOutMessage};
pub use queue::{Progress, WorkQueue};
pub use unit::ExecutionUnit;
