//! Diff algorithm registry (C3) and isolated worker process pool (C3/C5).

mod algorithms;
mod pool;
mod protocol;
mod registry;
mod worker;

pub use pool::DiffWorkerPool;
pub use registry::Registry;
pub use worker::{run_worker_loop, ProcessWorkerSpawner, WorkerConn, WorkerSpawner};
