//! The execution backend (spec §4.1): `Local`/`Remote` executors bounding
//! subprocess and copy concurrency with semaphores, and the environment-view
//! construction every explorer/manifest/gencode invocation starts from.

pub mod env;
pub mod executor;
pub mod semaphore;

pub use env::{object_environ, target_environ};
pub use executor::{Executor, LocalExecutor, RemoteExecutor, Spawned};
pub use semaphore::ExecSemaphores;
