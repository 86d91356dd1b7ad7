//! Runtime adapters for spawning job execution.

pub mod tokio_spawner;

pub use tokio_spawner::TokioSpawner;
