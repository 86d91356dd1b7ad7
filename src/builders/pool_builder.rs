//! Builders to construct admission pools from configuration.

use std::collections::HashMap;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::{AdmissionPool, JobExecutor, PoolOptions, SchedulerError, Spawn};

/// Build one admission pool per configured name using an executor factory.
///
/// Every pool shares a clone of `spawner`; each gets its own scheduler,
/// breaker, and retry coordinator.
pub fn build_pools<P, T, E, S, FE>(
    cfg: &SchedulerConfig,
    mut executor_factory: FE,
    spawner: S,
) -> Result<HashMap<String, AdmissionPool<P, T, E, S>>, SchedulerError>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: JobExecutor<P, T>,
    S: Spawn + Clone,
    FE: FnMut(&str, &PoolConfig) -> Result<E, SchedulerError>,
{
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let mut pools = HashMap::with_capacity(cfg.pools.len());
    for (name, pool_cfg) in &cfg.pools {
        let executor = executor_factory(name, pool_cfg)?;
        let pool = AdmissionPool::with_options(
            pool_cfg.clone(),
            executor,
            spawner.clone(),
            PoolOptions::named(name.clone()),
        )?;
        pools.insert(name.clone(), pool);
    }

    tracing::info!(pools = pools.len(), "admission pools built");
    Ok(pools)
}
