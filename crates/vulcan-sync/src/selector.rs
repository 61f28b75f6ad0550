//! Gateway instance selection
//!
//! Lists the instances registered behind a load balancer, picks one at
//! random and resolves its public address.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// A gateway instance registered behind a load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    /// Filled in when the inventory already knows it
    pub public_address: Option<String>,
}

impl Instance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_address: None,
        }
    }
}

/// Members of one load balancer, in inventory order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePool {
    pub name: String,
    pub instances: Vec<Instance>,
}

impl InstancePool {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Load-balancer inventory lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoadBalancerInventory: Send + Sync {
    /// Current members of the named pool
    async fn list_instances(&self, pool: &str) -> Result<InstancePool>;
}

/// Instance-metadata lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Public address of an instance
    async fn resolve_address(&self, instance_id: &str) -> Result<String>;
}

/// Choose one pool member uniformly at random
pub fn pick_random<'a, R: Rng + ?Sized>(
    pool: &'a InstancePool,
    rng: &mut R,
) -> Result<&'a Instance> {
    if pool.is_empty() {
        return Err(SyncError::EmptyPool {
            pool: pool.name.clone(),
        });
    }
    let index = rng.gen_range(0..pool.len());
    Ok(&pool.instances[index])
}

/// Selects the gateway address a tunnel should target
pub struct GatewaySelector {
    inventory: Arc<dyn LoadBalancerInventory>,
    metadata: Arc<dyn InstanceMetadata>,
    rng: Mutex<StdRng>,
}

impl GatewaySelector {
    pub fn new(
        inventory: Arc<dyn LoadBalancerInventory>,
        metadata: Arc<dyn InstanceMetadata>,
    ) -> Self {
        Self {
            inventory,
            metadata,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed seed for instance selection
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// List the pool, pick a member and resolve its address
    pub async fn select_gateway_address(&self, pool: &str) -> Result<String> {
        let members = self.inventory.list_instances(pool).await?;
        debug!(pool = %pool, instances = members.len(), "Listed load balancer members");

        let instance = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            pick_random(&members, &mut *rng)?.clone()
        };

        let address = match instance.public_address {
            Some(address) if !address.is_empty() => address,
            _ => self.metadata.resolve_address(&instance.id).await?,
        };

        info!(
            pool = %pool,
            instance = %instance.id,
            address = %address,
            "Selected gateway instance"
        );
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn pool_of(ids: &[&str]) -> InstancePool {
        InstancePool {
            name: "vulcan".to_string(),
            instances: ids.iter().map(|id| Instance::new(*id)).collect(),
        }
    }

    #[test]
    fn test_pick_random_membership() {
        let pool = pool_of(&["i-1", "i-2", "i-3"]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let picked = pick_random(&pool, &mut rng).unwrap();
            assert!(pool.instances.contains(picked));
        }
    }

    #[test]
    fn test_pick_random_is_uniform() {
        let pool = pool_of(&["i-1", "i-2", "i-3", "i-4"]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 4];
        let trials = 40_000;

        for _ in 0..trials {
            let picked = pick_random(&pool, &mut rng).unwrap();
            let index = pool.instances.iter().position(|i| i == picked).unwrap();
            counts[index] += 1;
        }

        let expected = trials / 4;
        for count in counts {
            let deviation = (count as f64 - expected as f64).abs() / expected as f64;
            assert!(deviation < 0.05, "counts skewed: {:?}", counts);
        }
    }

    #[test]
    fn test_pick_random_empty_pool() {
        let pool = pool_of(&[]);
        let mut rng = StdRng::seed_from_u64(1);
        let err = pick_random(&pool, &mut rng).unwrap_err();
        assert!(matches!(err, SyncError::EmptyPool { ref pool } if pool == "vulcan"));
    }

    #[tokio::test]
    async fn test_select_resolves_picked_instance() {
        let mut inventory = MockLoadBalancerInventory::new();
        inventory
            .expect_list_instances()
            .with(eq("vulcan"))
            .times(1)
            .returning(|_| Ok(pool_of(&["i-only"])));

        let mut metadata = MockInstanceMetadata::new();
        metadata
            .expect_resolve_address()
            .with(eq("i-only"))
            .times(1)
            .returning(|_| Ok("203.0.113.10".to_string()));

        let selector = GatewaySelector::new(Arc::new(inventory), Arc::new(metadata)).with_seed(3);
        let address = selector.select_gateway_address("vulcan").await.unwrap();
        assert_eq!(address, "203.0.113.10");
    }

    #[tokio::test]
    async fn test_select_uses_known_address() {
        let mut inventory = MockLoadBalancerInventory::new();
        inventory.expect_list_instances().returning(|_| {
            Ok(InstancePool {
                name: "vulcan".to_string(),
                instances: vec![Instance {
                    id: "i-1".to_string(),
                    public_address: Some("198.51.100.4".to_string()),
                }],
            })
        });

        let mut metadata = MockInstanceMetadata::new();
        metadata.expect_resolve_address().never();

        let selector = GatewaySelector::new(Arc::new(inventory), Arc::new(metadata));
        assert_eq!(
            selector.select_gateway_address("vulcan").await.unwrap(),
            "198.51.100.4"
        );
    }

    #[tokio::test]
    async fn test_select_empty_pool_skips_resolution() {
        let mut inventory = MockLoadBalancerInventory::new();
        inventory
            .expect_list_instances()
            .returning(|_| Ok(pool_of(&[])));

        let mut metadata = MockInstanceMetadata::new();
        metadata.expect_resolve_address().never();

        let selector = GatewaySelector::new(Arc::new(inventory), Arc::new(metadata));
        let err = selector.select_gateway_address("vulcan").await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyPool { .. }));
    }

    #[tokio::test]
    async fn test_select_propagates_resolution_error() {
        let mut inventory = MockLoadBalancerInventory::new();
        inventory
            .expect_list_instances()
            .returning(|_| Ok(pool_of(&["i-pending"])));

        let mut metadata = MockInstanceMetadata::new();
        metadata
            .expect_resolve_address()
            .returning(|id| Err(SyncError::resolution(id, "no public address assigned")));

        let selector = GatewaySelector::new(Arc::new(inventory), Arc::new(metadata));
        let err = selector.select_gateway_address("vulcan").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Resolution { ref instance_id, .. } if instance_id == "i-pending"
        ));
    }
}
