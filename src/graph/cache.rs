use super::network::RoadNetwork;
use anyhow::Result;
use log::{debug, info};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 默认最多缓存的路网个数
pub const MAX_CACHE_ROAD_NETWORK_COUNT: usize = 3;

/// 路网缓存, 超出容量时淘汰最久未使用的路网
pub struct RoadNetworkCache {
    networks: Mutex<LruCache<String, Arc<RoadNetwork>>>,
}

impl Default for RoadNetworkCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(MAX_CACHE_ROAD_NETWORK_COUNT).unwrap_or(NonZeroUsize::MIN))
    }
}

impl RoadNetworkCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        RoadNetworkCache {
            networks: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// 生成一个新的缓存键
    pub fn generate_key() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn get_or_build<F>(&self, key: &str, build: F) -> Result<Arc<RoadNetwork>>
    where
        F: FnOnce() -> Result<RoadNetwork>,
    {
        let mut networks = self
            .networks
            .lock()
            .map_err(|_| anyhow::anyhow!("road network cache lock poisoned"))?;
        if let Some(network) = networks.get(key) {
            debug!("road network cache hit: {}", key);
            return Ok(network.clone());
        }
        info!("road network cache miss, building: {}", key);
        let network = build()?;
        network.materialize();
        let network = Arc::new(network);
        networks.put(key.to_string(), network.clone());
        Ok(network)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.networks
            .lock()
            .map(|networks| networks.contains(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.networks.lock().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
