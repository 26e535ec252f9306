use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    cache::CartCache, errors::ServiceError, models::CartEntry, repositories::CartRepository,
};

/// Customer carts: cache first, durable rows as the fallback.
#[derive(Clone)]
pub struct CartStore {
    cache: Arc<dyn CartCache>,
    durable: Arc<dyn CartRepository>,
}

impl CartStore {
    pub fn new(cache: Arc<dyn CartCache>, durable: Arc<dyn CartRepository>) -> Self {
        Self { cache, durable }
    }

    /// Returns the customer's cart. On a cache miss the durable rows are
    /// loaded and written back to the cache.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<Vec<CartEntry>, ServiceError> {
        match self.cache.load(customer_id).await {
            Ok(Some(entries)) => return Ok(entries),
            Ok(None) => debug!("Cart cache miss, loading durable cart"),
            Err(e) => warn!(error = %e, "Cart cache unavailable, loading durable cart"),
        }

        let entries = self.durable.load_entries(customer_id).await?;
        if !entries.is_empty() {
            if let Err(e) = self.cache.store(customer_id, &entries).await {
                warn!(error = %e, "Failed to warm cart cache");
            }
        }
        Ok(entries)
    }

    /// Empties both the durable cart and its cached copy.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn clear(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        self.durable.clear(customer_id).await?;
        self.cache.clear(customer_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCartCache;
    use crate::repositories::InMemoryCartRepository;
    use std::time::Duration;

    fn store() -> (CartStore, Arc<InMemoryCartCache>, Arc<InMemoryCartRepository>) {
        let cache = Arc::new(InMemoryCartCache::new(Duration::from_secs(1800)));
        let durable = Arc::new(InMemoryCartRepository::new());
        (CartStore::new(cache.clone(), durable.clone()), cache, durable)
    }

    #[tokio::test]
    async fn cold_cache_is_warmed_from_durable_rows() {
        let (carts, cache, durable) = store();
        let customer = Uuid::new_v4();
        let entries = vec![CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 2)];
        durable.replace(customer, entries.clone()).await;

        assert_eq!(cache.load(customer).await.unwrap(), None);
        assert_eq!(carts.get_cart(customer).await.unwrap(), entries);
        assert_eq!(cache.load(customer).await.unwrap(), Some(entries));
    }

    #[tokio::test]
    async fn cached_cart_wins_over_durable_rows() {
        let (carts, cache, durable) = store();
        let customer = Uuid::new_v4();
        let cached = vec![CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1)];
        cache.store(customer, &cached).await.unwrap();
        durable
            .replace(customer, vec![CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 9)])
            .await;

        assert_eq!(carts.get_cart(customer).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn clear_empties_both_layers() {
        let (carts, cache, durable) = store();
        let customer = Uuid::new_v4();
        let entries = vec![CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1)];
        durable.replace(customer, entries.clone()).await;
        cache.store(customer, &entries).await.unwrap();

        carts.clear(customer).await.unwrap();

        assert!(carts.get_cart(customer).await.unwrap().is_empty());
    }
}
