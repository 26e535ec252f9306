use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::menu::Model as MenuModel, errors::ServiceError, models::CartEntry,
    repositories::CatalogRepository,
};

/// A cart entry resolved against the current menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub menu_id: Uuid,
    pub menu_name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCart {
    pub total: i64,
    pub lines: Vec<PricedLine>,
}

/// Sum of `unit_price * quantity` over `lines`.
pub fn compute_total(lines: &[PricedLine]) -> Result<i64, ServiceError> {
    lines.iter().try_fold(0i64, |acc, line| {
        line.line_total()
            .and_then(|line_total| acc.checked_add(line_total))
            .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))
    })
}

/// Resolves every entry against `menus`. A menu listed under a different
/// store than the entry claims counts as missing.
pub fn price_lines(
    entries: &[CartEntry],
    menus: &HashMap<Uuid, MenuModel>,
) -> Result<Vec<PricedLine>, ServiceError> {
    entries
        .iter()
        .map(|entry| {
            if entry.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for menu {} must be positive",
                    entry.menu_id
                )));
            }
            let menu = menus
                .get(&entry.menu_id)
                .filter(|menu| menu.store_id == entry.store_id)
                .ok_or(ServiceError::MenuNotFound(entry.menu_id))?;
            Ok(PricedLine {
                menu_id: menu.id,
                menu_name: menu.name.clone(),
                unit_price: menu.price,
                quantity: entry.quantity,
            })
        })
        .collect()
}

/// Recomputes a cart total from current menu prices and checks it against
/// what the client submitted.
#[derive(Clone)]
pub struct PriceVerifier {
    catalog: Arc<dyn CatalogRepository>,
}

impl PriceVerifier {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn verify(
        &self,
        entries: &[CartEntry],
        submitted_total: i64,
    ) -> Result<VerifiedCart, ServiceError> {
        if entries.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let menu_ids: Vec<Uuid> = entries.iter().map(|entry| entry.menu_id).collect();
        let menus: HashMap<Uuid, MenuModel> = self
            .catalog
            .find_menus(&menu_ids)
            .await?
            .into_iter()
            .map(|menu| (menu.id, menu))
            .collect();

        let lines = price_lines(entries, &menus)?;
        let total = compute_total(&lines)?;

        if total != submitted_total {
            debug!(total, submitted_total, "Submitted total does not match menu prices");
            return Err(ServiceError::PriceMismatch {
                expected: total,
                submitted: submitted_total,
            });
        }

        Ok(VerifiedCart { total, lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryCatalogRepository;
    use assert_matches::assert_matches;

    async fn catalog_with(store_id: Uuid, prices: &[i64]) -> (Arc<InMemoryCatalogRepository>, Vec<Uuid>) {
        let catalog = Arc::new(InMemoryCatalogRepository::new());
        let mut ids = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            let id = Uuid::new_v4();
            catalog
                .insert_menu(MenuModel {
                    id,
                    store_id,
                    name: format!("menu-{i}"),
                    price: *price,
                })
                .await;
            ids.push(id);
        }
        (catalog, ids)
    }

    #[tokio::test]
    async fn matching_total_is_verified() {
        let store = Uuid::new_v4();
        let (catalog, ids) = catalog_with(store, &[5000, 1200]).await;
        let verifier = PriceVerifier::new(catalog);

        let entries = vec![CartEntry::new(ids[0], store, 2), CartEntry::new(ids[1], store, 1)];
        let verified = verifier.verify(&entries, 11_200).await.unwrap();

        assert_eq!(verified.total, 11_200);
        assert_eq!(verified.lines[0].unit_price, 5000);
        assert_eq!(verified.lines[0].quantity, 2);
    }

    #[tokio::test]
    async fn mismatch_reports_both_totals() {
        let store = Uuid::new_v4();
        let (catalog, ids) = catalog_with(store, &[5000]).await;
        let verifier = PriceVerifier::new(catalog);

        let result = verifier
            .verify(&[CartEntry::new(ids[0], store, 2)], 9000)
            .await;
        assert_matches!(
            result,
            Err(ServiceError::PriceMismatch {
                expected: 10_000,
                submitted: 9000
            })
        );
    }

    #[tokio::test]
    async fn missing_or_foreign_menu_is_not_found() {
        let store = Uuid::new_v4();
        let (catalog, ids) = catalog_with(store, &[5000]).await;
        let verifier = PriceVerifier::new(catalog);

        let ghost = Uuid::new_v4();
        assert_matches!(
            verifier.verify(&[CartEntry::new(ghost, store, 1)], 5000).await,
            Err(ServiceError::MenuNotFound(id)) if id == ghost
        );

        let elsewhere = Uuid::new_v4();
        assert_matches!(
            verifier.verify(&[CartEntry::new(ids[0], elsewhere, 1)], 5000).await,
            Err(ServiceError::MenuNotFound(_))
        );
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let verifier = PriceVerifier::new(Arc::new(InMemoryCatalogRepository::new()));
        assert_matches!(verifier.verify(&[], 0).await, Err(ServiceError::CartEmpty));
    }

    #[test]
    fn overflowing_total_is_a_validation_error() {
        let line = PricedLine {
            menu_id: Uuid::new_v4(),
            menu_name: "x".into(),
            unit_price: i64::MAX,
            quantity: 2,
        };
        assert_matches!(compute_total(&[line]), Err(ServiceError::ValidationError(_)));
    }
}
