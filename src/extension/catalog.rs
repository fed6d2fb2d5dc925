/*
 * Copyright 2025 Paul Moore Parks and contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Product catalog service.
//!
//! ARCHITECTURAL PRINCIPLE: the kernel never synthesizes product data. Every
//! price and product attribute comes from the store's catalog; a product the
//! catalog does not vouch for cannot enter a transaction.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::KernelError;
use crate::money::ProductId;

#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub sku: ProductId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub base_price: Decimal,
    pub is_active: bool,
}

/// Outcome of a catalog lookup. `is_valid == false` carries a message naming
/// the product; the kernel never substitutes a fallback price.
#[derive(Debug, Clone)]
pub struct ProductValidation {
    pub is_valid: bool,
    pub product: Option<ProductInfo>,
    pub effective_price: Decimal,
    pub error_message: Option<String>,
}

impl ProductValidation {
    fn invalid(message: String) -> Self {
        Self {
            is_valid: false,
            product: None,
            effective_price: Decimal::ZERO,
            error_message: Some(message),
        }
    }

    fn valid(product: ProductInfo) -> Self {
        let effective_price = product.base_price;
        Self {
            is_valid: true,
            product: Some(product),
            effective_price,
            error_message: None,
        }
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn validate_product(&self, product_id: &ProductId)
        -> Result<ProductValidation, KernelError>;

    async fn search_products(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<ProductInfo>, KernelError>;

    async fn popular_items(&self) -> Result<Vec<ProductInfo>, KernelError>;
}

/// Catalog over the per-store SQLite database.
///
/// Prices are stored in minor units; `decimal_places` (from the store
/// profile's currency, via the formatter) converts them to major-unit
/// decimals. The kernel itself never learns about that conversion.
pub struct SqliteProductCatalog {
    conn: Arc<Mutex<Connection>>,
    decimal_places: u32,
}

impl SqliteProductCatalog {
    pub fn new(conn: Arc<Mutex<Connection>>, decimal_places: u32) -> Self {
        Self {
            conn,
            decimal_places,
        }
    }

    fn price_from_minor(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.decimal_places)
    }

    fn row_to_product(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<ProductInfo> {
        Ok(ProductInfo {
            sku: ProductId(row.get::<_, String>(0)?),
            name: row.get(1)?,
            description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            category: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            base_price: self.price_from_minor(row.get::<_, i64>(4)?),
            is_active: row.get::<_, bool>(5)?,
        })
    }
}

const PRODUCT_COLUMNS: &str = "sku, name, description, category_id, base_price, is_active";

#[async_trait]
impl ProductCatalog for SqliteProductCatalog {
    async fn validate_product(
        &self,
        product_id: &ProductId,
    ) -> Result<ProductValidation, KernelError> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let row = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"),
                [product_id.as_str()],
                |row| self.row_to_product(row),
            )
            .optional()
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))?;

        Ok(match row {
            None => ProductValidation::invalid(format!("Unknown product '{product_id}'")),
            Some(product) if !product.is_active => {
                ProductValidation::invalid(format!("Product '{product_id}' is not active"))
            }
            Some(product) => ProductValidation::valid(product),
        })
    }

    async fn search_products(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<ProductInfo>, KernelError> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let pattern = format!("%{}%", term.trim());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE is_active = 1 AND (sku LIKE ?1 OR name LIKE ?1) \
                 ORDER BY name LIMIT ?2"
            ))
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))?;
        let rows = stmt
            .query_map(
                rusqlite::params![pattern, max_results as i64],
                |row| self.row_to_product(row),
            )
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))
    }

    async fn popular_items(&self) -> Result<Vec<ProductInfo>, KernelError> {
        // Catalog-defined ordering; stores rank by display weight in the
        // products table ordering itself.
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY sku LIMIT 8"
            ))
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))?;
        let rows = stmt
            .query_map([], |row| self.row_to_product(row))
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| KernelError::InvalidArgument(format!("Catalog query failed: {e}")))
    }
}

/// In-memory catalog for tests and stores without a database.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: HashMap<String, ProductInfo>,
}

impl InMemoryCatalog {
    pub fn new(products: impl IntoIterator<Item = ProductInfo>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|p| (p.sku.as_str().to_string(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn validate_product(
        &self,
        product_id: &ProductId,
    ) -> Result<ProductValidation, KernelError> {
        Ok(match self.products.get(product_id.as_str()) {
            None => ProductValidation::invalid(format!("Unknown product '{product_id}'")),
            Some(product) if !product.is_active => {
                ProductValidation::invalid(format!("Product '{product_id}' is not active"))
            }
            Some(product) => ProductValidation::valid(product.clone()),
        })
    }

    async fn search_products(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<ProductInfo>, KernelError> {
        let needle = term.trim().to_lowercase();
        let mut hits: Vec<ProductInfo> = self
            .products
            .values()
            .filter(|p| {
                p.is_active
                    && (p.sku.as_str().to_lowercase().contains(&needle)
                        || p.name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn popular_items(&self) -> Result<Vec<ProductInfo>, KernelError> {
        let mut items: Vec<ProductInfo> =
            self.products.values().filter(|p| p.is_active).cloned().collect();
        items.sort_by(|a, b| a.sku.as_str().cmp(b.sku.as_str()));
        items.truncate(8);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn coffee() -> ProductInfo {
        ProductInfo {
            sku: ProductId::from("COFFEE.SMALL"),
            name: "Small Coffee".into(),
            description: "House blend".into(),
            category: "DRINKS".into(),
            base_price: dec!(3.50),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn unknown_product_is_invalid_with_message() {
        let catalog = InMemoryCatalog::new([coffee()]);
        let result = catalog
            .validate_product(&ProductId::from("NOPE"))
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("NOPE"));
    }

    #[tokio::test]
    async fn inactive_product_is_invalid() {
        let mut p = coffee();
        p.is_active = false;
        let catalog = InMemoryCatalog::new([p]);
        let result = catalog
            .validate_product(&ProductId::from("COFFEE.SMALL"))
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn valid_product_carries_effective_price() {
        let catalog = InMemoryCatalog::new([coffee()]);
        let result = catalog
            .validate_product(&ProductId::from("COFFEE.SMALL"))
            .await
            .unwrap();
        assert!(result.is_valid);
        assert_eq!(result.effective_price, dec!(3.50));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_bounded() {
        let catalog = InMemoryCatalog::new([coffee()]);
        let hits = catalog.search_products("coffee", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        let none = catalog.search_products("tea", 5).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn popular_items_exclude_inactive_products() {
        let mut retired = coffee();
        retired.sku = ProductId::from("RETIRED");
        retired.is_active = false;
        let catalog = InMemoryCatalog::new([coffee(), retired]);
        let items = catalog.popular_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sku.as_str(), "COFFEE.SMALL");
    }
}
