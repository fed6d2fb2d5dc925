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

//! Store extension: the data-driven layer the kernel consults for culture,
//! catalog, modifier rules, and formatting.
//!
//! A missing collaborator is a construction-time failure with a remediation
//! message, never a nil check at a call site.

pub mod catalog;
pub mod currency;
pub mod modifiers;

use std::sync::Arc;

use crate::error::KernelError;

pub use catalog::{InMemoryCatalog, ProductCatalog, ProductInfo, ProductValidation, SqliteProductCatalog};
pub use currency::{CurrencyFormatter, StandardCurrencyFormatter};
pub use modifiers::{
    AdjustmentKind, ModificationValidation, Modifier, ModifierGroup, ModifierRuleEngine,
    ModifierSelection, ModifierService, SqliteModifierService,
};

/// A store extension composes the three services every store must supply.
#[derive(Clone)]
pub struct StoreExtension {
    pub catalog: Arc<dyn ProductCatalog>,
    pub modifications: Arc<dyn ModifierService>,
    pub currency_formatter: Arc<dyn CurrencyFormatter>,
}

impl std::fmt::Debug for StoreExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreExtension").finish_non_exhaustive()
    }
}

impl StoreExtension {
    pub fn builder() -> StoreExtensionBuilder {
        StoreExtensionBuilder::default()
    }
}

#[derive(Default)]
pub struct StoreExtensionBuilder {
    catalog: Option<Arc<dyn ProductCatalog>>,
    modifications: Option<Arc<dyn ModifierService>>,
    currency_formatter: Option<Arc<dyn CurrencyFormatter>>,
}

impl StoreExtensionBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn modifications(mut self, modifications: Arc<dyn ModifierService>) -> Self {
        self.modifications = Some(modifications);
        self
    }

    pub fn currency_formatter(mut self, formatter: Arc<dyn CurrencyFormatter>) -> Self {
        self.currency_formatter = Some(formatter);
        self
    }

    /// Fails fast when a collaborator was never wired.
    pub fn build(self) -> Result<StoreExtension, KernelError> {
        let catalog = self.catalog.ok_or_else(|| {
            KernelError::ConfigurationMissing(
                "Store extension has no product catalog; wire one before activation".to_string(),
            )
        })?;
        let modifications = self.modifications.ok_or_else(|| {
            KernelError::ConfigurationMissing(
                "Store extension has no modifier service; wire one before activation".to_string(),
            )
        })?;
        let currency_formatter = self.currency_formatter.ok_or_else(|| {
            KernelError::ConfigurationMissing(
                "Store extension has no currency formatter; wire one before activation".to_string(),
            )
        })?;
        Ok(StoreExtension {
            catalog,
            modifications,
            currency_formatter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collaborator_fails_at_construction() {
        let err = StoreExtension::builder()
            .currency_formatter(Arc::new(StandardCurrencyFormatter))
            .build()
            .unwrap_err();
        assert!(matches!(err, KernelError::ConfigurationMissing(_)));
        assert!(err.to_string().contains("catalog"));
    }

    #[test]
    fn complete_builder_succeeds() {
        let extension = StoreExtension::builder()
            .catalog(Arc::new(InMemoryCatalog::default()))
            .modifications(Arc::new(ModifierRuleEngine::from_parts(
                vec![],
                vec![],
                [],
                [],
                [],
                [],
            )))
            .currency_formatter(Arc::new(StandardCurrencyFormatter))
            .build();
        assert!(extension.is_ok());
    }
}
