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

//! Monetary value type and opaque identifiers.
//!
//! ARCHITECTURAL PRINCIPLE: The kernel is culture-neutral. `Money` carries an
//! ISO-4217 code and an arbitrary-precision amount; it assumes nothing about
//! decimal places, rounding, or formatting. All of that lives in user space
//! (the store extension's currency formatter).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KernelError;

/// A monetary amount in a specific currency.
///
/// Arithmetic across currencies is a hard failure, never a conversion. The
/// kernel performs no rounding; amounts are carried at full precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency: currency.into(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Adds another amount, failing when the currencies differ.
    pub fn try_add(&self, other: &Money) -> Result<Money, KernelError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency.clone()))
    }

    /// Subtracts another amount, failing when the currencies differ.
    pub fn try_sub(&self, other: &Money) -> Result<Money, KernelError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency.clone()))
    }

    /// Multiplies by a scalar quantity. Quantity is dimensionless, so no
    /// currency check applies.
    pub fn times(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency.clone())
    }

    pub fn negated(&self) -> Money {
        Money::new(-self.amount, self.currency.clone())
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), KernelError> {
        if self.currency != other.currency {
            return Err(KernelError::InvalidArgument(format!(
                "Currency mismatch: cannot combine {} with {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Diagnostic form only. User-facing text goes through the store
        // extension's currency formatter.
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Kernel-assigned transaction identifier. Opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub(crate) String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kernel-assigned line item identifier, stable across voids.
///
/// Line numbers may shift for display; this identifier never changes and is
/// the only identity the kernel honors for line operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(pub(crate) String);

impl LineItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LineItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Product identifier (SKU). The kernel treats it as opaque text; only the
/// store catalog can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
