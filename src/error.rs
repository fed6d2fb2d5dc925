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

//! Kernel error taxonomy and the result envelope returned over the client
//! surface.
//!
//! Domain outcomes are values, never panics. The one exception is a financial
//! integrity violation detected after recalculation: that indicates kernel
//! corruption and aborts via panic rather than being reported as a result.

use serde::Serialize;
use thiserror::Error;

use crate::transaction::TransactionSnapshot;

/// Errors surfaced by kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A required collaborator or value was never wired. Surfaced at
    /// construction or first use; the host must terminate or reconfigure.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Caller passed a value the kernel cannot act on (blank identifier,
    /// non-positive quantity, negative price, unknown id).
    #[error("{0}")]
    InvalidArgument(String),

    /// Operation is not legal in the current lifecycle state.
    #[error("{0}")]
    IllegalState(String),

    /// Tender rejected by the active payment rules.
    #[error("{0}")]
    PaymentPolicyViolation(String),

    /// Modifier selection rejected by the store's rule graph.
    #[error("{0}")]
    ModifierRuleViolation(String),
}

/// Result envelope for every kernel client operation.
///
/// `success == false` carries at least one entry in `errors`; warnings may
/// accompany either outcome.
#[derive(Debug, Serialize)]
pub struct TransactionResult {
    pub success: bool,
    pub transaction: Option<TransactionSnapshot>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TransactionResult {
    pub fn ok(snapshot: TransactionSnapshot) -> Self {
        Self {
            success: true,
            transaction: Some(snapshot),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction: None,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

impl From<Result<TransactionSnapshot, KernelError>> for TransactionResult {
    fn from(value: Result<TransactionSnapshot, KernelError>) -> Self {
        match value {
            Ok(snapshot) => TransactionResult::ok(snapshot),
            Err(err) => TransactionResult::failed(err.to_string()),
        }
    }
}
