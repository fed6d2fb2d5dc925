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

//! Culture-neutral POS transaction kernel with a data-driven store extension
//! framework.
//!
//! The kernel owns transaction lifecycle, pricing aggregation, and financial
//! integrity. Store extensions supply culture, catalog, modifier rules, and
//! payment policy as data; an orchestration layer above reaches the kernel
//! only through the tool execution layer. Nothing in the kernel hardcodes a
//! currency, a tender, or a product rule.

pub mod client;
pub mod engine;
pub mod error;
pub mod extension;
pub mod migration;
pub mod money;
pub mod payment;
pub mod profile;
pub mod session;
pub mod tools;
pub mod transaction;

pub use client::KernelClient;
pub use engine::{AddLineItem, TransactionEngine};
pub use error::{KernelError, TransactionResult};
pub use extension::{StoreExtension, StoreExtensionBuilder};
pub use migration::{MigrationInfo, MigrationReport, MigrationRunner, MigrationScript};
pub use money::{LineItemId, Money, ProductId, TransactionId};
pub use payment::{DefaultPaymentRules, PaymentRules, ProfilePaymentRules};
pub use profile::{PaymentTenderType, StoreProfile};
pub use session::SessionManager;
pub use tools::{ToolContext, ToolDefinition, ToolExecutor, ToolParameter, ToolParameterKind};
pub use transaction::{LineType, TransactionLine, TransactionSnapshot, TxState};
