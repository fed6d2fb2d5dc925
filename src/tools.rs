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

//! Tool execution layer: the single-call bridge between the orchestrator and
//! the kernel.
//!
//! Tools are a declarative table of definitions plus handlers. Parameter
//! bags are validated strictly before any handler runs: unknown tools,
//! missing required parameters, uncoercible values, and undeclared keys all
//! fail up front, so orchestrator and kernel can never drift silently.
//!
//! Handlers bridge intent only. They never do pricing or currency
//! arithmetic; every price comes from the catalog and every total from the
//! engine.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::KernelClient;
use crate::engine::AddLineItem;
use crate::error::TransactionResult;
use crate::extension::StoreExtension;
use crate::money::{LineItemId, Money, ProductId, TransactionId};
use crate::profile::StoreProfile;
use crate::transaction::{LineType, TransactionSnapshot};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Tool '{tool}' is missing required parameter '{parameter}'")]
    MissingParameter { tool: String, parameter: String },

    #[error("Tool '{tool}' parameter '{parameter}' is invalid: {cause}")]
    InvalidParameter {
        tool: String,
        parameter: String,
        cause: String,
    },

    #[error("Tool '{tool}' received unknown parameter '{parameter}'")]
    UnknownParameter { tool: String, parameter: String },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Tool '{tool}' failed: {cause}")]
    HandlerFailed { tool: String, cause: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolParameterKind {
    String,
    Int,
    Decimal,
}

#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ToolParameterKind,
    pub required: bool,
    pub description: String,
}

impl ToolParameter {
    pub fn required(name: &str, kind: ToolParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ToolParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// A coerced parameter value. Conversion uses invariant parsing only; no
/// culture-dependent separators are honored.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolValue {
    String(String),
    Int(i64),
    Decimal(Decimal),
}

/// The normalized bag a handler receives: every value present has already
/// been coerced to its declared type.
#[derive(Debug, Default)]
pub struct ToolArgs(HashMap<String, ToolValue>);

impl ToolArgs {
    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ToolValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ToolValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_decimal(&self, name: &str) -> Option<Decimal> {
        match self.0.get(name) {
            Some(ToolValue::Decimal(d)) => Some(*d),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(
        &self,
        args: ToolArgs,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Registered table of tools keyed by name.
#[derive(Default)]
pub struct ToolExecutor {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        if self.tools.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        self.tools
            .insert(definition.name.clone(), RegisteredTool { definition, handler });
        Ok(())
    }

    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        let mut defs: Vec<&ToolDefinition> =
            self.tools.values().map(|t| &t.definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Validates and coerces the bag, then invokes the handler.
    pub async fn execute_tool(
        &self,
        name: &str,
        bag: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let mut args = ToolArgs::default();
        for parameter in &tool.definition.parameters {
            match bag.get(&parameter.name) {
                None if parameter.required => {
                    return Err(ToolError::MissingParameter {
                        tool: name.to_string(),
                        parameter: parameter.name.clone(),
                    });
                }
                None => {}
                Some(value) => {
                    let coerced = coerce(parameter.kind, value).map_err(|cause| {
                        ToolError::InvalidParameter {
                            tool: name.to_string(),
                            parameter: parameter.name.clone(),
                            cause,
                        }
                    })?;
                    args.0.insert(parameter.name.clone(), coerced);
                }
            }
        }

        // Reject undeclared keys so a drifted orchestrator fails loudly.
        for key in bag.keys() {
            if !tool.definition.parameters.iter().any(|p| &p.name == key) {
                return Err(ToolError::UnknownParameter {
                    tool: name.to_string(),
                    parameter: key.clone(),
                });
            }
        }

        tool.handler.invoke(args, cancel).await
    }
}

fn coerce(kind: ToolParameterKind, value: &Value) -> Result<ToolValue, String> {
    match kind {
        ToolParameterKind::String => match value {
            Value::String(s) => Ok(ToolValue::String(s.clone())),
            other => Err(format!("expected string, got {other}")),
        },
        ToolParameterKind::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(ToolValue::Int)
                .ok_or_else(|| format!("expected integer, got {n}")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ToolValue::Int)
                .map_err(|e| format!("expected integer, got '{s}': {e}")),
            other => Err(format!("expected integer, got {other}")),
        },
        ToolParameterKind::Decimal => match value {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .map(ToolValue::Decimal)
                .map_err(|e| format!("expected decimal, got {n}: {e}")),
            Value::String(s) => Decimal::from_str(s.trim())
                .map(ToolValue::Decimal)
                .map_err(|e| format!("expected decimal, got '{s}': {e}")),
            other => Err(format!("expected decimal, got {other}")),
        },
    }
}

/// Shared state behind the reference tool set: the active store, the
/// operator session, and the transaction currently being built.
pub struct ToolContext {
    pub client: Arc<KernelClient>,
    store: Mutex<(StoreExtension, StoreProfile)>,
    session_id: String,
    current_tx: Mutex<Option<TransactionId>>,
}

impl ToolContext {
    pub fn new(
        client: Arc<KernelClient>,
        extension: StoreExtension,
        profile: StoreProfile,
        session_id: String,
    ) -> Self {
        Self {
            client,
            store: Mutex::new((extension, profile)),
            session_id,
            current_tx: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.current_tx.lock().expect("tool context poisoned").clone()
    }

    fn set_current_transaction(&self, tx_id: Option<TransactionId>) {
        *self.current_tx.lock().expect("tool context poisoned") = tx_id;
    }

    fn active_store(&self) -> (StoreExtension, StoreProfile) {
        self.store.lock().expect("tool context poisoned").clone()
    }

    /// Swaps the active store. Refused while a transaction is open: the open
    /// transaction was priced by the old store's catalog.
    pub fn switch_store(
        &self,
        extension: StoreExtension,
        profile: StoreProfile,
    ) -> Result<(), ToolError> {
        let current = self.current_tx.lock().expect("tool context poisoned");
        if current.is_some() {
            return Err(ToolError::HandlerFailed {
                tool: "switch_store".to_string(),
                cause: "Cannot switch store while a transaction is open".to_string(),
            });
        }
        *self.store.lock().expect("tool context poisoned") = (extension, profile);
        Ok(())
    }
}

fn envelope_json(result: &TransactionResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|_| json!({"success": false}))
}

struct StartTransactionTool {
    context: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for StartTransactionTool {
    async fn invoke(&self, args: ToolArgs, cancel: &CancellationToken) -> Result<Value, ToolError> {
        let currency = args.get_string("currency").unwrap_or_default().to_string();
        let result = self.context.client.start_transaction(
            self.context.session_id(),
            &currency,
            cancel,
        );
        if let Some(snapshot) = &result.transaction {
            self.context.set_current_transaction(Some(snapshot.id.clone()));
        }
        Ok(envelope_json(&result))
    }
}

struct AddItemTool {
    context: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for AddItemTool {
    async fn invoke(&self, args: ToolArgs, cancel: &CancellationToken) -> Result<Value, ToolError> {
        let Some(tx_id) = self.context.current_transaction() else {
            return Ok(envelope_json(&TransactionResult::failed(
                "No open transaction; call start_transaction first",
            )));
        };
        let product_id = ProductId(args.get_string("product_id").unwrap_or_default().to_string());
        let quantity = args.get_int("quantity").unwrap_or(0);

        let (extension, profile) = self.context.active_store();
        let validation = extension
            .catalog
            .validate_product(&product_id)
            .await
            .map_err(|e| ToolError::HandlerFailed {
                tool: "add_item".to_string(),
                cause: e.to_string(),
            })?;
        if !validation.is_valid {
            return Ok(envelope_json(&TransactionResult::failed(
                validation
                    .error_message
                    .unwrap_or_else(|| format!("Product '{product_id}' rejected by catalog")),
            )));
        }
        let Some(product) = validation.product else {
            return Ok(envelope_json(&TransactionResult::failed(format!(
                "Catalog validated '{product_id}' but returned no product record"
            ))));
        };

        let result = self.context.client.add_line_item(
            self.context.session_id(),
            &tx_id,
            AddLineItem {
                product_id,
                quantity: quantity as i32,
                unit_price: Money::new(validation.effective_price, profile.currency.clone()),
                product_name: Some(product.name),
                product_description: Some(product.description),
                parent_line_item_id: None,
            },
            cancel,
        );
        Ok(envelope_json(&result))
    }
}

struct PayTool {
    context: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for PayTool {
    async fn invoke(&self, args: ToolArgs, cancel: &CancellationToken) -> Result<Value, ToolError> {
        let Some(tx_id) = self.context.current_transaction() else {
            return Ok(envelope_json(&TransactionResult::failed(
                "No open transaction; call start_transaction first",
            )));
        };
        let amount = args.get_decimal("amount").unwrap_or(Decimal::ZERO);
        // The tool contract declares cash as the tender when none is named.
        let payment_type = args.get_string("payment_type").unwrap_or("cash").to_string();

        let result = self.context.client.process_payment(
            self.context.session_id(),
            &tx_id,
            amount,
            &payment_type,
            cancel,
        );
        if let Some(snapshot) = &result.transaction {
            if snapshot.state == crate::transaction::TxState::EndOfTransaction {
                self.context.set_current_transaction(None);
            }
        }
        Ok(envelope_json(&result))
    }
}

struct VoidLineTool {
    context: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for VoidLineTool {
    async fn invoke(&self, args: ToolArgs, cancel: &CancellationToken) -> Result<Value, ToolError> {
        let Some(tx_id) = self.context.current_transaction() else {
            return Ok(envelope_json(&TransactionResult::failed(
                "No open transaction; call start_transaction first",
            )));
        };
        let line_item_id =
            LineItemId::from(args.get_string("line_item_id").unwrap_or_default());
        let reason = args.get_string("reason").map(String::from);
        let result = self.context.client.void_line_item(
            self.context.session_id(),
            &tx_id,
            &line_item_id,
            reason.as_deref(),
            cancel,
        );
        Ok(envelope_json(&result))
    }
}

struct ShowTool {
    context: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for ShowTool {
    async fn invoke(&self, _args: ToolArgs, _cancel: &CancellationToken) -> Result<Value, ToolError> {
        let Some(tx_id) = self.context.current_transaction() else {
            return Ok(json!({ "success": true, "receipt": "No open transaction." }));
        };
        let result = self
            .context
            .client
            .get_transaction(self.context.session_id(), &tx_id);
        let Some(snapshot) = &result.transaction else {
            return Ok(envelope_json(&result));
        };
        let (extension, profile) = self.context.active_store();
        let receipt = render_receipt(snapshot, &profile, extension.currency_formatter.as_ref());
        Ok(json!({ "success": true, "receipt": receipt }))
    }
}

/// Renders a transaction for display. All money text flows through the
/// store's currency formatter; the kernel contributes raw amounts only.
pub fn render_receipt(
    snapshot: &TransactionSnapshot,
    profile: &StoreProfile,
    formatter: &dyn crate::extension::CurrencyFormatter,
) -> String {
    let money = |amount: Decimal| {
        formatter.format_currency(amount, &snapshot.currency, &profile.culture)
    };

    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", profile.display_name, profile.store_id));
    out.push_str(&"-".repeat(40));
    out.push('\n');
    for line in &snapshot.lines {
        let indent = "  ".repeat(line.display_indent_level as usize);
        let label = match line.line_type {
            LineType::Item => line
                .product_name
                .clone()
                .unwrap_or_else(|| line.product_id.to_string()),
            LineType::Tender => format!(
                "Tender ({})",
                line.tender_type.as_deref().unwrap_or("unknown")
            ),
            LineType::Change => "Change".to_string(),
        };
        let voided = if line.is_voided { " [VOID]" } else { "" };
        out.push_str(&format!(
            "{indent}{label} x{}  {}{voided}\n",
            line.quantity,
            money(line.extended.amount)
        ));
    }
    out.push_str(&"-".repeat(40));
    out.push('\n');
    out.push_str(&format!("TOTAL     {}\n", money(snapshot.total.amount)));
    out.push_str(&format!("TENDERED  {}\n", money(snapshot.tendered.amount)));
    out.push_str(&format!("CHANGE    {}\n", money(snapshot.change_due.amount)));
    out.push_str(&format!("State: {:?}\n", snapshot.state));
    out
}

/// Builds the reference tool catalog over a shared context.
pub fn build_kernel_tools(context: Arc<ToolContext>) -> ToolExecutor {
    let mut executor = ToolExecutor::new();

    let registrations: Vec<(ToolDefinition, Arc<dyn ToolHandler>)> = vec![
        (
            ToolDefinition {
                name: "start_transaction".to_string(),
                category: "transaction".to_string(),
                description: "Start a new transaction in the given currency".to_string(),
                parameters: vec![ToolParameter::required(
                    "currency",
                    ToolParameterKind::String,
                    "ISO-4217 currency code",
                )],
            },
            Arc::new(StartTransactionTool {
                context: Arc::clone(&context),
            }),
        ),
        (
            ToolDefinition {
                name: "add_item".to_string(),
                category: "transaction".to_string(),
                description: "Add a catalog product to the open transaction".to_string(),
                parameters: vec![
                    ToolParameter::required(
                        "product_id",
                        ToolParameterKind::String,
                        "Catalog SKU",
                    ),
                    ToolParameter::required("quantity", ToolParameterKind::Int, "Units to add"),
                ],
            },
            Arc::new(AddItemTool {
                context: Arc::clone(&context),
            }),
        ),
        (
            ToolDefinition {
                name: "pay".to_string(),
                category: "payment".to_string(),
                description: "Tender payment; payment_type defaults to cash when omitted"
                    .to_string(),
                parameters: vec![
                    ToolParameter::required("amount", ToolParameterKind::Decimal, "Tender amount"),
                    ToolParameter::optional(
                        "payment_type",
                        ToolParameterKind::String,
                        "Tender type id",
                    ),
                ],
            },
            Arc::new(PayTool {
                context: Arc::clone(&context),
            }),
        ),
        (
            ToolDefinition {
                name: "void_line".to_string(),
                category: "transaction".to_string(),
                description: "Void a line item (and its linked children) by stable id".to_string(),
                parameters: vec![
                    ToolParameter::required(
                        "line_item_id",
                        ToolParameterKind::String,
                        "Stable line item id",
                    ),
                    ToolParameter::optional("reason", ToolParameterKind::String, "Void reason"),
                ],
            },
            Arc::new(VoidLineTool {
                context: Arc::clone(&context),
            }),
        ),
        (
            ToolDefinition {
                name: "show".to_string(),
                category: "display".to_string(),
                description: "Render the open transaction as a receipt".to_string(),
                parameters: vec![],
            },
            Arc::new(ShowTool { context }),
        ),
    ];

    for (definition, handler) in registrations {
        executor
            .register(definition, handler)
            .expect("reference tool names are unique");
    }
    executor
}
