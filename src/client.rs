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

//! Kernel client: the transport-neutral surface callers program against.
//!
//! This is the direct in-process binding. Every operation validates
//! cancellation cooperatively, delegates to the engine, and flattens the
//! outcome into a result envelope; nothing here owns financial logic.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::{AddLineItem, TransactionEngine};
use crate::error::{KernelError, TransactionResult};
use crate::money::{LineItemId, TransactionId};

pub struct KernelClient {
    engine: Arc<TransactionEngine>,
}

impl KernelClient {
    pub fn new(engine: Arc<TransactionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    pub fn create_session(
        &self,
        terminal_id: &str,
        operator_id: &str,
    ) -> Result<String, KernelError> {
        self.engine.sessions().create_session(terminal_id, operator_id)
    }

    pub fn close_session(&self, session_id: &str) -> Result<(), KernelError> {
        self.engine.sessions().close_session(session_id)
    }

    pub fn start_transaction(
        &self,
        session_id: &str,
        currency: &str,
        cancel: &CancellationToken,
    ) -> TransactionResult {
        if cancel.is_cancelled() {
            return TransactionResult::failed("Operation cancelled");
        }
        self.engine.start_transaction(session_id, currency).into()
    }

    pub fn add_line_item(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        args: AddLineItem,
        cancel: &CancellationToken,
    ) -> TransactionResult {
        if cancel.is_cancelled() {
            return TransactionResult::failed("Operation cancelled");
        }
        self.engine.add_line_item(session_id, tx_id, args).into()
    }

    pub fn process_payment(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        amount: Decimal,
        payment_type: &str,
        cancel: &CancellationToken,
    ) -> TransactionResult {
        if cancel.is_cancelled() {
            return TransactionResult::failed("Operation cancelled");
        }
        self.engine
            .process_payment(session_id, tx_id, amount, payment_type)
            .into()
    }

    pub fn void_line_item(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        line_item_id: &LineItemId,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransactionResult {
        if cancel.is_cancelled() {
            return TransactionResult::failed("Operation cancelled");
        }
        self.engine
            .void_line_item(session_id, tx_id, line_item_id, reason)
            .into()
    }

    pub fn void_transaction(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransactionResult {
        if cancel.is_cancelled() {
            return TransactionResult::failed("Operation cancelled");
        }
        self.engine.void_transaction(session_id, tx_id, reason).into()
    }

    pub fn get_transaction(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
    ) -> TransactionResult {
        self.engine.get_transaction(session_id, tx_id).into()
    }
}
