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

//! Transaction engine: owns live transactions and every mutation on them.
//!
//! Transactions live in a registry behind a read-write lock; each entry is a
//! mutex so the mutate + recalculate + assert sequence runs under a
//! per-transaction exclusive lock. Two simultaneous operations on different
//! transactions never contend; callers serialize access to the same one.
//!
//! Every operation validates the session first, then checks arguments and
//! lifecycle state, mutates, recalculates, and asserts integrity. An
//! integrity failure panics: it indicates corruption, not a domain outcome.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

use crate::error::KernelError;
use crate::money::{LineItemId, Money, ProductId, TransactionId};
use crate::payment::PaymentRules;
use crate::session::SessionManager;
use crate::transaction::{Transaction, TransactionSnapshot, TxState};

/// Arguments for [`TransactionEngine::add_line_item`]. Every field is
/// explicit; there are no defaulted parameters.
#[derive(Debug, Clone)]
pub struct AddLineItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Money,
    pub product_name: Option<String>,
    pub product_description: Option<String>,
    pub parent_line_item_id: Option<LineItemId>,
}

pub struct TransactionEngine {
    sessions: Arc<SessionManager>,
    payment_rules: Arc<dyn PaymentRules>,
    transactions: RwLock<HashMap<TransactionId, Arc<Mutex<Transaction>>>>,
}

impl TransactionEngine {
    pub fn new(sessions: Arc<SessionManager>, payment_rules: Arc<dyn PaymentRules>) -> Self {
        Self {
            sessions,
            payment_rules,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Creates a new transaction in the given currency. The currency is
    /// stored verbatim; the kernel performs no normalization on it.
    pub fn start_transaction(
        &self,
        session_id: &str,
        currency: &str,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        if currency.trim().is_empty() {
            return Err(KernelError::InvalidArgument(
                "Currency must not be blank".to_string(),
            ));
        }

        let id = TransactionId(format!(
            "txn_{}",
            uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        ));
        let tx = Transaction::new(id.clone(), currency.to_string());
        let snapshot = tx.snapshot();

        let mut registry = self.transactions.write().expect("transaction registry poisoned");
        registry.insert(id.clone(), Arc::new(Mutex::new(tx)));
        info!(session_id, transaction_id = %id, currency, "transaction started");
        Ok(snapshot)
    }

    pub fn add_line_item(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        args: AddLineItem,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        if args.quantity <= 0 {
            return Err(KernelError::InvalidArgument(format!(
                "Quantity must be positive, got {}",
                args.quantity
            )));
        }
        if args.unit_price.is_negative() {
            return Err(KernelError::InvalidArgument(format!(
                "Unit price must not be negative, got {}",
                args.unit_price
            )));
        }

        let entry = self.lookup(tx_id)?;
        let mut tx = entry.lock().expect("transaction lock poisoned");
        self.require_open(&tx, "add line item")?;

        let line_item_id = tx.add_item_line(
            args.product_id.clone(),
            args.quantity,
            args.unit_price,
            args.product_name,
            args.product_description,
            args.parent_line_item_id,
        )?;
        tx.recalculate();
        tx.assert_integrity();
        info!(
            session_id,
            transaction_id = %tx_id,
            line_item_id = %line_item_id,
            product_id = %args.product_id,
            quantity = args.quantity,
            "line item added"
        );
        Ok(tx.snapshot())
    }

    /// Applies a tender. Partial tenders keep the transaction open; a tender
    /// that covers the total closes it, issuing change only when the payment
    /// rules allow it for this tender type.
    pub fn process_payment(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        amount: Decimal,
        payment_type: &str,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        // A zero tender would break the tender sign invariant, so positive
        // only.
        if amount <= Decimal::ZERO {
            return Err(KernelError::InvalidArgument(format!(
                "Payment amount must be positive, got {amount}"
            )));
        }
        if payment_type.trim().is_empty() {
            return Err(KernelError::InvalidArgument(
                "Payment type must not be blank".to_string(),
            ));
        }

        let entry = self.lookup(tx_id)?;
        let mut tx = entry.lock().expect("transaction lock poisoned");
        self.require_open(&tx, "process payment")?;
        if !tx.has_item_lines() {
            return Err(KernelError::IllegalState(
                "Cannot process payment: transaction has no item lines".to_string(),
            ));
        }

        let canonical = self
            .payment_rules
            .normalize_tender_type(payment_type)
            .ok_or_else(|| {
                KernelError::PaymentPolicyViolation(format!(
                    "Invalid payment type '{payment_type}'"
                ))
            })?;

        if self.payment_rules.requires_exact(&canonical) && amount != tx.balance_due().amount {
            return Err(KernelError::PaymentPolicyViolation(format!(
                "Tender '{canonical}' requires the exact balance of {}; got {amount}",
                tx.balance_due()
            )));
        }

        let tender_line = tx.add_tender_line(amount, canonical.clone());
        tx.recalculate();

        let overpay = tx.tendered().amount - tx.total().amount;
        if overpay > Decimal::ZERO && !self.payment_rules.can_issue_change(&canonical) {
            // Revert the tender append; the transaction must be left exactly
            // as it was before this call.
            tx.pop_line(&tender_line);
            tx.recalculate();
            tx.assert_integrity();
            return Err(KernelError::PaymentPolicyViolation(format!(
                "Tender '{canonical}' cannot issue change; overpayment of {overpay} {} rejected",
                tx.currency()
            )));
        }

        if tx.tendered().amount >= tx.total().amount {
            if overpay > Decimal::ZERO {
                tx.add_change_line(overpay, canonical.clone());
            }
            tx.set_state(TxState::EndOfTransaction);
        }
        tx.recalculate();
        tx.assert_integrity();
        info!(
            session_id,
            transaction_id = %tx_id,
            tender = %canonical,
            amount = %amount,
            state = ?tx.state(),
            "payment processed"
        );
        Ok(tx.snapshot())
    }

    /// Voids a line item and, breadth-first, every descendant linked to it.
    pub fn void_line_item(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        line_item_id: &LineItemId,
        reason: Option<&str>,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        let entry = self.lookup(tx_id)?;
        let mut tx = entry.lock().expect("transaction lock poisoned");
        self.require_open(&tx, "void line item")?;

        tx.void_cascade(line_item_id, reason)?;
        tx.recalculate();
        tx.assert_integrity();
        info!(
            session_id,
            transaction_id = %tx_id,
            line_item_id = %line_item_id,
            reason = reason.unwrap_or(""),
            "line item voided"
        );
        Ok(tx.snapshot())
    }

    /// Terminal transition for an entire transaction. Idempotent: voiding a
    /// voided transaction is a no-op success. A completed transaction cannot
    /// be voided through this entry point.
    pub fn void_transaction(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
        reason: Option<&str>,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        let entry = self.lookup(tx_id)?;
        let mut tx = entry.lock().expect("transaction lock poisoned");

        match tx.state() {
            TxState::Voided => return Ok(tx.snapshot()),
            TxState::EndOfTransaction => {
                return Err(KernelError::IllegalState(format!(
                    "Cannot void transaction {tx_id}: already completed"
                )));
            }
            TxState::StartTransaction | TxState::ItemsPending => {}
        }

        tx.void_all_lines(reason);
        tx.set_state(TxState::Voided);
        tx.recalculate();
        tx.assert_integrity();
        info!(session_id, transaction_id = %tx_id, "transaction voided");
        Ok(tx.snapshot())
    }

    /// Read-only snapshot.
    pub fn get_transaction(
        &self,
        session_id: &str,
        tx_id: &TransactionId,
    ) -> Result<TransactionSnapshot, KernelError> {
        self.sessions.validate_session(session_id)?;
        let entry = self.lookup(tx_id)?;
        let tx = entry.lock().expect("transaction lock poisoned");
        Ok(tx.snapshot())
    }

    fn lookup(&self, tx_id: &TransactionId) -> Result<Arc<Mutex<Transaction>>, KernelError> {
        let registry = self.transactions.read().expect("transaction registry poisoned");
        registry
            .get(tx_id)
            .cloned()
            .ok_or_else(|| KernelError::InvalidArgument(format!("Unknown transaction '{tx_id}'")))
    }

    fn require_open(&self, tx: &Transaction, operation: &str) -> Result<(), KernelError> {
        if tx.state().is_terminal() {
            return Err(KernelError::IllegalState(format!(
                "Cannot {operation}: transaction {} is in terminal state {:?}",
                tx.id(),
                tx.state()
            )));
        }
        Ok(())
    }
}
