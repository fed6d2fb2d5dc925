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

//! Transaction and line item model.
//!
//! Lines are append-only records keyed by a stable `LineItemId`; after
//! creation only `is_voided`, `void_reason`, and the display line number may
//! change. Aggregation is pure over the line sequence: `recalculate` derives
//! every total from raw lines, and `assert_integrity` re-derives them again
//! and panics on any disagreement. A panic here means kernel corruption and
//! must never be swallowed.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::error::KernelError;
use crate::money::{LineItemId, Money, ProductId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxState {
    StartTransaction,
    ItemsPending,
    EndOfTransaction,
    Voided,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::EndOfTransaction | TxState::Voided)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineType {
    Item,
    Tender,
    Change,
}

/// A single row in a transaction.
///
/// NRF COMPLIANCE: child lines reference their parent through
/// `parent_line_item_id` only; parents do not embed child lists. Descendants
/// are computed on demand, which keeps every mutation local to one line.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionLine {
    pub line_item_id: LineItemId,
    /// 1-based display position. May shift; never identity.
    pub line_number: u32,
    pub parent_line_item_id: Option<LineItemId>,
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub product_description: Option<String>,
    pub quantity: i32,
    pub unit_price: Money,
    pub extended: Money,
    pub line_type: LineType,
    pub tender_type: Option<String>,
    pub is_voided: bool,
    pub void_reason: Option<String>,
    pub display_indent_level: u32,
    pub metadata: HashMap<String, String>,
}

/// Read-only view of a transaction returned across the client surface.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub state: TxState,
    pub currency: String,
    pub lines: Vec<TransactionLine>,
    pub total: Money,
    pub tendered: Money,
    pub change_due: Money,
    pub balance_due: Money,
}

impl TransactionSnapshot {
    /// Non-voided lines of a given type, in insertion order.
    pub fn live_lines(&self, line_type: LineType) -> impl Iterator<Item = &TransactionLine> {
        self.lines
            .iter()
            .filter(move |l| !l.is_voided && l.line_type == line_type)
    }
}

#[derive(Debug)]
pub(crate) struct Transaction {
    id: TransactionId,
    state: TxState,
    currency: String,
    lines: Vec<TransactionLine>,
    index: HashMap<LineItemId, usize>,
    next_line_seq: u32,
    total: Money,
    tendered: Money,
    change_due: Money,
    balance_due: Money,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, currency: String) -> Self {
        let zero = Money::zero(currency.clone());
        Self {
            id,
            state: TxState::StartTransaction,
            currency,
            lines: Vec::new(),
            index: HashMap::new(),
            next_line_seq: 0,
            total: zero.clone(),
            tendered: zero.clone(),
            change_due: zero.clone(),
            balance_due: zero,
        }
    }

    pub(crate) fn id(&self) -> &TransactionId {
        &self.id
    }

    pub(crate) fn state(&self) -> TxState {
        self.state
    }

    pub(crate) fn currency(&self) -> &str {
        &self.currency
    }

    pub(crate) fn total(&self) -> &Money {
        &self.total
    }

    pub(crate) fn tendered(&self) -> &Money {
        &self.tendered
    }

    pub(crate) fn balance_due(&self) -> &Money {
        &self.balance_due
    }

    pub(crate) fn has_item_lines(&self) -> bool {
        self.lines.iter().any(|l| l.line_type == LineType::Item)
    }

    fn next_line_item_id(&mut self) -> LineItemId {
        self.next_line_seq += 1;
        LineItemId(format!("{}_LN{:04}", self.id.as_str(), self.next_line_seq))
    }

    fn line(&self, id: &LineItemId) -> Option<&TransactionLine> {
        self.index.get(id).map(|&i| &self.lines[i])
    }

    /// Appends an item line, optionally linked under a parent line. The
    /// parent must exist and be non-voided; the child's indent level becomes
    /// parent's + 1. The parent's quantity does not constrain the child's.
    pub(crate) fn add_item_line(
        &mut self,
        product_id: ProductId,
        quantity: i32,
        unit_price: Money,
        product_name: Option<String>,
        product_description: Option<String>,
        parent_line_item_id: Option<LineItemId>,
    ) -> Result<LineItemId, KernelError> {
        if unit_price.currency != self.currency {
            return Err(KernelError::InvalidArgument(format!(
                "Line currency '{}' does not match transaction currency '{}'",
                unit_price.currency, self.currency
            )));
        }

        let indent = match &parent_line_item_id {
            None => 0,
            Some(parent_id) => {
                let parent = self.line(parent_id).ok_or_else(|| {
                    KernelError::InvalidArgument(format!(
                        "Parent line item '{parent_id}' not found in transaction {}",
                        self.id
                    ))
                })?;
                if parent.is_voided {
                    return Err(KernelError::InvalidArgument(format!(
                        "Parent line item '{parent_id}' is voided"
                    )));
                }
                parent.display_indent_level + 1
            }
        };

        let line_item_id = self.next_line_item_id();
        let extended = unit_price.times(Decimal::from(quantity));
        let line = TransactionLine {
            line_item_id: line_item_id.clone(),
            line_number: self.lines.len() as u32 + 1,
            parent_line_item_id,
            product_id,
            product_name,
            product_description,
            quantity,
            unit_price,
            extended,
            line_type: LineType::Item,
            tender_type: None,
            is_voided: false,
            void_reason: None,
            display_indent_level: indent,
            metadata: HashMap::new(),
        };
        self.push_line(line);

        if self.state == TxState::StartTransaction {
            self.state = TxState::ItemsPending;
        }
        Ok(line_item_id)
    }

    /// Appends a tender line. Tender is money in, recorded negatively.
    pub(crate) fn add_tender_line(&mut self, amount: Decimal, tender_type: String) -> LineItemId {
        let line_item_id = self.next_line_item_id();
        let extended = Money::new(-amount, self.currency.clone());
        let line = TransactionLine {
            line_item_id: line_item_id.clone(),
            line_number: self.lines.len() as u32 + 1,
            parent_line_item_id: None,
            product_id: ProductId::from("TENDER"),
            product_name: Some(format!("Tender: {tender_type}")),
            product_description: None,
            quantity: 1,
            unit_price: extended.clone(),
            extended,
            line_type: LineType::Tender,
            tender_type: Some(tender_type),
            is_voided: false,
            void_reason: None,
            display_indent_level: 0,
            metadata: HashMap::new(),
        };
        self.push_line(line);
        line_item_id
    }

    /// Appends a change line. Change is money out, recorded positively.
    pub(crate) fn add_change_line(&mut self, amount: Decimal, tender_type: String) -> LineItemId {
        let line_item_id = self.next_line_item_id();
        let extended = Money::new(amount, self.currency.clone());
        let line = TransactionLine {
            line_item_id: line_item_id.clone(),
            line_number: self.lines.len() as u32 + 1,
            parent_line_item_id: None,
            product_id: ProductId::from("CHANGE"),
            product_name: Some("Change due".to_string()),
            product_description: None,
            quantity: 1,
            unit_price: extended.clone(),
            extended,
            line_type: LineType::Change,
            tender_type: Some(tender_type),
            is_voided: false,
            void_reason: None,
            display_indent_level: 0,
            metadata: HashMap::new(),
        };
        self.push_line(line);
        line_item_id
    }

    fn push_line(&mut self, line: TransactionLine) {
        self.index.insert(line.line_item_id.clone(), self.lines.len());
        self.lines.push(line);
    }

    /// Removes the most recently appended line. Only used to revert a tender
    /// append when the payment rules reject the resulting overpayment.
    pub(crate) fn pop_line(&mut self, expect: &LineItemId) {
        match self.lines.last() {
            Some(last) if &last.line_item_id == expect => {
                self.index.remove(expect);
                self.lines.pop();
            }
            _ => panic!(
                "FINANCIAL INTEGRITY VIOLATION: attempted to revert line '{expect}' that is not last"
            ),
        }
    }

    /// Voids the target line and every reachable descendant, breadth-first.
    ///
    /// NRF COMPLIANCE: a voided parent must never leave live child lines
    /// behind. Lines already voided are left untouched, keeping the first
    /// void's reason.
    pub(crate) fn void_cascade(
        &mut self,
        target: &LineItemId,
        reason: Option<&str>,
    ) -> Result<(), KernelError> {
        let target_index = *self.index.get(target).ok_or_else(|| {
            KernelError::InvalidArgument(format!(
                "Line item '{target}' not found in transaction {}",
                self.id
            ))
        })?;
        if self.lines[target_index].is_voided {
            return Err(KernelError::InvalidArgument(format!(
                "Line item '{target}' is already voided"
            )));
        }

        // Adjacency derived from parent references on demand.
        let mut children: HashMap<&LineItemId, Vec<usize>> = HashMap::new();
        for (i, line) in self.lines.iter().enumerate() {
            if let Some(parent) = &line.parent_line_item_id {
                children.entry(parent).or_default().push(i);
            }
        }

        let mut to_void: Vec<usize> = Vec::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(target_index);
        while let Some(i) = queue.pop_front() {
            if !self.lines[i].is_voided {
                to_void.push(i);
            }
            if let Some(kids) = children.get(&self.lines[i].line_item_id) {
                queue.extend(kids.iter().copied());
            }
        }

        for i in to_void {
            let line = &mut self.lines[i];
            line.is_voided = true;
            if line.void_reason.is_none() {
                line.void_reason = reason.map(|r| r.to_string());
            }
        }
        Ok(())
    }

    /// Voids every live line. Used by the transaction-level void.
    pub(crate) fn void_all_lines(&mut self, reason: Option<&str>) {
        for line in &mut self.lines {
            if !line.is_voided {
                line.is_voided = true;
                if line.void_reason.is_none() {
                    line.void_reason = reason.map(|r| r.to_string());
                }
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: TxState) {
        self.state = state;
    }

    /// Walks non-voided lines once and rebuilds every aggregate under the
    /// sign conventions: items positive, tenders negative, change positive.
    pub(crate) fn recalculate(&mut self) {
        let mut total = Decimal::ZERO;
        let mut tendered = Decimal::ZERO;
        let mut change_due = Decimal::ZERO;

        for line in self.lines.iter().filter(|l| !l.is_voided) {
            match line.line_type {
                LineType::Item => total += line.extended.amount,
                LineType::Tender => tendered += -line.extended.amount,
                LineType::Change => change_due += line.extended.amount,
            }
        }

        self.total = Money::new(total, self.currency.clone());
        self.tendered = Money::new(tendered, self.currency.clone());
        self.change_due = Money::new(change_due, self.currency.clone());
        self.balance_due = Money::new(total - tendered + change_due, self.currency.clone());
    }

    /// Re-derives every aggregate from raw lines and checks each invariant.
    /// Any violation is a programmer error: panic, never mask.
    pub(crate) fn assert_integrity(&self) {
        let mut total = Decimal::ZERO;
        let mut tendered = Decimal::ZERO;
        let mut change_due = Decimal::ZERO;

        for line in &self.lines {
            if line.extended.currency != self.currency {
                panic!(
                    "FINANCIAL INTEGRITY VIOLATION: line '{}' currency '{}' differs from transaction currency '{}'",
                    line.line_item_id, line.extended.currency, self.currency
                );
            }
            match line.line_type {
                LineType::Item => {
                    let expected = line.unit_price.amount * Decimal::from(line.quantity);
                    if line.extended.amount != expected {
                        panic!(
                            "FINANCIAL INTEGRITY VIOLATION: line '{}' extended {} != unit {} x qty {}",
                            line.line_item_id, line.extended.amount, line.unit_price.amount, line.quantity
                        );
                    }
                }
                LineType::Tender => {
                    if line.extended.amount >= Decimal::ZERO {
                        panic!(
                            "FINANCIAL INTEGRITY VIOLATION: tender line '{}' extended {} must be negative",
                            line.line_item_id, line.extended.amount
                        );
                    }
                }
                LineType::Change => {
                    if line.extended.amount <= Decimal::ZERO {
                        panic!(
                            "FINANCIAL INTEGRITY VIOLATION: change line '{}' extended {} must be positive",
                            line.line_item_id, line.extended.amount
                        );
                    }
                }
            }

            if let Some(parent_id) = &line.parent_line_item_id {
                let parent = self
                    .line(parent_id)
                    .unwrap_or_else(|| panic!(
                        "FINANCIAL INTEGRITY VIOLATION: line '{}' references missing parent '{}'",
                        line.line_item_id, parent_id
                    ));
                if line.display_indent_level != parent.display_indent_level + 1 {
                    panic!(
                        "FINANCIAL INTEGRITY VIOLATION: line '{}' indent {} != parent indent {} + 1",
                        line.line_item_id, line.display_indent_level, parent.display_indent_level
                    );
                }
                if parent.is_voided && !line.is_voided {
                    panic!(
                        "FINANCIAL INTEGRITY VIOLATION: live line '{}' under voided parent '{}'",
                        line.line_item_id, parent_id
                    );
                }
            }

            if !line.is_voided {
                match line.line_type {
                    LineType::Item => total += line.extended.amount,
                    LineType::Tender => tendered += -line.extended.amount,
                    LineType::Change => change_due += line.extended.amount,
                }
            }
        }

        if self.total.amount != total {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: stored total {} != derived {}",
                self.total.amount, total
            );
        }
        if self.tendered.amount != tendered {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: stored tendered {} != derived {}",
                self.tendered.amount, tendered
            );
        }
        if self.change_due.amount != change_due {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: stored change {} != derived {}",
                self.change_due.amount, change_due
            );
        }
        let balance = total - tendered + change_due;
        if self.balance_due.amount != balance {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: stored balance {} != derived {}",
                self.balance_due.amount, balance
            );
        }
        if self.state == TxState::EndOfTransaction && !balance.is_zero() {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: closed transaction {} has balance {}",
                self.id, balance
            );
        }
        let max_over = (tendered - total).max(Decimal::ZERO);
        if change_due > max_over {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: change {} exceeds overpayment {}",
                change_due, max_over
            );
        }
        if change_due > Decimal::ZERO && tendered < total {
            panic!(
                "FINANCIAL INTEGRITY VIOLATION: change {} issued while tendered {} < total {}",
                change_due, tendered, total
            );
        }
    }

    pub(crate) fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id.clone(),
            state: self.state,
            currency: self.currency.clone(),
            lines: self.lines.clone(),
            total: self.total.clone(),
            tendered: self.tendered.clone(),
            change_due: self.change_due.clone(),
            balance_due: self.balance_due.clone(),
        }
    }
}
