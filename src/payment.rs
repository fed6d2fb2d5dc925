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

//! Pluggable payment policy.
//!
//! ARCHITECTURAL PRINCIPLE: the kernel never hardcodes tender semantics.
//! Normalization and change eligibility live behind this trait so store
//! extensions can drive them from profile data. `normalize_tender_type`
//! returns `None` for invalid input; there is no hidden default tender.

use std::collections::HashMap;

use crate::profile::PaymentTenderType;

pub trait PaymentRules: Send + Sync {
    /// Pure, culture-neutral canonicalization. `None` means the tender is
    /// unknown and the engine fails fast.
    fn normalize_tender_type(&self, raw: &str) -> Option<String>;

    /// Whether an overpayment with this tender may produce a change line.
    fn can_issue_change(&self, canonical: &str) -> bool;

    /// Whether this tender must match the outstanding balance exactly.
    /// Checked before change handling, so a tender flagged both exact and
    /// change-capable is effectively exact-only.
    fn requires_exact(&self, _canonical: &str) -> bool {
        false
    }
}

/// Default policy: any non-blank trimmed tender is accepted verbatim
/// (lowercased); only `cash` issues change; nothing requires exact amounts.
#[derive(Debug, Default)]
pub struct DefaultPaymentRules;

impl PaymentRules for DefaultPaymentRules {
    fn normalize_tender_type(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.to_lowercase())
    }

    fn can_issue_change(&self, canonical: &str) -> bool {
        canonical.eq_ignore_ascii_case("cash")
    }
}

/// Policy driven by the store profile's declared tender types.
pub struct ProfilePaymentRules {
    tenders: HashMap<String, PaymentTenderType>,
}

impl ProfilePaymentRules {
    pub fn new(tenders: impl IntoIterator<Item = PaymentTenderType>) -> Self {
        Self {
            tenders: tenders
                .into_iter()
                .map(|t| (t.id.to_lowercase(), t))
                .collect(),
        }
    }
}

impl PaymentRules for ProfilePaymentRules {
    fn normalize_tender_type(&self, raw: &str) -> Option<String> {
        let key = raw.trim().to_lowercase();
        self.tenders.contains_key(&key).then_some(key)
    }

    fn can_issue_change(&self, canonical: &str) -> bool {
        self.tenders
            .get(canonical)
            .map(|t| t.allows_change)
            .unwrap_or(false)
    }

    fn requires_exact(&self, canonical: &str) -> bool {
        self.tenders
            .get(canonical)
            .map(|t| t.requires_exact)
            .unwrap_or(false)
    }
}
