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

//! Data-driven modifier rule engine.
//!
//! ARCHITECTURAL PRINCIPLE: no modifier code is hardcoded anywhere in the
//! kernel. The rule graph (definitions, group membership, applicability per
//! SKU, implications, incompatibilities) is loaded once from the store
//! database at activation into immutable maps; validation and pricing are
//! pure functions over that graph. Identifier comparison is case-insensitive
//! throughout; iteration orders by display order then id so output is stable.

use async_trait::async_trait;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    Free,
    Surcharge,
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub id: String,
    pub name: String,
    /// Single group per modifier. Ungrouped modifiers carry `None`.
    pub group_code: Option<String>,
    pub adjustment_kind: AdjustmentKind,
    pub value: Decimal,
    pub is_automatic: bool,
    pub display_order: i32,
}

#[derive(Debug, Clone)]
pub struct ModifierGroup {
    pub code: String,
    pub name: String,
    pub single_select: bool,
    pub required: bool,
}

/// One caller-supplied modifier selection. The group is optional; when
/// present it must match the modifier's stored group.
#[derive(Debug, Clone)]
pub struct ModifierSelection {
    pub modifier_id: String,
    pub group_code: Option<String>,
    pub quantity: i32,
}

impl ModifierSelection {
    pub fn of(modifier_id: &str) -> Self {
        Self {
            modifier_id: modifier_id.to_string(),
            group_code: None,
            quantity: 1,
        }
    }
}

/// Outcome of validating a selection set against the rule graph.
#[derive(Debug, Clone)]
pub struct ModificationValidation {
    pub is_valid: bool,
    pub total_extra_price: Decimal,
    pub error_message: Option<String>,
}

impl ModificationValidation {
    fn invalid(message: String) -> Self {
        Self {
            is_valid: false,
            total_extra_price: Decimal::ZERO,
            error_message: Some(message),
        }
    }
}

#[async_trait]
pub trait ModifierService: Send + Sync {
    async fn validate_modifications(
        &self,
        product_id: &str,
        selections: &[ModifierSelection],
    ) -> Result<ModificationValidation, KernelError>;

    /// Sums surcharge pricing without running the rule checks. Display use
    /// only; authoritative pricing always goes through validation.
    async fn calculate_modification_total(
        &self,
        selections: &[ModifierSelection],
    ) -> Result<Decimal, KernelError>;
}

/// Immutable modifier graph for one store. All keys are uppercased ids.
pub struct ModifierRuleEngine {
    modifiers: HashMap<String, Modifier>,
    groups: BTreeMap<String, ModifierGroup>,
    applicability: HashMap<String, HashSet<String>>,
    implications: HashMap<String, Vec<String>>,
    incompatibilities: HashMap<String, HashSet<String>>,
    group_incompatibilities: HashMap<String, HashSet<String>>,
}

fn key(id: &str) -> String {
    id.trim().to_uppercase()
}

impl ModifierRuleEngine {
    /// Builds the graph from already-loaded parts. The SQLite loader and the
    /// test suites both come through here.
    pub fn from_parts(
        modifiers: Vec<Modifier>,
        groups: Vec<ModifierGroup>,
        applicability: impl IntoIterator<Item = (String, String)>,
        implications: impl IntoIterator<Item = (String, String)>,
        incompatibilities: impl IntoIterator<Item = (String, String)>,
        group_incompatibilities: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let modifiers: HashMap<String, Modifier> = modifiers
            .into_iter()
            .map(|mut m| {
                m.id = key(&m.id);
                m.group_code = m.group_code.as_deref().map(key);
                (m.id.clone(), m)
            })
            .collect();
        let groups: BTreeMap<String, ModifierGroup> = groups
            .into_iter()
            .map(|mut g| {
                g.code = key(&g.code);
                (g.code.clone(), g)
            })
            .collect();

        let mut applicability_map: HashMap<String, HashSet<String>> = HashMap::new();
        for (sku, modifier_id) in applicability {
            applicability_map
                .entry(key(&sku))
                .or_default()
                .insert(key(&modifier_id));
        }
        let mut implication_map: HashMap<String, Vec<String>> = HashMap::new();
        for (source, implied) in implications {
            implication_map.entry(key(&source)).or_default().push(key(&implied));
        }
        // Incompatibility is symmetric; record both directions.
        let mut incompatibility_map: HashMap<String, HashSet<String>> = HashMap::new();
        for (a, b) in incompatibilities {
            let (a, b) = (key(&a), key(&b));
            incompatibility_map.entry(a.clone()).or_default().insert(b.clone());
            incompatibility_map.entry(b).or_default().insert(a);
        }
        let mut group_incompatibility_map: HashMap<String, HashSet<String>> = HashMap::new();
        for (modifier_id, group_code) in group_incompatibilities {
            group_incompatibility_map
                .entry(key(&modifier_id))
                .or_default()
                .insert(key(&group_code));
        }

        Self {
            modifiers,
            groups,
            applicability: applicability_map,
            implications: implication_map,
            incompatibilities: incompatibility_map,
            group_incompatibilities: group_incompatibility_map,
        }
    }

    /// Loads the graph from the store database. Prices are stored in minor
    /// units and converted with the store currency's decimal places.
    pub fn load(conn: &Connection, decimal_places: u32) -> Result<Self, KernelError> {
        let load_err =
            |e: rusqlite::Error| KernelError::ConfigurationMissing(format!(
                "Failed to load modifier graph: {e}"
            ));

        let mut modifiers = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT m.modification_id, m.name, m.price_adjustment_type, m.base_price_cents, \
                            m.is_automatic, m.display_order, g.group_code \
                     FROM product_modifications m \
                     LEFT JOIN modification_group_members g ON g.modification_id = m.modification_id \
                     WHERE m.is_active = 1",
                )
                .map_err(load_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let adjustment: String = row.get(2)?;
                    Ok(Modifier {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        adjustment_kind: if adjustment.eq_ignore_ascii_case("SURCHARGE") {
                            AdjustmentKind::Surcharge
                        } else {
                            AdjustmentKind::Free
                        },
                        value: Decimal::new(row.get::<_, i64>(3)?, decimal_places),
                        is_automatic: row.get(4)?,
                        display_order: row.get(5)?,
                        group_code: row.get(6)?,
                    })
                })
                .map_err(load_err)?;
            for row in rows {
                modifiers.push(row.map_err(load_err)?);
            }
        }

        let mut groups = Vec::new();
        {
            let mut stmt = conn
                .prepare("SELECT code, name, selection_type, is_required FROM modification_groups")
                .map_err(load_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let selection_type: String = row.get(2)?;
                    Ok(ModifierGroup {
                        code: row.get(0)?,
                        name: row.get(1)?,
                        single_select: selection_type.eq_ignore_ascii_case("single"),
                        required: row.get::<_, i64>(3)? != 0,
                    })
                })
                .map_err(load_err)?;
            for row in rows {
                groups.push(row.map_err(load_err)?);
            }
        }

        let applicability = load_pairs(
            conn,
            "SELECT sku, modification_id FROM product_modifier_applicability WHERE is_active = 1",
        )
        .map_err(load_err)?;

        // The relation tables are optional; absent tables mean empty
        // relations, not misconfiguration.
        let implications = load_optional_pairs(
            conn,
            "modification_implications",
            "SELECT source_modification_id, implied_modification_id FROM modification_implications",
        )
        .map_err(load_err)?;
        let incompatibilities = load_optional_pairs(
            conn,
            "modification_incompatibilities",
            "SELECT modification_id, incompatible_modification_id FROM modification_incompatibilities",
        )
        .map_err(load_err)?;
        let group_incompatibilities = load_optional_pairs(
            conn,
            "modification_group_incompatibilities",
            "SELECT modification_id, incompatible_group_code FROM modification_group_incompatibilities",
        )
        .map_err(load_err)?;

        Ok(Self::from_parts(
            modifiers,
            groups,
            applicability,
            implications,
            incompatibilities,
            group_incompatibilities,
        ))
    }

    pub fn modifier(&self, id: &str) -> Option<&Modifier> {
        self.modifiers.get(&key(id))
    }

    pub fn group(&self, code: &str) -> Option<&ModifierGroup> {
        self.groups.get(&key(code))
    }

    /// Applicable modifiers for a SKU, ordered by display order then id.
    pub fn applicable_modifiers(&self, product_id: &str) -> Vec<&Modifier> {
        let mut out: Vec<&Modifier> = self
            .applicability
            .get(&key(product_id))
            .into_iter()
            .flatten()
            .filter_map(|id| self.modifiers.get(id))
            .collect();
        out.sort_by(|a, b| (a.display_order, &a.id).cmp(&(b.display_order, &b.id)));
        out
    }

    fn is_applicable(&self, product_key: &str, modifier_key: &str) -> bool {
        self.applicability
            .get(product_key)
            .map(|set| set.contains(modifier_key))
            .unwrap_or(false)
    }

    /// Runs the full validation pipeline: resolve, applicability, implication
    /// closure, incompatibilities, group incompatibilities, single-select,
    /// required groups, then surcharge pricing. Implications run before the
    /// conflict checks so implied modifiers participate in them; required
    /// groups run last so implied selections can satisfy them.
    pub fn validate(
        &self,
        product_id: &str,
        selections: &[ModifierSelection],
    ) -> ModificationValidation {
        let product_key = key(product_id);

        // Step 1+2: resolve each selection and verify applicability.
        let mut quantities: HashMap<String, i32> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for selection in selections {
            let modifier_key = key(&selection.modifier_id);
            let Some(modifier) = self.modifiers.get(&modifier_key) else {
                return ModificationValidation::invalid(format!(
                    "Modifier '{}' is not defined for this store",
                    selection.modifier_id
                ));
            };
            if let Some(group) = &selection.group_code {
                if modifier.group_code.as_deref() != Some(key(group).as_str()) {
                    return ModificationValidation::invalid(format!(
                        "Modifier '{}' does not belong to group '{}'",
                        modifier.id, group
                    ));
                }
            }
            if !self.is_applicable(&product_key, &modifier_key) {
                return ModificationValidation::invalid(format!(
                    "Modifier '{}' not applicable to product '{}'",
                    modifier.id, product_id
                ));
            }
            // Duplicate explicit selections accumulate quantity.
            match quantities.entry(modifier_key.clone()) {
                Entry::Occupied(mut entry) => *entry.get_mut() += selection.quantity,
                Entry::Vacant(entry) => {
                    entry.insert(selection.quantity);
                    order.push(modifier_key.clone());
                }
            }
        }

        // Step 3: breadth-first closure under implications. Implied modifiers
        // inherit the implier's quantity; an already-present modifier is not
        // double-counted. Unknown implied ids are advisory metadata and are
        // skipped.
        let mut queue: VecDeque<String> = order.iter().cloned().collect();
        while let Some(source) = queue.pop_front() {
            let source_qty = quantities[&source];
            let Some(implied_list) = self.implications.get(&source) else {
                continue;
            };
            for implied in implied_list {
                if quantities.contains_key(implied) {
                    continue;
                }
                let Some(implied_modifier) = self.modifiers.get(implied) else {
                    warn!(source = %source, implied = %implied, "implication references unknown modifier; skipped");
                    continue;
                };
                if !self.is_applicable(&product_key, implied) {
                    return ModificationValidation::invalid(format!(
                        "Implied modifier '{}' (required by '{}') not applicable to product '{}'",
                        implied_modifier.id, source, product_id
                    ));
                }
                quantities.insert(implied.clone(), source_qty);
                order.push(implied.clone());
                queue.push_back(implied.clone());
            }
        }

        // Deterministic order for the conflict checks and messages.
        let mut finalized: Vec<&Modifier> =
            order.iter().map(|id| &self.modifiers[id]).collect();
        finalized.sort_by(|a, b| (a.display_order, &a.id).cmp(&(b.display_order, &b.id)));

        // Step 4: pairwise incompatibilities over the closed set.
        for (i, a) in finalized.iter().enumerate() {
            for b in finalized.iter().skip(i + 1) {
                if self
                    .incompatibilities
                    .get(&a.id)
                    .map(|set| set.contains(&b.id))
                    .unwrap_or(false)
                {
                    return ModificationValidation::invalid(format!(
                        "Modifier '{}' cannot be combined with modifier '{}'",
                        a.id, b.id
                    ));
                }
            }
        }

        // Step 5: group incompatibilities.
        for a in &finalized {
            let Some(forbidden) = self.group_incompatibilities.get(&a.id) else {
                continue;
            };
            for b in &finalized {
                if a.id == b.id {
                    continue;
                }
                if let Some(group) = &b.group_code {
                    if forbidden.contains(group) {
                        return ModificationValidation::invalid(format!(
                            "Modifier '{}' cannot be combined with selections from group '{}'",
                            a.id, group
                        ));
                    }
                }
            }
        }

        // Step 6: single-select groups allow at most one distinct modifier.
        let mut members_by_group: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for m in &finalized {
            if let Some(group) = &m.group_code {
                members_by_group.entry(group).or_default().push(&m.id);
            }
        }
        for (group_code, members) in &members_by_group {
            if let Some(group) = self.groups.get(*group_code) {
                if group.single_select && members.len() > 1 {
                    return ModificationValidation::invalid(format!(
                        "Only one selection allowed from group '{group_code}'"
                    ));
                }
            }
        }

        // Step 7: required groups, scoped to groups with at least one member
        // applicable to this product.
        for (code, group) in &self.groups {
            if !group.required {
                continue;
            }
            let group_applies = self
                .applicable_modifiers(product_id)
                .iter()
                .any(|m| m.group_code.as_deref() == Some(code.as_str()));
            if group_applies && !members_by_group.contains_key(code.as_str()) {
                return ModificationValidation::invalid(format!(
                    "Required group '{code}' has no selection"
                ));
            }
        }

        // Step 8: price the closed set. Free modifiers contribute nothing.
        let mut total = Decimal::ZERO;
        for m in &finalized {
            if m.adjustment_kind == AdjustmentKind::Surcharge {
                total += m.value * Decimal::from(quantities[&m.id]);
            }
        }

        ModificationValidation {
            is_valid: true,
            total_extra_price: total,
            error_message: None,
        }
    }

    /// Sums surcharges over the raw selections, without rule checks.
    pub fn modification_total(&self, selections: &[ModifierSelection]) -> Decimal {
        selections
            .iter()
            .filter_map(|s| self.modifiers.get(&key(&s.modifier_id)).map(|m| (m, s.quantity)))
            .filter(|(m, _)| m.adjustment_kind == AdjustmentKind::Surcharge)
            .map(|(m, qty)| m.value * Decimal::from(qty))
            .sum()
    }
}

#[async_trait]
impl ModifierService for ModifierRuleEngine {
    async fn validate_modifications(
        &self,
        product_id: &str,
        selections: &[ModifierSelection],
    ) -> Result<ModificationValidation, KernelError> {
        Ok(self.validate(product_id, selections))
    }

    async fn calculate_modification_total(
        &self,
        selections: &[ModifierSelection],
    ) -> Result<Decimal, KernelError> {
        Ok(self.modification_total(selections))
    }
}

/// SQLite-backed service that holds the engine loaded at store activation.
pub struct SqliteModifierService {
    engine: ModifierRuleEngine,
}

impl SqliteModifierService {
    pub fn load(conn: &Arc<Mutex<Connection>>, decimal_places: u32) -> Result<Self, KernelError> {
        let conn = conn.lock().expect("modifier connection poisoned");
        Ok(Self {
            engine: ModifierRuleEngine::load(&conn, decimal_places)?,
        })
    }

    pub fn engine(&self) -> &ModifierRuleEngine {
        &self.engine
    }
}

#[async_trait]
impl ModifierService for SqliteModifierService {
    async fn validate_modifications(
        &self,
        product_id: &str,
        selections: &[ModifierSelection],
    ) -> Result<ModificationValidation, KernelError> {
        self.engine.validate_modifications(product_id, selections).await
    }

    async fn calculate_modification_total(
        &self,
        selections: &[ModifierSelection],
    ) -> Result<Decimal, KernelError> {
        self.engine.calculate_modification_total(selections).await
    }
}

fn load_pairs(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

fn load_optional_pairs(
    conn: &Connection,
    table: &str,
    sql: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(Vec::new());
    }
    load_pairs(conn, sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn surcharge(id: &str, group: Option<&str>, value: Decimal, order: i32) -> Modifier {
        Modifier {
            id: id.into(),
            name: id.into(),
            group_code: group.map(String::from),
            adjustment_kind: AdjustmentKind::Surcharge,
            value,
            is_automatic: false,
            display_order: order,
        }
    }

    fn free(id: &str, group: Option<&str>, order: i32) -> Modifier {
        Modifier {
            id: id.into(),
            name: id.into(),
            group_code: group.map(String::from),
            adjustment_kind: AdjustmentKind::Free,
            value: Decimal::ZERO,
            is_automatic: false,
            display_order: order,
        }
    }

    fn coffee_graph() -> ModifierRuleEngine {
        ModifierRuleEngine::from_parts(
            vec![
                surcharge("ICED", Some("TEMPERATURE"), dec!(0.10), 1),
                free("HOT", Some("TEMPERATURE"), 2),
                free("LESS_SUGAR", Some("SWEETNESS"), 3),
                surcharge("OAT_MILK", Some("MILK"), dec!(0.80), 4),
            ],
            vec![
                ModifierGroup {
                    code: "TEMPERATURE".into(),
                    name: "Temperature".into(),
                    single_select: true,
                    required: true,
                },
                ModifierGroup {
                    code: "SWEETNESS".into(),
                    name: "Sweetness".into(),
                    single_select: false,
                    required: false,
                },
                ModifierGroup {
                    code: "MILK".into(),
                    name: "Milk".into(),
                    single_select: true,
                    required: false,
                },
            ],
            [
                ("COFFEE".to_string(), "ICED".to_string()),
                ("COFFEE".to_string(), "HOT".to_string()),
                ("COFFEE".to_string(), "LESS_SUGAR".to_string()),
                ("COFFEE".to_string(), "OAT_MILK".to_string()),
            ],
            [],
            [("ICED".to_string(), "HOT".to_string())],
            [],
        )
    }

    #[test]
    fn single_valid_selection_prices_surcharge() {
        let engine = coffee_graph();
        let result = engine.validate("COFFEE", &[ModifierSelection::of("ICED")]);
        assert!(result.is_valid, "{:?}", result.error_message);
        assert_eq!(result.total_extra_price, dec!(0.10));
    }

    #[test]
    fn incompatible_pair_fails_before_single_select() {
        let engine = coffee_graph();
        let result = engine.validate(
            "COFFEE",
            &[ModifierSelection::of("ICED"), ModifierSelection::of("HOT")],
        );
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("cannot be combined"));
    }

    #[test]
    fn missing_required_group_fails_with_group_code() {
        let engine = coffee_graph();
        let result = engine.validate("COFFEE", &[ModifierSelection::of("LESS_SUGAR")]);
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("TEMPERATURE"));
    }

    #[test]
    fn unknown_modifier_fails() {
        let engine = coffee_graph();
        let result = engine.validate("COFFEE", &[ModifierSelection::of("GLITTER")]);
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("GLITTER"));
    }

    #[test]
    fn non_applicable_modifier_fails_with_both_names() {
        let engine = coffee_graph();
        let result = engine.validate("TEA", &[ModifierSelection::of("ICED")]);
        assert!(!result.is_valid);
        let message = result.error_message.unwrap();
        assert!(message.contains("ICED") && message.contains("TEA"));
    }

    #[test]
    fn ids_compare_case_insensitively() {
        let engine = coffee_graph();
        let result = engine.validate("coffee", &[ModifierSelection::of("iced")]);
        assert!(result.is_valid);
        assert_eq!(result.total_extra_price, dec!(0.10));
    }

    #[test]
    fn group_mismatch_in_selection_fails() {
        let engine = coffee_graph();
        let selection = ModifierSelection {
            modifier_id: "ICED".into(),
            group_code: Some("MILK".into()),
            quantity: 1,
        };
        let result = engine.validate("COFFEE", &[selection]);
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("does not belong"));
    }

    #[test]
    fn quantity_scales_surcharge() {
        let engine = coffee_graph();
        let selection = ModifierSelection {
            modifier_id: "ICED".into(),
            group_code: None,
            quantity: 3,
        };
        let result = engine.validate("COFFEE", &[selection]);
        assert!(result.is_valid);
        assert_eq!(result.total_extra_price, dec!(0.30));
    }

    #[test]
    fn implication_closure_participates_in_conflicts() {
        // WHIP implies ICED; ICED conflicts with HOT, so WHIP+HOT must fail
        // even though the caller never named ICED.
        let engine = ModifierRuleEngine::from_parts(
            vec![
                surcharge("WHIP", None, dec!(0.50), 1),
                surcharge("ICED", Some("TEMPERATURE"), dec!(0.10), 2),
                free("HOT", Some("TEMPERATURE"), 3),
            ],
            vec![ModifierGroup {
                code: "TEMPERATURE".into(),
                name: "Temperature".into(),
                single_select: true,
                required: false,
            }],
            [
                ("COFFEE".to_string(), "WHIP".to_string()),
                ("COFFEE".to_string(), "ICED".to_string()),
                ("COFFEE".to_string(), "HOT".to_string()),
            ],
            [("WHIP".to_string(), "ICED".to_string())],
            [("ICED".to_string(), "HOT".to_string())],
            [],
        );
        let result = engine.validate(
            "COFFEE",
            &[ModifierSelection::of("WHIP"), ModifierSelection::of("HOT")],
        );
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("cannot be combined"));

        // The closure also prices the implied surcharge.
        let priced = engine.validate("COFFEE", &[ModifierSelection::of("WHIP")]);
        assert!(priced.is_valid);
        assert_eq!(priced.total_extra_price, dec!(0.60));
    }

    #[test]
    fn implied_selection_satisfies_required_group() {
        let engine = ModifierRuleEngine::from_parts(
            vec![
                surcharge("FRAPPE_BASE", None, dec!(1.00), 1),
                surcharge("ICED", Some("TEMPERATURE"), dec!(0.10), 2),
            ],
            vec![ModifierGroup {
                code: "TEMPERATURE".into(),
                name: "Temperature".into(),
                single_select: true,
                required: true,
            }],
            [
                ("COFFEE".to_string(), "FRAPPE_BASE".to_string()),
                ("COFFEE".to_string(), "ICED".to_string()),
            ],
            [("FRAPPE_BASE".to_string(), "ICED".to_string())],
            [],
            [],
        );
        let result = engine.validate("COFFEE", &[ModifierSelection::of("FRAPPE_BASE")]);
        assert!(result.is_valid, "{:?}", result.error_message);
        assert_eq!(result.total_extra_price, dec!(1.10));
    }

    #[test]
    fn unknown_implied_id_is_skipped() {
        let engine = ModifierRuleEngine::from_parts(
            vec![surcharge("ICED", None, dec!(0.10), 1)],
            vec![],
            [("COFFEE".to_string(), "ICED".to_string())],
            [("ICED".to_string(), "PHANTOM".to_string())],
            [],
            [],
        );
        let result = engine.validate("COFFEE", &[ModifierSelection::of("ICED")]);
        assert!(result.is_valid);
        assert_eq!(result.total_extra_price, dec!(0.10));
    }

    #[test]
    fn group_incompatibility_blocks_whole_group() {
        let engine = ModifierRuleEngine::from_parts(
            vec![
                free("NO_DAIRY", None, 1),
                surcharge("OAT_MILK", Some("MILK"), dec!(0.80), 2),
            ],
            vec![ModifierGroup {
                code: "MILK".into(),
                name: "Milk".into(),
                single_select: true,
                required: false,
            }],
            [
                ("COFFEE".to_string(), "NO_DAIRY".to_string()),
                ("COFFEE".to_string(), "OAT_MILK".to_string()),
            ],
            [],
            [],
            [("NO_DAIRY".to_string(), "MILK".to_string())],
        );
        let result = engine.validate(
            "COFFEE",
            &[ModifierSelection::of("NO_DAIRY"), ModifierSelection::of("OAT_MILK")],
        );
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("MILK"));
    }

    #[test]
    fn single_select_rejects_two_compatible_members() {
        let engine = ModifierRuleEngine::from_parts(
            vec![
                surcharge("OAT_MILK", Some("MILK"), dec!(0.80), 1),
                surcharge("SOY_MILK", Some("MILK"), dec!(0.60), 2),
            ],
            vec![ModifierGroup {
                code: "MILK".into(),
                name: "Milk".into(),
                single_select: true,
                required: false,
            }],
            [
                ("COFFEE".to_string(), "OAT_MILK".to_string()),
                ("COFFEE".to_string(), "SOY_MILK".to_string()),
            ],
            [],
            [],
            [],
        );
        let result = engine.validate(
            "COFFEE",
            &[ModifierSelection::of("OAT_MILK"), ModifierSelection::of("SOY_MILK")],
        );
        assert!(!result.is_valid);
        assert!(result.error_message.unwrap().contains("Only one selection"));
    }

    #[test]
    fn validation_is_deterministic() {
        let engine = coffee_graph();
        let selections = [ModifierSelection::of("ICED"), ModifierSelection::of("LESS_SUGAR")];
        let first = engine.validate("COFFEE", &selections);
        let second = engine.validate("COFFEE", &selections);
        assert_eq!(first.is_valid, second.is_valid);
        assert_eq!(first.total_extra_price, second.total_extra_price);
        assert_eq!(first.error_message, second.error_message);
    }
}
