// Modifier rule engine over a real store database: migrate, seed the rule
// graph, load, validate.

use pos_kernel_core::extension::{ModifierSelection, ModifierService, SqliteModifierService};
use pos_kernel_core::migration::{baseline_migration_info, MigrationRunner};
use rusqlite::Connection;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Builds the S6 store: COFFEE may be ICED or LESS_SUGAR; ICED conflicts
/// with HOT; TEMPERATURE is a required single-select group over ICED/HOT.
fn s6_store(dir: &TempDir) -> Arc<Mutex<Connection>> {
    let db = dir.path().join("store.db");
    std::fs::File::create(&db).unwrap();
    let info = baseline_migration_info("S6_STORE");
    MigrationRunner::run(&db, &info, &CancellationToken::new()).unwrap();

    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "INSERT INTO products (sku, name, description, category_id, base_price, is_active) VALUES
            ('COFFEE', 'Coffee', '', 'DRINKS', 300, 1);
         INSERT INTO product_modifications
            (modification_id, name, modification_type, price_adjustment_type, base_price_cents, is_automatic, display_order, is_active) VALUES
            ('ICED', 'Iced', 'PREP', 'SURCHARGE', 10, 0, 1, 1),
            ('HOT', 'Hot', 'PREP', 'FREE', 0, 0, 2, 1),
            ('LESS_SUGAR', 'Less Sugar', 'PREP', 'FREE', 0, 0, 3, 1);
         INSERT INTO modification_groups (code, name, selection_type, is_required) VALUES
            ('TEMPERATURE', 'Temperature', 'single', 1);
         INSERT INTO modification_group_members (modification_id, group_code) VALUES
            ('ICED', 'TEMPERATURE'),
            ('HOT', 'TEMPERATURE');
         INSERT INTO product_modifier_applicability (sku, modification_id, is_active) VALUES
            ('COFFEE', 'ICED', 1),
            ('COFFEE', 'LESS_SUGAR', 1),
            ('COFFEE', 'HOT', 1);
         INSERT INTO modification_incompatibilities (modification_id, incompatible_modification_id) VALUES
            ('ICED', 'HOT');",
    )
    .unwrap();
    Arc::new(Mutex::new(conn))
}

#[tokio::test]
async fn iced_alone_is_valid_with_surcharge() {
    let dir = TempDir::new().unwrap();
    let service = SqliteModifierService::load(&s6_store(&dir), 2).unwrap();
    let result = service
        .validate_modifications("COFFEE", &[ModifierSelection::of("ICED")])
        .await
        .unwrap();
    assert!(result.is_valid, "{:?}", result.error_message);
    assert_eq!(result.total_extra_price, dec!(0.10));
}

#[tokio::test]
async fn iced_and_hot_cannot_be_combined() {
    let dir = TempDir::new().unwrap();
    let service = SqliteModifierService::load(&s6_store(&dir), 2).unwrap();
    let result = service
        .validate_modifications(
            "COFFEE",
            &[ModifierSelection::of("ICED"), ModifierSelection::of("HOT")],
        )
        .await
        .unwrap();
    assert!(!result.is_valid);
    assert!(result.error_message.unwrap().contains("cannot be combined"));
}

#[tokio::test]
async fn less_sugar_alone_misses_required_temperature() {
    let dir = TempDir::new().unwrap();
    let service = SqliteModifierService::load(&s6_store(&dir), 2).unwrap();
    let result = service
        .validate_modifications("COFFEE", &[ModifierSelection::of("LESS_SUGAR")])
        .await
        .unwrap();
    assert!(!result.is_valid);
    assert!(result.error_message.unwrap().contains("TEMPERATURE"));
}

#[tokio::test]
async fn validation_is_deterministic_across_calls() {
    let dir = TempDir::new().unwrap();
    let service = SqliteModifierService::load(&s6_store(&dir), 2).unwrap();
    let selections = [
        ModifierSelection::of("ICED"),
        ModifierSelection::of("LESS_SUGAR"),
    ];
    let first = service
        .validate_modifications("COFFEE", &selections)
        .await
        .unwrap();
    let second = service
        .validate_modifications("COFFEE", &selections)
        .await
        .unwrap();
    assert_eq!(first.is_valid, second.is_valid);
    assert_eq!(first.total_extra_price, second.total_extra_price);
    assert_eq!(first.error_message, second.error_message);
}

#[tokio::test]
async fn modification_total_sums_surcharges_only() {
    let dir = TempDir::new().unwrap();
    let service = SqliteModifierService::load(&s6_store(&dir), 2).unwrap();
    let total = service
        .calculate_modification_total(&[
            ModifierSelection::of("ICED"),
            ModifierSelection::of("LESS_SUGAR"),
        ])
        .await
        .unwrap();
    assert_eq!(total, dec!(0.10));
}

#[tokio::test]
async fn inactive_modifiers_are_not_loaded() {
    let dir = TempDir::new().unwrap();
    let conn = s6_store(&dir);
    conn.lock()
        .unwrap()
        .execute("UPDATE product_modifications SET is_active = 0 WHERE modification_id = 'ICED'", [])
        .unwrap();
    let service = SqliteModifierService::load(&conn, 2).unwrap();
    let result = service
        .validate_modifications("COFFEE", &[ModifierSelection::of("ICED")])
        .await
        .unwrap();
    assert!(!result.is_valid);
    assert!(result.error_message.unwrap().contains("not defined"));
}
