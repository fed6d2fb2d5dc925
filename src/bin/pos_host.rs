// src/bin/pos_host.rs
// Reference CLI host: loads store profiles, migrates the store database,
// activates the store extension, and drives a scripted checkout through the
// tool execution layer. Exit codes: 0 clean, 2 profile load failure, 3 no
// profiles discovered, 1 otherwise.

use pos_kernel_core::extension::{
    InMemoryCatalog, ModifierRuleEngine, ProductInfo, SqliteModifierService,
    SqliteProductCatalog, StandardCurrencyFormatter, StoreExtension,
};
use pos_kernel_core::migration::{baseline_migration_info, MigrationRunner};
use pos_kernel_core::profile::{load_profile_index, ProfileError, StoreProfile};
use pos_kernel_core::tools::{build_kernel_tools, ToolContext};
use pos_kernel_core::{
    DefaultPaymentRules, KernelClient, PaymentRules, ProductId, ProfilePaymentRules,
    SessionManager, TransactionEngine,
};

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "pos-host starting");

    let args: Vec<String> = std::env::args().collect();
    let index_path = flag_value(&args, "--profiles")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stores/index.toml"));
    let store_id = flag_value(&args, "--store");

    let profiles = match load_profile_index(&index_path) {
        Ok(profiles) => profiles,
        Err(ProfileError::NoProfiles(path)) => {
            error!(path = %path.display(), "no store profiles discovered");
            return ExitCode::from(3);
        }
        Err(err) => {
            error!(%err, "failed to load store profiles");
            return ExitCode::from(2);
        }
    };

    let profile = match &store_id {
        Some(id) => match profiles.iter().find(|p| p.store_id.eq_ignore_ascii_case(id)) {
            Some(profile) => profile.clone(),
            None => {
                error!(store_id = %id, "requested store not in profile index");
                return ExitCode::from(2);
            }
        },
        None => profiles[0].clone(),
    };
    info!(store_id = %profile.store_id, display_name = %profile.display_name, "store selected");

    match run_store(&index_path, profile).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "host failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_store(
    index_path: &Path,
    profile: StoreProfile,
) -> Result<(), Box<dyn std::error::Error>> {
    let formatter = Arc::new(StandardCurrencyFormatter);
    let decimal_places = {
        use pos_kernel_core::extension::CurrencyFormatter;
        formatter.decimal_places(&profile.currency)
    };
    let cancel = CancellationToken::new();

    // Stores with a database get the SQLite-backed services after migration;
    // stores without one run on the built-in demo catalog.
    let extension = match &profile.database {
        Some(db) => {
            let base = index_path.parent().unwrap_or_else(|| Path::new("."));
            let db_path = base.join(&db.connection_string);
            if !db_path.exists() {
                // New store: bootstrap an empty database file, then migrate.
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::File::create(&db_path)?;
            }
            let info = baseline_migration_info(&profile.store_id);
            let report = MigrationRunner::run(&db_path, &info, &cancel)?;
            info!(
                store = %profile.store_id,
                version = report.current_version,
                applied = report.applied.len(),
                "store database ready"
            );

            let conn = Arc::new(Mutex::new(Connection::open(&db_path)?));
            seed_demo_catalog(&conn)?;
            let modifier_service = SqliteModifierService::load(&conn, decimal_places)?;
            StoreExtension::builder()
                .catalog(Arc::new(SqliteProductCatalog::new(
                    Arc::clone(&conn),
                    decimal_places,
                )))
                .modifications(Arc::new(modifier_service))
                .currency_formatter(formatter)
                .build()?
        }
        None => StoreExtension::builder()
            .catalog(Arc::new(demo_catalog()))
            .modifications(Arc::new(ModifierRuleEngine::from_parts(
                vec![],
                vec![],
                [],
                [],
                [],
                [],
            )))
            .currency_formatter(formatter)
            .build()?,
    };

    let payment_rules: Arc<dyn PaymentRules> = if profile.payment_types.is_empty() {
        Arc::new(DefaultPaymentRules)
    } else {
        Arc::new(ProfilePaymentRules::new(profile.tender_types()))
    };

    let sessions = Arc::new(SessionManager::new());
    let engine = Arc::new(TransactionEngine::new(sessions, payment_rules));
    let client = Arc::new(KernelClient::new(engine));
    let session_id = client.create_session("HOST_TERM_01", "host")?;

    let currency = profile.currency.clone();
    let context = Arc::new(ToolContext::new(
        Arc::clone(&client),
        extension,
        profile,
        session_id.clone(),
    ));
    let tools = build_kernel_tools(Arc::clone(&context));

    // Scripted checkout: start, ring two items, show, pay exact, show.
    let started = tools
        .execute_tool(
            "start_transaction",
            &HashMap::from([("currency".to_string(), json!(currency))]),
            &cancel,
        )
        .await?;
    expect_success(&started, "start_transaction")?;

    let added = tools
        .execute_tool(
            "add_item",
            &HashMap::from([
                ("product_id".to_string(), json!("COFFEE.SMALL")),
                ("quantity".to_string(), json!(2)),
            ]),
            &cancel,
        )
        .await?;
    expect_success(&added, "add_item")?;
    let total = added["transaction"]["total"]["amount"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| added["transaction"]["total"]["amount"].to_string());
    let _ = Decimal::from_str_exact(&total)?;

    let paid = tools
        .execute_tool(
            "pay",
            &HashMap::from([("amount".to_string(), json!(total))]),
            &cancel,
        )
        .await?;
    expect_success(&paid, "pay")?;

    let shown = tools.execute_tool("show", &HashMap::new(), &cancel).await?;
    if let Some(receipt) = shown["receipt"].as_str() {
        println!("{receipt}");
    }

    client.close_session(&session_id)?;
    info!("checkout complete");
    Ok(())
}

fn expect_success(result: &Value, tool: &str) -> Result<(), Box<dyn std::error::Error>> {
    if result["success"].as_bool() == Some(true) {
        return Ok(());
    }
    let errors = result["errors"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();
    Err(format!("{tool} failed: {errors}").into())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new([
        ProductInfo {
            sku: ProductId::from("COFFEE.SMALL"),
            name: "Small Coffee".to_string(),
            description: "House blend, 8oz".to_string(),
            category: "DRINKS".to_string(),
            base_price: Decimal::new(350, 2),
            is_active: true,
        },
        ProductInfo {
            sku: ProductId::from("COFFEE.LARGE"),
            name: "Large Coffee".to_string(),
            description: "House blend, 16oz".to_string(),
            category: "DRINKS".to_string(),
            base_price: Decimal::new(450, 2),
            is_active: true,
        },
        ProductInfo {
            sku: ProductId::from("MUFFIN.BLUEBERRY"),
            name: "Blueberry Muffin".to_string(),
            description: "Baked daily".to_string(),
            category: "BAKERY".to_string(),
            base_price: Decimal::new(275, 2),
            is_active: true,
        },
    ])
}

/// Gives a freshly-migrated, empty database something to sell so the demo
/// checkout can run end to end.
fn seed_demo_catalog(conn: &Arc<Mutex<Connection>>) -> rusqlite::Result<()> {
    let conn = conn.lock().expect("seed connection poisoned");
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(());
    }
    conn.execute_batch(
        "INSERT INTO products (sku, name, description, category_id, base_price, is_active) VALUES
            ('COFFEE.SMALL', 'Small Coffee', 'House blend, 8oz', 'DRINKS', 350, 1),
            ('COFFEE.LARGE', 'Large Coffee', 'House blend, 16oz', 'DRINKS', 450, 1),
            ('MUFFIN.BLUEBERRY', 'Blueberry Muffin', 'Baked daily', 'BAKERY', 275, 1);
         INSERT INTO product_modifications
            (modification_id, name, modification_type, price_adjustment_type, base_price_cents, is_automatic, display_order, is_active) VALUES
            ('ICED', 'Iced', 'PREPARATION', 'SURCHARGE', 10, 0, 1, 1),
            ('LESS_SUGAR', 'Less Sugar', 'PREPARATION', 'FREE', 0, 0, 2, 1);
         INSERT INTO product_modifier_applicability (sku, modification_id, is_active) VALUES
            ('COFFEE.SMALL', 'ICED', 1),
            ('COFFEE.SMALL', 'LESS_SUGAR', 1),
            ('COFFEE.LARGE', 'ICED', 1),
            ('COFFEE.LARGE', 'LESS_SUGAR', 1);",
    )
}
