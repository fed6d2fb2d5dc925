// End-to-end transaction lifecycle scenarios against the in-process kernel
// client.

use pos_kernel_core::{
    AddLineItem, DefaultPaymentRules, KernelClient, LineType, Money, PaymentTenderType,
    ProductId, ProfilePaymentRules, SessionManager, TransactionEngine, TransactionResult,
    TxState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn client_with_default_rules() -> (KernelClient, String) {
    let sessions = Arc::new(SessionManager::new());
    let engine = Arc::new(TransactionEngine::new(sessions, Arc::new(DefaultPaymentRules)));
    let client = KernelClient::new(engine);
    let session = client.create_session("TERM1", "OP1").unwrap();
    (client, session)
}

fn item(product: &str, qty: i32, price: Decimal) -> AddLineItem {
    AddLineItem {
        product_id: ProductId::from(product),
        quantity: qty,
        unit_price: Money::new(price, "USD"),
        product_name: None,
        product_description: None,
        parent_line_item_id: None,
    }
}

fn ok(result: TransactionResult) -> pos_kernel_core::TransactionSnapshot {
    assert!(result.success, "expected success, got {:?}", result.errors);
    result.transaction.unwrap()
}

#[test]
fn basic_lifecycle_cash_exact() {
    // S1: two small coffees, paid exactly in cash.
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    assert_eq!(tx.state, TxState::StartTransaction);

    let tx = ok(client.add_line_item(
        &session,
        &tx.id,
        item("COFFEE.SMALL", 2, dec!(3.50)),
        &cancel,
    ));
    assert_eq!(tx.state, TxState::ItemsPending);
    assert_eq!(tx.total.amount, dec!(7.00));

    let tx = ok(client.process_payment(&session, &tx.id, dec!(7.00), "cash", &cancel));
    assert_eq!(tx.state, TxState::EndOfTransaction);
    assert_eq!(tx.total.amount, dec!(7.00));
    assert_eq!(tx.tendered.amount, dec!(7.00));
    assert_eq!(tx.change_due.amount, dec!(0));
    assert_eq!(tx.balance_due.amount, dec!(0));

    let items: Vec<_> = tx.live_lines(LineType::Item).collect();
    let tenders: Vec<_> = tx.live_lines(LineType::Tender).collect();
    let changes: Vec<_> = tx.live_lines(LineType::Change).collect();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].extended.amount, dec!(7.00));
    assert_eq!(tenders.len(), 1);
    assert_eq!(tenders[0].extended.amount, dec!(-7.00));
    assert!(changes.is_empty());
}

#[test]
fn over_tender_with_cash_issues_change() {
    // S2: 8.00 of items, 10.00 cash, 2.00 change.
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("SANDWICH", 1, dec!(8.00)), &cancel));
    let tx = ok(client.process_payment(&session, &tx.id, dec!(10.00), "cash", &cancel));

    assert_eq!(tx.state, TxState::EndOfTransaction);
    assert_eq!(tx.tendered.amount, dec!(10.00));
    assert_eq!(tx.change_due.amount, dec!(2.00));
    assert_eq!(tx.balance_due.amount, dec!(0));

    let tenders: Vec<_> = tx.live_lines(LineType::Tender).collect();
    let changes: Vec<_> = tx.live_lines(LineType::Change).collect();
    assert_eq!(tenders.len(), 1);
    assert_eq!(tenders[0].extended.amount, dec!(-10.00));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].extended.amount, dec!(2.00));
}

#[test]
fn partial_tenders_accumulate_until_paid() {
    // S3: 5.00 of items paid 2.00 then 3.00; a third payment is rejected.
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("BAGEL", 5, dec!(1.00)), &cancel));

    let tx_after_first = ok(client.process_payment(&session, &tx.id, dec!(2.00), "cash", &cancel));
    assert_eq!(tx_after_first.state, TxState::ItemsPending);
    assert_eq!(tx_after_first.tendered.amount, dec!(2.00));
    assert_eq!(tx_after_first.balance_due.amount, dec!(3.00));
    assert_eq!(tx_after_first.live_lines(LineType::Change).count(), 0);

    let tx_after_second = ok(client.process_payment(&session, &tx.id, dec!(3.00), "cash", &cancel));
    assert_eq!(tx_after_second.state, TxState::EndOfTransaction);
    assert_eq!(tx_after_second.tendered.amount, dec!(5.00));
    assert_eq!(tx_after_second.change_due.amount, dec!(0));
    let tender_amounts: Vec<Decimal> = tx_after_second
        .live_lines(LineType::Tender)
        .map(|l| l.extended.amount)
        .collect();
    assert_eq!(tender_amounts, vec![dec!(-2.00), dec!(-3.00)]);
    assert_eq!(tx_after_second.live_lines(LineType::Change).count(), 0);

    let third = client.process_payment(&session, &tx.id, dec!(1.00), "cash", &cancel);
    assert!(!third.success);
}

#[test]
fn modifier_cascade_void() {
    // S4: drink with two linked modifier lines; voiding the parent voids
    // everything and zeroes the total.
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("DRINK", 1, dec!(5.00)), &cancel));
    let parent_id = tx.lines[0].line_item_id.clone();

    let mut iced = item("MOD_ICED", 1, dec!(0.10));
    iced.parent_line_item_id = Some(parent_id.clone());
    let tx = ok(client.add_line_item(&session, &tx.id, iced, &cancel));

    let mut less_sugar = item("MOD_LESS_SUGAR", 1, dec!(0.00));
    less_sugar.parent_line_item_id = Some(parent_id.clone());
    let tx = ok(client.add_line_item(&session, &tx.id, less_sugar, &cancel));
    assert_eq!(tx.total.amount, dec!(5.10));

    let tx = ok(client.void_line_item(&session, &tx.id, &parent_id, Some("changed mind"), &cancel));
    assert!(tx.lines.iter().all(|l| l.is_voided));
    assert_eq!(tx.total.amount, dec!(0.00));
    assert_eq!(tx.balance_due.amount, dec!(0.00));
}

#[test]
fn non_cash_overpay_rejected_without_mutation() {
    // S5: exact card payment completes; card overpay fails and leaves the
    // transaction untouched.
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("SALAD", 1, dec!(5.00)), &cancel));
    let tx = ok(client.process_payment(&session, &tx.id, dec!(5.00), "card", &cancel));
    assert_eq!(tx.state, TxState::EndOfTransaction);

    let tx2 = ok(client.start_transaction(&session, "USD", &cancel));
    let tx2 = ok(client.add_line_item(&session, &tx2.id, item("SALAD", 1, dec!(5.00)), &cancel));
    let rejected = client.process_payment(&session, &tx2.id, dec!(10.00), "card", &cancel);
    assert!(!rejected.success);
    assert!(rejected.errors[0].contains("cannot issue change"));

    let after = ok(client.get_transaction(&session, &tx2.id));
    assert_eq!(after.state, TxState::ItemsPending);
    assert_eq!(after.live_lines(LineType::Tender).count(), 0);
    assert_eq!(after.tendered.amount, dec!(0));
}

#[test]
fn unknown_tender_fails_fast() {
    let sessions = Arc::new(SessionManager::new());
    let rules = ProfilePaymentRules::new(vec![PaymentTenderType {
        id: "cash".into(),
        allows_change: true,
        requires_exact: false,
    }]);
    let engine = Arc::new(TransactionEngine::new(sessions, Arc::new(rules)));
    let client = KernelClient::new(engine);
    let session = client.create_session("TERM1", "OP1").unwrap();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("A", 1, dec!(1.00)), &cancel));
    let rejected = client.process_payment(&session, &tx.id, dec!(1.00), "bitcoin", &cancel);
    assert!(!rejected.success);
    assert!(rejected.errors[0].contains("Invalid payment type"));
}

#[test]
fn exact_required_tender_rejects_inexact_amounts() {
    let sessions = Arc::new(SessionManager::new());
    let rules = ProfilePaymentRules::new(vec![
        PaymentTenderType {
            id: "cash".into(),
            allows_change: true,
            requires_exact: false,
        },
        PaymentTenderType {
            id: "voucher".into(),
            allows_change: false,
            requires_exact: true,
        },
    ]);
    let engine = Arc::new(TransactionEngine::new(sessions, Arc::new(rules)));
    let client = KernelClient::new(engine);
    let session = client.create_session("TERM1", "OP1").unwrap();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let tx = ok(client.add_line_item(&session, &tx.id, item("A", 1, dec!(5.00)), &cancel));

    let short = client.process_payment(&session, &tx.id, dec!(3.00), "voucher", &cancel);
    assert!(!short.success);
    assert!(short.errors[0].contains("exact"));

    let exact = ok(client.process_payment(&session, &tx.id, dec!(5.00), "voucher", &cancel));
    assert_eq!(exact.state, TxState::EndOfTransaction);
    assert_eq!(exact.change_due.amount, dec!(0));
}

#[test]
fn snapshots_reflect_prior_calls_in_order() {
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();

    let tx = ok(client.start_transaction(&session, "USD", &cancel));
    let first = ok(client.add_line_item(&session, &tx.id, item("A", 1, dec!(1.00)), &cancel));
    assert_eq!(first.lines.len(), 1);
    let second = ok(client.add_line_item(&session, &tx.id, item("B", 1, dec!(2.00)), &cancel));
    assert_eq!(second.lines.len(), 2);
    assert_eq!(second.total.amount, dec!(3.00));

    let line_ids: Vec<_> = second.lines.iter().map(|l| l.line_item_id.clone()).collect();
    let read_back = ok(client.get_transaction(&session, &tx.id));
    let read_ids: Vec<_> = read_back.lines.iter().map(|l| l.line_item_id.clone()).collect();
    assert_eq!(line_ids, read_ids);
}

#[test]
fn cancelled_token_blocks_mutation() {
    let (client, session) = client_with_default_rules();
    let cancel = CancellationToken::new();
    let tx = ok(client.start_transaction(&session, "USD", &cancel));

    cancel.cancel();
    let blocked = client.add_line_item(&session, &tx.id, item("A", 1, dec!(1.00)), &cancel);
    assert!(!blocked.success);
    assert!(blocked.errors[0].contains("cancelled"));
}
