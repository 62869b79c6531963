//! Integration tests for the dashboard reconciler.
//!
//! Most tests feed change events straight into the reconciler's
//! `ChangeSubscriber` implementation; the last group runs it behind a real
//! registry on the in-memory transport.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use order_desk::adapters::{InMemoryOrderFetcher, InMemoryTransport, OpenBehavior};
use order_desk::application::{
    ChannelSettings, DashboardReconciler, DashboardSettings, SubscriptionRegistry,
};
use order_desk::domain::foundation::{BranchId, OrderId};
use order_desk::domain::orders::{OrderRecord, RefetchOutcome, ViewFilter};
use order_desk::domain::realtime::{BackoffPolicy, ChangeEvent, RealtimeError, Row};
use order_desk::ports::{ChangeSubscriber, OrderFetcher};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn row(value: JsonValue) -> Row {
    value.as_object().unwrap().clone()
}

fn order_row(id: i64, status: &str, customer_id: i64) -> Row {
    row(json!({
        "id": id,
        "branch_id": "B1",
        "status": status,
        "customer_id": customer_id,
        "created_at": "2024-03-01T12:00:00Z",
    }))
}

fn order(id: i64, status: &str, customer_id: i64) -> OrderRecord {
    OrderRecord::from_row(order_row(id, status, customer_id)).unwrap()
}

fn fetched_order(id: i64, status: &str, customer_id: i64, items: usize) -> OrderRecord {
    let mut fetched = order_row(id, status, customer_id);
    let line_items: Vec<JsonValue> = (0..items)
        .map(|n| json!({"id": 100 + n, "order_id": id, "quantity": 1}))
        .collect();
    fetched.insert("order_line_items".into(), JsonValue::Array(line_items));
    fetched.insert("customer".into(), json!({"id": customer_id, "name": "Ada"}));
    OrderRecord::from_fetched(fetched, "order_line_items").unwrap()
}

fn id(value: u64) -> OrderId {
    OrderId::from(value)
}

fn b1() -> BranchId {
    BranchId::new("B1").unwrap()
}

fn line_item_insert(order_id: i64) -> ChangeEvent {
    ChangeEvent::insert(
        "order_line_items",
        row(json!({"id": 500, "order_id": order_id, "quantity": 2})),
    )
}

fn setup(view: ViewFilter) -> (Arc<InMemoryOrderFetcher>, DashboardReconciler) {
    let fetcher = Arc::new(InMemoryOrderFetcher::new("branch_id"));
    let shared: Arc<dyn OrderFetcher> = fetcher.clone();
    let reconciler = DashboardReconciler::new(shared, DashboardSettings::default(), view);
    (fetcher, reconciler)
}

fn status_of(record: &OrderRecord) -> Option<&str> {
    record.status()
}

// =============================================================================
// Inserts and Patches
// =============================================================================

#[tokio::test(start_paused = true)]
async fn inserts_inside_the_view_are_added() {
    let (fetcher, reconciler) = setup(ViewFilter::all().for_branch(b1()));

    reconciler
        .on_event(&ChangeEvent::insert("orders", order_row(1, "new", 7)))
        .await
        .unwrap();
    reconciler
        .on_event(&ChangeEvent::insert(
            "orders",
            row(json!({"id": 2, "branch_id": "B2", "status": "new"})),
        ))
        .await
        .unwrap();

    let orders = reconciler.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id(), &id(1));
    assert_eq!(fetcher.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn tracked_column_updates_patch_in_place() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![fetched_order(1, "new", 7, 2)]).await;

    reconciler
        .on_event(&ChangeEvent::update(
            "orders",
            Some(row(json!({"id": 1}))),
            order_row(1, "cooking", 7),
        ))
        .await
        .unwrap();

    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(status_of(&record), Some("cooking"));
    assert!(!record.is_stale());
    assert_eq!(record.line_items().len(), 2);
    assert!(record.embedded().contains_key("customer"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fetcher.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn patches_that_leave_the_view_remove_the_order() {
    let (_fetcher, reconciler) = setup(ViewFilter::all().with_statuses(["new", "cooking"]));
    reconciler.replace_all(vec![order(1, "cooking", 7)]).await;

    reconciler
        .on_event(&ChangeEvent::update("orders", None, order_row(1, "delivered", 7)))
        .await
        .unwrap();

    assert!(reconciler.get(&id(1)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn deletes_remove_the_order() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    let mut revisions = reconciler.watch_revisions();
    let _ = revisions.borrow_and_update();

    reconciler
        .on_event(&ChangeEvent::delete("orders", row(json!({"id": 1}))))
        .await
        .unwrap();

    assert!(reconciler.get(&id(1)).await.is_none());
    assert!(revisions.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn events_without_an_id_are_reported_as_errors() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());

    let result = reconciler
        .on_event(&ChangeEvent::insert("orders", row(json!({"status": "new"}))))
        .await;

    assert!(result.is_err());
    assert!(reconciler.orders().await.is_empty());
}

// =============================================================================
// Refetches
// =============================================================================

#[tokio::test(start_paused = true)]
async fn join_key_changes_refetch_the_order() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![fetched_order(1, "new", 7, 1)]).await;
    fetcher.put(fetched_order(1, "new", 8, 1));

    reconciler
        .on_event(&ChangeEvent::update("orders", None, order_row(1, "new", 8)))
        .await
        .unwrap();
    assert!(reconciler.get(&id(1)).await.unwrap().is_stale());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let record = reconciler.get(&id(1)).await.unwrap();
    assert!(!record.is_stale());
    assert_eq!(record.column("customer_id"), Some(&json!(8)));
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(reconciler.pending_refetches().await, 0);
}

#[tokio::test(start_paused = true)]
async fn line_item_changes_refetch_the_parent() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![fetched_order(1, "new", 7, 1)]).await;
    fetcher.put(fetched_order(1, "new", 7, 2));

    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    assert!(reconciler.get(&id(1)).await.unwrap().is_stale());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(record.line_items().len(), 2);
    assert!(!record.is_stale());
}

#[tokio::test(start_paused = true)]
async fn bursts_of_events_coalesce_into_one_fetch() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.put(fetched_order(1, "new", 7, 5));

    for _ in 0..5 {
        reconciler.on_event(&line_item_insert(1)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(reconciler.get(&id(1)).await.unwrap().line_items().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn events_during_a_fetch_cause_exactly_one_follow_up() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.put(fetched_order(1, "new", 7, 1));
    fetcher.set_delay(Some(Duration::from_millis(500)));

    // Fetch runs from 250ms to 750ms.
    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    reconciler.on_event(&line_item_insert(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    fetcher.put(fetched_order(1, "ready", 7, 3));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(fetcher.fetch_count(), 2);
    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(status_of(&record), Some("ready"));
    assert_eq!(record.line_items().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unknown_orders_entering_the_view_are_fetched() {
    let (fetcher, reconciler) = setup(ViewFilter::all().with_statuses(["ready"]));
    fetcher.put(fetched_order(2, "ready", 7, 1));

    reconciler
        .on_event(&ChangeEvent::update("orders", None, order_row(2, "ready", 7)))
        .await
        .unwrap();
    assert!(reconciler.get(&id(2)).await.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(reconciler.get(&id(2)).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn empty_refetch_removes_the_order() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;

    reconciler
        .on_event(&ChangeEvent::update("orders", None, order_row(1, "new", 9)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(reconciler.get(&id(1)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_leaves_the_order_stale() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.set_failing(true);

    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let record = reconciler.get(&id(1)).await.unwrap();
    assert!(record.is_stale());
    assert_eq!(reconciler.pending_refetches().await, 0);
}

// =============================================================================
// Sequence Guard
// =============================================================================

#[tokio::test(start_paused = true)]
async fn older_refetch_results_are_discarded() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;

    let first = reconciler.begin_refetch(&id(1)).await;
    let second = reconciler.begin_refetch(&id(1)).await;

    assert_eq!(
        reconciler
            .apply_refetch(&second, Some(order(1, "ready", 7)))
            .await,
        RefetchOutcome::Applied
    );
    assert_eq!(
        reconciler
            .apply_refetch(&first, Some(order(1, "cooking", 7)))
            .await,
        RefetchOutcome::Discarded
    );

    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(status_of(&record), Some("ready"));
}

#[tokio::test(start_paused = true)]
async fn delete_invalidates_outstanding_tickets() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;

    let ticket = reconciler.begin_refetch(&id(1)).await;
    reconciler
        .on_event(&ChangeEvent::delete("orders", row(json!({"id": 1}))))
        .await
        .unwrap();

    assert_eq!(
        reconciler.apply_refetch(&ticket, Some(order(1, "new", 7))).await,
        RefetchOutcome::Discarded
    );
    assert!(reconciler.get(&id(1)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn delete_during_an_in_flight_fetch_keeps_the_order_gone() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.put(fetched_order(1, "new", 7, 1));
    fetcher.hold();

    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fetcher.fetch_count(), 1);

    reconciler
        .on_event(&ChangeEvent::delete("orders", row(json!({"id": 1}))))
        .await
        .unwrap();
    fetcher.release(1);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(reconciler.get(&id(1)).await.is_none());
    assert_eq!(reconciler.pending_refetches().await, 0);
}

#[tokio::test(start_paused = true)]
async fn patch_during_an_in_flight_fetch_is_not_overwritten() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![fetched_order(1, "new", 7, 1)]).await;
    fetcher.put(fetched_order(1, "new", 7, 1));
    fetcher.set_delay(Some(Duration::from_millis(500)));

    // Fetch runs from 250ms to 750ms and reads "new".
    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    reconciler
        .on_event(&ChangeEvent::update(
            "orders",
            Some(row(json!({"id": 1}))),
            order_row(1, "cooking", 7),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(360)).await;
    assert_eq!(
        status_of(&reconciler.get(&id(1)).await.unwrap()),
        Some("cooking")
    );
    fetcher.put(fetched_order(1, "cooking", 7, 2));

    tokio::time::sleep(Duration::from_secs(2)).await;

    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(status_of(&record), Some("cooking"));
    assert_eq!(record.line_items().len(), 2);
    assert_eq!(fetcher.fetch_count(), 2);
    assert_eq!(reconciler.pending_refetches().await, 0);
}

#[tokio::test(start_paused = true)]
async fn insert_during_an_in_flight_fetch_is_not_overwritten() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    fetcher.set_delay(Some(Duration::from_millis(500)));

    // The line item lands before its order; the fetch reads nothing at 750ms.
    reconciler.on_event(&line_item_insert(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    reconciler
        .on_event(&ChangeEvent::insert("orders", order_row(5, "new", 7)))
        .await
        .unwrap();
    assert!(reconciler.get(&id(5)).await.is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(reconciler.get(&id(5)).await.is_some());
    fetcher.put(fetched_order(5, "new", 7, 1));

    tokio::time::sleep(Duration::from_secs(2)).await;

    let record = reconciler.get(&id(5)).await.unwrap();
    assert_eq!(record.line_items().len(), 1);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn finished_refetches_leave_no_tickets_behind() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.put(fetched_order(1, "new", 7, 1));

    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    reconciler.on_event(&line_item_insert(2)).await.unwrap();
    for n in 100..200 {
        reconciler
            .on_event(&ChangeEvent::delete("orders", row(json!({"id": n}))))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    fetcher.set_failing(true);
    assert!(reconciler.refresh_order(&id(1)).await.is_err());

    assert_eq!(reconciler.outstanding_tickets().await, 0);
    assert_eq!(reconciler.pending_refetches().await, 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_order_bypasses_the_coalescing_window() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;
    fetcher.put(fetched_order(1, "ready", 7, 1));

    let outcome = reconciler.refresh_order(&id(1)).await.unwrap();

    assert_eq!(outcome, RefetchOutcome::Applied);
    assert_eq!(
        status_of(&reconciler.get(&id(1)).await.unwrap()),
        Some("ready")
    );
}

// =============================================================================
// Views
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reload_replaces_the_book_with_the_view() {
    let (fetcher, reconciler) = setup(ViewFilter::all().with_statuses(["new"]));
    fetcher.put(order(1, "new", 7));
    fetcher.put(order(2, "ready", 7));
    reconciler.replace_all(vec![order(3, "new", 7)]).await;

    let loaded = reconciler.reload().await.unwrap();

    assert_eq!(loaded, 1);
    let ids: Vec<OrderId> = reconciler
        .orders()
        .await
        .iter()
        .map(|r| r.id().clone())
        .collect();
    assert_eq!(ids, vec![id(1)]);
}

#[tokio::test(start_paused = true)]
async fn narrowing_the_view_prunes_orders() {
    let (_fetcher, reconciler) = setup(ViewFilter::all());
    reconciler
        .replace_all(vec![order(1, "new", 7), order(2, "ready", 7), order(3, "new", 7)])
        .await;

    let pruned = reconciler
        .set_view(ViewFilter::all().with_statuses(["new"]))
        .await;

    assert_eq!(pruned, 1);
    assert_eq!(reconciler.orders().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_pending_refetches() {
    let (fetcher, reconciler) = setup(ViewFilter::all());
    reconciler.replace_all(vec![order(1, "new", 7)]).await;

    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    reconciler.shutdown().await;
    reconciler.on_event(&line_item_insert(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(fetcher.fetch_count(), 0);
    assert_eq!(reconciler.pending_refetches().await, 0);
}

// =============================================================================
// Behind the Registry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn attached_reconciler_follows_the_branch_channel() {
    let transport = Arc::new(InMemoryTransport::new());
    let registry = SubscriptionRegistry::new(transport.clone(), ChannelSettings::default());
    let (fetcher, reconciler) = setup(ViewFilter::all().for_branch(b1()));
    fetcher.put(fetched_order(1, "new", 7, 1));

    let subscriptions = reconciler.attach(&registry).await.unwrap();
    assert_eq!(subscriptions.len(), 2);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.open_count("orders:branch:B1"), 1);

    transport.emit(
        "orders:branch:B1",
        ChangeEvent::insert("orders", order_row(1, "new", 7)),
    );
    transport.emit("orders:branch:B1", line_item_insert(1));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let record = reconciler.get(&id(1)).await.unwrap();
    assert_eq!(record.line_items().len(), 1);
    assert_eq!(fetcher.fetch_count(), 1);

    for subscription in &subscriptions {
        subscription.unsubscribe().await;
    }
    assert_eq!(transport.open_channel_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dashboards_sharing_a_registry_see_only_their_branch() {
    let transport = Arc::new(InMemoryTransport::new());
    let registry = SubscriptionRegistry::new(transport.clone(), ChannelSettings::default());
    let (_fetcher, kitchen) = setup(ViewFilter::all().for_branch(b1()));
    let (_other, front) = setup(ViewFilter::all().for_branch(b1()));

    let mut subscriptions = kitchen.attach(&registry).await.unwrap();
    subscriptions.extend(front.attach(&registry).await.unwrap());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.open_count("orders:branch:B1"), 1);

    transport.emit(
        "orders:branch:B1",
        ChangeEvent::insert("orders", order_row(1, "new", 7)),
    );
    transport.emit(
        "orders:branch:B1",
        ChangeEvent::insert(
            "orders",
            row(json!({"id": 2, "branch_id": "B2", "status": "new"})),
        ),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    for dashboard in [&kitchen, &front] {
        let ids: Vec<OrderId> = dashboard
            .orders()
            .await
            .iter()
            .map(|r| r.id().clone())
            .collect();
        assert_eq!(ids, vec![id(1)]);
    }

    for subscription in &subscriptions {
        subscription.unsubscribe().await;
    }
    assert_eq!(transport.open_channel_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn changes_between_attach_and_initial_load_are_kept() {
    let transport = Arc::new(InMemoryTransport::new());
    let registry = SubscriptionRegistry::new(transport.clone(), ChannelSettings::default());
    let (fetcher, reconciler) = setup(ViewFilter::all().for_branch(b1()));
    fetcher.put(order(1, "new", 7));

    let subscriptions = reconciler.attach(&registry).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Committed after the channel opened but before the initial load.
    fetcher.put(order(2, "new", 7));
    transport.emit(
        "orders:branch:B1",
        ChangeEvent::insert("orders", order_row(2, "new", 7)),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(reconciler.reload().await.unwrap(), 2);
    assert_eq!(reconciler.orders().await.len(), 2);

    transport.emit(
        "orders:branch:B1",
        ChangeEvent::update("orders", Some(row(json!({"id": 1}))), order_row(1, "cooking", 7)),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        status_of(&reconciler.get(&id(1)).await.unwrap()),
        Some("cooking")
    );

    for subscription in &subscriptions {
        subscription.unsubscribe().await;
    }
}

#[tokio::test(start_paused = true)]
async fn giving_up_is_surfaced_to_the_dashboard() {
    let transport = Arc::new(InMemoryTransport::with_behavior(OpenBehavior::Reject(
        "unauthorized".into(),
    )));
    let settings = ChannelSettings {
        backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 0),
        ..ChannelSettings::default()
    };
    let registry = SubscriptionRegistry::new(transport, settings);
    let (_fetcher, reconciler) = setup(ViewFilter::all().for_branch(b1()));

    let _subscriptions = reconciler.attach(&registry).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let error = reconciler.last_error().await.unwrap();
    assert!(matches!(error, RealtimeError::Terminal { attempts: 0, .. }));
    assert!(error.is_terminal());
}
