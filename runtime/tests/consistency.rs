//! Consistency engine behaviour against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stockroom_core::{
    ArticleCode, ExecCtx, InventoryError, LineItem, OrderNumber, OrderNumbering, Price,
    ReservationRequest, ReservationStatus, SaleRequest, StockItem,
};
use stockroom_core::environment::Clock;
use stockroom_runtime::InventoryEngine;
use stockroom_testing::properties::unique_lines;
use stockroom_testing::{test_clock, InMemoryInventoryStore, RecordingMetrics};

type Engine = InventoryEngine<InMemoryInventoryStore>;

struct Fixture {
    store: Arc<InMemoryInventoryStore>,
    metrics: Arc<RecordingMetrics>,
    engine: Arc<Engine>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryInventoryStore::new());
    let metrics = Arc::new(RecordingMetrics::default());
    let engine = Arc::new(InventoryEngine::new(
        Arc::clone(&store),
        OrderNumbering::default(),
        Arc::new(test_clock()),
        metrics.clone(),
    ));
    Fixture {
        store,
        metrics,
        engine,
    }
}

fn code(s: &str) -> ArticleCode {
    ArticleCode::new(s).unwrap()
}

fn order(n: i64) -> OrderNumber {
    OrderNumber::new(n).unwrap()
}

fn line(article: &str, quantity: u32) -> LineItem {
    LineItem {
        article: code(article),
        price: Price::from_cents(1_000).unwrap(),
        quantity,
    }
}

fn local_order(number: i64, lines: Vec<LineItem>) -> ReservationRequest {
    ReservationRequest {
        order_number: order(number),
        lines,
        status: ReservationStatus::NewLocalCustomer,
    }
}

#[tokio::test]
async fn test_reserve_then_cancel_restores_stock() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 10);

    f.engine
        .make_reservation(&ctx, local_order(11, vec![line("W1", 3)]))
        .await
        .unwrap();
    assert_eq!(f.engine.amount_in_stock(&ctx, &code("W1")).await.unwrap(), 7);

    f.engine.cancel_reservation(&ctx, order(11)).await.unwrap();
    assert_eq!(f.engine.amount_in_stock(&ctx, &code("W1")).await.unwrap(), 10);

    let reservation = f.engine.reservation(&ctx, order(11)).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Canceled);

    let counts = f.metrics.snapshot();
    assert_eq!(counts.local_placed, 1);
    assert_eq!(counts.canceled, 1);
}

#[tokio::test]
async fn test_short_line_aborts_whole_reservation() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 10);
    f.store.seed_stock(&code("W2"), "Gadget", 1_000, 1);

    let err = f
        .engine
        .make_reservation(&ctx, local_order(11, vec![line("W1", 4), line("W2", 2)]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        InventoryError::InsufficientStock {
            article: code("W2"),
            requested: 2,
            available: 1,
        }
    );
    assert_eq!(f.store.committed_amount(&code("W1")), Some(10));
    assert_eq!(f.store.committed_amount(&code("W2")), Some(1));
    assert!(f.store.committed_reservation(order(11)).is_none());
    assert_eq!(f.metrics.snapshot().local_placed, 0);
    assert_eq!(f.store.stats().rollbacks, 1);
}

#[tokio::test]
async fn test_resolved_orders_are_already_processed() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 10);

    f.engine
        .make_reservation(&ctx, local_order(20, vec![line("W1", 2)]))
        .await
        .unwrap();
    f.engine.finish_order(&ctx, order(20)).await.unwrap();

    f.engine
        .make_reservation(&ctx, local_order(21, vec![line("W1", 2)]))
        .await
        .unwrap();
    f.engine.cancel_reservation(&ctx, order(21)).await.unwrap();

    let before = f.store.committed_amount(&code("W1"));
    for number in [20, 21] {
        let err = f
            .engine
            .cancel_reservation(&ctx, order(number))
            .await
            .unwrap_err();
        assert_eq!(err, InventoryError::AlreadyProcessed(order(number)));
    }
    assert_eq!(f.store.committed_amount(&code("W1")), before);
    assert_eq!(f.metrics.snapshot().canceled, 1);
}

#[tokio::test]
async fn test_register_slot_cancel_deletes_rows_and_restores_stock() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);

    f.engine
        .make_reservation(
            &ctx,
            ReservationRequest {
                order_number: order(3),
                lines: vec![line("W1", 2)],
                status: ReservationStatus::NewCashRegister,
            },
        )
        .await
        .unwrap();
    assert_eq!(f.store.committed_amount(&code("W1")), Some(3));

    f.engine.cancel_reservation(&ctx, order(3)).await.unwrap();

    assert_eq!(f.store.committed_amount(&code("W1")), Some(5));
    assert!(f.store.committed_reservation(order(3)).is_none());
    let counters = f.metrics.snapshot();
    assert_eq!(counters.canceled, 1);
    assert_eq!(counters.local_placed, 0);
    assert_eq!(counters.internet_placed, 0);
}

#[tokio::test]
async fn test_finish_after_cancel_is_already_processed() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);

    f.engine
        .make_reservation(&ctx, local_order(12, vec![line("W1", 2)]))
        .await
        .unwrap();
    f.engine.cancel_reservation(&ctx, order(12)).await.unwrap();

    let err = f.engine.finish_order(&ctx, order(12)).await.unwrap_err();
    assert_eq!(err, InventoryError::AlreadyProcessed(order(12)));
    assert!(f.store.sold_records().is_empty());
    assert_eq!(f.store.committed_amount(&code("W1")), Some(5));
    assert_eq!(
        f.store.committed_reservation(order(12)).unwrap().status,
        ReservationStatus::Canceled
    );
}

#[tokio::test]
async fn test_finish_moves_lines_to_ledger_once() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 10);
    f.store.seed_stock(&code("W2"), "Gadget", 1_000, 10);

    f.engine
        .make_reservation(
            &ctx,
            ReservationRequest {
                order_number: order(30),
                lines: vec![line("W1", 1), line("W2", 4)],
                status: ReservationStatus::NewInternetCustomer,
            },
        )
        .await
        .unwrap();

    let sold = f.engine.finish_order(&ctx, order(30)).await.unwrap();
    assert_eq!(sold.len(), 2);
    assert_eq!(f.store.sold_records(), sold);

    let err = f.engine.finish_order(&ctx, order(30)).await.unwrap_err();
    assert_eq!(err, InventoryError::AlreadyProcessed(order(30)));
    assert_eq!(f.store.sold_records().len(), 2);

    // stock left the shelf at reservation time, not again at finish
    assert_eq!(f.store.committed_amount(&code("W2")), Some(6));
    assert_eq!(
        f.store.committed_reservation(order(30)).unwrap().status,
        ReservationStatus::Finished
    );
    assert_eq!(f.metrics.snapshot().internet_placed, 1);
}

#[tokio::test]
async fn test_missing_reservation_is_not_found() {
    let f = fixture();
    let ctx = ExecCtx::background();
    assert!(matches!(
        f.engine.cancel_reservation(&ctx, order(99)).await,
        Err(InventoryError::NotFound(_))
    ));
    assert!(matches!(
        f.engine.finish_order(&ctx, order(99)).await,
        Err(InventoryError::NotFound(_))
    ));
    assert!(matches!(
        f.engine.reservation(&ctx, order(99)).await,
        Err(InventoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_range_mismatch_rejected_before_storage() {
    let f = fixture();
    let ctx = ExecCtx::background();

    let cases = [
        (3, ReservationStatus::NewLocalCustomer),
        (3, ReservationStatus::NewInternetCustomer),
        (11, ReservationStatus::NewCashRegister),
        (11, ReservationStatus::Finished),
    ];
    for (number, status) in cases {
        let err = f
            .engine
            .make_reservation(
                &ctx,
                ReservationRequest {
                    order_number: order(number),
                    lines: vec![line("W1", 1)],
                    status,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)), "{number} {status}");
    }

    let err = f
        .engine
        .make_sale(&ctx, SaleRequest { lines: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::Validation(_)));

    let stats = f.store.stats();
    assert_eq!(stats.begins, 0);
    assert_eq!(stats.statements, 0);
}

#[tokio::test]
async fn test_status_update_mismatch_rolls_back() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 10);
    f.store.seed_stock(&code("W2"), "Gadget", 1_000, 10);

    f.engine
        .make_reservation(&ctx, local_order(40, vec![line("W1", 2), line("W2", 3)]))
        .await
        .unwrap();
    f.store.shrink_next_status_update(order(40));

    let err = f.engine.cancel_reservation(&ctx, order(40)).await.unwrap_err();
    assert!(matches!(err, InventoryError::Storage(_)));

    // nothing of the failed cancel is visible
    assert_eq!(f.store.committed_amount(&code("W1")), Some(8));
    assert_eq!(f.store.committed_amount(&code("W2")), Some(7));
    assert!(f
        .store
        .committed_reservation(order(40))
        .unwrap()
        .status
        .is_open());
    assert_eq!(f.metrics.snapshot().canceled, 0);

    // and a retry goes through
    f.engine.cancel_reservation(&ctx, order(40)).await.unwrap();
    assert_eq!(f.store.committed_amount(&code("W1")), Some(10));
}

#[tokio::test]
async fn test_sale_is_all_or_nothing() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);
    f.store.seed_stock(&code("W2"), "Gadget", 1_000, 1);

    let err = f
        .engine
        .make_sale(
            &ctx,
            SaleRequest {
                lines: vec![line("W1", 2), line("W2", 2)],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));
    assert_eq!(f.store.committed_amount(&code("W1")), Some(5));
    assert!(f.store.sold_records().is_empty());

    // repeated articles draw from the same shelf
    let sold = f
        .engine
        .make_sale(
            &ctx,
            SaleRequest {
                lines: vec![line("W1", 2), line("W1", 3)],
            },
        )
        .await
        .unwrap();
    assert_eq!(sold.len(), 2);
    assert_eq!(f.store.committed_amount(&code("W1")), Some(0));
}

#[tokio::test]
async fn test_sales_between_filters_ledger() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);

    f.engine
        .make_sale(&ctx, SaleRequest { lines: vec![line("W1", 1)] })
        .await
        .unwrap();

    let sold_at = test_clock().now();
    let hour = chrono::Duration::hours(1);

    let hits = f
        .engine
        .sales_between(&ctx, sold_at - hour, sold_at)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let misses = f
        .engine
        .sales_between(&ctx, sold_at + hour, sold_at + hour + hour)
        .await
        .unwrap();
    assert!(misses.is_empty());

    let err = f
        .engine
        .sales_between(&ctx, sold_at, sold_at - hour)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::Validation(_)));
}

#[tokio::test]
async fn test_stock_maintenance() {
    let f = fixture();
    let ctx = ExecCtx::background();
    let item = StockItem {
        article: code("TV-55.1010"),
        name: "Television".to_string(),
        price: Price::from_cents(49_900).unwrap(),
        amount: 2,
    };

    f.engine.add_product_to_stock(&ctx, item.clone()).await.unwrap();
    assert!(matches!(
        f.engine.add_product_to_stock(&ctx, item.clone()).await,
        Err(InventoryError::Storage(_))
    ));

    f.engine
        .change_price_in_stock(&ctx, &item.article, Price::from_cents(39_900).unwrap())
        .await
        .unwrap();
    f.engine
        .change_amount_in_stock(&ctx, &item.article, 12)
        .await
        .unwrap();

    let stored = f.engine.stock_item(&ctx, &item.article).await.unwrap();
    assert_eq!(stored.price.cents(), 39_900);
    assert_eq!(stored.amount, 12);

    let blank = StockItem {
        name: "  ".to_string(),
        ..item
    };
    assert!(matches!(
        f.engine.add_product_to_stock(&ctx, blank).await,
        Err(InventoryError::Validation(_))
    ));
    assert!(matches!(
        f.engine
            .change_amount_in_stock(&ctx, &code("NOPE"), 1)
            .await,
        Err(InventoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_engine_calls_compose_into_one_transaction() {
    let f = fixture();
    let ctx = ExecCtx::background();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);

    let engine = Arc::clone(&f.engine);
    let result = f
        .engine
        .executor()
        .run(&ctx, |tx| async move {
            engine
                .make_reservation(&tx, local_order(50, vec![line("W1", 3)]))
                .await?;
            let sold = engine
                .make_sale(&tx, SaleRequest { lines: vec![line("W1", 3)] })
                .await?;
            Ok::<_, InventoryError>(sold)
        })
        .await;

    assert!(matches!(result, Err(InventoryError::InsufficientStock { .. })));
    assert_eq!(f.store.committed_amount(&code("W1")), Some(5));
    assert!(f.store.committed_reservation(order(50)).is_none());
    assert_eq!(f.metrics.snapshot().local_placed, 0);

    let stats = f.store.stats();
    assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 0, 1));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_transaction() {
    let f = fixture();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);
    f.store.set_latency(Some(Duration::from_secs(1)));

    let ctx = ExecCtx::with_timeout(Duration::from_millis(1_500));
    let err = f
        .engine
        .make_reservation(&ctx, local_order(60, vec![line("W1", 1)]))
        .await
        .unwrap_err();

    assert_eq!(err, InventoryError::Timeout);
    assert_eq!(f.store.open_transactions(), 0);
    assert_eq!(f.store.committed_amount(&code("W1")), Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_oversell() {
    let f = fixture();
    f.store.seed_stock(&code("W1"), "Widget", 1_000, 5);

    let mut tasks = Vec::new();
    for number in 100..110 {
        let engine = Arc::clone(&f.engine);
        tasks.push(tokio::spawn(async move {
            engine
                .make_reservation(
                    &ExecCtx::background(),
                    local_order(number, vec![line("W1", 1)]),
                )
                .await
        }));
    }

    let mut placed = 0;
    for outcome in futures::future::join_all(tasks).await {
        match outcome.unwrap() {
            Ok(_) => placed += 1,
            Err(InventoryError::InsufficientStock { .. } | InventoryError::Storage(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let left = f.store.committed_amount(&code("W1")).unwrap();
    assert_eq!(left + placed, 5);
    assert_eq!(f.metrics.snapshot().local_placed, u64::from(placed));
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reservation_takes_exactly_or_nothing(
        lines in unique_lines(4, 6),
        shelf in prop::collection::vec(0_u32..8, 4),
    ) {
        let f = fixture();
        let before: BTreeMap<ArticleCode, u32> = lines
            .iter()
            .zip(&shelf)
            .map(|(line, amount)| (line.article.clone(), *amount))
            .collect();
        for (article, amount) in &before {
            f.store.seed_stock(article, "Item", 100, *amount);
        }
        let fits = lines.iter().all(|line| before[&line.article] >= line.quantity);

        let result = block_on(
            f.engine
                .make_reservation(&ExecCtx::background(), local_order(500, lines.clone())),
        );

        if fits {
            prop_assert!(result.is_ok());
            for line in &lines {
                prop_assert_eq!(
                    f.store.committed_amount(&line.article),
                    Some(before[&line.article] - line.quantity)
                );
            }
        } else {
            let is_short = matches!(result, Err(InventoryError::InsufficientStock { .. }));
            prop_assert!(is_short);
            for (article, amount) in &before {
                prop_assert_eq!(f.store.committed_amount(article), Some(*amount));
            }
        }
    }

    #[test]
    fn prop_cancel_restores_every_article(lines in unique_lines(4, 5)) {
        let f = fixture();
        for line in &lines {
            f.store.seed_stock(&line.article, "Item", 100, 5);
        }

        block_on(async {
            let ctx = ExecCtx::background();
            f.engine
                .make_reservation(&ctx, local_order(600, lines.clone()))
                .await
                .unwrap();
            f.engine.cancel_reservation(&ctx, order(600)).await.unwrap();
        });

        for line in &lines {
            prop_assert_eq!(f.store.committed_amount(&line.article), Some(5));
        }
    }
}
