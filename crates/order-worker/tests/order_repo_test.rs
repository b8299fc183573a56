//! 订单仓储集成测试
//!
//! 使用真实 PostgreSQL 验证唯一索引冲突语义与 JSONB 快照的完整往返。
//! 仓储内部通过 sqlx::query 直接操作数据库，无法通过纯 mock 覆盖。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test order_repo_test -- --ignored
//! ```

use rust_decimal_macros::dec;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use order_worker::models::{CustomerDetails, CustomerStatus, Order, OrderLine, OrderStatus};
use order_worker::repository::{MIGRATOR, OrderRepository, PgOrderRepository, SaveOutcome};

// ==================== 辅助函数 ====================

/// 从环境变量读取数据库 URL，未设置则 panic
fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("集成测试需要设置 DATABASE_URL")
}

async fn setup_pool() -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url())
        .await
        .expect("数据库连接失败");

    MIGRATOR.run(&pool).await.expect("迁移执行失败");
    pool
}

/// 清理指定订单，保证测试幂等
async fn cleanup_order(pool: &PgPool, order_id: &str) {
    sqlx::query("DELETE FROM orders WHERE order_id = $1")
        .bind(order_id)
        .execute(pool)
        .await
        .expect("清理测试订单失败");
}

fn test_order(order_id: &str) -> Order {
    let lines = vec![
        OrderLine {
            product_id: "product-001".to_string(),
            name: "Laptop Gaming".to_string(),
            description: "High-performance gaming laptop".to_string(),
            price: dec!(2499.99),
            active: true,
        },
        OrderLine {
            product_id: "product-002".to_string(),
            name: "Smartphone Pro".to_string(),
            description: String::new(),
            price: dec!(999.99),
            active: true,
        },
    ];
    let customer = CustomerDetails {
        customer_id: "customer-001".to_string(),
        name: "John Doe".to_string(),
        email: "john.doe@example.com".to_string(),
        status: CustomerStatus::Active,
        credit_limit: dec!(5000),
        current_balance: dec!(0),
    };

    let mut order = Order::new(
        order_id.to_string(),
        "customer-001".to_string(),
        lines,
        customer,
    );
    order.mark_completed();
    order
}

// ==================== 测试 ====================

#[tokio::test]
#[ignore] // 需要 PostgreSQL
async fn test_save_and_find_round_trip() {
    let pool = setup_pool().await;
    let repo = PgOrderRepository::new(pool.clone());
    let order_id = "integ-order-round-trip";
    cleanup_order(&pool, order_id).await;

    let order = test_order(order_id);
    let outcome = repo.save(&order).await.expect("写入失败");
    assert_eq!(outcome, SaveOutcome::Saved);

    let loaded = repo
        .find_by_order_id(order_id)
        .await
        .expect("查询失败")
        .expect("订单应存在");

    assert_eq!(loaded.order_id, order.order_id);
    assert_eq!(loaded.customer_id, order.customer_id);
    assert_eq!(loaded.status, OrderStatus::Completed);
    assert_eq!(loaded.total_amount, dec!(3499.98));
    assert_eq!(loaded.products.len(), 2);
    assert_eq!(loaded.products[0].price, dec!(2499.99));
    assert_eq!(loaded.customer_details.customer_id, "customer-001");

    cleanup_order(&pool, order_id).await;
}

#[tokio::test]
#[ignore] // 需要 PostgreSQL
async fn test_duplicate_save_surfaces_conflict() {
    let pool = setup_pool().await;
    let repo = PgOrderRepository::new(pool.clone());
    let order_id = "integ-order-conflict";
    cleanup_order(&pool, order_id).await;

    let order = test_order(order_id);
    assert_eq!(repo.save(&order).await.unwrap(), SaveOutcome::Saved);

    // 同一 orderId 的第二次写入被唯一索引拒绝
    let duplicate = test_order(order_id);
    assert_eq!(repo.save(&duplicate).await.unwrap(), SaveOutcome::Conflict);

    // 库中只有一条记录
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    cleanup_order(&pool, order_id).await;
}

#[tokio::test]
#[ignore] // 需要 PostgreSQL
async fn test_exists_by_order_id() {
    let pool = setup_pool().await;
    let repo = PgOrderRepository::new(pool.clone());
    let order_id = "integ-order-exists";
    cleanup_order(&pool, order_id).await;

    assert!(!repo.exists_by_order_id(order_id).await.unwrap());

    repo.save(&test_order(order_id)).await.unwrap();
    assert!(repo.exists_by_order_id(order_id).await.unwrap());

    cleanup_order(&pool, order_id).await;
}

#[tokio::test]
#[ignore] // 需要 PostgreSQL
async fn test_find_missing_order_returns_none() {
    let pool = setup_pool().await;
    let repo = PgOrderRepository::new(pool);

    let loaded = repo.find_by_order_id("integ-order-missing").await.unwrap();
    assert!(loaded.is_none());
}
