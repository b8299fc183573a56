//! PostgreSQL 订单仓储实现
//!
//! 商品行与客户快照以 JSONB 形式整体落库，`order_id` 上的唯一索引
//! 把重复写入转换为 [`SaveOutcome::Conflict`]。

use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

use async_trait::async_trait;

use order_shared::error::{OrderError, Result};

use super::traits::{OrderRepository, SaveOutcome};
use crate::models::{CustomerDetails, Order, OrderLine, OrderStatus};

/// 编译期内嵌的迁移脚本，启动时由 main 应用
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// PostgreSQL 订单仓储
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn save(&self, order: &Order) -> Result<SaveOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (order_id, customer_id, products, total_amount, status,
                                created_at, updated_at, customer_details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.customer_id)
        .bind(Json(&order.products))
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(Json(&order.customer_details))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(order_id = %order.order_id, total_amount = %order.total_amount, "订单已写入");
                Ok(SaveOutcome::Saved)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(order_id = %order.order_id, "orderId 唯一索引冲突，订单已存在");
                Ok(SaveOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, customer_id, products, total_amount, status,
                   created_at, updated_at, customer_details
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(order_id, "订单不存在");
            return Ok(None);
        };

        let products: Json<Vec<OrderLine>> = row.try_get("products")?;
        let customer_details: Json<CustomerDetails> = row.try_get("customer_details")?;
        let status_raw: String = row.try_get("status")?;
        let status = status_raw
            .parse::<OrderStatus>()
            .map_err(OrderError::Internal)?;

        Ok(Some(Order {
            order_id: row.try_get("order_id")?,
            customer_id: row.try_get("customer_id")?,
            products: products.0,
            total_amount: row.try_get("total_amount")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            customer_details: customer_details.0,
        }))
    }

    async fn exists_by_order_id(&self, order_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM orders WHERE order_id = $1)"#)
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;

        debug!(order_id, exists, "订单存在性检查");
        Ok(exists)
    }
}
