//! 订单库连接管理
//!
//! 持有 PostgreSQL 连接池。工作进程通常与订单库一起编排启动，
//! 首次建连走瞬时错误补偿，避免库尚未就绪时进程直接退出。

use crate::config::DatabaseConfig;
use crate::error::{OrderError, Result};
use crate::retry::{RetryPolicy, retry_transient};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// 订单库连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按配置建立连接池
    ///
    /// 池参数全部来自 [`DatabaseConfig`]；建连失败按瞬时错误补偿。
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let policy = RetryPolicy::default();

        let pool = retry_transient(&policy, "database_connect", || async {
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .connect(&config.url)
                .await
                .map_err(OrderError::from)
        })
        .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "订单库连接池已就绪"
        );

        Ok(Self { pool })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查：往返一次最小查询
    pub async fn health_check(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        debug_assert_eq!(one, 1);
        Ok(())
    }

    /// 关闭连接池，等待在途查询结束
    pub async fn close(&self) {
        self.pool.close().await;
        info!("订单库连接池已关闭");
    }
}
