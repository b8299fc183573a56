//! 订单富化与持久化工作进程入口
//!
//! 消费 Kafka 订单意图，针对参考服务并发富化并校验后幂等落库。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use order_worker::clients::{CustomerApiClient, ProductApiClient};
use order_worker::consumer::ConsumerPool;
use order_worker::enrichment::EnrichmentService;
use order_worker::failure::FailureLedger;
use order_worker::pipeline::OrderPipeline;
use order_worker::repository::{MIGRATOR, PgOrderRepository};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting order-worker...");

    let config = order_shared::config::AppConfig::load("order-worker")?;

    let database = order_shared::database::Database::connect(&config.database).await?;
    MIGRATOR.run(database.pool()).await?;

    let cache = order_shared::cache::Cache::new(&config.redis)?;
    let lock = order_shared::lock::RedisLockService::new(&config.redis)?;

    let products = ProductApiClient::new(&config.reference)?;
    let customers = CustomerApiClient::new(&config.reference)?;

    let enrichment = EnrichmentService::new(
        cache.clone(),
        Arc::new(products),
        Arc::new(customers),
        &config.processing,
    );

    let repository = Arc::new(PgOrderRepository::new(database.pool().clone()));

    let pipeline = Arc::new(OrderPipeline::new(
        Arc::new(lock),
        repository,
        enrichment,
        &config.processing,
    ));

    let ledger = Arc::new(FailureLedger::new(cache, &config.processing));

    let pool = ConsumerPool::new(pipeline, ledger);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
        let _ = shutdown_tx.send(true);
    });

    pool.run(&config, shutdown_rx).await?;

    shutdown_handle.abort();
    database.close().await;

    info!("order-worker 已关闭");
    Ok(())
}

/// 监听操作系统关闭信号
///
/// 同时监听 SIGINT（Ctrl+C）和 SIGTERM（容器编排发送），
/// 任一信号到达即触发优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 信号失败");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
