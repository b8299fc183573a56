//! 富化阶段
//!
//! 将意图中的 customerId 与 productIds 解析为可持久化的快照：
//! 客户获取与商品扇出并发执行，任一子任务失败则整个阶段失败。
//! 商品扇出按输入顺序展开（含重复项），输出与输入一一对应。
//!
//! 每个子任务先查缓存，未命中时在重试策略下回源参考服务，
//! 成功后回填缓存。缓存读写失败永远不会让富化失败。
//! 整个阶段受总体截止时间约束，超时归类为瞬时错误。

use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tracing::{debug, warn};

use order_shared::cache::{Cache, CacheKey};
use order_shared::config::ProcessingConfig;
use order_shared::error::OrderError;
use order_shared::retry::{RetryPolicy, retry_transient};

use crate::clients::{CustomerDirectory, ProductDirectory};
use crate::models::{CustomerDetails, OrderLine};

/// 富化服务
pub struct EnrichmentService {
    cache: Cache,
    products: Arc<dyn ProductDirectory>,
    customers: Arc<dyn CustomerDirectory>,
    retry_policy: RetryPolicy,
    product_cache_ttl: Duration,
    customer_cache_ttl: Duration,
    deadline: Duration,
}

impl EnrichmentService {
    pub fn new(
        cache: Cache,
        products: Arc<dyn ProductDirectory>,
        customers: Arc<dyn CustomerDirectory>,
        config: &ProcessingConfig,
    ) -> Self {
        Self {
            cache,
            products,
            customers,
            retry_policy: RetryPolicy::default(),
            product_cache_ttl: config.product_cache_ttl(),
            customer_cache_ttl: config.customer_cache_ttl(),
            deadline: config.enrichment_timeout(),
        }
    }

    /// 覆盖重试策略（测试中用于缩短退避时间）
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 富化一条订单意图
    ///
    /// 返回客户快照与按输入顺序排列的商品行。
    pub async fn enrich(
        &self,
        customer_id: &str,
        product_ids: &[String],
    ) -> Result<(CustomerDetails, Vec<OrderLine>), OrderError> {
        let work = async {
            tokio::try_join!(
                self.enrich_customer(customer_id),
                self.enrich_products(product_ids)
            )
        };

        match tokio::time::timeout(self.deadline, work).await {
            Ok(Ok((customer, lines))) => Ok((customer, lines)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OrderError::Timeout {
                operation: "enrichment".to_string(),
            }),
        }
    }

    /// 客户快照：缓存优先，未命中时带重试回源
    async fn enrich_customer(&self, customer_id: &str) -> Result<CustomerDetails, OrderError> {
        let cache_key = CacheKey::customer(customer_id);

        if let Some(cached) = self.cache.get::<CustomerDetails>(&cache_key).await {
            debug!(customer_id, "客户快照缓存命中");
            return Ok(cached);
        }

        let customer = retry_transient(&self.retry_policy, "fetch_customer", || {
            self.customers.fetch(customer_id)
        })
        .await?;

        if let Err(e) = self
            .cache
            .set(&cache_key, &customer, self.customer_cache_ttl)
            .await
        {
            warn!(customer_id, error = %e, "客户快照写入缓存失败");
        }

        Ok(customer)
    }

    /// 商品扇出：逐个 id 并发解析，保持输入顺序
    async fn enrich_products(&self, product_ids: &[String]) -> Result<Vec<OrderLine>, OrderError> {
        let tasks = product_ids.iter().map(|id| self.line_for(id));
        future::try_join_all(tasks).await
    }

    /// 单个商品行：缓存优先，未命中时带重试回源
    async fn line_for(&self, product_id: &str) -> Result<OrderLine, OrderError> {
        let cache_key = CacheKey::product(product_id);

        if let Some(cached) = self.cache.get::<OrderLine>(&cache_key).await {
            debug!(product_id, "商品快照缓存命中");
            return Ok(cached);
        }

        let line = retry_transient(&self.retry_policy, "fetch_product", || {
            self.products.fetch(product_id)
        })
        .await?;

        if let Err(e) = self.cache.set(&cache_key, &line, self.product_cache_ttl).await {
            warn!(product_id, error = %e, "商品快照写入缓存失败");
        }

        Ok(line)
    }
}
