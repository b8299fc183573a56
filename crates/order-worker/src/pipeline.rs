//! 订单处理管道
//!
//! 驱动单条订单意图的端到端处理：
//! 获取分布式锁 -> 幂等检查 -> 并发富化 -> 业务校验 -> 持久化。
//! 每条意图恰好收敛到一个终态结论，由消费者据此记账并提交位点。
//!
//! 锁在所有退出路径上都会释放（校验持有者令牌）；锁本身的 I/O 故障
//! 归类为瞬时失败而非静默跳过，避免 Redis 故障导致意图丢失。
//! `order_id` 上的唯一索引是锁之外的最终幂等保障。

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};

use order_shared::config::ProcessingConfig;
use order_shared::error::FailureClass;
use order_shared::lock::LockService;

use crate::enrichment::EnrichmentService;
use crate::models::{Order, OrderIntent};
use crate::repository::{OrderRepository, SaveOutcome};
use crate::validator::{ValidationRejection, validate_order};

/// 订单锁键前缀
const LOCK_PREFIX: &str = "order:lock:";

/// 管道终态结论
///
/// 消费者对所有结论统一提交位点；失败类结论先写入失败台账。
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// 订单已成功持久化
    Persisted {
        order_id: String,
        total_amount: Decimal,
    },
    /// 订单已存在（幂等检查命中），静默跳过
    SkippedExisting,
    /// 其他工作进程持有租约，静默跳过
    SkippedLocked,
    /// 写入时唯一索引冲突，等价于订单已存在
    StoreConflict,
    /// 业务校验拒绝，订单被丢弃
    DroppedValidation { reason: ValidationRejection },
    /// 瞬时失败（重试耗尽、基础设施故障），台账计数推进
    EnrichmentFailed { error: String },
    /// 永久性失败（404、4xx），直接进入死信
    EnrichmentDenied { error: String },
}

impl PipelineOutcome {
    /// 结论标签，用于日志与指标
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted { .. } => "persisted",
            Self::SkippedExisting => "skipped_existing",
            Self::SkippedLocked => "skipped_locked",
            Self::StoreConflict => "store_conflict",
            Self::DroppedValidation { .. } => "dropped_validation",
            Self::EnrichmentFailed { .. } => "enrichment_failed",
            Self::EnrichmentDenied { .. } => "enrichment_denied",
        }
    }

    /// 需要记入失败台账的结论返回（分类, 失败原因）
    ///
    /// 校验拒绝按永久性失败处理：不占用重试预算，直接写入死信供
    /// 运维查看。成功与跳过类结论不记账。
    pub fn ledger_entry(&self) -> Option<(FailureClass, String)> {
        match self {
            Self::EnrichmentFailed { error } => Some((FailureClass::Transient, error.clone())),
            Self::EnrichmentDenied { error } => Some((FailureClass::Permanent, error.clone())),
            Self::DroppedValidation { reason } => {
                Some((FailureClass::Permanent, reason.to_string()))
            }
            Self::Persisted { .. }
            | Self::SkippedExisting
            | Self::SkippedLocked
            | Self::StoreConflict => None,
        }
    }
}

/// 订单处理管道
pub struct OrderPipeline {
    lock: Arc<dyn LockService>,
    repository: Arc<dyn OrderRepository>,
    enrichment: EnrichmentService,
    lock_ttl: Duration,
}

impl OrderPipeline {
    pub fn new(
        lock: Arc<dyn LockService>,
        repository: Arc<dyn OrderRepository>,
        enrichment: EnrichmentService,
        config: &ProcessingConfig,
    ) -> Self {
        Self {
            lock,
            repository,
            enrichment,
            lock_ttl: config.lock_ttl(),
        }
    }

    fn lock_key(order_id: &str) -> String {
        format!("{LOCK_PREFIX}{order_id}")
    }

    /// 处理一条订单意图，收敛到唯一的终态结论
    pub async fn process(&self, intent: &OrderIntent) -> PipelineOutcome {
        let order_id = intent.order_id.as_str();
        info!(order_id, customer_id = %intent.customer_id, "开始处理订单意图");

        let lock_key = Self::lock_key(order_id);

        let token = match self.lock.acquire(&lock_key, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!(order_id, "订单正在被其他工作进程处理，跳过");
                return self.conclude(order_id, PipelineOutcome::SkippedLocked);
            }
            Err(e) => {
                warn!(order_id, error = %e, "获取分布式锁失败");
                return self.conclude(
                    order_id,
                    PipelineOutcome::EnrichmentFailed {
                        error: format!("获取分布式锁失败: {e}"),
                    },
                );
            }
        };

        let outcome = self.process_locked(intent, &lock_key, &token).await;

        match self.lock.release(&lock_key, &token).await {
            Ok(_) => {}
            Err(e) => warn!(order_id, error = %e, "释放分布式锁失败，租约将随 TTL 过期"),
        }

        self.conclude(order_id, outcome)
    }

    /// 持有租约期间的处理流程
    async fn process_locked(
        &self,
        intent: &OrderIntent,
        lock_key: &str,
        token: &str,
    ) -> PipelineOutcome {
        let order_id = intent.order_id.as_str();

        // 幂等检查：同一 orderId 只持久化一次
        match self.repository.exists_by_order_id(order_id).await {
            Ok(true) => {
                info!(order_id, "订单已存在，跳过");
                return PipelineOutcome::SkippedExisting;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(order_id, error = %e, "订单存在性检查失败");
                return PipelineOutcome::EnrichmentFailed {
                    error: format!("订单存在性检查失败: {e}"),
                };
            }
        }

        // 并发富化：客户快照 + 商品扇出
        let (customer, lines) = match self
            .enrichment
            .enrich(&intent.customer_id, &intent.product_ids)
            .await
        {
            Ok(enriched) => enriched,
            Err(e) if e.is_transient() => {
                warn!(order_id, error = %e, "富化失败（瞬时），重试预算已耗尽");
                return PipelineOutcome::EnrichmentFailed {
                    error: e.to_string(),
                };
            }
            Err(e) => {
                warn!(order_id, error = %e, "富化失败（永久）");
                return PipelineOutcome::EnrichmentDenied {
                    error: e.to_string(),
                };
            }
        };

        // 意图 schema 禁止空商品列表，此处为最后一道防线
        if lines.is_empty() {
            warn!(order_id, "富化结果不含任何商品行，丢弃");
            return PipelineOutcome::DroppedValidation {
                reason: ValidationRejection::EmptyProducts,
            };
        }

        if let Err(reason) = validate_order(&customer, &lines) {
            warn!(order_id, reason = %reason, "业务校验拒绝，订单被丢弃");
            return PipelineOutcome::DroppedValidation { reason };
        }

        let mut order = Order::new(
            intent.order_id.clone(),
            intent.customer_id.clone(),
            lines,
            customer,
        );
        order.mark_completed();

        // 富化可能消耗了租约的大部分时间，持久化前续期一次
        match self.lock.extend(lock_key, token, self.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(order_id, "持久化前续期失败，租约已过期；唯一索引仍保障幂等")
            }
            Err(e) => warn!(order_id, error = %e, "租约续期失败"),
        }

        match self.repository.save(&order).await {
            Ok(SaveOutcome::Saved) => {
                info!(
                    order_id,
                    total_amount = %order.total_amount,
                    line_count = order.products.len(),
                    "订单处理成功"
                );
                PipelineOutcome::Persisted {
                    order_id: order.order_id,
                    total_amount: order.total_amount,
                }
            }
            Ok(SaveOutcome::Conflict) => {
                info!(order_id, "写入冲突，订单已由其他路径持久化");
                PipelineOutcome::StoreConflict
            }
            Err(e) => {
                warn!(order_id, error = %e, "订单写入失败");
                PipelineOutcome::EnrichmentFailed {
                    error: format!("订单写入失败: {e}"),
                }
            }
        }
    }

    /// 上报结论指标并返回
    fn conclude(&self, order_id: &str, outcome: PipelineOutcome) -> PipelineOutcome {
        metrics::counter!(
            "order_pipeline_outcomes_total",
            "outcome" => outcome.label()
        )
        .increment(1);

        info!(order_id, outcome = outcome.label(), "订单意图已收敛到终态");
        outcome
    }
}
