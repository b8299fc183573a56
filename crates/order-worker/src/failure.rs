//! 失败台账
//!
//! 处理失败的消息按 key 记录在 Redis 中：失败记录 + 重试计数器，
//! 均带 TTL。瞬时失败推进计数器；永久性失败或计数器达到上限时写入
//! 死信命名空间等待人工介入。
//!
//! 台账是建议性的：它不会把消息重新注入总线，重放由运维人员发起。
//! 消费者在台账写入完成后才提交位点，避免总线层面的重复投递风暴。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use order_shared::cache::Cache;
use order_shared::config::ProcessingConfig;
use order_shared::error::{FailureClass, OrderError};

const FAILED_MESSAGE_PREFIX: &str = "failed:message:";
const RETRY_COUNT_PREFIX: &str = "failed:retry:";
const DEAD_LETTER_PREFIX: &str = "dead:letter:";

/// 死信记录的状态标记
const DEAD_LETTER_STATUS: &str = "dead_letter";

// ---------------------------------------------------------------------------
// FailureRecord — 失败记录
// ---------------------------------------------------------------------------

/// 失败记录
///
/// 包装原始消息负载，附加失败原因、重试次数等元数据。
/// 死信记录额外携带 `status = "dead_letter"`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// 台账 key（消息 key，缺省时为 orderId）
    pub key: String,
    /// 原始消息负载
    pub message: String,
    /// 最近一次的失败原因
    pub error: String,
    /// 已记录的失败次数
    pub retry_count: u32,
    /// 重试上限
    pub max_retries: u32,
    /// 本次记录时间
    pub timestamp: DateTime<Utc>,
    /// 死信标记，普通失败记录不携带
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl FailureRecord {
    /// 是否为死信记录
    pub fn is_dead_letter(&self) -> bool {
        self.status.as_deref() == Some(DEAD_LETTER_STATUS)
    }
}

// ---------------------------------------------------------------------------
// 台账决策
// ---------------------------------------------------------------------------

/// 一次失败记录的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAction {
    /// 写失败记录并把计数器推进到该值
    Record { next_retry_count: u32 },
    /// 写入死信，不再推进计数器
    DeadLetter,
}

/// 根据当前计数与失败分类决定处置
///
/// 永久性失败不占用重试预算，直接死信；
/// 瞬时失败的计数器达到上限后，下一次记录进入死信。
pub fn decide(retry_count: u32, max_retries: u32, class: FailureClass) -> LedgerAction {
    if class == FailureClass::Permanent || retry_count >= max_retries {
        LedgerAction::DeadLetter
    } else {
        LedgerAction::Record {
            next_retry_count: retry_count + 1,
        }
    }
}

// ---------------------------------------------------------------------------
// FailureLedger
// ---------------------------------------------------------------------------

/// 记录结果，供调用方打日志与上报指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Recorded { retry_count: u32 },
    DeadLettered,
}

/// 失败台账
pub struct FailureLedger {
    cache: Cache,
    max_retries: u32,
    ttl: std::time::Duration,
}

impl FailureLedger {
    pub fn new(cache: Cache, config: &ProcessingConfig) -> Self {
        Self {
            cache,
            max_retries: config.max_retries,
            ttl: config.failure_ttl(),
        }
    }

    fn failed_message_key(key: &str) -> String {
        format!("{FAILED_MESSAGE_PREFIX}{key}")
    }

    fn retry_count_key(key: &str) -> String {
        format!("{RETRY_COUNT_PREFIX}{key}")
    }

    fn dead_letter_key(key: &str) -> String {
        format!("{DEAD_LETTER_PREFIX}{key}")
    }

    /// 记录一次处理失败
    ///
    /// 台账写入失败会向上传播：调用方据此决定不提交位点，
    /// 让总线在台账恢复后重新投递该消息。
    pub async fn record(
        &self,
        key: &str,
        message: &str,
        error_text: &str,
        class: FailureClass,
    ) -> Result<LedgerOutcome, OrderError> {
        let current = self.retry_count(key).await;

        match decide(current, self.max_retries, class) {
            LedgerAction::DeadLetter => {
                let record = FailureRecord {
                    key: key.to_string(),
                    message: message.to_string(),
                    error: error_text.to_string(),
                    retry_count: current,
                    max_retries: self.max_retries,
                    timestamp: Utc::now(),
                    status: Some(DEAD_LETTER_STATUS.to_string()),
                };

                self.cache
                    .set(&Self::dead_letter_key(key), &record, self.ttl)
                    .await?;

                error!(
                    key,
                    retry_count = current,
                    max_retries = self.max_retries,
                    error = error_text,
                    "消息进入死信，等待人工介入"
                );

                Ok(LedgerOutcome::DeadLettered)
            }
            LedgerAction::Record { next_retry_count } => {
                let record = FailureRecord {
                    key: key.to_string(),
                    message: message.to_string(),
                    error: error_text.to_string(),
                    retry_count: next_retry_count,
                    max_retries: self.max_retries,
                    timestamp: Utc::now(),
                    status: None,
                };

                self.cache
                    .set(&Self::failed_message_key(key), &record, self.ttl)
                    .await?;

                let counter_key = Self::retry_count_key(key);
                self.cache.incr(&counter_key, 1).await?;
                self.cache.expire(&counter_key, self.ttl).await?;

                warn!(
                    key,
                    retry_count = next_retry_count,
                    max_retries = self.max_retries,
                    error = error_text,
                    "失败消息已记录台账"
                );

                Ok(LedgerOutcome::Recorded {
                    retry_count: next_retry_count,
                })
            }
        }
    }

    /// 查询失败记录
    pub async fn get(&self, key: &str) -> Option<FailureRecord> {
        self.cache.get(&Self::failed_message_key(key)).await
    }

    /// 查询死信记录
    pub async fn get_dead_letter(&self, key: &str) -> Option<FailureRecord> {
        self.cache.get(&Self::dead_letter_key(key)).await
    }

    /// 读取当前重试计数，键缺失或不可达时为 0
    async fn retry_count(&self, key: &str) -> u32 {
        self.cache
            .get::<u32>(&Self::retry_count_key(key))
            .await
            .unwrap_or(0)
    }
}
