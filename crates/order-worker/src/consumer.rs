//! Kafka 消费者与结论路由
//!
//! 固定大小的消费者工作池：同一消费组内创建 N 个消费者实例，
//! 分区由组协调器在实例间分配，每个实例独占其分区并逐条处理，
//! 分区内的消息严格按位点顺序开始处理。
//!
//! 每条消息的流程：解析订单意图 -> 管道处理 -> 终态结论路由
//! （失败类结论先写入失败台账）-> 提交位点。解析失败的消息直接
//! 进入台账（永久性）后提交。台账写入失败时不提交位点，交由
//! 总线重新投递。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use order_shared::config::AppConfig;
use order_shared::error::OrderError;
use order_shared::kafka::{ConsumerMessage, KafkaConsumer};

use crate::failure::FailureLedger;
use crate::models::OrderIntent;
use crate::pipeline::OrderPipeline;

/// 订单消费者工作池
pub struct ConsumerPool {
    pipeline: Arc<OrderPipeline>,
    ledger: Arc<FailureLedger>,
}

impl ConsumerPool {
    pub fn new(pipeline: Arc<OrderPipeline>, ledger: Arc<FailureLedger>) -> Self {
        Self { pipeline, ledger }
    }

    /// 启动消费者工作池，阻塞直到收到关闭信号
    pub async fn run(
        self,
        config: &AppConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), OrderError> {
        let topic = config.kafka.topic.clone();
        let concurrency = config.kafka.concurrency.max(1);

        info!(
            topic = %topic,
            group = %config.kafka.consumer_group,
            concurrency,
            "启动订单消费者工作池"
        );

        let mut handles = Vec::with_capacity(concurrency);

        for worker_id in 0..concurrency {
            let consumer = KafkaConsumer::new(&config.kafka, worker_id)?;
            consumer.subscribe(&[topic.as_str()])?;

            let pipeline = Arc::clone(&self.pipeline);
            let ledger = Arc::clone(&self.ledger);
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                consumer
                    .start(shutdown, move |msg| {
                        let pipeline = Arc::clone(&pipeline);
                        let ledger = Arc::clone(&ledger);
                        async move { handle_message(&pipeline, &ledger, msg).await }
                    })
                    .await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "消费者工作线程异常退出");
            }
        }

        info!("订单消费者工作池已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息的完整流程
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的
/// 消费者。返回 Ok 表示终态结论已落地（含必要的台账写入），
/// 调用方可以安全提交位点。
pub async fn handle_message(
    pipeline: &OrderPipeline,
    ledger: &FailureLedger,
    msg: ConsumerMessage,
) -> Result<(), OrderError> {
    info!(
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset,
        key = msg.key.as_deref().unwrap_or("<none>"),
        "收到订单消息"
    );

    // 非 UTF-8 负载无法解析也无法重试，记台账后提交
    let payload = match msg.payload_str() {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!(error = %e, "消息负载非 UTF-8，直接进入死信");
            let key = fallback_ledger_key(&msg);
            ledger
                .record(&key, "<non-utf8 payload>", &e.to_string(), e.failure_class())
                .await?;
            return Ok(());
        }
    };

    let intent = match OrderIntent::from_json(&payload) {
        Ok(intent) => intent,
        Err(e) => {
            warn!(error = %e, "订单意图解析失败，直接进入死信");
            let key = msg
                .key
                .clone()
                .unwrap_or_else(|| fallback_ledger_key(&msg));
            ledger
                .record(&key, &payload, &e.to_string(), e.failure_class())
                .await?;
            return Ok(());
        }
    };

    // 台账 key：消息 key 优先，缺省时退回 orderId
    let ledger_key = msg.key.clone().unwrap_or_else(|| intent.order_id.clone());

    let outcome = pipeline.process(&intent).await;

    if let Some((class, reason)) = outcome.ledger_entry() {
        ledger.record(&ledger_key, &payload, &reason, class).await?;
    }

    Ok(())
}

/// 无法取得消息 key 和 orderId 时的台账 key
fn fallback_ledger_key(msg: &ConsumerMessage) -> String {
    format!("{}-{}-{}", msg.topic, msg.partition, msg.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn message(key: Option<&str>, payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: "orders".to_string(),
            partition: 2,
            offset: 17,
            key: key.map(String::from),
            payload: payload.to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_fallback_ledger_key_is_positional() {
        let msg = message(None, b"{}");
        assert_eq!(fallback_ledger_key(&msg), "orders-2-17");
    }

    #[test]
    fn test_valid_intent_deserializes_from_message() {
        let json = br#"{
            "orderId": "order-123",
            "customerId": "customer-001",
            "productIds": ["product-001", "product-002"]
        }"#;
        let msg = message(Some("order-123"), json);

        let payload = msg.payload_str().unwrap();
        let intent = OrderIntent::from_json(payload).unwrap();

        assert_eq!(intent.order_id, "order-123");
        assert_eq!(intent.product_ids.len(), 2);
    }

    #[test]
    fn test_parse_failure_is_permanent() {
        let err = OrderIntent::from_json("{not json").unwrap_err();
        assert_eq!(
            err.failure_class(),
            order_shared::error::FailureClass::Permanent
        );
    }
}
