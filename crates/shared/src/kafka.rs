//! Kafka 消费基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的手动提交消费者抽象，
//! 统一消息所有权转换、错误映射和优雅关闭语义。
//!
//! 提交纪律：每个消费者一次只处理一条消息，handler 返回 Ok（终态结论已
//! 落地，包括失败台账写入）后才同步提交位点；handler 返回 Err 说明终态
//! 结论本身没有落地（例如台账写入失败），此时不提交，消息等待总线重新
//! 投递。同一分区内位点因此严格单调推进。

use std::collections::HashMap;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::OrderError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的
/// 结构体，使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, OrderError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| OrderError::Parse(format!("负载非 UTF-8 编码: {e}")))
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, OrderError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| OrderError::Parse(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer — 手动提交消费者
// ---------------------------------------------------------------------------

/// 面向业务的手动提交 Kafka 消费者
///
/// 同一消费组内可以创建多个实例组成固定大小的工作池，
/// 分区在组内成员间自动分配，每个实例独占其分区并按位点顺序逐条处理。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    worker_id: usize,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// 关闭自动提交，位点由消费循环在终态结论落地后手动同步提交。
    /// `max.poll.interval.ms` 给慢消息（重试耗尽整个退避窗口）留出余量，
    /// 避免消费者被协调器判定失活而触发分区再均衡。
    pub fn new(config: &KafkaConfig, worker_id: usize) -> Result<Self, OrderError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval_ms.to_string(),
            )
            .create()
            .map_err(|e| OrderError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            worker_id,
            "Kafka 消费者已初始化（手动提交）"
        );

        Ok(Self {
            consumer,
            worker_id,
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), OrderError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| OrderError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, worker_id = self.worker_id, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 逐条拉取消息：handler 处理完成（返回 Ok）后同步提交位点，再拉取
    /// 下一条，保证每个工作线程同一时刻至多一条消息在途。handler 返回
    /// Err 时不提交位点，消息将在再均衡或重启后被重新投递。
    ///
    /// 关闭信号变为 `true` 时退出循环，正在执行的 handler 会自然完成。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), OrderError>>,
    {
        info!(worker_id = self.worker_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = self.worker_id, "收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = self.consumer.recv() => {
                    let borrowed = match msg_result {
                        Ok(m) => m,
                        Err(e) => {
                            error!(worker_id = self.worker_id, error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let msg = ConsumerMessage::from_borrowed(&borrowed);
                    debug!(
                        worker_id = self.worker_id,
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    match handler(msg).await {
                        Ok(()) => {
                            if let Err(e) =
                                self.consumer.commit_message(&borrowed, CommitMode::Sync)
                            {
                                error!(
                                    worker_id = self.worker_id,
                                    error = %e,
                                    partition = borrowed.partition(),
                                    offset = borrowed.offset(),
                                    "提交位点失败，消息可能被重复投递"
                                );
                            }
                        }
                        Err(e) => {
                            warn!(
                                worker_id = self.worker_id,
                                error = %e,
                                partition = borrowed.partition(),
                                offset = borrowed.offset(),
                                "终态结论未落地，不提交位点，等待重新投递"
                            );
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_message_creation() {
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 42,
            key: Some("order-123".to_string()),
            payload: b"hello".to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers: HashMap::from([("trace-id".to_string(), "abc-123".to_string())]),
        };

        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.partition, 0);
        assert_eq!(msg.offset, 42);
        assert_eq!(msg.key.as_deref(), Some("order-123"));
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.headers.get("trace-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_consumer_message_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Intent {
            #[serde(rename = "orderId")]
            order_id: String,
            #[serde(rename = "customerId")]
            customer_id: String,
        }

        let json = r#"{"orderId":"order-123","customerId":"customer-001"}"#;
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 1,
            offset: 100,
            key: None,
            payload: json.as_bytes().to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };

        let intent: Intent = msg.deserialize_payload().unwrap();
        assert_eq!(
            intent,
            Intent {
                order_id: "order-123".to_string(),
                customer_id: "customer-001".to_string(),
            }
        );
    }

    #[test]
    fn test_consumer_message_deserialize_invalid_json() {
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"not json".to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };

        let result: Result<serde_json::Value, _> = msg.deserialize_payload();
        assert!(result.is_err());
    }

    #[test]
    fn test_consumer_message_payload_str() {
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"hello world".to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };

        assert_eq!(msg.payload_str().unwrap(), "hello world");
    }

    #[test]
    fn test_consumer_message_payload_str_invalid_utf8() {
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: vec![0xFF, 0xFE],
            timestamp: None,
            headers: HashMap::new(),
        };

        assert!(msg.payload_str().is_err());
    }
}
