//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和读穿缓存操作封装，值统一为 JSON 编码。
//!
//! 读取操作整体降级：连接失败或反序列化失败都按未命中处理并记录告警，
//! 由调用方回源重新获取并覆盖写入。缓存永远不会让处理管道硬失败。

use crate::config::RedisConfig;
use crate::error::{OrderError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    ///
    /// 客户端本身是惰性的，连接在首次操作时才真正建立。
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url().as_str())?;
        info!(url = %config.url(), "Redis 客户端已创建");
        Ok(Self { client })
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(OrderError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(OrderError::from)
    }

    /// 获取值（降级读取）
    ///
    /// 任何失败都视为未命中：连接不可达、键不存在、值无法反序列化。
    /// 反序列化失败说明缓存中存在脏数据，调用方回源后会用新值覆盖。
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = match self.get_conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(key, error = %e, "缓存连接失败，按未命中处理");
                return None;
            }
        };

        let value: Option<String> = match conn.get(key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "缓存读取失败，按未命中处理");
                return None;
            }
        };

        let raw = value?;
        match serde_json::from_str(&raw) {
            Ok(parsed) => {
                debug!(key, "缓存命中");
                Some(parsed)
            }
            Err(e) => {
                warn!(key, error = %e, "缓存值反序列化失败，按未命中处理");
                None
            }
        }
    }

    /// 设置值并附加 TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| OrderError::Internal(format!("缓存值序列化失败: {e}")))?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// 删除值
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 基于 Redis SET NX EX 实现。返回 true 表示设置成功（key 不存在），
    /// false 表示 key 已存在。
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| OrderError::Internal(format!("缓存值序列化失败: {e}")))?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 增量操作
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// 缓存键生成器
///
/// 集中管理键格式，防止字符串散落在各模块导致拼写不一致。
pub struct CacheKey;

impl CacheKey {
    /// 商品快照缓存键
    pub fn product(product_id: &str) -> String {
        format!("product:{}", product_id)
    }

    /// 客户快照缓存键
    pub fn customer(customer_id: &str) -> String {
        format!("customer:{}", customer_id)
    }
}
