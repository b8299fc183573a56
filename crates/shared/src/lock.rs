//! 分布式锁模块
//!
//! 基于 Redis SET NX PX 实现命名租约：持有者令牌随机生成，
//! 释放和续期都通过 Lua 脚本校验令牌，防止误删其他持有者的租约。
//! 租约带 TTL，持有者崩溃后锁会在 TTL 到期时自动释放。

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::error::{OrderError, Result};

/// 校验令牌后删除：只有当前持有者能释放租约
const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// 校验令牌后续期：只有当前持有者能延长租约
const EXTEND_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("pexpire", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

/// 分布式锁服务抽象
///
/// 抽取为 trait 便于处理管道在测试中注入 mock 实现。
#[async_trait]
pub trait LockService: Send + Sync {
    /// 尝试获取租约
    ///
    /// 成功返回持有者令牌，锁已被其他持有者占用时返回 None（不是错误）。
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>>;

    /// 释放租约（校验令牌）
    ///
    /// 返回 true 表示成功删除；false 表示租约已过期或被其他持有者占用。
    async fn release(&self, key: &str, token: &str) -> Result<bool>;

    /// 检查租约是否被任何持有者占用
    async fn is_held(&self, key: &str) -> Result<bool>;

    /// 查询租约剩余时长（秒）
    ///
    /// 租约不存在返回 -1，存在但未附加 TTL 返回 -2。
    async fn remaining_ttl(&self, key: &str) -> Result<i64>;

    /// 续期租约（校验令牌）
    ///
    /// 返回 true 表示续期成功；false 表示租约已过期或易主。
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;
}

/// Redis 分布式锁实现
#[derive(Clone)]
pub struct RedisLockService {
    client: Client,
}

impl RedisLockService {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url().as_str())?;
        info!(url = %config.url(), "分布式锁客户端已创建");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(OrderError::from)
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.get_conn().await?;

        // SET key token NX PX millis: 原子性的"不存在才设置"
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if result.is_some() {
            debug!(key, token = %token, "租约已获取");
            Ok(Some(token))
        } else {
            debug!(key, "租约已被其他持有者占用");
            Ok(None)
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            // 租约已过期或被其他持有者重新获取，通常说明处理时间超过了 TTL
            warn!(key, token = %token, "释放时租约已不属于当前持有者");
            Ok(false)
        } else {
            debug!(key, "租约已释放");
            Ok(true)
        }
    }

    async fn is_held(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        let raw: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;

        // Redis 约定：-2 键不存在，-1 未附加 TTL；
        // 对外契约相反：-1 表示租约不存在，-2 表示未附加 TTL
        let remaining = match raw {
            -2 => -1,
            -1 => -2,
            n => n,
        };
        Ok(remaining)
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        let extended: i32 = redis::Script::new(EXTEND_SCRIPT)
            .key(key)
            .arg(token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        if extended == 0 {
            warn!(key, token = %token, "续期时租约已不属于当前持有者");
        } else {
            debug!(key, ttl_ms = ttl.as_millis() as u64, "租约已续期");
        }
        Ok(extended != 0)
    }
}
