//! 订单富化与持久化工作进程
//!
//! 从 Kafka 消费订单意图，针对商品与客户参考服务做并发富化，
//! 执行业务校验后将完全反规范化的订单记录幂等地写入订单库。
//! 处理失败按瞬时/永久分类进入失败台账或死信。

pub mod clients;
pub mod consumer;
pub mod enrichment;
pub mod failure;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod validator;
