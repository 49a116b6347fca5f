use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::push::result::SendResult;
use crate::push::types::{Notification, PushVendor};

/// Push Channel Trait（推送通道接口）
///
/// `send` 不会返回错误：本地异常在通道内部被捕获并归类为 [`SendResult`]。
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// 发送一条通知，直到网关响应或本地失败才返回
    async fn send(&self, notification: Arc<Notification>) -> SendResult;

    /// 获取 Channel 对应的 Vendor
    fn vendor(&self) -> PushVendor;

    /// 通道实例 ID，用于日志
    fn channel_id(&self) -> Uuid;

    /// 释放连接（可重复调用）
    fn close(&self);
}
