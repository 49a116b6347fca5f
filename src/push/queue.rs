use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PushError, Result};
use crate::push::types::Notification;

/// 通知队列接口
///
/// 生产者只会追加到尾部；头部/指定位置插入是否支持由实现决定。
pub trait NotificationQueue<T>: Send + Sync {
    /// 追加到队尾，不阻塞
    fn enqueue(&self, item: T);

    /// 插入到队首
    fn enqueue_at_start(&self, item: T) -> Result<()>;

    /// 插入到指定位置
    fn enqueue_at(&self, item: T, index: usize) -> Result<()>;

    /// 取出队首元素；`block` 为 true 时一直等到有元素
    fn dequeue(&self, block: bool) -> Option<T>;

    /// 当前长度（并发下仅供参考）
    fn count(&self) -> usize;
}

/// 并发投递队列（无界 FIFO）
///
/// 同时支持线程阻塞式消费（[`NotificationQueue::dequeue`]）和异步消费
/// （[`DeliveryQueue::dequeue_async`]）。不支持队首/指定位置插入，
/// 调用会返回 [`PushError::Unsupported`]，不会退化成尾部插入。
pub struct DeliveryQueue<T = Arc<Notification>> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    notify: Notify,
}

impl<T> DeliveryQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// 非阻塞取出
    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 异步等待并取出队首元素
    pub async fn dequeue_async(&self) -> T {
        loop {
            // 先登记等待再检查队列，检查之后的 enqueue 一定能唤醒这里
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return item;
            }
            notified.await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for DeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> NotificationQueue<T> for DeliveryQueue<T> {
    fn enqueue(&self, item: T) {
        let len = {
            let mut items = self.items.lock();
            items.push_back(item);
            items.len()
        };
        self.available.notify_one();
        self.notify.notify_one();
        debug!("[QUEUE] Enqueued, len={}", len);
    }

    fn enqueue_at_start(&self, _item: T) -> Result<()> {
        warn!("[QUEUE] Rejected head insertion");
        Err(PushError::Unsupported(
            "this queue doesn't support adding to the front".to_string(),
        ))
    }

    fn enqueue_at(&self, _item: T, index: usize) -> Result<()> {
        warn!("[QUEUE] Rejected insertion at index {}", index);
        Err(PushError::Unsupported(
            "this queue doesn't support adding to the middle".to_string(),
        ))
    }

    fn dequeue(&self, block: bool) -> Option<T> {
        let mut items = self.items.lock();
        if !block {
            return items.pop_front();
        }
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut items);
        }
    }

    fn count(&self) -> usize {
        self.items.lock().len()
    }
}
