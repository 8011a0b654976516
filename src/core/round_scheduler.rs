//! 揭示调度：把一批生成结果按节奏逐条放出
//!
//! 第一条立即放出，其余每条间隔固定节拍；全部放出后在完成时刻报告 Complete。
//! 同一时刻只允许一个活跃批次，新批次会先作废旧批次；作废后残留的定时揭示一律丢弃。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// 批次 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BatchId(u64);

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchId {
    pub fn new() -> Self {
        Self(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 揭示节奏
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    /// 相邻两条之间的间隔
    pub reveal_interval: Duration,
    /// 完成时刻计算用的每条步长
    pub completion_step: Duration,
    /// 最后一条之后的固定收尾时间
    pub settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            reveal_interval: Duration::from_millis(800),
            completion_step: Duration::from_millis(1500),
            settle: Duration::from_millis(2000),
        }
    }
}

/// 批次内任何时刻的上限；配置值过大时截断，避免计算溢出
pub const MAX_BATCH_OFFSET: Duration = Duration::from_secs(24 * 60 * 60);

impl Pacing {
    /// 第 index 条（从 0 开始）相对批次开始的揭示时刻
    pub fn reveal_offset(&self, index: usize) -> Duration {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        self.reveal_interval
            .saturating_mul(index)
            .min(MAX_BATCH_OFFSET)
    }

    /// 批次完成时刻：max(1, N-1) × 步长 + 收尾时间，且不早于最后一条的揭示时刻
    pub fn completion_delay(&self, len: usize) -> Duration {
        let steps = u32::try_from(len.saturating_sub(1).max(1)).unwrap_or(u32::MAX);
        let reported = self
            .completion_step
            .saturating_mul(steps)
            .saturating_add(self.settle);
        reported
            .max(self.reveal_offset(len.saturating_sub(1)))
            .min(MAX_BATCH_OFFSET)
    }
}

/// 调度器发出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealEvent<T> {
    /// 第 index 条到点，可以写入消息日志
    Item { batch: BatchId, index: usize, item: T },
    /// 整批结束（最后一条之后、完成时刻到达）
    Complete { batch: BatchId, len: usize },
}

/// 揭示调度器：持有当前批次的取消令牌
#[derive(Debug)]
pub struct RoundScheduler {
    pacing: Pacing,
    current: Option<(BatchId, CancellationToken)>,
}

impl RoundScheduler {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            current: None,
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// 调度一批：先作废旧批次；第一条同步入队，其余由后台任务按节拍送出。
    /// `wrap` 将 RevealEvent 包装为驱动方的事件类型。
    pub fn schedule<T, E, F>(
        &mut self,
        items: Vec<T>,
        parent: &CancellationToken,
        tx: mpsc::UnboundedSender<E>,
        wrap: F,
    ) -> BatchId
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(RevealEvent<T>) -> E + Send + 'static,
    {
        self.invalidate();

        let batch = BatchId::new();
        let token = parent.child_token();
        self.current = Some((batch, token.clone()));

        let len = items.len();
        let pacing = self.pacing;
        let start = Instant::now();
        tracing::debug!(?batch, len, "schedule reveal batch");

        let mut items = items.into_iter().enumerate();
        if let Some((index, item)) = items.next() {
            let _ = tx.send(wrap(RevealEvent::Item { batch, index, item }));
        }

        tokio::spawn(async move {
            for (index, item) in items {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep_until(start + pacing.reveal_offset(index)) => {}
                }
                if tx.send(wrap(RevealEvent::Item { batch, index, item })).is_err() {
                    return;
                }
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep_until(start + pacing.completion_delay(len)) => {
                    let _ = tx.send(wrap(RevealEvent::Complete { batch, len }));
                }
            }
        });

        batch
    }

    /// 是否为当前有效批次
    pub fn is_current(&self, batch: BatchId) -> bool {
        matches!(&self.current, Some((id, _)) if *id == batch)
    }

    /// 批次正常结束后释放
    pub fn finish(&mut self, batch: BatchId) {
        if self.is_current(batch) {
            self.current = None;
        }
    }

    /// 作废当前批次：后台任务停止，已入队的残留事件由 is_current 过滤
    pub fn invalidate(&mut self) -> Option<BatchId> {
        let (batch, token) = self.current.take()?;
        token.cancel();
        tracing::debug!(?batch, "reveal batch invalidated");
        Some(batch)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}

impl Default for RoundScheduler {
    fn default() -> Self {
        Self::new(Pacing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_delay_formula() {
        let pacing = Pacing::default();
        assert_eq!(pacing.completion_delay(1), Duration::from_millis(3500));
        assert_eq!(pacing.completion_delay(2), Duration::from_millis(3500));
        assert_eq!(pacing.completion_delay(3), Duration::from_millis(5000));
    }

    #[test]
    fn test_completion_delay_monotonic() {
        let pacing = Pacing::default();
        let mut last = Duration::ZERO;
        for n in 2..20 {
            let d = pacing.completion_delay(n);
            assert!(d > last, "n={n}");
            last = d;
        }
    }

    #[test]
    fn test_completion_never_before_last_reveal() {
        let pacing = Pacing {
            reveal_interval: Duration::from_millis(1000),
            completion_step: Duration::from_millis(100),
            settle: Duration::ZERO,
        };
        assert_eq!(pacing.completion_delay(5), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_reveals_in_order_then_completes() {
        let mut scheduler = RoundScheduler::default();
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let batch = scheduler.schedule(vec!["a", "b", "c"], &root, tx, |e| e);

        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Some(RevealEvent::Item { index, item, .. }) => {
                    seen.push((index, item, start.elapsed()));
                }
                Some(RevealEvent::Complete { batch: done, len }) => {
                    assert_eq!(done, batch);
                    assert_eq!(len, 3);
                    assert_eq!(start.elapsed(), Duration::from_millis(5000));
                    break;
                }
                None => panic!("channel closed early"),
            }
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (0, "a", Duration::ZERO));
        assert_eq!(seen[1].1, "b");
        assert_eq!(seen[1].2, Duration::from_millis(800));
        assert_eq!(seen[2].2, Duration::from_millis(1600));
    }

    #[test]
    fn test_huge_pacing_is_capped() {
        let pacing = Pacing {
            reveal_interval: Duration::from_millis(u64::MAX),
            completion_step: Duration::from_millis(u64::MAX),
            settle: Duration::from_millis(u64::MAX),
        };
        assert_eq!(pacing.reveal_offset(0), Duration::ZERO);
        assert_eq!(pacing.reveal_offset(3), MAX_BATCH_OFFSET);
        assert_eq!(pacing.completion_delay(1), MAX_BATCH_OFFSET);
        assert_eq!(pacing.completion_delay(usize::MAX), MAX_BATCH_OFFSET);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_item_batch_completes() {
        let mut scheduler = RoundScheduler::default();
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let batch = scheduler.schedule(vec!["only"], &root, tx, |e| e);

        assert_eq!(
            rx.recv().await,
            Some(RevealEvent::Item { batch, index: 0, item: "only" })
        );
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert_eq!(rx.recv().await, Some(RevealEvent::Complete { batch, len: 1 }));
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
        // 任务结束后发送端被释放
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_pacing_still_completes() {
        let mut scheduler = RoundScheduler::new(Pacing {
            reveal_interval: Duration::from_millis(u64::MAX),
            completion_step: Duration::from_millis(u64::MAX),
            settle: Duration::ZERO,
        });
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let batch = scheduler.schedule(vec![1, 2], &root, tx, |e| e);

        assert!(matches!(rx.recv().await, Some(RevealEvent::Item { index: 0, .. })));
        assert!(matches!(rx.recv().await, Some(RevealEvent::Item { index: 1, .. })));
        assert_eq!(rx.recv().await, Some(RevealEvent::Complete { batch, len: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_drops_pending_reveals() {
        let mut scheduler = RoundScheduler::default();
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let batch = scheduler.schedule(vec![1, 2, 3], &root, tx, |e| e);

        assert!(matches!(rx.recv().await, Some(RevealEvent::Item { index: 0, .. })));
        assert_eq!(scheduler.invalidate(), Some(batch));
        assert!(!scheduler.is_current(batch));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_batch_supersedes_previous() {
        let mut scheduler = RoundScheduler::default();
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = scheduler.schedule(vec!["x1", "x2"], &root, tx.clone(), |e| e);
        let second = scheduler.schedule(vec!["y1"], &root, tx, |e| e);
        assert!(!scheduler.is_current(first));
        assert!(scheduler.is_current(second));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        let from_first = events
            .iter()
            .filter(|e| matches!(e, RevealEvent::Item { batch, .. } if *batch == first))
            .count();
        assert_eq!(from_first, 1, "only the synchronously queued head of the old batch");
        assert!(events
            .iter()
            .any(|e| matches!(e, RevealEvent::Complete { batch, .. } if *batch == second)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_batch() {
        let mut scheduler = RoundScheduler::default();
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.schedule(vec![1, 2], &root, tx, |e| e);
        let _ = rx.recv().await;
        root.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
