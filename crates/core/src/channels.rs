//! 采集流水线使用的可取消通道组合子
//!
//! 每个组合子派生一个tokio任务, 与上下游之间用容量为 [`CHANNEL_CAPACITY`]
//! 的有界通道连接. 输入关闭、输出接收端被丢弃或上下文被取消时任务退出,
//! 流水线被读完或取消后不会留下任何任务.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// 管道各阶段之间的通道容量
pub const CHANNEL_CAPACITY: usize = 1;

pub type Stream<T> = mpsc::Receiver<T>;

/// 创建一个在 `timeout` 之后自动取消的令牌
///
/// 令牌被任何一方取消后计时任务随即退出, 调用方用完后应当取消它 (或持有 drop guard).
pub fn deadline(timeout: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    token
}

/// 按顺序发送所有元素, 然后关闭流
pub fn generate_from<T>(ctx: &CancellationToken, items: Vec<T>) -> Stream<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            for item in items {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        .in_current_span(),
    );
    rx
}

/// 把整个输入收集成一个 `Vec`
///
/// 输入关闭后返回的接收端得到完整集合. 如果 `ctx` 先被取消, 发送端被丢弃, 不交付任何结果.
pub fn collect_to<T>(ctx: &CancellationToken, mut source: Stream<T>) -> oneshot::Receiver<Vec<T>>
where
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            let mut items = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    item = source.recv() => match item {
                        Some(item) => items.push(item),
                        None => {
                            let _ = tx.send(items);
                            return;
                        }
                    }
                }
            }
        }
        .in_current_span(),
    );
    rx
}

/// 原样转发, `ctx` 结束时立即关闭输出
pub fn cancellable<T>(ctx: &CancellationToken, mut source: Stream<T>) -> Stream<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    item = source.recv() => item,
                };
                let Some(item) = item else {
                    return;
                };
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        .in_current_span(),
    );
    rx
}

/// 把 `source` 的每个元素复制到两个输出
///
/// 同一元素的两次发送并发进行, 先就绪的消费者无需等待另一个.
/// 丢弃接收端的消费者不再收到元素, 另一个不受影响.
pub fn split<T>(ctx: &CancellationToken, mut source: Stream<T>) -> (Stream<T>, Stream<T>)
where
    T: Clone + Send + 'static,
{
    let (left_tx, left_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (right_tx, right_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    item = source.recv() => item,
                };
                let Some(item) = item else {
                    return;
                };
                if left_tx.is_closed() && right_tx.is_closed() {
                    return;
                }
                let copy = item.clone();
                let both = async {
                    let _ = tokio::join!(left_tx.send(copy), right_tx.send(item));
                };
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    _ = both => {}
                }
            }
        }
        .in_current_span(),
    );
    (left_rx, right_rx)
}

/// [`filter_chain`] 使用的具名谓词
pub trait Predicate<T>: Send + Sync {
    fn name(&self) -> &str;

    /// 元素通过时返回 true
    fn accept(&self, item: &T) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
struct PredicateStats {
    seen: usize,
    passed: usize,
}

fn format_stats<T>(predicates: &[Box<dyn Predicate<T>>], stats: &[PredicateStats]) -> String {
    predicates
        .iter()
        .zip(stats)
        .map(|(p, s)| format!("[{}: {}/{}]", p.name(), s.passed, s.seen))
        .collect()
}

/// 只转发所有谓词都接受的元素
///
/// 谓词按顺序执行, 遇到第一个拒绝即停止. 阶段结束时以 debug 级别输出每个谓词的计数.
pub fn filter_chain<T>(
    ctx: &CancellationToken,
    mut source: Stream<T>,
    predicates: Vec<Box<dyn Predicate<T>>>,
) -> Stream<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            let mut stats = vec![PredicateStats::default(); predicates.len()];
            loop {
                let item = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    item = source.recv() => item,
                };
                let Some(item) = item else {
                    break;
                };
                let mut accepted = true;
                for (predicate, stat) in predicates.iter().zip(stats.iter_mut()) {
                    stat.seen += 1;
                    if !predicate.accept(&item) {
                        accepted = false;
                        break;
                    }
                    stat.passed += 1;
                }
                if !accepted {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("filter stats {}", format_stats(&predicates, &stats));
        }
        .in_current_span(),
    );
    rx
}

/// 同时读取值流和对应的错误流
///
/// 收到第一个错误立即返回该错误, 丢弃已收集的值. 否则等两个流都关闭,
/// 按到达顺序返回所有值.
pub async fn drain_pair<T, E>(mut values: Stream<T>, mut errors: Stream<E>) -> Result<Vec<T>, E> {
    let mut result = Vec::new();
    let mut errors_open = true;
    loop {
        tokio::select! {
            item = values.recv() => match item {
                Some(item) => result.push(item),
                None => break,
            },
            err = errors.recv(), if errors_open => match err {
                Some(err) => return Err(err),
                None => errors_open = false,
            },
        }
    }
    if errors_open {
        if let Some(err) = errors.recv().await {
            return Err(err);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::timeout;

    const GUARD: Duration = Duration::from_secs(5);

    async fn drain<T>(mut rx: Stream<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(v) = rx.recv().await {
            out.push(v);
        }
        out
    }

    struct Even;

    impl Predicate<i32> for Even {
        fn name(&self) -> &str {
            "even"
        }

        fn accept(&self, item: &i32) -> bool {
            item % 2 == 0
        }
    }

    struct Counting {
        limit: i32,
        calls: Arc<AtomicUsize>,
    }

    impl Predicate<i32> for Counting {
        fn name(&self) -> &str {
            "below"
        }

        fn accept(&self, item: &i32) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *item < self.limit
        }
    }

    #[tokio::test]
    async fn test_generate_then_collect() {
        let ctx = CancellationToken::new();
        let rx = generate_from(&ctx, vec![1, 2, 3]);
        let collected = timeout(GUARD, collect_to(&ctx, rx)).await.unwrap().unwrap();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_generate_stops_on_cancel() {
        let ctx = CancellationToken::new();
        let mut rx = generate_from(&ctx, (0..100).collect::<Vec<_>>());
        assert_eq!(rx.recv().await, Some(0));
        ctx.cancel();
        let rest = timeout(GUARD, drain(rx)).await.unwrap();
        assert!(rest.len() < 99);
    }

    #[tokio::test]
    async fn test_collect_to_delivers_nothing_when_cancelled() {
        let ctx = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let result = collect_to(&ctx, rx);
        tx.send(1).await.unwrap();
        ctx.cancel();
        // the source never closes, only the cancellation ends collection
        let outcome = timeout(GUARD, result).await.unwrap();
        assert!(outcome.is_err());
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancellable_closes_even_if_source_is_idle() {
        let ctx = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let mut out = cancellable(&ctx, rx);
        ctx.cancel();
        assert_eq!(timeout(GUARD, out.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancellable_passes_through() {
        let ctx = CancellationToken::new();
        let out = cancellable(&ctx, generate_from(&ctx, vec!["a", "b"]));
        assert_eq!(timeout(GUARD, drain(out)).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_split_delivers_everything_to_both() {
        let ctx = CancellationToken::new();
        let input: Vec<i32> = vec![5, 1, 1, 4, 2, 9, 9, 9];
        let (left, right) = split(&ctx, generate_from(&ctx, input.clone()));
        let (left, right) = timeout(GUARD, async { tokio::join!(drain(left), drain(right)) })
            .await
            .unwrap();
        assert_eq!(left, input);
        assert_eq!(right, input);
    }

    #[tokio::test]
    async fn test_split_does_not_starve_slow_branch() {
        let ctx = CancellationToken::new();
        let input: Vec<i32> = (0..50).collect();
        let (mut fast, slow) = split(&ctx, generate_from(&ctx, input.clone()));
        let slow_reader = tokio::spawn(async move {
            let mut slow = slow;
            let mut out = Vec::new();
            while let Some(v) = slow.recv().await {
                tokio::time::sleep(Duration::from_millis(1)).await;
                out.push(v);
            }
            out
        });
        let mut fast_out = Vec::new();
        while let Some(v) = timeout(GUARD, fast.recv()).await.unwrap() {
            fast_out.push(v);
        }
        let slow_out = timeout(GUARD, slow_reader).await.unwrap().unwrap();
        assert_eq!(fast_out, input);
        assert_eq!(slow_out, input);
    }

    #[tokio::test]
    async fn test_split_cancel_closes_both_without_deadlock() {
        let ctx = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let (mut left, mut right) = split(&ctx, rx);
        ctx.cancel();
        assert_eq!(timeout(GUARD, left.recv()).await.unwrap(), None);
        assert_eq!(timeout(GUARD, right.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_with_one_consumer_gone() {
        let ctx = CancellationToken::new();
        let (left, right) = split(&ctx, generate_from(&ctx, vec![1, 2, 3]));
        drop(right);
        assert_eq!(timeout(GUARD, drain(left)).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_filter_chain_is_logical_and() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let predicates: Vec<Box<dyn Predicate<i32>>> = vec![
            Box::new(Even),
            Box::new(Counting {
                limit: 6,
                calls: calls.clone(),
            }),
        ];
        let out = filter_chain(&ctx, generate_from(&ctx, (1..=8).collect()), predicates);
        assert_eq!(timeout(GUARD, drain(out)).await.unwrap(), vec![2, 4]);
        // odd numbers never reach the second predicate
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_filter_chain_without_predicates_passes_all() {
        let ctx = CancellationToken::new();
        let out = filter_chain(&ctx, generate_from(&ctx, vec![1, 2]), Vec::new());
        assert_eq!(timeout(GUARD, drain(out)).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_filter_chain_respects_cancel() {
        let ctx = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let mut out = filter_chain(&ctx, rx, vec![Box::new(Even)]);
        ctx.cancel();
        assert_eq!(timeout(GUARD, out.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drain_pair_collects_values() {
        let ctx = CancellationToken::new();
        let values = generate_from(&ctx, vec![1, 2, 3]);
        let errors = generate_from::<String>(&ctx, Vec::new());
        let result = timeout(GUARD, drain_pair(values, errors)).await.unwrap();
        assert_eq!(result, Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_drain_pair_fails_fast() {
        let (values_tx, values) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let producer = tokio::spawn(async move {
            values_tx.send(1).await.unwrap();
            errors_tx.send("boom".to_string()).await.unwrap();
            // values stay open: the error alone must end the drain
            values_tx.closed().await;
        });
        let result = timeout(GUARD, drain_pair(values, errors)).await.unwrap();
        assert_eq!(result, Err("boom".to_string()));
        timeout(GUARD, producer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_drain_pair_error_after_values_closed() {
        let (values_tx, values) = mpsc::channel::<i32>(CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            values_tx.send(7).await.unwrap();
            drop(values_tx);
            tokio::time::sleep(Duration::from_millis(10)).await;
            errors_tx.send("late".to_string()).await.unwrap();
        });
        let result = timeout(GUARD, drain_pair(values, errors)).await.unwrap();
        assert_eq!(result, Err("late".to_string()));
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let token = deadline(Duration::from_millis(10));
        timeout(GUARD, token.cancelled()).await.unwrap();
        assert!(token.is_cancelled());
    }
}
