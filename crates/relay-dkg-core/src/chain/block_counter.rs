//! Block counter driven by a local timer

use super::{async_trait, BlockCounter};
use crate::types::BlockHeight;
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::trace;

/// Produces one block every `block_time`, starting at height 0.
///
/// Must be created inside a tokio runtime. The ticker stops when the counter
/// is dropped.
pub struct LocalBlockCounter {
    height: watch::Receiver<BlockHeight>,
    ticker: JoinHandle<()>,
}

impl LocalBlockCounter {
    /// Start producing blocks
    pub fn start(block_time: Duration) -> Self {
        let (sender, height) = watch::channel(0);

        let ticker = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + block_time, block_time);
            loop {
                interval.tick().await;
                let mut produced = 0;
                sender.send_modify(|height| {
                    *height += 1;
                    produced = *height;
                });
                trace!(height = produced, "Block produced");
                if sender.is_closed() {
                    break;
                }
            }
        });

        Self { height, ticker }
    }
}

impl Drop for LocalBlockCounter {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

#[async_trait]
impl BlockCounter for LocalBlockCounter {
    fn current_block(&self) -> Result<BlockHeight> {
        Ok(*self.height.borrow())
    }

    fn block_waiter(&self, offset: u64) -> Result<oneshot::Receiver<BlockHeight>> {
        let target = self.current_block()? + offset;
        self.block_height_waiter(target)
    }

    fn block_height_waiter(&self, height: BlockHeight) -> Result<oneshot::Receiver<BlockHeight>> {
        if self.ticker.is_finished() {
            return Err(Error::Chain("block counter stopped".into()));
        }

        let (mut notify, waiter) = oneshot::channel();
        let mut watcher = self.height.clone();

        tokio::spawn(async move {
            let reached = tokio::select! {
                _ = notify.closed() => None,
                current = watcher.wait_for(|current| *current >= height) => {
                    current.ok().map(|current| *current)
                }
            };
            if let Some(current) = reached {
                let _ = notify.send(current);
            }
        });

        Ok(waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_TIME: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_blocks_are_produced() {
        let counter = LocalBlockCounter::start(BLOCK_TIME);
        assert_eq!(counter.current_block().unwrap(), 0);

        let height = counter.wait_for_block_height(3).await.unwrap();
        assert_eq!(height, 3);
        assert_eq!(counter.current_block().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waiter_counts_from_current_block() {
        let counter = LocalBlockCounter::start(BLOCK_TIME);
        counter.wait_for_block_height(2).await.unwrap();

        let height = counter.block_waiter(4).unwrap().await.unwrap();
        assert_eq!(height, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_height_fires_immediately() {
        let counter = LocalBlockCounter::start(BLOCK_TIME);
        counter.wait_for_block_height(5).await.unwrap();

        let height = counter.block_height_waiter(1).unwrap().await.unwrap();
        assert_eq!(height, 5);

        let height = counter.block_waiter(0).unwrap().await.unwrap();
        assert_eq!(height, 5);
    }
}
