use super::{
    CountQueuingStrategy, QueuingStrategy, StreamResult,
    error::StreamError,
    readable::{
        CancelReason, ReadableSource, ReadableStream, ReadableStreamDefaultController,
        ReadableStreamDefaultReader,
    },
};
use crate::platform::{BoxedStrategy, MaybeSend, PlatformBoxFuture, SharedPtr};
use futures::{
    channel::oneshot,
    future::{FutureExt, Shared},
};
use parking_lot::Mutex;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeeBranch {
    Branch1,
    Branch2,
}

struct TeeState<T> {
    closed_or_errored: bool,
    canceled1: bool,
    canceled2: bool,
    reason1: CancelReason,
    reason2: CancelReason,
    branch1: Option<ReadableStreamDefaultController<T>>,
    branch2: Option<ReadableStreamDefaultController<T>>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl<T: MaybeSend + Clone + 'static> TeeState<T> {
    fn live_branches(&self) -> Vec<(TeeBranch, &ReadableStreamDefaultController<T>)> {
        let mut live = Vec::with_capacity(2);
        if !self.canceled1 {
            if let Some(c) = &self.branch1 {
                live.push((TeeBranch::Branch1, c));
            }
        }
        if !self.canceled2 {
            if let Some(c) = &self.branch2 {
                live.push((TeeBranch::Branch2, c));
            }
        }
        live
    }

    fn distribute(&self, chunk: T) {
        let live = self.live_branches();
        let Some(((last_branch, last), rest)) = live.split_last() else {
            return;
        };
        for (branch, controller) in rest {
            if let Err(err) = controller.enqueue(chunk.clone()) {
                trace!(?branch, error = %err, "branch rejected chunk");
            }
        }
        if let Err(err) = last.enqueue(chunk) {
            trace!(branch = ?last_branch, error = %err, "branch rejected chunk");
        }
    }

    fn close_branches(&mut self) {
        self.closed_or_errored = true;
        for (branch, controller) in self.live_branches() {
            if let Err(err) = controller.close() {
                trace!(?branch, error = %err, "branch already closed");
            }
        }
        self.resolve_cancel();
    }

    fn error_branches(&mut self, err: &StreamError) {
        self.closed_or_errored = true;
        for controller in [&self.branch1, &self.branch2].into_iter().flatten() {
            let _ = controller.error(err.clone());
        }
        self.resolve_cancel();
    }

    fn resolve_cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct TeeShared<T> {
    reader: ReadableStreamDefaultReader<T, ()>,
    // Held across an upstream read so chunks are distributed in read order.
    read_turn: futures::lock::Mutex<()>,
    state: Mutex<TeeState<T>>,
    cancel_done: Shared<oneshot::Receiver<()>>,
}

/// Source backing one branch of a tee. Both branches share one upstream reader.
pub struct TeeSource<T> {
    shared: SharedPtr<TeeShared<T>>,
    branch: TeeBranch,
}

impl<T: MaybeSend + Clone + 'static> ReadableSource<T> for TeeSource<T> {
    async fn pull(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        let _turn = self.shared.read_turn.lock().await;
        let finished = self.shared.state.lock().closed_or_errored;
        if finished {
            return Ok(());
        }

        let result = self.shared.reader.read().await;

        let mut state = self.shared.state.lock();
        if state.closed_or_errored {
            return Ok(());
        }
        match result {
            Ok(Some(chunk)) => state.distribute(chunk),
            Ok(None) => {
                debug!("upstream done; closing tee branches");
                state.close_branches();
            }
            Err(err) => {
                debug!(error = %err, "upstream errored; erroring tee branches");
                state.error_branches(&err);
            }
        }
        Ok(())
    }

    async fn cancel(&mut self, reason: CancelReason) -> StreamResult<()> {
        let composite = {
            let mut state = self.shared.state.lock();
            match self.branch {
                TeeBranch::Branch1 => {
                    state.canceled1 = true;
                    state.reason1 = reason;
                }
                TeeBranch::Branch2 => {
                    state.canceled2 = true;
                    state.reason2 = reason;
                }
            }
            debug!(branch = ?self.branch, "tee branch canceled");

            (state.canceled1 && state.canceled2).then(|| {
                CancelReason::Composite(vec![state.reason1.clone(), state.reason2.clone()])
            })
        };

        if let Some(reason) = composite {
            if let Err(err) = self.shared.reader.cancel(reason).await {
                debug!(error = %err, "upstream cancel failed");
            }
            self.shared.state.lock().resolve_cancel();
        }

        let _ = self.shared.cancel_done.clone().await;
        Ok(())
    }
}

/// Branch streams plus the coordinator and both branch drivers, unspawned.
pub type PreparedTee<T> = (
    ReadableStream<T, TeeSource<T>>,
    ReadableStream<T, TeeSource<T>>,
    PlatformBoxFuture<()>,
    PlatformBoxFuture<()>,
    PlatformBoxFuture<()>,
);

pub struct TeeBuilder<T, Source>
where
    T: MaybeSend + Clone + 'static,
{
    stream: ReadableStream<T, Source>,
    branch1_strategy: BoxedStrategy<T>,
    branch2_strategy: BoxedStrategy<T>,
}

impl<T, Source> TeeBuilder<T, Source>
where
    T: MaybeSend + Clone + 'static,
{
    fn new(stream: ReadableStream<T, Source>) -> Self {
        Self {
            stream,
            branch1_strategy: Box::new(CountQueuingStrategy::default()),
            branch2_strategy: Box::new(CountQueuingStrategy::default()),
        }
    }

    /// Set queuing strategy for the first branch
    pub fn branch1_strategy<S: QueuingStrategy<T> + MaybeSend + 'static>(
        mut self,
        strategy: S,
    ) -> Self {
        self.branch1_strategy = Box::new(strategy);
        self
    }

    /// Set queuing strategy for the second branch
    pub fn branch2_strategy<S: QueuingStrategy<T> + MaybeSend + 'static>(
        mut self,
        strategy: S,
    ) -> Self {
        self.branch2_strategy = Box::new(strategy);
        self
    }

    /// Set the same queuing strategy for both branches
    pub fn strategy<S: QueuingStrategy<T> + MaybeSend + Clone + 'static>(
        mut self,
        strategy: S,
    ) -> Self {
        self.branch1_strategy = Box::new(strategy.clone());
        self.branch2_strategy = Box::new(strategy);
        self
    }

    /// Prepare without spawning: returns streams + futures for coordinator and branches.
    ///
    /// Fails with a usage error if the source stream is locked.
    pub fn prepare(self) -> StreamResult<PreparedTee<T>> {
        let reader = self.stream.acquire_reader::<()>()?;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let shared = SharedPtr::new(TeeShared {
            reader,
            read_turn: futures::lock::Mutex::new(()),
            state: Mutex::new(TeeState {
                closed_or_errored: false,
                canceled1: false,
                canceled2: false,
                reason1: CancelReason::Unspecified,
                reason2: CancelReason::Unspecified,
                branch1: None,
                branch2: None,
                cancel_tx: Some(cancel_tx),
            }),
            cancel_done: cancel_rx.shared(),
        });

        let (stream1, fut1) = ReadableStream::new_inner(
            TeeSource {
                shared: SharedPtr::clone(&shared),
                branch: TeeBranch::Branch1,
            },
            self.branch1_strategy,
        )?;
        let (stream2, fut2) = ReadableStream::new_inner(
            TeeSource {
                shared: SharedPtr::clone(&shared),
                branch: TeeBranch::Branch2,
            },
            self.branch2_strategy,
        )?;

        {
            let mut state = shared.state.lock();
            state.branch1 = Some(stream1.controller());
            state.branch2 = Some(stream2.controller());
        }

        let coordinator = async move {
            let result = shared.reader.closed().await;
            let mut state = shared.state.lock();
            if let Err(err) = result {
                if !state.closed_or_errored {
                    debug!(error = %err, "upstream errored; erroring tee branches");
                    state.error_branches(&err);
                }
            }
            state.resolve_cancel();
        };

        Ok((stream1, stream2, Box::pin(coordinator), fut1, fut2))
    }

    /// Spawn the coordinator and both branches in a single task
    pub fn spawn<F, R>(
        self,
        spawn_fn: F,
    ) -> StreamResult<(
        ReadableStream<T, TeeSource<T>>,
        ReadableStream<T, TeeSource<T>>,
    )>
    where
        F: FnOnce(PlatformBoxFuture<()>) -> R,
    {
        let (stream1, stream2, coord_fut, fut1, fut2) = self.prepare()?;
        spawn_fn(Box::pin(async move {
            futures::join!(coord_fut, fut1, fut2);
        }));
        Ok((stream1, stream2))
    }
}

impl<T, Source> ReadableStream<T, Source>
where
    T: MaybeSend + Clone + 'static,
{
    /// Split into two branches that each see every chunk.
    ///
    /// Chunks are cloned into each branch; wrap them in `Arc` to share one value.
    pub fn tee(self) -> TeeBuilder<T, Source> {
        TeeBuilder::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{StreamState, readable::local_test};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::task::{spawn_local, yield_now};

    async fn settle() {
        for _ in 0..16 {
            yield_now().await;
        }
    }

    struct CountingCancel {
        cancels: Arc<Mutex<Vec<CancelReason>>>,
        pulls: Arc<AtomicUsize>,
    }

    impl ReadableSource<i32> for CountingCancel {
        async fn pull(
            &mut self,
            controller: &mut ReadableStreamDefaultController<i32>,
        ) -> StreamResult<()> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst) as i32;
            controller.enqueue(n)
        }

        async fn cancel(&mut self, reason: CancelReason) -> StreamResult<()> {
            self.cancels.lock().push(reason);
            Ok(())
        }
    }

    #[tokio::test]
    async fn splits_stream_into_two_identical_branches() {
        local_test(|| async {
            let data = vec![1, 2, 3, 4, 5];
            let (left, right) = ReadableStream::from_vec(data.clone())
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .spawn(spawn_local)
                .unwrap();

            let left = left.get_reader().unwrap();
            let right = right.get_reader().unwrap();

            for expected in &data {
                assert_eq!(left.read().await.unwrap(), Some(*expected));
                assert_eq!(right.read().await.unwrap(), Some(*expected));
            }
            assert_eq!(left.read().await.unwrap(), None);
            assert_eq!(right.read().await.unwrap(), None);
        })
        .await;
    }

    #[tokio::test]
    async fn branches_consume_at_different_speeds() {
        local_test(|| async {
            let (fast, slow) = ReadableStream::from_vec(vec!["a", "b", "c"])
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .spawn(spawn_local)
                .unwrap();

            let fast = fast.get_reader().unwrap();
            let mut seen = Vec::new();
            while let Some(v) = fast.read().await.unwrap() {
                seen.push(v);
            }
            assert_eq!(seen, vec!["a", "b", "c"]);

            let slow = slow.get_reader().unwrap();
            let mut seen = Vec::new();
            while let Some(v) = slow.read().await.unwrap() {
                seen.push(v);
            }
            assert_eq!(seen, vec!["a", "b", "c"]);
        })
        .await;
    }

    #[tokio::test]
    async fn canceling_one_branch_keeps_the_other_flowing() {
        local_test(|| async {
            let cancels = Arc::new(Mutex::new(Vec::new()));
            let (left, right) = ReadableStream::builder(CountingCancel {
                cancels: Arc::clone(&cancels),
                pulls: Arc::new(AtomicUsize::new(0)),
            })
            .spawn(spawn_local)
            .unwrap()
            .tee()
            .spawn(spawn_local)
            .unwrap();

            let left = Arc::new(left);
            let left_cancel = spawn_local({
                let left = Arc::clone(&left);
                async move { left.cancel("left done").await }
            });
            settle().await;

            assert_eq!(left.state(), StreamState::Closed);
            assert!(!left_cancel.is_finished());
            assert!(cancels.lock().is_empty());

            let right_reader = right.get_reader().unwrap();
            let a = right_reader.read().await.unwrap().unwrap();
            let b = right_reader.read().await.unwrap().unwrap();
            assert!(b > a);
            assert!(cancels.lock().is_empty());

            right_reader.cancel("right done").await.unwrap();
            left_cancel.await.unwrap().unwrap();

            assert_eq!(
                *cancels.lock(),
                vec![CancelReason::Composite(vec![
                    "left done".into(),
                    "right done".into()
                ])]
            );
        })
        .await;
    }

    #[tokio::test]
    async fn handles_empty_source() {
        local_test(|| async {
            let (left, right) = ReadableStream::from_vec(Vec::<i32>::new())
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .spawn(spawn_local)
                .unwrap();

            assert_eq!(left.get_reader().unwrap().read().await.unwrap(), None);
            assert_eq!(right.get_reader().unwrap().read().await.unwrap(), None);
        })
        .await;
    }

    #[tokio::test]
    async fn propagates_upstream_errors_to_both_branches() {
        local_test(|| async {
            struct Idle;
            impl ReadableSource<i32> for Idle {}

            let upstream = ReadableStream::builder(Idle).spawn(spawn_local).unwrap();
            let upstream_controller = upstream.controller();
            let (left, right) = upstream.tee().spawn(spawn_local).unwrap();
            settle().await;

            upstream_controller.error("upstream broke".into()).unwrap();
            settle().await;

            assert_eq!(left.state(), StreamState::Errored);
            assert_eq!(right.state(), StreamState::Errored);
            let err = left.get_reader().unwrap().read().await.unwrap_err();
            assert_eq!(err.to_string(), "upstream broke");
            let err = right.get_reader().unwrap().closed().await.unwrap_err();
            assert_eq!(err.to_string(), "upstream broke");
        })
        .await;
    }

    #[tokio::test]
    async fn tee_of_locked_stream_fails() {
        local_test(|| async {
            let stream = ReadableStream::from_vec(vec![1]).spawn(spawn_local).unwrap();
            let _reader = stream.get_reader().unwrap();
            let err = stream.tee().prepare().err().unwrap();
            assert!(err.is_usage_error());
        })
        .await;
    }

    #[tokio::test]
    async fn shares_arc_chunks_between_branches() {
        local_test(|| async {
            let value = Arc::new(String::from("shared"));
            let (left, right) = ReadableStream::from_vec(vec![Arc::clone(&value)])
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .spawn(spawn_local)
                .unwrap();

            let l = left.get_reader().unwrap().read().await.unwrap().unwrap();
            let r = right.get_reader().unwrap().read().await.unwrap().unwrap();
            assert!(Arc::ptr_eq(&l, &r));
            assert!(Arc::ptr_eq(&l, &value));
        })
        .await;
    }

    #[tokio::test]
    async fn supports_nested_tee_operations() {
        local_test(|| async {
            let (left, right) = ReadableStream::from_vec(vec![1, 2, 3])
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .spawn(spawn_local)
                .unwrap();
            let (left_a, left_b) = left.tee().spawn(spawn_local).unwrap();

            for branch in [&left_a, &left_b] {
                let reader = branch.get_reader().unwrap();
                let mut seen = Vec::new();
                while let Some(v) = reader.read().await.unwrap() {
                    seen.push(v);
                }
                assert_eq!(seen, vec![1, 2, 3]);
            }

            let reader = right.get_reader().unwrap();
            let mut seen = Vec::new();
            while let Some(v) = reader.read().await.unwrap() {
                seen.push(v);
            }
            assert_eq!(seen, vec![1, 2, 3]);
        })
        .await;
    }

    #[tokio::test]
    async fn branch_strategies_are_independent() {
        local_test(|| async {
            let (eager, lazy) = ReadableStream::from_vec((0..10).collect::<Vec<i32>>())
                .spawn(spawn_local)
                .unwrap()
                .tee()
                .branch1_strategy(CountQueuingStrategy::new(4.0))
                .branch2_strategy(CountQueuingStrategy::new(0.0))
                .spawn(spawn_local)
                .unwrap();
            settle().await;

            let eager_reader = eager.get_reader().unwrap();
            assert_eq!(eager_reader.read().await.unwrap(), Some(0));
            assert_eq!(lazy.get_reader().unwrap().read().await.unwrap(), Some(0));
        })
        .await;
    }
}
