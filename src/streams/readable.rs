use super::{
    CountQueuingStrategy, QueuingStrategy, StreamResult, error::StreamError, validate_chunk_size,
    validate_high_water_mark,
};
use crate::platform::{BoxedStrategy, MaybeSend, PlatformBoxFuture, SharedPtr};
use futures::{
    channel::oneshot,
    future::{Either, poll_fn, select},
    stream::{self, Stream, StreamExt},
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    marker::PhantomData,
    pin::pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Poll, Waker},
};
use tracing::{debug, trace};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Readable,
    Closed,
    Errored,
}

/// Why a stream was canceled, handed to the source's `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CancelReason {
    #[default]
    Unspecified,
    Message(String),
    /// Reasons of both tee branches, in branch order.
    Composite(Vec<CancelReason>),
}

impl From<&str> for CancelReason {
    fn from(reason: &str) -> Self {
        CancelReason::Message(reason.to_string())
    }
}

impl From<String> for CancelReason {
    fn from(reason: String) -> Self {
        CancelReason::Message(reason)
    }
}

impl From<Option<String>> for CancelReason {
    fn from(reason: Option<String>) -> Self {
        reason.map_or(CancelReason::Unspecified, CancelReason::Message)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Unspecified => write!(f, "unspecified"),
            CancelReason::Message(message) => write!(f, "{message}"),
            CancelReason::Composite(reasons) => {
                write!(f, "[")?;
                for (i, reason) in reasons.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{reason}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Kind of stream a source produces. Only default streams are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Default,
    Bytes,
}

// ----------- Source Trait -----------

/// The underlying source a stream pulls from.
///
/// Every capability is optional: the defaults resolve immediately and do nothing.
pub trait ReadableSource<T: MaybeSend + 'static>: MaybeSend + 'static {
    fn source_type(&self) -> SourceType {
        SourceType::Default
    }

    /// Called once, before any pull. A failure errors the stream.
    fn start(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> + MaybeSend {
        let _ = controller;
        async { Ok(()) }
    }

    /// Called whenever the stream wants more data. Never runs concurrently with
    /// itself. A failure errors the stream.
    fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> + MaybeSend {
        let _ = controller;
        async { Ok(()) }
    }

    /// Called once when the stream is canceled. The result is awaited but a
    /// failure never reaches the canceling caller.
    fn cancel(&mut self, reason: CancelReason) -> impl Future<Output = StreamResult<()>> + MaybeSend {
        let _ = reason;
        async { Ok(()) }
    }
}

// ----------- WakerSet -----------
#[derive(Default, Debug)]
struct WakerSet(Vec<Waker>);

impl WakerSet {
    fn register(&mut self, waker: &Waker) {
        if !self.0.iter().any(|w| w.will_wake(waker)) {
            self.0.push(waker.clone());
        }
    }

    fn wake_all(&mut self) {
        for waker in self.0.drain(..) {
            waker.wake();
        }
    }
}

type ReadRequest<T> = oneshot::Sender<StreamResult<Option<T>>>;
type CancelRequest = (CancelReason, oneshot::Sender<()>);

// ----------- Inner State -----------
struct ReadableStreamInner<T> {
    state: StreamState,
    disturbed: bool,
    stored_error: Option<StreamError>,
    reader: Option<u64>,
    queue: VecDeque<(T, f64)>,
    queue_total_size: f64,
    strategy: BoxedStrategy<T>,
    high_water_mark: f64,
    started: bool,
    close_requested: bool,
    pulling: bool,
    pull_again: bool,
    // Set alongside `pulling` until the driver picks the pull up.
    pull_requested: bool,
    pending_reads: VecDeque<ReadRequest<T>>,
    pending_cancel: Option<CancelRequest>,
    closed_wakers: WakerSet,
    driver_waker: Option<Waker>,
    // Live streams, readers and controllers, the driver's own controller included.
    handles: usize,
}

type SharedInner<T> = SharedPtr<Mutex<ReadableStreamInner<T>>>;

impl<T> ReadableStreamInner<T> {
    fn new(strategy: BoxedStrategy<T>, high_water_mark: f64) -> Self {
        Self {
            state: StreamState::Readable,
            disturbed: false,
            stored_error: None,
            reader: None,
            queue: VecDeque::new(),
            queue_total_size: 0.0,
            strategy,
            high_water_mark,
            started: false,
            close_requested: false,
            pulling: false,
            pull_again: false,
            pull_requested: false,
            pending_reads: VecDeque::new(),
            pending_cancel: None,
            closed_wakers: WakerSet::default(),
            driver_waker: None,
            handles: 0,
        }
    }

    fn get_stored_error(&self) -> StreamError {
        self.stored_error
            .clone()
            .unwrap_or_else(|| StreamError::from("Stream is errored"))
    }

    fn desired_size(&self) -> f64 {
        self.high_water_mark - self.queue_total_size
    }

    fn has_pending_reads(&mut self) -> bool {
        self.pending_reads.retain(|tx| !tx.is_canceled());
        !self.pending_reads.is_empty()
    }

    fn register_driver(&mut self, waker: &Waker) {
        match &self.driver_waker {
            Some(current) if current.will_wake(waker) => {}
            _ => self.driver_waker = Some(waker.clone()),
        }
    }

    fn attach_handle(&mut self) {
        self.handles += 1;
    }

    fn detach_handle(&mut self) {
        self.handles = self.handles.saturating_sub(1);
        if self.handles <= 1 {
            self.wake_driver();
        }
    }

    /// Only the driver's controller is left, so nothing can read or feed the stream.
    fn abandoned(&self) -> bool {
        self.handles <= 1
    }

    fn wake_driver(&self) {
        if let Some(waker) = &self.driver_waker {
            waker.wake_by_ref();
        }
    }

    fn should_call_pull(&mut self) -> bool {
        if self.state != StreamState::Readable || self.close_requested || !self.started {
            return false;
        }
        if self.reader.is_some() && self.has_pending_reads() {
            return true;
        }
        self.desired_size() > 0.0
    }

    fn call_pull_if_needed(&mut self) {
        if !self.should_call_pull() {
            return;
        }
        if self.pulling {
            self.pull_again = true;
            return;
        }
        trace!(desired_size = self.desired_size(), "scheduling pull");
        self.pulling = true;
        self.pull_requested = true;
        self.wake_driver();
    }

    fn pull_settled(&mut self, result: StreamResult<()>) {
        self.pulling = false;
        match result {
            Ok(()) => {
                if self.pull_again {
                    self.pull_again = false;
                    self.call_pull_if_needed();
                }
            }
            Err(err) => {
                if self.state == StreamState::Readable {
                    debug!(error = %err, "pull failed; erroring stream");
                    self.error_stream(err);
                }
            }
        }
    }

    /// Hands `chunk` to the oldest read still being awaited, or gives it back.
    fn fulfill_read_request(&mut self, mut chunk: T) -> Result<(), T> {
        while let Some(tx) = self.pending_reads.pop_front() {
            match tx.send(Ok(Some(chunk))) {
                Err(Ok(Some(returned))) => chunk = returned,
                _ => return Ok(()),
            }
        }
        Err(chunk)
    }

    fn enqueue_chunk(&mut self, chunk: T) -> StreamResult<()> {
        let chunk = match self.fulfill_read_request(chunk) {
            Ok(()) => {
                self.call_pull_if_needed();
                return Ok(());
            }
            Err(chunk) => chunk,
        };

        let size = match self.strategy.size(&chunk).and_then(validate_chunk_size) {
            Ok(size) => size,
            Err(err) => {
                debug!(error = %err, "chunk sizing failed; erroring stream");
                self.error_stream(err.clone());
                return Err(err);
            }
        };

        self.queue.push_back((chunk, size));
        self.queue_total_size += size;
        self.call_pull_if_needed();
        Ok(())
    }

    fn dequeue_chunk(&mut self) -> Option<T> {
        let (chunk, size) = self.queue.pop_front()?;
        self.queue_total_size = if self.queue.is_empty() {
            0.0
        } else {
            (self.queue_total_size - size).max(0.0)
        };

        if self.close_requested && self.queue.is_empty() {
            self.close_stream();
        } else {
            self.call_pull_if_needed();
        }
        Some(chunk)
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.queue_total_size = 0.0;
    }

    fn close_stream(&mut self) {
        debug!("stream closed");
        self.state = StreamState::Closed;
        while let Some(tx) = self.pending_reads.pop_front() {
            let _ = tx.send(Ok(None));
        }
        self.closed_wakers.wake_all();
        self.wake_driver();
    }

    fn error_stream(&mut self, err: StreamError) {
        debug!(error = %err, "stream errored");
        self.clear_queue();
        self.state = StreamState::Errored;
        self.stored_error = Some(err.clone());
        while let Some(tx) = self.pending_reads.pop_front() {
            let _ = tx.send(Err(err.clone()));
        }
        self.closed_wakers.wake_all();
        self.wake_driver();
    }
}

/// Shared cancel path for streams and readers. The lock check happens under the
/// same guard as the transition when `require_unlocked` is set.
async fn cancel_stream<T>(
    inner: &SharedInner<T>,
    reason: CancelReason,
    require_unlocked: bool,
) -> StreamResult<()> {
    let completion = {
        let mut guard = inner.lock();
        if require_unlocked && guard.reader.is_some() {
            return Err(StreamError::usage(
                "Cannot cancel a stream that already has a reader",
            ));
        }
        guard.disturbed = true;
        match guard.state {
            StreamState::Closed => return Ok(()),
            StreamState::Errored => return Err(guard.get_stored_error()),
            StreamState::Readable => {}
        }

        debug!(%reason, "canceling stream");
        guard.close_stream();
        guard.clear_queue();

        let (tx, rx) = oneshot::channel();
        guard.pending_cancel = Some((reason, tx));
        guard.wake_driver();
        rx
    };

    // Resolves once the source's cancel settled, whatever its outcome.
    let _ = completion.await;
    Ok(())
}

// ----------- Controller -----------

/// Handle through which a source feeds its stream.
pub struct ReadableStreamDefaultController<T> {
    inner: SharedInner<T>,
}

impl<T> ReadableStreamDefaultController<T> {
    fn attach(inner: &SharedInner<T>) -> Self {
        inner.lock().attach_handle();
        Self {
            inner: SharedPtr::clone(inner),
        }
    }
}

impl<T> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> Self {
        Self::attach(&self.inner)
    }
}

impl<T> Drop for ReadableStreamDefaultController<T> {
    fn drop(&mut self) {
        self.inner.lock().detach_handle();
    }
}

impl<T: MaybeSend + 'static> ReadableStreamDefaultController<T> {
    /// `None` once errored, `0` once closed, otherwise high-water mark minus
    /// the queued size. Negative when the queue is over-full.
    pub fn desired_size(&self) -> Option<f64> {
        let inner = self.inner.lock();
        match inner.state {
            StreamState::Errored => None,
            StreamState::Closed => Some(0.0),
            StreamState::Readable => Some(inner.desired_size()),
        }
    }

    pub fn close(&self) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.close_requested {
            return Err(StreamError::usage("The stream has already been closed"));
        }
        if inner.state != StreamState::Readable {
            return Err(StreamError::usage(
                "The stream is not in the readable state and cannot be closed",
            ));
        }

        inner.close_requested = true;
        if inner.queue.is_empty() {
            inner.close_stream();
        } else {
            debug!(queued = inner.queue.len(), "close requested; draining queue first");
        }
        Ok(())
    }

    pub fn enqueue(&self, chunk: T) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.close_requested {
            return Err(StreamError::usage(
                "Cannot enqueue a chunk into a stream that is closed or closing",
            ));
        }
        if inner.state != StreamState::Readable {
            return Err(StreamError::usage(
                "Cannot enqueue a chunk into a stream that is not readable",
            ));
        }
        inner.enqueue_chunk(chunk)
    }

    pub fn error(&self, error: StreamError) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Readable {
            return Err(StreamError::usage(
                "The stream is not in the readable state and cannot be errored",
            ));
        }
        inner.error_stream(error);
        Ok(())
    }
}

// ----------- Main ReadableStream -----------
pub struct ReadableStream<T: MaybeSend + 'static, Source> {
    inner: SharedInner<T>,
    controller: ReadableStreamDefaultController<T>,
    _phantom: PhantomData<fn() -> Source>,
}

impl<T: MaybeSend + 'static, Source> ReadableStream<T, Source> {
    pub(crate) fn controller(&self) -> ReadableStreamDefaultController<T> {
        self.controller.clone()
    }

    pub fn locked(&self) -> bool {
        self.inner.lock().reader.is_some()
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// Whether the stream was ever read from or canceled.
    pub fn is_disturbed(&self) -> bool {
        self.inner.lock().disturbed
    }

    pub async fn cancel(&self, reason: impl Into<CancelReason>) -> StreamResult<()> {
        cancel_stream(&self.inner, reason.into(), true).await
    }

    pub fn get_reader(&self) -> StreamResult<ReadableStreamDefaultReader<T, Source>> {
        self.acquire_reader()
    }

    pub(crate) fn acquire_reader<S>(&self) -> StreamResult<ReadableStreamDefaultReader<T, S>> {
        let mut inner = self.inner.lock();
        if inner.reader.is_some() {
            return Err(StreamError::usage("ReadableStream is locked to a reader"));
        }
        let id = NEXT_READER_ID.fetch_add(1, Ordering::Relaxed);
        inner.reader = Some(id);
        inner.attach_handle();
        trace!(reader_id = id, "reader acquired");

        Ok(ReadableStreamDefaultReader {
            inner: SharedPtr::clone(&self.inner),
            id,
            _phantom: PhantomData,
        })
    }
}

// ----------- Generic Constructor -----------
impl<T: MaybeSend + 'static, Source: ReadableSource<T>> ReadableStream<T, Source> {
    pub(crate) fn new_inner(
        source: Source,
        strategy: BoxedStrategy<T>,
    ) -> StreamResult<(Self, PlatformBoxFuture<()>)> {
        if source.source_type() == SourceType::Bytes {
            return Err(StreamError::range("byte streams are not implemented"));
        }
        let high_water_mark = validate_high_water_mark(strategy.high_water_mark())?;

        let inner = SharedPtr::new(Mutex::new(ReadableStreamInner::new(
            strategy,
            high_water_mark,
        )));
        inner.lock().attach_handle();
        let controller = ReadableStreamDefaultController::attach(&inner);

        let task_fut =
            readable_stream_task(SharedPtr::clone(&inner), source, controller.clone());

        let stream = Self {
            inner,
            controller,
            _phantom: PhantomData,
        };

        Ok((stream, Box::pin(task_fut)))
    }
}

// ----------- Example Source Implementations  -----------
pub struct IteratorSource<I> {
    iter: I,
}

impl<I, T: MaybeSend + 'static> ReadableSource<T> for IteratorSource<I>
where
    I: Iterator<Item = T> + MaybeSend + 'static,
{
    async fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        if let Some(item) = self.iter.next() {
            controller.enqueue(item)?;
        } else {
            controller.close()?;
        }
        Ok(())
    }
}

pub struct AsyncStreamSource<S> {
    stream: S,
}

impl<S, T: MaybeSend + 'static> ReadableSource<T> for AsyncStreamSource<S>
where
    S: Stream<Item = T> + Unpin + MaybeSend + 'static,
{
    async fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        if let Some(item) = self.stream.next().await {
            controller.enqueue(item)?;
        } else {
            controller.close()?;
        }
        Ok(())
    }
}

// ----------- Default Reader -----------

/// Exclusive consumer of a stream. Dropping the reader releases the lock.
pub struct ReadableStreamDefaultReader<T, Source> {
    inner: SharedInner<T>,
    id: u64,
    _phantom: PhantomData<fn() -> Source>,
}

impl<T: MaybeSend + 'static, Source> ReadableStreamDefaultReader<T, Source> {
    fn released_error(action: &str) -> StreamError {
        StreamError::usage(format!(
            "Cannot {action} a reader that has been released from its stream"
        ))
    }

    fn is_attached(inner: &ReadableStreamInner<T>, id: u64) -> bool {
        inner.reader == Some(id)
    }

    /// Resolves when the stream closes, fails with the stored error when it
    /// errors, and fails with a usage error once this reader is released.
    pub async fn closed(&self) -> StreamResult<()> {
        poll_fn(|cx| {
            let mut inner = self.inner.lock();
            if !Self::is_attached(&inner, self.id) {
                return Poll::Ready(Err(Self::released_error("observe closure of")));
            }
            match inner.state {
                StreamState::Closed => Poll::Ready(Ok(())),
                StreamState::Errored => Poll::Ready(Err(inner.get_stored_error())),
                StreamState::Readable => {
                    inner.closed_wakers.register(cx.waker());
                    Poll::Pending
                }
            }
        })
        .await
    }

    pub async fn cancel(&self, reason: impl Into<CancelReason>) -> StreamResult<()> {
        if !Self::is_attached(&self.inner.lock(), self.id) {
            return Err(Self::released_error("cancel"));
        }
        cancel_stream(&self.inner, reason.into(), false).await
    }

    /// `Some(chunk)` for each value, `None` once the stream is done.
    pub async fn read(&self) -> StreamResult<Option<T>> {
        let pending = {
            let mut inner = self.inner.lock();
            if !Self::is_attached(&inner, self.id) {
                return Err(Self::released_error("read from"));
            }

            inner.disturbed = true;
            match inner.state {
                StreamState::Closed => return Ok(None),
                StreamState::Errored => return Err(inner.get_stored_error()),
                StreamState::Readable => {}
            }

            if let Some(chunk) = inner.dequeue_chunk() {
                return Ok(Some(chunk));
            }

            let (tx, rx) = oneshot::channel();
            inner.pending_reads.push_back(tx);
            inner.call_pull_if_needed();
            rx
        };

        pending.await.unwrap_or(Err(StreamError::TaskDropped))
    }

    /// Detaches from the stream so another reader can be acquired.
    ///
    /// Fails while reads are still outstanding. Releasing twice is a no-op.
    pub fn release_lock(&self) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if !Self::is_attached(&inner, self.id) {
            return Ok(());
        }
        if inner.has_pending_reads() {
            return Err(StreamError::usage(
                "Tried to release a reader lock when that reader has pending read() calls un-settled",
            ));
        }

        inner.reader = None;
        inner.closed_wakers.wake_all();
        debug!(reader_id = self.id, "reader released");
        Ok(())
    }

    /// Adapts the reader into a `Stream` that ends after `done` or the first error.
    pub fn into_stream(self) -> impl Stream<Item = StreamResult<T>> {
        stream::unfold(Some(self), |reader| async move {
            let reader = reader?;
            match reader.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl<T, Source> Drop for ReadableStreamDefaultReader<T, Source> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.reader == Some(self.id) {
            inner.reader = None;
            inner.closed_wakers.wake_all();
            trace!(reader_id = self.id, "reader dropped");
        }
        inner.detach_handle();
    }
}

impl<T: MaybeSend + 'static, Source> Drop for ReadableStream<T, Source> {
    fn drop(&mut self) {
        self.inner.lock().detach_handle();
    }
}

// ----------- Stream Task Implementation -----------
enum DriverAction {
    Pull,
    Cancel(CancelRequest),
    Exit,
}

/// Waits for the next thing the driver has to do. Cancellation wins over pulls.
fn next_driver_action<T>(inner: &SharedInner<T>) -> impl Future<Output = DriverAction> + '_ {
    poll_fn(move |cx| {
        let mut guard = inner.lock();
        if let Some(request) = guard.pending_cancel.take() {
            return Poll::Ready(DriverAction::Cancel(request));
        }

        if guard.pull_requested {
            guard.pull_requested = false;
            if guard.state == StreamState::Readable {
                return Poll::Ready(DriverAction::Pull);
            }
            guard.pulling = false;
            guard.pull_again = false;
        }

        if guard.state != StreamState::Readable {
            return Poll::Ready(DriverAction::Exit);
        }
        if guard.abandoned() {
            debug!("all stream handles dropped; driver exiting");
            return Poll::Ready(DriverAction::Exit);
        }
        guard.register_driver(cx.waker());
        Poll::Pending
    })
}

fn cancel_requested<T>(inner: &SharedInner<T>) -> impl Future<Output = ()> + '_ {
    poll_fn(move |cx| {
        let mut guard = inner.lock();
        if guard.pending_cancel.is_some() {
            return Poll::Ready(());
        }
        guard.register_driver(cx.waker());
        Poll::Pending
    })
}

/// Drives the source: runs `start`, then every scheduled `pull` and the final
/// `cancel`, one at a time. A cancel request drops an in-flight start or pull.
/// Exits once the stream is terminal and idle, or once every handle is gone.
async fn readable_stream_task<T, Source>(
    inner: SharedInner<T>,
    mut source: Source,
    mut controller: ReadableStreamDefaultController<T>,
) where
    T: MaybeSend + 'static,
    Source: ReadableSource<T>,
{
    let start_result = {
        let start = pin!(source.start(&mut controller));
        let canceled = pin!(cancel_requested(&inner));
        match select(start, canceled).await {
            Either::Left((result, _)) => Some(result),
            Either::Right(((), _)) => None,
        }
    };
    {
        let mut guard = inner.lock();
        match start_result {
            None => trace!("start dropped for cancel"),
            Some(Ok(())) => {
                trace!("start completed");
                guard.started = true;
                guard.call_pull_if_needed();
            }
            Some(Err(err)) => {
                if guard.state == StreamState::Readable {
                    debug!(error = %err, "start failed; erroring stream");
                    guard.error_stream(err);
                }
            }
        }
    }

    loop {
        match next_driver_action(&inner).await {
            DriverAction::Pull => {
                let outcome = {
                    let pull = pin!(source.pull(&mut controller));
                    let canceled = pin!(cancel_requested(&inner));
                    match select(pull, canceled).await {
                        Either::Left((result, _)) => Some(result),
                        Either::Right(((), _)) => None,
                    }
                };

                let mut guard = inner.lock();
                match outcome {
                    Some(result) => guard.pull_settled(result),
                    None => {
                        trace!("pull dropped for cancel");
                        guard.pulling = false;
                        guard.pull_again = false;
                    }
                }
            }
            DriverAction::Cancel((reason, completion)) => {
                if let Err(err) = source.cancel(reason).await {
                    debug!(error = %err, "source cancel failed; ignoring");
                }
                let _ = completion.send(());
            }
            DriverAction::Exit => {
                trace!("stream settled; driver exiting");
                break;
            }
        }
    }
}

// ----------- Builder Pattern Implementation -----------
pub struct ReadableStreamBuilder<T, Source>
where
    T: MaybeSend + 'static,
{
    source: Source,
    strategy: BoxedStrategy<T>,
}

impl<T, Source> ReadableStreamBuilder<T, Source>
where
    T: MaybeSend + 'static,
    Source: ReadableSource<T>,
{
    fn new(source: Source) -> Self {
        Self {
            source,
            strategy: Box::new(CountQueuingStrategy::default()),
        }
    }

    pub fn strategy<S: QueuingStrategy<T> + MaybeSend + 'static>(mut self, s: S) -> Self {
        self.strategy = Box::new(s);
        self
    }

    /// Return stream + driver future without spawning
    pub fn prepare(self) -> StreamResult<(ReadableStream<T, Source>, PlatformBoxFuture<()>)> {
        ReadableStream::new_inner(self.source, self.strategy)
    }

    /// Build the stream and hand its driver to `spawn_fn`
    pub fn spawn<F, R>(self, spawn_fn: F) -> StreamResult<ReadableStream<T, Source>>
    where
        F: FnOnce(PlatformBoxFuture<()>) -> R,
    {
        let (stream, fut) = self.prepare()?;
        spawn_fn(fut);
        Ok(stream)
    }
}

impl<T: MaybeSend + 'static> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
    pub fn from_vec(vec: Vec<T>) -> Self {
        Self::from_iterator(vec.into_iter())
    }
}

impl<T: MaybeSend + 'static, I> ReadableStreamBuilder<T, IteratorSource<I>>
where
    I: Iterator<Item = T> + MaybeSend + 'static,
{
    pub fn from_iterator(iter: I) -> Self {
        Self::new(IteratorSource { iter })
    }
}

impl<T: MaybeSend + 'static, S> ReadableStreamBuilder<T, AsyncStreamSource<S>>
where
    S: Stream<Item = T> + Unpin + MaybeSend + 'static,
{
    pub fn from_stream(stream: S) -> Self {
        Self::new(AsyncStreamSource { stream })
    }
}

impl<T: MaybeSend + 'static, Source> ReadableStream<T, Source>
where
    Source: ReadableSource<T>,
{
    /// Returns a builder for this readable stream
    pub fn builder(source: Source) -> ReadableStreamBuilder<T, Source> {
        ReadableStreamBuilder::new(source)
    }
}

// Shortcut methods on ReadableStream for common cases
impl<T: MaybeSend + 'static> ReadableStream<T, IteratorSource<std::vec::IntoIter<T>>> {
    pub fn from_vec(vec: Vec<T>) -> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
        ReadableStreamBuilder::from_vec(vec)
    }
}

impl<T: MaybeSend + 'static, I> ReadableStream<T, IteratorSource<I>>
where
    I: Iterator<Item = T> + MaybeSend + 'static,
{
    pub fn from_iterator(iter: I) -> ReadableStreamBuilder<T, IteratorSource<I>> {
        ReadableStreamBuilder::from_iterator(iter)
    }
}

impl<T: MaybeSend + 'static, S> ReadableStream<T, AsyncStreamSource<S>>
where
    S: Stream<Item = T> + Unpin + MaybeSend + 'static,
{
    pub fn from_stream(stream: S) -> ReadableStreamBuilder<T, AsyncStreamSource<S>> {
        ReadableStreamBuilder::from_stream(stream)
    }
}

#[cfg(test)]
pub(crate) async fn local_test<F, Fut>(f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()> + 'static,
{
    let local = tokio::task::LocalSet::new();
    local.run_until(f()).await;
}
