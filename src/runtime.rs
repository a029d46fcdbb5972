use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

// Event bits shared by all tasks
pub const EVT_EXIT: u32 = 1 << 0;
pub const EVT_POS: u32 = 1 << 1;
pub const EVT_TIME: u32 = 1 << 2;
pub const EVT_PRN: u32 = 1 << 3;

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

// Single-threaded cooperative scheduler. Tasks run until they yield; there
// is no preemption, so shared state is consistent between yield points.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    ready: RefCell<VecDeque<TaskFuture>>,
    spawned: RefCell<Vec<TaskFuture>>,
    signals: Cell<u32>,
    shutdown: Cell<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.inner.spawned.borrow_mut().push(Box::pin(fut));
    }

    pub fn raise(&self, sigs: u32) {
        self.inner.signals.set(self.inner.signals.get() | sigs);
    }

    // Returns and clears the pending signals selected by `mask`.
    pub fn catch(&self, mask: u32) -> u32 {
        let pending = self.inner.signals.get();
        let hit = pending & mask;
        self.inner.signals.set(pending & !hit);
        hit
    }

    pub fn request_shutdown(&self) {
        self.inner.shutdown.set(true);
    }

    pub fn shutting_down(&self) -> bool {
        self.inner.shutdown.get()
    }

    // Round-robin until every task finishes or shutdown is requested.
    pub fn run(&self) {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        loop {
            let spawned: Vec<_> = self.inner.spawned.borrow_mut().drain(..).collect();
            self.inner.ready.borrow_mut().extend(spawned);
            if self.inner.shutdown.get() {
                break;
            }
            let Some(mut task) = self.inner.ready.borrow_mut().pop_front() else {
                break;
            };
            if task.as_mut().poll(&mut cx).is_pending() {
                self.inner.ready.borrow_mut().push_back(task);
            }
        }
    }
}

// Suspend the current task; the scheduler resumes it after every other
// ready task has had a turn.
pub fn yield_now() -> YieldNow {
    YieldNow { polled: false }
}

pub struct YieldNow {
    polled: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            Poll::Pending
        }
    }
}

// Yield until at least `ms` milliseconds of wall clock have elapsed. The
// measured wait is never shorter than requested.
pub async fn timer_wait(ms: u64) {
    let finish = Instant::now() + Duration::from_millis(ms);
    loop {
        yield_now().await;
        if Instant::now() >= finish {
            break;
        }
    }
}

// Drive a single future to completion on the current thread.
pub fn block_on<T>(fut: impl Future<Output = T>) -> T {
    let waker = Waker::noop();
    let mut cx = Context::from_waker(waker);
    let mut fut = std::pin::pin!(fut);
    loop {
        if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
            return v;
        }
    }
}
