use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Owner of at most one pending timer task.
///
/// Arming replaces (and aborts) whatever was armed before. Every arm gets a
/// fresh id; a tick that reports a stale id came from a replaced timer and must
/// be ignored by the receiver.
#[derive(Debug, Default)]
pub struct TimerSlot {
    armed: Option<(u64, JoinHandle<()>)>,
    next_id: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F>(&mut self, spawn: F) -> u64
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.cancel();
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.armed = Some((id, spawn(id)));
        id
    }

    /// Abort the pending timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn is_current(&self, id: u64) -> bool {
        matches!(&self.armed, Some((armed, _)) if *armed == id)
    }

    /// Clear a one-shot timer that has fired. Returns false for stale ids.
    pub fn fired(&mut self, id: u64) -> bool {
        if self.is_current(id) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `fire` once after `delay`.
pub fn spawn_after<F, Fut>(delay: Duration, fire: F) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fire().await;
    })
}

/// Run `tick` every `period`, first tick one period from now. Stops when
/// `tick` returns false.
pub fn spawn_every<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !tick().await {
                break;
            }
        }
    })
}
