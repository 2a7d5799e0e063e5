//! Single-threaded readiness reactor.
//!
//! Wraps a `mio::Poll` with the three watcher kinds the dispatcher needs:
//! file-descriptor readability, timers and signals. `wait` blocks until
//! something is due and hands back explicit [`Wake`] values; control flow
//! stays in the caller's loop.
//!
//! Signals are delivered through the classic self-pipe: the handler writes
//! the signal number into a nonblocking pipe registered with the poll.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mio::unix::pipe;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// Token for the display connection watcher.
pub const DISPLAY_TOKEN: Token = Token(0);

const SIGNAL_TOKEN: Token = Token(1);

/// Identifies a timer watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Why `wait` woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A registered file descriptor became readable.
    Io(Token),
    /// A timer fired.
    Timer(TimerId),
    /// A watched signal arrived.
    Signal(i32),
}

struct Timer {
    after: Duration,
    repeat: Duration,
    /// `None` while the timer is stopped.
    deadline: Option<Instant>,
    /// Scheduled fire time used by the overdue check; unlike `deadline` it
    /// is not cleared on stop.
    next_stop: Instant,
}

static SIGNAL_PIPE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_pipe_writer(signum: libc::c_int) {
    let fd = SIGNAL_PIPE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signum as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    timers: HashMap<TimerId, Timer>,
    next_timer: u64,
    signal_rx: Option<pipe::Receiver>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new().context("Failed to create poll instance")?,
            events: Events::with_capacity(64),
            timers: HashMap::new(),
            next_timer: 0,
            signal_rx: None,
        })
    }

    /// Watch `fd` for readability under `token`.
    pub fn register_io(&mut self, fd: RawFd, token: Token) -> Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
            .context("Failed to register fd with poll")?;
        Ok(())
    }

    /// Deliver `signum` as a [`Wake::Signal`] instead of the default action.
    pub fn watch_signal(&mut self, signum: i32) -> Result<()> {
        if self.signal_rx.is_none() {
            let (tx, mut rx) = pipe::new().context("Failed to create signal pipe")?;
            SIGNAL_PIPE_FD.store(tx.as_raw_fd(), Ordering::Relaxed);
            // The write end lives in the signal handler for the rest of the
            // process.
            std::mem::forget(tx);
            self.poll
                .registry()
                .register(&mut rx, SIGNAL_TOKEN, Interest::READABLE)?;
            self.signal_rx = Some(rx);
        }
        unsafe {
            libc::signal(signum, signal_pipe_writer as libc::sighandler_t);
        }
        Ok(())
    }

    /// Create a timer firing after `after`, then every `repeat` (a zero
    /// `repeat` means one-shot).
    pub fn add_timer(&mut self, after: Duration, repeat: Duration, start: bool) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let now = Instant::now();
        self.timers.insert(
            id,
            Timer {
                after,
                repeat,
                deadline: start.then(|| now + after),
                next_stop: now + after,
            },
        );
        id
    }

    pub fn timer_start(&mut self, id: TimerId) {
        let now = Instant::now();
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.deadline = Some(now + timer.after);
            timer.next_stop = now + timer.after;
        }
    }

    pub fn timer_stop(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.deadline = None;
        }
    }

    /// Reschedule using the repeat interval from now.
    pub fn timer_again(&mut self, id: TimerId) {
        let now = Instant::now();
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.deadline = Some(now + timer.repeat);
            timer.next_stop = now + timer.repeat;
        }
    }

    /// Time until the next fire, `None` while stopped.
    pub fn timer_remaining(&self, id: TimerId) -> Option<Duration> {
        let timer = self.timers.get(&id)?;
        let deadline = timer.deadline?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the scheduled fire time has slipped by more than `timeout`.
    pub fn timer_overdue(&self, id: TimerId, timeout: Duration) -> bool {
        match self.timers.get(&id) {
            Some(timer) => Instant::now() > timer.next_stop + timeout,
            None => false,
        }
    }

    pub fn remove_timer(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    /// Stop every timer (registry-wide, used by session stop).
    pub fn stop_all_timers(&mut self) {
        for timer in self.timers.values_mut() {
            timer.deadline = None;
        }
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.timers.values().filter_map(|t| t.deadline).min()
    }

    /// Block until readiness, a signal, or the nearest timer deadline, and
    /// return everything that woke us.
    pub fn wait(&mut self) -> Result<Vec<Wake>> {
        let timeout = self
            .nearest_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err).context("Poll failed"),
        }

        let mut wakes = Vec::new();
        let mut signal_pending = false;
        for event in self.events.iter() {
            if event.token() == SIGNAL_TOKEN {
                signal_pending = true;
            } else {
                wakes.push(Wake::Io(event.token()));
            }
        }

        if signal_pending {
            if let Some(rx) = self.signal_rx.as_mut() {
                let mut buf = [0u8; 16];
                loop {
                    match rx.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            for &byte in &buf[..n] {
                                wakes.push(Wake::Signal(i32::from(byte)));
                            }
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => return Err(err).context("Signal pipe read failed"),
                    }
                }
            }
        }

        let now = Instant::now();
        let mut expired: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline.is_some_and(|d| d <= now))
            .map(|(&id, _)| id)
            .collect();
        expired.sort_by_key(|id| id.0);
        for id in expired {
            let timer = self.timers.get_mut(&id).unwrap();
            if timer.repeat > Duration::ZERO {
                timer.deadline = Some(now + timer.repeat);
                timer.next_stop = now + timer.repeat;
            } else {
                timer.deadline = None;
            }
            wakes.push(Wake::Timer(id));
        }

        Ok(wakes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_lifecycle() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.add_timer(Duration::from_secs(5), Duration::from_secs(10), true);

        let remaining = reactor.timer_remaining(id).unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));

        reactor.timer_stop(id);
        assert!(reactor.timer_remaining(id).is_none());

        reactor.timer_again(id);
        let remaining = reactor.timer_remaining(id).unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));

        reactor.remove_timer(id);
        assert!(reactor.timer_remaining(id).is_none());
        assert!(!reactor.timer_overdue(id, Duration::ZERO));
    }

    #[test]
    fn test_unstarted_timer_has_no_deadline() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.add_timer(Duration::from_secs(1), Duration::ZERO, false);
        assert!(reactor.timer_remaining(id).is_none());
        reactor.timer_start(id);
        assert!(reactor.timer_remaining(id).is_some());
    }

    #[test]
    fn test_elapsed_timer_fires_and_one_shot_disarms() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.add_timer(Duration::ZERO, Duration::ZERO, true);
        let wakes = reactor.wait().unwrap();
        assert!(wakes.contains(&Wake::Timer(id)));
        // One-shot: disarmed after firing.
        assert!(reactor.timer_remaining(id).is_none());
    }

    #[test]
    fn test_repeating_timer_reschedules() {
        let mut reactor = Reactor::new().unwrap();
        let id = reactor.add_timer(Duration::ZERO, Duration::from_secs(60), true);
        let wakes = reactor.wait().unwrap();
        assert!(wakes.contains(&Wake::Timer(id)));
        assert!(reactor.timer_remaining(id).is_some());
    }
}
