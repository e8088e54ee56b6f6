//! Service threads with cooperative interruption.
//!
//! Watchers run on plain threads whose sleeps must be interruptible: an
//! interrupt delivered mid-pause wakes the thread immediately and the
//! service loop exits cleanly. The interrupt bit rides an mpsc channel;
//! a dropped sender counts as an interrupt so a lost handle can never
//! leave a service sleeping forever.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The service side of the interrupt bit.
pub struct InterruptPoint {
    rx: Receiver<()>,
    interrupted: bool,
}

impl InterruptPoint {
    /// Sleep for `millis`, waking early on interrupt. Returns true when
    /// the service should stop.
    pub fn pause(&mut self, millis: u64) -> bool {
        if self.interrupted {
            return true;
        }
        match self.rx.recv_timeout(Duration::from_millis(millis)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.interrupted = true;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Non-blocking check of the interrupt bit.
    pub fn interrupted(&mut self) -> bool {
        if !self.interrupted {
            self.interrupted = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.interrupted
    }
}

/// Handle to a spawned service thread.
pub struct ServiceHandle {
    name: &'static str,
    interrupt: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Raise the interrupt bit; the service wakes from its next pause.
    pub fn interrupt(&self) {
        let _ = self.interrupt.send(());
    }

    /// Interrupt and wait for the service loop to drain.
    pub fn join(mut self) {
        self.interrupt();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(service = self.name, "Service thread panicked");
            }
        }
    }

    /// Wait for the service to finish on its own terms.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Host a long-running service on its own thread.
pub fn spawn_service<F>(name: &'static str, service: F) -> ServiceHandle
where
    F: FnOnce(&mut InterruptPoint) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut point = InterruptPoint {
                rx,
                interrupted: false,
            };
            service(&mut point);
        })
        .expect("spawning a service thread");
    ServiceHandle {
        name,
        interrupt: tx,
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn interrupt_wakes_a_sleeping_service() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let handle = spawn_service("test watcher", move |point| loop {
            seen.fetch_add(1, Ordering::SeqCst);
            if point.pause(60_000) {
                break;
            }
        });

        // Give the loop time to enter its pause.
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_handle_interrupts_the_service() {
        let mut handle = spawn_service("orphaned watcher", |point| {
            while !point.pause(10) {}
        });
        let thread = handle.thread.take().unwrap();
        drop(handle);
        thread.join().unwrap();
    }
}
