// SPDX-License-Identifier: MIT OR Apache-2.0
//! Periodic tick thread.
//!
//! A [`Ticker`] owns a named thread running a current-thread tokio runtime
//! that calls back at a fixed period until the callback returns `false` or
//! the ticker is dropped. Dropping never joins, so a ticker may be dropped
//! from inside its own callback.

use std::io;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Shortest supported period
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running tick thread. Ticking stops when dropped.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    stop: Option<oneshot::Sender<()>>,
}

impl Ticker {
    /// Start calling `on_tick` every `period`, first after one full period.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        thread::Builder::new()
            .name("sequence-ticker".into())
            .spawn(move || {
                rt.block_on(async move {
                    let start = tokio::time::Instant::now() + period;
                    let mut interval = tokio::time::interval_at(start, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut stop_rx => break,
                            _ = interval.tick() => {
                                if !on_tick() {
                                    break;
                                }
                            }
                        }
                    }
                });
                tracing::debug!("Ticker thread exited");
            })?;

        tracing::debug!(?period, "Ticker started");
        Ok(Self {
            period,
            stop: Some(stop_tx),
        })
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // Receiver is gone if the callback already ended the loop
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};

    #[test]
    fn test_ticks_until_callback_returns_false() {
        let (tx, rx) = mpsc::channel();
        let mut remaining = 3;
        let _ticker = Ticker::spawn(Duration::from_millis(5), move || {
            remaining -= 1;
            let _ = tx.send(remaining);
            remaining > 0
        })
        .unwrap();

        let seen: Vec<i32> = rx.iter().collect();
        assert_eq!(seen, vec![2, 1, 0]);
    }

    #[test]
    fn test_drop_stops_ticking() {
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&count);
        let ticker = Ticker::spawn(Duration::from_millis(2), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();
        assert_eq!(ticker.period(), Duration::from_millis(2));

        thread::sleep(Duration::from_millis(30));
        drop(ticker);
        thread::sleep(Duration::from_millis(20));
        let after_drop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert!(after_drop > 0);
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn test_zero_period_is_floored() {
        let ticker = Ticker::spawn(Duration::ZERO, || false).unwrap();
        assert_eq!(ticker.period(), MIN_PERIOD);
    }
}
