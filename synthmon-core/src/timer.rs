//! A timer-like helper to be alerted on a series of (changing) deadlines.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A composite timer multiplexing several named deadlines into a single
/// firing.
///
/// This is useful in cases where one wants to respond to external events with
/// variable delays, e.g. wait a few seconds after each event in case more are
/// received, but no longer than one minute since the first event.
///
/// Each deadline is associated with a unique *witness*, an opaque identifier
/// delivered on [`MultiTimer::c`] when that deadline is the earliest one and
/// it elapses. Once a witness has been delivered the timer is latched:
/// [`MultiTimer::set`] and [`MultiTimer::clear`] become no-ops and
/// [`MultiTimer::is_set`] reports `false` until [`MultiTimer::reset`] is
/// called.
///
/// `MultiTimer` has a single owner: all mutations and the receive side belong
/// to one task. The internal loop task holds the only other references and is
/// shut down by closing the reconfiguration channel (on reset or drop).
pub struct MultiTimer<W> {
    fired: Arc<AtomicBool>,
    deadlines: HashMap<W, Instant>,
    out_tx: mpsc::Sender<W>,
    out_rx: mpsc::Receiver<W>,
    conf_tx: Option<mpsc::Sender<TimerCfg<W>>>,
}

/// Reconfiguration message for the timer loop. A `witness` of `None` disarms
/// the underlying timer.
struct TimerCfg<W> {
    witness: Option<W>,
    deadline: Instant,
}

impl<W> MultiTimer<W>
where
    W: Clone + Eq + Hash + Send + 'static,
{
    /// Create an unarmed timer.
    pub fn new() -> Self {
        let (out_tx, out_rx) = mpsc::channel(1);
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            deadlines: HashMap::new(),
            out_tx,
            out_rx,
            conf_tx: None,
        }
    }

    /// Report whether a deadline for the given witness is configured.
    pub fn is_set(&self, witness: &W) -> bool {
        !self.is_fired() && self.deadlines.contains_key(witness)
    }

    /// Add or update a deadline.
    pub async fn set(&mut self, witness: W, deadline: Instant) {
        if self.is_fired() {
            return;
        }
        self.deadlines.insert(witness, deadline);
        self.reconfigure().await;
    }

    /// Remove one or more deadlines from the timer.
    pub async fn clear(&mut self, witnesses: &[W]) {
        if self.is_fired() {
            return;
        }
        for witness in witnesses {
            self.deadlines.remove(witness);
        }
        self.reconfigure().await;
    }

    /// Clear all deadlines, unlatch the timer and stop the loop task.
    ///
    /// The output channel is replaced, so an emit racing with the reset is
    /// dropped instead of being delivered stale.
    pub fn reset(&mut self) {
        self.deadlines.clear();
        // Closing the reconfiguration channel terminates the timer loop.
        self.conf_tx = None;
        self.fired = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::channel(1);
        self.out_tx = out_tx;
        self.out_rx = out_rx;
    }

    /// The channel delivering the witness of the earliest deadline.
    ///
    /// Once a value is read from this channel all other deadlines are dead
    /// and the timer must be [`reset`](MultiTimer::reset) before reuse.
    pub fn c(&mut self) -> &mut mpsc::Receiver<W> {
        &mut self.out_rx
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Push the new effective deadline (the minimum over all configured ones)
    /// to the loop task, spawning it on first use. The send blocks until the
    /// loop accepts, which keeps mutations ordered.
    async fn reconfigure(&mut self) {
        let next: Option<(W, Instant)> = self
            .deadlines
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(witness, deadline)| (witness.clone(), *deadline));

        if self.conf_tx.is_none() {
            let (conf_tx, conf_rx) = mpsc::channel(1);
            tokio::spawn(timer_loop(
                conf_rx,
                self.out_tx.clone(),
                Arc::clone(&self.fired),
            ));
            self.conf_tx = Some(conf_tx);
        }

        if let Some(conf_tx) = &self.conf_tx {
            let deadline = next.as_ref().map_or_else(Instant::now, |(_, d)| *d);
            let cfg = TimerCfg {
                witness: next.map(|(w, _)| w),
                deadline,
            };
            // Fails only if the loop is gone, in which case there is nothing
            // left to reconfigure.
            let _ = conf_tx.send(cfg).await;
        }
    }
}

impl<W> Default for MultiTimer<W>
where
    W: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the single underlying one-shot timer. Re-armed on every
/// reconfiguration; exits when the reconfiguration channel closes.
async fn timer_loop<W: Send + 'static>(
    mut conf_rx: mpsc::Receiver<TimerCfg<W>>,
    out_tx: mpsc::Sender<W>,
    fired: Arc<AtomicBool>,
) {
    let mut armed: Option<(W, Instant)> = None;
    loop {
        tokio::select! {
            cfg = conf_rx.recv() => match cfg {
                Some(cfg) => armed = cfg.witness.map(|w| (w, cfg.deadline)),
                None => return,
            },
            witness = fire(&mut armed) => {
                // Once the flag flips the delivery is committed; later set or
                // clear calls cannot cancel it.
                if fired
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let _ = out_tx.send(witness).await;
                }
            }
        }
    }
}

/// Wait for the armed deadline and yield its witness; pend forever when
/// disarmed.
async fn fire<W>(armed: &mut Option<(W, Instant)>) -> W {
    match armed {
        Some((_, deadline)) => {
            tokio::time::sleep_until(*deadline).await;
            match armed.take() {
                Some((witness, _)) => witness,
                None => std::future::pending().await,
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Let every woken task run without advancing the (paused) clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_no_event() {
        let mut timer: MultiTimer<&str> = MultiTimer::new();
        tokio::time::sleep(ms(10)).await;
        settle().await;
        assert!(timer.c().try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn closest_deadline_triggers() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(5)).await;
        timer.set("B", start + ms(3)).await;

        let witness = timer.c().recv().await.unwrap();
        assert_eq!(witness, "B");
        assert_eq!(start.elapsed(), ms(3));

        tokio::time::sleep(ms(5)).await;
        settle().await;
        assert!(timer.c().try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_extend() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(5)).await;
        timer.set("B", start + ms(3)).await;

        tokio::time::sleep(ms(2)).await;
        timer.set("B", start + ms(6)).await;

        let witness = timer.c().recv().await.unwrap();
        assert_eq!(witness, "A");
        assert_eq!(start.elapsed(), ms(5));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reduce() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(6)).await;
        timer.set("B", start + ms(4)).await;

        tokio::time::sleep(ms(2)).await;
        timer.set("A", start + ms(3)).await;

        let witness = timer.c().recv().await.unwrap();
        assert_eq!(witness, "A");
        assert_eq!(start.elapsed(), ms(3));
    }

    #[tokio::test(start_paused = true)]
    async fn no_trigger_if_reused_without_reset() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(1)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "A");
        assert_eq!(start.elapsed(), ms(1));

        // Latched: this set is a no-op.
        timer.set("B", start + ms(3)).await;
        assert!(!timer.is_set(&"B"));

        tokio::time::sleep(ms(7)).await;
        settle().await;
        assert!(timer.c().try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reuse_after_reset() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(1)).await;
        timer.set("B", start + ms(2)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "A");

        timer.reset();
        timer.set("A", start + ms(3)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "A");
        assert_eq!(start.elapsed(), ms(3));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_after_set() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(1)).await;
        timer.clear(&["A"]).await;
        timer.set("B", start + ms(2)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "B");
        assert_eq!(start.elapsed(), ms(2));
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_minimum_advances_to_the_next() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(1)).await;
        timer.set("B", start + ms(3)).await;
        timer.clear(&["A"]).await;

        assert_eq!(timer.c().recv().await.unwrap(), "B");
        assert_eq!(start.elapsed(), ms(3));
    }

    #[tokio::test(start_paused = true)]
    async fn all_clear() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(2)).await;
        timer.set("B", start + ms(3)).await;

        tokio::time::sleep(ms(1)).await;
        timer.clear(&["A", "B"]).await;

        tokio::time::sleep(ms(7)).await;
        settle().await;
        assert!(timer.c().try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_auto_clears() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(1)).await;
        timer.set("B", start + ms(3)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "A");
        assert!(!timer.is_set(&"B"));

        timer.reset();
        timer.set("C", start + ms(4)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "C");
        assert_eq!(start.elapsed(), ms(4));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_without_trigger() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(2)).await;
        timer.set("B", start + ms(3)).await;
        timer.reset();

        tokio::time::sleep(ms(8)).await;
        settle().await;
        assert!(timer.c().try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_deadline() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        timer.set("A", start + ms(5)).await;
        timer.set("A", start + ms(2)).await;

        assert_eq!(timer.c().recv().await.unwrap(), "A");
        assert_eq!(start.elapsed(), ms(2));
    }

    #[tokio::test(start_paused = true)]
    async fn is_set_tracks_deadlines() {
        let mut timer = MultiTimer::new();
        let start = Instant::now();
        assert!(!timer.is_set(&"A"));

        timer.set("A", start + ms(5)).await;
        assert!(timer.is_set(&"A"));

        timer.clear(&["A"]).await;
        assert!(!timer.is_set(&"A"));
    }
}
