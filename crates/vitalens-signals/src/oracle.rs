//! Optional peak-confidence oracle: capability trait plus a fire-and-forget
//! worker bridge.
//!
//! The oracle is a pure scoring function over a recent filtered window. It
//! never runs on the per-sample path: requests are handed to a worker thread
//! over bounded channels and the score lands on the *next* tick's blend.
//! Scores are epoch-tagged so results computed before a `reset()` are
//! ignored instead of bleeding into the new session.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle prediction failed: {0}")]
    Prediction(String),
}

/// Capability interface for an external peak-probability model.
///
/// Implementations must be pure and side-effect-free. The deterministic
/// local-maximum detector is always present; an oracle can only suppress
/// or re-weight its decisions, never create beats on its own.
pub trait PeakOracle: Send + 'static {
    /// Score the probability that the window ends at/near a true beat.
    fn predict(&self, window: &[f32]) -> Result<f32, OracleError>;
}

enum BridgeCmd {
    Score { epoch: u64, window: Vec<f32> },
    Shutdown,
}

struct ScoredWindow {
    epoch: u64,
    score: f32,
}

const REQUEST_CAPACITY: usize = 4;
const RESPONSE_CAPACITY: usize = 4;

/// Worker-thread bridge decoupling oracle inference from the tick path.
pub struct OracleBridge {
    tx: Sender<BridgeCmd>,
    rx: Receiver<ScoredWindow>,
    worker: Option<thread::JoinHandle<()>>,
    epoch: u64,
}

impl OracleBridge {
    pub fn start(oracle: Box<dyn PeakOracle>) -> Self {
        let (cmd_tx, cmd_rx) = bounded::<BridgeCmd>(REQUEST_CAPACITY);
        let (score_tx, score_rx) = bounded::<ScoredWindow>(RESPONSE_CAPACITY);

        let worker = thread::spawn(move || {
            let mut warned = false;
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    BridgeCmd::Score { epoch, window } => match oracle.predict(&window) {
                        Ok(score) => {
                            let clamped = score.clamp(0.0, 1.0);
                            // Full response channel: the consumer is behind,
                            // the stale score is simply dropped.
                            let _ = score_tx.try_send(ScoredWindow {
                                epoch,
                                score: clamped,
                            });
                        }
                        Err(e) => {
                            if !warned {
                                log::warn!(
                                    "peak oracle degraded, falling back to deterministic detector: {}",
                                    e
                                );
                                warned = true;
                            } else {
                                log::debug!("oracle prediction dropped: {}", e);
                            }
                        }
                    },
                    BridgeCmd::Shutdown => break,
                }
            }
        });

        Self {
            tx: cmd_tx,
            rx: score_rx,
            worker: Some(worker),
            epoch: 0,
        }
    }

    /// Submit a window for scoring. Non-blocking: when the worker is behind,
    /// the request is skipped rather than stalling the tick path.
    pub fn submit(&self, window: Vec<f32>) {
        let cmd = BridgeCmd::Score {
            epoch: self.epoch,
            window,
        };
        if self.tx.try_send(cmd).is_err() {
            log::trace!("oracle request queue full, skipping window");
        }
    }

    /// Drain completed scores, returning the freshest one from the current
    /// epoch. Scores from earlier epochs (pre-reset) are discarded.
    pub fn latest_score(&self) -> Option<f32> {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(scored) if scored.epoch == self.epoch => latest = Some(scored.score),
                Ok(_) => log::trace!("discarding oracle score from a previous session"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        latest
    }

    /// Invalidate all in-flight work. Called on session reset.
    pub fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl Drop for OracleBridge {
    fn drop(&mut self) {
        let _ = self.tx.send(BridgeCmd::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedOracle(f32);

    impl PeakOracle for FixedOracle {
        fn predict(&self, _window: &[f32]) -> Result<f32, OracleError> {
            Ok(self.0)
        }
    }

    struct FailingOracle;

    impl PeakOracle for FailingOracle {
        fn predict(&self, _window: &[f32]) -> Result<f32, OracleError> {
            Err(OracleError::Prediction("model not loaded".into()))
        }
    }

    fn wait_for_score(bridge: &OracleBridge) -> Option<f32> {
        for _ in 0..50 {
            if let Some(s) = bridge.latest_score() {
                return Some(s);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn bridge_returns_score_asynchronously() {
        let bridge = OracleBridge::start(Box::new(FixedOracle(0.8)));
        bridge.submit(vec![0.0; 32]);
        let score = wait_for_score(&bridge);
        assert_eq!(score, Some(0.8));
    }

    #[test]
    fn bridge_clamps_scores() {
        let bridge = OracleBridge::start(Box::new(FixedOracle(3.5)));
        bridge.submit(vec![0.0; 32]);
        assert_eq!(wait_for_score(&bridge), Some(1.0));
    }

    #[test]
    fn failing_oracle_produces_no_scores() {
        let bridge = OracleBridge::start(Box::new(FailingOracle));
        bridge.submit(vec![0.0; 32]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(bridge.latest_score(), None);
    }

    #[test]
    fn epoch_bump_discards_stale_results() {
        let mut bridge = OracleBridge::start(Box::new(FixedOracle(0.9)));
        bridge.submit(vec![0.0; 32]);
        // Let the worker finish, then reset before consuming
        thread::sleep(Duration::from_millis(50));
        bridge.bump_epoch();
        assert_eq!(bridge.latest_score(), None);
    }
}
