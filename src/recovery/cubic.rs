//! CUBIC congestion control (RFC 9002 Section 7, RFC 8312).
//!
//! Window growth follows the cubic curve `W(t) = C(t - K)^3 + origin` during
//! congestion avoidance; slow start and fast recovery bracket it. All state
//! sits behind one reader-writer lock: event entry points take the write
//! lock, queries take the read lock. Callers must not invoke the controller
//! while holding a stream lock.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::recovery::rtt::RttEstimator;

/// CUBIC constant C: curve aggressiveness.
pub const CUBIC_C: f64 = 0.4;

/// CUBIC beta: multiplicative decrease factor on loss.
pub const CUBIC_BETA: f64 = 0.7;

/// Congestion-control phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    /// Exponential growth until `ssthresh`.
    SlowStart,
    /// Cubic-curve growth.
    CongestionAvoidance,
    /// Post-loss: window reduced, waiting for an ACK of a packet sent after
    /// the loss.
    FastRecovery,
}

/// Controller tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct CubicConfig {
    /// Maximum datagram payload (MSS).
    pub max_datagram_size: u64,
    /// Starting window.
    pub initial_window: u64,
    /// Floor the window never drops below.
    pub min_window: u64,
    /// Cap the window never grows past.
    pub max_window: u64,
}

impl CubicConfig {
    /// RFC-recommended values for a given datagram size: cwnd starts at
    /// 10 MSS, floors at 2 MSS, caps at 1000 MSS.
    pub fn for_mss(max_datagram_size: u64) -> Self {
        Self {
            max_datagram_size,
            initial_window: 10 * max_datagram_size,
            min_window: 2 * max_datagram_size,
            max_window: 1000 * max_datagram_size,
        }
    }
}

impl Default for CubicConfig {
    fn default() -> Self {
        Self::for_mss(crate::types::DEFAULT_MAX_DATAGRAM_SIZE)
    }
}

/// Point-in-time controller counters.
#[derive(Debug, Clone)]
pub struct CongestionStats {
    pub state: CongestionState,
    pub cwnd: u64,
    pub ssthresh: u64,
    pub bytes_in_flight: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
    pub min_rtt: Option<Duration>,
    pub smoothed_rtt: Option<Duration>,
    pub last_max_cwnd: u64,
}

struct CubicState {
    state: CongestionState,
    cwnd: u64,
    ssthresh: u64,
    bytes_in_flight: u64,

    /// Window at the most recent reduction.
    w_max: u64,
    /// `w_max` after fast convergence; the cubic curve's plateau.
    w_last_max: u64,
    /// Start of the current avoidance epoch; cleared on loss and on leaving
    /// slow start so the next avoidance ACK re-anchors the curve.
    epoch_start: Option<Instant>,
    /// Seconds along the curve to reach `w_last_max` again.
    k: f64,
    /// Window the curve is anchored to at `t = K`.
    origin: u64,

    /// Largest packet number handed to `on_packet_sent`.
    largest_sent: u64,
    /// Largest acknowledged packet number.
    largest_acked: u64,
    /// Recovery ends once an ACK arrives for a packet above this.
    end_of_recovery: u64,

    packets_acked: u64,
    packets_lost: u64,
    rtt: RttEstimator,
}

/// CUBIC congestion controller.
///
/// Thread-safe; every operation is non-blocking.
pub struct CubicCongestionControl {
    config: CubicConfig,
    inner: RwLock<CubicState>,
}

impl CubicCongestionControl {
    pub fn new(config: CubicConfig) -> Self {
        Self {
            inner: RwLock::new(CubicState {
                state: CongestionState::SlowStart,
                cwnd: config.initial_window,
                ssthresh: u64::MAX,
                bytes_in_flight: 0,
                w_max: 0,
                w_last_max: 0,
                epoch_start: None,
                k: 0.0,
                origin: 0,
                largest_sent: 0,
                largest_acked: 0,
                end_of_recovery: 0,
                packets_acked: 0,
                packets_lost: 0,
                rtt: RttEstimator::new(),
            }),
            config,
        }
    }

    /// Record a sent packet.
    ///
    /// `bytes_in_flight` is the sender's total after this packet; only
    /// retransmittable packets move the accounting.
    pub fn on_packet_sent(
        &self,
        _now: Instant,
        bytes_in_flight: u64,
        packet_number: u64,
        _bytes: u64,
        retransmittable: bool,
    ) {
        let mut inner = self.inner.write();
        if retransmittable {
            inner.bytes_in_flight = bytes_in_flight;
        }
        if packet_number > inner.largest_sent {
            inner.largest_sent = packet_number;
        }
    }

    /// Process an acknowledgment. Returns `true` exactly when this ACK takes
    /// the controller out of fast recovery.
    pub fn on_ack(
        &self,
        packet_number: u64,
        acked_bytes: u64,
        prior_in_flight: u64,
        event_time: Instant,
    ) -> bool {
        let mut inner = self.inner.write();

        inner.packets_acked += 1;
        inner.bytes_in_flight = prior_in_flight.saturating_sub(acked_bytes);
        if packet_number > inner.largest_acked {
            inner.largest_acked = packet_number;
        }

        let was_in_recovery = inner.state == CongestionState::FastRecovery;
        if was_in_recovery && packet_number > inner.end_of_recovery {
            debug!(packet_number, cwnd = inner.cwnd, "exiting fast recovery");
            inner.state = CongestionState::CongestionAvoidance;
            inner.end_of_recovery = 0;
        }

        if inner.state != CongestionState::FastRecovery {
            self.increase_window(&mut inner, acked_bytes, prior_in_flight, event_time);
        }

        was_in_recovery && inner.state != CongestionState::FastRecovery
    }

    /// Process a loss event: reduce the window and enter fast recovery
    /// (once; further losses inside a recovery epoch are absorbed).
    pub fn on_packet_lost(&self, packet_number: u64, lost_bytes: u64, prior_in_flight: u64) {
        let mut inner = self.inner.write();

        inner.packets_lost += 1;
        inner.bytes_in_flight = prior_in_flight.saturating_sub(lost_bytes);

        if inner.state == CongestionState::FastRecovery {
            trace!(packet_number, "loss within recovery epoch ignored");
            return;
        }

        inner.state = CongestionState::FastRecovery;
        inner.end_of_recovery = inner.largest_sent;
        inner.epoch_start = None;

        // Multiplicative decrease with fast convergence: when windows are
        // trending down, plateau below the previous peak.
        let prev = inner.cwnd;
        inner.w_max = prev;
        inner.w_last_max = if prev < inner.w_last_max {
            (prev as f64 * (2.0 - CUBIC_BETA) / 2.0) as u64
        } else {
            prev
        };
        inner.cwnd = ((prev as f64 * CUBIC_BETA) as u64).max(self.config.min_window);
        inner.ssthresh = inner.cwnd;

        debug!(
            packet_number,
            prev_cwnd = prev,
            cwnd = inner.cwnd,
            end_of_recovery = inner.end_of_recovery,
            "entering fast recovery"
        );
    }

    /// Whether another datagram may be emitted now.
    pub fn can_send(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight < self.inner.read().cwnd
    }

    /// Fold an RTT sample into the estimator.
    pub fn update_rtt(&self, sample: Duration) {
        self.inner.write().rtt.update(sample);
    }

    pub fn congestion_window(&self) -> u64 {
        self.inner.read().cwnd
    }

    pub fn in_slow_start(&self) -> bool {
        self.inner.read().state == CongestionState::SlowStart
    }

    pub fn in_recovery(&self) -> bool {
        self.inner.read().state == CongestionState::FastRecovery
    }

    /// Counters snapshot.
    pub fn stats(&self) -> CongestionStats {
        let inner = self.inner.read();
        CongestionStats {
            state: inner.state,
            cwnd: inner.cwnd,
            ssthresh: inner.ssthresh,
            bytes_in_flight: inner.bytes_in_flight,
            packets_acked: inner.packets_acked,
            packets_lost: inner.packets_lost,
            min_rtt: inner.rtt.min_rtt(),
            smoothed_rtt: inner.rtt.smoothed_rtt(),
            last_max_cwnd: inner.w_last_max,
        }
    }

    fn increase_window(
        &self,
        inner: &mut CubicState,
        acked_bytes: u64,
        prior_in_flight: u64,
        event_time: Instant,
    ) {
        match inner.state {
            CongestionState::SlowStart => {
                inner.cwnd = inner.cwnd.saturating_add(acked_bytes);
                if inner.cwnd >= inner.ssthresh {
                    debug!(cwnd = inner.cwnd, ssthresh = inner.ssthresh, "leaving slow start");
                    inner.state = CongestionState::CongestionAvoidance;
                    inner.epoch_start = None;
                }
            }
            CongestionState::CongestionAvoidance => {
                // Growth only while the window is actually the limiting
                // factor; an underfilled pipe earns no credit.
                if prior_in_flight + self.config.max_datagram_size < inner.cwnd {
                    return;
                }
                self.cubic_increase(inner, event_time);
            }
            CongestionState::FastRecovery => {}
        }

        if inner.cwnd > self.config.max_window {
            inner.cwnd = self.config.max_window;
        }
    }

    /// One step along `W(t) = C(t - K)^3 + origin` (RFC 8312 Section 4.1),
    /// clamped to at most one MSS of growth per ACK.
    fn cubic_increase(&self, inner: &mut CubicState, event_time: Instant) {
        let epoch_start = match inner.epoch_start {
            Some(start) => start,
            None => {
                // First avoidance ACK of the epoch anchors the curve.
                inner.epoch_start = Some(event_time);
                if inner.w_last_max > inner.cwnd {
                    inner.k = ((inner.w_last_max - inner.cwnd) as f64 / CUBIC_C).cbrt();
                    inner.origin = inner.w_last_max;
                } else {
                    inner.k = 0.0;
                    inner.origin = inner.cwnd;
                }
                trace!(k = inner.k, origin = inner.origin, "cubic epoch anchored");
                event_time
            }
        };

        let t = event_time
            .checked_duration_since(epoch_start)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let target = CUBIC_C * (t - inner.k).powi(3) + inner.origin as f64;

        if target > inner.cwnd as f64 {
            let increment = (target as u64 - inner.cwnd).min(self.config.max_datagram_size);
            inner.cwnd = inner.cwnd.saturating_add(increment);
        }
    }
}

impl Default for CubicCongestionControl {
    fn default() -> Self {
        Self::new(CubicConfig::default())
    }
}
