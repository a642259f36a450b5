//! Congestion control and RTT estimation (RFC 9002).
//!
//! The controller is a pure state machine: the loss detector (external)
//! feeds it sent/acked/lost events with timestamps, and the send path asks
//! [`CubicCongestionControl::can_send`] before emitting a datagram.

pub mod cubic;
pub mod rtt;

pub use cubic::{CongestionState, CongestionStats, CubicConfig, CubicCongestionControl};
pub use rtt::RttEstimator;
