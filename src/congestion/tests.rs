//! Tests for the congestion control strategies.
use super::{
    AckEvent, CongestionControl, CongestionState, Cubic, DuplicateAckAction, Reno, Vegas,
    new_controller,
};
use crate::config::{CongestionAlgorithm, Config};
use crate::packet::SeqNum;
use std::time::Duration;
use tokio::time::Instant;

const MSS: u32 = 1000;

fn test_config() -> Config {
    let mut config = Config::default();
    config.connection.mss = MSS as usize;
    config.congestion_control.initial_cwnd_segments = 1;
    config.congestion_control.initial_ssthresh = 4 * MSS;
    config
}

fn ack(bytes_acked: u32, window: u32) -> AckEvent {
    ack_at(bytes_acked, window, Instant::now(), Some(Duration::from_millis(50)))
}

fn ack_at(bytes_acked: u32, window: u32, now: Instant, rtt: Option<Duration>) -> AckEvent {
    AckEvent {
        ack_number: SeqNum(0),
        advertised_window: window,
        bytes_acked,
        rtt,
        now,
    }
}

const OPEN: u32 = u16::MAX as u32;

#[test]
fn test_reno_slow_start_is_exponential() {
    let mut reno = Reno::new(&test_config());
    assert_eq!(reno.congestion_window(), MSS);
    assert_eq!(reno.state(), CongestionState::SlowStart);

    reno.on_ack(&ack(MSS, OPEN));
    assert_eq!(reno.congestion_window(), 2 * MSS);
    reno.on_ack(&ack(MSS, OPEN));
    assert_eq!(reno.congestion_window(), 3 * MSS);
    assert_eq!(reno.state(), CongestionState::SlowStart);

    // Reaching ssthresh moves the controller into congestion avoidance.
    reno.on_ack(&ack(MSS, OPEN));
    assert_eq!(reno.congestion_window(), 4 * MSS);
    assert_eq!(reno.state(), CongestionState::CongestionAvoidance);
}

#[test]
fn test_reno_congestion_avoidance_is_linear() {
    let mut reno = Reno::new(&test_config());
    reno.window.cwnd = 4 * MSS;
    reno.window.state = CongestionState::CongestionAvoidance;

    // One full window of acknowledged data grows cwnd by exactly one segment.
    for _ in 0..3 {
        reno.on_ack(&ack(MSS, OPEN));
        assert_eq!(reno.congestion_window(), 4 * MSS);
    }
    reno.on_ack(&ack(MSS, OPEN));
    assert_eq!(reno.congestion_window(), 5 * MSS);

    for _ in 0..5 {
        reno.on_ack(&ack(MSS, OPEN));
    }
    assert_eq!(reno.congestion_window(), 6 * MSS);
}

#[test]
fn test_reno_timeout_collapses_window() {
    let mut reno = Reno::new(&test_config());
    reno.window.cwnd = 8 * MSS;
    reno.window.state = CongestionState::CongestionAvoidance;

    reno.on_timeout();
    assert_eq!(reno.congestion_window(), MSS);
    assert_eq!(reno.slow_start_threshold(), 4 * MSS);
    assert_eq!(reno.state(), CongestionState::SlowStart);

    // The threshold never drops below one segment.
    reno.on_timeout();
    assert_eq!(reno.slow_start_threshold(), MSS);
    assert_eq!(reno.congestion_window(), MSS);
}

#[test]
fn test_reno_fast_recovery_cycle() {
    let mut reno = Reno::new(&test_config());
    reno.window.cwnd = 10 * MSS;
    reno.window.state = CongestionState::CongestionAvoidance;

    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::FastRetransmit);

    assert_eq!(reno.state(), CongestionState::FastRecovery);
    assert_eq!(reno.slow_start_threshold(), 5 * MSS);
    assert_eq!(reno.congestion_window(), 8 * MSS);

    // Further duplicates inflate the window but never retransmit again.
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.congestion_window(), 10 * MSS);

    // The ACK covering the lost data deflates to ssthresh.
    reno.on_ack(&ack(6 * MSS, OPEN));
    assert_eq!(reno.state(), CongestionState::CongestionAvoidance);
    assert_eq!(reno.congestion_window(), 5 * MSS);
}

#[test]
fn test_new_ack_resets_duplicate_count() {
    let mut reno = Reno::new(&test_config());
    reno.window.cwnd = 10 * MSS;

    reno.on_duplicate_ack();
    reno.on_duplicate_ack();
    reno.on_ack(&ack(MSS, OPEN));
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_ne!(reno.state(), CongestionState::FastRecovery);
}

#[test]
fn test_duplicate_ack_threshold_is_configurable() {
    let mut config = test_config();
    config.reliability.dup_ack_threshold = 2;
    let mut reno = Reno::new(&config);
    reno.window.cwnd = 10 * MSS;

    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::None);
    assert_eq!(reno.on_duplicate_ack(), DuplicateAckAction::FastRetransmit);
    assert_eq!(reno.congestion_window(), 5 * MSS + 2 * MSS);
}

#[test]
fn test_window_never_exceeds_advertised_window() {
    let mut config = test_config();
    config.congestion_control.initial_ssthresh = u32::MAX;
    let advertised = 5 * MSS + 500;

    for algorithm in [
        CongestionAlgorithm::Reno,
        CongestionAlgorithm::Cubic,
        CongestionAlgorithm::Vegas,
    ] {
        config.congestion_control.algorithm = algorithm;
        let mut controller = new_controller(&config);
        for _ in 0..50 {
            controller.on_ack(&ack(MSS, advertised));
            assert!(controller.congestion_window() <= advertised, "{algorithm}");
            assert!(controller.current_send_window() <= advertised, "{algorithm}");
        }
        for _ in 0..10 {
            controller.on_duplicate_ack();
            assert!(controller.congestion_window() <= advertised, "{algorithm}");
        }

        // A shrinking window pulls the congestion window down with it.
        controller.on_window_update(2 * MSS);
        assert!(controller.congestion_window() <= 2 * MSS, "{algorithm}");
        controller.on_window_update(0);
        assert_eq!(controller.current_send_window(), 0, "{algorithm}");
    }
}

#[test]
fn test_factory_selects_algorithm() {
    let mut config = test_config();
    for algorithm in [
        CongestionAlgorithm::Reno,
        CongestionAlgorithm::Cubic,
        CongestionAlgorithm::Vegas,
    ] {
        config.congestion_control.algorithm = algorithm;
        let controller = new_controller(&config);
        assert_eq!(controller.algorithm(), algorithm);
        assert_eq!(controller.congestion_window(), MSS);
        assert_eq!(controller.state(), CongestionState::SlowStart);
    }
}

#[test]
fn test_cubic_reduction_uses_beta() {
    let mut cubic = Cubic::new(&test_config());
    cubic.window.cwnd = 20 * MSS;
    cubic.window.state = CongestionState::CongestionAvoidance;

    for _ in 0..2 {
        assert_eq!(cubic.on_duplicate_ack(), DuplicateAckAction::None);
    }
    assert_eq!(cubic.on_duplicate_ack(), DuplicateAckAction::FastRetransmit);
    assert_eq!(cubic.slow_start_threshold(), 14 * MSS);
    assert!((cubic.w_max - 20.0).abs() < 1e-9);

    cubic.on_timeout();
    assert_eq!(cubic.congestion_window(), MSS);
    assert_eq!(cubic.state(), CongestionState::SlowStart);
}

#[test]
fn test_cubic_climbs_back_towards_w_max() {
    let mut cubic = Cubic::new(&test_config());
    cubic.window.cwnd = 20 * MSS;
    cubic.window.state = CongestionState::CongestionAvoidance;
    for _ in 0..3 {
        cubic.on_duplicate_ack();
    }
    let start = Instant::now();
    cubic.on_ack(&ack_at(MSS, OPEN, start, None));
    assert_eq!(cubic.congestion_window(), 14 * MSS);

    // The first congestion-avoidance ACK opens the epoch at the plateau start.
    cubic.on_ack(&ack_at(MSS, OPEN, start, None));
    assert_eq!(cubic.congestion_window(), 14 * MSS);

    // K = cbrt((20 - 14) / 0.4) ~ 2.47s; after 3s the curve is back above W_max,
    // so one ACK closes a large part of the gap, far more than Reno would.
    cubic.on_ack(&ack_at(MSS, OPEN, start + Duration::from_secs(3), None));
    assert!(cubic.congestion_window() > 14 * MSS + 400);
    assert!(cubic.congestion_window() < 15 * MSS);
}

#[test]
fn test_vegas_adjusts_on_queueing_delay() {
    let mut vegas = Vegas::new(&test_config());
    vegas.window.cwnd = 10 * MSS;
    vegas.window.state = CongestionState::CongestionAvoidance;

    // Stable RTT: no queueing, the window grows by one segment per round.
    let now = Instant::now();
    vegas.on_ack(&ack_at(10 * MSS, OPEN, now, Some(Duration::from_millis(100))));
    assert_eq!(vegas.congestion_window(), 11 * MSS);
    assert_eq!(vegas.min_rtt, Some(Duration::from_millis(100)));

    // RTT doubles: about 5.5 segments queued, above beta, so the window shrinks.
    vegas.on_ack(&ack_at(11 * MSS, OPEN, now, Some(Duration::from_millis(200))));
    assert_eq!(vegas.congestion_window(), 10 * MSS);

    // A partial round changes nothing.
    vegas.on_ack(&ack_at(MSS, OPEN, now, Some(Duration::from_millis(100))));
    assert_eq!(vegas.congestion_window(), 10 * MSS);
}

#[test]
fn test_vegas_loss_reaction_matches_reno() {
    let mut vegas = Vegas::new(&test_config());
    vegas.window.cwnd = 20 * MSS;
    vegas.window.state = CongestionState::CongestionAvoidance;

    vegas.on_timeout();
    assert_eq!(vegas.slow_start_threshold(), 10 * MSS);
    assert_eq!(vegas.congestion_window(), MSS);
    assert_eq!(vegas.state(), CongestionState::SlowStart);
}
