//! Performance benchmarks for the hot paths of one peer

use glam::{Quat, Vec3};
use shared::curve::{CatmullRomLoop, TrackCurve};
use shared::lap::LapAccumulator;
use shared::motion::{FixedDirection, FlatGround};
use shared::progress::estimate_progress;
use shared::protocol::{Message, Packet, VehicleSnapshot};
use shared::session::PeerSession;
use shared::Settings;
use std::time::Instant;

/// Benchmarks brute-force progress estimation with the default sample count
#[test]
fn benchmark_progress_estimation() {
    let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 24);
    let iterations = 1_000;
    let start = Instant::now();

    let mut total = 0.0;
    for i in 0..iterations {
        let angle = i as f32 * 0.01;
        let position = Vec3::new(angle.cos() * 10.0, 0.1, angle.sin() * 10.0);
        total += estimate_progress(&curve, position, 300);
    }

    let duration = start.elapsed();
    println!(
        "Progress estimation: {} iterations in {:?} ({:.2} μs/iter, checksum {:.1})",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        total
    );

    // 300 curve evaluations per estimate, generous budget for debug builds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks curve evaluation alone
#[test]
fn benchmark_curve_evaluation() {
    let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 24);
    let iterations = 100_000;
    let start = Instant::now();

    let mut length = 0.0;
    for i in 0..iterations {
        if let Some(sample) = curve.evaluate(i as f32 / iterations as f32) {
            length += sample.position.length();
        }
    }

    let duration = start.elapsed();
    println!(
        "Curve evaluation: {} iterations in {:?} ({:.2} ns/iter, checksum {:.1})",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64,
        length
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks lap accumulation over many wraps
#[test]
fn benchmark_lap_accumulation() {
    let iterations = 100_000;
    let mut laps = LapAccumulator::new();
    let start = Instant::now();

    for i in 0..iterations {
        laps.update((i % 100) as f32 / 100.0);
    }

    let duration = start.elapsed();
    println!(
        "Lap accumulation: {} updates in {:?} ({:.2} laps)",
        iterations,
        duration,
        laps.lap_progress()
    );

    assert!((laps.lap_progress() - 999.99).abs() < 5.0);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks one simulated second of a four-vehicle race on the leader
#[test]
fn benchmark_session_tick() {
    let mut settings = Settings::default();
    settings.rules.start_delay = 0.0;
    let mut session = PeerSession::new(1, 1, settings).unwrap().with_seed(1);
    let anchors = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 24).anchors().to_vec();
    session.finalize_track(anchors, vec![1, 2, 3, 4]);

    let ticks = 500;
    let mut input = FixedDirection(Vec3::Z);
    let ground = FlatGround::default();
    let start = Instant::now();

    for _ in 0..ticks {
        session.tick(1.0 / 50.0, &mut input, &ground);
    }

    let duration = start.elapsed();
    println!(
        "Session tick: {} ticks in {:?} ({:.2} μs/tick)",
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    // Must stay well below the 20ms tick period even in debug builds
    assert!(duration.as_millis() < 5 * ticks as u128);
}

/// Benchmarks snapshot packet encoding
#[test]
fn benchmark_snapshot_encoding() {
    let snapshot = VehicleSnapshot {
        vehicle: 3,
        position: Vec3::new(1.0, 0.1, -4.0),
        rotation: Quat::from_rotation_y(0.3),
        velocity: Vec3::new(0.3, 0.0, 0.1),
        progress: 0.42,
        lap_progress: 1.42,
    };
    let iterations = 100_000;
    let start = Instant::now();

    let mut bytes = 0;
    for _ in 0..iterations {
        let packet = Packet::Deliver {
            from: 3,
            message: Message::Snapshot(snapshot),
        };
        if let Ok(frame) = packet.to_frame() {
            bytes += frame.len();
        }
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encoding: {} frames ({} bytes) in {:?}",
        iterations, bytes, duration
    );

    assert!(bytes > 0);
    assert!(duration.as_millis() < 2000);
}
