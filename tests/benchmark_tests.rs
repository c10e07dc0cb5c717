//! Performance benchmarks for the land hot paths

use serde_json::json;
use server::config::LandConfig;
use server::game::{self, ArenaState, Avatar};
use server::hash::{fnv1a, state_hash};
use server::land::Land;
use server::pending::{Inbound, PendingItem, PendingQueue};
use server::sequence::SequenceAllocator;
use server::storage::MemoryStorage;
use shared::{ActorIdentity, RecordingFile, RecordingFrame, RecordingMetadata, ResolverOutputs};
use std::time::Instant;

fn note_item(sequence: u64, resolved_at_tick: u64) -> PendingItem {
    Inbound::Action {
        type_identifier: "Note".to_string(),
        payload: json!({ "text": "bench" }),
        actor: ActorIdentity::player("p1"),
    }
    .into_submission(sequence)
    .resolve(ResolverOutputs::new(), resolved_at_tick)
}

fn crowded_arena(players: usize) -> ArenaState {
    let mut state = ArenaState::new();
    for i in 0..players {
        let x = (i * 7 % 800) as f32;
        let y = (i * 13 % 600) as f32;
        state.players.insert(
            format!("p{}", i),
            Avatar {
                x,
                y,
                target_x: 800.0 - x,
                target_y: 600.0 - y,
                is_guest: false,
            },
        );
    }
    state
}

/// Benchmarks sequence allocation
#[test]
fn benchmark_sequence_allocation() {
    let mut allocator = SequenceAllocator::new();

    let iterations = 1_000_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = allocator.next().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Sequence allocation: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(allocator.peek(), iterations);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks pushing and draining the pending queue out of order
#[test]
fn benchmark_pending_queue_drain() {
    let items = 10_000u64;
    let start = Instant::now();

    let mut queue = PendingQueue::new();
    for sequence in (0..items).rev() {
        queue.push(note_item(sequence, sequence % 100));
    }
    let mut drained = 0;
    for tick in 0..100 {
        drained += queue.drain(tick + 1).len();
    }

    let duration = start.elapsed();
    println!(
        "Pending queue: {} items pushed and drained in {:?} ({:.2} μs/item)",
        items,
        duration,
        duration.as_micros() as f64 / items as f64
    );

    assert_eq!(drained as u64, items);
    assert!(queue.is_empty());
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks FNV-1a over a state-sized buffer
#[test]
fn benchmark_fnv_hashing() {
    let data = vec![0xA5u8; 64 * 1024];
    let iterations = 200;
    let start = Instant::now();

    let mut last = 0;
    for _ in 0..iterations {
        last = fnv1a(&data);
    }

    let duration = start.elapsed();
    println!(
        "FNV-1a: {} x 64KiB in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_ne!(last, 0);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks hashing an arena with many players
#[test]
fn benchmark_arena_state_hash() {
    let state = crowded_arena(500);
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = state_hash(&state).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Arena state hash (500 players): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks live tick execution with recording enabled
#[tokio::test]
async fn benchmark_live_ticks() {
    let storage = MemoryStorage::new();
    let mut land = Land::live(
        LandConfig::new("arena-bench", game::LAND_TYPE),
        crowded_arena(100),
        game::registry().unwrap(),
        Box::new(storage.clone()),
        None,
    )
    .unwrap();

    let ticks = 1_000u64;
    let start = Instant::now();

    for tick in 0..ticks {
        for i in 0..5u64 {
            land.submit(Inbound::Action {
                type_identifier: "MoveTo".to_string(),
                payload: json!({ "x": ((tick + i) % 800) as f32, "y": 300.0 }),
                actor: ActorIdentity::player(format!("p{}", i)),
            })
            .unwrap();
        }
        land.step().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Live ticks (100 players, 5 actions/tick): {} ticks in {:?} ({:.2} μs/tick)",
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    let report = land.shutdown().await.unwrap().unwrap();
    assert_eq!(report.frames_written, ticks);
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks parsing a JSON recording
#[test]
fn benchmark_recording_parse() {
    let mut file = RecordingFile::new(RecordingMetadata::new("arena-bench", game::LAND_TYPE));
    for tick in 0..2_000 {
        let mut frame = RecordingFrame::empty(tick);
        frame.state_hash = Some(format!("{:016x}", tick));
        file.frames.push(frame);
    }
    let text = file.to_json_pretty().unwrap();

    let start = Instant::now();
    let parsed = RecordingFile::parse(&text).unwrap();
    let duration = start.elapsed();

    println!(
        "Recording parse: {} frames ({} bytes) in {:?}",
        parsed.frames.len(),
        text.len(),
        duration
    );

    assert_eq!(parsed.max_tick_id(), Some(1_999));
    assert!(duration.as_millis() < 2000);
}
