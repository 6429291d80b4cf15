use std::io;
use std::sync::{Arc, Mutex};

use dmesh::abr::{AbrEngine, AbrStrategy, BolaParams, Candidate, ReplayTable};
use dmesh::budget::BudgetSnapshot;
use dmesh::object::{Level, ObjectId, Placement, TrackedObject};
use dmesh::playback::BufferOccupancySnapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KB: u64 = 1_000;

fn object(id: u32, sizes: &[u64]) -> TrackedObject {
    let levels = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| Level::new(i, *size, 0, i as f64))
        .collect();
    TrackedObject::new(ObjectId(id), format!("object-{id}"), levels, Placement::default(), 1.0, 600).unwrap()
}

fn random_catalog(rng: &mut StdRng, id: u32) -> TrackedObject {
    let depth = rng.gen_range(1..=5);
    let mut size = rng.gen_range(1..20) * KB;
    let mut sizes = Vec::with_capacity(depth);
    for _ in 0..depth {
        sizes.push(size);
        size += rng.gen_range(0..30) * KB;
    }
    object(id, &sizes)
}

fn budget(bytes: f64) -> BudgetSnapshot {
    BudgetSnapshot {
        bandwidth_bytes_per_sec: bytes,
        segment_duration_secs: 1.0,
    }
}

fn occupancy(next: u32, through: u32) -> BufferOccupancySnapshot {
    BufferOccupancySnapshot {
        next_frame_no: next,
        min_buffered_through: through,
        target_fps: 24,
        has_started_after_startup_delay: true,
    }
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn level_zero_floor(objects: &[TrackedObject]) -> u64 {
    objects.iter().filter_map(|o| o.level_size(0)).sum()
}

#[test]
fn greedy_two_objects_reference_scenario() {
    let sizes = [10 * KB, 20 * KB, 30 * KB, 40 * KB];
    let (a, b) = (object(1, &sizes), object(2, &sizes));
    let candidates = [Candidate::new(&a, 5.0, true), Candidate::new(&b, 1.0, true)];
    let mut engine = AbrEngine::new(AbrStrategy::Greedy);
    let decision = engine.decide(1, &candidates, &budget(70_000.0), &occupancy(1, 0));

    assert_eq!(decision.level_for(ObjectId(1)), Some(3));
    assert_eq!(decision.level_for(ObjectId(2)), Some(2));
    assert_eq!(decision.used_bytes, 70 * KB);
}

#[test]
fn budgeted_strategies_stay_within_budget_or_floor() {
    let mut rng = StdRng::seed_from_u64(0xd3e5);
    for round in 0..200 {
        let objects: Vec<TrackedObject> = (0..rng.gen_range(1..6))
            .map(|i| random_catalog(&mut rng, i))
            .collect();
        let candidates: Vec<Candidate<'_>> = objects
            .iter()
            .map(|o| Candidate::new(o, rng.gen_range(0.0..10.0), rng.gen_bool(0.8)))
            .collect();
        let bytes = rng.gen_range(0.0..200_000.0);
        let floor = level_zero_floor(&objects);

        for strategy in [AbrStrategy::Greedy, AbrStrategy::Uniform] {
            let mut engine = AbrEngine::new(strategy.clone());
            let decision = engine.decide(1, &candidates, &budget(bytes), &occupancy(1, 0));
            assert_eq!(decision.assignments.len(), objects.len());
            assert!(
                decision.used_bytes as f64 <= bytes.max(floor as f64),
                "round {round}: {} used {} of budget {bytes} (floor {floor})",
                strategy.as_str(),
                decision.used_bytes
            );
            for assignment in &decision.assignments {
                if !assignment.predicted_visible {
                    assert_eq!(assignment.level, 0);
                }
            }
        }
    }
}

#[test]
fn uniform_keeps_levels_within_one_of_each_other() {
    let sizes = [10 * KB, 20 * KB, 30 * KB, 40 * KB, 50 * KB];
    let objects: Vec<TrackedObject> = (0..4).map(|i| object(i, &sizes)).collect();
    let candidates: Vec<Candidate<'_>> = objects
        .iter()
        .enumerate()
        .map(|(i, o)| Candidate::new(o, 10.0 - i as f64, true))
        .collect();

    for step in 0..40u64 {
        let bytes = (40 + step * 5) as f64 * KB as f64;
        let mut engine = AbrEngine::new(AbrStrategy::Uniform);
        let decision = engine.decide(1, &candidates, &budget(bytes), &occupancy(1, 0));
        // assignments are in descending utility order
        let levels: Vec<usize> = decision.assignments.iter().map(|a| a.level).collect();
        for pair in levels.windows(2) {
            assert!(pair[0] >= pair[1], "higher utility got a lower level: {levels:?}");
            assert!(pair[0] - pair[1] <= 1, "spread larger than one: {levels:?}");
        }
    }
}

#[test]
fn greedy_fills_higher_utility_object_first() {
    let sizes = [10 * KB, 20 * KB, 30 * KB, 40 * KB];
    let (a, b) = (object(1, &sizes), object(2, &sizes));
    let candidates = [Candidate::new(&a, 1.0, true), Candidate::new(&b, 2.0, true)];
    let mut engine = AbrEngine::new(AbrStrategy::Greedy);
    let decision = engine.decide(1, &candidates, &budget(40_000.0), &occupancy(1, 0));
    assert_eq!(decision.assignments[0].object_id, ObjectId(2));
    assert_eq!(decision.level_for(ObjectId(2)), Some(2));
    assert_eq!(decision.level_for(ObjectId(1)), Some(0));
}

#[test]
fn bola_level_rises_with_buffer_occupancy() {
    let obj = object(1, &[10 * KB, 20 * KB, 30 * KB, 40 * KB]);
    let params = BolaParams::default();
    let delta = 1.0 / 24.0;
    let cases = [(0.0, 0), (10.0, 3)];
    for (q, expected) in cases {
        let (level, _) = params.select_level(&obj, delta, q).unwrap();
        assert_eq!(level, expected, "Q = {q}");
    }

    let mut engine = AbrEngine::new(AbrStrategy::Bola(params));
    let mut previous = 0;
    for buffered in 0..=240u32 {
        let snap = BudgetSnapshot {
            bandwidth_bytes_per_sec: 0.0,
            segment_duration_secs: delta,
        };
        let decision = engine.decide(1, &[Candidate::new(&obj, 0.0, true)], &snap, &occupancy(1, 1 + buffered));
        let level = decision.assignments[0].level;
        assert!(level >= previous);
        previous = level;
    }
    assert_eq!(previous, 3);
}

#[test]
fn replay_without_entries_falls_back_to_floor() {
    let obj = object(1, &[10, 20, 30]);
    let mut engine = AbrEngine::new(AbrStrategy::FromFileInput {
        table: ReplayTable::default(),
    });
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let decision = tracing::subscriber::with_default(subscriber, || {
        engine.decide(12, &[Candidate::new(&obj, 0.0, true)], &budget(1e9), &occupancy(1, 0))
    });
    assert_eq!(decision.level_for(ObjectId(1)), Some(0));
    assert_eq!(decision.strategy, "FromFileInput");

    let output = logs.contents();
    assert!(output.contains("WARN"), "no warning logged: {output:?}");
    assert!(output.contains("no replay entry for object"));
    assert!(output.contains("segment_no=12"));
}

#[test]
fn replay_table_drives_levels_per_segment() {
    let table = ReplayTable::from_json_str(
        r#"[
            {"objectName": "object-1", "segmentId": "00001", "geometryQuality": 2, "textureQuality": 2},
            {"objectName": "object-1", "segmentId": "00002", "geometryQuality": 9, "textureQuality": 0}
        ]"#,
    )
    .unwrap();
    let obj = object(1, &[10, 20, 30]);
    let mut engine = AbrEngine::new(AbrStrategy::FromFileInput { table });
    let first = engine.decide(1, &[Candidate::new(&obj, 0.0, true)], &budget(0.0), &occupancy(1, 0));
    let second = engine.decide(2, &[Candidate::new(&obj, 0.0, true)], &budget(0.0), &occupancy(1, 0));
    assert_eq!(first.level_for(ObjectId(1)), Some(2));
    // clamped to the catalog
    assert_eq!(second.level_for(ObjectId(1)), Some(2));
}
