//! End-to-end measurement session over a disk-backed layout.

use medir::{
    BlockImage, CoverageCollector, DirContainer, ImageIndex, MethodImage, ScriptOp, SessionConfig,
    SharedHost, TestOutcome, TextReporter, UnitContainer, UnitImage,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store(dir: &Path, image: &UnitImage) {
    let path = dir.join(medir::unit_rel_path(&image.name));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, image.encode().unwrap()).unwrap();
}

fn stack_image() -> UnitImage {
    UnitImage::new("org.example.Stack")
        .with_source_file("Stack.java")
        .with_method(MethodImage::new("push", "(i32)->()").with_blocks(vec![
            BlockImage {
                line: 10,
                instructions: 6,
                branches: 0,
            },
            BlockImage {
                line: 12,
                instructions: 4,
                branches: 2,
            },
        ]))
        .with_method(MethodImage::new("pop", "()->i32").with_blocks(vec![
            BlockImage {
                line: 20,
                instructions: 5,
                branches: 2,
            },
            BlockImage {
                line: 21,
                instructions: 2,
                branches: 0,
            },
        ]))
        .with_method(MethodImage::new("clear", "()->()").with_blocks(vec![BlockImage {
            line: 30,
            instructions: 3,
            branches: 0,
        }]))
}

fn invoke(method: &str, blocks: &[u16]) -> ScriptOp {
    ScriptOp::Invoke {
        unit: "org.example.Stack".into(),
        method: method.into(),
        blocks: blocks.to_vec(),
    }
}

/// One passing unit with two sub-tests, one aborting unit, one unit that
/// outlives its deadline.
fn seed_test_units(compiled_dir: &Path) {
    store(
        compiled_dir,
        &UnitImage::new("org.example.StackTest")
            .with_method(MethodImage::new("testPush", "()->()").with_script(vec![
                invoke("push", &[0, 1]),
                ScriptOp::Invoke {
                    unit: "runtime.Assert".into(),
                    method: "check".into(),
                    blocks: vec![],
                },
            ]))
            .with_method(
                MethodImage::new("testPop", "()->()").with_script(vec![invoke("pop", &[0])]),
            ),
    );
    store(
        compiled_dir,
        &UnitImage::new("org.example.StackCrashTest").with_method(
            MethodImage::new("testCrash", "()->()").with_script(vec![
                invoke("clear", &[0]),
                ScriptOp::Abort {
                    message: "index out of bounds".into(),
                },
            ]),
        ),
    );
    store(
        compiled_dir,
        &UnitImage::new("org.example.StackSlowTest").with_method(
            MethodImage::new("testSlow", "()->()")
                .with_script(vec![ScriptOp::Sleep { millis: 60_000 }, invoke("pop", &[1])]),
        ),
    );
}

fn build_collector(base: &Path) -> CoverageCollector {
    let bin = base.join("bin");
    store(&bin, &stack_image());

    let host = SharedHost::new();
    host.preload(UnitImage::new("runtime.Assert").with_method(MethodImage::new("check", "()->()")))
        .unwrap();

    let config = SessionConfig::new(base.join("session"))
        .with_test_deadline(Duration::from_millis(400));
    let containers: Vec<Box<dyn UnitContainer>> = vec![Box::new(DirContainer::new(&bin))];
    let collector = CoverageCollector::new(config, &containers).unwrap();
    seed_test_units(&collector.config().compiled_tests_dir());

    let index = ImageIndex::scan(&[bin.as_path()]);
    collector
        .with_index(Arc::new(index))
        .with_host(Arc::new(host))
}

#[test]
fn full_session_tallies_outcomes_per_invocation_kind() {
    let dir = TempDir::new().unwrap();
    let collector = build_collector(dir.path());

    let report = collector.measure("org.example.Stack").unwrap();

    // Passing unit: 2 executed, 0 failed. Aborting unit: 1 failure, no
    // executed count. Timed-out unit: neither.
    assert_eq!(report.outcome, TestOutcome::new(2, 1));
}

#[test]
fn full_session_attributes_counters_from_the_trace() {
    let dir = TempDir::new().unwrap();
    let collector = build_collector(dir.path());

    let report = collector.measure("org.example.Stack").unwrap();

    // push fully covered, pop's first block covered, clear covered by the
    // crashing unit before it aborted. The timed-out unit's pop[1] mark
    // never happened.
    assert_eq!(report.counters.instructions.covered, 18);
    assert_eq!(report.counters.instructions.total, 20);
    assert_eq!(report.counters.branches.covered, 4);
    assert_eq!(report.counters.branches.total, 4);
    assert_eq!(report.counters.lines.covered, 4);
    assert_eq!(report.counters.lines.total, 5);
    assert_eq!(report.counters.complexity.covered, 5);
    assert_eq!(report.counters.complexity.total, 5);

    for counter in report.counters.iter() {
        assert!(counter.covered <= counter.total);
        assert!((0.0..=1.0).contains(&counter.ratio()));
    }
}

#[test]
fn method_reports_cover_exactly_the_observed_members() {
    let dir = TempDir::new().unwrap();
    let collector = build_collector(dir.path());

    let report = collector.measure("org.example.Stack").unwrap();

    let names: Vec<_> = report.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "org.example.Stack::clear()->()",
            "org.example.Stack::pop()->i32",
            "org.example.Stack::push(i32)->()",
        ]
    );
}

#[test]
fn stored_units_are_byte_identical_after_the_session() {
    let dir = TempDir::new().unwrap();
    let collector = build_collector(dir.path());
    let stored = collector
        .config()
        .instrumented_unit_path("org.example.Stack");
    let before = fs::read(&stored).unwrap();

    let _ = collector.measure("org.example.Stack").unwrap();

    assert_eq!(fs::read(&stored).unwrap(), before);
}

#[test]
fn repeated_sessions_render_identical_reports() {
    let dir = TempDir::new().unwrap();
    let collector = build_collector(dir.path());
    let reporter = TextReporter::new().detailed(true);

    let first = reporter.render(&collector.measure("org.example.Stack").unwrap());
    let second = reporter.render(&collector.measure("org.example.Stack").unwrap());

    assert_eq!(first, second);
    assert!(first.starts_with("Coverage of `org.example.Stack` class:"));
    assert!(first.contains("2 tests; 1 failure"));
}
