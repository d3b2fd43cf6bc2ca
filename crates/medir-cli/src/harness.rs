//! Benchmark run loop.
//!
//! One session per benchmark × run: build the session layout, extract the
//! task's containers, optionally compile generated test sources, then
//! measure and report every listed class. A failed session is logged and
//! the loop proceeds to the next run.

use crate::commands::Cli;
use crate::compile::CompilerHelper;
use crate::config::{BenchmarkSuite, BenchmarkTask};
use crate::error::CliResult;
use indicatif::{ProgressBar, ProgressStyle};
use medir::{
    CoverageCollector, DirContainer, ImageIndex, SessionConfig, TextReporter, UnitContainer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Run every benchmark in the suite named by `cli`.
pub fn run_suite(cli: &Cli) -> CliResult<()> {
    let suite = BenchmarkSuite::load(&cli.config)?;
    let reporter = TextReporter::new().detailed(cli.detailed);

    let progress = ProgressBar::new(suite.session_count(cli.runs));
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for (name, task) in &suite.benchmarks {
        for run in 1..=cli.runs {
            progress.set_message(format!("{name}_{run}"));
            debug!(benchmark = name.as_str(), run, "starting session");
            if let Err(err) = run_session(cli, name, run, task, &reporter) {
                error!(benchmark = name.as_str(), run, %err, "session failed; continuing");
            }
            debug!(benchmark = name.as_str(), run, "finished session");
            progress.inc(1);
        }
    }
    progress.finish_with_message("all benchmarks finished");
    debug!("all benchmarks finished");
    Ok(())
}

fn run_session(
    cli: &Cli,
    name: &str,
    run: u32,
    task: &BenchmarkTask,
    reporter: &TextReporter,
) -> CliResult<()> {
    let mut config = SessionConfig::new(cli.base_dir.join(format!("{name}_{run}")))
        .with_dependency_dirs(cli.deps.clone());
    if let Some(secs) = cli.timeout {
        config = config.with_test_deadline(Duration::from_secs(secs));
    }

    let mut containers: Vec<Box<dyn UnitContainer>> =
        vec![Box::new(DirContainer::new(&task.bin_dir))];
    for root in &task.class_path {
        containers.push(Box::new(DirContainer::new(root)));
    }

    let mut index_roots: Vec<&Path> = vec![task.bin_dir.as_path()];
    index_roots.extend(task.class_path.iter().map(|p| p.as_path()));
    let index = ImageIndex::scan(&index_roots);

    let collector =
        CoverageCollector::new(config, &containers)?.with_index(Arc::new(index));

    if let Some(command) = &cli.compiler {
        let mut class_paths = vec![task.bin_dir.clone()];
        class_paths.extend(task.class_path.iter().cloned());
        let helper = CompilerHelper::new(
            command,
            class_paths,
            collector.config().compiled_tests_dir(),
        );
        let compiled = helper.compile_dir(&collector.config().tests_dir());
        debug!(benchmark = name, run, compiled, "compiled generated tests");
    }

    for class in &task.classes {
        info!(target: medir::COVERAGE_TARGET, "Benchmark {name}_{run}");
        debug!(benchmark = name, run, class = class.as_str(), "measuring");
        match collector.measure(class) {
            Ok(report) => reporter.emit(&report),
            Err(err) => {
                error!(class = class.as_str(), %err, "measurement failed; continuing");
            }
        }
    }
    Ok(())
}
