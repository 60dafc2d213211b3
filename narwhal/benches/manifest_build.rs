//! Benchmarks for job manifest construction and runner output parsing.
//!
//! These benchmarks measure the performance of:
//! - Rendering and decoding the default job template
//! - Merging an extension overlay onto the base template
//! - Parsing a runner log into a result

#![allow(missing_docs)]

use std::collections::BTreeMap;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use narwhal::config::{DEFAULT_JOB_TEMPLATE, RunnerEnv};
use narwhal::execution::{ExecutionResult, ExecutionStatus, Variable};
use narwhal::manifest::{JobOptions, build_job_spec};
use narwhal::output::{JsonLinesParser, OutputParser};

const OVERLAY: &str = r#"
spec:
  template:
    spec:
      containers:
      - name: "{{ name }}"
        resources:
          limits:
            memory: 512Mi
      nodeSelector:
        pool: tests
"#;

fn options(variables: usize) -> JobOptions {
    JobOptions {
        name: "e1".into(),
        namespace: "tests".into(),
        image: "runner:1".into(),
        init_image: "init:1".into(),
        jsn: r#"{"id":"e1","test_name":"t1"}"#.into(),
        cluster_id: "c-1".into(),
        storage_bucket: "bucket".into(),
        working_dir: "/data/repo".into(),
        labels: BTreeMap::from([("team".to_string(), "qa".to_string())]),
        variables: (0..variables)
            .map(|i| (format!("VAR_{i}"), Variable::basic(format!("VAR_{i}"), "value")))
            .collect(),
        job_template: DEFAULT_JOB_TEMPLATE.to_string(),
        ..Default::default()
    }
}

fn bench_build_job_spec(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_job_spec");
    let runner = RunnerEnv::default();

    let plain = options(4);
    group.bench_function("default_template", |b| {
        b.iter(|| build_job_spec(black_box(&plain), &runner).unwrap());
    });

    let many = options(64);
    group.bench_function("many_variables", |b| {
        b.iter(|| build_job_spec(black_box(&many), &runner).unwrap());
    });

    let mut extended = options(4);
    extended.job_template_extensions = OVERLAY.to_string();
    group.bench_function("with_overlay", |b| {
        b.iter(|| build_job_spec(black_box(&extended), &runner).unwrap());
    });

    group.finish();
}

fn runner_log(lines: usize) -> Vec<u8> {
    let mut log = String::new();
    for i in 0..lines {
        log.push_str(&format!(r#"{{"type":"line","content":"check {i} ok"}}"#));
        log.push('\n');
    }
    let result = ExecutionResult::with_status(ExecutionStatus::Passed);
    log.push_str(
        &serde_json::json!({"type": "result", "result": result}).to_string(),
    );
    log.push('\n');
    log.into_bytes()
}

fn bench_parse_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_result");
    let parser = JsonLinesParser;

    for lines in [10, 1_000] {
        let log = runner_log(lines);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_function(format!("{lines}_lines"), |b| {
            b.iter(|| parser.parse_result(black_box(&log)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_job_spec, bench_parse_result);
criterion_main!(benches);
