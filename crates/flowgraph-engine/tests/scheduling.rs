use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use flowgraph_core::error::FlowError;
use flowgraph_engine::{
    build_workflow, BranchStep, ExecuteOptions, Step, ValidationError, WorkflowError,
};
use flowgraph_test_utils::Probe;

/// A step that records start/finish on the probe, sleeps, then returns `output`.
fn timed(probe: &Arc<Probe>, name: &'static str, ms: u64, output: serde_json::Value) -> Step {
    let probe = probe.clone();
    Step::generic(name, move |_, _| {
        let probe = probe.clone();
        let output = output.clone();
        async move {
            probe.start(name);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            probe.finish(name);
            Ok(output)
        }
    })
}

fn failing(probe: &Arc<Probe>, name: &'static str, ms: u64) -> Step {
    let probe = probe.clone();
    Step::generic(name, move |_, _| {
        let probe = probe.clone();
        async move {
            probe.start(name);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            probe.finish(name);
            Err(FlowError::step(format!("{} could not parse input", name)))
        }
    })
}

fn etl_steps() -> Vec<Step> {
    vec![
        Step::generic("fetch", |input, _| async move {
            Ok(json!({ "rows": input["rows"].clone() }))
        }),
        Step::generic("transform", |_, ctx| async move {
            let fetched = ctx
                .output("fetch")
                .ok_or_else(|| FlowError::step("fetch output missing"))?;
            let doubled: Vec<i64> = fetched["rows"]
                .as_array()
                .map(|rows| rows.iter().filter_map(|r| r.as_i64()).map(|r| r * 2).collect())
                .unwrap_or_default();
            Ok(json!(doubled))
        })
        .after("fetch"),
        Step::generic("save", |_, ctx| async move {
            let rows = ctx
                .output("transform")
                .ok_or_else(|| FlowError::step("transform output missing"))?;
            let total: i64 = rows
                .as_array()
                .map(|r| r.iter().filter_map(|v| v.as_i64()).sum())
                .unwrap_or(0);
            Ok(json!({ "saved": total }))
        })
        .after("transform"),
    ]
}

#[tokio::test]
async fn test_linear_chain_records_in_order() {
    let wf = build_workflow("etl", etl_steps()).unwrap();
    let result = wf
        .execute(json!({"rows": [1, 2, 3]}), ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(result.completion_order(), vec!["fetch", "transform", "save"]);
    assert_eq!(result.output("transform"), Some(&json!([2, 4, 6])));
    assert_eq!(result.output("save"), Some(&json!({"saved": 12})));
    assert_eq!(
        result
            .step_results
            .iter()
            .map(|r| r.step.as_str())
            .collect::<Vec<_>>(),
        vec!["fetch", "transform", "save"]
    );
}

#[tokio::test]
async fn test_diamond_runs_middle_steps_concurrently() {
    let probe = Arc::new(Probe::new());
    let wf = build_workflow(
        "diamond",
        vec![
            timed(&probe, "source", 5, json!("src")),
            timed(&probe, "stats", 80, json!("stats")).after("source"),
            timed(&probe, "transform", 80, json!("transformed")).after("source"),
            timed(&probe, "report", 5, json!("report"))
                .after("stats")
                .after("transform"),
        ],
    )
    .unwrap();

    let result = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap();
    assert_eq!(result.outputs.len(), 4);

    assert!(probe.overlapped("stats", "transform"));
    let report_start = probe.started("report").unwrap();
    assert!(report_start >= probe.finished("stats").unwrap());
    assert!(report_start >= probe.finished("transform").unwrap());
    assert!(probe.started("stats").unwrap() >= probe.finished("source").unwrap());
    assert_eq!(result.completion_order().first(), Some(&"source"));
    assert_eq!(result.completion_order().last(), Some(&"report"));
}

#[tokio::test]
async fn test_fail_fast_in_diamond() {
    let probe = Arc::new(Probe::new());
    let wf = build_workflow(
        "diamond",
        vec![
            timed(&probe, "source", 5, json!("src")),
            timed(&probe, "stats", 80, json!("stats")).after("source"),
            failing(&probe, "transform", 10).after("source"),
            timed(&probe, "report", 5, json!("report"))
                .after("stats")
                .after("transform"),
        ],
    )
    .unwrap();

    let err = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap_err();
    match &err {
        WorkflowError::StepExecution { step, source } => {
            assert_eq!(step, "transform");
            assert!(source.to_string().contains("could not parse input"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(!probe.ran("report"));
    assert!(probe.ran("stats"));
    assert!(probe.finished("stats").is_some());
}

#[tokio::test]
async fn test_failure_stops_new_launches() {
    let probe = Arc::new(Probe::new());
    let wf = build_workflow(
        "chain",
        vec![
            failing(&probe, "first", 5),
            timed(&probe, "slow_sibling", 60, json!(1)),
            timed(&probe, "after_sibling", 1, json!(2)).after("slow_sibling"),
        ],
    )
    .unwrap();

    let err = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap_err();
    assert_eq!(err.step(), Some("first"));
    assert!(probe.finished("slow_sibling").is_some());
    assert!(!probe.ran("after_sibling"));
}

#[tokio::test]
async fn test_first_failure_wins() {
    let probe = Arc::new(Probe::new());
    let wf = build_workflow(
        "both_fail",
        vec![failing(&probe, "early", 5), failing(&probe, "late", 60)],
    )
    .unwrap();

    let err = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap_err();
    assert_eq!(err.step(), Some("early"));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_step_runs() {
    let probe = Arc::new(Probe::new());
    let err = build_workflow(
        "cyclic",
        vec![
            timed(&probe, "a", 1, json!(null)).after("b"),
            timed(&probe, "b", 1, json!(null)).after("a"),
        ],
    )
    .unwrap_err();

    assert_eq!(
        err,
        ValidationError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()]
        }
    );
    assert!(!probe.ran("a"));
    assert!(!probe.ran("b"));
}

#[tokio::test]
async fn test_long_chain_builds_and_runs() {
    let len = 50_000;
    let steps: Vec<Step> = (0..len)
        .rev()
        .map(|i| {
            let step = Step::generic(format!("s{}", i), move |_, _| async move { Ok(json!(i)) });
            if i == 0 {
                step
            } else {
                step.after(format!("s{}", i - 1))
            }
        })
        .collect();

    let wf = build_workflow("long", steps).unwrap();
    assert_eq!(wf.entry_steps(), vec!["s0"]);
    assert_eq!(wf.topological_order().len(), len);

    let result = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap();
    assert_eq!(result.outputs.len(), len);
    assert_eq!(result.completion_order().last(), Some(&"s49999"));
}

#[test]
fn test_unknown_dependency_rejected() {
    let err = build_workflow(
        "broken",
        vec![Step::generic("save", |_, _| async { Ok(json!(null)) }).after("transform")],
    )
    .unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownDependency {
            step: "save".into(),
            dependency: "transform".into()
        }
    );
}

#[tokio::test]
async fn test_rebuild_and_rerun_are_idempotent() {
    let first = build_workflow("etl", etl_steps()).unwrap();
    let second = build_workflow("etl", etl_steps()).unwrap();
    assert_eq!(first.step_names(), second.step_names());

    let cyclic = || {
        vec![
            Step::generic("a", |_, _| async { Ok(json!(null)) }).after("b"),
            Step::generic("b", |_, _| async { Ok(json!(null)) }).after("a"),
        ]
    };
    assert_eq!(
        build_workflow("c", cyclic()).unwrap_err(),
        build_workflow("c", cyclic()).unwrap_err()
    );

    let input = json!({"rows": [5, 7]});
    let run_a = first.execute(input.clone(), ExecuteOptions::new()).await.unwrap();
    let run_b = first.execute(input.clone(), ExecuteOptions::new()).await.unwrap();
    let run_c = second.execute(input, ExecuteOptions::new()).await.unwrap();
    assert_eq!(run_a.outputs, run_b.outputs);
    assert_eq!(run_a.outputs, run_c.outputs);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let wf = build_workflow("etl", etl_steps()).unwrap();
    let (a, b) = tokio::join!(
        wf.execute(json!({"rows": [1]}), ExecuteOptions::new()),
        wf.execute(json!({"rows": [10, 20]}), ExecuteOptions::new()),
    );
    assert_eq!(a.unwrap().output("save"), Some(&json!({"saved": 2})));
    assert_eq!(b.unwrap().output("save"), Some(&json!({"saved": 60})));
}

#[tokio::test]
async fn test_branch_skips_unselected_path() {
    let probe = Arc::new(Probe::new());
    let wf = build_workflow(
        "router",
        vec![
            Step::branch(
                "route",
                BranchStep::new(["X", "Y"], |input, _| {
                    Ok(input["route"].as_str().unwrap_or("X").to_string())
                }),
            ),
            timed(&probe, "on_x", 1, json!("x ran")).on_branch("route", "X"),
            timed(&probe, "on_y", 1, json!("y ran")).on_branch("route", "Y"),
            timed(&probe, "after_y", 1, json!("after y")).after("on_y"),
        ],
    )
    .unwrap();

    let result = wf.execute(json!({"route": "X"}), ExecuteOptions::new()).await.unwrap();
    assert_eq!(result.output("route"), Some(&json!("X")));
    assert_eq!(result.output("on_x"), Some(&json!("x ran")));
    assert!(probe.ran("on_x"));
    assert!(!probe.ran("on_y"));
    assert!(!probe.ran("after_y"));
    assert!(result.was_skipped("on_y"));
    assert!(result.was_skipped("after_y"));

    let probe_y = Arc::new(Probe::new());
    let wf_y = build_workflow(
        "router",
        vec![
            Step::branch(
                "route",
                BranchStep::new(["X", "Y"], |input, _| {
                    Ok(input["route"].as_str().unwrap_or("X").to_string())
                }),
            ),
            timed(&probe_y, "on_x", 1, json!("x ran")).on_branch("route", "X"),
            timed(&probe_y, "on_y", 1, json!("y ran")).on_branch("route", "Y"),
        ],
    )
    .unwrap();
    let result = wf_y.execute(json!({"route": "Y"}), ExecuteOptions::new()).await.unwrap();
    assert!(probe_y.ran("on_y"));
    assert!(!probe_y.ran("on_x"));
    assert_eq!(result.skipped, vec!["on_x".to_string()]);
}

#[tokio::test]
async fn test_undeclared_branch_label_fails_step() {
    let wf = build_workflow(
        "router",
        vec![Step::branch(
            "route",
            BranchStep::new(["X", "Y"], |_, _| Ok("Z".to_string())),
        )],
    )
    .unwrap();

    let err = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::StepExecution {
            source: FlowError::UnknownBranchLabel { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_steps_only_see_completed_outputs() {
    let wf = build_workflow(
        "visibility",
        vec![
            timed(&Arc::new(Probe::new()), "slow", 50, json!("late")),
            Step::generic("peek", |_, ctx| async move {
                Ok(json!({ "saw_slow": ctx.output("slow").is_some() }))
            }),
        ],
    )
    .unwrap();

    let result = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap();
    assert_eq!(result.output("peek"), Some(&json!({"saw_slow": false})));
}
