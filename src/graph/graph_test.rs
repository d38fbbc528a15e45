use super::*;
use crate::graph::GraphGenerator;
use crate::model::{Flow, Step, StepBody, Trigger};
use std::collections::HashMap;

fn exec_step(id: &str, use_: &str) -> Step {
    Step {
        id: id.to_string().into(),
        body: StepBody::Exec {
            use_: use_.to_string(),
            with: HashMap::new(),
        },
        ..Default::default()
    }
}

#[test]
fn test_generate_simple_flow() {
    let flow = Flow {
        name: "test".to_string(),
        description: None,
        version: None,
        on: Some(Trigger::Single("cli.manual".to_string())),
        cron: None,
        vars: None,
        steps: vec![
            exec_step("step1", "core.echo"),
            exec_step("step2", "http.fetch"),
        ],
        catch: None,
        mcp_servers: None,
    };

    let diagram = GraphGenerator::generate(&flow).unwrap();
    assert!(diagram.contains("graph TD"));
    assert!(diagram.contains("step1"));
    assert!(diagram.contains("step2"));
    assert!(diagram.contains("step1 --> step2"));
}

#[test]
fn test_generate_parallel_flow() {
    let flow = Flow {
        name: "test".to_string(),
        description: None,
        version: None,
        on: Some(Trigger::Single("cli.manual".to_string())),
        cron: None,
        vars: None,
        steps: vec![Step {
            id: "parallel_block".to_string().into(),
            body: StepBody::Parallel {
                steps: vec![
                    exec_step("task1", "core.echo"),
                    exec_step("task2", "core.echo"),
                ],
            },
            ..Default::default()
        }],
        catch: None,
        mcp_servers: None,
    };

    let diagram = GraphGenerator::generate(&flow).unwrap();
    assert!(diagram.contains("graph TD"));
    assert!(diagram.contains("parallel_block"));
    assert!(diagram.contains("task1"));
    assert!(diagram.contains("task2"));
}
