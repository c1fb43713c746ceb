//! Property tests for DAG readiness and block propagation.

use std::collections::HashSet;

use forgeloop::domain::errors::DomainError;
use forgeloop::domain::models::{Plan, TaskDescriptor, TaskStatus};
use forgeloop::services::{DagBuilder, PlanState};
use proptest::prelude::*;
use uuid::Uuid;

/// Random acyclic shapes: task `i` may depend on any task `j < i`.
fn acyclic_shape() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(any::<bool>(), n), n).prop_map(move |matrix| {
            matrix
                .iter()
                .enumerate()
                .map(|(i, row)| (0..i).filter(|&j| row[j]).collect())
                .collect()
        })
    })
}

fn descriptors(shape: &[Vec<usize>]) -> Vec<TaskDescriptor> {
    shape
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            deps.iter().fold(TaskDescriptor::new(format!("t{i}"), format!("task {i}")), |d, j| {
                d.depends_on(format!("t{j}"))
            })
        })
        .collect()
}

fn plan_state(shape: &[Vec<usize>]) -> PlanState {
    let plan = Plan::new("property");
    let dag = DagBuilder::new(3).build(plan.id, &descriptors(shape)).unwrap();
    PlanState::new(plan, dag.into_tasks())
}

/// Indices that transitively depend on `root`.
fn dependents(shape: &[Vec<usize>], root: usize) -> HashSet<usize> {
    let mut found = HashSet::new();
    let mut frontier = vec![root];
    while let Some(node) = frontier.pop() {
        for (i, deps) in shape.iter().enumerate() {
            if deps.contains(&node) && found.insert(i) {
                frontier.push(i);
            }
        }
    }
    found
}

fn check_readiness(state: &PlanState) {
    for task in state.tasks() {
        let deps_done = task
            .depends_on
            .iter()
            .all(|d| state.task(*d).is_some_and(|t| t.status == TaskStatus::Succeeded));
        match task.status {
            TaskStatus::Ready | TaskStatus::Running | TaskStatus::Succeeded => {
                assert!(deps_done, "{} is {} before its dependencies", task.key, task.status);
            }
            TaskStatus::Pending => assert!(!deps_done, "{} was left pending", task.key),
            TaskStatus::Failed | TaskStatus::Blocked => {}
        }
    }
}

proptest! {
    #[test]
    fn ready_only_after_all_dependencies_succeed(
        shape in acyclic_shape(),
        choices in prop::collection::vec(any::<bool>(), 64),
    ) {
        let mut state = plan_state(&shape);
        let mut pick = choices.iter().cycle();

        for _ in 0..=shape.len() {
            state.advance();
            check_readiness(&state);
            for id in state.ready() {
                if *pick.next().unwrap_or(&true) {
                    state.start(id).unwrap();
                    state.succeed(id).unwrap();
                }
            }
        }
        // Completing every ready task eventually completes the plan
        loop {
            state.advance();
            check_readiness(&state);
            let ready = state.ready();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                state.start(id).unwrap();
                state.succeed(id).unwrap();
            }
        }
        prop_assert!(state.tasks().iter().all(|t| t.status == TaskStatus::Succeeded));
    }

    #[test]
    fn block_covers_exactly_the_transitive_dependents(
        shape in acyclic_shape(),
        root in any::<prop::sample::Index>(),
    ) {
        let mut state = plan_state(&shape);
        let root = root.index(shape.len());
        let ids: Vec<Uuid> = state.tasks().iter().map(|t| t.id).collect();

        let blocked = state.block(ids[root], "budget exhausted").unwrap();

        prop_assert_eq!(blocked[0], ids[root]);
        let blocked: HashSet<Uuid> = blocked.into_iter().collect();
        let mut expected: HashSet<Uuid> = dependents(&shape, root).into_iter().map(|i| ids[i]).collect();
        expected.insert(ids[root]);
        prop_assert_eq!(&blocked, &expected);

        for task in state.tasks() {
            if expected.contains(&task.id) {
                prop_assert_eq!(task.status, TaskStatus::Blocked);
                prop_assert!(task.blocked_reason.is_some());
            } else {
                prop_assert_ne!(task.status, TaskStatus::Blocked);
            }
        }
    }

    #[test]
    fn cycles_are_rejected(shape in acyclic_shape(), len in 2usize..6) {
        // A chain t0 <- t1 <- ... closed back onto t0, plus unrelated extras.
        let offset = shape.len();
        let mut descriptors = descriptors(&shape);
        for k in 0..len {
            let prev = if k == 0 { len - 1 } else { k - 1 };
            descriptors.push(
                TaskDescriptor::new(format!("c{}", offset + k), "cycle member")
                    .depends_on(format!("c{}", offset + prev)),
            );
        }

        let result = DagBuilder::new(3).build(Uuid::new_v4(), &descriptors);
        prop_assert!(matches!(result, Err(DomainError::DependencyCycle(_))));
    }
}
