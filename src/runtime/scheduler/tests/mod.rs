//! Scheduler 单元测试
//!
//! 不运行任何模块主体，只模拟加载器对 `Step` 的处理


use tokio::sync::oneshot;

use crate::module::{Exports, LoadError, ModuleGraph, ModuleId, ModuleState};
use crate::runtime::scheduler::{Scheduler, StallOutcome, Step};

fn script(
    graph: &mut ModuleGraph,
    name: &str,
) -> ModuleId {
    graph.insert_script(name, vec!["/lib/".to_string()], None).unwrap()
}

fn expect_fetch(step: Step) -> (ModuleId, String) {
    match step {
        Step::Fetch { id, location } => (id, location),
        _ => panic!("expected a fetch step"),
    }
}

/// `caller` requires `target` and suspends.
fn require(
    scheduler: &mut Scheduler,
    graph: &mut ModuleGraph,
    caller: ModuleId,
    target: ModuleId,
) -> oneshot::Receiver<Result<(), LoadError>> {
    graph.add_edge(caller, target).unwrap();
    let (tx, rx) = oneshot::channel();
    scheduler.suspend(graph, caller, target, tx);
    rx
}

#[cfg(test)]
mod enqueue_tests {
    use super::*;

    #[test]
    fn test_enqueue_marks_queued_once() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = script(&mut graph, "a.js");

        assert!(scheduler.enqueue(&mut graph, a));
        assert!(!scheduler.enqueue(&mut graph, a));
        assert_eq!(graph.get(a).unwrap().state(), ModuleState::Queued);
        assert_eq!(scheduler.queue().len(), 1);
    }

    #[test]
    fn test_enqueue_skips_entry_and_loading() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let entry = graph.insert_entry();
        assert!(!scheduler.enqueue(&mut graph, entry));

        let a = script(&mut graph, "a.js");
        scheduler.enqueue(&mut graph, a);
        expect_fetch(scheduler.next(&mut graph));
        assert!(scheduler.is_loading(a));
        assert!(!scheduler.enqueue(&mut graph, a));
    }
}

#[cfg(test)]
mod next_tests {
    use super::*;

    #[test]
    fn test_empty_queue_is_idle() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        assert!(matches!(scheduler.next(&mut graph), Step::Idle));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_fetch_records_attempt() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = script(&mut graph, "a.js");
        scheduler.enqueue(&mut graph, a);

        let (id, location) = expect_fetch(scheduler.next(&mut graph));
        assert_eq!(id, a);
        assert_eq!(location, "/lib/a.js");
        assert_eq!(graph.get(a).unwrap().attempts(), 1);
        assert_eq!(graph.get(a).unwrap().state(), ModuleState::Loading);
        assert!(matches!(scheduler.next(&mut graph), Step::Idle));
    }

    #[test]
    fn test_suspended_caller_resumes_after_dependency() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let x = script(&mut graph, "x.js");
        let y = script(&mut graph, "y.js");
        scheduler.enqueue(&mut graph, x);
        expect_fetch(scheduler.next(&mut graph));

        let _rx = require(&mut scheduler, &mut graph, x, y);
        assert_eq!(scheduler.queue().iter().collect::<Vec<_>>(), vec![y, x]);

        let (id, _) = expect_fetch(scheduler.next(&mut graph));
        assert_eq!(id, y);
        // y is in flight, x is blocked: waiting, not stalled
        assert!(matches!(scheduler.next(&mut graph), Step::Waiting));

        assert!(scheduler.finish(&mut graph, y));
        match scheduler.next(&mut graph) {
            Step::Resume { id, .. } => assert_eq!(id, x),
            _ => panic!("expected x to resume"),
        }
        assert!(scheduler.finish(&mut graph, x));
        assert_eq!(scheduler.load_order(), &[y, x]);
    }

    #[test]
    fn test_parallel_requires_resume_together() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let x = script(&mut graph, "x.js");
        let y = script(&mut graph, "y.js");
        let z = script(&mut graph, "z.js");
        scheduler.enqueue(&mut graph, x);
        expect_fetch(scheduler.next(&mut graph));

        let mut first = require(&mut scheduler, &mut graph, x, y);
        let mut second = require(&mut scheduler, &mut graph, x, z);
        assert_eq!(scheduler.queue().iter().filter(|&id| id == x).count(), 1);

        expect_fetch(scheduler.next(&mut graph));
        expect_fetch(scheduler.next(&mut graph));
        assert!(scheduler.finish(&mut graph, y));
        assert!(matches!(scheduler.next(&mut graph), Step::Waiting));
        assert!(scheduler.finish(&mut graph, z));

        match scheduler.next(&mut graph) {
            Step::Resume { id, continuations } => {
                assert_eq!(id, x);
                assert_eq!(continuations.len(), 2);
                for continuation in continuations {
                    continuation.send(Ok(())).unwrap();
                }
            }
            _ => panic!("expected x to resume"),
        }
        assert_eq!(first.try_recv().unwrap(), Ok(()));
        assert_eq!(second.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_ready_entries_keep_fifo_order() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let ids: Vec<_> = ["c.js", "a.js", "b.js"]
            .iter()
            .map(|name| script(&mut graph, name))
            .collect();
        for &id in &ids {
            scheduler.enqueue(&mut graph, id);
        }
        let started: Vec<_> = (0..3).map(|_| expect_fetch(scheduler.next(&mut graph)).0).collect();
        assert_eq!(started, ids);
    }

    #[test]
    fn test_factory_receives_dependency_exports() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let dep = script(&mut graph, "dep.js");
        let def = graph.insert_defined(Some("def.js"));
        graph.add_edge(def, dep).unwrap();
        scheduler.register_factory(def, vec![dep, dep], Box::new(|args| Ok(args[0].clone())));
        scheduler.enqueue(&mut graph, dep);
        scheduler.enqueue(&mut graph, def);

        expect_fetch(scheduler.next(&mut graph));
        graph.get(dep).unwrap().partial_exports().set("v", 1);
        scheduler.finish(&mut graph, dep);

        match scheduler.next(&mut graph) {
            Step::RunFactory { id, factory, args } => {
                assert_eq!(id, def);
                assert_eq!(args.len(), 2);
                let exports: Exports = factory(&args[..]).unwrap();
                assert_eq!(exports.get("v"), Some(serde_json::json!(1)));
            }
            _ => panic!("expected the factory to run"),
        }
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_failure_propagates_to_suspended_callers() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = script(&mut graph, "a.js");
        let b = script(&mut graph, "b.js");
        let c = script(&mut graph, "c.js");
        scheduler.enqueue(&mut graph, a);
        scheduler.enqueue(&mut graph, c);
        expect_fetch(scheduler.next(&mut graph));
        let mut rx = require(&mut scheduler, &mut graph, a, b);

        let error = LoadError::execution("/lib/b.js", "boom");
        let failed = scheduler.fail(&mut graph, b, error.clone());
        assert_eq!(failed, vec![b, a]);
        assert_eq!(graph.get(a).unwrap().error(), Some(&error));
        assert_eq!(rx.try_recv().unwrap(), Err(error));

        // unrelated branch survives
        assert_eq!(graph.get(c).unwrap().state(), ModuleState::Queued);
        assert_eq!(expect_fetch(scheduler.next(&mut graph)).0, c);
    }

    #[test]
    fn test_failure_wakes_every_pending_require() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = script(&mut graph, "a.js");
        let b = script(&mut graph, "b.js");
        let c = script(&mut graph, "c.js");
        scheduler.enqueue(&mut graph, a);
        expect_fetch(scheduler.next(&mut graph));
        let mut on_b = require(&mut scheduler, &mut graph, a, b);
        let mut on_c = require(&mut scheduler, &mut graph, a, c);

        let error = LoadError::execution("/lib/c.js", "boom");
        assert_eq!(scheduler.fail(&mut graph, c, error.clone()), vec![c, a]);
        assert_eq!(on_b.try_recv().unwrap(), Err(error.clone()));
        assert_eq!(on_c.try_recv().unwrap(), Err(error));
    }

    #[test]
    fn test_retry_goes_to_front() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = graph
            .insert_script("a.js", vec!["/one/".to_string(), "/two/".to_string()], None)
            .unwrap();
        let b = script(&mut graph, "b.js");
        scheduler.enqueue(&mut graph, a);
        scheduler.enqueue(&mut graph, b);
        expect_fetch(scheduler.next(&mut graph));

        assert!(graph.advance_candidate(a).unwrap());
        scheduler.retry(&mut graph, a);
        let (id, location) = expect_fetch(scheduler.next(&mut graph));
        assert_eq!(id, a);
        assert_eq!(location, "/two/a.js");
        assert_eq!(graph.get(a).unwrap().attempts(), 2);
    }

    #[test]
    fn test_watchers_are_notified() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let a = script(&mut graph, "a.js");
        let mut rx = scheduler.watch(a);
        scheduler.enqueue(&mut graph, a);
        expect_fetch(scheduler.next(&mut graph));
        scheduler.finish(&mut graph, a);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }
}

#[cfg(test)]
mod stall_tests {
    use super::*;

    /// a requires b, b requires a.
    fn two_cycle(
        scheduler: &mut Scheduler,
        graph: &mut ModuleGraph,
    ) -> (ModuleId, ModuleId) {
        let a = script(graph, "a.js");
        let b = script(graph, "b.js");
        scheduler.enqueue(graph, a);
        expect_fetch(scheduler.next(graph));
        require(scheduler, graph, a, b);
        expect_fetch(scheduler.next(graph));
        require(scheduler, graph, b, a);
        (a, b)
    }

    #[test]
    fn test_stall_seed_is_last_requester() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let (_, b) = two_cycle(&mut scheduler, &mut graph);
        match scheduler.next(&mut graph) {
            Step::Stall { seed } => assert_eq!(seed, b),
            _ => panic!("expected a stall"),
        }
    }

    #[test]
    fn test_cycle_is_broken_at_last_node() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let (a, b) = two_cycle(&mut scheduler, &mut graph);

        match scheduler.resolve_stall(&mut graph, b, false) {
            StallOutcome::Broken { cycles, granted } => {
                assert_eq!(cycles.len(), 1);
                assert_eq!(granted, vec![(a, b)]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(scheduler.take_rerun());
        assert!(graph.get(a).unwrap().is_allowed_partial(b));
        match scheduler.next(&mut graph) {
            Step::Resume { id, .. } => assert_eq!(id, a),
            _ => panic!("expected a to resume"),
        }
    }

    #[test]
    fn test_throw_mode_fails_cycle_members() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let (a, b) = two_cycle(&mut scheduler, &mut graph);

        match scheduler.resolve_stall(&mut graph, b, true) {
            StallOutcome::Thrown { cycle, failed } => {
                assert_eq!(cycle.members(), &[b, a]);
                assert_eq!(failed, vec![b, a]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let expected = LoadError::CyclicDependency {
            cycle: vec!["b.js".to_string(), "a.js".to_string()],
        };
        assert_eq!(graph.get(a).unwrap().error(), Some(&expected));
        assert!(scheduler.queue().is_empty());
    }

    #[test]
    fn test_no_cycle_is_deadlock() {
        let mut graph = ModuleGraph::new();
        let mut scheduler = Scheduler::new();
        let orphan = graph.insert_defined(Some("orphan.js"));
        scheduler.enqueue(&mut graph, orphan);

        let seed = match scheduler.next(&mut graph) {
            Step::Stall { seed } => seed,
            _ => panic!("expected a stall"),
        };
        match scheduler.resolve_stall(&mut graph, seed, false) {
            StallOutcome::Deadlock { failed } => assert_eq!(failed, vec![orphan]),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            graph.get(orphan).unwrap().error(),
            Some(LoadError::Deadlock { .. })
        ));
    }

    #[test]
    fn test_reentrant_pump_requests_rerun() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.begin_pump());
        assert!(!scheduler.begin_pump());
        assert!(scheduler.take_rerun());
        assert!(!scheduler.take_rerun());
        scheduler.end_pump();
        assert!(scheduler.begin_pump());
    }
}
