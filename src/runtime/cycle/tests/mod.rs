//! 环检测单元测试

use crate::module::{ModuleGraph, ModuleId, ModuleState};
use crate::runtime::cycle::{Cycle, CycleResolver};

fn graph_with(names: &[&str]) -> (ModuleGraph, Vec<ModuleId>) {
    let mut graph = ModuleGraph::new();
    let ids = names
        .iter()
        .map(|name| graph.insert_script(name, vec!["/".to_string()], None).unwrap())
        .collect();
    (graph, ids)
}

#[cfg(test)]
mod cycle_tests {
    use super::*;

    #[test]
    fn test_canonical_rotation() {
        let cycle = Cycle::new(vec![ModuleId(3), ModuleId(1), ModuleId(2)]);
        assert_eq!(cycle.canonical(), vec![ModuleId(1), ModuleId(2), ModuleId(3)]);

        let rotated = Cycle::new(vec![ModuleId(2), ModuleId(3), ModuleId(1)]);
        assert_eq!(cycle.canonical(), rotated.canonical());
    }

    #[test]
    fn test_break_edge_is_last_to_first() {
        let cycle = Cycle::new(vec![ModuleId(4), ModuleId(7), ModuleId(5)]);
        assert_eq!(cycle.break_edge(), Some((ModuleId(5), ModuleId(4))));
        assert_eq!(Cycle::new(Vec::new()).break_edge(), None);
    }

    #[test]
    fn test_display() {
        let cycle = Cycle::new(vec![ModuleId(0), ModuleId(1)]);
        assert_eq!(cycle.to_string(), "M0 -> M1");
    }
}

#[cfg(test)]
mod resolver_tests {
    use super::*;

    #[test]
    fn test_no_cycle_in_chain() {
        let (mut graph, ids) = graph_with(&["x.js", "y.js", "z.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[2]).unwrap();

        assert!(CycleResolver::new(&graph).find_cycles(ids[0]).is_empty());
    }

    #[test]
    fn test_two_cycle_from_seed() {
        let (mut graph, ids) = graph_with(&["a.js", "b.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[0]).unwrap();

        let cycles = CycleResolver::new(&graph).find_cycles(ids[1]);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].members(), &[ids[1], ids[0]]);
        assert_eq!(cycles[0].break_edge(), Some((ids[0], ids[1])));
        assert_eq!(cycles[0].names(&graph), vec!["b.js", "a.js"]);
    }

    #[test]
    fn test_rotations_are_deduplicated() {
        // a -> b -> c -> a, plus c -> b: two distinct cycles
        let (mut graph, ids) = graph_with(&["a.js", "b.js", "c.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[2]).unwrap();
        graph.add_edge(ids[2], ids[0]).unwrap();
        graph.add_edge(ids[2], ids[1]).unwrap();

        let cycles = CycleResolver::new(&graph).find_cycles(ids[0]);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].members(), &[ids[0], ids[1], ids[2]]);
        assert_eq!(cycles[1].members(), &[ids[1], ids[2]]);
    }

    #[test]
    fn test_all_reachable_cycles_are_found() {
        // seed -> a <-> b, seed -> c <-> d
        let (mut graph, ids) = graph_with(&["seed.js", "a.js", "b.js", "c.js", "d.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[2]).unwrap();
        graph.add_edge(ids[2], ids[1]).unwrap();
        graph.add_edge(ids[0], ids[3]).unwrap();
        graph.add_edge(ids[3], ids[4]).unwrap();
        graph.add_edge(ids[4], ids[3]).unwrap();

        let cycles = CycleResolver::new(&graph).find_cycles(ids[0]);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].members(), &[ids[1], ids[2]]);
        assert_eq!(cycles[1].members(), &[ids[3], ids[4]]);
    }

    #[test]
    fn test_partial_edges_are_not_followed() {
        let (mut graph, ids) = graph_with(&["a.js", "b.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[0]).unwrap();
        graph.allow_partial(ids[1], ids[0]);

        assert!(CycleResolver::new(&graph).find_cycles(ids[0]).is_empty());
    }

    #[test]
    fn test_terminal_modules_are_skipped() {
        let (mut graph, ids) = graph_with(&["a.js", "b.js"]);
        graph.add_edge(ids[0], ids[1]).unwrap();
        graph.add_edge(ids[1], ids[0]).unwrap();
        graph.get_mut(ids[1]).unwrap().advance(ModuleState::Loading);
        graph.get_mut(ids[1]).unwrap().advance(ModuleState::Loaded);

        assert!(CycleResolver::new(&graph).find_cycles(ids[0]).is_empty());
    }
}
