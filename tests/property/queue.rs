use std::collections::HashMap;

use copernicus::command::queue::{MAX_PRIORITY, MIN_PRIORITY};
use copernicus::command::{CmdQueue, CommandId, Selection};
use copernicus_test_utils::builders::CommandBuilder;
use proptest::prelude::*;

// (priority, project) per command; priorities reach well past the clamp.
fn commands_strategy(max: usize) -> impl Strategy<Value = Vec<(i32, u8)>> {
    proptest::collection::vec((-1000i32..=1000, 0u8..3), 0..max)
}

fn fill(q: &CmdQueue, cmds: &[(i32, u8)]) -> HashMap<CommandId, (usize, i32, String)> {
    cmds.iter()
        .enumerate()
        .map(|(i, (prio, proj))| {
            let project = format!("p{proj}");
            let id = q.add(CommandBuilder::new("mdrun").priority(*prio).project(&project).build());
            (id, (i, (*prio).clamp(MIN_PRIORITY, MAX_PRIORITY), project))
        })
        .collect()
}

proptest! {
    #[test]
    fn get_never_returns_a_lower_level_first(cmds in commands_strategy(40)) {
        let q = CmdQueue::new();
        let meta = fill(&q, &cmds);

        let mut last: Option<(i32, usize)> = None;
        while let Some(cmd) = q.get() {
            let (idx, level, _) = meta[&cmd.id];
            if let Some((prev_level, prev_idx)) = last {
                prop_assert!(level <= prev_level, "level {} after {}", level, prev_level);
                if level == prev_level {
                    prop_assert!(idx > prev_idx, "FIFO broken within level {}", level);
                }
            }
            last = Some((level, idx));
        }
        prop_assert!(q.is_empty());
    }

    #[test]
    fn out_of_range_priorities_queue_with_the_edge_level(cmds in commands_strategy(30)) {
        let q = CmdQueue::new();
        let meta = fill(&q, &cmds);
        let huge = q.add(CommandBuilder::new("mdrun").priority(1000).build());

        let order: Vec<_> = std::iter::from_fn(|| q.get()).map(|c| c.id).collect();
        let pos = order.iter().position(|id| id == &huge).unwrap();
        let top = order.iter().filter(|id| meta.get(*id).is_some_and(|m| m.1 == MAX_PRIORITY)).count();
        prop_assert_eq!(pos, top, "after every earlier top-level command and no later");
    }

    #[test]
    fn delete_by_project_removes_exactly_that_project(cmds in commands_strategy(40)) {
        let q = CmdQueue::new();
        let meta = fill(&q, &cmds);
        let removed = q.delete_by_project("p1");

        prop_assert!(removed.iter().all(|c| c.project() == Some("p1")));
        prop_assert!(q.list().iter().all(|c| c.project() != Some("p1")));
        prop_assert_eq!(removed.len() + q.size(), meta.len());
    }

    #[test]
    fn get_until_keeps_the_order_of_what_it_leaves(
        cmds in commands_strategy(40),
        picks in proptest::collection::vec(any::<bool>(), 40),
    ) {
        let q = CmdQueue::new();
        fill(&q, &cmds);
        let before: Vec<_> = q.list().into_iter().map(|c| c.id).collect();

        let mut i = 0;
        let taken: Vec<_> = q
            .get_until(|_| {
                let take = picks[i];
                i += 1;
                if take { Selection::TAKE } else { Selection::SKIP }
            })
            .into_iter()
            .map(|c| c.id)
            .collect();
        let left: Vec<_> = q.list().into_iter().map(|c| c.id).collect();

        let expect_left: Vec<_> = before.iter().filter(|id| !taken.contains(id)).cloned().collect();
        prop_assert_eq!(left, expect_left);
        let expect_taken: Vec<_> = before.iter().filter(|id| taken.contains(id)).cloned().collect();
        prop_assert_eq!(taken, expect_taken);
    }
}
