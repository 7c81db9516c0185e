use std::time::{Duration, Instant};

use copernicus::command::CommandId;
use copernicus::heartbeat::{Heartbeat, HeartbeatItem, HeartbeatTracker};
use proptest::prelude::*;

fn heartbeat_strategy() -> impl Strategy<Value = Heartbeat> {
    (
        0u8..3,
        proptest::collection::vec((0u8..8, proptest::option::of(0u8..4)), 0..6),
        any::<bool>(),
        proptest::option::of(1u64..6),
    )
        .prop_map(|(worker, items, shutdown, interval_secs)| Heartbeat {
            worker_id: format!("w{worker}"),
            server_name: "localhost".into(),
            items: items
                .into_iter()
                .map(|(cmd, dir)| HeartbeatItem {
                    cmd_id: CommandId::from(format!("k{cmd}").as_str()),
                    run_dir: dir.map(|d| format!("/scratch/{d}")),
                })
                .collect(),
            shutdown,
            interval_secs,
        })
}

proptest! {
    #[test]
    fn replaying_the_last_heartbeat_changes_nothing(
        history in proptest::collection::vec(heartbeat_strategy(), 1..10),
    ) {
        let t = HeartbeatTracker::new();
        let start = Instant::now();
        for (i, hb) in history.iter().enumerate() {
            t.ingest(hb, start + Duration::from_secs(i as u64));
        }
        let once = t.snapshot();

        let last = history.len() - 1;
        t.ingest(&history[last], start + Duration::from_secs(last as u64));
        prop_assert_eq!(t.snapshot(), once);
    }

    #[test]
    fn sweep_leaves_only_commands_within_their_timeout(
        history in proptest::collection::vec(heartbeat_strategy(), 1..10),
        default_secs in 1u64..5,
        factor in 1u32..4,
    ) {
        let t = HeartbeatTracker::new();
        let start = Instant::now();
        for (i, hb) in history.iter().enumerate() {
            t.ingest(hb, start + Duration::from_secs(i as u64));
        }
        let before = t.snapshot();
        let now = start + Duration::from_secs(history.len() as u64 + 3);
        let default = Duration::from_secs(default_secs);
        let lost = t.sweep(now, default, factor);

        for l in &lost {
            let entry = &before[&l.cmd_id];
            prop_assert!(l.silent_for > entry.timeout(default, factor));
        }
        let after = t.snapshot();
        prop_assert!(after.values().all(|e| now.duration_since(e.last_seen) <= e.timeout(default, factor)));
        prop_assert_eq!(lost.len() + after.len(), before.len());
    }
}
