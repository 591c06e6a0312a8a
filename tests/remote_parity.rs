mod common;

use backoffice_sync::{ClientPatch, FilterSortSpec};
use common::{draft, loaded_store};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Update(usize, String),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[A-Za-z]{1,12}".prop_map(Op::Create),
        (any::<usize>(), "[A-Za-z]{1,12}").prop_map(|(i, name)| Op::Update(i, name)),
        any::<usize>().prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Once every operation settles, the visible list matches the server.
    #[test]
    fn settled_view_matches_remote(ops in prop::collection::vec(op(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let (remote, store) = loaded_store(&["Ada", "Bo"]).await;
            let all = FilterSortSpec::all();
            let grace = store.config().grace_window();

            for op in ops {
                let visible = store.visible_snapshot(&all);
                match op {
                    Op::Create(name) => {
                        store.create(draft(&name)).await.unwrap();
                    }
                    Op::Update(i, name) if !visible.is_empty() => {
                        let target = visible[i % visible.len()].id.clone();
                        store.update(target, ClientPatch::name(name)).await.unwrap();
                    }
                    Op::Remove(i) if !visible.is_empty() => {
                        let target = visible[i % visible.len()].id.clone();
                        store.remove(target).unwrap();
                        tokio::time::sleep(grace + Duration::from_millis(1)).await;
                        tokio::task::yield_now().await;
                    }
                    Op::Update(..) | Op::Remove(_) => {}
                }

                prop_assert_eq!(store.visible_snapshot(&all), remote.server().records());
                prop_assert!(store.snapshot().entities().all(|c| !c.id.is_provisional()));
            }
            Ok(())
        })?;
    }
}
