use super::*;
use crate::{
    gateway::MemoryGateway,
    preview::PreviewItemInteractor,
    store::{Store, StoreEvent},
    testing::{spawn_foreground, Call, ScriptedGateway, WAIT},
};

async fn settle(operation: Operation) -> Result<Outcome, ClientError> {
    tokio::time::timeout(WAIT, operation)
        .await
        .expect("operation settled")
}

fn items_of(store: &Store) -> Vec<Item> {
    store.snapshot().items().to_vec()
}

#[tokio::test]
async fn create_update_delete_scenario() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let create = items.create(ItemDraft::new("milk"));
    let (draft, reply) = script.next_create().await;
    assert_eq!(draft, ItemDraft::new("milk"));
    reply
        .send(Ok(Item::new("1", "milk", false)))
        .expect("reply");
    assert_eq!(settle(create).await.expect("create"), Outcome::Applied);
    assert_eq!(items_of(&store), vec![Item::new("1", "milk", false)]);

    let update = items.update(Item::new("1", "milk", true));
    let (sent, reply) = script.next_update().await;
    reply.send(Ok(sent)).expect("reply");
    assert_eq!(settle(update).await.expect("update"), Outcome::Applied);
    assert_eq!(items_of(&store), vec![Item::new("1", "milk", true)]);

    let delete = items.delete(ItemId::from("1"));
    let (id, reply) = script.next_delete().await;
    assert_eq!(id, ItemId::from("1"));
    reply.send(Ok(())).expect("reply");
    assert_eq!(settle(delete).await.expect("delete"), Outcome::Applied);
    assert!(items_of(&store).is_empty());
}

#[tokio::test]
async fn later_issued_fetch_wins_even_when_it_arrives_first() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);
    let mut events = store.subscribe_events();

    let first = items.fetch_all();
    let first_reply = script.next_fetch().await;
    let second = items.fetch_all();
    let second_reply = script.next_fetch().await;

    let payload_b = vec![Item::new("b", "from B", false)];
    second_reply.send(Ok(payload_b.clone())).expect("reply");
    assert_eq!(settle(second).await.expect("B"), Outcome::Applied);

    first_reply
        .send(Ok(vec![Item::new("a", "from A", false)]))
        .expect("reply");
    assert_eq!(
        settle(first).await.expect("A"),
        Outcome::Ignored(IgnoreReason::StaleFetch {
            sequence: 1,
            applied: 2
        })
    );

    assert_eq!(items_of(&store), payload_b);
    assert_eq!(
        events.recv().await.expect("event"),
        StoreEvent::ItemsReplaced { count: 1 }
    );
    assert!(matches!(
        events.recv().await.expect("event"),
        StoreEvent::Ignored {
            operation: "fetch_all",
            reason: IgnoreReason::StaleFetch { .. }
        }
    ));
}

#[tokio::test]
async fn in_order_fetches_both_apply() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let first = items.fetch_all();
    script
        .next_fetch()
        .await
        .send(Ok(vec![Item::new("1", "one", false)]))
        .expect("reply");
    assert!(settle(first).await.expect("first").is_applied());

    let second = items.fetch_all();
    script
        .next_fetch()
        .await
        .send(Ok(vec![Item::new("2", "two", false)]))
        .expect("reply");
    assert!(settle(second).await.expect("second").is_applied());

    assert_eq!(items_of(&store), vec![Item::new("2", "two", false)]);
}

#[tokio::test]
async fn failed_later_fetch_does_not_block_earlier_one() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let first = items.fetch_all();
    let first_reply = script.next_fetch().await;
    let second = items.fetch_all();
    script
        .next_fetch()
        .await
        .send(Err(ClientError::Transport("timed out".into())))
        .expect("reply");
    assert!(matches!(
        settle(second).await,
        Err(ClientError::Transport(_))
    ));

    first_reply
        .send(Ok(vec![Item::new("1", "one", false)]))
        .expect("reply");
    assert!(settle(first).await.expect("first").is_applied());
    assert_eq!(items_of(&store).len(), 1);
}

#[tokio::test]
async fn update_completing_after_delete_does_not_reinsert() {
    let (store, foreground, _task) = spawn_foreground();
    foreground
        .run(|writer| writer.replace_items(vec![Item::new("1", "milk", false)]))
        .await
        .expect("seed");
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let update = items.update(Item::new("1", "x", false));
    let (_, update_reply) = script.next_update().await;

    let delete = items.delete(ItemId::from("1"));
    let (_, delete_reply) = script.next_delete().await;
    delete_reply.send(Ok(())).expect("reply");
    assert!(settle(delete).await.expect("delete").is_applied());

    update_reply
        .send(Ok(Item::new("1", "x", false)))
        .expect("reply");
    assert_eq!(
        settle(update).await.expect("update"),
        Outcome::Ignored(IgnoreReason::MissingTarget(ItemId::from("1")))
    );
    assert!(store.snapshot().item(&ItemId::from("1")).is_none());
}

#[tokio::test]
async fn delete_of_absent_id_is_not_an_error() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let delete = items.delete(ItemId::from("42"));
    script.next_delete().await.1.send(Ok(())).expect("reply");
    assert_eq!(
        settle(delete).await.expect("delete"),
        Outcome::Ignored(IgnoreReason::MissingTarget(ItemId::from("42")))
    );
    assert_eq!(store.version(), 0);
}

#[tokio::test]
async fn gateway_failure_leaves_store_unchanged() {
    let (store, foreground, _task) = spawn_foreground();
    foreground
        .run(|writer| writer.replace_items(vec![Item::new("1", "milk", false)]))
        .await
        .expect("seed");
    let version = store.version();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let update = items.update(Item::new("1", "milk", true));
    script
        .next_update()
        .await
        .1
        .send(Err(ClientError::Unauthorized))
        .expect("reply");
    assert!(matches!(settle(update).await, Err(ClientError::Unauthorized)));

    let create = items.create(ItemDraft::new("bread"));
    script
        .next_create()
        .await
        .1
        .send(Err(ClientError::Transport("offline".into())))
        .expect("reply");
    assert!(settle(create).await.is_err());

    assert_eq!(store.version(), version);
    assert_eq!(items_of(&store), vec![Item::new("1", "milk", false)]);
}

#[tokio::test]
async fn shutdown_discards_outstanding_completions() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let create = items.create(ItemDraft::new("milk"));
    let (_, reply) = script.next_create().await;
    assert_eq!(items.in_flight(), 1);
    items.shutdown();
    let _ = reply.send(Ok(Item::new("1", "milk", false)));

    assert!(matches!(settle(create).await, Err(ClientError::Cancelled)));
    assert!(items_of(&store).is_empty());
    assert!(matches!(
        settle(items.fetch_all()).await,
        Err(ClientError::Cancelled)
    ));
}

#[tokio::test]
async fn operations_return_before_the_gateway_answers() {
    let (store, foreground, _task) = spawn_foreground();
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let create = items.create(ItemDraft::new("milk"));
    let (_, reply) = script.next_create().await;
    assert!(items_of(&store).is_empty());

    reply
        .send(Ok(Item::new("1", "milk", false)))
        .expect("reply");
    settle(create).await.expect("create");
    assert_eq!(items_of(&store).len(), 1);
}

#[tokio::test]
async fn overlapping_updates_keep_the_last_issued() {
    let (store, foreground, _task) = spawn_foreground();
    foreground
        .run(|writer| writer.replace_items(vec![Item::new("1", "v0", false)]))
        .await
        .expect("seed");
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let first = items.update(Item::new("1", "v1", false));
    let (sent_first, first_reply) = script.next_update().await;
    let second = items.update(Item::new("1", "v2", false));
    let (sent_second, second_reply) = script.next_update().await;

    second_reply.send(Ok(sent_second)).expect("reply");
    assert!(settle(second).await.expect("v2").is_applied());
    first_reply.send(Ok(sent_first)).expect("reply");
    assert_eq!(
        settle(first).await.expect("v1"),
        Outcome::Ignored(IgnoreReason::StaleUpdate {
            id: ItemId::from("1"),
            sequence: 1,
            applied: 2,
        })
    );

    assert_eq!(items_of(&store), vec![Item::new("1", "v2", false)]);
}

#[tokio::test]
async fn overlapping_creates_land_in_issue_order() {
    let (store, foreground, _task) = spawn_foreground();
    foreground
        .run(|writer| writer.replace_items(vec![Item::new("0", "fetched", false)]))
        .await
        .expect("seed");
    let (gateway, mut script) = ScriptedGateway::new();
    let items = LiveItemInteractor::new(gateway, foreground);

    let a = items.create(ItemDraft::new("a"));
    let (_, a_reply) = script.next_create().await;
    let b = items.create(ItemDraft::new("b"));
    let (_, b_reply) = script.next_create().await;

    b_reply.send(Ok(Item::new("2", "b", false))).expect("reply");
    assert!(settle(b).await.expect("b").is_applied());
    a_reply.send(Ok(Item::new("1", "a", false))).expect("reply");
    assert!(settle(a).await.expect("a").is_applied());

    assert_eq!(
        items_of(&store),
        vec![
            Item::new("0", "fetched", false),
            Item::new("1", "a", false),
            Item::new("2", "b", false),
        ]
    );
}

/// Issues a burst of creates, edits and removals without waiting, answers the
/// backend calls in scrambled order, and compares with the same burst applied
/// one by one in issue order.
#[tokio::test]
async fn overlapping_mutations_settle_to_issue_order() {
    for seed in [3, 11, 58, 907] {
        let mut rng = Lcg(seed);
        let seeded: Vec<Item> = (1..=4)
            .map(|n| Item::new(format!("s{n}").as_str(), format!("seed {n}"), false))
            .collect();
        let (store, foreground, _task) = spawn_foreground();
        let initial = seeded.clone();
        foreground
            .run(move |writer| writer.replace_items(initial))
            .await
            .expect("seed");
        let (gateway, mut script) = ScriptedGateway::new();
        let items = LiveItemInteractor::new(gateway, foreground);

        let mut model = seeded.clone();
        let mut operations = Vec::new();
        for n in 0..12 {
            match rng.next() % 3 {
                0 => {
                    let body = format!("new {n}");
                    operations.push(items.create(ItemDraft::new(body.clone())));
                    model.push(Item::new(format!("c{n}").as_str(), body, false));
                }
                1 => {
                    let target = seeded[rng.next() % seeded.len()].clone();
                    let edited = Item {
                        body: format!("edit {n}"),
                        ..target
                    };
                    operations.push(items.update(edited.clone()));
                    if let Some(slot) = model.iter_mut().find(|item| item.id == edited.id) {
                        *slot = edited;
                    }
                }
                _ => {
                    let id = seeded[rng.next() % seeded.len()].id.clone();
                    operations.push(items.delete(id.clone()));
                    model.retain(|item| item.id != id);
                }
            }
        }

        let mut calls = Vec::new();
        for _ in 0..operations.len() {
            calls.push(script.next().await);
        }
        while !calls.is_empty() {
            let answered = match calls.swap_remove(rng.next() % calls.len()) {
                Call::Create(draft, reply) => {
                    let n = draft.body.trim_start_matches("new ").to_string();
                    let created = Item::new(format!("c{n}").as_str(), draft.body, false);
                    reply.send(Ok(created)).is_ok()
                }
                Call::Update(item, reply) => reply.send(Ok(item)).is_ok(),
                Call::Delete(_, reply) => reply.send(Ok(())).is_ok(),
                other => panic!("unexpected {} call", other.name()),
            };
            assert!(answered);
        }

        for operation in operations {
            settle(operation).await.expect("settled");
        }
        assert_eq!(items_of(&store), model, "seed {seed}");
    }
}

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Toggle(usize),
    Rename(usize, String),
    Delete(usize),
    DeleteUnknown,
}

/// Small deterministic generator so the sequences are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as usize
    }
}

fn ops(seed: u64, count: usize) -> Vec<Op> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|n| match rng.next() % 5 {
            0 | 1 => Op::Create(format!("item {n}")),
            2 => Op::Toggle(rng.next()),
            3 => Op::Rename(rng.next(), format!("renamed {n}")),
            _ if n % 7 == 0 => Op::DeleteUnknown,
            _ => Op::Delete(rng.next()),
        })
        .collect()
}

/// Applies `ops` through `items`, waiting for each one, and mirrors them on
/// a plain vector with the same id assignment.
async fn run_against_model(items: &dyn ItemInteractor, store: &Store, ops: &[Op]) -> Vec<Item> {
    let mut model: Vec<Item> = Vec::new();
    let mut next_id = 0u64;

    for op in ops {
        match op {
            Op::Create(body) => {
                settle(items.create(ItemDraft::new(body.clone())))
                    .await
                    .expect("create");
                next_id += 1;
                model.push(Item::new(next_id.to_string().as_str(), body.clone(), false));
            }
            Op::Toggle(pick) | Op::Rename(pick, _) if !model.is_empty() => {
                let current = model[pick % model.len()].clone();
                let updated = match op {
                    Op::Rename(_, body) => Item {
                        body: body.clone(),
                        ..current
                    },
                    _ => current.toggled(),
                };
                settle(items.update(updated.clone())).await.expect("update");
                if let Some(slot) = model.iter_mut().find(|item| item.id == updated.id) {
                    *slot = updated;
                }
            }
            Op::Delete(pick) if !model.is_empty() => {
                let id = model[pick % model.len()].id.clone();
                settle(items.delete(id.clone())).await.expect("delete");
                model.retain(|item| item.id != id);
            }
            Op::DeleteUnknown => {
                // Backend rejects unknown ids; the store must not change.
                let before = items_of(store);
                let _ = settle(items.delete(ItemId::from("missing"))).await;
                assert_eq!(items_of(store), before);
            }
            _ => {}
        }
    }
    model
}

#[tokio::test]
async fn live_interactor_matches_reference_model() {
    for seed in [1, 7, 42, 2024] {
        let (store, foreground, _task) = spawn_foreground();
        let items = LiveItemInteractor::new(Arc::new(MemoryGateway::new()), foreground);
        let model = run_against_model(&items, &store, &ops(seed, 40)).await;
        assert_eq!(items_of(&store), model, "seed {seed}");
    }
}

#[tokio::test]
async fn preview_interactor_matches_reference_model() {
    for seed in [1, 7, 42, 2024] {
        let (store, foreground, _task) = spawn_foreground();
        let items = PreviewItemInteractor::new(foreground);
        let model = run_against_model(&items, &store, &ops(seed, 40)).await;
        assert_eq!(items_of(&store), model, "seed {seed}");
    }
}

#[tokio::test]
async fn preview_fetch_replaces_with_sample_items() {
    let (store, foreground, _task) = spawn_foreground();
    let items = PreviewItemInteractor::sample(foreground);
    settle(items.fetch_all()).await.expect("fetch");
    assert_eq!(items_of(&store).len(), 3);
}
