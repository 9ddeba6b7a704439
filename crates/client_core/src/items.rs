//! Item operations: fetch, create, update and delete.
//!
//! Nothing here touches the store optimistically. Each operation waits for the
//! backend, then applies the confirmed result on the foreground context.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use shared::domain::{Item, ItemDraft, ItemId};
use tracing::{debug, info};

use crate::{
    error::ClientError,
    foreground::{Dispatcher, Foreground, Operation, Outcome},
    gateway::BackendGateway,
    store::{IgnoreReason, StoreWriter},
};

pub trait ItemInteractor: Send + Sync {
    fn fetch_all(&self) -> Operation;
    fn create(&self, draft: ItemDraft) -> Operation;
    fn update(&self, item: Item) -> Operation;
    fn delete(&self, id: ItemId) -> Operation;
    /// Aborts in-flight calls and drops completions that have not applied yet.
    fn shutdown(&self);
}

/// Orders overlapping fetches so the last one issued wins, whatever order the
/// responses arrive in.
#[derive(Default)]
pub(crate) struct FetchSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl FetchSequencer {
    pub(crate) fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Claims `sequence` for application. Only called on the foreground, so
    /// the load/store pair cannot interleave with another claim.
    pub(crate) fn claim(&self, sequence: u64) -> Result<(), IgnoreReason> {
        let applied = self.applied.load(Ordering::Acquire);
        if sequence <= applied {
            return Err(IgnoreReason::StaleFetch { sequence, applied });
        }
        self.applied.store(sequence, Ordering::Release);
        Ok(())
    }
}

/// Keeps overlapping creates and updates in issue order. Created items land
/// in the order their `create` calls were issued, and per item only the most
/// recently issued update may apply.
#[derive(Default)]
pub(crate) struct MutationSequencer {
    issued: AtomicU64,
    ledger: Mutex<MutationLedger>,
}

#[derive(Default)]
struct MutationLedger {
    /// Issue slot of every applied create, keyed by the id it came back with.
    created: HashMap<ItemId, u64>,
    /// Highest applied update sequence per item.
    updated: HashMap<ItemId, u64>,
}

impl MutationSequencer {
    pub(crate) fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn ledger(&self) -> MutexGuard<'_, MutationLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the create and returns the ids of creates issued after it that
    /// have already landed; the new item goes in front of those.
    pub(crate) fn place_create(&self, id: &ItemId, sequence: u64) -> HashSet<ItemId> {
        let mut ledger = self.ledger();
        ledger.created.insert(id.clone(), sequence);
        ledger
            .created
            .iter()
            .filter(|(_, slot)| **slot > sequence)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn claim_update(&self, id: &ItemId, sequence: u64) -> Result<(), IgnoreReason> {
        let mut ledger = self.ledger();
        let applied = ledger.updated.get(id).copied().unwrap_or(0);
        if sequence <= applied {
            return Err(IgnoreReason::StaleUpdate {
                id: id.clone(),
                sequence,
                applied,
            });
        }
        ledger.updated.insert(id.clone(), sequence);
        Ok(())
    }

    pub(crate) fn forget(&self, id: &ItemId) {
        let mut ledger = self.ledger();
        ledger.created.remove(id);
        ledger.updated.remove(id);
    }
}

pub(crate) fn apply_fetch(
    writer: &StoreWriter<'_>,
    sequencer: &FetchSequencer,
    sequence: u64,
    result: Result<Vec<Item>, ClientError>,
) -> Result<Outcome, ClientError> {
    let items = result?;
    if let Err(reason) = sequencer.claim(sequence) {
        writer.ignored("fetch_all", reason.clone());
        return Ok(Outcome::Ignored(reason));
    }
    debug!(sequence, count = items.len(), "applying fetched items");
    writer.replace_items(items);
    Ok(Outcome::Applied)
}

pub(crate) fn apply_create(
    writer: &StoreWriter<'_>,
    mutations: &MutationSequencer,
    sequence: u64,
    result: Result<Item, ClientError>,
) -> Result<Outcome, ClientError> {
    let item = result?;
    info!(item_id = %item.id, sequence, "item created");
    let later = mutations.place_create(&item.id, sequence);
    writer.insert_item_before(item, |existing| later.contains(&existing.id));
    Ok(Outcome::Applied)
}

pub(crate) fn apply_update(
    writer: &StoreWriter<'_>,
    mutations: &MutationSequencer,
    sequence: u64,
    result: Result<Item, ClientError>,
) -> Result<Outcome, ClientError> {
    let item = result?;
    let id = item.id.clone();
    if let Err(reason) = mutations.claim_update(&id, sequence) {
        writer.ignored("update", reason.clone());
        return Ok(Outcome::Ignored(reason));
    }
    if writer.replace_item(item) {
        Ok(Outcome::Applied)
    } else {
        // Deleted while the call was in flight; never re-insert.
        let reason = IgnoreReason::MissingTarget(id);
        writer.ignored("update", reason.clone());
        Ok(Outcome::Ignored(reason))
    }
}

pub(crate) fn apply_delete(
    writer: &StoreWriter<'_>,
    mutations: &MutationSequencer,
    id: ItemId,
    result: Result<(), ClientError>,
) -> Result<Outcome, ClientError> {
    result?;
    mutations.forget(&id);
    if writer.remove_item(&id) {
        info!(item_id = %id, "item deleted");
        Ok(Outcome::Applied)
    } else {
        let reason = IgnoreReason::MissingTarget(id);
        writer.ignored("delete", reason.clone());
        Ok(Outcome::Ignored(reason))
    }
}

pub struct LiveItemInteractor {
    gateway: Arc<dyn BackendGateway>,
    dispatcher: Dispatcher,
    sequencer: Arc<FetchSequencer>,
    mutations: Arc<MutationSequencer>,
}

impl LiveItemInteractor {
    pub fn new(gateway: Arc<dyn BackendGateway>, foreground: Foreground) -> Self {
        Self {
            gateway,
            dispatcher: Dispatcher::new("items", foreground),
            sequencer: Arc::new(FetchSequencer::default()),
            mutations: Arc::new(MutationSequencer::default()),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.scope().in_flight()
    }
}

impl ItemInteractor for LiveItemInteractor {
    fn fetch_all(&self) -> Operation {
        let sequence = self.sequencer.issue();
        debug!(sequence, "issuing fetch_all");
        let gateway = Arc::clone(&self.gateway);
        let sequencer = Arc::clone(&self.sequencer);
        self.dispatcher.dispatch(
            "fetch_all",
            async move { gateway.fetch_all().await },
            move |writer, result| apply_fetch(writer, &sequencer, sequence, result),
        )
    }

    fn create(&self, draft: ItemDraft) -> Operation {
        let sequence = self.mutations.issue();
        let gateway = Arc::clone(&self.gateway);
        let mutations = Arc::clone(&self.mutations);
        self.dispatcher.dispatch(
            "create",
            async move { gateway.create(&draft).await },
            move |writer, result| apply_create(writer, &mutations, sequence, result),
        )
    }

    fn update(&self, item: Item) -> Operation {
        let sequence = self.mutations.issue();
        debug!(item_id = %item.id, sequence, "issuing update");
        let gateway = Arc::clone(&self.gateway);
        let mutations = Arc::clone(&self.mutations);
        self.dispatcher.dispatch(
            "update",
            async move { gateway.update(&item).await },
            move |writer, result| apply_update(writer, &mutations, sequence, result),
        )
    }

    fn delete(&self, id: ItemId) -> Operation {
        let gateway = Arc::clone(&self.gateway);
        let mutations = Arc::clone(&self.mutations);
        let target = id.clone();
        self.dispatcher.dispatch(
            "delete",
            async move { gateway.delete(&id).await },
            move |writer, result| apply_delete(writer, &mutations, target, result),
        )
    }

    fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/items_tests.rs"]
mod tests;
