//! Network-free interactors for previews, demos and tests.
//!
//! They keep their own in-process copy of the "backend" and resolve calls
//! immediately, but still apply results through the foreground like the live
//! interactors do, so consumers cannot tell them apart.

use std::sync::{Arc, Mutex, MutexGuard};

use shared::{
    domain::{Identity, Item, ItemDraft, ItemId},
    error::ApiException,
    protocol::AuthorizationGrant,
};

use crate::{
    error::ClientError,
    foreground::{Dispatcher, Foreground, Operation},
    items::{
        apply_create, apply_delete, apply_fetch, apply_update, FetchSequencer, ItemInteractor,
        MutationSequencer,
    },
    session::{
        apply_stored_session, begin_login, finish_sign_in, finish_sign_out, SessionInteractor,
        StoredSession,
    },
};

#[derive(Default)]
struct PreviewItems {
    items: Vec<Item>,
    next_id: u64,
}

pub struct PreviewItemInteractor {
    backing: Arc<Mutex<PreviewItems>>,
    dispatcher: Dispatcher,
    sequencer: Arc<FetchSequencer>,
    mutations: Arc<MutationSequencer>,
}

impl PreviewItemInteractor {
    pub fn new(foreground: Foreground) -> Self {
        Self::with_items(foreground, Vec::new())
    }

    pub fn with_items(foreground: Foreground, items: Vec<Item>) -> Self {
        Self {
            backing: Arc::new(Mutex::new(PreviewItems {
                next_id: items.len() as u64,
                items,
            })),
            dispatcher: Dispatcher::new("preview_items", foreground),
            sequencer: Arc::new(FetchSequencer::default()),
            mutations: Arc::new(MutationSequencer::default()),
        }
    }

    /// A short list used by the demo surfaces.
    pub fn sample(foreground: Foreground) -> Self {
        Self::with_items(
            foreground,
            vec![
                Item::new("1", "Buy milk", false),
                Item::new("2", "Water the plants", true),
                Item::new("3", "Call the bank", false),
            ],
        )
    }

    fn backing(&self) -> MutexGuard<'_, PreviewItems> {
        self.backing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn missing(id: &ItemId) -> ClientError {
    ClientError::Api(ApiException::item_not_found(id))
}

impl ItemInteractor for PreviewItemInteractor {
    fn fetch_all(&self) -> Operation {
        let sequence = self.sequencer.issue();
        let items = self.backing().items.clone();
        let sequencer = Arc::clone(&self.sequencer);
        self.dispatcher.dispatch(
            "fetch_all",
            async move { Ok::<_, ClientError>(items) },
            move |writer, result| apply_fetch(writer, &sequencer, sequence, result),
        )
    }

    fn create(&self, draft: ItemDraft) -> Operation {
        let item = {
            let mut backing = self.backing();
            backing.next_id += 1;
            let item = Item::new(
                ItemId(backing.next_id.to_string()),
                draft.body,
                draft.completed,
            );
            backing.items.push(item.clone());
            item
        };
        let sequence = self.mutations.issue();
        let mutations = Arc::clone(&self.mutations);
        self.dispatcher.dispatch(
            "create",
            async move { Ok::<_, ClientError>(item) },
            move |writer, result| apply_create(writer, &mutations, sequence, result),
        )
    }

    fn update(&self, item: Item) -> Operation {
        let result = {
            let mut backing = self.backing();
            match backing.items.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => {
                    *existing = item.clone();
                    Ok(item)
                }
                None => Err(missing(&item.id)),
            }
        };
        let sequence = self.mutations.issue();
        let mutations = Arc::clone(&self.mutations);
        self.dispatcher.dispatch(
            "update",
            async move { result },
            move |writer, result| apply_update(writer, &mutations, sequence, result),
        )
    }

    fn delete(&self, id: ItemId) -> Operation {
        let mutations = Arc::clone(&self.mutations);
        let result = {
            let mut backing = self.backing();
            let before = backing.items.len();
            backing.items.retain(|item| item.id != id);
            if backing.items.len() == before {
                Err(missing(&id))
            } else {
                Ok(())
            }
        };
        self.dispatcher.dispatch(
            "delete",
            async move { result },
            move |writer, result| apply_delete(writer, &mutations, id, result),
        )
    }

    fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

pub struct PreviewSessionInteractor {
    identity: Identity,
    signed_in: Arc<Mutex<bool>>,
    dispatcher: Dispatcher,
}

impl PreviewSessionInteractor {
    /// `check_session` will find an existing session for `identity`.
    pub fn signed_in(foreground: Foreground, identity: Identity) -> Self {
        Self::build(foreground, identity, true)
    }

    /// `check_session` will find nothing; `sign_in` signs in as `identity`.
    pub fn signed_out(foreground: Foreground, identity: Identity) -> Self {
        Self::build(foreground, identity, false)
    }

    fn build(foreground: Foreground, identity: Identity, signed_in: bool) -> Self {
        Self {
            identity,
            signed_in: Arc::new(Mutex::new(signed_in)),
            dispatcher: Dispatcher::new("preview_session", foreground),
        }
    }

    pub fn preview_identity() -> Identity {
        Identity {
            name: "Preview User".into(),
            email: "preview@example.com".into(),
        }
    }

    fn set_signed_in(flag: &Mutex<bool>, value: bool) {
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }

    fn login_as(&self, operation: &'static str, identity: Identity) -> Operation {
        let foreground = self.dispatcher.foreground().clone();
        let flag = Arc::clone(&self.signed_in);
        self.dispatcher.dispatch(
            operation,
            async move {
                foreground.run(begin_login).await??;
                Self::set_signed_in(&flag, true);
                Ok::<_, ClientError>(Some(identity))
            },
            move |writer, result| match result {
                Err(err @ ClientError::SessionBusy(_)) => Err(err),
                result => finish_sign_in(writer, operation, result),
            },
        )
    }
}

impl SessionInteractor for PreviewSessionInteractor {
    fn check_session(&self) -> Operation {
        let signed_in = *self
            .signed_in
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stored = if signed_in {
            StoredSession::Valid(Some(self.identity.clone()))
        } else {
            StoredSession::Absent
        };
        self.dispatcher.dispatch(
            "check_session",
            async move { Ok::<_, ClientError>(stored) },
            apply_stored_session,
        )
    }

    fn login(&self, grant: AuthorizationGrant) -> Operation {
        if grant.artifact.0.trim().is_empty() {
            let foreground = self.dispatcher.foreground().clone();
            return self.dispatcher.dispatch(
                "login",
                async move {
                    foreground.run(begin_login).await??;
                    Err::<Option<Identity>, _>(ClientError::Unauthorized)
                },
                |writer, result| match result {
                    Err(err @ ClientError::SessionBusy(_)) => Err(err),
                    result => finish_sign_in(writer, "login", result),
                },
            );
        }
        self.login_as("login", grant.identity)
    }

    fn sign_in(&self) -> Operation {
        self.login_as("sign_in", self.identity.clone())
    }

    fn logout(&self) -> Operation {
        Self::set_signed_in(&self.signed_in, false);
        self.dispatcher.dispatch(
            "logout",
            async move { Ok::<_, ClientError>(()) },
            |writer, result: Result<(), ClientError>| {
                result?;
                Ok(finish_sign_out(writer))
            },
        )
    }

    fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
