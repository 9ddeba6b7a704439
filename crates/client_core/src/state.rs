//! Contents of the store: items, identity and the session state machine.

use shared::domain::{Identity, Item, ItemId};

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Loading,
    SignedOut(Option<SessionError>),
    SignedIn,
}

impl SessionStatus {
    /// Valid edges: Loading -> SignedIn, Loading -> SignedOut(_),
    /// SignedOut(_) -> Loading, SignedIn -> SignedOut(None).
    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Loading, Self::SignedIn)
                | (Self::Loading, Self::SignedOut(_))
                | (Self::SignedOut(_), Self::Loading)
                | (Self::SignedIn, Self::SignedOut(None))
        )
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn)
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            Self::SignedOut(err) => err.as_ref(),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::SignedOut(None) => "signed_out",
            Self::SignedOut(Some(_)) => "signed_out_with_error",
            Self::SignedIn => "signed_in",
        }
    }
}

/// Snapshot of everything the store holds. Snapshots are immutable once
/// published; the store swaps in a new one per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    pub(crate) items: Vec<Item>,
    pub(crate) identity: Option<Identity>,
    pub(crate) session: SessionStatus,
}

impl AppState {
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn session(&self) -> &SessionStatus {
        &self.session
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.completed).count()
    }

    pub(crate) fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }
}
