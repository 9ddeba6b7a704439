//! What presentation surfaces get to work with.
//!
//! Surfaces read the store, render through a strategy picked once from the
//! device capability, and keep uncommitted edits in an [`EditShadow`]. The
//! shadow is view-local. It gives instant feedback while the store still
//! holds the last backend-confirmed value, and it never writes the store
//! itself.

use std::{fmt, str::FromStr};

use shared::domain::{Item, ItemId};

use crate::{
    error::{ClientError, SessionError},
    foreground::Operation,
    items::ItemInteractor,
    state::{AppState, SessionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceCapability {
    /// Small touch screens.
    #[default]
    Compact,
    /// Large touch screens.
    Regular,
    /// Keyboard and pointer.
    Pointer,
}

impl FromStr for DeviceCapability {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" | "phone" => Ok(Self::Compact),
            "regular" | "tablet" => Ok(Self::Regular),
            "pointer" | "desktop" => Ok(Self::Pointer),
            other => Err(ClientError::Config(format!("unknown device class '{other}'"))),
        }
    }
}

impl fmt::Display for DeviceCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Regular => "regular",
            Self::Pointer => "pointer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    /// Tap or click on the row.
    Activate,
    /// Horizontal swipe on a touch row.
    Swipe,
    /// Delete/backspace key with the row focused.
    DeleteKey,
}

pub trait ItemRenderer: Send + Sync {
    fn render(&self, state: &AppState) -> Vec<String>;

    /// Maps an input on `item` to an interactor call, if the device class
    /// supports that input.
    fn handle(
        &self,
        action: InputAction,
        item: &Item,
        items: &dyn ItemInteractor,
    ) -> Option<Operation>;
}

fn checkbox(item: &Item) -> &'static str {
    if item.completed {
        "[x]"
    } else {
        "[ ]"
    }
}

fn touch_input(action: InputAction, item: &Item, items: &dyn ItemInteractor) -> Option<Operation> {
    match action {
        InputAction::Activate => Some(items.update(item.toggled())),
        InputAction::Swipe => Some(items.delete(item.id.clone())),
        InputAction::DeleteKey => None,
    }
}

struct CompactRenderer;

impl ItemRenderer for CompactRenderer {
    fn render(&self, state: &AppState) -> Vec<String> {
        state
            .items()
            .iter()
            .map(|item| format!("{} {}", checkbox(item), item.body))
            .collect()
    }

    fn handle(
        &self,
        action: InputAction,
        item: &Item,
        items: &dyn ItemInteractor,
    ) -> Option<Operation> {
        touch_input(action, item, items)
    }
}

struct RegularRenderer;

impl ItemRenderer for RegularRenderer {
    fn render(&self, state: &AppState) -> Vec<String> {
        let mut lines = vec![format!(
            "{} items, {} done",
            state.items().len(),
            state.completed_count()
        )];
        lines.extend(
            state
                .items()
                .iter()
                .enumerate()
                .map(|(index, item)| format!("{:>3}. {} {}", index + 1, checkbox(item), item.body)),
        );
        lines
    }

    fn handle(
        &self,
        action: InputAction,
        item: &Item,
        items: &dyn ItemInteractor,
    ) -> Option<Operation> {
        touch_input(action, item, items)
    }
}

struct PointerRenderer;

impl ItemRenderer for PointerRenderer {
    fn render(&self, state: &AppState) -> Vec<String> {
        state
            .items()
            .iter()
            .map(|item| format!("{} {:<40} #{}", checkbox(item), item.body, item.id))
            .collect()
    }

    fn handle(
        &self,
        action: InputAction,
        item: &Item,
        items: &dyn ItemInteractor,
    ) -> Option<Operation> {
        match action {
            InputAction::Activate => Some(items.update(item.toggled())),
            InputAction::DeleteKey => Some(items.delete(item.id.clone())),
            InputAction::Swipe => None,
        }
    }
}

pub fn renderer_for(capability: DeviceCapability) -> Box<dyn ItemRenderer> {
    match capability {
        DeviceCapability::Compact => Box::new(CompactRenderer),
        DeviceCapability::Regular => Box::new(RegularRenderer),
        DeviceCapability::Pointer => Box::new(PointerRenderer),
    }
}

/// Uncommitted, view-local copy of an item's editable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditShadow {
    base: Item,
    body: String,
    completed: bool,
}

impl EditShadow {
    pub fn begin(item: &Item) -> Self {
        Self {
            base: item.clone(),
            body: item.body.clone(),
            completed: item.completed,
        }
    }

    pub fn id(&self) -> &ItemId {
        &self.base.id
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn toggle_completed(&mut self) {
        self.completed = !self.completed;
    }

    pub fn is_dirty(&self) -> bool {
        self.body != self.base.body || self.completed != self.base.completed
    }

    /// What the surface should draw right now.
    pub fn preview(&self) -> Item {
        Item {
            id: self.base.id.clone(),
            body: self.body.clone(),
            completed: self.completed,
        }
    }

    /// Takes in a newer confirmed copy from the store. Fields the user has
    /// not touched follow the store; edited fields are kept.
    pub fn rebase(&mut self, confirmed: &Item) {
        if self.body == self.base.body {
            self.body = confirmed.body.clone();
        }
        if self.completed == self.base.completed {
            self.completed = confirmed.completed;
        }
        self.base = confirmed.clone();
    }

    /// Sends the edit through the interactor. Returns `None` when nothing
    /// changed.
    pub fn commit(&self, items: &dyn ItemInteractor) -> Option<Operation> {
        self.is_dirty().then(|| items.update(self.preview()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRoute {
    Splash,
    SignIn { error: Option<SessionError> },
    Items,
}

impl From<&SessionStatus> for SessionRoute {
    fn from(status: &SessionStatus) -> Self {
        match status {
            SessionStatus::Loading => Self::Splash,
            SessionStatus::SignedOut(error) => Self::SignIn {
                error: error.clone(),
            },
            SessionStatus::SignedIn => Self::Items,
        }
    }
}

impl SessionRoute {
    pub fn banner(&self) -> Option<String> {
        match self {
            Self::SignIn { error: Some(err) } => Some(format!("Sign-in failed: {err}")),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
