// src/services/overlay.rs

//! Optimistic vote state for a single prediction, as a client holds it while
//! a vote is in flight.
//!
//! Each submission is tracked as an intent with its own id. Failing an intent
//! removes exactly its delta; a fresh authoritative snapshot drops the intents
//! the server already confirmed and keeps the ones still pending.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{
    error::AppError,
    services::{
        lifecycle::VoteSide,
        tally::{self, OptionTally},
    },
};

pub type IntentId = u64;

/// What the user clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteChoice {
    pub option_id: i64,
    /// `None` in the standard template.
    pub side: Option<VoteSide>,
}

impl VoteChoice {
    pub fn option(option_id: i64) -> Self {
        Self {
            option_id,
            side: None,
        }
    }

    pub fn yes_no(option_id: i64, side: VoteSide) -> Self {
        Self {
            option_id,
            side: Some(side),
        }
    }

    /// One selection is allowed per key.
    pub fn key(&self) -> SelectionKey {
        match self.side {
            None => SelectionKey::Prediction,
            Some(_) => SelectionKey::Option(self.option_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectionKey {
    Prediction,
    Option(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentState {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy)]
struct Intent {
    choice: VoteChoice,
    state: IntentState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    UnknownOption(i64),
    AlreadySelected(SelectionKey),
    UnknownIntent(IntentId),
    /// The server already accepted this intent; it can no longer fail.
    AlreadyConfirmed(IntentId),
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::UnknownOption(id) => write!(f, "option {} is not part of this prediction", id),
            OverlayError::AlreadySelected(_) => write!(f, "a vote for this selection is already recorded"),
            OverlayError::UnknownIntent(id) => write!(f, "no vote intent {}", id),
            OverlayError::AlreadyConfirmed(id) => write!(f, "vote intent {} was already confirmed", id),
        }
    }
}

impl std::error::Error for OverlayError {}

impl From<OverlayError> for AppError {
    fn from(err: OverlayError) -> Self {
        match err {
            OverlayError::UnknownOption(_) => AppError::NotFound(err.to_string()),
            OverlayError::AlreadySelected(_) => AppError::Conflict(err.to_string()),
            OverlayError::UnknownIntent(_) => AppError::BadRequest(err.to_string()),
            OverlayError::AlreadyConfirmed(_) => AppError::Conflict(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoteOverlay {
    snapshot: Vec<OptionTally>,
    intents: BTreeMap<IntentId, Intent>,
    /// Selections the server has accepted; they outlive snapshot replacement.
    recorded: BTreeSet<SelectionKey>,
    next_intent: IntentId,
}

impl VoteOverlay {
    pub fn new(snapshot: Vec<OptionTally>) -> Self {
        Self {
            snapshot,
            intents: BTreeMap::new(),
            recorded: BTreeSet::new(),
            next_intent: 1,
        }
    }

    /// Marks selections the user already made in an earlier session.
    pub fn with_recorded(mut self, keys: impl IntoIterator<Item = SelectionKey>) -> Self {
        self.recorded.extend(keys);
        self
    }

    /// The last authoritative counters, without local deltas.
    pub fn snapshot(&self) -> &[OptionTally] {
        &self.snapshot
    }

    /// Counters as displayed: the snapshot plus every live intent.
    pub fn view(&self) -> Vec<OptionTally> {
        let mut view = self.snapshot.clone();
        for intent in self.intents.values() {
            if let Some(option) = view
                .iter_mut()
                .find(|o| o.option_id == intent.choice.option_id)
            {
                apply(option, intent.choice);
            }
        }
        view
    }

    pub fn percentages(&self) -> Vec<u32> {
        tally::option_percentages(&self.view())
    }

    pub fn is_selected(&self, key: SelectionKey) -> bool {
        self.selections().contains(&key)
    }

    pub fn selections(&self) -> BTreeSet<SelectionKey> {
        let mut keys = self.recorded.clone();
        keys.extend(self.intents.values().map(|i| i.choice.key()));
        keys
    }

    pub fn pending(&self) -> usize {
        self.intents
            .values()
            .filter(|i| i.state == IntentState::Pending)
            .count()
    }

    /// Records the click and bumps the displayed counter by one.
    pub fn submit(&mut self, choice: VoteChoice) -> Result<IntentId, OverlayError> {
        if !self.snapshot.iter().any(|o| o.option_id == choice.option_id) {
            return Err(OverlayError::UnknownOption(choice.option_id));
        }
        let key = choice.key();
        if self.is_selected(key) {
            return Err(OverlayError::AlreadySelected(key));
        }

        let id = self.next_intent;
        self.next_intent += 1;
        self.intents.insert(
            id,
            Intent {
                choice,
                state: IntentState::Pending,
            },
        );
        Ok(id)
    }

    /// The server accepted the vote. Its delta stays until the next snapshot.
    pub fn confirm(&mut self, intent: IntentId) -> Result<(), OverlayError> {
        let entry = self
            .intents
            .get_mut(&intent)
            .ok_or(OverlayError::UnknownIntent(intent))?;
        entry.state = IntentState::Confirmed;
        self.recorded.insert(entry.choice.key());
        Ok(())
    }

    /// The server rejected the vote: drop its delta and clear the selection.
    /// Only pending intents can fail.
    pub fn fail(&mut self, intent: IntentId) -> Result<VoteChoice, OverlayError> {
        match self.intents.get(&intent).map(|i| i.state) {
            None => Err(OverlayError::UnknownIntent(intent)),
            Some(IntentState::Confirmed) => Err(OverlayError::AlreadyConfirmed(intent)),
            Some(IntentState::Pending) => self
                .intents
                .remove(&intent)
                .map(|i| i.choice)
                .ok_or(OverlayError::UnknownIntent(intent)),
        }
    }

    /// Installs a new authoritative snapshot.
    ///
    /// Confirmed intents are already counted in it and are dropped; pending
    /// ones keep overlaying the new counters.
    pub fn replace_snapshot(&mut self, snapshot: Vec<OptionTally>) {
        self.snapshot = snapshot;
        self.intents
            .retain(|_, intent| intent.state == IntentState::Pending);
    }
}

fn apply(option: &mut OptionTally, choice: VoteChoice) {
    option.votes += 1;
    match choice.side {
        Some(VoteSide::Yes) => option.votes_yes += 1,
        Some(VoteSide::No) => option.votes_no += 1,
        None => {}
    }
}
