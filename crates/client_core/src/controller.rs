//! Client-side mirror of one content collection.
//!
//! [`CollectionController`] keeps the loaded records, the local edit state
//! of each of them and the pending confirmation of a destructive action.
//! Every backend failure is turned into a [`Notification`] and returned to
//! the caller; local state is never left half-applied.

use std::fmt;

use serde_json::{Map, Value};
use shared::{
    domain::{Entity, RecordId, SaveShape},
    protocol::ListQuery,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    backend::CollectionBackend,
    error::{ControllerError, FieldError},
};

const NOTIFICATION_CAPACITY: usize = 64;

/// Local handle of an unsaved record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DraftId(pub u64);

/// Addresses one entry of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Saved(RecordId),
    Draft(DraftId),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Saved(id) => write!(f, "record {id}"),
            RecordKey::Draft(id) => write!(f, "draft {}", id.0),
        }
    }
}

/// Edit state of one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EditState<R> {
    /// Last server-confirmed value, not being edited.
    Committed(R),
    /// Local edits in `draft`; `snapshot` is what cancel reverts to.
    Editing { draft: R, snapshot: R },
    /// Created locally and never persisted.
    Draft(R),
}

impl<R: Entity> EditState<R> {
    /// The value a form shows: the draft while editing.
    pub fn current(&self) -> &R {
        match self {
            EditState::Committed(record) | EditState::Draft(record) => record,
            EditState::Editing { draft, .. } => draft,
        }
    }

    /// The server-confirmed value, if the entry was ever persisted.
    pub fn committed(&self) -> Option<&R> {
        match self {
            EditState::Committed(record) => Some(record),
            EditState::Editing { snapshot, .. } => Some(snapshot),
            EditState::Draft(_) => None,
        }
    }

    pub fn is_editing(&self) -> bool {
        !matches!(self, EditState::Committed(_))
    }

    fn begin_editing(&mut self) {
        if let EditState::Committed(record) = self {
            let snapshot = record.clone();
            *self = EditState::Editing {
                draft: snapshot.clone(),
                snapshot,
            };
        }
    }

    fn draft_mut(&mut self) -> &mut R {
        self.begin_editing();
        match self {
            EditState::Committed(record) | EditState::Draft(record) => record,
            EditState::Editing { draft, .. } => draft,
        }
    }

    /// Applies `f` to every copy held, so bookkeeping fields stay in step.
    fn for_each_copy(&mut self, mut f: impl FnMut(&mut R)) {
        match self {
            EditState::Committed(record) | EditState::Draft(record) => f(record),
            EditState::Editing { draft, snapshot } => {
                f(draft);
                f(snapshot);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry<R> {
    key: RecordKey,
    state: EditState<R>,
}

impl<R: Entity> Entry<R> {
    pub fn key(&self) -> RecordKey {
        self.key
    }

    pub fn state(&self) -> &EditState<R> {
        &self.state
    }

    pub fn record(&self) -> &R {
        self.state.current()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    /// The last load failed; previously loaded entries are still present.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    ToggleActive { from: bool, to: bool },
    Delete,
}

/// A destructive action waiting for the user's go-ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub key: RecordKey,
    pub action: ConfirmAction,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTarget {
    Record(RecordKey),
    /// Every persisted record, in current order, in one call.
    Collection,
}

/// Client-side narrowing of the loaded entries. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub search: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub active_only: bool,
}

impl FilterCriteria {
    pub fn matches<R: Entity>(&self, record: &R) -> bool {
        let needle = self.search.trim().to_lowercase();
        if !needle.is_empty()
            && !record
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        {
            return false;
        }
        if let Some(category) = &self.category {
            if record.category() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if record.location() != Some(location.as_str()) {
                return false;
            }
        }
        !self.active_only || record.active()
    }
}

/// User-facing outcome messages, the toast analogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(String),
    Error(String),
}

pub struct CollectionController<R: Entity, B: CollectionBackend<R>> {
    backend: B,
    query: ListQuery,
    entries: Vec<Entry<R>>,
    load_state: LoadState,
    pending: Option<ConfirmPrompt>,
    next_draft: u64,
    order_dirty: bool,
    notifications: broadcast::Sender<Notification>,
}

impl<R: Entity, B: CollectionBackend<R>> CollectionController<R, B> {
    pub fn new(backend: B) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            backend,
            query: ListQuery::default(),
            entries: Vec::new(),
            load_state: LoadState::Idle,
            pending: None,
            next_draft: 0,
            order_dirty: false,
            notifications,
        }
    }

    /// Server-side narrowing applied by every subsequent [`load`](Self::load).
    pub fn with_query(mut self, query: ListQuery) -> Self {
        self.query = query;
        self
    }

    pub fn set_query(&mut self, query: ListQuery) {
        self.query = query;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn entries(&self) -> &[Entry<R>] {
        &self.entries
    }

    pub fn entry(&self, key: RecordKey) -> Option<&Entry<R>> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    /// Current values of every entry, in display order.
    pub fn records(&self) -> Vec<&R> {
        self.entries.iter().map(Entry::record).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn pending_confirmation(&self) -> Option<&ConfirmPrompt> {
        self.pending.as_ref()
    }

    /// True after a reorder that has not been saved or reloaded away.
    pub fn has_unsaved_order(&self) -> bool {
        self.order_dirty
    }

    pub async fn load(&mut self) -> Result<(), ControllerError> {
        self.load_state = LoadState::Loading;
        let mut records = match self.backend.list(&self.query).await {
            Ok(records) => records,
            Err(err) => {
                self.load_state = LoadState::Failed(err.to_string());
                return Err(self.fail(format!("failed to load {}", R::KIND), err));
            }
        };

        if R::KIND.is_ordered() {
            records.sort_by_key(|record| record.order());
        }

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match record.id() {
                Some(id) => entries.push(Entry {
                    key: RecordKey::Saved(id),
                    state: EditState::Committed(record),
                }),
                None => {
                    warn!(collection = %R::KIND, slug = record.slug(), "skipping record without id")
                }
            }
        }

        debug!(collection = %R::KIND, count = entries.len(), "collection loaded");
        self.entries = entries;
        self.order_dirty = false;
        self.load_state = LoadState::Loaded;
        Ok(())
    }

    /// Entries matching `criteria`, in display order. Never mutates state.
    pub fn filter(&self, criteria: &FilterCriteria) -> Vec<&Entry<R>> {
        self.entries
            .iter()
            .filter(|entry| criteria.matches(entry.record()))
            .collect()
    }

    pub fn request_toggle_active(
        &mut self,
        key: RecordKey,
    ) -> Result<ConfirmPrompt, ControllerError> {
        let committed = self.committed(key)?;
        let from = committed.active();
        let prompt = ConfirmPrompt {
            key,
            action: ConfirmAction::ToggleActive { from, to: !from },
            summary: format!(
                "{} {} \"{}\"?",
                if from { "Deactivate" } else { "Activate" },
                R::KIND.label(),
                committed.display_name()
            ),
        };
        self.pending = Some(prompt.clone());
        Ok(prompt)
    }

    pub fn request_delete(&mut self, key: RecordKey) -> Result<ConfirmPrompt, ControllerError> {
        let committed = self.committed(key)?;
        let prompt = ConfirmPrompt {
            key,
            action: ConfirmAction::Delete,
            summary: format!(
                "Delete {} \"{}\" ({})? This cannot be undone.",
                R::KIND.label(),
                committed.display_name(),
                committed.slug()
            ),
        };
        self.pending = Some(prompt.clone());
        Ok(prompt)
    }

    pub fn cancel_confirmation(&mut self) -> Option<ConfirmPrompt> {
        self.pending.take()
    }

    /// Carries out the pending prompt against the backend.
    pub async fn confirm(&mut self) -> Result<(), ControllerError> {
        let prompt = self
            .pending
            .take()
            .ok_or(ControllerError::NoPendingConfirmation)?;
        match prompt.action {
            ConfirmAction::ToggleActive { to, .. } => self.apply_toggle(prompt.key, to).await,
            ConfirmAction::Delete => self.apply_delete(prompt.key).await,
        }
    }

    async fn apply_toggle(&mut self, key: RecordKey, to: bool) -> Result<(), ControllerError> {
        let mut body = self.committed(key)?.clone();
        body.set_active(to);

        if let Err(err) = self.backend.update(body.slug(), &body).await {
            return Err(self.fail(format!("failed to update \"{}\"", body.display_name()), err));
        }

        let index = self.index_of(key)?;
        self.entries[index]
            .state
            .for_each_copy(|record| record.set_active(to));
        info!(collection = %R::KIND, slug = body.slug(), active = to, "active flag changed");
        self.notify(Notification::Success(format!(
            "\"{}\" is now {}",
            body.display_name(),
            if to { "active" } else { "inactive" }
        )));
        Ok(())
    }

    async fn apply_delete(&mut self, key: RecordKey) -> Result<(), ControllerError> {
        let committed = self.committed(key)?;
        let name = committed.display_name().to_string();
        let backend_key = match (committed.slug(), committed.id()) {
            (slug, _) if !slug.is_empty() => slug.to_string(),
            (_, Some(id)) => id.to_string(),
            _ => return Err(ControllerError::NotPersisted(key)),
        };

        if let Err(err) = self.backend.delete(&backend_key).await {
            return Err(self.fail(format!("failed to delete \"{name}\""), err));
        }

        let index = self.index_of(key)?;
        self.entries.remove(index);
        info!(collection = %R::KIND, key = %backend_key, "record deleted");
        self.notify(Notification::Success(format!("\"{name}\" was deleted")));
        Ok(())
    }

    /// Appends an empty record placed after every existing entry.
    pub fn add_draft(&mut self) -> RecordKey {
        let mut record = R::default();
        record.set_order(self.entries.len() as i64);
        self.next_draft += 1;
        let key = RecordKey::Draft(DraftId(self.next_draft));
        self.entries.push(Entry {
            key,
            state: EditState::Draft(record),
        });
        key
    }

    /// Local-only change to an entry's form value; starts editing if needed.
    pub fn update_draft(
        &mut self,
        key: RecordKey,
        update: impl FnOnce(&mut R),
    ) -> Result<(), ControllerError> {
        let index = self.index_of(key)?;
        update(self.entries[index].state.draft_mut());
        Ok(())
    }

    pub fn begin_edit(&mut self, key: RecordKey) -> Result<(), ControllerError> {
        let index = self.index_of(key)?;
        self.entries[index].state.begin_editing();
        Ok(())
    }

    /// Reverts to the last server-confirmed value. A draft is dropped.
    pub fn cancel_edit(&mut self, key: RecordKey) -> Result<(), ControllerError> {
        let index = self.index_of(key)?;
        match &self.entries[index].state {
            EditState::Committed(_) => {}
            EditState::Editing { snapshot, .. } => {
                let reverted = EditState::Committed(snapshot.clone());
                self.entries[index].state = reverted;
            }
            EditState::Draft(_) => {
                self.entries.remove(index);
            }
        }
        Ok(())
    }

    /// Swaps an entry with its neighbour. Returns `false` at either end.
    pub fn reorder(
        &mut self,
        key: RecordKey,
        direction: Direction,
    ) -> Result<bool, ControllerError> {
        let index = self.index_of(key)?;
        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|target| *target < self.entries.len()),
        };
        let Some(target) = target else {
            return Ok(false);
        };

        self.entries.swap(index, target);
        for position in [index, target] {
            let order = position as i64;
            self.entries[position]
                .state
                .for_each_copy(|record| record.set_order(order));
        }
        self.order_dirty = true;
        Ok(true)
    }

    /// The save target an edit of `key` uses for this kind. Drafts are
    /// always created one at a time.
    pub fn save_target_for(&self, key: RecordKey) -> SaveTarget {
        match (R::KIND.save_shape(), key) {
            (SaveShape::WholeCollection, RecordKey::Saved(_)) => SaveTarget::Collection,
            _ => SaveTarget::Record(key),
        }
    }

    /// Persists one record or the whole collection, then reloads.
    ///
    /// After a record save, unsaved edits and drafts of the other entries
    /// survive the reload.
    pub async fn save(&mut self, target: SaveTarget) -> Result<(), ControllerError> {
        let unsaved = match target {
            SaveTarget::Record(key) => {
                self.save_record(key).await?;
                self.unsaved_entries_except(key)
            }
            SaveTarget::Collection => {
                self.save_collection().await?;
                Vec::new()
            }
        };
        self.load().await?;
        self.restore_unsaved(unsaved);
        Ok(())
    }

    fn unsaved_entries_except(&self, key: RecordKey) -> Vec<Entry<R>> {
        self.entries
            .iter()
            .filter(|entry| entry.key != key && entry.state.is_editing())
            .cloned()
            .collect()
    }

    /// Re-applies local edits on top of freshly loaded entries. An edit whose
    /// record disappeared from the server is dropped.
    fn restore_unsaved(&mut self, unsaved: Vec<Entry<R>>) {
        for kept in unsaved {
            match kept.state {
                EditState::Editing { draft, .. } => {
                    let Ok(index) = self.index_of(kept.key) else {
                        warn!(
                            collection = %R::KIND,
                            key = %kept.key,
                            "edited record is gone after reload"
                        );
                        continue;
                    };
                    let entry = &mut self.entries[index];
                    let snapshot = entry.state.current().clone();
                    entry.state = EditState::Editing { draft, snapshot };
                }
                EditState::Draft(_) => self.entries.push(kept),
                EditState::Committed(_) => {}
            }
        }
    }

    async fn save_record(&mut self, key: RecordKey) -> Result<(), ControllerError> {
        let index = self.index_of(key)?;
        let state = &self.entries[index].state;
        let record = state.current().clone();
        validate(&record)?;

        let saved = match state.committed() {
            None => self.backend.create(&record).await,
            Some(committed) => {
                let slug = committed.slug().to_string();
                self.backend.update(&slug, &record).await
            }
        };

        match saved {
            Ok(saved) => {
                info!(collection = %R::KIND, slug = saved.slug(), "record saved");
                self.notify(Notification::Success(format!(
                    "\"{}\" was saved",
                    saved.display_name()
                )));
                Ok(())
            }
            Err(err) => {
                let message = format!("failed to save \"{}\"", record.display_name());
                Err(self.fail(message, err))
            }
        }
    }

    async fn save_collection(&mut self) -> Result<(), ControllerError> {
        if let Some(draft) = self
            .entries
            .iter()
            .find(|entry| matches!(entry.state, EditState::Draft(_)))
        {
            return Err(ControllerError::NotPersisted(draft.key));
        }

        let records: Vec<R> = self
            .entries
            .iter()
            .map(|entry| entry.record().clone())
            .collect();
        for record in &records {
            validate(record)?;
        }

        match self.backend.save_all(&records).await {
            Ok(saved) => {
                info!(collection = %R::KIND, count = saved.len(), "collection saved");
                self.order_dirty = false;
                self.notify(Notification::Success(format!("{} saved", R::KIND)));
                Ok(())
            }
            Err(err) => Err(self.fail(format!("failed to save {}", R::KIND), err)),
        }
    }

    /// Partial update by id; the committed value becomes the server's response.
    pub async fn patch(
        &mut self,
        key: RecordKey,
        fields: Map<String, Value>,
    ) -> Result<(), ControllerError> {
        let RecordKey::Saved(id) = key else {
            return Err(ControllerError::NotPersisted(key));
        };
        self.index_of(key)?;

        let updated = match self.backend.patch(id, &fields).await {
            Ok(updated) => updated,
            Err(err) => return Err(self.fail(format!("failed to update {key}"), err)),
        };

        let index = self.index_of(key)?;
        let entry = &mut self.entries[index];
        match &mut entry.state {
            EditState::Committed(record) => *record = updated,
            EditState::Editing { snapshot, .. } => *snapshot = updated,
            EditState::Draft(_) => {}
        }
        debug!(collection = %R::KIND, %id, "record patched");
        Ok(())
    }

    /// Completion hook of the external image uploader. The last call wins.
    pub fn apply_uploaded_image(
        &mut self,
        key: RecordKey,
        url: impl Into<String>,
    ) -> Result<(), ControllerError> {
        if R::default().image_url_mut().is_none() {
            return Err(ControllerError::Validation(vec![FieldError {
                field: "image_url",
                message: format!("{} records have no image", R::KIND.label()),
            }]));
        }
        let url = url.into();
        self.update_draft(key, |record| {
            if let Some(slot) = record.image_url_mut() {
                *slot = url;
            }
        })
    }

    fn index_of(&self, key: RecordKey) -> Result<usize, ControllerError> {
        self.entries
            .iter()
            .position(|entry| entry.key == key)
            .ok_or(ControllerError::UnknownRecord(key))
    }

    fn committed(&self, key: RecordKey) -> Result<&R, ControllerError> {
        let index = self.index_of(key)?;
        self.entries[index]
            .state
            .committed()
            .ok_or(ControllerError::NotPersisted(key))
    }

    fn fail(&self, context: String, err: ControllerError) -> ControllerError {
        warn!(collection = %R::KIND, error = %err, "{context}");
        self.notify(Notification::Error(format!("{context}: {err}")));
        err
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }
}

fn validate<R: Entity>(record: &R) -> Result<(), ControllerError> {
    let missing = record.missing_fields();
    if missing.is_empty() {
        return Ok(());
    }
    debug!(collection = %R::KIND, ?missing, "record failed validation");
    Err(ControllerError::Validation(
        missing.into_iter().map(FieldError::required).collect(),
    ))
}
