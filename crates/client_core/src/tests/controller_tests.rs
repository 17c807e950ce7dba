use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{public_view, Entity, RecordId, RecordMeta},
    entities::{Applicant, ApplicantStatus, Mentor, TeamMember},
    error::{ApiError, ErrorCode},
    protocol::ListQuery,
};

use crate::{
    backend::CollectionBackend,
    controller::{
        CollectionController, ConfirmAction, Direction, EditState, FilterCriteria, LoadState,
        Notification, RecordKey, SaveTarget,
    },
    error::ControllerError,
};

#[derive(Debug, Clone, PartialEq)]
enum Call<R> {
    List(ListQuery),
    Fetch(String),
    Create(R),
    Update(String, R),
    Patch(RecordId, Map<String, Value>),
    Delete(String),
    SaveAll(Vec<R>),
}

struct FakeState<R> {
    records: Vec<R>,
    calls: Vec<Call<R>>,
    fail_with: Option<String>,
    next_id: i64,
}

/// In-memory backend that records every call it receives.
#[derive(Clone)]
struct FakeBackend<R> {
    state: Arc<Mutex<FakeState<R>>>,
}

impl<R: Entity> FakeBackend<R> {
    fn with_records(records: Vec<R>) -> Self {
        let next_id = records
            .iter()
            .filter_map(|record| record.id().map(|id| id.0))
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            state: Arc::new(Mutex::new(FakeState {
                records,
                calls: Vec::new(),
                fail_with: None,
                next_id,
            })),
        }
    }

    fn fail_with(&self, message: Option<&str>) {
        self.state.lock().expect("lock").fail_with = message.map(str::to_string);
    }

    fn calls(&self) -> Vec<Call<R>> {
        self.state.lock().expect("lock").calls.clone()
    }

    fn clear_calls(&self) {
        self.state.lock().expect("lock").calls.clear();
    }

    fn stored(&self) -> Vec<R> {
        self.state.lock().expect("lock").records.clone()
    }

    fn begin(&self, call: Call<R>) -> Result<MutexGuard<'_, FakeState<R>>, ControllerError> {
        let mut state = self.state.lock().expect("lock");
        state.calls.push(call);
        match &state.fail_with {
            Some(message) => Err(ControllerError::Rejected(ApiError::new(
                ErrorCode::Internal,
                message.clone(),
            ))),
            None => Ok(state),
        }
    }
}

fn not_found(what: &str) -> ControllerError {
    ControllerError::Rejected(ApiError::new(
        ErrorCode::NotFound,
        format!("{what} not found"),
    ))
}

#[async_trait]
impl<R: Entity + PartialEq> CollectionBackend<R> for FakeBackend<R> {
    async fn list(&self, query: &ListQuery) -> Result<Vec<R>, ControllerError> {
        let state = self.begin(Call::List(query.clone()))?;
        Ok(state
            .records
            .iter()
            .filter(|record| match &query.category {
                Some(category) => record.category() == Some(category.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn fetch(&self, slug: &str) -> Result<R, ControllerError> {
        let state = self.begin(Call::Fetch(slug.to_string()))?;
        state
            .records
            .iter()
            .find(|record| record.slug() == slug)
            .cloned()
            .ok_or_else(|| not_found(slug))
    }

    async fn create(&self, record: &R) -> Result<R, ControllerError> {
        let mut state = self.begin(Call::Create(record.clone()))?;
        let mut created = record.clone();
        created.meta_mut().id = Some(RecordId(state.next_id));
        state.next_id += 1;
        state.records.push(created.clone());
        Ok(created)
    }

    async fn update(&self, slug: &str, record: &R) -> Result<R, ControllerError> {
        let mut state = self.begin(Call::Update(slug.to_string(), record.clone()))?;
        let stored = state
            .records
            .iter_mut()
            .find(|stored| stored.slug() == slug)
            .ok_or_else(|| not_found(slug))?;
        let id = stored.id();
        *stored = record.clone();
        stored.meta_mut().id = id;
        Ok(stored.clone())
    }

    async fn patch(
        &self,
        id: RecordId,
        fields: &Map<String, Value>,
    ) -> Result<R, ControllerError> {
        let mut state = self.begin(Call::Patch(id, fields.clone()))?;
        let stored = state
            .records
            .iter_mut()
            .find(|stored| stored.id() == Some(id))
            .ok_or_else(|| not_found(&id.to_string()))?;
        let mut value = serde_json::to_value(&*stored).expect("serialize");
        if let Value::Object(map) = &mut value {
            for (key, field) in fields {
                map.insert(key.clone(), field.clone());
            }
        }
        *stored = serde_json::from_value(value).expect("deserialize");
        Ok(stored.clone())
    }

    async fn delete(&self, key: &str) -> Result<(), ControllerError> {
        let mut state = self.begin(Call::Delete(key.to_string()))?;
        state.records.retain(|record| {
            record.slug() != key && record.id().map(|id| id.to_string()).as_deref() != Some(key)
        });
        Ok(())
    }

    async fn save_all(&self, records: &[R]) -> Result<Vec<R>, ControllerError> {
        let mut state = self.begin(Call::SaveAll(records.to_vec()))?;
        state.records = records.to_vec();
        Ok(state.records.clone())
    }
}

type MentorController = CollectionController<Mentor, FakeBackend<Mentor>>;

fn mentor(id: i64, order: i64, active: bool, name: &str) -> Mentor {
    Mentor {
        meta: RecordMeta {
            id: Some(RecordId(id)),
            slug: name.to_ascii_lowercase(),
            order,
            active,
        },
        name: name.to_string(),
        ..Mentor::default()
    }
}

fn alice_bob_cara() -> Vec<Mentor> {
    vec![
        mentor(1, 0, true, "Alice"),
        mentor(2, 1, false, "Bob"),
        mentor(3, 2, true, "Cara"),
    ]
}

fn saved(id: i64) -> RecordKey {
    RecordKey::Saved(RecordId(id))
}

async fn loaded(records: Vec<Mentor>) -> MentorController {
    let backend = FakeBackend::with_records(records);
    let mut controller = CollectionController::new(backend);
    controller.load().await.expect("initial load");
    controller.backend().clear_calls();
    controller
}

fn ids(controller: &MentorController) -> Vec<i64> {
    controller
        .records()
        .into_iter()
        .filter_map(|record| record.id().map(|id| id.0))
        .collect()
}

fn orders(controller: &MentorController) -> Vec<i64> {
    controller
        .records()
        .into_iter()
        .map(|record| record.order())
        .collect()
}

#[tokio::test]
async fn load_sorts_by_order() {
    let controller = loaded(vec![
        mentor(3, 2, true, "Cara"),
        mentor(1, 0, true, "Alice"),
        mentor(2, 1, false, "Bob"),
    ])
    .await;

    assert_eq!(ids(&controller), vec![1, 2, 3]);
    assert_eq!(controller.load_state(), &LoadState::Loaded);
    assert!(controller
        .entries()
        .iter()
        .all(|entry| matches!(entry.state(), EditState::Committed(_))));
}

#[tokio::test]
async fn load_sends_the_configured_query() {
    let backend = FakeBackend::with_records(alice_bob_cara());
    let query = ListQuery {
        category: Some("Robotics".to_string()),
        ..ListQuery::default()
    };
    let mut controller = CollectionController::new(backend).with_query(query.clone());
    controller.load().await.expect("load");

    assert_eq!(controller.backend().calls(), vec![Call::List(query)]);
    assert!(controller.is_empty());
}

#[tokio::test]
async fn failed_load_keeps_previous_entries_and_notifies() {
    let mut controller = loaded(alice_bob_cara()).await;
    let mut notifications = controller.subscribe();
    controller.backend().fail_with(Some("db unavailable"));

    let err = controller.load().await.expect_err("load must fail");
    assert_eq!(err.to_string(), "db unavailable");
    assert_eq!(ids(&controller), vec![1, 2, 3]);
    assert_eq!(
        controller.load_state(),
        &LoadState::Failed("db unavailable".to_string())
    );

    match notifications.try_recv().expect("notification") {
        Notification::Error(message) => assert!(message.contains("db unavailable")),
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[tokio::test]
async fn public_view_of_loaded_records_never_shows_inactive() {
    let controller = loaded(alice_bob_cara()).await;
    let records: Vec<Mentor> = controller.records().into_iter().cloned().collect();

    let visible: Vec<&str> = public_view(&records)
        .into_iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(visible, vec!["Alice", "Cara"]);
}

#[tokio::test]
async fn empty_filter_returns_everything_in_order() {
    let controller = loaded(alice_bob_cara()).await;
    let filtered: Vec<i64> = controller
        .filter(&FilterCriteria::default())
        .into_iter()
        .filter_map(|entry| entry.record().id().map(|id| id.0))
        .collect();
    assert_eq!(filtered, ids(&controller));
}

#[tokio::test]
async fn filter_composes_search_and_active_only() {
    let mut alina = mentor(2, 1, false, "Alina");
    alina.bio = "Former founder".to_string();
    let mut bob = mentor(3, 2, true, "Bob");
    bob.company = "Alicorp".to_string();
    let controller = loaded(vec![mentor(1, 0, true, "Alice"), alina, bob]).await;

    let criteria = FilterCriteria {
        search: "ALI".to_string(),
        active_only: true,
        ..FilterCriteria::default()
    };
    let names: Vec<&str> = controller
        .filter(&criteria)
        .into_iter()
        .map(|entry| entry.record().name.as_str())
        .collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
    assert_eq!(controller.len(), 3);
}

#[tokio::test]
async fn filter_matches_category_and_location_exactly() {
    let mut alice = mentor(1, 0, true, "Alice");
    alice.expertise = "Robotics".to_string();
    alice.location = "Lagos".to_string();
    let mut bob = mentor(2, 1, true, "Bob");
    bob.expertise = "Robotics".to_string();
    bob.location = "Nairobi".to_string();
    let mut cara = mentor(3, 2, true, "Cara");
    cara.expertise = "Design".to_string();
    cara.location = "Lagos".to_string();
    let controller = loaded(vec![alice, bob, cara]).await;

    let criteria = FilterCriteria {
        category: Some("Robotics".to_string()),
        location: Some("Lagos".to_string()),
        ..FilterCriteria::default()
    };
    let names: Vec<&str> = controller
        .filter(&criteria)
        .into_iter()
        .map(|entry| entry.record().name.as_str())
        .collect();
    assert_eq!(names, vec!["Alice"]);
}

#[tokio::test]
async fn filter_reorder_delete_scenario() {
    let mut controller = loaded(alice_bob_cara()).await;

    let active: Vec<i64> = controller
        .filter(&FilterCriteria {
            active_only: true,
            ..FilterCriteria::default()
        })
        .into_iter()
        .filter_map(|entry| entry.record().id().map(|id| id.0))
        .collect();
    assert_eq!(active, vec![1, 3]);

    assert!(controller.reorder(saved(3), Direction::Up).expect("reorder"));
    assert_eq!(ids(&controller), vec![1, 3, 2]);
    assert_eq!(orders(&controller), vec![0, 1, 2]);

    controller.request_delete(saved(2)).expect("prompt");
    controller.confirm().await.expect("delete");
    assert_eq!(ids(&controller), vec![1, 3]);
    assert_eq!(orders(&controller), vec![0, 1]);
    assert_eq!(controller.len(), 2);
}

#[tokio::test]
async fn reorder_up_then_down_restores_order() {
    let mut controller = loaded(alice_bob_cara()).await;
    let before: Vec<Mentor> = controller.records().into_iter().cloned().collect();

    assert!(controller.reorder(saved(2), Direction::Up).expect("up"));
    assert!(controller.reorder(saved(2), Direction::Down).expect("down"));

    let after: Vec<Mentor> = controller.records().into_iter().cloned().collect();
    assert_eq!(before, after);
    assert!(controller.has_unsaved_order());
}

#[tokio::test]
async fn reorder_past_either_end_is_a_no_op() {
    let mut controller = loaded(alice_bob_cara()).await;

    assert!(!controller.reorder(saved(1), Direction::Up).expect("first up"));
    assert!(!controller.reorder(saved(3), Direction::Down).expect("last down"));
    assert_eq!(ids(&controller), vec![1, 2, 3]);
    assert_eq!(orders(&controller), vec![0, 1, 2]);
    assert!(!controller.has_unsaved_order());
}

#[tokio::test]
async fn reorder_keeps_snapshot_in_step_while_editing() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .update_draft(saved(3), |record| record.name = "Cara B".to_string())
        .expect("edit");
    controller.reorder(saved(3), Direction::Up).expect("reorder");
    controller.cancel_edit(saved(3)).expect("cancel");

    let cara = controller.entry(saved(3)).expect("cara").record();
    assert_eq!(cara.name, "Cara");
    assert_eq!(cara.order(), 1);
}

#[tokio::test]
async fn delete_removes_exactly_one_record() {
    let mut controller = loaded(alice_bob_cara()).await;
    let prompt = controller.request_delete(saved(2)).expect("prompt");
    assert_eq!(prompt.action, ConfirmAction::Delete);
    assert!(prompt.summary.contains("Bob"));
    assert!(controller.backend().calls().is_empty());

    controller.confirm().await.expect("delete");

    assert_eq!(controller.backend().calls(), vec![Call::Delete("bob".to_string())]);
    assert_eq!(ids(&controller), vec![1, 3]);
    assert_eq!(orders(&controller), vec![0, 2]);
}

#[tokio::test]
async fn failed_delete_keeps_the_record() {
    let mut controller = loaded(alice_bob_cara()).await;
    let mut notifications = controller.subscribe();
    controller.backend().fail_with(Some("locked"));

    controller.request_delete(saved(2)).expect("prompt");
    controller.confirm().await.expect_err("delete must fail");

    assert_eq!(ids(&controller), vec![1, 2, 3]);
    assert!(matches!(
        notifications.try_recv(),
        Ok(Notification::Error(message)) if message.contains("locked")
    ));
}

#[tokio::test]
async fn toggle_sends_one_update_with_only_active_flipped() {
    let mut alice = mentor(1, 0, true, "Alice");
    alice.bio = "Robotics lead".to_string();
    let mut controller = loaded(vec![alice.clone()]).await;

    let prompt = controller.request_toggle_active(saved(1)).expect("prompt");
    assert_eq!(
        prompt.action,
        ConfirmAction::ToggleActive {
            from: true,
            to: false
        }
    );
    controller.confirm().await.expect("toggle");

    let mut expected = alice;
    expected.meta.active = false;
    assert_eq!(
        controller.backend().calls(),
        vec![Call::Update("alice".to_string(), expected)]
    );
    assert!(!controller.entry(saved(1)).expect("alice").record().active());
}

#[tokio::test]
async fn failed_toggle_leaves_active_unchanged() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller.backend().fail_with(Some("db unavailable"));

    controller.request_toggle_active(saved(1)).expect("prompt");
    let err = controller.confirm().await.expect_err("toggle must fail");

    assert_eq!(err.code(), Some(ErrorCode::Internal));
    assert!(controller.entry(saved(1)).expect("alice").record().active());
    assert!(controller.pending_confirmation().is_none());
}

#[tokio::test]
async fn nothing_is_sent_without_confirmation() {
    let mut controller = loaded(alice_bob_cara()).await;

    controller.request_toggle_active(saved(1)).expect("prompt");
    assert!(controller.cancel_confirmation().is_some());
    assert!(matches!(
        controller.confirm().await,
        Err(ControllerError::NoPendingConfirmation)
    ));

    assert!(controller.backend().calls().is_empty());
    assert!(controller.entry(saved(1)).expect("alice").record().active());
}

#[tokio::test]
async fn toggle_while_editing_flips_draft_and_snapshot() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .update_draft(saved(1), |record| record.bio = "unsaved".to_string())
        .expect("edit");

    controller.request_toggle_active(saved(1)).expect("prompt");
    controller.confirm().await.expect("toggle");

    match controller.entry(saved(1)).expect("alice").state() {
        EditState::Editing { draft, snapshot } => {
            assert!(!draft.active());
            assert!(!snapshot.active());
            assert_eq!(draft.bio, "unsaved");
            assert_eq!(snapshot.bio, "");
        }
        other => panic!("unexpected state: {other:?}"),
    }
    let Call::Update(_, body) = &controller.backend().calls()[0] else {
        panic!("expected an update call");
    };
    assert_eq!(body.bio, "");
}

#[tokio::test]
async fn drafts_cannot_be_toggled_or_deleted() {
    let mut controller = loaded(alice_bob_cara()).await;
    let draft = controller.add_draft();

    assert!(matches!(
        controller.request_delete(draft),
        Err(ControllerError::NotPersisted(key)) if key == draft
    ));
    assert!(matches!(
        controller.request_toggle_active(saved(99)),
        Err(ControllerError::UnknownRecord(_))
    ));
}

#[tokio::test]
async fn add_draft_appends_after_existing_records() {
    let mut controller = loaded(alice_bob_cara()).await;
    let key = controller.add_draft();

    let entry = controller.entries().last().expect("draft");
    assert_eq!(entry.key(), key);
    assert!(matches!(entry.state(), EditState::Draft(_)));
    assert_eq!(entry.record().order(), 3);
    assert_eq!(entry.record().id(), None);
    assert!(controller.backend().calls().is_empty());
}

#[tokio::test]
async fn update_draft_starts_editing_and_cancel_reverts() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .update_draft(saved(1), |record| record.name = "Alicia".to_string())
        .expect("edit");

    match controller.entry(saved(1)).expect("alice").state() {
        EditState::Editing { draft, snapshot } => {
            assert_eq!(draft.name, "Alicia");
            assert_eq!(snapshot.name, "Alice");
        }
        other => panic!("unexpected state: {other:?}"),
    }

    controller.cancel_edit(saved(1)).expect("cancel");
    let entry = controller.entry(saved(1)).expect("alice");
    assert!(matches!(entry.state(), EditState::Committed(_)));
    assert_eq!(entry.record().name, "Alice");
    assert!(controller.backend().calls().is_empty());
}

#[tokio::test]
async fn cancel_edit_drops_an_unsaved_draft() {
    let mut controller = loaded(alice_bob_cara()).await;
    let draft = controller.add_draft();
    controller.cancel_edit(draft).expect("cancel");

    assert_eq!(controller.len(), 3);
    assert!(controller.entry(draft).is_none());
}

#[tokio::test]
async fn begin_edit_snapshots_committed_value() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller.begin_edit(saved(2)).expect("edit");

    let state = controller.entry(saved(2)).expect("bob").state();
    assert!(state.is_editing());
    assert_eq!(state.current(), state.committed().expect("snapshot"));
}

#[tokio::test]
async fn save_validates_before_contacting_backend() {
    let mut controller = loaded(alice_bob_cara()).await;
    let draft = controller.add_draft();
    controller
        .update_draft(draft, |record| record.bio = "bio only".to_string())
        .expect("edit");

    let err = controller
        .save(SaveTarget::Record(draft))
        .await
        .expect_err("invalid");
    let ControllerError::Validation(fields) = err else {
        panic!("expected validation error");
    };
    let names: Vec<&str> = fields.iter().map(|field| field.field).collect();
    assert_eq!(names, vec!["slug", "name"]);
    assert!(controller.backend().calls().is_empty());
}

#[tokio::test]
async fn saving_a_draft_creates_then_reloads() {
    let mut controller = loaded(alice_bob_cara()).await;
    let draft = controller.add_draft();
    controller
        .update_draft(draft, |record| {
            record.meta.slug = "dee".to_string();
            record.name = "Dee".to_string();
        })
        .expect("edit");

    controller
        .save(SaveTarget::Record(draft))
        .await
        .expect("save");

    let calls = controller.backend().calls();
    assert!(matches!(&calls[0], Call::Create(record) if record.id().is_none()));
    assert!(matches!(&calls[1], Call::List(_)));

    assert!(controller.entry(draft).is_none());
    let dee = controller.entry(saved(4)).expect("created record");
    assert!(matches!(dee.state(), EditState::Committed(_)));
    assert_eq!(dee.record().order(), 3);
}

#[tokio::test]
async fn saving_an_edit_puts_by_the_committed_slug() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .update_draft(saved(1), |record| record.meta.slug = "alice-a".to_string())
        .expect("edit");

    controller
        .save(SaveTarget::Record(saved(1)))
        .await
        .expect("save");

    let calls = controller.backend().calls();
    assert!(matches!(
        &calls[0],
        Call::Update(slug, record) if slug == "alice" && record.slug() == "alice-a"
    ));
    assert_eq!(
        controller.entry(saved(1)).expect("alice").record().slug(),
        "alice-a"
    );
}

#[tokio::test]
async fn failed_save_keeps_local_edits() {
    let mut controller = loaded(alice_bob_cara()).await;
    let mut notifications = controller.subscribe();
    controller
        .update_draft(saved(1), |record| record.name = "Alicia".to_string())
        .expect("edit");
    controller.backend().fail_with(Some("duplicate slug"));

    controller
        .save(SaveTarget::Record(saved(1)))
        .await
        .expect_err("save must fail");

    let entry = controller.entry(saved(1)).expect("alice");
    assert!(entry.state().is_editing());
    assert_eq!(entry.record().name, "Alicia");
    assert!(matches!(
        notifications.try_recv(),
        Ok(Notification::Error(message)) if message.contains("duplicate slug")
    ));
}

#[tokio::test]
async fn record_save_keeps_other_unsaved_edits_and_drafts() {
    let mut controller = loaded(alice_bob_cara()).await;
    let dina = controller.add_draft();
    controller
        .update_draft(dina, |record| record.name = "Dina".to_string())
        .expect("draft");
    controller
        .update_draft(saved(1), |record| record.name = "Alice B".to_string())
        .expect("edit alice");
    controller
        .update_draft(saved(3), |record| record.name = "Cara C".to_string())
        .expect("edit cara");

    controller
        .save(SaveTarget::Record(saved(1)))
        .await
        .expect("save alice");

    let calls = controller.backend().calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[0], Call::Update(slug, _) if slug == "alice"));

    let alice = controller.entry(saved(1)).expect("alice");
    assert!(matches!(alice.state(), EditState::Committed(record) if record.name == "Alice B"));

    let cara = controller.entry(saved(3)).expect("cara");
    let EditState::Editing { draft, snapshot } = cara.state() else {
        panic!("cara should still be edited, got {:?}", cara.state());
    };
    assert_eq!(draft.name, "Cara C");
    assert_eq!(snapshot.name, "Cara");

    let unsaved = controller.entry(dina).expect("draft kept");
    assert!(matches!(unsaved.state(), EditState::Draft(record) if record.name == "Dina"));
    assert_eq!(controller.len(), 4);
}

#[tokio::test]
async fn edit_of_a_record_removed_elsewhere_is_dropped_on_reload() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .update_draft(saved(2), |record| record.name = "Bobby".to_string())
        .expect("edit bob");
    controller
        .backend()
        .state
        .lock()
        .expect("lock")
        .records
        .retain(|record| record.slug() != "bob");

    controller
        .save(SaveTarget::Record(saved(1)))
        .await
        .expect("save alice");

    assert!(controller.entry(saved(2)).is_none());
    assert_eq!(ids(&controller), vec![1, 3]);
}

fn team_member(id: i64, order: i64, name: &str) -> TeamMember {
    TeamMember {
        meta: RecordMeta {
            id: Some(RecordId(id)),
            slug: name.to_ascii_lowercase(),
            order,
            active: true,
        },
        name: name.to_string(),
        role: "Organizer".to_string(),
        ..TeamMember::default()
    }
}

#[tokio::test]
async fn collection_save_sends_every_record_in_current_order() {
    let backend = FakeBackend::with_records(vec![
        team_member(1, 0, "Ada"),
        team_member(2, 1, "Ben"),
    ]);
    let mut controller = CollectionController::new(backend);
    controller.load().await.expect("load");
    controller.backend().clear_calls();

    controller.reorder(saved(2), Direction::Up).expect("reorder");
    controller
        .save(SaveTarget::Collection)
        .await
        .expect("save collection");

    let calls = controller.backend().calls();
    let Call::SaveAll(sent) = &calls[0] else {
        panic!("expected a bulk save, got {calls:?}");
    };
    let sent: Vec<(&str, i64)> = sent.iter().map(|m| (m.name.as_str(), m.order())).collect();
    assert_eq!(sent, vec![("Ben", 0), ("Ada", 1)]);
    assert!(matches!(calls[1], Call::List(_)));
    assert!(!controller.has_unsaved_order());

    let names: Vec<&str> = controller
        .records()
        .into_iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(names, vec!["Ben", "Ada"]);
}

#[tokio::test]
async fn collection_save_refuses_unsaved_drafts() {
    let backend = FakeBackend::with_records(vec![team_member(1, 0, "Ada")]);
    let mut controller = CollectionController::new(backend);
    controller.load().await.expect("load");
    controller.backend().clear_calls();

    let draft = controller.add_draft();
    assert!(matches!(
        controller.save(SaveTarget::Collection).await,
        Err(ControllerError::NotPersisted(key)) if key == draft
    ));
    assert!(controller.backend().calls().is_empty());
}

#[tokio::test]
async fn save_target_follows_the_collection_shape() {
    let mentors = loaded(alice_bob_cara()).await;
    assert_eq!(
        mentors.save_target_for(saved(1)),
        SaveTarget::Record(saved(1))
    );

    let backend = FakeBackend::with_records(vec![
        team_member(1, 0, "Ada"),
        team_member(2, 1, "Ben"),
    ]);
    let mut team = CollectionController::new(backend);
    team.load().await.expect("load");
    team.backend().clear_calls();

    team.update_draft(saved(1), |member| member.role = "Lead".to_string())
        .expect("edit");
    let target = team.save_target_for(saved(1));
    assert_eq!(target, SaveTarget::Collection);
    team.save(target).await.expect("save");
    let calls = team.backend().calls();
    assert!(matches!(&calls[0], Call::SaveAll(sent) if sent.len() == 2 && sent[0].role == "Lead"));

    let draft = team.add_draft();
    assert_eq!(team.save_target_for(draft), SaveTarget::Record(draft));
}

#[tokio::test]
async fn patch_replaces_committed_value_with_server_response() {
    let applicant = Applicant {
        meta: RecordMeta {
            id: Some(RecordId(7)),
            slug: "jo".to_string(),
            order: 0,
            active: true,
        },
        name: "Jo".to_string(),
        email: "jo@example.org".to_string(),
        ..Applicant::default()
    };
    let backend = FakeBackend::with_records(vec![applicant]);
    let mut controller = CollectionController::new(backend);
    controller.load().await.expect("load");

    let mut fields = Map::new();
    fields.insert("status".to_string(), Value::from("reviewing"));
    controller
        .patch(saved(7), fields.clone())
        .await
        .expect("patch");

    let record = controller.entry(saved(7)).expect("jo").record();
    assert_eq!(record.status, ApplicantStatus::Reviewing);
    assert!(controller
        .backend()
        .calls()
        .contains(&Call::Patch(RecordId(7), fields)));
    assert_eq!(controller.backend().stored()[0].status, ApplicantStatus::Reviewing);

    let draft = controller.add_draft();
    assert!(matches!(
        controller.patch(draft, Map::new()).await,
        Err(ControllerError::NotPersisted(_))
    ));
    assert!(matches!(
        controller.apply_uploaded_image(saved(7), "https://cdn.example.org/jo.png"),
        Err(ControllerError::Validation(_))
    ));
}

#[tokio::test]
async fn last_uploaded_image_wins() {
    let mut controller = loaded(alice_bob_cara()).await;
    controller
        .apply_uploaded_image(saved(1), "https://cdn.example.org/first.png")
        .expect("first upload");
    controller
        .apply_uploaded_image(saved(1), "https://cdn.example.org/second.png")
        .expect("second upload");

    match controller.entry(saved(1)).expect("alice").state() {
        EditState::Editing { draft, snapshot } => {
            assert_eq!(draft.image_url, "https://cdn.example.org/second.png");
            assert_eq!(snapshot.image_url, "");
        }
        other => panic!("unexpected state: {other:?}"),
    }
    assert!(controller.backend().calls().is_empty());
}

#[tokio::test]
async fn successful_mutations_notify() {
    let mut controller = loaded(alice_bob_cara()).await;
    let mut notifications = controller.subscribe();

    controller.request_toggle_active(saved(2)).expect("prompt");
    controller.confirm().await.expect("toggle");

    assert_eq!(
        notifications.try_recv().expect("notification"),
        Notification::Success("\"Bob\" is now active".to_string())
    );
}
