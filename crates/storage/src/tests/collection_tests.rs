use super::*;
use crate::SequentialIds;
use shared::domain::{fields, ChecklistItem, TodoItem};
use std::sync::Mutex;

fn todos() -> Collection<TodoItem> {
    Collection::with_id_generator("todos", Arc::new(SequentialIds::starting_at(1)))
}

fn text(value: &str) -> FieldMap {
    fields([("text", value)])
}

fn assert_consistent<E: Entity>(collection: &Collection<E>) {
    collection
        .snapshot()
        .expect("snapshot")
        .check_invariants()
        .expect("invariants");
}

#[test]
fn scenario_add_move_remove_reset() {
    let list = todos();
    let a = list.add(text("a")).expect("add a");
    assert_eq!(*list.snapshot().expect("snapshot").ids, vec![a]);

    let b = list.add(text("b")).expect("add b");
    assert_eq!(*list.snapshot().expect("snapshot").ids, vec![a, b]);

    list.move_down(a).expect("move down");
    assert_eq!(*list.snapshot().expect("snapshot").ids, vec![b, a]);

    list.remove(b).expect("remove b");
    assert_eq!(*list.snapshot().expect("snapshot").ids, vec![a]);
    assert_consistent(&list);

    list.reset().expect("reset");
    let snapshot = list.snapshot().expect("snapshot");
    assert!(snapshot.ids.is_empty());
    assert!(snapshot.items.is_empty());
}

#[test]
fn added_id_is_last_in_ordering_sequence() {
    let list = todos();
    list.add(text("first")).expect("add");
    let id = list.add(text("second")).expect("add");
    let snapshot = list.snapshot().expect("snapshot");
    assert_eq!(snapshot.ids.last(), Some(&id));
    assert_eq!(snapshot.get(id).map(|item| item.text.as_str()), Some("second"));
}

#[test]
fn remove_twice_matches_single_remove() {
    let list = todos();
    let a = list.add(text("a")).expect("add");
    list.add(text("b")).expect("add");

    list.remove(a).expect("remove");
    let once = list.snapshot().expect("snapshot");
    list.remove(a).expect("remove again");
    let twice = list.snapshot().expect("snapshot");

    assert_eq!(*once, *twice);
    assert_consistent(&list);
}

#[test]
fn clone_then_remove_original_leaves_equal_copy() {
    let list = todos();
    let original_id = list.add(text("milk")).expect("add");
    list.set_field(original_id, "is_done", FieldValue::Flag(true))
        .expect("set done");
    let original = list.get(original_id).expect("get").expect("present");

    let copy_id = list
        .clone_entity(original_id)
        .expect("clone")
        .expect("copy created");
    list.remove(original_id).expect("remove");

    let snapshot = list.snapshot().expect("snapshot");
    assert_eq!(*snapshot.ids, vec![copy_id]);
    let copy = snapshot.get(copy_id).expect("copy");
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.with_id(original.id), original);
}

#[test]
fn clone_of_absent_id_is_a_no_op() {
    let list = todos();
    list.add(text("a")).expect("add");
    let before = list.snapshot().expect("snapshot");
    assert_eq!(list.clone_entity(EntityId::random()).expect("clone"), None);
    assert_eq!(*list.snapshot().expect("snapshot"), *before);
}

#[test]
fn moves_at_the_boundaries_change_nothing() {
    let list = todos();
    let a = list.add(text("a")).expect("add");
    list.add(text("b")).expect("add");
    let c = list.add(text("c")).expect("add");
    let before = list.snapshot().expect("snapshot");

    list.move_up(a).expect("move up first");
    list.move_down(c).expect("move down last");

    assert_eq!(*list.snapshot().expect("snapshot"), *before);
}

#[test]
fn move_up_swaps_with_predecessor() {
    let list = todos();
    let a = list.add(text("a")).expect("add");
    let b = list.add(text("b")).expect("add");
    let c = list.add(text("c")).expect("add");

    list.move_up(c).expect("move up");
    assert_eq!(*list.snapshot().expect("snapshot").ids, vec![a, c, b]);
    let texts: Vec<_> = list
        .snapshot()
        .expect("snapshot")
        .ordered()
        .map(|item| item.text.clone())
        .collect();
    assert_eq!(texts, vec!["a", "c", "b"]);
    assert_consistent(&list);
}

#[test]
fn set_field_replaces_entity_without_touching_old_snapshot() {
    let list = todos();
    let id = list.add(text("a")).expect("add");
    let before = list.snapshot().expect("snapshot");

    list.set_field(id, "text", FieldValue::Text("renamed".into()))
        .expect("set field");

    assert_eq!(before.get(id).expect("old").text, "a");
    assert_eq!(list.get(id).expect("get").expect("present").text, "renamed");
}

#[test]
fn mutations_on_absent_ids_leave_state_unchanged() {
    let list = todos();
    list.add(text("a")).expect("add");
    let before = list.snapshot().expect("snapshot");
    let missing = EntityId::random();

    list.set_field(missing, "is_done", FieldValue::Flag(true))
        .expect("set field");
    list.remove(missing).expect("remove");
    list.move_up(missing).expect("move up");
    list.move_down(missing).expect("move down");

    assert_eq!(*list.snapshot().expect("snapshot"), *before);
    assert_eq!(list.get(missing).expect("get"), None);
}

#[test]
fn colliding_add_is_rejected() {
    let list = todos();
    let id = list.add(text("original")).expect("add");
    list.apply(Mutation::Add {
        id,
        fields: text("impostor"),
    })
    .expect("apply");

    let snapshot = list.snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get(id).expect("present").text, "original");
    assert_consistent(&list);
}

#[test]
fn invariants_hold_across_mixed_operations() {
    let list = todos();
    let mut live = Vec::new();
    for round in 0..20 {
        let id = list.add(text(&format!("item {round}"))).expect("add");
        live.push(id);
        if round % 3 == 0 {
            list.clone_entity(live[0]).expect("clone");
        }
        if round % 4 == 0 {
            list.move_up(id).expect("move up");
        }
        if round % 5 == 0 {
            list.remove(live.remove(0)).expect("remove");
        }
        assert_consistent(&list);
    }
}

#[test]
fn check_invariants_reports_mismatched_structures() {
    let id = EntityId::random();
    let mut broken = CollectionState::<TodoItem>::default();
    Arc::make_mut(&mut broken.ids).push(id);
    assert!(matches!(
        broken.check_invariants(),
        Err(StoreError::InvariantViolation(_))
    ));

    let mut duplicated = CollectionState::<TodoItem>::default();
    duplicated.ids = Arc::new(vec![id, id]);
    let items = Arc::make_mut(&mut duplicated.items);
    items.insert(id, TodoItem::from_fields(id, &text("x")));
    items.insert(EntityId::random(), TodoItem::from_fields(id, &text("y")));
    assert!(duplicated.check_invariants().is_err());
}

#[test]
fn ordering_subscriber_ignores_field_updates() {
    let list = todos();
    let orders = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&orders);
    let _sub = list
        .subscribe(
            |state: &CollectionState<TodoItem>| state.ids.to_vec(),
            move |ids: &Vec<EntityId>| seen.lock().expect("lock").push(ids.len()),
        )
        .expect("subscribe");

    let id = list.add(text("a")).expect("add");
    list.set_field(id, "is_done", FieldValue::Flag(true))
        .expect("set field");
    list.add(text("b")).expect("add");

    assert_eq!(*orders.lock().expect("lock"), vec![1, 2]);
}

#[test]
fn item_subscriber_sees_absence_after_remove() {
    let list = todos();
    let id = list.add(text("a")).expect("add");
    let updates = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&updates);
    let _sub = list
        .subscribe(
            move |state: &CollectionState<TodoItem>| state.get(id).cloned(),
            move |item: &Option<TodoItem>| seen.lock().expect("lock").push(item.is_some()),
        )
        .expect("subscribe");

    list.add(text("unrelated")).expect("add");
    list.remove(id).expect("remove");

    assert_eq!(*updates.lock().expect("lock"), vec![false]);
}

#[test]
fn checklist_entities_use_their_own_fields() {
    let list: Collection<ChecklistItem> = Collection::new("checklist");
    let id = list.add(fields([("content", "eggs")])).expect("add");
    list.set_field(id, "finished", FieldValue::Flag(true))
        .expect("finish");
    let item = list.get(id).expect("get").expect("present");
    assert_eq!(item.content, "eggs");
    assert!(item.finished);
}

#[test]
fn snapshot_serializes_ids_items_and_counter() {
    let list = todos();
    let id = list.add(text("a")).expect("add");
    let value = serde_json::to_value(&*list.snapshot().expect("snapshot")).expect("json");
    assert_eq!(value["ids"][0], id.to_string());
    assert_eq!(value["items"][id.to_string()]["text"], "a");
    assert_eq!(value["in_flight"], 0);
}

#[test]
fn commits_share_the_structures_they_leave_alone() {
    let list = todos();
    let a = list.add(text("a")).expect("add");
    list.add(text("b")).expect("add");
    let before = list.snapshot().expect("snapshot");

    let counted = list
        .store()
        .set(Update::Patch(CollectionPatch::unchanged().with_in_flight(1)))
        .expect("set");
    assert!(Arc::ptr_eq(&before.ids, &counted.ids));
    assert!(Arc::ptr_eq(&before.items, &counted.items));

    list.set_field(a, "is_done", FieldValue::Flag(true))
        .expect("set field");
    let edited = list.snapshot().expect("snapshot");
    assert!(Arc::ptr_eq(&before.ids, &edited.ids));
    assert!(!Arc::ptr_eq(&before.items, &edited.items));

    list.move_down(a).expect("move down");
    let moved = list.snapshot().expect("snapshot");
    assert!(Arc::ptr_eq(&edited.items, &moved.items));
    assert_eq!(moved.in_flight, 1);
}
