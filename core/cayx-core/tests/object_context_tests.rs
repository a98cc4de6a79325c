// ObjectContext 통합 테스트
//
// 객체 생명주기, 중첩 컨텍스트, 컨텍스트 간 스냅샷 이벤트를 SQLite 위에서 검증

mod common;

use cayx_core::query::SelectQuery;
use cayx_core::{CayxError, PersistenceState, Value};
use common::{checkouts, count, new_artist, new_painting, runtime, sql_execute, text};

// ═══════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════

#[test]
fn test_commit_without_changes_opens_no_connection() {
    let runtime = runtime();
    let context = runtime.create_context();
    let before = checkouts(&runtime);

    context.commit_changes().unwrap();
    assert_eq!(checkouts(&runtime), before);
}

#[test]
fn test_new_then_deleted_object_is_transient() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Dali");

    context.delete_object(artist).unwrap();
    assert_eq!(context.state(artist), PersistenceState::Transient);
    assert!(context.object_id(artist).is_none());

    let before = checkouts(&runtime);
    context.commit_changes().unwrap();
    assert_eq!(checkouts(&runtime), before);
    assert_eq!(count(&runtime, "ARTIST"), 0);
}

#[test]
fn test_state_transitions() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Monet");
    assert_eq!(context.state(artist), PersistenceState::New);

    context.commit_changes().unwrap();
    assert_eq!(context.state(artist), PersistenceState::Committed);

    context.write_property(artist, "artistName", "Manet").unwrap();
    assert_eq!(context.state(artist), PersistenceState::Modified);
    assert_eq!(context.modified_objects(), vec![artist]);

    context.commit_changes().unwrap();
    assert_eq!(context.state(artist), PersistenceState::Committed);

    context.delete_object(artist).unwrap();
    assert_eq!(context.state(artist), PersistenceState::Deleted);
    assert_eq!(context.deleted_objects(), vec![artist]);

    context.commit_changes().unwrap();
    assert_eq!(context.state(artist), PersistenceState::Transient);
    assert_eq!(count(&runtime, "ARTIST"), 0);
}

#[test]
fn test_writing_same_value_keeps_committed() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Monet");
    context.commit_changes().unwrap();

    context.write_property(artist, "artistName", "Monet").unwrap();
    assert_eq!(context.state(artist), PersistenceState::Committed);
    assert!(!context.has_changes());
}

#[test]
fn test_round_trip_trims_char_column() {
    let runtime = runtime();
    let context = runtime.create_context();
    new_artist(&context, "Monet");
    context.commit_changes().unwrap();

    // padded the way a CHAR column comes back from most databases
    sql_execute(&runtime, "UPDATE ARTIST SET ARTIST_NAME = 'Monet   '");

    let fresh = runtime.create_context();
    let artists = fresh.perform_query(&SelectQuery::new("Artist")).unwrap();
    assert_eq!(artists.len(), 1);
    assert_eq!(fresh.read_property(artists[0], "artistName").unwrap(), text("Monet"));
    assert_eq!(fresh.state(artists[0]), PersistenceState::Committed);
}

#[test]
fn test_hollow_object_resolves_on_access() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Kahlo");
    context.commit_changes().unwrap();
    let id = context.object_id(artist).unwrap();

    let other = runtime.create_context();
    let hollow = other.object_for_id(&id).unwrap();
    assert_eq!(other.state(hollow), PersistenceState::Hollow);
    assert_eq!(other.read_property(hollow, "artistName").unwrap(), text("Kahlo"));
    assert_eq!(other.state(hollow), PersistenceState::Committed);
}

#[test]
fn test_missing_hollow_object_is_fault_failure() {
    let runtime = runtime();
    let context = runtime.create_context();
    let id = cayx_core::ObjectId::of("Artist", "ARTIST_ID", 999_i64);
    let hollow = context.object_for_id(&id).unwrap();

    let err = context.read_property(hollow, "artistName").unwrap_err();
    assert!(matches!(err, CayxError::FaultFailure(_)));
}

#[test]
fn test_object_handles_are_bound_to_their_context() {
    let runtime = runtime();
    let first = runtime.create_context();
    let second = runtime.create_context();
    let artist = new_artist(&first, "Miro");
    let painting = new_painting(&second, "Dog", None);

    let err = second.set_to_one(painting, "toArtist", Some(artist)).unwrap_err();
    assert!(matches!(err, CayxError::CrossContext(_)));
}

#[test]
fn test_local_objects_share_snapshot_cache() {
    let runtime = runtime();
    let first = runtime.create_context();
    let artist = new_artist(&first, "Goya");
    first.commit_changes().unwrap();

    let second = runtime.create_context();
    let copies = second.local_objects(&first, &[artist]).unwrap();
    let before = checkouts(&runtime);
    assert_eq!(second.read_property(copies[0], "artistName").unwrap(), text("Goya"));
    // served from the shared snapshot cache
    assert_eq!(checkouts(&runtime), before);
}

#[test]
fn test_local_objects_rejects_uncommitted() {
    let runtime = runtime();
    let first = runtime.create_context();
    let artist = new_artist(&first, "Goya");

    let second = runtime.create_context();
    assert!(second.local_objects(&first, &[artist]).is_err());
}

// ═══════════════════════════════════════════════════════════
// Nested contexts
// ═══════════════════════════════════════════════════════════

#[test]
fn test_child_commit_reaches_parent_only() {
    let runtime = runtime();
    let parent = runtime.create_context();
    let child = parent.create_child_context();
    let artist = new_artist(&child, "Rothko");

    child.commit_changes_to_parent().unwrap();
    assert_eq!(child.state(artist), PersistenceState::Committed);
    assert_eq!(parent.new_objects().len(), 1);
    assert_eq!(count(&runtime, "ARTIST"), 0);

    parent.commit_changes().unwrap();
    assert_eq!(count(&runtime, "ARTIST"), 1);
}

#[test]
fn test_child_cascading_commit_reaches_database() {
    let runtime = runtime();
    let parent = runtime.create_context();
    let child = parent.create_child_context();
    let artist = new_artist(&child, "Hopper");
    new_painting(&child, "Nighthawks", Some(artist));

    child.commit_changes().unwrap();
    assert!(!parent.has_changes());
    assert_eq!(count(&runtime, "ARTIST"), 1);
    assert_eq!(count(&runtime, "PAINTING"), 1);
    assert!(!child.object_id(artist).unwrap().is_temporary());
}

#[test]
fn test_child_sees_parent_uncommitted_changes() {
    let runtime = runtime();
    let parent = runtime.create_context();
    let artist = new_artist(&parent, "Vermeer");
    parent.commit_changes().unwrap();
    parent.write_property(artist, "artistName", "Rembrandt").unwrap();

    let child = parent.create_child_context();
    let found = child.perform_query(&SelectQuery::new("Artist")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(child.read_property(found[0], "artistName").unwrap(), text("Rembrandt"));
}

#[test]
fn test_child_local_rollback_keeps_parent_changes() {
    let runtime = runtime();
    let parent = runtime.create_context();
    let child = parent.create_child_context();
    new_artist(&parent, "Turner");
    let child_artist = new_artist(&child, "Constable");

    child.rollback_changes_locally();
    assert_eq!(child.state(child_artist), PersistenceState::Transient);
    assert_eq!(parent.new_objects().len(), 1);
}

#[test]
fn test_child_rollback_propagates_to_parent() {
    let runtime = runtime();
    let parent = runtime.create_context();
    let child = parent.create_child_context();
    new_artist(&parent, "Turner");
    let child_artist = new_artist(&child, "Constable");

    child.rollback_changes().unwrap();
    assert_eq!(child.state(child_artist), PersistenceState::Transient);
    assert!(!parent.has_changes());
}

#[test]
fn test_rollback_restores_committed_values() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Monet");
    context.commit_changes().unwrap();

    context.write_property(artist, "artistName", "Manet").unwrap();
    context.rollback_changes().unwrap();
    assert_eq!(context.read_property(artist, "artistName").unwrap(), text("Monet"));
    assert_eq!(context.state(artist), PersistenceState::Committed);
}

// ═══════════════════════════════════════════════════════════
// Snapshot events between contexts
// ═══════════════════════════════════════════════════════════

#[test]
fn test_committed_update_reaches_other_context() {
    let runtime = runtime();
    let writer = runtime.create_context();
    let artist = new_artist(&writer, "Monet");
    writer.commit_changes().unwrap();

    let reader = runtime.create_context();
    let seen = reader.perform_query(&SelectQuery::new("Artist")).unwrap()[0];
    assert_eq!(reader.read_property(seen, "artistName").unwrap(), text("Monet"));

    writer.write_property(artist, "artistName", "Claude Monet").unwrap();
    writer.commit_changes().unwrap();

    assert_eq!(
        reader.read_property(seen, "artistName").unwrap(),
        text("Claude Monet")
    );
    assert_eq!(reader.state(seen), PersistenceState::Committed);
}

#[test]
fn test_modified_object_keeps_local_changes() {
    let runtime = runtime();
    let writer = runtime.create_context();
    let artist = new_artist(&writer, "Monet");
    writer.commit_changes().unwrap();

    let reader = runtime.create_context();
    let seen = reader.perform_query(&SelectQuery::new("Artist")).unwrap()[0];
    reader.write_property(seen, "artistName", "Local").unwrap();

    writer.write_property(artist, "artistName", "Remote").unwrap();
    writer.commit_changes().unwrap();

    assert_eq!(reader.read_property(seen, "artistName").unwrap(), text("Local"));
    assert_eq!(reader.state(seen), PersistenceState::Modified);
}

#[test]
fn test_deleted_elsewhere_becomes_transient() {
    let runtime = runtime();
    let writer = runtime.create_context();
    let artist = new_artist(&writer, "Monet");
    writer.commit_changes().unwrap();

    let reader = runtime.create_context();
    let seen = reader.perform_query(&SelectQuery::new("Artist")).unwrap()[0];

    writer.delete_object(artist).unwrap();
    writer.commit_changes().unwrap();

    // any call drains pending events
    assert!(reader.perform_query(&SelectQuery::new("Artist")).unwrap().is_empty());
    assert_eq!(reader.state(seen), PersistenceState::Transient);
}

#[test]
fn test_date_attribute_round_trip() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Picasso");
    context.write_property(artist, "dateOfBirth", "1881-10-25").unwrap();
    context.commit_changes().unwrap();

    let fresh = runtime.create_context();
    let found = fresh.perform_query(&SelectQuery::new("Artist")).unwrap();
    assert_eq!(
        fresh.read_property(found[0], "dateOfBirth").unwrap(),
        Value::Text("1881-10-25".to_string())
    );
}
