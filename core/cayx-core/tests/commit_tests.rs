// 커밋 통합 테스트
//
// 삭제 규칙, 키 생성/전파, flattened 관계 링크, 낙관적 잠금, 검증, 실패 시 복구

mod common;

use cayx_core::query::SelectQuery;
use cayx_core::{CayxError, PersistenceState, Transaction, Value};
use common::{
    checkouts, count, new_artist, new_gallery, new_painting, runtime, sql_rows, text,
};

fn new_exhibit(context: &cayx_core::ObjectContext, gallery: cayx_core::ObjRef) -> cayx_core::ObjRef {
    let exhibit = context.new_object("Exhibit").unwrap();
    context.write_property(exhibit, "openingDate", "2024-05-01 10:00:00").unwrap();
    context.set_to_one(exhibit, "toGallery", Some(gallery)).unwrap();
    exhibit
}

// ═══════════════════════════════════════════════════════════
// Keys and ordering
// ═══════════════════════════════════════════════════════════

#[test]
fn test_master_and_dependents_inserted_in_one_commit() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Monet");
    for title in ["Water Lilies", "Haystacks", "Poplars"] {
        new_painting(&context, title, Some(artist));
    }
    context.commit_changes().unwrap();

    assert_eq!(count(&runtime, "ARTIST"), 1);
    let rows = sql_rows(&runtime, "SELECT ARTIST_ID FROM PAINTING");
    assert_eq!(rows.len(), 3);
    let artist_id = context.object_id(artist).unwrap();
    let key = &artist_id.id_snapshot().unwrap()["ARTIST_ID"];
    assert!(rows.iter().all(|r| r.get("ARTIST_ID") == key));
}

#[test]
fn test_generated_keys_start_at_initial_value() {
    let runtime = runtime();
    let context = runtime.create_context();
    let first = new_artist(&context, "A");
    let second = new_artist(&context, "B");
    context.commit_changes().unwrap();

    let mut keys: Vec<i64> = [first, second]
        .iter()
        .map(|a| {
            context.object_id(*a).unwrap().id_snapshot().unwrap()["ARTIST_ID"]
                .as_i64()
                .unwrap()
        })
        .collect();
    keys.sort();
    assert_eq!(keys, vec![200, 201]);
}

#[test]
fn test_dependent_primary_key_propagated() {
    let runtime = runtime();
    let context = runtime.create_context();
    let painting = new_painting(&context, "Sunflowers", None);
    let info = context.new_object("PaintingInfo").unwrap();
    context.write_property(info, "textReview", "bright").unwrap();
    context.set_to_one(info, "painting", Some(painting)).unwrap();
    context.commit_changes().unwrap();

    let painting_key = context.object_id(painting).unwrap().id_snapshot().unwrap()["PAINTING_ID"].clone();
    let info_key = context.object_id(info).unwrap().id_snapshot().unwrap()["PAINTING_ID"].clone();
    assert_eq!(painting_key, info_key);
    assert_eq!(
        context.read_to_one(painting, "toPaintingInfo").unwrap(),
        Some(info)
    );
}

#[test]
fn test_entity_without_primary_key_rejected() {
    let runtime = runtime();
    let context = runtime.create_context();
    let err = context.new_object("NoPkEntity").unwrap_err();
    assert!(matches!(err, CayxError::Configuration(_)));
}

#[test]
fn test_new_rows_linked_by_reflexive_key() {
    let runtime = runtime();
    let context = runtime.create_context();
    // child registered before its parent; the parent row is still inserted first
    let child = context.new_object("ArtGroup").unwrap();
    context.write_property(child, "name", "Pointillism").unwrap();
    let parent = context.new_object("ArtGroup").unwrap();
    context.write_property(parent, "name", "Impressionism").unwrap();
    context.set_to_one(child, "toParentGroup", Some(parent)).unwrap();
    context.commit_changes().unwrap();

    let parent_key = context.object_id(parent).unwrap().id_snapshot().unwrap()["GROUP_ID"].clone();
    let rows = sql_rows(&runtime, "SELECT PARENT_GROUP_ID FROM ARTGROUP WHERE NAME = 'Pointillism'");
    assert_eq!(rows[0].get("PARENT_GROUP_ID"), &parent_key);
    assert_eq!(context.state(child), PersistenceState::Committed);
}

#[test]
fn test_reflexive_key_generated_by_database() {
    let runtime = runtime();
    let context = runtime.create_context();
    // child created first: it still waits for the parent's key
    let child = context.new_object("Catalog").unwrap();
    context.write_property(child, "title", "Drawings").unwrap();
    let parent = context.new_object("Catalog").unwrap();
    context.write_property(parent, "title", "Works on paper").unwrap();
    context.set_to_one(child, "toParentCatalog", Some(parent)).unwrap();
    context.commit_changes().unwrap();

    let parent_key = context.object_id(parent).unwrap().id_snapshot().unwrap()["CATALOG_ID"].clone();
    let rows = sql_rows(&runtime, "SELECT PARENT_CATALOG_ID FROM CATALOG WHERE TITLE = 'Drawings'");
    assert_eq!(rows[0].get("PARENT_CATALOG_ID"), &parent_key);
    assert_eq!(count(&runtime, "CATALOG"), 2);
}

// ═══════════════════════════════════════════════════════════
// Delete rules
// ═══════════════════════════════════════════════════════════

#[test]
fn test_cascade_delete_removes_paintings() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "Cezanne");
    new_painting(&context, "Apples", Some(artist));
    new_painting(&context, "Card Players", Some(artist));
    context.commit_changes().unwrap();

    // fresh context: paintings are fetched while deleting
    let fresh = runtime.create_context();
    let found = fresh.perform_query(&SelectQuery::new("Artist")).unwrap();
    fresh.delete_object(found[0]).unwrap();
    assert_eq!(fresh.deleted_objects().len(), 3);
    fresh.commit_changes().unwrap();

    assert_eq!(count(&runtime, "ARTIST"), 0);
    assert_eq!(count(&runtime, "PAINTING"), 0);
}

#[test]
fn test_deleted_painting_leaves_artist_without_paintings() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = new_artist(&context, "artist1");
    let painting = new_painting(&context, "painting1", Some(artist));
    context.commit_changes().unwrap();

    context.delete_object(painting).unwrap();
    context.commit_changes().unwrap();

    let fresh = runtime.create_context();
    let artists = fresh.perform_query(&SelectQuery::new("Artist")).unwrap();
    assert_eq!(artists.len(), 1);
    assert_eq!(fresh.read_property(artists[0], "artistName").unwrap(), text("artist1"));
    assert!(fresh.read_to_many(artists[0], "paintingArray").unwrap().is_empty());
}

#[test]
fn test_nullify_clears_foreign_key() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = new_gallery(&context, "Louvre");
    let painting = new_painting(&context, "Mona Lisa", None);
    context.set_to_one(painting, "toGallery", Some(gallery)).unwrap();
    context.commit_changes().unwrap();

    context.delete_object(gallery).unwrap();
    assert_eq!(context.state(painting), PersistenceState::Modified);
    context.commit_changes().unwrap();

    assert_eq!(count(&runtime, "GALLERY"), 0);
    let rows = sql_rows(&runtime, "SELECT GALLERY_ID FROM PAINTING");
    assert_eq!(rows[0].get("GALLERY_ID"), &Value::Null);
}

#[test]
fn test_deny_blocks_delete() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = new_gallery(&context, "Prado");
    new_exhibit(&context, gallery);
    context.commit_changes().unwrap();

    let fresh = runtime.create_context();
    let found = fresh.perform_query(&SelectQuery::new("Gallery")).unwrap();
    let err = fresh.delete_object(found[0]).unwrap_err();
    assert!(matches!(err, CayxError::DeleteDenied { .. }));
    assert_eq!(fresh.state(found[0]), PersistenceState::Committed);
    assert!(!fresh.has_changes());
}

// ═══════════════════════════════════════════════════════════
// Flattened relationships
// ═══════════════════════════════════════════════════════════

#[test]
fn test_flattened_relationship_writes_link_rows() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = new_gallery(&context, "Uffizi");
    let exhibit = new_exhibit(&context, gallery);
    let artist = new_artist(&context, "Botticelli");
    context.add_to_many(artist, "exhibitArray", exhibit).unwrap();
    assert_eq!(context.read_to_many(exhibit, "artistArray").unwrap(), vec![artist]);
    context.commit_changes().unwrap();
    assert_eq!(count(&runtime, "ARTIST_EXHIBIT"), 1);

    let fresh = runtime.create_context();
    let artists = fresh.perform_query(&SelectQuery::new("Artist")).unwrap();
    let exhibits = fresh.read_to_many(artists[0], "exhibitArray").unwrap();
    assert_eq!(exhibits.len(), 1);

    fresh.remove_from_many(artists[0], "exhibitArray", exhibits[0]).unwrap();
    fresh.commit_changes().unwrap();
    assert_eq!(count(&runtime, "ARTIST_EXHIBIT"), 0);
    assert_eq!(count(&runtime, "EXHIBIT"), 1);
}

#[test]
fn test_add_then_remove_link_is_no_change() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = new_gallery(&context, "Met");
    let exhibit = new_exhibit(&context, gallery);
    let artist = new_artist(&context, "Sargent");
    context.commit_changes().unwrap();

    context.add_to_many(artist, "exhibitArray", exhibit).unwrap();
    context.remove_from_many(artist, "exhibitArray", exhibit).unwrap();
    assert!(!context.has_changes());
}

#[test]
fn test_deleting_artist_removes_link_rows() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = new_gallery(&context, "Hermitage");
    let exhibit = new_exhibit(&context, gallery);
    let artist = new_artist(&context, "Matisse");
    context.add_to_many(artist, "exhibitArray", exhibit).unwrap();
    context.commit_changes().unwrap();

    context.delete_object(artist).unwrap();
    context.commit_changes().unwrap();
    assert_eq!(count(&runtime, "ARTIST_EXHIBIT"), 0);
    assert_eq!(count(&runtime, "ARTIST"), 0);
    assert_eq!(context.read_to_many(exhibit, "artistArray").unwrap(), vec![]);
}

// ═══════════════════════════════════════════════════════════
// Locking, validation, failures
// ═══════════════════════════════════════════════════════════

#[test]
fn test_optimistic_lock_detects_concurrent_update() {
    let runtime = runtime();
    let setup = runtime.create_context();
    let artist = setup.new_object("LockingArtist").unwrap();
    setup.write_property(artist, "artistName", "Degas").unwrap();
    setup.commit_changes().unwrap();

    let first = runtime.create_context();
    let second = runtime.create_context();
    let a = first.perform_query(&SelectQuery::new("LockingArtist")).unwrap()[0];
    let b = second.perform_query(&SelectQuery::new("LockingArtist")).unwrap()[0];
    first.write_property(a, "artistName", "Edgar Degas").unwrap();
    second.write_property(b, "dateOfBirth", "1834-07-19").unwrap();

    first.commit_changes().unwrap();
    let err = second.commit_changes().unwrap_err();
    assert!(matches!(err, CayxError::OptimisticLock { .. }));
    assert_eq!(second.state(b), PersistenceState::Modified);

    let rows = sql_rows(&runtime, "SELECT ARTIST_NAME, DATE_OF_BIRTH FROM ARTIST");
    assert_eq!(rows[0].get("ARTIST_NAME"), &text("Edgar Degas"));
    assert_eq!(rows[0].get("DATE_OF_BIRTH"), &Value::Null);
}

#[test]
fn test_optimistic_lock_passes_after_refresh() {
    let runtime = runtime();
    let setup = runtime.create_context();
    let artist = setup.new_object("LockingArtist").unwrap();
    setup.write_property(artist, "artistName", "Degas").unwrap();
    setup.commit_changes().unwrap();

    let other = runtime.create_context();
    let b = other.perform_query(&SelectQuery::new("LockingArtist")).unwrap()[0];

    setup.write_property(artist, "artistName", "Edgar Degas").unwrap();
    setup.commit_changes().unwrap();

    // the unmodified copy picked up the new snapshot
    other.write_property(b, "dateOfBirth", "1834-07-19").unwrap();
    other.commit_changes().unwrap();
    assert_eq!(count(&runtime, "ARTIST"), 1);
}

#[test]
fn test_validation_runs_before_any_sql() {
    let runtime = runtime();
    let context = runtime.create_context();
    let gallery = context.new_object("Gallery").unwrap();
    context.write_property(gallery, "galleryName", "x".repeat(101)).unwrap();
    context.new_object("Painting").unwrap();

    let before = checkouts(&runtime);
    let err = context.commit_changes().unwrap_err();
    let CayxError::Validation(failures) = err else {
        panic!("expected validation failure, got {err}");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|f| f.contains("Gallery.galleryName")));
    assert!(failures.iter().any(|f| f.contains("Painting.paintingTitle")));
    assert_eq!(checkouts(&runtime), before);
}

#[test]
fn test_failed_commit_leaves_context_unchanged() {
    let runtime = runtime();
    let context = runtime.create_context();
    new_gallery(&context, "Tate");
    context.commit_changes().unwrap();

    let gallery = new_gallery(&context, "Tate");
    let painting = new_painting(&context, "Ophelia", None);
    context.set_to_one(painting, "toGallery", Some(gallery)).unwrap();

    let err = context.commit_changes().unwrap_err();
    assert!(matches!(err, CayxError::Commit { .. }));
    assert_eq!(context.state(gallery), PersistenceState::New);
    assert!(context.object_id(painting).unwrap().is_temporary());
    assert_eq!(count(&runtime, "PAINTING"), 0);

    context.write_property(gallery, "galleryName", "Tate Britain").unwrap();
    context.commit_changes().unwrap();
    assert_eq!(count(&runtime, "GALLERY"), 2);
    assert_eq!(count(&runtime, "PAINTING"), 1);
}

#[test]
fn test_read_only_entity_cannot_be_saved() {
    let runtime = runtime();
    let context = runtime.create_context();
    let artist = context.new_object("ROArtist").unwrap();
    context.write_property(artist, "artistName", "x").unwrap();

    let err = context.commit_changes().unwrap_err();
    assert!(matches!(err, CayxError::ReadOnlyEntity { .. }));
}

#[test]
fn test_read_only_entity_allows_to_many_changes() {
    let runtime = runtime();
    let setup = runtime.create_context();
    new_artist(&setup, "Vermeer");
    setup.commit_changes().unwrap();

    let context = runtime.create_context();
    let artist = context.perform_query(&SelectQuery::new("ROArtist")).unwrap()[0];
    let painting = new_painting(&context, "The Milkmaid", None);
    context.add_to_many(artist, "paintingArray", painting).unwrap();
    assert_eq!(context.state(artist), PersistenceState::Committed);
    context.commit_changes().unwrap();

    let artist_key = context.object_id(artist).unwrap().id_snapshot().unwrap()["ARTIST_ID"].clone();
    let rows = sql_rows(&runtime, "SELECT ARTIST_ID FROM PAINTING");
    assert_eq!(rows[0].get("ARTIST_ID"), &artist_key);

    // a direct attribute change is still refused
    context.write_property(artist, "artistName", "Johannes Vermeer").unwrap();
    let err = context.commit_changes().unwrap_err();
    assert!(matches!(err, CayxError::ReadOnlyEntity { .. }));
    assert_eq!(count(&runtime, "ARTIST"), 1);
}

#[test]
fn test_external_transaction_spans_commits() {
    let runtime = runtime();
    let first = runtime.create_context();
    let second = runtime.create_context();
    new_artist(&first, "Bosch");
    new_artist(&second, "Bruegel");

    let mut tx = Transaction::external();
    first.commit_changes_in(&mut tx).unwrap();
    second.commit_changes_in(&mut tx).unwrap();
    tx.commit().unwrap();
    assert_eq!(count(&runtime, "ARTIST"), 2);
}
