// 조회 통합 테스트
//
// 관계 경로 한정자, 정렬/페이징, 프리페치, 상속, 데이터 행, 집계, 캐시

mod common;

use cayx_core::exp::{AggregateFunction, Expression};
use cayx_core::query::{CacheStrategy, Ordering, PrefetchSemantics, SelectQuery};
use cayx_core::{DataObject, ObjectContext, PersistenceState, Value};
use common::{checkouts, new_artist, new_gallery, new_painting, runtime, text};
use std::collections::HashMap;

/// Two artists, five paintings, one gallery.
fn seed(context: &ObjectContext) {
    let monet = new_artist(context, "Monet");
    let renoir = new_artist(context, "Renoir");
    let orsay = new_gallery(context, "Orsay");
    for (title, price, artist) in [
        ("Water Lilies", 5000.0, monet),
        ("Haystacks", 3000.0, monet),
        ("Poplars", 800.0, monet),
        ("Luncheon", 4000.0, renoir),
        ("Dance", 600.0, renoir),
    ] {
        let painting = new_painting(context, title, Some(artist));
        context.write_property(painting, "estimatedPrice", price).unwrap();
        if price > 1000.0 {
            context.set_to_one(painting, "toGallery", Some(orsay)).unwrap();
        }
    }
    context.commit_changes().unwrap();
}

fn names(context: &ObjectContext, objects: &[cayx_core::ObjRef], attr: &str) -> Vec<String> {
    objects
        .iter()
        .map(|o| {
            context
                .read_property(*o, attr)
                .unwrap()
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Qualifiers and orderings
// ═══════════════════════════════════════════════════════════

#[test]
fn test_qualifier_through_to_many_returns_distinct_roots() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Artist")
        .qualifier(Expression::parse("paintingArray.estimatedPrice > 1000").unwrap());
    let artists = context.perform_query(&query).unwrap();
    let mut found = names(&context, &artists, "artistName");
    found.sort();
    assert_eq!(found, vec!["Monet", "Renoir"]);
}

#[test]
fn test_qualifier_through_to_one() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Painting")
        .qualifier(Expression::parse("toArtist.artistName = 'Renoir'").unwrap())
        .order_by(Ordering::asc("paintingTitle"));
    let paintings = context.perform_query(&query).unwrap();
    assert_eq!(names(&context, &paintings, "paintingTitle"), vec!["Dance", "Luncheon"]);
}

#[test]
fn test_outer_join_path_matches_missing_relationship() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Painting")
        .qualifier(Expression::parse("toGallery+.galleryName = 'Orsay' or estimatedPrice < 700").unwrap());
    assert_eq!(context.perform_query(&query).unwrap().len(), 4);
}

#[test]
fn test_parameters_and_ordering() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let template = SelectQuery::new("Painting")
        .qualifier(Expression::parse("estimatedPrice between $low and $high").unwrap())
        .order_by(Ordering::desc("estimatedPrice"));
    let params = HashMap::from([
        ("low".to_string(), Value::Double(700.0)),
        ("high".to_string(), Value::Double(4500.0)),
    ]);
    let paintings = context.perform_query(&template.params_with(&params).unwrap()).unwrap();
    assert_eq!(
        names(&context, &paintings, "paintingTitle"),
        vec!["Luncheon", "Haystacks", "Poplars"]
    );
}

#[test]
fn test_like_ignore_case_and_paging() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Painting")
        .qualifier(Expression::parse("paintingTitle ilike '%A%'").unwrap())
        .order_by(Ordering::asc("paintingTitle"))
        .offset(1)
        .limit(2);
    let paintings = context.perform_query(&query).unwrap();
    // Dance, Haystacks, Poplars, Water Lilies
    assert_eq!(names(&context, &paintings, "paintingTitle"), vec!["Haystacks", "Poplars"]);
}

#[test]
fn test_flattened_attribute_read_from_row() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Painting")
        .qualifier(Expression::match_path("paintingTitle", "Dance"));
    let painting = context.perform_query(&query).unwrap()[0];
    assert_eq!(context.read_property(painting, "artistName").unwrap(), text("Renoir"));
}

// ═══════════════════════════════════════════════════════════
// Prefetching
// ═══════════════════════════════════════════════════════════

#[test]
fn test_joint_prefetch_fills_relationship_in_one_statement() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let before = checkouts(&runtime);
    let query = SelectQuery::new("Painting")
        .prefetch("toArtist", PrefetchSemantics::Joint)
        .order_by(Ordering::asc("paintingTitle"));
    let paintings = context.perform_query(&query).unwrap();
    assert_eq!(checkouts(&runtime), before + 1);

    let artist = context.read_to_one(paintings[0], "toArtist").unwrap().unwrap();
    assert_eq!(context.state(artist), PersistenceState::Committed);
    assert_eq!(context.read_property(artist, "artistName").unwrap(), text("Renoir"));
    assert_eq!(checkouts(&runtime), before + 1);
}

#[test]
fn test_disjoint_prefetch_fills_to_many_lists() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let before = checkouts(&runtime);
    let query = SelectQuery::new("Artist")
        .prefetch("paintingArray", PrefetchSemantics::Disjoint)
        .order_by(Ordering::asc("artistName"));
    let artists = context.perform_query(&query).unwrap();
    assert_eq!(checkouts(&runtime), before + 2);

    assert_eq!(context.read_to_many(artists[0], "paintingArray").unwrap().len(), 3);
    assert_eq!(context.read_to_many(artists[1], "paintingArray").unwrap().len(), 2);
    assert_eq!(checkouts(&runtime), before + 2);
}

#[test]
fn test_joint_to_many_prefetch_pages_root_objects() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Artist")
        .prefetch("paintingArray", PrefetchSemantics::Joint)
        .order_by(Ordering::asc("artistName"))
        .limit(1);
    let artists = context.perform_query(&query).unwrap();
    assert_eq!(names(&context, &artists, "artistName"), vec!["Monet"]);
    assert_eq!(context.read_to_many(artists[0], "paintingArray").unwrap().len(), 3);

    let second = context.perform_query(&query.clone().offset(1)).unwrap();
    assert_eq!(names(&context, &second, "artistName"), vec!["Renoir"]);
    assert_eq!(context.read_to_many(second[0], "paintingArray").unwrap().len(), 2);
}

#[test]
fn test_to_many_fault_fetches_once() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Artist").qualifier(Expression::match_path("artistName", "Monet"));
    let monet = context.perform_query(&query).unwrap()[0];

    let before = checkouts(&runtime);
    let paintings = context.read_to_many(monet, "paintingArray").unwrap();
    assert_eq!(paintings.len(), 3);
    context.read_to_many(monet, "paintingArray").unwrap();
    assert_eq!(checkouts(&runtime), before + 1);
    // reverse side is known without another fetch
    assert_eq!(context.read_to_one(paintings[0], "toArtist").unwrap(), Some(monet));
}

// ═══════════════════════════════════════════════════════════
// Inheritance
// ═══════════════════════════════════════════════════════════

fn seed_people(context: &ObjectContext) {
    for (entity, name, kind) in [
        ("Person", "Pat", "PE"),
        ("Employee", "Eve", "EE"),
        ("Manager", "Max", "EM"),
    ] {
        let person = context.new_object(entity).unwrap();
        context.write_property(person, "name", name).unwrap();
        context.write_property(person, "personType", kind).unwrap();
    }
    context.commit_changes().unwrap();
}

#[test]
fn test_sub_entity_query_applies_discriminator() {
    let runtime = runtime();
    seed_people(&runtime.create_context());

    let context = runtime.create_context();
    let employees = context
        .perform_query(&SelectQuery::new("Employee").order_by(Ordering::asc("name")))
        .unwrap();
    assert_eq!(names(&context, &employees, "name"), vec!["Eve", "Max"]);
    assert_eq!(context.entity_name(employees[1]).as_deref(), Some("Manager"));

    let managers = context.perform_query(&SelectQuery::new("Manager")).unwrap();
    assert_eq!(managers, vec![employees[1]]);
}

#[test]
fn test_root_query_resolves_concrete_entities() {
    let runtime = runtime();
    seed_people(&runtime.create_context());

    let context = runtime.create_context();
    let people = context
        .perform_query(&SelectQuery::new("Person").order_by(Ordering::asc("name")))
        .unwrap();
    let entities: Vec<String> = people
        .iter()
        .map(|p| context.entity_name(*p).unwrap())
        .collect();
    assert_eq!(entities, vec!["Employee", "Manager", "Person"]);
    // ids share the root entity name
    assert_eq!(context.object_id(people[1]).unwrap().entity_name(), "Person");
}

// ═══════════════════════════════════════════════════════════
// Data rows, columns, caching
// ═══════════════════════════════════════════════════════════

#[derive(Debug, DataObject)]
#[cayx(entity = "Painting")]
struct PaintingRow {
    painting_title: String,
    estimated_price: Option<f64>,
}

#[test]
fn test_typed_data_rows() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new(PaintingRow::ENTITY_NAME)
        .qualifier(Expression::parse("estimatedPrice >= 4000").unwrap())
        .order_by(Ordering::asc("paintingTitle"));
    let rows: Vec<PaintingRow> = context.perform_query_as(&query).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].painting_title, "Luncheon");
    assert_eq!(rows[1].estimated_price, Some(5000.0));
    // data rows don't register objects
    assert!(context.registered_objects().is_empty());
}

#[test]
fn test_aggregate_column_query() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Painting")
        .column_as(Expression::path("toArtist.artistName"), "artist")
        .column_as(Expression::count_all(), "paintings")
        .column_as(
            Expression::aggregate(AggregateFunction::Max, Expression::path("estimatedPrice")),
            "top",
        )
        .order_by(Ordering::asc("toArtist.artistName"));
    let rows = context.select_rows(&query).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("artist"), &text("Monet"));
    assert_eq!(rows[0].get("paintings").as_i64(), Some(3));
    assert_eq!(rows[1].get("top").as_f64(), Some(4000.0));
}

#[test]
fn test_local_cache_skips_database() {
    let runtime = runtime();
    seed(&runtime.create_context());

    let context = runtime.create_context();
    let query = SelectQuery::new("Artist").cache(CacheStrategy::LocalCache);
    let first = context.perform_query(&query).unwrap();
    let before = checkouts(&runtime);
    let second = context.perform_query(&query).unwrap();
    assert_eq!(first, second);
    assert_eq!(checkouts(&runtime), before);

    // a new context has its own cache
    runtime.create_context().perform_query(&query).unwrap();
    assert_eq!(checkouts(&runtime), before + 1);
}
