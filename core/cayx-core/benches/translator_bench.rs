//! SQL translation benchmark
//!
//! Measures SelectTranslator and expression parsing on the test mapping,
//! without touching a database.

use cayx_core::dba::{QuotingStrategy, SqliteAdapter};
use cayx_core::exp::Expression;
use cayx_core::map::{DataMap, EntityResolver};
use cayx_core::query::{Ordering, PrefetchSemantics, SelectQuery};
use cayx_core::translator::SelectTranslator;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const TEST_MAP_JSON: &str = include_str!("../tests/fixtures/testmap.json");

fn resolver() -> EntityResolver {
    EntityResolver::new(vec![DataMap::from_json(TEST_MAP_JSON).unwrap()]).unwrap()
}

fn queries() -> Vec<(&'static str, SelectQuery)> {
    vec![
        ("root_only", SelectQuery::new("Artist")),
        (
            "to_one_qualifier",
            SelectQuery::new("Painting")
                .qualifier(Expression::parse("toArtist.artistName like 'M%'").unwrap())
                .order_by(Ordering::asc("paintingTitle")),
        ),
        (
            "to_many_distinct",
            SelectQuery::new("Artist").qualifier(
                Expression::parse("paintingArray.estimatedPrice > 1000 and paintingArray+.toGallery.galleryName = 'x'")
                    .unwrap(),
            ),
        ),
        (
            "joint_prefetch",
            SelectQuery::new("Painting")
                .prefetch("toArtist", PrefetchSemantics::Joint)
                .prefetch("toGallery", PrefetchSemantics::Joint),
        ),
        ("inheritance", SelectQuery::new("Manager").order_by(Ordering::asc("name"))),
    ]
}

/// Benchmark: SelectQuery → SQL
fn bench_select_translation(c: &mut Criterion) {
    let resolver = resolver();
    let adapter = SqliteAdapter::new(QuotingStrategy::default());
    let mut group = c.benchmark_group("select_translation");

    for (name, query) in queries() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &query, |b, query| {
            b.iter(|| {
                let mut translator = SelectTranslator::new(black_box(query), &resolver, &adapter);
                black_box(translator.create_sql().unwrap())
            });
        });
    }
    group.finish();
}

/// Benchmark: expression string → Expression
fn bench_expression_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_parse");
    for input in [
        "artistName = 'Monet'",
        "paintingArray.estimatedPrice between $low and $high or toGallery+.galleryName in ('a', 'b')",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(input.len()), input, |b, input| {
            b.iter(|| black_box(Expression::parse(black_box(input)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_translation, bench_expression_parse);
criterion_main!(benches);
