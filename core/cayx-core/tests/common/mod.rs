//! 통합 테스트 공용 픽스처 — Artist/Painting/Gallery/Exhibit/Person 매핑 + 인메모리 SQLite

#![allow(dead_code)]

use cayx_core::access::{DataSource, QueryResult};
use cayx_core::query::RawQuery;
use cayx_core::row::DataRow;
use cayx_core::{ObjRef, ObjectContext, ServerRuntime, Value};

pub const TEST_MAP_JSON: &str = include_str!("../fixtures/testmap.json");

/// Fresh in-memory database with the test schema.
pub fn runtime() -> ServerRuntime {
    ServerRuntime::builder()
        .data_map_json(TEST_MAP_JSON)
        .create_schema(true)
        .build()
        .expect("runtime")
}

/// Rows of a raw SQL statement, bypassing every cache.
pub fn sql_rows(runtime: &ServerRuntime, sql: &str) -> Vec<DataRow> {
    let node = &runtime.domain().nodes()[0];
    let mut result = QueryResult::new();
    node.perform_queries(&[RawQuery::select(sql).into()], &mut result, None);
    result.into_rows().expect("raw select")
}

pub fn sql_execute(runtime: &ServerRuntime, sql: &str) {
    let node = &runtime.domain().nodes()[0];
    let mut result = QueryResult::new();
    node.perform_queries(&[RawQuery::execute(sql).into()], &mut result, None);
    result.into_result().expect("raw statement");
}

pub fn count(runtime: &ServerRuntime, table: &str) -> i64 {
    let rows = sql_rows(runtime, &format!("SELECT COUNT(*) AS N FROM {table}"));
    rows[0].get("N").as_i64().expect("count")
}

pub fn checkouts(runtime: &ServerRuntime) -> u64 {
    runtime.data_source().stats().checkouts
}

pub fn new_artist(context: &ObjectContext, name: &str) -> ObjRef {
    let artist = context.new_object("Artist").expect("artist");
    context.write_property(artist, "artistName", name).expect("name");
    artist
}

pub fn new_painting(context: &ObjectContext, title: &str, artist: Option<ObjRef>) -> ObjRef {
    let painting = context.new_object("Painting").expect("painting");
    context.write_property(painting, "paintingTitle", title).expect("title");
    context.set_to_one(painting, "toArtist", artist).expect("toArtist");
    painting
}

pub fn new_gallery(context: &ObjectContext, name: &str) -> ObjRef {
    let gallery = context.new_object("Gallery").expect("gallery");
    context.write_property(gallery, "galleryName", name).expect("name");
    gallery
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}
