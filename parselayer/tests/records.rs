//! Decoding and encoding of derived records.

mod support;

use parselayer::{
    prelude::*,
    record::{decode_fields, encode_payload},
    wire::decode,
};
use serde_json::{Map, Value, json};
use support::{GameScore, Post};

#[derive(Debug, Clone, Default, Record)]
struct Person {
    #[parse(flatten)]
    base: Base,
    name: String,
    age: u32,
    #[parse(extra)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Record)]
struct Renamed {
    #[parse(flatten)]
    base: Base,
    #[parse(rename = "displayName")]
    name: String,
    #[parse(rename = "-")]
    scratch: String,
    #[parse(skip)]
    computed: i32,
}

#[derive(Debug, Clone, Default, Record)]
struct Collide {
    #[parse(flatten)]
    base: Base,
    #[parse(rename = "n")]
    title: String,
    n: String,
}

#[derive(Debug, Clone, Default, Record)]
#[parse(class = "Legacy", endpoint = "legacy/objects")]
struct Legacy {
    #[parse(flatten)]
    base: Base,
}

#[test]
fn unknown_keys_land_in_the_extra_bag() {
    let person = decode::<Person>(&json!({"name": "Ann", "age": 30, "unknownField": "x"})).unwrap();

    assert_eq!(person.name, "Ann");
    assert_eq!(person.age, 30);
    assert_eq!(person.extra.get("unknownField"), Some(&json!("x")));
    assert_eq!(person.extra.len(), 1);
}

#[test]
fn wire_names_match_case_and_underscore_insensitively() {
    let score = decode::<GameScore>(&json!({"PLAYER_NAME": "sean", "score": 1337})).unwrap();
    assert_eq!(score.player_name, "sean");
    assert_eq!(score.score, 1337);
}

#[test]
fn renamed_fields_only_answer_to_their_wire_name() {
    let renamed = decode::<Renamed>(&json!({"name": "by field name", "scratch": "x"})).unwrap();
    assert_eq!(renamed.name, "");
    assert_eq!(renamed.scratch, "");

    let renamed = decode::<Renamed>(&json!({"displayName": "by wire name"})).unwrap();
    assert_eq!(renamed.name, "by wire name");

    // Resolved names are cached per shape, so a second decode sees the same mapping.
    let again = decode::<Renamed>(&json!({"displayName": "again"})).unwrap();
    assert_eq!(again.name, "again");
}

#[test]
fn renamed_fields_own_their_wire_name_over_default_names() {
    let collide = Collide { title: "renamed".to_owned(), n: "plain".to_owned(), ..Default::default() };

    let payload = encode_payload(&collide);
    assert_eq!(payload.get("n"), Some(&json!("renamed")));
    assert!(!payload.contains_key("title"));

    let decoded = decode::<Collide>(&json!({"n": "from wire"})).unwrap();
    assert_eq!(decoded.title, "from wire");
    assert_eq!(decoded.n, "");
}

#[test]
fn encoded_records_decode_back_unchanged() {
    let mut acl = Acl::new();
    acl.set_public_read_access(true).set_write_access("u1", true);

    let mut score = GameScore::saved("abc", 1337);
    score.base.created_at = Some("2015-03-01T10:00:00.456Z".parse().unwrap());
    score.base.acl = Some(acl);
    score.player_name = "sean".to_owned();
    score.ratio = 0.25;
    score.cheating = true;
    score.skills = vec!["flying".to_owned(), "kungfu".to_owned()];
    score.played_at = Some("2015-03-02T11:30:00.123Z".parse().unwrap());

    let mut wire = Map::new();
    score.encode_fields(&mut wire);
    let decoded = decode::<GameScore>(&Value::Object(wire)).unwrap();

    assert_eq!(decoded, score);
}

#[test]
fn skipped_fields_are_read_but_never_written() {
    let renamed = decode::<Renamed>(&json!({"computed": 7, "displayName": "n"})).unwrap();
    assert_eq!(renamed.computed, 7);

    let payload = encode_payload(&renamed);
    assert_eq!(payload.get("displayName"), Some(&json!("n")));
    assert!(!payload.contains_key("computed"));
    assert!(!payload.contains_key("scratch"));
}

#[test]
fn flattened_base_fields_decode_at_top_level() {
    let score = decode::<GameScore>(&json!({
        "objectId": "abc",
        "createdAt": "2015-03-01T10:00:00.000Z",
        "updatedAt": {"__type": "Date", "iso": "2015-03-02T10:00:00.000Z"},
        "ACL": {"*": {"read": true}},
    }))
    .unwrap();

    assert_eq!(score.base.object_id, "abc");
    assert_eq!(
        score.base.created_at.map(|t| t.to_rfc3339()),
        Some("2015-03-01T10:00:00+00:00".to_owned())
    );
    assert!(score.base.updated_at.is_some());
    assert!(score.base.acl.as_ref().is_some_and(Acl::public_read_access));
}

#[test]
fn payload_omits_server_fields_and_empty_values() {
    let mut score = GameScore::saved("abc", 10);
    score.player_name = "sean".to_owned();
    score.played_at = Some("2015-03-01T10:00:00.123Z".parse().unwrap());

    let payload = encode_payload(&score);
    assert!(!payload.contains_key("objectId"));
    assert!(!payload.contains_key("cheatMode"));
    assert!(!payload.contains_key("ACL"));
    assert_eq!(payload.get("playerName"), Some(&json!("sean")));
    assert_eq!(
        payload.get("playedAt"),
        Some(&json!({"__type": "Date", "iso": "2015-03-01T10:00:00.123Z"}))
    );

    score.cheating = true;
    assert_eq!(encode_payload(&score).get("cheatMode"), Some(&json!(true)));
}

#[test]
fn conversion_errors_name_the_field_path() {
    let err = decode::<GameScore>(&json!({"score": "high"})).unwrap_err();
    assert_eq!(err.path(), "score");

    let err = decode::<GameScore>(&json!({"score": 1.5})).unwrap_err();
    assert_eq!(err.path(), "score");

    let err = decode::<Post>(&json!({"author": {"username": 5}})).unwrap_err();
    assert_eq!(err.path(), "author.username");
    assert!(err.to_string().starts_with("Conversion error: can not set field author.username"));
}

#[test]
fn integral_floats_decode_into_integer_fields() {
    let score = decode::<GameScore>(&json!({"score": 42.0})).unwrap();
    assert_eq!(score.score, 42);
}

#[test]
fn null_resets_a_field_to_its_default() {
    let mut score = GameScore::saved("abc", 10);
    score.player_name = "sean".to_owned();
    decode_fields(&mut score, &json!({"playerName": null, "score": null})).unwrap();
    assert_eq!(score.player_name, "");
    assert_eq!(score.score, 0);
    assert_eq!(score.base.object_id, "abc");
}

#[test]
fn pointers_decode_to_records_with_only_an_id() {
    let post = decode::<Post>(&json!({
        "title": "hello",
        "author": {"__type": "Pointer", "className": "_User", "objectId": "u1"},
    }))
    .unwrap();

    let author = post.author.unwrap();
    assert_eq!(author.base.object_id, "u1");
    assert_eq!(author.username, "");
}

#[test]
fn included_objects_decode_in_full() {
    let post = decode::<Post>(&json!({
        "author": {"__type": "Object", "className": "_User", "objectId": "u1", "username": "ann"},
    }))
    .unwrap();
    assert_eq!(post.author.unwrap().username, "ann");
}

#[test]
fn record_fields_encode_as_pointers() {
    let post = Post {
        author: Some(User {
            base: Base { object_id: "u1".to_owned(), ..Default::default() },
            username: "ann".to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let payload = encode_payload(&post);
    assert_eq!(
        payload.get("author"),
        Some(&json!({"__type": "Pointer", "className": "_User", "objectId": "u1"}))
    );
}

#[test]
fn polymorphic_slots_resolve_registered_classes() {
    registry::register::<GameScore>();
    assert!(registry::is_registered("GameScore"));

    let post = decode::<Post>(&json!({
        "attachment": {"__type": "Object", "className": "GameScore", "objectId": "g1", "score": 5},
    }))
    .unwrap();
    assert_eq!(post.attachment.as_record::<GameScore>().map(|s| s.score), Some(5));

    let post = decode::<Post>(&json!({"attachment": {"className": "Nope", "objectId": "x"}})).unwrap();
    assert!(matches!(post.attachment, Object::Raw(_)));
}

#[test]
fn class_names_and_endpoints() {
    assert_eq!(GameScore::class_name(), "GameScore");
    assert_eq!(GameScore::endpoint(), "classes/GameScore");
    assert_eq!(Post::class_name(), "Post");
    assert_eq!(User::endpoint(), "users");
    assert_eq!(Role::endpoint(), "roles");
    assert_eq!(Legacy::class_name(), "Legacy");
    assert_eq!(Legacy::endpoint(), "legacy/objects");
}
