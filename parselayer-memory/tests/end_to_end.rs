//! Clients running against the in-memory transport.

use futures::StreamExt;
use parselayer::prelude::*;
use parselayer_memory::MemoryTransport;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, PartialEq, Record)]
struct GameScore {
    #[parse(flatten)]
    base: Base,
    player_name: String,
    score: i64,
    skills: Vec<String>,
    #[parse(rename = "cheatMode", omit_empty)]
    cheating: bool,
}

#[derive(Debug, Clone, Default, Record)]
struct Comment {
    #[parse(flatten)]
    base: Base,
    text: String,
    score: Option<GameScore>,
}

fn scores() -> MemoryTransport {
    MemoryTransport::builder()
        .objects(
            "GameScore",
            [
                json!({"objectId": "s1", "playerName": "sean", "score": 1337, "skills": ["flying"]}),
                json!({"objectId": "s2", "playerName": "ann", "score": 42, "cheatMode": true}),
                json!({"objectId": "s3", "playerName": "Seymour", "score": 7}),
            ],
        )
        .build()
}

#[tokio::test]
async fn create_then_get() {
    let transport = MemoryTransport::new();
    let client = Client::new(transport.clone());

    let mut score = GameScore { player_name: "sean".to_owned(), score: 10, ..Default::default() };
    client.create(&mut score, false).await.unwrap();
    assert_eq!(score.base.object_id.len(), 10);
    assert!(score.base.created_at.is_some());

    let fetched = client.query::<GameScore>().get(&score.base.object_id).await.unwrap();
    assert_eq!(fetched.player_name, "sean");
    assert_eq!(fetched.score, 10);
    assert_eq!(transport.len("GameScore").await, 1);
}

#[tokio::test]
async fn missing_objects_are_service_errors() {
    let client = Client::new(scores());
    let err = client.query::<GameScore>().get("nope").await.unwrap_err();
    assert!(matches!(err, ParseError::Api(ref api) if api.code() == ApiError::OBJECT_NOT_FOUND));
}

#[tokio::test]
async fn find_filters_and_sorts() {
    let client = Client::new(scores());

    let mut query = client.query::<GameScore>();
    query.greater_than("score", 10).order_by(["-score"]);
    let found = query.find().await.unwrap();
    let names: Vec<_> = found.iter().map(|s| s.player_name.as_str()).collect();
    assert_eq!(names, ["sean", "ann"]);

    let mut query = client.query::<GameScore>();
    query.starts_with("playerName", "se").order_by(["playerName"]);
    let names: Vec<_> = query.find().await.unwrap().into_iter().map(|s| s.player_name).collect();
    assert_eq!(names, ["sean"]);

    let mut query = client.query::<GameScore>();
    query.matches("playerName", "SE", true, false).order_by(["playerName"]);
    assert_eq!(query.find().await.unwrap().len(), 2);
}

#[tokio::test]
async fn or_and_set_predicates() {
    let client = Client::new(scores());

    let base = client.query::<GameScore>();
    let mut low = base.sub();
    low.less_than("score", 10);
    let mut cheaters = base.sub();
    cheaters.equal_to("cheatMode", true);

    let mut query = client.query::<GameScore>();
    query.or([&low, &cheaters]).order_by(["objectId"]);
    let ids: Vec<_> = query.find().await.unwrap().into_iter().map(|s| s.base.object_id).collect();
    assert_eq!(ids, ["s2", "s3"]);

    let mut query = client.query::<GameScore>();
    query.contained_in("playerName", ["ann", "nobody"]);
    assert_eq!(query.first().await.unwrap().base.object_id, "s2");

    let mut query = client.query::<GameScore>();
    query.equal_to("skills", "flying");
    assert_eq!(query.first().await.unwrap().base.object_id, "s1");

    let mut query = client.query::<GameScore>();
    query.does_not_exist("skills").exists("cheatMode");
    assert_eq!(query.first().await.unwrap().base.object_id, "s2");
}

#[tokio::test]
async fn no_rows_is_distinct_from_errors() {
    let client = Client::new(scores());
    let mut query = client.query::<GameScore>();
    query.equal_to("playerName", "nobody");

    assert_eq!(query.find().await.unwrap_err(), ParseError::NoRows);
    assert_eq!(query.first().await.unwrap_err(), ParseError::NoRows);
    assert_eq!(query.count().await.unwrap(), 0);
}

#[tokio::test]
async fn count_ignores_the_window() {
    let client = Client::new(scores());
    let mut query = client.query::<GameScore>();
    query.greater_than("score", 0).limit(1);
    assert_eq!(query.count().await.unwrap(), 3);
}

#[tokio::test]
async fn limit_skip_and_keys() {
    let client = Client::new(scores());
    let mut query = client.query::<GameScore>();
    query.order_by(["score"]).skip(1).limit(1).keys(["score"]);

    let found = query.find().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].score, 42);
    assert_eq!(found[0].player_name, "");
    assert_eq!(found[0].base.object_id, "s2");
}

#[tokio::test]
async fn update_applies_remotely_and_locally() {
    let transport = scores();
    let client = Client::new(transport.clone());
    let mut score = client.query::<GameScore>().get("s1").await.unwrap();

    let mut update = client.update(&mut score);
    update.increment("score", 3).add_unique("skills", ["flying", "swimming"]);
    update.execute().await.unwrap();

    assert_eq!(score.score, 1340);
    assert_eq!(score.skills, ["flying", "swimming"]);

    let stored = transport.object("GameScore", "s1").await.unwrap();
    assert_eq!(stored["score"], json!(1340));
    assert_eq!(stored["skills"], json!(["flying", "swimming"]));

    let fetched = client.query::<GameScore>().get("s1").await.unwrap();
    assert_eq!(fetched.score, score.score);
    assert_eq!(fetched.base.updated_at, score.base.updated_at);
}

#[tokio::test]
async fn delete_removes_the_object() {
    let transport = scores();
    let client = Client::new(transport.clone());
    let score = client.query::<GameScore>().get("s3").await.unwrap();

    client.delete(&score, false).await.unwrap();
    assert_eq!(transport.len("GameScore").await, 2);

    let err = client.delete(&score, false).await.unwrap_err();
    assert!(matches!(err, ParseError::Api(ref api) if api.code() == ApiError::OBJECT_NOT_FOUND));
}

#[tokio::test]
async fn pointers_subqueries_and_includes() {
    let transport = MemoryTransport::builder()
        .object("GameScore", json!({"objectId": "s1", "playerName": "sean", "score": 1337}))
        .object("GameScore", json!({"objectId": "s2", "playerName": "ann", "score": 42}))
        .object(
            "Comment",
            json!({"objectId": "c1", "text": "wow", "score": {"__type": "Pointer", "className": "GameScore", "objectId": "s1"}}),
        )
        .object(
            "Comment",
            json!({"objectId": "c2", "text": "meh", "score": {"__type": "Pointer", "className": "GameScore", "objectId": "s2"}}),
        )
        .build();
    let client = Client::new(transport);

    let mut high = client.query::<GameScore>();
    high.greater_than("score", 1000);

    let mut query = client.query::<Comment>();
    query.matches_query("score", &high).include(["score"]);
    let comment = query.first().await.unwrap();
    assert_eq!(comment.text, "wow");
    assert_eq!(comment.score.map(|s| s.player_name), Some("sean".to_owned()));

    let mut query = client.query::<Comment>();
    query.does_not_match_query("score", &high);
    let comment = query.first().await.unwrap();
    assert_eq!(comment.text, "meh");
    assert_eq!(comment.score.map(|s| s.base.object_id), Some("s2".to_owned()));
}

#[tokio::test]
async fn related_to_finds_relation_members() {
    let transport = MemoryTransport::builder()
        .object("_User", json!({"objectId": "u1", "username": "ann"}))
        .object("_User", json!({"objectId": "u2", "username": "bob"}))
        .object(
            "_Role",
            json!({"objectId": "r1", "name": "admins", "members": [{"__type": "Pointer", "className": "_User", "objectId": "u2"}]}),
        )
        .build();
    let client = Client::new(transport);

    let mut query = client.query::<User>();
    query.related_to("members", Pointer::new("_Role", "r1"));
    let members = query.find().await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].username, "bob");
}

#[tokio::test]
async fn each_visits_every_object_once() {
    let objects = (0..25).map(|i| json!({"objectId": format!("g{:03}", i), "score": i}));
    let transport = MemoryTransport::builder().objects("GameScore", objects).build();
    let client = Client::new(transport.clone());

    let mut query = client.query::<GameScore>();
    query.greater_than_or_equal("score", 5).set_batch_size(10);

    let (tx, mut rx) = mpsc::channel::<GameScore>(4);
    let cursor = query.each(tx).unwrap();
    let mut scores = Vec::new();
    while let Some(score) = rx.recv().await {
        scores.push(score.score);
    }
    cursor.done().await.unwrap();

    assert_eq!(scores, (5..25).collect::<Vec<i64>>());
    // 20 matches in pages of 10 end on an empty third page.
    assert_eq!(transport.requests().await.len(), 3);
}

#[tokio::test]
async fn streams_yield_every_object_in_id_order() {
    let objects = (0..7).map(|i| json!({"objectId": format!("g{:03}", i), "score": i}));
    let transport = MemoryTransport::builder().objects("GameScore", objects).build();
    let client = Client::new(transport.clone());

    let mut query = client.query::<GameScore>();
    query.set_batch_size(3);
    let scores: Vec<i64> = query
        .stream()
        .unwrap()
        .map(|score| score.unwrap().score)
        .collect()
        .await;

    assert_eq!(scores, (0..7).collect::<Vec<i64>>());
    assert_eq!(transport.requests().await.len(), 3);
}

#[tokio::test]
async fn injected_failures_surface_from_iteration() {
    let objects = (0..5).map(|i| json!({"objectId": format!("g{:03}", i), "score": i}));
    let transport = MemoryTransport::builder()
        .objects("GameScore", objects)
        .fail_request(2, ApiError::new(ApiError::INTERNAL_SERVER_ERROR, "unavailable"))
        .build();
    let client = Client::new(transport);

    let mut query = client.query::<GameScore>();
    query.set_batch_size(2);
    let (tx, mut rx) = mpsc::channel::<GameScore>(8);
    let cursor = query.each(tx).unwrap();

    let mut received = 0;
    while rx.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, 2);
    let err = cursor.done().await.unwrap_err();
    assert!(matches!(err, ParseError::Api(ref api) if api.message() == "unavailable"));
}

#[tokio::test]
async fn cloud_functions() {
    let transport = MemoryTransport::builder()
        .function("hello", |params: Map<String, Value>| {
            let name = params.get("name").and_then(Value::as_str).unwrap_or("world");
            Ok(json!(format!("Hello, {}!", name)))
        })
        .function("fail", |_| Err(ApiError::new(ApiError::SCRIPT_FAILED, "nope")))
        .build();
    let client = Client::new(transport);

    let mut params = Map::new();
    params.insert("name".to_owned(), json!("ann"));
    let greeting: String = client.call_function("hello", params).await.unwrap();
    assert_eq!(greeting, "Hello, ann!");

    let err = client.call_function::<String>("fail", Map::new()).await.unwrap_err();
    assert!(matches!(err, ParseError::Api(ref api) if api.code() == ApiError::SCRIPT_FAILED));

    let err = client.call_function::<String>("missing", Map::new()).await.unwrap_err();
    assert!(matches!(err, ParseError::Api(ref api) if api.code() == ApiError::SCRIPT_FAILED));
}

#[tokio::test]
async fn users_live_behind_their_own_endpoint() {
    let transport = MemoryTransport::new();
    let client = Client::new(transport.clone());

    let mut user = User { username: "ann".to_owned(), email: "ann@example.com".to_owned(), ..Default::default() };
    client.create(&mut user, false).await.unwrap();

    let requests = transport.requests().await;
    assert_eq!(requests[0].endpoint, "users");
    let stored = transport.object("_User", &user.base.object_id).await.unwrap();
    assert_eq!(stored["username"], json!("ann"));
    assert!(!stored.contains_key("emailVerified"));
}
