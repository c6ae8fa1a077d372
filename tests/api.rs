mod support;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use support::{column, fixture};

fn ids(body: &Value, field: &str) -> Vec<i64> {
    column(body, field).iter().filter_map(Value::as_i64).collect()
}

#[tokio::test]
async fn test_list_filters_sorts_and_pages() {
    let f = fixture().await;
    let (status, body) = f
        .get("/api/Track?GenreId=1&_sort=Milliseconds&_direction=desc&_num=3&_page=2")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 9);
    assert_eq!(ids(&body, "TrackId"), vec![9, 4, 7]);

    let first = &body["items"][0];
    assert_eq!(first["UnitPrice"], "0.99");
    assert!(first.get("Album").is_none(), "relations are omitted at expand 0");
}

#[tokio::test]
async fn test_pages_partition_the_result() {
    let f = fixture().await;
    let mut seen = Vec::new();
    for page in 1..=3 {
        let (status, body) = f.get(&format!("/api/Track?_num=4&_page={}", page)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 10);
        seen.extend(ids(&body, "TrackId"));
    }
    assert_eq!(seen, (1..=10).collect::<Vec<i64>>());

    let (_, all) = f.get("/api/Track?_num=-1").await;
    assert_eq!(all["items"].as_array().unwrap().len(), 10);
    let (status, body) = f.get("/api/Track?_num=4&_page=4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 10);
    assert_eq!(body["items"], json!([]));

    let (status, body) = f.get("/api/Track?_page=9223372036854775807&_num=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "RestAssertionError");
}

#[tokio::test]
async fn test_like_in_and_multi_key_orders() {
    let f = fixture().await;
    let (_, body) = f.get("/api/Track?Name=%25Rock%25").await;
    assert_eq!(ids(&body, "TrackId"), vec![1]);

    let (_, body) = f.get("/api/Track?TrackId%5B%5D=3&TrackId%5B%5D=10&TrackId%5B%5D=1").await;
    assert_eq!(ids(&body, "TrackId"), vec![1, 3, 10]);

    let (_, body) = f.get("/api/Track?AlbumId=1&_orders=Composer:asc,TrackId:desc").await;
    assert_eq!(ids(&body, "TrackId"), vec![7, 6, 1, 8]);
}

#[tokio::test]
async fn test_invalid_query_arguments() {
    let f = fixture().await;
    let cases = [
        ("/api/Track?Nope=1", "Invalid argument key:Nope value:1."),
        ("/api/Track?Milliseconds=abc", "Invalid argument key:Milliseconds value:abc."),
        ("/api/Track?_sort=Nope", "Invalid argument key:_sort value:Nope."),
        ("/api/Track?Album.Nope=1", "Invalid argument key:Album.Nope value:1."),
        ("/api/Track?_num=ten", "Invalid argument key:_num value:ten."),
    ];
    for (uri, prompt) in cases {
        let (status, body) = f.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["type"], "IllegalRequestData", "{}", uri);
        assert_eq!(body["detail"]["prompt"], prompt, "{}", uri);
    }

    for uri in ["/api/Track?_page=0", "/api/Track?_num=-2", "/api/Track?_expand=11", "/api/Track?_direction=up"] {
        let (status, body) = f.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["type"], "RestAssertionError", "{}", uri);
    }
    let (_, body) = f.get("/api/Track?_expand=11").await;
    assert_eq!(body["detail"]["prompt"], "_expand params must [0,10]");
}

#[tokio::test]
async fn test_expand_follows_relations_one_level() {
    let f = fixture().await;
    let (status, body) = f.get("/api/Track/1?_expand=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Album"]["Title"], "For Those About To Rock We Salute You");
    assert!(body["Album"].get("Artist").is_none());
    assert!(body["Album"].get("Tracks").is_none());
    assert_eq!(body["Genre"], json!({"GenreId": 1, "Name": "Rock"}));
    assert_eq!(body["PlaylistCollection"], json!([{"PlaylistId": 1, "Name": "Music"}]));

    let (_, body) = f.get("/api/Album/4?_expand=2").await;
    assert_eq!(body["Artist"]["Albums"].as_array().unwrap().len(), 2);
    let tracks: Vec<&str> = body["Tracks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["Name"].as_str())
        .collect();
    assert_eq!(tracks, vec!["Go Down", "Dog Eat Dog"]);
}

#[tokio::test]
async fn test_fields_and_except_projection() {
    let f = fixture().await;
    let (_, body) = f.get("/api/Track/1?_fields=Track:TrackId,Name").await;
    assert_eq!(body, json!({"TrackId": 1, "Name": "For Those About To Rock (We Salute You)"}));

    let (_, body) = f.get("/api/Track/1?_expand=0&_fields=Track:TrackId,Album").await;
    assert_eq!(body, json!({"TrackId": 1}), "a zero-depth dump never lists relations");

    let (_, body) = f.get("/api/Track/2?_expand=1&_except=Track:Composer,Bytes;Genre:Name").await;
    assert!(body.get("Composer").is_none() && body.get("Bytes").is_none());
    assert_eq!(body["Genre"], json!({"GenreId": 1}));

    let (status, body) = f.get("/api/Track?_fields=TrackId").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "RestAssertionError");
}

#[tokio::test]
async fn test_dotted_filters() {
    let f = fixture().await;
    let (_, body) = f.get("/api/Track?Album.Title=Restless%20and%20Wild").await;
    assert_eq!(body["total"], 3);
    assert_eq!(ids(&body, "TrackId"), vec![3, 4, 5]);

    let (_, body) = f.get("/api/Track?Album.Title=Nothing").await;
    assert_eq!(body["total"], 0);

    let (_, body) = f.get("/api/Album?Tracks.Name=%25Shark%25").await;
    assert_eq!(ids(&body, "AlbumId"), vec![3]);

    let (_, body) = f.get("/api/Playlist?Tracks.TrackId=3").await;
    assert_eq!(ids(&body, "PlaylistId"), vec![1, 2]);
}

#[tokio::test]
async fn test_match_keywords() {
    let f = fixture().await;
    let (_, body) = f.get("/api/Track?_match=Angus").await;
    assert_eq!(ids(&body, "TrackId"), vec![1, 6, 7]);

    let (_, body) = f.get("/api/Track?_match=Dawn,Venom").await;
    assert_eq!(ids(&body, "TrackId"), vec![5, 8]);

    let (_, body) = f.get("/api/Album?Artist._match=AC").await;
    assert_eq!(ids(&body, "AlbumId"), vec![1, 4]);

    // Album has no match fields: the keyword filter is a no-op
    let (_, body) = f.get("/api/Album?_match=zzz").await;
    assert_eq!(body["total"], 4);
}

#[tokio::test]
async fn test_upsert_by_key_field() {
    let f = fixture().await;
    let doc = json!({"MediaTypeId": 1, "Milliseconds": 1000, "UnitPrice": 0.99});

    let (status, body) = f.send(Method::PUT, "/api/Track/@New%20Song", Some(doc.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["TrackId"], 11);
    assert_eq!(body["Name"], "New Song");
    assert_eq!(body["UnitPrice"], "0.99");

    let (status, _) = f.send(Method::PUT, "/api/Track/@New%20Song", Some(doc)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(f.counters.get(), (1, 0, 0), "an unchanged merge fires no update");

    let (status, body) = f
        .send(Method::PATCH, "/api/Track/@New%20Song", Some(json!({"Milliseconds": 2000})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Milliseconds"], 2000);
    assert_eq!(f.counters.get(), (1, 1, 0));

    let (_, body) = f.get("/api/Track/@New%20Song").await;
    assert_eq!(body["TrackId"], 11);
}

#[tokio::test]
async fn test_batch_upsert_status() {
    let f = fixture().await;
    let (status, body) = f
        .send(Method::PUT, "/api/Genre", Some(json!([{"GenreId": 1, "Name": "Rock"}, {"Name": "Blues"}])))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"GenreId": 1, "Name": "Rock"}, {"GenreId": 4, "Name": "Blues"}]));

    let (status, body) = f
        .send(Method::PUT, "/api/Genre", Some(json!([{"Name": "Soul"}, {"Name": "Funk"}])))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.as_array().unwrap().len(), 2);

    // a unique key resolves an existing row on upsert
    let (status, body) = f.send(Method::PUT, "/api/Genre", Some(json!({"Name": "Jazz"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"GenreId": 2, "Name": "Jazz"}));
}

#[tokio::test]
async fn test_create_and_constraint_errors() {
    let f = fixture().await;
    let (status, body) = f.send(Method::POST, "/api/Genre", Some(json!({"Name": "Rock"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "ResourcesAlreadyExists");

    let (status, body) = f
        .send(
            Method::POST,
            "/api/Track",
            Some(json!({"Name": "Orphan", "MediaTypeId": 9, "Milliseconds": 1, "UnitPrice": "1"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "ForeignKeyConstraintFails");

    let (status, body) = f
        .send(Method::POST, "/api/Track", Some(json!({"Name": "x", "MediaTypeId": 1, "UnitPrice": "1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!({"Milliseconds": ["Missing data for required field."]}));

    let (status, body) = f.send(Method::PUT, "/api/Track/1", Some(json!({"Name": null}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!({"Name": ["Field may not be null."]}));

    let (status, body) = f
        .send(Method::POST, "/api/Track", Some(json!({"Name": "y".repeat(201), "MediaTypeId": 1, "Milliseconds": 1, "UnitPrice": 1})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["Name"], json!(["Longer than maximum length 200."]));
}

#[tokio::test]
async fn test_numeric_values_keep_precision() {
    let f = fixture().await;
    let doc = json!({"Name": "Long", "MediaTypeId": 1, "Milliseconds": 1, "UnitPrice": "1234567890123456.78"});
    let (status, body) = f.send(Method::POST, "/api/Track", Some(doc)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["UnitPrice"], "1234567890123456.78");

    let (_, body) = f.get("/api/Track?UnitPrice=1234567890123456.78").await;
    assert_eq!(ids(&body, "TrackId"), vec![11]);

    let (_, body) = f.get("/api/Track?_sort=UnitPrice&_direction=desc&_num=2").await;
    assert_eq!(ids(&body, "TrackId"), vec![11, 10]);

    let doc = json!({"Name": "Huge", "MediaTypeId": 1, "Milliseconds": 1e20, "UnitPrice": 1});
    let (status, body) = f.send(Method::POST, "/api/Track", Some(doc)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!({"Milliseconds": ["Not a valid integer."]}));
}

#[tokio::test]
async fn test_failed_batch_rolls_back_and_skips_callbacks() {
    let f = fixture().await;
    let batch = json!([
        {"Name": "One", "MediaTypeId": 1, "Milliseconds": 1, "UnitPrice": "0.99"},
        {"Name": "Two", "MediaTypeId": 1, "UnitPrice": "0.99"}
    ]);
    let (status, _) = f.send(Method::POST, "/api/Track", Some(batch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(f.counters.get(), (0, 0, 0));
    assert_eq!(f.backend.snapshot("Track").await.len(), 10);

    let (status, body) = f
        .send(Method::DELETE, "/api/Track", Some(json!([{"TrackId": 9}, {"TrackId": 999}])))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], json!({"endpoint": "Track", "data": {"TrackId": 999}}));
    assert_eq!(f.backend.snapshot("Track").await.len(), 10);
    assert_eq!(f.counters.get(), (0, 0, 0));
}

#[tokio::test]
async fn test_nested_writes() {
    let f = fixture().await;
    let (status, body) = f
        .send(Method::POST, "/api/Artist", Some(json!({"Name": "Black Sabbath", "Albums": [{"Title": "Paranoid"}]})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"ArtistId": 4, "Name": "Black Sabbath"}));

    let (_, body) = f.get("/api/Artist/4?_expand=1").await;
    assert_eq!(body["Albums"], json!([{"AlbumId": 5, "Title": "Paranoid", "ArtistId": 4}]));

    let doc = json!({
        "Name": "War Pigs", "MediaTypeId": 1, "Milliseconds": 477000, "UnitPrice": "0.99",
        "Album": {"Title": "Master of Reality", "ArtistId": 4}
    });
    let (status, body) = f.send(Method::POST, "/api/Track", Some(doc)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["AlbumId"], 6);
    assert_eq!(f.counters.get(), (1, 0, 0));

    let (status, body) = f.send(Method::POST, "/api/Artist", Some(json!({"Name": "x", "Albums": {}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!({"Albums": ["Not a valid list."]}));
}

#[tokio::test]
async fn test_sub_resource_replace_and_remove() {
    let f = fixture().await;
    let (status, body) = f
        .send(Method::PUT, "/api/Playlist/2/Tracks", Some(json!([{"TrackId": 1}, {"TrackId": 2}])))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = f.get("/api/Playlist/2/Tracks").await;
    assert_eq!(body["total"], 2);
    assert_eq!(ids(&body, "TrackId"), vec![1, 2]);

    let (status, _) = f.send(Method::POST, "/api/Playlist/2/Tracks", Some(json!({"TrackId": 10}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = f.get("/api/Playlist/2/Tracks?_sort=TrackId&_direction=desc").await;
    assert_eq!(ids(&body, "TrackId"), vec![10, 2, 1]);

    let (status, body) = f
        .send(Method::DELETE, "/api/Playlist/2/Tracks", Some(json!([{"TrackId": 999}])))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "ResourceNotFound");

    let (status, body) = f
        .send(Method::DELETE, "/api/Playlist/2/Tracks", Some(json!([{"TrackId": 5}])))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "ResourceRelationNotExists");

    let (status, _) = f
        .send(Method::DELETE, "/api/Playlist/2/Tracks", Some(json!([{"TrackId": 1}, {"TrackId": 10}])))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = f.get("/api/Playlist/2/Tracks").await;
    assert_eq!(ids(&body, "TrackId"), vec![2]);
}

#[tokio::test]
async fn test_to_one_sub_resource() {
    let f = fixture().await;
    let (_, body) = f.get("/api/Track/2/Genre").await;
    assert_eq!(body, json!({"GenreId": 1, "Name": "Rock"}));

    let (status, body) = f.send(Method::PUT, "/api/Track/2/Genre", Some(json!({"GenreId": 3}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"GenreId": 3, "Name": "Metal"}));
    let (_, track) = f.get("/api/Track/2").await;
    assert_eq!(track["GenreId"], 3);
    assert_eq!(f.counters.get(), (0, 1, 0));

    let (status, body) = f.send(Method::POST, "/api/Track/2/Genre", Some(json!({"GenreId": 2}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["prompt"], "Collection:Track attribute:Genre Not List.");

    let (status, _) = f.send(Method::DELETE, "/api/Track/2/Genre", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = f.get("/api/Track/2/Genre").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_lookup_errors() {
    let f = fixture().await;
    let (status, body) = f.get("/api/Track/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], json!({"endpoint": "Track", "key": "999"}));

    let (status, _) = f.get("/api/Track/abc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = f.get("/api/Nothing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], json!({"endpoint": "Nothing"}));

    let (status, body) = f.get("/api/Track/1/Nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "ResourceRelationNotExists");
    assert_eq!(body["detail"], json!({"endpoint": "Track", "relation": "Nope"}));
}

#[tokio::test]
async fn test_unconfigured_method_is_denied() {
    let f = fixture().await;
    let (status, body) = f.send(Method::DELETE, "/api/Genre/1", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["type"], "AccessDenied");
    assert_eq!(body["detail"], json!({"method": "DELETE", "endpoint": "Genre"}));
    assert_eq!(body["msg"], "Access denied.");

    let (status, _) = f.send(Method::OPTIONS, "/api/Track", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_content_negotiation() {
    let f = fixture().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/Genre")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("Name=Blues"))
        .unwrap();
    let (status, body) = f.request(request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["detail"], json!({"types": "text/plain"}));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/Genre")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("Name=Blues"))
        .unwrap();
    let (status, body) = f.request(request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["Name"], "Blues");

    let request = Request::builder()
        .uri("/api/Genre")
        .header(header::ACCEPT, "application/xml")
        .body(Body::empty())
        .unwrap();
    let (status, body) = f.request(request).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body["detail"], json!({"ACCEPT": "application/xml"}));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/Genre")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("12"))
        .unwrap();
    let (status, body) = f.request(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["prompt"], "request.json format error.");
}

#[tokio::test]
async fn test_delete_unlinks_and_fires_callback() {
    let f = fixture().await;
    let (status, body) = f.send(Method::DELETE, "/api/Track/3", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert_eq!(f.counters.get(), (0, 0, 1));

    let links = f.backend.snapshot("PlaylistTrack").await;
    assert!(links.iter().all(|l| l["TrackId"] != 3));
    assert_eq!(links.len(), 2);

    let (status, _) = f.get("/api/Track/3").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = f.send(Method::DELETE, "/api/Track", Some(json!({"TrackId": 10}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(f.counters.get(), (0, 0, 2));
}

#[tokio::test]
async fn test_round_trip() {
    let f = fixture().await;
    let (_, original) = f.get("/api/Track/5").await;
    let (status, echoed) = f.send(Method::PUT, "/api/Track", Some(original.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(echoed, original);
    assert_eq!(f.counters.get(), (0, 0, 0));
}

#[tokio::test]
async fn test_common_routes() {
    let f = fixture().await;
    let (status, body) = f.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let (status, body) = f.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");

    let (_, body) = f.get("/version").await;
    assert_eq!(body["name"], "autorest");
    let endpoints = body["endpoints"].as_array().unwrap();
    assert!(endpoints.contains(&json!("Track")) && endpoints.contains(&json!("Playlist")));
    assert!(!endpoints.contains(&json!("PlaylistTrack")), "junction tables are not entities");
}
