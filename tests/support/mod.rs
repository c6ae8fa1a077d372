//! Chinook-style model served from the in-memory backend.

#![allow(dead_code)]

use autorest::schema::{derive, Row};
use autorest::{ApiBuilder, ApiConfig, DeriveOptions, EndpointOptions, FullConfig, MemoryBackend, Verb};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

pub fn model() -> FullConfig {
    serde_json::from_value(json!({
        "schemas": [{"id": "public", "name": "public"}],
        "tables": [
            {"id": "artist", "name": "Artist", "primary_key": "ArtistId"},
            {"id": "album", "name": "Album", "primary_key": "AlbumId"},
            {"id": "genre", "name": "Genre", "primary_key": "GenreId", "unique": [["Name"]]},
            {"id": "media_type", "name": "MediaType", "primary_key": "MediaTypeId"},
            {"id": "track", "name": "Track", "primary_key": "TrackId"},
            {"id": "playlist", "name": "Playlist", "primary_key": "PlaylistId"},
            {"id": "playlist_track", "name": "PlaylistTrack", "primary_key": ["PlaylistId", "TrackId"]}
        ],
        "columns": [
            {"id": "artist.id", "table_id": "artist", "name": "ArtistId", "type": "integer", "nullable": false},
            {"id": "artist.name", "table_id": "artist", "name": "Name", "type": "varchar(120)"},
            {"id": "album.id", "table_id": "album", "name": "AlbumId", "type": "integer", "nullable": false},
            {"id": "album.title", "table_id": "album", "name": "Title", "type": "varchar(160)", "nullable": false},
            {"id": "album.artist", "table_id": "album", "name": "ArtistId", "type": "integer", "nullable": false},
            {"id": "genre.id", "table_id": "genre", "name": "GenreId", "type": "integer", "nullable": false},
            {"id": "genre.name", "table_id": "genre", "name": "Name", "type": "varchar(120)"},
            {"id": "media_type.id", "table_id": "media_type", "name": "MediaTypeId", "type": "integer", "nullable": false},
            {"id": "media_type.name", "table_id": "media_type", "name": "Name", "type": "varchar(120)"},
            {"id": "track.id", "table_id": "track", "name": "TrackId", "type": "integer", "nullable": false},
            {"id": "track.name", "table_id": "track", "name": "Name", "type": "varchar(200)", "nullable": false},
            {"id": "track.album", "table_id": "track", "name": "AlbumId", "type": "integer"},
            {"id": "track.media_type", "table_id": "track", "name": "MediaTypeId", "type": "integer", "nullable": false},
            {"id": "track.genre", "table_id": "track", "name": "GenreId", "type": "integer"},
            {"id": "track.composer", "table_id": "track", "name": "Composer", "type": "varchar(220)"},
            {"id": "track.ms", "table_id": "track", "name": "Milliseconds", "type": "integer", "nullable": false},
            {"id": "track.bytes", "table_id": "track", "name": "Bytes", "type": "integer"},
            {"id": "track.price", "table_id": "track", "name": "UnitPrice", "type": "numeric(10,2)", "nullable": false},
            {"id": "playlist.id", "table_id": "playlist", "name": "PlaylistId", "type": "integer", "nullable": false},
            {"id": "playlist.name", "table_id": "playlist", "name": "Name", "type": "varchar(120)"},
            {"id": "pt.playlist", "table_id": "playlist_track", "name": "PlaylistId", "type": "integer", "nullable": false},
            {"id": "pt.track", "table_id": "playlist_track", "name": "TrackId", "type": "integer", "nullable": false}
        ],
        "relationships": [
            {"id": "album_artist", "from_table_id": "album", "from_column_id": "album.artist",
             "to_table_id": "artist", "to_column_id": "artist.id", "backref": "Albums"},
            {"id": "track_album", "from_table_id": "track", "from_column_id": "track.album",
             "to_table_id": "album", "to_column_id": "album.id", "backref": "Tracks", "order_by": ["TrackId"]},
            {"id": "track_media_type", "from_table_id": "track", "from_column_id": "track.media_type",
             "to_table_id": "media_type", "to_column_id": "media_type.id"},
            {"id": "track_genre", "from_table_id": "track", "from_column_id": "track.genre",
             "to_table_id": "genre", "to_column_id": "genre.id"},
            {"id": "pt_playlist", "from_table_id": "playlist_track", "from_column_id": "pt.playlist",
             "to_table_id": "playlist", "to_column_id": "playlist.id", "backref": "Tracks"},
            {"id": "pt_track", "from_table_id": "playlist_track", "from_column_id": "pt.track",
             "to_table_id": "track", "to_column_id": "track.id", "backref": "PlaylistCollection"}
        ]
    }))
    .unwrap()
}

fn rows(values: Value) -> Vec<Row> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
}

fn track(id: i64, name: &str, album: i64, media: i64, genre: i64, composer: Option<&str>, ms: i64, price: &str) -> Value {
    json!({
        "TrackId": id, "Name": name, "AlbumId": album, "MediaTypeId": media, "GenreId": genre,
        "Composer": composer, "Milliseconds": ms, "Bytes": null, "UnitPrice": price
    })
}

const ACDC: &str = "Angus Young, Malcolm Young, Brian Johnson";

pub async fn seed(backend: &MemoryBackend) {
    backend
        .seed(
            "Artist",
            rows(json!([
                {"ArtistId": 1, "Name": "AC/DC"},
                {"ArtistId": 2, "Name": "Accept"},
                {"ArtistId": 3, "Name": "Aerosmith"}
            ])),
        )
        .await;
    backend
        .seed(
            "Album",
            rows(json!([
                {"AlbumId": 1, "Title": "For Those About To Rock We Salute You", "ArtistId": 1},
                {"AlbumId": 2, "Title": "Balls to the Wall", "ArtistId": 2},
                {"AlbumId": 3, "Title": "Restless and Wild", "ArtistId": 2},
                {"AlbumId": 4, "Title": "Let There Be Rock", "ArtistId": 1}
            ])),
        )
        .await;
    backend
        .seed(
            "Genre",
            rows(json!([
                {"GenreId": 1, "Name": "Rock"},
                {"GenreId": 2, "Name": "Jazz"},
                {"GenreId": 3, "Name": "Metal"}
            ])),
        )
        .await;
    backend
        .seed(
            "MediaType",
            rows(json!([
                {"MediaTypeId": 1, "Name": "MPEG audio file"},
                {"MediaTypeId": 2, "Name": "Protected AAC audio file"}
            ])),
        )
        .await;
    let baltes = "F. Baltes, S. Kaufman, U. Dirkscneider & W. Hoffman";
    backend
        .seed(
            "Track",
            rows(Value::Array(vec![
                track(1, "For Those About To Rock (We Salute You)", 1, 1, 1, Some(ACDC), 343719, "0.99"),
                track(2, "Balls to the Wall", 2, 2, 1, None, 342562, "0.99"),
                track(3, "Fast As a Shark", 3, 2, 1, Some(baltes), 230619, "0.99"),
                track(4, "Restless and Wild", 3, 2, 1, Some(baltes), 252051, "0.99"),
                track(5, "Princess of the Dawn", 3, 2, 1, Some("Deaffy & R.A. Smith-Diesel"), 375418, "0.99"),
                track(6, "Put The Finger On You", 1, 1, 1, Some(ACDC), 205662, "0.99"),
                track(7, "Let's Get It Up", 1, 1, 1, Some(ACDC), 233926, "0.99"),
                track(8, "Inject The Venom", 1, 1, 1, None, 210834, "0.99"),
                track(9, "Go Down", 4, 1, 1, Some("AC/DC"), 331180, "0.99"),
                track(10, "Dog Eat Dog", 4, 1, 3, Some("AC/DC"), 215196, "1.99"),
            ])),
        )
        .await;
    backend
        .seed(
            "Playlist",
            rows(json!([
                {"PlaylistId": 1, "Name": "Music"},
                {"PlaylistId": 2, "Name": "Heavy Metal Classic"}
            ])),
        )
        .await;
    backend
        .seed(
            "PlaylistTrack",
            rows(json!([
                {"PlaylistId": 1, "TrackId": 1},
                {"PlaylistId": 1, "TrackId": 2},
                {"PlaylistId": 1, "TrackId": 3},
                {"PlaylistId": 2, "TrackId": 3}
            ])),
        )
        .await;
}

/// Post-commit callback counts for `Track`.
#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub updated: AtomicUsize,
    pub deleted: AtomicUsize,
}

impl Counters {
    pub fn get(&self) -> (usize, usize, usize) {
        (
            self.created.load(Ordering::SeqCst),
            self.updated.load(Ordering::SeqCst),
            self.deleted.load(Ordering::SeqCst),
        )
    }
}

pub struct Fixture {
    pub app: Router,
    pub backend: MemoryBackend,
    pub counters: Arc<Counters>,
}

/// `Track` is fully writable with `Name` as key field; `Genre` cannot be deleted;
/// every other entity is exposed with all methods.
pub async fn fixture() -> Fixture {
    let backend = MemoryBackend::new();
    seed(&backend).await;
    let counters = Arc::new(Counters::default());

    let (c1, c2, c3) = (counters.clone(), counters.clone(), counters.clone());
    let track = EndpointOptions::new()
        .methods(Verb::ALL)
        .key_field("Name")
        .match_fields(["Name", "Composer"])
        .max_results_per_page(50)
        .on_created(move |_| {
            c1.created.fetch_add(1, Ordering::SeqCst);
        })
        .on_updated(move |_| {
            c2.updated.fetch_add(1, Ordering::SeqCst);
        })
        .on_deleted(move |_| {
            c3.deleted.fetch_add(1, Ordering::SeqCst);
        });

    let entities = derive(&model(), &DeriveOptions::default()).unwrap();
    let manager = ApiBuilder::new(Arc::new(backend.clone()), ApiConfig::default())
        .entities(entities)
        .add("Track", track)
        .add("Genre", EndpointOptions::new().methods([Verb::Get, Verb::Post, Verb::Put]))
        .add("Artist", EndpointOptions::new().methods(Verb::ALL).match_fields(["Name"]))
        .add_all(Verb::ALL)
        .build()
        .unwrap();

    Fixture {
        app: Router::new().merge(manager.common_routes()).merge(manager.router()),
        backend,
        counters,
    }
}

impl Fixture {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        self.request(builder.body(body).unwrap()).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

/// `field` of every item in a list envelope.
pub fn column(body: &Value, field: &str) -> Vec<Value> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item[field].clone())
        .collect()
}
