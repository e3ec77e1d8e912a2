use std::time::{Duration, UNIX_EPOCH};

use deckfeed_core::{IndexId, NodeId};
use deckfeed_remote::wire::{into_sitemap, WireCard, WireIndex, WireSitemap, DEFAULT_CARD_TYPE};

const INDEX_BODY: &str = r#"{
    "id": "6f1c0b7e-3c43-4c34-9bd8-16d7f5cb2a61",
    "metadata": {
        "title": "Testy Boy",
        "description": "A deck about cubes",
        "author": "Cube Person",
        "author_slug": "cubes",
        "author_link": "https://cubes.example",
        "slug": "testyboy",
        "image_url": "https://cdn.example/thumb.png",
        "locale": "en",
        "mp3": "https://cdn.example/narration.mp3",
        "last_update_time": { "secs_since_epoch": 1700000000, "nanos_since_epoch": 0 }
    },
    "deck_ids": ["c1", "c2", "c3"],
    "toc": [{ "title": "Start", "id": "c1", "depth": 0, "start": 0.0 }]
}"#;

#[test]
fn index_body_maps_to_index() {
    let wire: WireIndex = serde_json::from_str(INDEX_BODY).unwrap();
    let index = wire.into_index(IndexId::new("/s/cubes/testyboy")).unwrap();

    assert_eq!(index.id, IndexId::new("/s/cubes/testyboy"));
    assert_eq!(index.len(), 3);
    assert_eq!(index.position(&NodeId::from("c3")), Some(2));
    assert_eq!(index.metadata.name, "Testy Boy");
    assert_eq!(index.metadata.content_slug.as_deref(), Some("testyboy"));
    assert_eq!(
        index.metadata.updated_at,
        Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    );
    assert_eq!(index.audio.as_ref().unwrap().url, "https://cdn.example/narration.mp3");
    assert_eq!(index.toc[0].target, NodeId::from("c1"));
    assert_eq!(index.toc[0].start_seconds, Some(0.0));
}

#[test]
fn index_without_ids_is_empty() {
    let wire: WireIndex = serde_json::from_str(r#"{ "metadata": { "title": "Empty" } }"#).unwrap();
    let index = wire.into_index(IndexId::new("/s/a/b")).unwrap();
    assert!(index.is_empty());
    assert!(index.audio.is_none());
}

#[test]
fn duplicate_deck_ids_are_rejected() {
    let wire: WireIndex = serde_json::from_str(r#"{ "deck_ids": ["a", "a"] }"#).unwrap();
    assert!(wire.into_index(IndexId::new("/s/a/b")).is_err());
}

#[test]
fn card_without_type_becomes_title() {
    let card: WireCard = serde_json::from_str(r#"{ "id": "c1", "title": "Hello" }"#).unwrap();
    let node = card.into_node();
    assert_eq!(node.kind, DEFAULT_CARD_TYPE);
    assert_eq!(node.title.as_deref(), Some("Hello"));
}

#[test]
fn card_body_carries_media_transitions_and_stack() {
    let body = r#"{
        "id": "c2",
        "card_type": "stack",
        "content": "outer",
        "video_url": "https://cdn.example/v.mp4",
        "is_loop": true,
        "pngs": ["a.png", "b.png"],
        "pngs_fps": 12.0,
        "fade_in": true,
        "pan_left": true,
        "duration": 1.5,
        "easing": "ease-in",
        "toc_depth": 1,
        "stack": [
            { "id": "c2a", "card_type": "image", "image_url": "https://cdn.example/i.png" },
            { "id": "c2b", "card_type": "" }
        ]
    }"#;
    let node = serde_json::from_str::<WireCard>(body).unwrap().into_node();

    assert_eq!(node.kind, "stack");
    assert_eq!(node.body.as_deref(), Some("outer"));
    assert!(node.media.looped);
    assert_eq!(node.media.pngs.len(), 2);
    assert!(node.transition.fade_in);
    assert!(node.transition.pan_left);
    assert!(!node.transition.pan_right);
    assert_eq!(node.transition.easing.as_deref(), Some("ease-in"));
    assert_eq!(node.toc_depth, Some(1));
    assert_eq!(node.stack.len(), 2);
    assert_eq!(node.stack[0].media.image_url.as_deref(), Some("https://cdn.example/i.png"));
    assert_eq!(node.stack[1].kind, DEFAULT_CARD_TYPE);
}

#[test]
fn sitemap_groups_decks_by_author() {
    let body = r#"{
        "cubes": [
            { "author": "Cube Person", "title": "Testy Boy", "slug": "testyboy" },
            { "author": "Cube Person", "title": "Draft", "slug": "draft", "visible": false }
        ]
    }"#;
    let sitemap = into_sitemap(serde_json::from_str::<WireSitemap>(body).unwrap());
    let decks = &sitemap["cubes"];
    assert_eq!(decks.len(), 2);
    assert!(decks[0].visible);
    assert!(!decks[1].visible);
}
