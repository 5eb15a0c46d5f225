//! End-to-end runtime scenarios: load a room, attach clients, and drive the
//! authoritative playback state through the hub.

use std::sync::Arc;
use std::time::Duration;

use cinesync_core::cache::VendorCaches;
use cinesync_core::message::{MessageType, Payload};
use cinesync_core::models::{MovieBase, Room, RoomId, User, UserId, UserRole};
use cinesync_core::op::Runtime;
use cinesync_core::provider::BackendRegistry;
use cinesync_core::repository::{MemoryStore, RoomStore};

struct World {
    runtime: Arc<Runtime>,
    store: Arc<MemoryStore>,
}

fn world() -> World {
    let store = Arc::new(MemoryStore::new());
    let vendors = Arc::new(VendorCaches::new(
        store.clone(),
        Arc::new(BackendRegistry::with_default()),
    ));
    World {
        runtime: Runtime::new(store.clone(), store.clone(), vendors),
        store,
    }
}

fn seed_user(store: &MemoryStore, name: &str) -> User {
    let user = User::new(UserId::new(), name.into(), UserRole::User, "hash".into());
    store.insert_user(user.clone());
    user
}

fn seed_room(store: &MemoryStore, creator: &User) -> RoomId {
    let room = Room::new(RoomId::new(), "movie night".into(), creator.id.clone());
    store.insert_room(room.clone());
    room.id
}

#[tokio::test]
async fn playing_seek_advances_for_later_readers() {
    let w = world();
    let creator = seed_user(&w.store, "creator");
    let room_id = seed_room(&w.store, &creator);
    let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
    let room = entry.value().clone();

    let (client, _rx) = room.new_client(&creator).unwrap();
    room.set_status(&client, true, 30.0, 1.0, 0.0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = room.status();
    assert!(
        status.seek >= 30.4 && status.seek <= 31.0,
        "expected ~30.5, got {}",
        status.seek
    );
    assert!(status.is_playing);
}

#[tokio::test]
async fn status_change_reaches_all_other_clients() {
    let w = world();
    let creator = seed_user(&w.store, "a");
    let room_id = seed_room(&w.store, &creator);
    let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
    let room = entry.value().clone();

    let b = seed_user(&w.store, "b");
    let c = seed_user(&w.store, "c");
    let (client_a, mut rx_a) = room.new_client(&creator).unwrap();
    let (_client_b, mut rx_b) = room.new_client(&b).unwrap();
    let (_client_c, mut rx_c) = room.new_client(&c).unwrap();

    room.set_status(&client_a, false, 42.0, 1.0, 0.0)
        .await
        .unwrap();

    for rx in [&mut rx_b, &mut rx_c] {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("other clients must receive the status")
            .unwrap();
        assert_eq!(msg.message_type(), MessageType::Status);
        match msg.payload {
            Some(Payload::PlaybackStatus(status)) => {
                assert!(!status.is_playing);
                assert!((status.current_time - 42.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    let got_a = tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await;
    assert!(got_a.is_err(), "the initiator must not receive its own status");
}

#[tokio::test]
async fn set_movie_resets_and_notifies_everyone() {
    let w = world();
    let creator = seed_user(&w.store, "creator");
    let room_id = seed_room(&w.store, &creator);
    let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
    let room = entry.value().clone();

    let movie = room
        .movies()
        .push(
            &creator.id,
            None,
            MovieBase {
                url: "https://example.com/film.mp4".into(),
                name: "film".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let viewer = seed_user(&w.store, "viewer");
    let (_client, mut rx) = room.new_client(&viewer).unwrap();

    let current = room
        .set_current_movie(&creator, &movie.id, "", true)
        .await
        .unwrap();
    assert_eq!(current.movie.as_ref().unwrap().id, movie.id);
    assert!((current.status.seek - 0.0).abs() < f64::EPSILON);
    assert!(current.status.is_playing);

    let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.message_type(), MessageType::Current);
    match msg.payload {
        Some(Payload::Current(payload)) => {
            assert_eq!(payload.movie_id, movie.id.as_str());
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn mutations_are_persisted_asynchronously() {
    let w = world();
    let creator = seed_user(&w.store, "creator");
    let room_id = seed_room(&w.store, &creator);
    let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
    let room = entry.value().clone();

    let (client, _rx) = room.new_client(&creator).unwrap();
    room.set_status(&client, true, 12.5, 1.25, 0.0)
        .await
        .unwrap();

    // The persistence task runs out of band; give it a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = w.store.current(&room_id).await.unwrap().unwrap();
    assert!((stored.status.seek - 12.5).abs() < f64::EPSILON);
    assert!((stored.status.rate - 1.25).abs() < f64::EPSILON);
}

#[tokio::test]
async fn reloaded_room_resumes_from_stored_current() {
    let w = world();
    let creator = seed_user(&w.store, "creator");
    let room_id = seed_room(&w.store, &creator);

    {
        let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
        let room = entry.value().clone();
        let (client, _rx) = room.new_client(&creator).unwrap();
        room.set_status(&client, false, 99.0, 1.0, 0.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(w.runtime.compare_and_close_room(&room_id, &entry));
    }

    let entry = w.runtime.load_or_init_room(&room_id).await.unwrap();
    let status = entry.value().status();
    assert!((status.seek - 99.0).abs() < f64::EPSILON);
}
