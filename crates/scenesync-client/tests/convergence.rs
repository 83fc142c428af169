//! Client mirrors wired to an in-process room server.

use std::sync::Arc;
use std::time::Duration;

use scenesync_client::{ClientConfig, ClientMirror, HistoryEngine, Outbox};
use scenesync_core::{
    ClientMessage, NewObject, ObjectId, ObjectPatch, RoomId, ServerMessage, UserId, Vec3,
};
use scenesync_server::{MemoryStore, RoomServer, ServerConfig, ServerHandle, Store};
use tokio::sync::mpsc;

struct Client {
    mirror: ClientMirror,
    history: HistoryEngine,
    outbox: Outbox,
    inbox: mpsc::Receiver<ServerMessage>,
}

impl Client {
    async fn join(handle: &ServerHandle, user: &str, room: &str) -> Self {
        let (server_tx, inbox) = mpsc::channel(1024);
        let conn = handle.connect(server_tx).await.expect("connect");

        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(1024);
        let forward = handle.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if forward.send(conn, msg).await.is_err() {
                    break;
                }
            }
        });

        let config = ClientConfig::default();
        let mut client = Self {
            mirror: ClientMirror::new(&config, UserId::new(user)),
            history: HistoryEngine::with_config(&config),
            outbox: Outbox::new(out_tx),
            inbox,
        };
        client.outbox.push(ClientMessage::JoinRoom {
            room_id: RoomId::new(room),
            user_id: UserId::new(user),
            user_email: None,
        });
        settle().await;
        client.pump();
        client
    }

    /// Apply everything the server has sent so far
    fn pump(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            self.mirror.apply_message(msg);
        }
    }

    fn create(&mut self, kind: &str) -> ObjectId {
        let object = self.mirror.create_local(NewObject::new(kind));
        self.history.push_create(&object);
        self.outbox.create_object(object.to_new_object());
        object.id
    }

    fn update(&mut self, id: ObjectId, patch: ObjectPatch) {
        self.mirror.update_local(id, &patch);
        self.outbox.update_object(id, patch);
    }

    fn delete(&mut self, id: ObjectId) {
        if let Some(object) = self.mirror.delete_local(id) {
            self.history.push_delete(vec![object]);
        }
        self.outbox.delete_object(id);
    }

    fn undo(&mut self) -> bool {
        self.history.undo(&mut self.mirror, &self.outbox)
    }

    fn redo(&mut self) -> bool {
        self.history.redo(&mut self.mirror, &self.outbox)
    }

    fn position(&self, id: ObjectId) -> Option<Vec3> {
        self.mirror.get(id).map(|o| o.transform.position)
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Long enough for every debounce window and interpolation to finish
async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

fn server() -> (Arc<MemoryStore>, ServerHandle) {
    let store = Arc::new(MemoryStore::with_rooms(["studio"]));
    let config = ServerConfig {
        stale_sweep_probability: 0.0,
        ..Default::default()
    };
    let handle = RoomServer::spawn(config, store.clone());
    (store, handle)
}

#[tokio::test(start_paused = true)]
async fn create_then_delete_converges_on_both_mirrors() {
    let (store, handle) = server();
    let mut c1 = Client::join(&handle, "one", "studio").await;
    let mut c2 = Client::join(&handle, "two", "studio").await;

    let a = c1.create("box");
    // Optimistic
    assert!(c1.mirror.contains(a));
    assert!(c1.mirror.scene().contains(a));

    settle().await;
    c2.pump();
    assert_eq!(c2.mirror.get(a).map(|o| o.kind.as_str()), Some("box"));
    assert!(c2.mirror.scene().contains(a));

    c1.delete(a);
    settle().await;
    c1.pump();
    c2.pump();
    assert!(!c1.mirror.contains(a));
    assert!(!c2.mirror.contains(a));
    assert!(store.get_object(a).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn drag_burst_lands_on_last_position_everywhere() {
    let (store, handle) = server();
    let mut c1 = Client::join(&handle, "one", "studio").await;
    let mut c2 = Client::join(&handle, "two", "studio").await;
    let b = c1.create("box");
    settle().await;
    c2.pump();

    for i in 1..=30 {
        c1.update(b, ObjectPatch::position(Vec3::new(f64::from(i) / 10.0, 0.0, 0.0)));
        tokio::time::sleep(Duration::from_millis(6)).await;
        c2.pump();
    }
    quiesce().await;
    c2.pump();
    quiesce().await;

    let last = Vec3::new(3.0, 0.0, 0.0);
    assert_eq!(c1.position(b), Some(last));
    assert_eq!(c2.position(b), Some(last));
    assert_eq!(
        store.get_object(b).await.unwrap().unwrap().transform.position,
        last
    );
    // The drawn object caught up too
    assert_eq!(
        c2.mirror.scene().get(b).unwrap().transform.position,
        last
    );
}

#[tokio::test(start_paused = true)]
async fn mixed_edits_from_one_session_converge_with_the_store() {
    let (store, handle) = server();
    let mut c1 = Client::join(&handle, "one", "studio").await;
    let mut c2 = Client::join(&handle, "two", "studio").await;

    let a = c1.create("a");
    let b = c1.create("b");
    c1.update(a, ObjectPatch::position(Vec3::ONE));
    c1.update(b, ObjectPatch::color(scenesync_core::Color::rgb(5, 6, 7)));
    settle().await;
    c1.update(a, ObjectPatch::position(Vec3::new(2.0, 2.0, 2.0)));
    c1.delete(b);
    let c = c1.create("c");
    c1.update(c, ObjectPatch::position(Vec3::new(-1.0, 0.0, 0.0)));
    quiesce().await;
    c2.pump();
    quiesce().await;

    let mut stored = store.list_objects(&RoomId::new("studio")).await.unwrap();
    stored.sort_by_key(|o| o.id);
    let mut ids: Vec<_> = stored.iter().map(|o| o.id).collect();
    ids.sort();

    for mirror in [&c1.mirror, &c2.mirror] {
        let mut mirrored: Vec<_> = mirror.objects().map(|o| o.id).collect();
        mirrored.sort();
        assert_eq!(mirrored, ids);
        for object in &stored {
            let local = mirror.get(object.id).unwrap();
            assert_eq!(local.transform, object.transform);
            assert_eq!(local.color, object.color);
        }
    }
    assert!(!c2.mirror.contains(b));
}

#[tokio::test(start_paused = true)]
async fn undo_and_redo_reach_peers() {
    let (store, handle) = server();
    let mut c1 = Client::join(&handle, "one", "studio").await;
    let mut c2 = Client::join(&handle, "two", "studio").await;

    let a = c1.create("sphere");
    settle().await;
    c2.pump();
    let original = c2.mirror.get(a).cloned().unwrap();

    assert!(c1.undo());
    settle().await;
    c2.pump();
    assert!(!c2.mirror.contains(a));
    assert!(store.get_object(a).await.unwrap().is_none());

    assert!(c1.redo());
    settle().await;
    c2.pump();
    let restored = c2.mirror.get(a).unwrap();
    assert_eq!(restored.id, original.id);
    assert_eq!(restored.kind, original.kind);
    assert_eq!(restored.transform, original.transform);
    assert_eq!(restored.geometry, original.geometry);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_gets_current_snapshot() {
    let (_store, handle) = server();
    let mut c1 = Client::join(&handle, "one", "studio").await;
    let a = c1.create("box");
    c1.update(a, ObjectPatch::position(Vec3::new(0.0, 4.0, 0.0)));
    quiesce().await;

    let late = Client::join(&handle, "late", "studio").await;
    assert_eq!(late.position(a), Some(Vec3::new(0.0, 4.0, 0.0)));
    let users: Vec<_> = late.mirror.sessions().map(|s| s.user_id.clone()).collect();
    assert!(users.contains(&UserId::new("one")));
    assert!(users.contains(&UserId::new("late")));
}
