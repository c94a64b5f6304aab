//! End-to-end tests of the sync socket protocol.

mod common;

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open_socket(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/sync")).await.unwrap();
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    match ws.next().await.expect("socket open").unwrap() {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn next_binary(ws: &mut Client) -> Vec<u8> {
    match ws.next().await.expect("socket open").unwrap() {
        Message::Binary(data) => data.to_vec(),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

fn init_msg(token: &str, vault_id: i64, keyhash: &str, version: i64, initial: bool) -> Value {
    json!({
        "op": "init",
        "token": token,
        "device": "test-device",
        "id": vault_id.to_string(),
        "keyhash": keyhash,
        "version": version,
        "initial": initial,
    })
}

/// Connects and authenticates; the caller still owes the catch-up
/// frames (`push`es and the `ready` marker).
async fn connect(
    addr: SocketAddr,
    token: &str,
    vault_id: i64,
    version: i64,
    initial: bool,
) -> Client {
    let mut ws = open_socket(addr).await;
    send_json(&mut ws, init_msg(token, vault_id, common::KEYHASH, version, initial)).await;
    assert_eq!(next_json(&mut ws).await["res"], "ok");
    ws
}

/// Connects on an empty-history cursor and drains the ready marker.
async fn connect_ready(addr: SocketAddr, token: &str, vault_id: i64) -> Client {
    let mut ws = connect(addr, token, vault_id, 0, true).await;
    loop {
        let msg = next_json(&mut ws).await;
        if msg["op"] == "ready" {
            return ws;
        }
    }
}

/// Pushes one single-piece file and waits for the ack, skipping over
/// the connection's own broadcast frame.
async fn push_file(ws: &mut Client, path: &str, hash: &str, content: &[u8]) {
    send_json(
        ws,
        json!({
            "op": "push", "path": path, "hash": hash,
            "folder": false, "deleted": false,
            "size": content.len(), "pieces": 1,
            "ctime": 1, "mtime": 2,
        }),
    )
    .await;

    loop {
        let msg = next_json(ws).await;
        if msg["res"] == "missing-blobs" {
            ws.send(Message::Binary(content.to_vec().into()))
                .await
                .unwrap();
        } else if msg["res"] == "ok" {
            return;
        }
    }
}

async fn push_deleted(ws: &mut Client, path: &str, hash: &str) {
    send_json(
        ws,
        json!({
            "op": "push", "path": path, "hash": hash,
            "folder": false, "deleted": true,
            "ctime": 1, "mtime": 2,
        }),
    )
    .await;
    loop {
        if next_json(ws).await["res"] == "ok" {
            return;
        }
    }
}

fn assert_closed(frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) {
    match frame {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        other => panic!("expected closed socket, got {other:?}"),
    }
}

#[tokio::test]
async fn push_uploads_blob_and_fans_out() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut a = connect(app.addr, &account.token, account.vault_id, 0, true).await;
    assert_eq!(next_json(&mut a).await, json!({"op": "ready", "version": 0}));
    let mut b = connect_ready(app.addr, &account.token, account.vault_id).await;

    send_json(
        &mut a,
        json!({
            "op": "push", "path": "a.md", "hash": "deadbeef",
            "folder": false, "deleted": false,
            "size": 5, "pieces": 1, "ctime": 1, "mtime": 2,
        }),
    )
    .await;

    assert_eq!(next_json(&mut a).await["res"], "missing-blobs");
    a.send(Message::Binary(b"hello".to_vec().into()))
        .await
        .unwrap();

    // the originator hears its own broadcast, then the ack
    let push = next_json(&mut a).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 1);
    assert_eq!(push["path"], "a.md");
    assert_eq!(push["hash"], "deadbeef");
    assert_eq!(push["size"], 5);
    assert_eq!(next_json(&mut a).await["res"], "ok");

    // the peer device receives the same frame
    let push = next_json(&mut b).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 1);

    // the blob landed at its content address
    let path = app.store.path_of(account.vault_id, "deadbeef").unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"hello");

    // nothing left pending once the record committed
    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_file")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn catch_up_replays_previous_records() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut a = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut a, "a.md", "deadbeef", b"hello").await;

    let mut b = connect(app.addr, &account.token, account.vault_id, 0, true).await;
    let push = next_json(&mut b).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 1);
    assert_eq!(push["path"], "a.md");
    assert_eq!(next_json(&mut b).await, json!({"op": "ready", "version": 1}));

    // an up-to-date cursor goes straight to ready
    let mut c = connect(app.addr, &account.token, account.vault_id, 1, true).await;
    assert_eq!(next_json(&mut c).await, json!({"op": "ready", "version": 1}));
}

#[tokio::test]
async fn initial_catch_up_hides_deleted_paths() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut a = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut a, "a.md", "deadbeef", b"hello").await;
    push_deleted(&mut a, "a.md", "deadbeef").await;

    // a fresh device has nothing to delete
    let mut fresh = connect(app.addr, &account.token, account.vault_id, 0, true).await;
    assert_eq!(next_json(&mut fresh).await, json!({"op": "ready", "version": 2}));

    // a returning device must still hear about the deletion
    let mut returning = connect(app.addr, &account.token, account.vault_id, 0, false).await;
    let push = next_json(&mut returning).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 2);
    assert_eq!(push["deleted"], true);
    assert!(push.get("size").is_none());
    assert_eq!(next_json(&mut returning).await["op"], "ready");
}

#[tokio::test]
async fn history_lists_revisions_newest_first() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "aaaa11", b"one").await;
    push_file(&mut ws, "a.md", "bbbb22", b"two!").await;

    send_json(&mut ws, json!({"op": "history", "path": "a.md", "last": 0})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["more"], false);
    let items = reply["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["uid"], 2);
    assert_eq!(items[1]["uid"], 1);
    assert_eq!(items[0]["device"], "test-device");
    assert!(items[0]["ts"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn deleted_lists_currently_deleted_paths() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "aaaa11", b"one").await;
    push_deleted(&mut ws, "a.md", "aaaa11").await;
    push_file(&mut ws, "b.md", "bbbb22", b"two").await;

    send_json(&mut ws, json!({"op": "deleted"})).await;
    let reply = next_json(&mut ws).await;
    let items = reply["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["path"], "a.md");
    assert_eq!(items[0]["deleted"], true);
}

#[tokio::test]
async fn pull_streams_the_blob_back() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "deadbeef", b"hello").await;

    send_json(&mut ws, json!({"op": "pull", "uid": 1})).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"size": 5, "pieces": 1, "deleted": false})
    );
    assert_eq!(next_binary(&mut ws).await, b"hello");

    // unknown records fail the connection
    send_json(&mut ws, json!({"op": "pull", "uid": 99})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["res"], "err");
    assert_eq!(reply["err"], "Record not found");
    assert_closed(ws.next().await);
}

#[tokio::test]
async fn second_push_of_same_hash_skips_the_upload() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "deadbeef", b"hello").await;

    send_json(
        &mut ws,
        json!({
            "op": "push", "path": "copy.md", "hash": "deadbeef",
            "folder": false, "deleted": false,
            "size": 5, "pieces": 1, "ctime": 1, "mtime": 2,
        }),
    )
    .await;

    // no missing-blobs round: straight to broadcast + ack
    let push = next_json(&mut ws).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 2);
    assert_eq!(next_json(&mut ws).await["res"], "ok");
}

#[tokio::test]
async fn ping_is_answered_between_upload_chunks() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    send_json(
        &mut ws,
        json!({
            "op": "push", "path": "big.md", "hash": "deadbeef",
            "folder": false, "deleted": false,
            "size": 10, "pieces": 2, "ctime": 1, "mtime": 2,
        }),
    )
    .await;

    assert_eq!(next_json(&mut ws).await["res"], "missing-blobs");

    // keepalive mid-transfer must not disturb chunk accounting
    send_json(&mut ws, json!({"op": "ping"})).await;
    assert_eq!(next_json(&mut ws).await, json!({"op": "pong"}));

    ws.send(Message::Binary(b"hello".to_vec().into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["res"], "missing-blobs");
    ws.send(Message::Binary(b"world".to_vec().into()))
        .await
        .unwrap();

    assert_eq!(next_json(&mut ws).await["op"], "push");
    assert_eq!(next_json(&mut ws).await["res"], "ok");

    let path = app.store.path_of(account.vault_id, "deadbeef").unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"helloworld");
}

#[tokio::test]
async fn restore_duplicates_a_historical_record() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "aaaa11", b"one").await;
    push_file(&mut ws, "a.md", "bbbb22", b"two").await;

    send_json(&mut ws, json!({"op": "restore", "uid": 1})).await;
    let push = next_json(&mut ws).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["uid"], 3);
    assert_eq!(push["hash"], "aaaa11");
    assert_eq!(push["deleted"], false);
    assert_eq!(next_json(&mut ws).await["res"], "ok");

    // the restored head serves the original content
    send_json(&mut ws, json!({"op": "pull", "uid": 3})).await;
    assert_eq!(next_json(&mut ws).await["size"], 3);
    assert_eq!(next_binary(&mut ws).await, b"one");
}

#[tokio::test]
async fn size_reports_total_and_limit() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    push_file(&mut ws, "a.md", "deadbeef", b"hello").await;

    send_json(&mut ws, json!({"op": "size"})).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"size": 5, "limit": 10737418240i64})
    );
}

#[tokio::test]
async fn push_with_malformed_hash_is_rejected() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    // no pieces, no upload: the hash must still be a usable address
    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    send_json(
        &mut ws,
        json!({
            "op": "push", "path": "a.md", "hash": "ab",
            "folder": false, "deleted": false,
            "size": 5, "ctime": 1, "mtime": 2,
        }),
    )
    .await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["res"], "err");
    assert!(reply["err"].as_str().unwrap().contains("malformed content hash"));
    assert_closed(ws.next().await);

    // nothing was committed, so a later catch-up stays empty
    let mut ws = connect(app.addr, &account.token, account.vault_id, 0, true).await;
    assert_eq!(next_json(&mut ws).await, json!({"op": "ready", "version": 0}));
}

#[tokio::test]
async fn unknown_ops_are_acknowledged() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    let mut ws = connect_ready(app.addr, &account.token, account.vault_id).await;
    send_json(&mut ws, json!({"op": "frobnicate"})).await;
    assert_eq!(next_json(&mut ws).await, json!({"res": "ok"}));
}

#[tokio::test]
async fn init_failures_report_and_close() {
    let app = common::spawn().await;
    let account = common::seed_account(&app.pool).await;

    // wrong keyhash
    let mut ws = open_socket(app.addr).await;
    send_json(
        &mut ws,
        init_msg(&account.token, account.vault_id, "wrong", 0, true),
    )
    .await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"res": "err", "err": "Invalid password"})
    );
    assert_closed(ws.next().await);

    // unknown token
    let mut ws = open_socket(app.addr).await;
    send_json(&mut ws, init_msg("bogus", account.vault_id, common::KEYHASH, 0, true)).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"res": "err", "err": "Auth failed"})
    );
    assert_closed(ws.next().await);

    // missing vault
    let mut ws = open_socket(app.addr).await;
    send_json(&mut ws, init_msg(&account.token, 999, common::KEYHASH, 0, true)).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"res": "err", "err": "Vault not found"})
    );
    assert_closed(ws.next().await);
}

#[tokio::test]
async fn shared_user_syncs_and_receives_broadcasts() {
    let app = common::spawn().await;
    let owner = common::seed_account(&app.pool).await;

    let guest = vault_sync_core::repo::users::create(&app.pool, "guest", "guest@example.com", "pw")
        .await
        .unwrap();
    let guest_token = vault_sync_core::repo::users::create_token(&app.pool, guest.id)
        .await
        .unwrap();
    vault_sync_core::repo::vaults::add_share(&app.pool, owner.vault_id, guest.id)
        .await
        .unwrap();

    let mut owner_ws = connect_ready(app.addr, &owner.token, owner.vault_id).await;
    let mut guest_ws = connect_ready(app.addr, &guest_token, owner.vault_id).await;

    push_file(&mut owner_ws, "a.md", "deadbeef", b"hello").await;

    let push = next_json(&mut guest_ws).await;
    assert_eq!(push["op"], "push");
    assert_eq!(push["path"], "a.md");
}
