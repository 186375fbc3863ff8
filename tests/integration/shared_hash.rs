//! Shared versioned hash end-to-end: construction-time resilvering,
//! in-order revision application, gap recovery, and the layered write
//! path, all driven over a real connection core.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use quarklink::connection::{CommandIssuer, ConnectionCore, CoreOptions};
use quarklink::pubsub::{Message, Subscriber};
use quarklink::resp::{DecodeStatus, EncodedRequest, Reply, ReplyPtr, ResponseDecoder};
use quarklink::shared::{FeedOutcome, SharedHash, UpdateBatch, VersionedHash};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn reply_from(bytes: &[u8]) -> ReplyPtr {
    let mut decoder = ResponseDecoder::new();
    decoder.feed(bytes);
    match decoder.pull() {
        DecodeStatus::Ok(reply) => Arc::new(reply),
        other => panic!("test frame did not decode: {other:?}"),
    }
}

/// RESP-encode a `(revision, {field: value})` payload the way the server
/// publishes it and `VHGETALL` returns it.
fn hash_payload(revision: u64, entries: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = format!("*2\r\n:{revision}\r\n*{}\r\n", entries.len() * 2).into_bytes();
    for (field, value) in entries {
        bytes.extend_from_slice(format!("${}\r\n{field}\r\n", field.len()).as_bytes());
        bytes.extend_from_slice(format!("${}\r\n{value}\r\n", value.len()).as_bytes());
    }
    bytes
}

/// Drain one staged request off the command connection, returning its
/// wire bytes decoded back into an argument array for easy assertions.
fn next_command(core: &ConnectionCore) -> Reply {
    let item = core.next_to_write().expect("a staged command");
    let mut decoder = ResponseDecoder::new();
    decoder.feed(item.bytes());
    match decoder.pull() {
        DecodeStatus::Ok(reply) => reply,
        other => panic!("staged command is not one RESP frame: {other:?}"),
    }
}

fn command_name(command: &Reply) -> String {
    command
        .elements()
        .and_then(|e| e.first())
        .and_then(Reply::as_bulk_str)
        .unwrap_or_default()
        .to_owned()
}

/// Publish a revision update into the hash the way the pub/sub path
/// delivers it.
fn publish_update(subscriber: &Subscriber, key: &str, revision: u64, entries: &[(&str, &str)]) {
    subscriber.feed_fake_message(Message::message(
        &format!("__vhash@{key}"),
        hash_payload(revision, entries),
    ));
}

// ---------------------------------------------------------------------------
// Revision flow
// ---------------------------------------------------------------------------

#[test]
fn initial_resilver_then_in_order_updates_then_gap_recovery() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
    let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
    let subscriber = Subscriber::standalone();

    let hash = VersionedHash::new(issuer, &subscriber, "mykey");

    // Construction issued the initial VHGETALL.
    let command = next_command(&core);
    assert_eq!(command, Reply::string_array(&["VHGETALL", "mykey"]));

    // Server answers with revision 5 and three fields.
    assert!(core.consume_response(Arc::new(
        ResponseDecoder::parse_encoded(&hash_payload(
            5,
            &[("brubru", "123"), ("qwerty", "234"), ("123", "456")],
        ))
        .unwrap()
    )));

    assert_eq!(hash.get("qwerty").as_deref(), Some("234"));
    assert_eq!(hash.current_version(), 5);

    // Revision 6 arrives over pub/sub and applies.
    publish_update(&subscriber, "mykey", 6, &[("qqq", "ppp")]);
    assert_eq!(hash.current_version(), 6);
    assert_eq!(hash.get("qqq").as_deref(), Some("ppp"));

    // Revision 8 is a gap: not applied, and a fresh VHGETALL goes out.
    publish_update(&subscriber, "mykey", 8, &[("pickles", "are awesome")]);
    assert_eq!(hash.current_version(), 6);
    assert_eq!(hash.get("pickles"), None);

    let command = next_command(&core);
    assert_eq!(command, Reply::string_array(&["VHGETALL", "mykey"]));

    // The resilver reply catches the replica up wholesale.
    assert!(core.consume_response(Arc::new(
        ResponseDecoder::parse_encoded(&hash_payload(
            8,
            &[("qqq", "ppp"), ("pickles", "are awesome")],
        ))
        .unwrap()
    )));
    assert_eq!(hash.current_version(), 8);
    assert_eq!(hash.get("pickles").as_deref(), Some("are awesome"));
    assert_eq!(hash.get("brubru"), None, "resilver replaces contents wholesale");
}

#[test]
fn stale_revisions_are_discarded_without_resilvering() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
    let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
    let subscriber = Subscriber::standalone();
    let hash = VersionedHash::new(issuer, &subscriber, "k");

    let _initial = next_command(&core);
    assert!(core.consume_response(Arc::new(
        ResponseDecoder::parse_encoded(&hash_payload(4, &[("a", "1")])).unwrap()
    )));
    assert_eq!(hash.current_version(), 4);

    publish_update(&subscriber, "k", 3, &[("a", "old")]);
    publish_update(&subscriber, "k", 4, &[("a", "old")]);
    assert_eq!(hash.current_version(), 4);
    assert_eq!(hash.get("a").as_deref(), Some("1"));

    // No extra VHGETALL was staged for the stale feeds.
    core.set_blocking_mode(false);
    assert!(core.next_to_write().is_none());
}

#[test]
fn reconnection_triggers_a_fresh_resilver() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
    let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
    let subscriber = Subscriber::standalone();
    let hash = SharedHash::new(issuer, &subscriber, "k");

    let command = next_command(&core);
    assert_eq!(command, Reply::string_array(&["VHGETALL", "k"]));
    assert!(core.consume_response(Arc::new(
        ResponseDecoder::parse_encoded(&hash_payload(2, &[("a", "1")])).unwrap()
    )));
    assert_eq!(hash.current_revision(), 2);

    // The host reconnected; the hash re-fetches everything.
    core.reconnection();
    hash.notify_connection_established();
    let command = next_command(&core);
    assert_eq!(command, Reply::string_array(&["VHGETALL", "k"]));
}

#[test]
fn deletions_and_replacements_notify_subscribers_with_old_values() {
    let hash = SharedHash::detached("cfg");
    let mut initial = BTreeMap::new();
    initial.insert("keep".to_owned(), "1".to_owned());
    initial.insert("drop".to_owned(), "2".to_owned());
    hash.versioned().resilver(1, initial);

    let sub = hash.subscribe(false);

    let mut update = BTreeMap::new();
    update.insert("drop".to_owned(), String::new());
    update.insert("keep".to_owned(), "9".to_owned());
    assert_eq!(hash.versioned().feed_revision(2, &update), FeedOutcome::Applied);

    let mut seen: Vec<_> = std::iter::from_fn(|| sub.pop_front()).collect();
    seen.sort_by(|a, b| a.key.cmp(&b.key));
    assert_eq!(seen.len(), 2);

    assert_eq!(seen[0].key, "drop");
    assert_eq!(seen[0].old_value.as_deref(), Some("2"));
    assert_eq!(seen[0].new_value, None);

    assert_eq!(seen[1].key, "keep");
    assert_eq!(seen[1].old_value.as_deref(), Some("1"));
    assert_eq!(seen[1].new_value.as_deref(), Some("9"));
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

#[test]
fn durable_writes_travel_as_one_transaction() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
    let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
    let subscriber = Subscriber::standalone();
    let hash = SharedHash::new(issuer, &subscriber, "cfg");

    // Swallow the construction-time VHGETALL.
    let _ = next_command(&core);
    assert!(core.consume_response(Arc::new(
        ResponseDecoder::parse_encoded(&hash_payload(1, &[])).unwrap()
    )));

    let mut batch = UpdateBatch::new();
    batch.set_durable("alpha", "1");
    batch.set_durable("beta", ""); // empty value selects deletion
    let mut fut = hash.set(&batch);

    // One fused MULTI block on the wire: MULTI, VHSET/VHDEL, EXEC.
    let item = core.next_to_write().expect("the transaction must be staged");
    let mut decoder = ResponseDecoder::new();
    decoder.feed(item.bytes());
    let mut commands = Vec::new();
    while let DecodeStatus::Ok(reply) = decoder.pull() {
        commands.push(command_name(&reply));
    }
    assert_eq!(commands, ["MULTI", "VHSET", "VHDEL", "EXEC"]);

    // Acknowledge the transaction; only the EXEC result surfaces.
    for frame in [&b"+OK\r\n"[..], b"+QUEUED\r\n", b"+QUEUED\r\n"] {
        assert!(core.consume_response(reply_from(frame)));
    }
    assert!(fut.try_recv().is_err());
    assert!(core.consume_response(reply_from(b"*2\r\n:1\r\n:1\r\n")));
    let exec = fut.try_recv().unwrap().unwrap();
    assert_eq!(*exec, Reply::Array(vec![Reply::Integer(1), Reply::Integer(1)]));
}

#[test]
fn transient_writes_broadcast_on_their_own_channel() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
    let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
    let subscriber = Subscriber::standalone();
    let hash = SharedHash::new(issuer, &subscriber, "cfg");

    let _ = next_command(&core); // construction VHGETALL

    let mut batch = UpdateBatch::new();
    batch.set_transient("blinker", "on");
    let _fut = hash.set(&batch);

    let command = next_command(&core);
    let elements = command.elements().unwrap();
    assert_eq!(elements[0].as_bulk_str(), Some("PUBLISH"));
    assert_eq!(elements[1].as_bulk_str(), Some("__vhash-transient@cfg"));

    // The payload is itself RESP: the flat field/value array.
    let payload = match &elements[2] {
        Reply::Bulk(bytes) => ResponseDecoder::parse_encoded(bytes).unwrap(),
        other => panic!("payload must be a bulk string, got {other}"),
    };
    assert_eq!(payload, Reply::string_array(&["blinker", "on"]));

    // When the broadcast comes back around, the local copy folds it in.
    subscriber.feed_fake_message(Message::message(
        "__vhash-transient@cfg",
        EncodedRequest::new(&["blinker", "on"]).as_bytes(),
    ));
    assert_eq!(hash.get("blinker").as_deref(), Some("on"));
}

#[test]
fn set_on_a_dead_connection_resolves_to_null() {
    let subscriber = Subscriber::standalone();
    let hash = {
        let core = Arc::new(ConnectionCore::new(CoreOptions::default()));
        let issuer: Weak<dyn CommandIssuer> = Arc::downgrade(&(core.clone() as Arc<dyn CommandIssuer>));
        SharedHash::new(issuer, &subscriber, "cfg")
        // The core drops here; the hash's capability goes dead.
    };

    let mut batch = UpdateBatch::new();
    batch.set_durable("a", "1");
    let mut fut = hash.set(&batch);
    assert_eq!(fut.try_recv().unwrap(), None);
}
