//! Connection-core pipeline scenarios: staging, acknowledgement order,
//! transaction discipline, handshakes, resets, and backpressure.
//!
//! The tests play both sides: user threads stage requests, the test body
//! acts as the server by draining `next_to_write` and feeding decoded
//! replies through `consume_response`.

use std::sync::{Arc, Mutex};

use quarklink::connection::{
    BackpressureStrategy, ConnectionCore, CoreOptions, Handshake, HandshakeStatus, MultiBuilder,
    PerfCallback,
};
use quarklink::pubsub::{Message, MessageListener};
use quarklink::resp::{DecodeStatus, EncodedRequest, Reply, ReplyPtr, ResponseDecoder};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Decode exactly one reply from a byte literal.
fn reply_from(bytes: &[u8]) -> ReplyPtr {
    let mut decoder = ResponseDecoder::new();
    decoder.feed(bytes);
    match decoder.pull() {
        DecodeStatus::Ok(reply) => Arc::new(reply),
        other => panic!("test frame did not decode: {other:?}"),
    }
}

/// Feed a whole server transcript, frame by frame, asserting the core
/// keeps the connection alive throughout.
fn feed_transcript(core: &ConnectionCore, bytes: &[u8]) {
    let mut decoder = ResponseDecoder::new();
    decoder.feed(bytes);
    loop {
        match decoder.pull() {
            DecodeStatus::Ok(reply) => assert!(core.consume_response(Arc::new(reply))),
            DecodeStatus::Incomplete => break,
            DecodeStatus::ProtocolError => panic!("test transcript is corrupt"),
        }
    }
}

/// A listener that records everything it receives.
#[derive(Default)]
struct RecordingListener {
    messages: Mutex<Vec<Message>>,
}

impl MessageListener for RecordingListener {
    fn handle_incoming_message(&self, msg: Message) {
        self.messages.lock().unwrap().push(msg);
    }
}

// ---------------------------------------------------------------------------
// Plain pipelining
// ---------------------------------------------------------------------------

#[test]
fn three_pings_resolve_to_their_own_replies() {
    let core = ConnectionCore::new(CoreOptions::default());

    let mut fut1 = core.execute(&["ping", "asdf1"]);
    let mut fut2 = core.execute(&["ping", "asdf2"]);
    let mut fut3 = core.execute(&["ping", "asdf3"]);

    feed_transcript(&core, b":5\r\n:7\r\n:9\r\n");

    assert_eq!(fut1.try_recv().unwrap(), Some(Arc::new(Reply::Integer(5))));
    assert_eq!(fut2.try_recv().unwrap(), Some(Arc::new(Reply::Integer(7))));
    assert_eq!(fut3.try_recv().unwrap(), Some(Arc::new(Reply::Integer(9))));
}

#[test]
fn writer_and_reader_cooperate_over_full_byte_transcripts() {
    let core = Arc::new(ConnectionCore::new(CoreOptions::default()));

    let mut futures = Vec::new();
    for i in 0..20 {
        futures.push(core.execute(&["get", &format!("key-{i}")]));
    }

    // Writer side: drain everything staged and check it is well-formed
    // RESP in staging order.
    let mut wire = Vec::new();
    for _ in 0..20 {
        let item = core.next_to_write().expect("staged item must be writable");
        wire.extend_from_slice(item.bytes());
    }
    let mut request_decoder = ResponseDecoder::new();
    request_decoder.feed(&wire);
    for i in 0..20 {
        match request_decoder.pull() {
            DecodeStatus::Ok(reply) => {
                assert_eq!(reply, Reply::string_array(&["get", &format!("key-{i}")]));
            }
            other => panic!("request {i} did not round-trip: {other:?}"),
        }
    }

    // Server side: one bulk reply per request, in order.
    for i in 0..20 {
        let payload = format!("value-{i}");
        let frame = format!("${}\r\n{payload}\r\n", payload.len());
        assert!(core.consume_response(reply_from(frame.as_bytes())));
    }
    for (i, fut) in futures.iter_mut().enumerate() {
        let reply = fut.try_recv().unwrap().expect("reply must be present");
        assert!(reply.bulk_equals(&format!("value-{i}")));
    }
}

#[test]
fn application_errors_are_delivered_verbatim() {
    let core = ConnectionCore::new(CoreOptions::default());
    let mut fut = core.execute(&["get", "k"]);

    assert!(core.consume_response(reply_from(b"-ERR wrong number of arguments\r\n")));
    let reply = fut.try_recv().unwrap().unwrap();
    assert_eq!(*reply, Reply::Error("ERR wrong number of arguments".into()));
}

#[test]
fn excess_responses_force_a_teardown() {
    let core = ConnectionCore::new(CoreOptions::default());
    assert!(!core.consume_response(reply_from(b":1\r\n")));
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn transaction_surfaces_only_the_exec_result() {
    let core = ConnectionCore::new(CoreOptions::default());

    let mut multi = MultiBuilder::new();
    multi.push(&["set", "a", "1"]);
    multi.push(&["set", "b", "2"]);
    let mut fut = core.execute_multi(multi);

    feed_transcript(&core, b"+OK\r\n+QUEUED\r\n+QUEUED\r\n*2\r\n:1\r\n:2\r\n");

    let reply = fut.try_recv().unwrap().unwrap();
    assert_eq!(*reply, Reply::Array(vec![Reply::Integer(1), Reply::Integer(2)]));
}

#[test]
fn transaction_callback_fires_only_after_all_bookkeeping_replies() {
    let core = ConnectionCore::new(CoreOptions::default());

    let mut multi = MultiBuilder::new();
    multi.push(&["set", "a", "1"]);
    multi.push(&["set", "b", "2"]);
    let mut fut = core.execute_multi(multi);

    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert!(fut.try_recv().is_err(), "must not resolve after OK");
    assert!(core.consume_response(reply_from(b"+QUEUED\r\n")));
    assert!(core.consume_response(reply_from(b"+QUEUED\r\n")));
    assert!(fut.try_recv().is_err(), "must not resolve before EXEC result");
    assert!(core.consume_response(reply_from(b"*2\r\n:1\r\n:2\r\n")));
    assert!(fut.try_recv().unwrap().is_some());
}

#[test]
fn transaction_rejects_a_missing_ok() {
    let core = ConnectionCore::new(CoreOptions::default());
    let mut multi = MultiBuilder::new();
    multi.push(&["set", "a", "1"]);
    let _fut = core.execute_multi(multi);

    assert!(!core.consume_response(reply_from(b"+QUEUED\r\n")));
}

#[test]
fn transaction_rejects_a_missing_queued() {
    let core = ConnectionCore::new(CoreOptions::default());
    let mut multi = MultiBuilder::new();
    multi.push(&["set", "a", "1"]);
    multi.push(&["set", "b", "2"]);
    let _fut = core.execute_multi(multi);

    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert!(core.consume_response(reply_from(b"+QUEUED\r\n")));
    assert!(!core.consume_response(reply_from(b":12\r\n")));
}

#[test]
fn ordinary_request_after_reset_has_no_phantom_queued_expectations() {
    let core = ConnectionCore::new(CoreOptions::default());

    let mut multi = MultiBuilder::new();
    multi.push(&["set", "a", "1"]);
    multi.push(&["set", "b", "2"]);
    let _multi_fut = core.execute_multi(multi);

    // The server got through OK + one QUEUED, then the connection died.
    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert!(core.consume_response(reply_from(b"+QUEUED\r\n")));
    core.reconnection();

    // The transaction is retried from scratch on the new connection.
    feed_transcript(&core, b"+OK\r\n+QUEUED\r\n+QUEUED\r\n*2\r\n:1\r\n:2\r\n");

    // An ordinary request afterwards completes normally.
    let mut fut = core.execute(&["ping"]);
    assert!(core.consume_response(reply_from(b"+PONG\r\n")));
    assert_eq!(
        fut.try_recv().unwrap(),
        Some(Arc::new(Reply::Status("PONG".into())))
    );
}

// ---------------------------------------------------------------------------
// Handshakes
// ---------------------------------------------------------------------------

/// Two-step test handshake: HELLO, then SELECT, each expecting `+OK`.
struct TwoStepHandshake {
    step: usize,
}

impl Handshake for TwoStepHandshake {
    fn provide_handshake(&mut self) -> EncodedRequest {
        self.step += 1;
        match self.step {
            1 => EncodedRequest::new(&["HELLO", "3"]),
            _ => EncodedRequest::new(&["SELECT", "0"]),
        }
    }

    fn validate_response(&mut self, reply: &Reply) -> HandshakeStatus {
        if !reply.is_ok() {
            return HandshakeStatus::Invalid;
        }
        if self.step == 1 {
            HandshakeStatus::ValidIncomplete
        } else {
            HandshakeStatus::ValidComplete
        }
    }

    fn restart(&mut self) {
        self.step = 0;
    }
}

#[test]
fn handshake_requests_precede_held_user_requests() {
    let core = ConnectionCore::new(CoreOptions {
        handshake: Some(Box::new(TwoStepHandshake { step: 0 })),
        ..CoreOptions::default()
    });

    // Staged while handshaking: held, not dropped.
    let mut user_fut = core.execute(&["get", "k"]);

    let first = core.next_to_write().unwrap();
    assert_eq!(first.bytes(), b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n");
    assert!(core.consume_response(reply_from(b"+OK\r\n")));

    let second = core.next_to_write().unwrap();
    assert_eq!(second.bytes(), b"*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n");
    assert!(core.consume_response(reply_from(b"+OK\r\n")));

    // Handshake complete; the held user request flows now.
    let third = core.next_to_write().unwrap();
    assert_eq!(third.bytes(), b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n");
    assert!(core.consume_response(reply_from(b"$1\r\nv\r\n")));
    assert!(user_fut.try_recv().unwrap().is_some());
}

#[test]
fn handshake_rejection_drops_the_connection() {
    let core = ConnectionCore::new(CoreOptions {
        handshake: Some(Box::new(TwoStepHandshake { step: 0 })),
        ..CoreOptions::default()
    });

    let _ = core.next_to_write().unwrap();
    assert!(!core.consume_response(reply_from(b"-ERR not allowed\r\n")));
}

#[test]
fn reconnection_restarts_the_handshake_and_rewinds_requests() {
    let core = ConnectionCore::new(CoreOptions {
        handshake: Some(Box::new(TwoStepHandshake { step: 0 })),
        ..CoreOptions::default()
    });

    let mut fut = core.execute(&["get", "k"]);

    // First connection: full handshake, then the request goes out, but
    // the connection dies before its reply arrives.
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n"
    );
    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n"
    );
    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n"
    );

    core.reconnection();

    // Second connection: handshake runs again, then the same request is
    // rewritten and finally acknowledged.
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n"
    );
    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n"
    );
    assert!(core.consume_response(reply_from(b"+OK\r\n")));
    assert_eq!(
        core.next_to_write().unwrap().bytes(),
        b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n"
    );
    assert!(core.consume_response(reply_from(b"$1\r\nv\r\n")));
    assert!(fut.try_recv().unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Unavailability, teardown, backpressure
// ---------------------------------------------------------------------------

#[test]
fn transparent_unavailable_reconnects_and_preserves_the_request() {
    let core = ConnectionCore::new(CoreOptions {
        transparent_unavailable: true,
        ..CoreOptions::default()
    });

    let mut fut = core.execute(&["get", "k"]);
    assert_eq!(core.next_to_write().unwrap().bytes(), b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n");

    // Both recognized prefixes force a reconnect instead of a delivery.
    assert!(!core.consume_response(reply_from(b"-ERR unavailable: no leader\r\n")));
    assert!(!core.consume_response(reply_from(b"-UNAVAILABLE try later\r\n")));
    assert!(fut.try_recv().is_err(), "caller must not see the error");

    core.reconnection();
    assert_eq!(core.next_to_write().unwrap().bytes(), b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n");
    assert!(core.consume_response(reply_from(b"$1\r\nv\r\n")));
    assert!(fut.try_recv().unwrap().is_some());
}

#[test]
fn without_the_option_unavailable_errors_reach_the_caller() {
    let core = ConnectionCore::new(CoreOptions::default());
    let mut fut = core.execute(&["get", "k"]);
    assert!(core.consume_response(reply_from(b"-ERR unavailable: no leader\r\n")));
    let reply = fut.try_recv().unwrap().unwrap();
    assert!(reply.is_unavailable());
}

#[test]
fn clear_all_pending_satisfies_everything_with_null() {
    let core = ConnectionCore::new(CoreOptions::default());

    let mut futures: Vec<_> = (0..5).map(|i| core.execute(&["get", &format!("k{i}")])).collect();
    assert_eq!(core.clear_all_pending(), 5);

    for fut in &mut futures {
        assert_eq!(fut.try_recv().unwrap(), None);
    }

    // The core is in a fresh state afterwards.
    let mut fut = core.execute(&["ping"]);
    assert!(core.consume_response(reply_from(b"+PONG\r\n")));
    assert!(fut.try_recv().unwrap().is_some());
    assert_eq!(core.clear_all_pending(), 0);
}

#[test]
fn backpressure_tokens_return_on_acknowledgement() {
    let core = Arc::new(ConnectionCore::new(CoreOptions {
        backpressure: BackpressureStrategy::RateLimitPendingRequests(2),
        ..CoreOptions::default()
    }));

    let _f1 = core.execute(&["ping", "1"]);
    let _f2 = core.execute(&["ping", "2"]);

    // Third stage blocks until one acknowledgement frees a token.
    let staging = {
        let core = Arc::clone(&core);
        std::thread::spawn(move || {
            let _f3 = core.execute(&["ping", "3"]);
        })
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert!(!staging.is_finished());

    assert!(core.consume_response(reply_from(b":1\r\n")));
    staging.join().unwrap();
}

#[test]
fn backpressure_tokens_return_on_clear_all_pending() {
    let core = ConnectionCore::new(CoreOptions {
        backpressure: BackpressureStrategy::RateLimitPendingRequests(1),
        ..CoreOptions::default()
    });
    let _f1 = core.execute(&["ping", "1"]);
    assert_eq!(core.clear_all_pending(), 1);
    // Would deadlock if the token leaked.
    let _f2 = core.execute(&["ping", "2"]);
}

// ---------------------------------------------------------------------------
// Push routing and exclusive pub/sub
// ---------------------------------------------------------------------------

#[test]
fn push_frames_bypass_the_ack_cursor() {
    let listener = Arc::new(RecordingListener::default());
    let core = ConnectionCore::new(CoreOptions {
        listener: Some(Arc::clone(&listener) as Arc<dyn MessageListener>),
        ..CoreOptions::default()
    });

    let mut fut = core.execute(&["get", "k"]);

    // Push frame arrives first; the pending request is unaffected.
    assert!(core.consume_response(reply_from(
        b">4\r\n$6\r\npubsub\r\n$7\r\nmessage\r\n$9\r\nmychannel\r\n$4\r\ntest\r\n"
    )));
    assert!(fut.try_recv().is_err());

    assert!(core.consume_response(reply_from(b"$1\r\nv\r\n")));
    assert!(fut.try_recv().unwrap().is_some());

    let messages = listener.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel(), "mychannel");
    assert_eq!(messages[0].payload(), b"test");
}

#[test]
fn unparseable_push_is_dropped_outside_exclusive_mode() {
    let listener = Arc::new(RecordingListener::default());
    let core = ConnectionCore::new(CoreOptions {
        listener: Some(Arc::clone(&listener) as Arc<dyn MessageListener>),
        ..CoreOptions::default()
    });

    assert!(core.consume_response(reply_from(b">1\r\n$7\r\nmystery\r\n")));
    assert!(listener.messages.lock().unwrap().is_empty());
}

#[test]
fn push_without_a_listener_is_ignored() {
    let core = ConnectionCore::new(CoreOptions::default());
    assert!(core.consume_response(reply_from(
        b">3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$1\r\nx\r\n"
    )));
}

#[test]
fn exclusive_pubsub_forwards_every_reply_and_trims_the_queue() {
    let listener = Arc::new(RecordingListener::default());
    let core = ConnectionCore::new(CoreOptions {
        exclusive_pubsub: true,
        backpressure: BackpressureStrategy::RateLimitPendingRequests(1),
        listener: Some(Arc::clone(&listener) as Arc<dyn MessageListener>),
        ..CoreOptions::default()
    });

    // Even a plain array reply goes to the listener in this mode.
    assert!(core.consume_response(reply_from(
        b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$5\r\nhello\r\n"
    )));
    assert_eq!(listener.messages.lock().unwrap().len(), 1);

    // A staged SUBSCRIBE goes out, is trimmed at the next writer call,
    // and its backpressure token returns, so a second stage does not
    // block even with a limit of one.
    let mut fut = core.execute(&["subscribe", "ch"]);
    let item = core.next_to_write().unwrap();
    assert_eq!(item.bytes(), b"*2\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n");
    core.set_blocking_mode(false);
    assert!(core.next_to_write().is_none());
    // The trimmed entry's future resolved to null.
    assert_eq!(fut.try_recv().unwrap(), None);
    let _second = core.execute(&["subscribe", "ch2"]);

    // Unclassifiable frames are fatal in exclusive mode.
    assert!(!core.consume_response(reply_from(b":1\r\n")));
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPerf {
    markers: Mutex<Vec<(String, u64)>>,
}

impl PerfCallback for RecordingPerf {
    fn send_perf_marker(&self, name: &str, value_us: u64) {
        self.markers.lock().unwrap().push((name.to_owned(), value_us));
    }
}

#[test]
fn acknowledgement_reports_rtt_markers() {
    let perf = Arc::new(RecordingPerf::default());
    let core = ConnectionCore::new(CoreOptions {
        perf_callback: Some(Arc::clone(&perf) as Arc<dyn PerfCallback>),
        ..CoreOptions::default()
    });

    let _fut = core.execute(&["ping"]);
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(core.consume_response(reply_from(b"+PONG\r\n")));

    let markers = perf.markers.lock().unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].0, "rtt_us");
    assert!(markers[0].1 >= 1000, "rtt should cover the sleep");
}
