use std::time::Duration;

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    event::DataEvent,
    registry::ConnectionState,
    sink::{ChannelSink, EventReceiver, SinkError, SinkPolicy},
};

struct Harness {
    mux: Multiplexer,
    backend: EventReceiver,
}

fn channel() -> (Arc<dyn EventSink>, EventReceiver) {
    let (sink, rx) = ChannelSink::builder()
        .capacity(16)
        .policy(SinkPolicy::ReturnErrorIfFull)
        .build()
        .expect("valid sink config");
    (Arc::new(sink), rx)
}

#[fixture]
fn harness() -> Harness {
    let (backend_sink, backend) = channel();
    Harness {
        mux: Multiplexer::new(backend_sink),
        backend,
    }
}

fn data(source: Source, id: u64, payload: &'static [u8]) -> Event {
    Event::data(source, ConnectionId::new(id), payload)
}

#[rstest]
#[tokio::test]
async fn single_client_lifecycle(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let (client_sink, mut client) = channel();

    let session = mux.on_client_connected(client_sink).await.expect("connect");
    assert_eq!(session.id, ConnectionId::new(1));
    mux.on_client_data(session.id, Bytes::from_static(b"hello"))
        .await
        .expect("client data");
    mux.send_to_client(session.id, Bytes::from_static(b"World!"))
        .await
        .expect("backend data");
    mux.on_client_disconnected(session.id).await.expect("disconnect");

    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(
        backend.try_recv(),
        Some(data(Source::FromClient, 1, b"hello"))
    );
    assert_eq!(backend.try_recv(), Some(Event::down(session.id)));
    assert_eq!(backend.try_recv(), None);
    assert_eq!(
        client.try_recv(),
        Some(data(Source::FromBackend, 1, b"World!"))
    );
    assert!(session.closed.is_cancelled());
    assert!(mux.registry().is_empty());

    let err = mux
        .send_to_client(session.id, Bytes::from_static(b"late"))
        .await
        .expect_err("connection is down");
    assert!(err.is_unknown_connection());
}

#[rstest]
#[tokio::test]
async fn never_issued_id_is_unknown(harness: Harness) {
    let id = ConnectionId::new(42);
    let err = harness
        .mux
        .on_client_data(id, Bytes::new())
        .await
        .expect_err("unknown id");
    assert!(matches!(err, MuxError::UnknownConnection(found) if found == id));
    let err = harness
        .mux
        .on_client_disconnected(id)
        .await
        .expect_err("unknown id");
    assert!(err.is_unknown_connection());
}

#[rstest]
#[tokio::test]
async fn second_disconnect_emits_no_second_down(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let (client_sink, _client) = channel();
    let session = mux.on_client_connected(client_sink).await.expect("connect");

    mux.on_client_disconnected(session.id).await.expect("first down");
    let err = mux
        .on_client_disconnected(session.id)
        .await
        .expect_err("second down");
    assert!(err.is_unknown_connection());

    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(backend.try_recv(), Some(Event::down(session.id)));
    assert_eq!(backend.try_recv(), None);
}

#[rstest]
#[tokio::test]
async fn empty_payload_is_relayed() {
    let (backend_sink, mut backend) = channel();
    let mux = Multiplexer::new(backend_sink);
    let (client_sink, _client) = channel();
    let session = mux.on_client_connected(client_sink).await.expect("connect");

    mux.on_client_data(session.id, Bytes::new())
        .await
        .expect("empty data");

    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(
        backend.try_recv(),
        Some(Event::Data(DataEvent {
            source: Source::FromClient,
            id: session.id,
            payload: Bytes::new(),
        }))
    );
}

#[tokio::test]
async fn failed_up_releases_identifier() {
    let (backend_sink, backend) = channel();
    drop(backend);
    let mux = Multiplexer::new(backend_sink);
    let (client_sink, _client) = channel();

    let err = mux
        .on_client_connected(client_sink)
        .await
        .expect_err("backend closed");
    assert!(matches!(err, MuxError::Sink(SinkError::Closed)));
    assert!(mux.registry().is_empty());

    let (client_sink, _client) = channel();
    let err = mux
        .on_client_connected(client_sink)
        .await
        .expect_err("backend still closed");
    assert!(matches!(err, MuxError::Sink(SinkError::Closed)));
    assert!(
        mux.registry().get(ConnectionId::new(1)).is_err(),
        "identifier 1 must not be reissued"
    );
}

#[rstest]
#[tokio::test]
async fn closed_client_sink_forces_down(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let (client_sink, client) = channel();
    let session = mux.on_client_connected(client_sink).await.expect("connect");
    drop(client);

    let err = mux
        .send_to_client(session.id, Bytes::from_static(b"lost"))
        .await
        .expect_err("client gone");
    assert!(matches!(err, MuxError::Sink(SinkError::Closed)));

    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(backend.try_recv(), Some(Event::down(session.id)));
    assert!(session.closed.is_cancelled());
    assert!(mux.registry().is_empty());
}

#[rstest]
#[case::timed_out(SinkPolicy::Block, SinkError::TimedOut)]
#[case::full(SinkPolicy::ReturnErrorIfFull, SinkError::Full)]
#[tokio::test]
async fn stalled_client_sink_forces_down(
    harness: Harness,
    #[case] policy: SinkPolicy,
    #[case] expected: SinkError,
) {
    let Harness { mux, mut backend } = harness;
    let (client_sink, mut client) = ChannelSink::builder()
        .capacity(1)
        .policy(policy)
        .send_timeout(Some(Duration::from_millis(20)))
        .build()
        .expect("valid sink config");
    let session = mux
        .on_client_connected(Arc::new(client_sink))
        .await
        .expect("connect");

    mux.send_to_client(session.id, Bytes::from_static(b"A"))
        .await
        .expect("first payload fits");
    let err = mux
        .send_to_client(session.id, Bytes::from_static(b"B"))
        .await
        .expect_err("client sink is stalled");
    assert!(matches!(err, MuxError::Sink(found) if found == expected));

    assert!(session.closed.is_cancelled());
    assert!(mux.registry().is_empty());
    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(backend.try_recv(), Some(Event::down(session.id)));

    let err = mux
        .send_to_client(session.id, Bytes::from_static(b"C"))
        .await
        .expect_err("connection is down");
    assert!(err.is_unknown_connection());
    assert_eq!(client.try_recv(), Some(data(Source::FromBackend, 1, b"A")));
    assert_eq!(client.try_recv(), None);
}

#[rstest]
#[tokio::test]
async fn backend_down_command_closes_client(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let (client_sink, _client) = channel();
    let session = mux.on_client_connected(client_sink).await.expect("connect");

    mux.handle_backend_command("1 DOWN").await.expect("down");

    assert!(session.closed.is_cancelled());
    assert_eq!(backend.try_recv(), Some(Event::up(session.id)));
    assert_eq!(backend.try_recv(), Some(Event::down(session.id)));
    assert!(mux.registry().is_empty());
}

#[rstest]
#[tokio::test]
async fn backend_up_command_is_rejected(harness: Harness) {
    let err = harness
        .mux
        .handle_backend_command("7 UP")
        .await
        .expect_err("backend cannot open connections");
    assert!(matches!(err, MuxError::UnexpectedCommand(cmd) if cmd.verb == Verb::Up));
}

#[rstest]
#[case::command(LinkMessage::Command(Bytes::from_static(b"banana")))]
#[case::bad_utf8(LinkMessage::Command(Bytes::from_static(&[0xff, 0xfe])))]
#[case::short_frame(LinkMessage::Data(Bytes::from_static(&[0, 0, 1])))]
#[tokio::test]
async fn malformed_backend_input_leaves_connections_intact(
    harness: Harness,
    #[case] message: LinkMessage,
) {
    let Harness { mux, .. } = harness;
    let (client_sink, mut client) = channel();
    let session = mux.on_client_connected(client_sink).await.expect("connect");

    assert!(mux.handle_backend_message(message).await.is_err());

    assert_eq!(
        mux.registry().get(session.id).expect("still live").state().await,
        ConnectionState::Up
    );
    let frame = frame::encode(session.id, b"ok").expect("encode frame");
    mux.handle_backend_message(LinkMessage::Data(frame))
        .await
        .expect("valid frame");
    assert_eq!(client.try_recv(), Some(data(Source::FromBackend, 1, b"ok")));
}

#[rstest]
#[tokio::test]
async fn clients_are_routed_independently(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let (sink_a, mut client_a) = channel();
    let (sink_b, mut client_b) = channel();
    let a = mux.on_client_connected(sink_a).await.expect("connect a");
    let b = mux.on_client_connected(sink_b).await.expect("connect b");
    assert_ne!(a.id, b.id);

    mux.send_to_client(b.id, Bytes::from_static(b"to b"))
        .await
        .expect("send b");
    mux.on_client_disconnected(a.id).await.expect("down a");
    mux.send_to_client(b.id, Bytes::from_static(b"again"))
        .await
        .expect("b unaffected");

    assert_eq!(client_a.try_recv(), None);
    assert_eq!(client_b.try_recv(), Some(data(Source::FromBackend, 2, b"to b")));
    assert_eq!(client_b.try_recv(), Some(data(Source::FromBackend, 2, b"again")));
    assert_eq!(backend.try_recv(), Some(Event::up(a.id)));
    assert_eq!(backend.try_recv(), Some(Event::up(b.id)));
    assert_eq!(backend.try_recv(), Some(Event::down(a.id)));
}

#[rstest]
#[tokio::test]
async fn close_all_downs_every_connection(harness: Harness) {
    let Harness { mux, mut backend } = harness;
    let mut sessions = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (sink, rx) = channel();
        sessions.push(mux.on_client_connected(sink).await.expect("connect"));
        receivers.push(rx);
    }

    assert_eq!(mux.close_all().await, 3);
    assert!(mux.registry().is_empty());
    assert!(sessions.iter().all(|s| s.closed.is_cancelled()));

    let downs = std::iter::from_fn(|| backend.try_recv())
        .filter(|event| event.verb() == Some(Verb::Down))
        .count();
    assert_eq!(downs, 3);
    assert_eq!(mux.close_all().await, 0);
}
