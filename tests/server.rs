//! TCP tests for `MuxServer` against a fake backend.

mod common;

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use common::{TestResult, unused_listener};
use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use wiremux::{Command, ConnectionId, LinkMessage, MuxServer, ServerError, Verb, frame};
use wiremux_testing::{BackendLink, FakeBackend};

const IO_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    addr: SocketAddr,
    link: BackendLink,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

async fn start() -> TestResult<Running> {
    let backend = FakeBackend::bind().await?;
    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = MuxServer::new(backend.addr()?)
        .ready_signal(ready_tx)
        .bind_listener(unused_listener())?;
    let addr = server.local_addr().ok_or("listener has no address")?;
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = shutdown_rx.await;
    }));
    let link = backend.accept().await?;
    timeout(IO_TIMEOUT, ready_rx).await??;
    Ok(Running {
        addr,
        link,
        shutdown: shutdown_tx,
        handle,
    })
}

async fn expect(link: &mut BackendLink, verb: Verb) -> TestResult<ConnectionId> {
    let cmd = link.expect_command().await?;
    assert_eq!(cmd.verb, verb, "unexpected command {cmd}");
    Ok(cmd.id)
}

#[rstest]
#[tokio::test]
async fn relays_a_client_in_both_directions() -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown,
        handle,
    } = start().await?;

    let mut client = TcpStream::connect(addr).await?;
    let id = expect(&mut link, Verb::Up).await?;
    assert_eq!(id, ConnectionId::new(1));

    client.write_all(b"hello").await?;
    let (data_id, payload) = link.expect_data().await?;
    assert_eq!(data_id, id);
    assert_eq!(payload.as_ref(), b"hello");

    link.send_data(id, b"World!").await?;
    let mut reply = [0_u8; 6];
    timeout(IO_TIMEOUT, client.read_exact(&mut reply)).await??;
    assert_eq!(&reply, b"World!");

    drop(client);
    assert_eq!(expect(&mut link, Verb::Down).await?, id);

    let _ = shutdown.send(());
    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[rstest]
#[case(32)]
#[case(128)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identifiers_follow_client_arrival_order(#[case] clients: u32) -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown,
        handle,
    } = start().await?;

    let mut streams = Vec::new();
    for index in 0..clients {
        let mut client = TcpStream::connect(addr).await?;
        client.write_all(&index.to_be_bytes()).await?;
        streams.push(client);
    }

    let mut received: HashMap<ConnectionId, Vec<u8>> = HashMap::new();
    while received.values().filter(|bytes| bytes.len() >= 4).count() < clients as usize {
        match link.next_message().await? {
            Some(LinkMessage::Data(body)) => {
                let (id, payload) = frame::decode(body)?;
                received.entry(id).or_default().extend_from_slice(&payload);
            }
            Some(LinkMessage::Command(_)) => {}
            None => return Err("backend link went quiet".into()),
        }
    }

    let mut by_id: Vec<_> = received.into_iter().collect();
    by_id.sort_unstable_by_key(|(id, _)| *id);
    let arrivals: Vec<u32> = by_id
        .iter()
        .map(|(_, bytes)| {
            let mut index = [0_u8; 4];
            index.copy_from_slice(&bytes[..4]);
            u32::from_be_bytes(index)
        })
        .collect();
    let expected: Vec<u32> = (0..clients).collect();
    assert_eq!(arrivals, expected, "identifier order differs from arrival order");
    assert_eq!(by_id.first().map(|(id, _)| *id), Some(ConnectionId::new(1)));

    drop(streams);
    let _ = shutdown.send(());
    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn backend_down_closes_the_client() -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown,
        handle,
    } = start().await?;

    let mut client = TcpStream::connect(addr).await?;
    let id = expect(&mut link, Verb::Up).await?;
    link.send_data(id, b"bye").await?;
    link.send_command(Command::down(id)).await?;

    let mut received = Vec::new();
    timeout(IO_TIMEOUT, client.read_to_end(&mut received)).await??;
    assert_eq!(received, b"bye");
    assert_eq!(expect(&mut link, Verb::Down).await?, id);

    let _ = shutdown.send(());
    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn malformed_backend_messages_are_skipped() -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown,
        handle,
    } = start().await?;

    let mut client = TcpStream::connect(addr).await?;
    let id = expect(&mut link, Verb::Up).await?;

    link.send(LinkMessage::Command("not a command".into())).await?;
    link.send(LinkMessage::Data(vec![0_u8; 3].into())).await?;
    link.send_data(ConnectionId::new(99), b"nobody").await?;
    link.send_data(id, b"ok").await?;

    let mut reply = [0_u8; 2];
    timeout(IO_TIMEOUT, client.read_exact(&mut reply)).await??;
    assert_eq!(&reply, b"ok");

    let _ = shutdown.send(());
    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn shutdown_downs_clients_before_closing_the_link() -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown,
        handle,
    } = start().await?;

    let _first = TcpStream::connect(addr).await?;
    let a = expect(&mut link, Verb::Up).await?;
    let _second = TcpStream::connect(addr).await?;
    let b = expect(&mut link, Verb::Up).await?;

    let _ = shutdown.send(());
    let mut downs = vec![
        expect(&mut link, Verb::Down).await?,
        expect(&mut link, Verb::Down).await?,
    ];
    downs.sort_unstable();
    assert_eq!(downs, vec![a, b]);
    assert!(link.next_message().await?.is_none(), "link should close");

    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn backend_disconnect_stops_the_server() -> TestResult {
    let Running {
        addr,
        mut link,
        shutdown: _shutdown,
        handle,
    } = start().await?;

    let mut client = TcpStream::connect(addr).await?;
    expect(&mut link, Verb::Up).await?;
    drop(link);

    let mut rest = Vec::new();
    timeout(IO_TIMEOUT, client.read_to_end(&mut rest)).await??;
    assert!(rest.is_empty());
    timeout(IO_TIMEOUT, handle).await???;
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_reported() -> TestResult {
    let backend = unused_listener().local_addr()?;
    let server = MuxServer::new(backend).bind_listener(unused_listener())?;
    let err = server
        .run_with_shutdown(std::future::pending())
        .await
        .expect_err("backend refused");
    assert!(matches!(err, ServerError::Backend(_)));
    Ok(())
}
