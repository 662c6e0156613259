use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use chat_relay::{
    frame::{Frame, SERVER_ID, read_frame, write_frame},
    registry::Registry,
    relay::{Relay, RelayConfig},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let relay = Relay::with_config(listener, config);
        let addr = relay.local_addr()?;
        let registry = relay.registry();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown,
            server,
        })
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.await;
    }
}

async fn connect_and_register(addr: SocketAddr, id: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    send(&mut stream, SERVER_ID, id, &format!("Connect {id}")).await?;
    Ok(stream)
}

async fn send(
    stream: &mut TcpStream,
    destination: &str,
    source: &str,
    payload: &str,
) -> Result<()> {
    write_frame(stream, &Frame::new(destination, source, payload)).await?;
    Ok(())
}

async fn next_frame(stream: &mut TcpStream) -> Result<Frame> {
    let frame = timeout(READ_TIMEOUT, read_frame(stream))
        .await??
        .expect("relay closed the connection");
    Ok(frame)
}

async fn wait_until_absent(registry: &Registry, id: &str) {
    for _ in 0..50 {
        if registry.lookup(id).await.is_none() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} still registered");
}

#[tokio::test]
async fn chat_scenario() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut alice = connect_and_register(relay.addr, "A").await?;
    assert_eq!(next_frame(&mut alice).await?.payload, "Online clients: A");

    let mut bob = connect_and_register(relay.addr, "B").await?;
    let roster = Frame::new(SERVER_ID, SERVER_ID, "Online clients: A, B");
    assert_eq!(next_frame(&mut alice).await?, roster);
    assert_eq!(next_frame(&mut bob).await?, roster);

    send(&mut alice, "B", "A", "hello").await?;
    assert_eq!(next_frame(&mut bob).await?, Frame::new("B", "A", "hello"));

    send(&mut alice, SERVER_ID, "A", "@Quit").await?;
    assert_eq!(timeout(READ_TIMEOUT, read_frame(&mut alice)).await??, None);
    wait_until_absent(&relay.registry, "A").await;

    send(&mut bob, SERVER_ID, "B", "@List").await?;
    assert_eq!(next_frame(&mut bob).await?.payload, "Online clients: B");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_removes_registration() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut alice = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut alice).await?;
    assert!(relay.registry.lookup("alice").await.is_some());

    drop(alice);
    wait_until_absent(&relay.registry, "alice").await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn unknown_destination_gets_no_reply() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut alice = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut alice).await?;

    send(&mut alice, "ghost", "alice", "anyone?").await?;
    send(&mut alice, "ghost", "alice", "@Send still nobody").await?;
    assert!(
        timeout(Duration::from_millis(200), read_frame(&mut alice))
            .await
            .is_err(),
        "sender must not be notified"
    );

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_keeps_newest_connection() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut first = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut first).await?;
    let mut second = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut second).await?;
    let mut bob = connect_and_register(relay.addr, "bob").await?;
    next_frame(&mut bob).await?;

    // The displaced connection closing must not evict its replacement.
    drop(first);
    sleep(Duration::from_millis(50)).await;
    assert!(relay.registry.lookup("alice").await.is_some());

    // second saw the bob roster; drain it before checking delivery.
    next_frame(&mut second).await?;
    send(&mut bob, "alice", "bob", "hi").await?;
    assert_eq!(next_frame(&mut second).await?, Frame::new("alice", "bob", "hi"));

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn connection_limit_rejects_extra_clients() -> Result<()> {
    let relay = TestRelay::start(RelayConfig {
        max_connections: Some(1),
        idle_timeout: None,
    })
    .await?;

    let mut alice = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut alice).await?;

    let mut rejected = TcpStream::connect(relay.addr).await?;
    let closed = timeout(READ_TIMEOUT, read_frame(&mut rejected)).await?;
    assert!(matches!(closed, Ok(None) | Err(_)));

    drop(alice);
    wait_until_absent(&relay.registry, "alice").await;

    // The permit is returned when the first handler task finishes, which
    // can trail the registry release slightly.
    let mut admitted = None;
    for _ in 0..20 {
        if let Ok(mut bob) = connect_and_register(relay.addr, "bob").await {
            if let Ok(Ok(Some(frame))) = timeout(READ_TIMEOUT, read_frame(&mut bob)).await {
                admitted = Some(frame);
                break;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    let roster = admitted.expect("bob admitted after alice left");
    assert_eq!(roster.payload, "Online clients: bob");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn roster_broadcast_skips_unregistered_connections() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut lurker = TcpStream::connect(relay.addr).await?;
    let mut alice = connect_and_register(relay.addr, "alice").await?;
    assert_eq!(next_frame(&mut alice).await?.payload, "Online clients: alice");
    let mut bob = connect_and_register(relay.addr, "bob").await?;
    let roster = Frame::new(SERVER_ID, SERVER_ID, "Online clients: alice, bob");
    assert_eq!(next_frame(&mut alice).await?, roster);
    assert_eq!(next_frame(&mut bob).await?, roster);

    assert!(
        timeout(Duration::from_millis(200), read_frame(&mut lurker))
            .await
            .is_err(),
        "unregistered connection must not receive the roster"
    );

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn alive_text_between_peers_is_delivered() -> Result<()> {
    let relay = TestRelay::start(RelayConfig::default()).await?;

    let mut alice = connect_and_register(relay.addr, "alice").await?;
    next_frame(&mut alice).await?;
    let mut bob = connect_and_register(relay.addr, "bob").await?;
    next_frame(&mut alice).await?;
    next_frame(&mut bob).await?;

    send(&mut alice, SERVER_ID, "alice", "Alive alice").await?;
    send(&mut alice, "bob", "alice", "Alive and kicking").await?;
    assert_eq!(
        next_frame(&mut bob).await?,
        Frame::new("bob", "alice", "Alive and kicking")
    );

    relay.stop().await;
    Ok(())
}
