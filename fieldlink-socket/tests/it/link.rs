use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tokio_util::codec::Framed;

use fieldlink_queue::Priority;
use fieldlink_socket::{
    BufferPolicy, Client, ClientError, ClientOptions, ConnectionStatus, Parse, Server,
    ServerError, ServerOptions,
};
use fieldlink_wire::{
    handshake::{self, Status},
    Delivery, Packet, PacketScanner, PacketWriter,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A registry that forwards every packet received on `channel` to the returned receiver.
fn forward(channel: u8) -> (Parse, mpsc::UnboundedReceiver<Packet>) {
    let parse = Parse::new();
    let (tx, rx) = mpsc::unbounded_channel();
    parse.set_parse_handler(channel, move |packet| {
        let _ = tx.send(packet);
    });

    (parse, rx)
}

async fn local_server(parse: Parse, options: ServerOptions) -> Server {
    let mut server = Server::with_options(parse, options);
    server.bind("127.0.0.1:0", "127.0.0.1:0").await.unwrap();
    server
}

async fn client_for(server: &Server, name: &str, parse: Parse, options: ClientOptions) -> Client {
    let mut client = Client::with_options(parse, options);
    client
        .connect(server.stream_addr().unwrap(), server.datagram_addr().unwrap(), name)
        .await
        .unwrap();
    client
}

fn fast_retry() -> ClientOptions {
    ClientOptions::default().backoff(Duration::from_millis(50), Duration::from_millis(200))
}

/// Ports nothing listens on right now.
fn free_ports() -> (u16, u16) {
    let stream = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let datagram = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    (stream.port(), datagram.port())
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_for_status(client: &Client, expected: ConnectionStatus) {
    wait_until(&format!("client {expected:?}"), || client.status() == expected).await;
}

#[tokio::test]
async fn hello_world_both_ways() {
    let _ = tracing_subscriber::fmt::try_init();

    let (server_parse, mut server_rx) = forward(0xCD);
    let (client_parse, mut client_rx) = forward(0xCF);

    let (stream_port, datagram_port) = free_ports();

    let mut server = Server::new(server_parse);
    server.start(stream_port, datagram_port).await.unwrap();
    assert!(server.stream_addr().unwrap().ip().is_unspecified());

    let mut client = Client::new(client_parse);
    client.start("127.0.0.1", stream_port, datagram_port, "TestClient").await.unwrap();
    assert_eq!(client.server_addr().map(|addr| addr.port()), Some(stream_port));

    client.wait_connected(TIMEOUT).await.unwrap();
    server.wait_connected(TIMEOUT).await.unwrap();
    assert_eq!(server.peer().map(|peer| peer.name), Some("TestClient".to_string()));

    let packet = PacketWriter::new(0xCD, Delivery::Reliable).put_str("Hello, World!").finish();
    client.send(packet).unwrap();

    let received = timeout(TIMEOUT, server_rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.channel(), 0xCD);
    assert!(received.timestamp() > 0);
    assert_eq!(PacketScanner::new(&received).next_string().unwrap(), "Hello, World!");

    server.send(Packet::new(0xCF, "hello, world")).unwrap();

    let received = timeout(TIMEOUT, client_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&received.payload()[..], b"hello, world");

    assert_eq!(server.stats().packets_rx(), 1);
    assert_eq!(client.stats().packets_rx(), 1);

    server.shutdown();
    wait_for_status(&client, ConnectionStatus::Disconnected).await;
    assert!(matches!(server.send(Packet::new(0xCF, "late")), Err(ServerError::SocketClosed)));
}

#[tokio::test]
async fn best_effort_datagrams() {
    let _ = tracing_subscriber::fmt::try_init();

    let (server_parse, mut server_rx) = forward(0x20);
    let (client_parse, mut client_rx) = forward(0x21);

    let server = local_server(server_parse, ServerOptions::default()).await;
    let client = client_for(&server, "udp", client_parse, ClientOptions::default()).await;
    client.wait_connected(TIMEOUT).await.unwrap();
    server.wait_connected(TIMEOUT).await.unwrap();

    // Datagrams may be lost, keep sending until one arrives.
    let received = timeout(TIMEOUT, async {
        loop {
            client.send(Packet::best_effort(0x20, "ping")).unwrap();
            if let Ok(packet) = timeout(Duration::from_millis(100), server_rx.recv()).await {
                break packet;
            }
        }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(received.delivery(), Delivery::BestEffort);
    assert_eq!(&received.payload()[..], b"ping");

    let received = timeout(TIMEOUT, async {
        loop {
            server.send(Packet::best_effort(0x21, "pong")).unwrap();
            if let Ok(packet) = timeout(Duration::from_millis(100), client_rx.recv()).await {
                break packet;
            }
        }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(&received.payload()[..], b"pong");
}

#[tokio::test]
async fn queued_packets_drain_by_priority() {
    let _ = tracing_subscriber::fmt::try_init();

    // Reserve ports for a server that isn't running yet.
    let stream_addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let datagram_addr = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let mut client = Client::with_options(Parse::new(), fast_retry());
    client.connect(stream_addr, datagram_addr, "early").await.unwrap();

    for (i, level) in [Priority::Low, Priority::Lowest, Priority::High, Priority::Emergent]
        .into_iter()
        .enumerate()
    {
        client.send_with_priority(Packet::new(0x30, vec![i as u8, level as u8]), level).unwrap();
    }
    assert!(client.send_with_priority(Packet::new(0x30, "x"), 5).is_err());
    assert_eq!(client.queued(), 4);

    let (parse, mut rx) = forward(0x30);
    let mut server = Server::new(parse);
    server.bind(stream_addr, datagram_addr).await.unwrap();
    client.wait_connected(TIMEOUT).await.unwrap();

    let mut levels = Vec::new();
    for _ in 0..4 {
        let packet = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        levels.push(packet.payload()[1]);
    }

    let expected: Vec<u8> = [Priority::Emergent, Priority::High, Priority::Low, Priority::Lowest]
        .into_iter()
        .map(|level| level as u8)
        .collect();
    assert_eq!(levels, expected);
}

#[tokio::test]
async fn empty_name_is_rejected() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = local_server(Parse::new(), ServerOptions::default()).await;
    let client = client_for(&server, "", Parse::new(), fast_retry()).await;

    wait_for_status(&client, ConnectionStatus::Closed).await;
    assert_eq!(server.status(), ConnectionStatus::Disconnected);

    // Nothing drains a closed client, sending must fail instead of piling up.
    assert!(matches!(client.send(Packet::new(0x10, "lost")), Err(ClientError::SocketClosed)));
    assert!(matches!(
        client.send_with_priority(Packet::new(0x10, "lost"), Priority::High),
        Err(ClientError::SocketClosed)
    ));
    assert!(matches!(
        client.send_now(Packet::new(0x10, "lost")).await,
        Err(ClientError::SocketClosed)
    ));
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn second_client_is_turned_away() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = local_server(Parse::new(), ServerOptions::default()).await;
    let first = client_for(&server, "first", Parse::new(), ClientOptions::default()).await;
    first.wait_connected(TIMEOUT).await.unwrap();

    let second = client_for(&server, "second", Parse::new(), fast_retry().retry_attempts(1)).await;
    wait_for_status(&second, ConnectionStatus::Closed).await;

    assert!(first.is_connected());
    assert_eq!(server.peer().map(|peer| peer.name), Some("first".to_string()));
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = local_server(Parse::new(), ServerOptions::default()).await;
    let stream_addr = server.stream_addr().unwrap();
    let datagram_addr = server.datagram_addr().unwrap();

    let client = client_for(&server, "persistent", Parse::new(), fast_retry()).await;
    client.wait_connected(TIMEOUT).await.unwrap();

    drop(server);
    timeout(TIMEOUT, async {
        while client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let (parse, mut rx) = forward(0x40);
    let mut server = Server::new(parse);
    server.bind(stream_addr, datagram_addr).await.unwrap();

    client.wait_connected(TIMEOUT).await.unwrap();
    client.send(Packet::new(0x40, "back")).unwrap();

    let received = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(&received.payload()[..], b"back");
    assert!(client.stats().sessions() >= 2);
}

#[tokio::test]
async fn bandwidth_policy_end_to_end() {
    let _ = tracing_subscriber::fmt::try_init();

    const PER_CLASS: usize = 50;

    let (parse, mut rx) = forward(0x50);
    let server = local_server(parse, ServerOptions::default()).await;

    let options = ClientOptions::default().buffer(BufferPolicy::bandwidth(vec![1, 2, 5]));
    let client = client_for(&server, "shaped", Parse::new(), options).await;
    client.wait_connected(TIMEOUT).await.unwrap();

    for class in 0..3u8 {
        for _ in 0..PER_CLASS {
            client.send_with_priority(Packet::new(0x50, vec![class; 32]), class as i32).unwrap();
        }
    }

    let mut per_class = [0usize; 3];
    for _ in 0..3 * PER_CLASS {
        let packet = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        per_class[packet.payload()[0] as usize] += 1;
    }

    assert_eq!(per_class, [PER_CLASS; 3]);
}

#[tokio::test]
async fn send_now_skips_the_queue() {
    let _ = tracing_subscriber::fmt::try_init();

    let (client_parse, mut client_rx) = forward(0x60);
    let server = local_server(Parse::new(), ServerOptions::default()).await;

    assert!(matches!(
        server.send_now(Packet::new(0x60, "nobody")).await,
        Err(ServerError::NotConnected)
    ));

    let client = client_for(&server, "urgent", client_parse, ClientOptions::default()).await;
    client.wait_connected(TIMEOUT).await.unwrap();
    server.wait_connected(TIMEOUT).await.unwrap();

    server.send_now(Packet::new(0x60, "now")).await.unwrap();

    let received = timeout(TIMEOUT, client_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&received.payload()[..], b"now");
    assert_eq!(server.queued(), 0);

    // The datagram itself may be lost, but the socket must take it.
    server.send_now(Packet::best_effort(0x60, "fast")).await.unwrap();
}

#[tokio::test]
async fn silent_peer_trips_the_watchdog() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ServerOptions::default().watchdog_timeout(Duration::from_millis(300));
    let server = local_server(Parse::new(), options).await;

    // A peer that completes the handshake and then never says anything.
    let stream = TcpStream::connect(server.stream_addr().unwrap()).await.unwrap();
    let mut conn = Framed::new(stream, handshake::Codec::new_client());
    conn.send(handshake::Message::hello(9, "silent")).await.unwrap();

    let ack = timeout(TIMEOUT, conn.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(ack, handshake::Message::Ack(Status::Okay)));

    server.wait_connected(TIMEOUT).await.unwrap();
    assert_eq!(server.peer().map(|peer| peer.name), Some("silent".to_string()));

    wait_until("the watchdog", || server.status() == ConnectionStatus::Disconnected).await;
    assert!(server.peer().is_none());
    drop(conn);
}
