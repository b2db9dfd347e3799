use std::time::Duration;

use tokio::sync::mpsc;

use fieldlink::{Client, Delivery, Packet, PacketScanner, PacketWriter, Parse, Priority, Server};

const STREAM_PORT: u16 = 2000;
const DATAGRAM_PORT: u16 = 2001;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    // The field unit prints what the controller says and answers.
    let server_parse = Parse::new();
    server_parse.set_parse_handler(0xCD, |packet| {
        let text = PacketScanner::new(&packet).next_string().unwrap_or_default();
        tracing::info!(channel = packet.channel(), "Server received: {text}");
    });

    let mut server = Server::new(server_parse);
    server.start(STREAM_PORT, DATAGRAM_PORT).await.unwrap();

    let client_parse = Parse::new();
    client_parse.set_parse_handler(0xCF, move |packet| {
        let text = String::from_utf8_lossy(packet.payload()).into_owned();
        tracing::info!(channel = packet.channel(), "Client received: {text}");
        let _ = done_tx.send(());
    });

    let mut client = Client::new(client_parse);
    client.start("127.0.0.1", STREAM_PORT, DATAGRAM_PORT, "TestClient").await.unwrap();
    client.wait_connected(Duration::from_secs(5)).await.unwrap();
    tracing::info!(peer = ?server.peer(), "Link established");

    let hello = PacketWriter::new(0xCD, Delivery::Reliable).put_str("Hello, World!").finish();
    client.send_with_priority(hello, Priority::High).unwrap();

    server.send(Packet::new(0xCF, "hello, world")).unwrap();

    if tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await.is_err() {
        tracing::warn!("No answer from the server");
    }

    tracing::info!(tx = client.stats().packets_tx(), rx = client.stats().packets_rx(), "Done");

    client.shutdown();
    server.shutdown();
}
