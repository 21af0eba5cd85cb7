//! End-to-end: a framed echo server over the full engine: accept, sentry
//! promotion, decode, handler dispatch, writer-shard sends, graceful
//! shutdown, and teardown.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tessera::buffer::{ReadBuffer, WriteBuffer};
use tessera::net::tcp::TcpSentry;
use tessera::{
    Channel, Decoder, Directive, Encoder, FrameworkError, Handler, LifeCycle, ListenerConfig, Loc,
    Msg, Net, NetConfig, PollerConfig, Protocol, Result, Sentry, SocketConfig, WriterConfig,
};

/// `i32` length prefix (native order) followed by a UTF-8 payload.
struct FrameEncoder;

impl Encoder for FrameEncoder {
    fn encode(&self, buffer: &mut WriteBuffer, msg: &Msg) -> Result<()> {
        let text = msg
            .downcast_ref::<String>()
            .ok_or_else(|| FrameworkError::Network("unsupported message type".into()))?;
        buffer.write_int(text.len() as i32);
        buffer.write_bytes(text.as_bytes());
        Ok(())
    }
}

struct FrameDecoder;

impl Decoder for FrameDecoder {
    fn decode(&self, buffer: &mut ReadBuffer<'_>, out: &mut Vec<Msg>) -> Result<()> {
        loop {
            if buffer.size() - buffer.read_index() < 4 {
                return Ok(());
            }
            let start = buffer.read_index();
            let len = buffer.read_int() as usize;
            if buffer.size() - buffer.read_index() < len {
                // Incomplete frame: leave everything for the next read.
                buffer.set_read_index(start);
                return Ok(());
            }
            let text = String::from_utf8(buffer.read_bytes(len).to_vec())
                .map_err(|_| FrameworkError::Network("invalid utf-8 frame".into()))?;
            out.push(Box::new(text));
        }
    }
}

#[derive(Default)]
struct Counters {
    connected: AtomicUsize,
    shutdown_hooks: AtomicUsize,
    removed: AtomicUsize,
}

/// Echoes every frame; a "bye" frame additionally requests a graceful
/// shutdown, and the shutdown hook emits one final frame.
struct EchoHandler(Arc<Counters>);

impl Handler for EchoHandler {
    fn on_connected(&self, _channel: &Channel) {
        self.0.connected.fetch_add(1, SeqCst);
    }

    fn on_received(&self, channel: &Channel, msg: Msg) {
        let text = msg.downcast::<String>().expect("string message");
        let is_bye = *text == "bye";
        channel.send(text).expect("echo send");
        if is_bye {
            channel.shutdown();
        }
    }

    fn on_shutdown(&self, channel: &Channel) {
        self.0.shutdown_hooks.fetch_add(1, SeqCst);
        channel
            .send(Box::new(String::from("farewell")))
            .expect("farewell send");
    }

    fn on_removed(&self, _channel: &Channel) {
        self.0.removed.fetch_add(1, SeqCst);
    }
}

/// Client-side handler for the dial leg: greets on connect, records what
/// comes back, never echoes.
#[derive(Default)]
struct DialState {
    echoed: Mutex<Vec<String>>,
    received: AtomicUsize,
}

struct DialHandler(Arc<DialState>);

impl Handler for DialHandler {
    fn on_connected(&self, channel: &Channel) {
        channel
            .send(Box::new(String::from("ping")))
            .expect("greeting send");
    }

    fn on_received(&self, _channel: &Channel, msg: Msg) {
        let text = msg.downcast::<String>().expect("string message");
        self.0.echoed.lock().unwrap().push(*text);
        self.0.received.fetch_add(1, SeqCst);
    }

    fn on_shutdown(&self, _channel: &Channel) {}

    fn on_removed(&self, _channel: &Channel) {}
}

/// Plain-TCP sentry that counts how often it is released.
struct CountingSentry {
    inner: TcpSentry,
    closes: Arc<AtomicUsize>,
}

impl Sentry for CountingSentry {
    fn on_readable(&mut self, scratch: &mut [u8]) -> Result<Directive> {
        self.inner.on_readable(scratch)
    }

    fn on_writable(&mut self) -> Result<Directive> {
        self.inner.on_writable()
    }

    fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>> {
        self.inner.to_protocol()
    }

    fn do_close(&mut self) {
        self.closes.fetch_add(1, SeqCst);
        self.inner.do_close();
    }
}

fn write_frame(stream: &mut TcpStream, text: &str) {
    let mut bytes = (text.len() as i32).to_ne_bytes().to_vec();
    bytes.extend_from_slice(text.as_bytes());
    stream.write_all(&bytes).expect("frame write");
}

fn read_frame(stream: &mut TcpStream) -> String {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).expect("frame length");
    let len = i32::from_ne_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("frame payload");
    String::from_utf8(payload).expect("utf-8 frame")
}

fn await_count(counter: &AtomicUsize, expected: usize, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(SeqCst) < expected {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_echo_round_trip_and_graceful_shutdown() {
    let _ = tracing_subscriber::fmt::try_init();

    let counters = Arc::new(Counters::default());
    let sentry_closes = Arc::new(AtomicUsize::new(0));

    let net = Net::new(
        NetConfig::default(),
        PollerConfig {
            count: 2,
            ..Default::default()
        },
        WriterConfig {
            count: 2,
            ..Default::default()
        },
    );
    net.init();

    let closes = sentry_closes.clone();
    let config = ListenerConfig::new(
        Loc::new("127.0.0.1".parse().unwrap(), 0),
        Box::new(|| Box::new(FrameEncoder)),
        Box::new(|| Box::new(FrameDecoder)),
        Arc::new(EchoHandler(counters.clone())),
    )
    .with_sentry_factory(Box::new(move |channel| {
        Box::new(CountingSentry {
            inner: TcpSentry::new(channel),
            closes: closes.clone(),
        })
    }));
    let bound = net.add_listener(config).expect("listener");

    let mut client = TcpStream::connect(bound.socket_addr()).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    await_count(&counters.connected, 1, "connection establishment");
    assert_eq!(
        sentry_closes.load(SeqCst),
        1,
        "sentry retired exactly once on promotion"
    );

    write_frame(&mut client, "hello");
    assert_eq!(read_frame(&mut client), "hello");

    // A burst of frames exercises the decoder loop over one read.
    write_frame(&mut client, "one");
    write_frame(&mut client, "two");
    assert_eq!(read_frame(&mut client), "one");
    assert_eq!(read_frame(&mut client), "two");

    // "bye" echoes, then the shutdown hook gets its final-message window
    // before the server closes its outbound half.
    write_frame(&mut client, "bye");
    assert_eq!(read_frame(&mut client), "bye");
    assert_eq!(read_frame(&mut client), "farewell");
    await_count(&counters.shutdown_hooks, 1, "shutdown hook");

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).expect("server EOF");
    assert!(rest.is_empty(), "no frames after the farewell");

    // Closing our side lets the server finish the teardown.
    drop(client);
    await_count(&counters.removed, 1, "connection removal");

    // Dial our own listener: the outbound sentry observes connect
    // completion through writability and promotes; the greeting
    // round-trips through the server echo.
    let dial_state = Arc::new(DialState::default());
    net.connect(
        bound,
        Box::new(FrameEncoder),
        Box::new(FrameDecoder),
        Arc::new(DialHandler(dial_state.clone())),
        SocketConfig::default(),
    )
    .expect("dial");

    await_count(&dial_state.received, 1, "dial echo");
    assert_eq!(dial_state.echoed.lock().unwrap().as_slice(), ["ping"]);

    net.exit();
}
