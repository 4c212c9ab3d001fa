//! Discovery protocol server tests
//!
//! Run the server over an in-memory duplex stream and talk to it the way the
//! parent process does: command lines in, JSON lines out.

use agent::server::DiscoveryServer;
use agent::sync::SyncEngine;
use agent::sync::source::{CancellationHandle, ChangeSource, FallbackSource, Trigger};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockEnumerator, create_dfu_record, with_timeout};
use common::EventSink;
use protocol::{Message, Reply, decode_message};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

type TriggerSlot = Arc<Mutex<Option<Trigger>>>;

/// Change source fired by hand
struct ManualSource {
    slot: TriggerSlot,
}

impl ChangeSource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn start(&mut self, trigger: Trigger, _sink: Arc<dyn EventSink>) -> common::Result<CancellationHandle> {
        *self.slot.lock().unwrap() = Some(trigger);
        Ok(CancellationHandle::new())
    }
}

struct Client {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    enumerator: Arc<MockEnumerator>,
    slot: TriggerSlot,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Client {
    fn spawn(enumerator: MockEnumerator) -> Self {
        let slot: TriggerSlot = Arc::new(Mutex::new(None));
        let source = Box::new(ManualSource { slot: slot.clone() });
        Self::spawn_with_source(enumerator, source, slot)
    }

    fn spawn_with_source(
        enumerator: MockEnumerator,
        source: Box<dyn ChangeSource>,
        slot: TriggerSlot,
    ) -> Self {
        let enumerator = Arc::new(enumerator);
        let engine = SyncEngine::new(enumerator.clone(), source);

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(
            DiscoveryServer::new(engine).run(BufReader::new(server_read), server_write),
        );

        let (client_read, writer) = tokio::io::split(client_io);
        Self {
            lines: BufReader::new(client_read).lines(),
            writer,
            enumerator,
            slot,
            server,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Message {
        let line = with_timeout(DEFAULT_TEST_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for message")
            .unwrap()
            .expect("server closed the stream");
        decode_message(&line).unwrap()
    }

    async fn request(&mut self, line: &str) -> Message {
        self.send(line).await;
        self.recv().await
    }

    async fn hello(&mut self) {
        assert_eq!(self.request(r#"HELLO 1 "test-client 1.0""#).await, Message::hello());
    }

    fn fire(&self) {
        let trigger = self.slot.lock().unwrap().clone().expect("sync not started");
        trigger();
    }

    async fn finish(self) {
        let Client { lines, writer, server, .. } = self;
        drop(writer);
        drop(lines);
        with_timeout(DEFAULT_TEST_TIMEOUT, server)
            .await
            .expect("server did not exit")
            .unwrap()
            .unwrap();
    }
}

fn added(message: Message) -> protocol::Port {
    match message {
        Message::Add { port } => port,
        other => panic!("expected add, got {:?}", other),
    }
}

#[tokio::test]
async fn test_commands_rejected_before_hello() {
    let mut client = Client::spawn(MockEnumerator::new());

    for command in ["START_SYNC", "LIST", "FLASH"] {
        assert_eq!(
            client.request(command).await,
            Message::command_error("First command must be HELLO")
        );
    }

    assert_eq!(
        client.request("HELLO one two").await,
        Message::command_error("Invalid HELLO command")
    );
    client.hello().await;
    assert_eq!(
        client.request(r#"HELLO 1 "again""#).await,
        Message::command_error("HELLO already called")
    );
    client.finish().await;
}

#[tokio::test]
async fn test_unknown_command() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.hello().await;
    assert_eq!(
        client.request("FLASH").await,
        Message::command_error("Command FLASH not supported")
    );
    client.finish().await;
}

#[tokio::test]
async fn test_sync_session_events() {
    let mut client = Client::spawn(MockEnumerator::new());
    client
        .enumerator
        .set_records(vec![create_dfu_record("1-1", 0x1234, 0x5678, "")]);
    client.hello().await;

    // The reply precedes the events of the initial scan
    assert_eq!(client.request("START_SYNC").await, Message::StartSync(Reply::ok()));
    let port = added(client.recv().await);
    assert_eq!(port.address, "1-1");
    assert_eq!(port.protocol, "dfu");
    assert_eq!(port.properties.get("vid"), Some("1234"));

    client.enumerator.set_records(vec![
        create_dfu_record("1-1", 0x1234, 0x5678, ""),
        create_dfu_record("1-2", 0xaaaa, 0xbbbb, "SN42"),
    ]);
    client.fire();
    let port = added(client.recv().await);
    assert_eq!(port.address, "1-2");
    assert_eq!(port.hardware_id, "SN42");

    client
        .enumerator
        .set_records(vec![create_dfu_record("1-2", 0xaaaa, 0xbbbb, "SN42")]);
    client.fire();
    match client.recv().await {
        Message::Remove { port } => {
            assert_eq!(port.address, "1-1");
            assert_eq!(port.protocol, "dfu");
        }
        other => panic!("expected remove, got {:?}", other),
    }

    assert_eq!(
        client.request("START_SYNC").await,
        Message::StartSync(Reply::error("Discovery already START_SYNCed"))
    );
    assert_eq!(
        client.request("LIST").await,
        Message::command_error("Discovery already START_SYNCed, LIST not allowed")
    );

    assert_eq!(client.request("STOP").await, Message::Stop(Reply::ok()));
    assert!(!client.enumerator.is_open());
    assert_eq!(
        client.request("STOP").await,
        Message::Stop(Reply::error("Discovery already STOPped"))
    );

    assert_eq!(client.request("QUIT").await, Message::Quit(Reply::ok()));
    assert!(client.lines.next_line().await.unwrap().is_none());
    client.finish().await;
}

#[tokio::test]
async fn test_start_and_list() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.enumerator.set_records(vec![
        create_dfu_record("2-1", 0x0483, 0xdf11, "B"),
        create_dfu_record("1-4", 0x0483, 0xdf11, "A"),
    ]);
    client.hello().await;

    assert_eq!(
        client.request("LIST").await,
        Message::command_error("Discovery not STARTed")
    );
    assert_eq!(client.request("START").await, Message::Start(Reply::ok()));
    assert_eq!(
        client.request("START").await,
        Message::Start(Reply::error("Discovery already STARTed"))
    );
    assert_eq!(
        client.request("START_SYNC").await,
        Message::StartSync(Reply::error("Discovery already STARTed, cannot START_SYNC"))
    );

    match client.request("LIST").await {
        Message::List { ports } => {
            let addresses: Vec<_> = ports.iter().map(|p| p.address.as_str()).collect();
            assert_eq!(addresses, vec!["1-4", "2-1"]);
        }
        other => panic!("expected list, got {:?}", other),
    }

    client
        .enumerator
        .set_records(vec![create_dfu_record("2-1", 0x0483, 0xdf11, "B")]);
    client.fire();
    match client.request("LIST").await {
        Message::List { ports } => {
            assert_eq!(ports.len(), 1);
            assert_eq!(ports[0].address, "2-1");
        }
        other => panic!("expected list, got {:?}", other),
    }

    assert_eq!(client.request("STOP").await, Message::Stop(Reply::ok()));
    assert_eq!(
        client.request("LIST").await,
        Message::command_error("Discovery not STARTed")
    );
    client.finish().await;
}

#[tokio::test]
async fn test_start_sync_backend_failure() {
    let mut client = Client::spawn(MockEnumerator::failing_open("Access denied"));
    client.hello().await;

    assert_eq!(
        client.request("START_SYNC").await,
        Message::StartSync(Reply::error(
            "Cannot START_SYNC: can't open libusb: Access denied"
        ))
    );
    assert_eq!(
        client.request("STOP").await,
        Message::Stop(Reply::error("Discovery already STOPped"))
    );
    client.finish().await;
}

#[tokio::test]
async fn test_auto_strategy_backend_failure() {
    let slot: TriggerSlot = Arc::new(Mutex::new(None));
    let source = FallbackSource::new(
        Box::new(ManualSource { slot: slot.clone() }),
        Box::new(ManualSource { slot: slot.clone() }),
    );
    let mut client = Client::spawn_with_source(
        MockEnumerator::failing_open("Other error"),
        Box::new(source),
        slot,
    );
    client.hello().await;

    assert_eq!(
        client.request("START_SYNC").await,
        Message::StartSync(Reply::error("Cannot START_SYNC: can't open libusb: Other error"))
    );
    assert!(client.slot.lock().unwrap().is_none());
    assert_eq!(client.request("QUIT").await, Message::Quit(Reply::ok()));
    client.finish().await;
}

#[tokio::test]
async fn test_invalid_utf8_command_keeps_serving() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.hello().await;

    client.writer.write_all(b"\xff\xfe\n").await.unwrap();
    match client.recv().await {
        Message::CommandError(reply) => {
            assert!(reply.error);
            assert!(reply.message.ends_with("not supported"));
        }
        other => panic!("expected command_error, got {:?}", other),
    }

    assert_eq!(
        client.request("STOP").await,
        Message::Stop(Reply::error("Discovery already STOPped"))
    );
    assert_eq!(client.request("QUIT").await, Message::Quit(Reply::ok()));
    client.finish().await;
}

#[tokio::test]
async fn test_scan_errors_reported_as_start_sync_errors() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.hello().await;
    assert_eq!(client.request("START_SYNC").await, Message::StartSync(Reply::ok()));

    client.enumerator.set_enumerate_error(Some("bus gone"));
    client.fire();
    let message = client.recv().await;
    assert!(matches!(message, Message::StartSync(ref reply) if reply.error));
    assert!(message.is_error());
    client.finish().await;
}

#[tokio::test]
async fn test_end_of_input_stops_sync() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.hello().await;
    assert_eq!(client.request("START_SYNC").await, Message::StartSync(Reply::ok()));
    assert!(client.enumerator.is_open());

    let enumerator = client.enumerator.clone();
    client.finish().await;
    assert!(!enumerator.is_open());
}

#[tokio::test]
async fn test_blank_lines_ignored() {
    let mut client = Client::spawn(MockEnumerator::new());
    client.send("").await;
    client.send("   ").await;
    client.hello().await;
    client.finish().await;
}
