//! Discovery protocol server
//!
//! Reads commands line by line and writes replies and events as JSON lines.
//! All writes happen on the server task: background sync contexts report
//! through the channel bridge and the server drains it between commands.
//!
//! Two modes are served on top of the sync engine:
//! - `START_SYNC`: add/remove events are pushed to the parent as they happen
//! - `START`: events feed an internal port cache served through `LIST`

use crate::sync::SyncEngine;
use anyhow::{Context, Result};
use common::{ChannelSink, EventReceiver, EventSink, SyncEvent, create_event_bridge};
use protocol::{Command, Message, Port, ProtocolError, Reply, parse_command, write_message_async};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::{debug, info, warn};

/// Protocol-level discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No HELLO received yet
    AwaitingHello,
    /// Handshake done, discovery stopped
    Idle,
    /// Started in LIST mode
    Started,
    /// Started in event mode
    Syncing,
}

/// Whether the server loop continues after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Port cache served through `LIST`
///
/// Errors raised while synchronizing are still forwarded to the parent.
pub struct PortCache {
    ports: Mutex<BTreeMap<String, Port>>,
    errors: ChannelSink,
}

impl PortCache {
    pub fn new(errors: ChannelSink) -> Self {
        Self {
            ports: Mutex::new(BTreeMap::new()),
            errors,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Port>> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Known ports ordered by address
    pub fn ports(&self) -> Vec<Port> {
        self.lock().values().cloned().collect()
    }
}

impl EventSink for PortCache {
    fn on_port_added(&self, port: &Port) {
        self.lock().insert(port.address.clone(), port.clone());
    }

    fn on_port_removed(&self, port: &Port) {
        self.lock().remove(&port.address);
    }

    fn on_error(&self, message: &str) {
        self.errors.on_error(message);
    }
}

/// Pluggable-discovery protocol server driving a [`SyncEngine`]
pub struct DiscoveryServer {
    engine: Arc<Mutex<SyncEngine>>,
    state: ServerState,
    sink: ChannelSink,
    events: EventReceiver,
    port_cache: Option<Arc<PortCache>>,
}

impl DiscoveryServer {
    pub fn new(engine: SyncEngine) -> Self {
        let (sink, events) = create_event_bridge();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            state: ServerState::AwaitingHello,
            sink,
            events,
            port_cache: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Serve commands from `reader` until QUIT or end of input
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();

        loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => {
                    let read = read.context("Failed to read command")?;
                    if read == 0 && buf.is_empty() {
                        info!("Input closed, shutting down");
                        self.shutdown().await;
                        return Ok(());
                    }
                    // Bytes that are not UTF-8 reach the parser as an unknown command
                    let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                    buf.clear();
                    if line.trim().is_empty() {
                        continue;
                    }
                    if self.handle_line(&line, &mut writer).await? == Flow::Quit {
                        return Ok(());
                    }
                }

                event = self.events.recv() => {
                    // The server keeps a sink alive, so the bridge never closes
                    if let Ok(event) = event {
                        write(&mut writer, &event_message(event)).await?;
                    }
                }
            }
        }
    }

    async fn handle_line<W>(&mut self, line: &str, writer: &mut W) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        // Events raised before this command are reported before its reply
        self.flush_events(writer).await?;

        let command = parse_command(line);
        debug!("Command: {:?}", command);

        if self.state == ServerState::AwaitingHello
            && !matches!(
                command,
                Ok(Command::Hello { .. }) | Ok(Command::Quit) | Err(ProtocolError::InvalidHello)
            )
        {
            write(writer, &Message::command_error("First command must be HELLO")).await?;
            return Ok(Flow::Continue);
        }

        let command = match command {
            Ok(command) => command,
            Err(e) => {
                write(writer, &Message::command_error(e.to_string())).await?;
                return Ok(Flow::Continue);
            }
        };

        let reply = match command {
            Command::Hello {
                protocol_version,
                user_agent,
            } => self.hello(protocol_version, user_agent).await,
            Command::Start => self.start().await,
            Command::StartSync => self.start_sync().await,
            Command::List => self.list(),
            Command::Stop => {
                let reply = self.stop().await;
                self.flush_events(writer).await?;
                reply
            }
            Command::Quit => {
                self.shutdown().await;
                self.flush_events(writer).await?;
                write(writer, &Message::Quit(Reply::ok())).await?;
                return Ok(Flow::Quit);
            }
        };

        write(writer, &reply).await?;
        Ok(Flow::Continue)
    }

    async fn hello(&mut self, protocol_version: u32, user_agent: String) -> Message {
        if self.state != ServerState::AwaitingHello {
            return Message::command_error("HELLO already called");
        }

        let negotiated = protocol::version::negotiate(protocol_version);
        debug!("Negotiated protocol version {}", negotiated);

        let result = self
            .engine_call(move |engine| engine.hello(&user_agent, protocol_version))
            .await;
        if let Err(e) = result {
            return Message::command_error(e.to_string());
        }

        self.state = ServerState::Idle;
        Message::hello()
    }

    async fn start(&mut self) -> Message {
        match self.state {
            ServerState::Started => return Message::Start(Reply::error("Discovery already STARTed")),
            ServerState::Syncing => {
                return Message::Start(Reply::error("Discovery already START_SYNCed"));
            }
            _ => {}
        }

        let cache = Arc::new(PortCache::new(self.sink.clone()));
        let sink: Arc<dyn EventSink> = cache.clone();
        if let Err(e) = self.engine_call(move |engine| engine.start_sync(sink)).await {
            warn!("START failed: {}", e);
            return Message::Start(Reply::error(format!("Cannot START: {}", e)));
        }

        self.port_cache = Some(cache);
        self.state = ServerState::Started;
        Message::Start(Reply::ok())
    }

    async fn start_sync(&mut self) -> Message {
        match self.state {
            ServerState::Syncing => {
                return Message::StartSync(Reply::error("Discovery already START_SYNCed"));
            }
            ServerState::Started => {
                return Message::StartSync(Reply::error(
                    "Discovery already STARTed, cannot START_SYNC",
                ));
            }
            _ => {}
        }

        let sink: Arc<dyn EventSink> = Arc::new(self.sink.clone());
        if let Err(e) = self.engine_call(move |engine| engine.start_sync(sink)).await {
            warn!("START_SYNC failed: {}", e);
            return Message::StartSync(Reply::error(format!("Cannot START_SYNC: {}", e)));
        }

        self.state = ServerState::Syncing;
        Message::StartSync(Reply::ok())
    }

    fn list(&self) -> Message {
        match (&self.state, &self.port_cache) {
            (ServerState::Started, Some(cache)) => Message::List {
                ports: cache.ports(),
            },
            (ServerState::Syncing, _) => {
                Message::command_error("Discovery already START_SYNCed, LIST not allowed")
            }
            _ => Message::command_error("Discovery not STARTed"),
        }
    }

    async fn stop(&mut self) -> Message {
        if !matches!(self.state, ServerState::Started | ServerState::Syncing) {
            return Message::Stop(Reply::error("Discovery already STOPped"));
        }

        if let Err(e) = self.engine_call(|engine| engine.stop()).await {
            return Message::Stop(Reply::error(e.to_string()));
        }

        self.port_cache = None;
        self.state = ServerState::Idle;
        Message::Stop(Reply::ok())
    }

    /// Stop the engine for good
    async fn shutdown(&mut self) {
        if let Err(e) = self.engine_call(|engine| engine.quit()).await {
            warn!("Error stopping sync engine: {}", e);
        }
        self.port_cache = None;
        if self.state != ServerState::AwaitingHello {
            self.state = ServerState::Idle;
        }
    }

    /// Write every queued event
    async fn flush_events<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(event) = self.events.try_recv() {
            write(writer, &event_message(event)).await?;
        }
        Ok(())
    }

    /// Run an engine operation on the blocking pool
    ///
    /// Engine operations enumerate the bus synchronously.
    async fn engine_call<F, T>(&self, f: F) -> common::Result<T>
    where
        F: FnOnce(&mut SyncEngine) -> common::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut engine)
        })
        .await
        .map_err(|e| common::Error::Runtime(e.to_string()))?
    }
}

/// Strip a trailing `\n` or `\r\n`
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn event_message(event: SyncEvent) -> Message {
    match event {
        SyncEvent::Added(port) => Message::add(port),
        SyncEvent::Removed(port) => Message::remove(&port),
        SyncEvent::Error(message) => Message::StartSync(Reply::error(message)),
    }
}

async fn write<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message_async(writer, message)
        .await
        .context("Failed to write message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_dfu_record;
    use common::DeviceEnumerator;

    fn port(address: &str) -> Port {
        crate::sync::port_from_record(&create_dfu_record(address, 0x1234, 0x5678, ""))
    }

    #[test]
    fn test_port_cache_sorted_by_address() {
        let (sink, _events) = create_event_bridge();
        let cache = PortCache::new(sink);

        cache.on_port_added(&port("2-1"));
        cache.on_port_added(&port("1-3"));
        cache.on_port_added(&port("1-1"));
        cache.on_port_removed(&port("1-3"));

        let addresses: Vec<String> = cache.ports().into_iter().map(|p| p.address).collect();
        assert_eq!(addresses, vec!["1-1", "2-1"]);
    }

    #[tokio::test]
    async fn test_port_cache_forwards_errors() {
        let (sink, events) = create_event_bridge();
        let cache = PortCache::new(sink);

        cache.on_error("notification stream closed");
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Error("notification stream closed".to_string())
        );
    }

    #[test]
    fn test_event_messages() {
        assert!(matches!(event_message(SyncEvent::Added(port("1-1"))), Message::Add { .. }));
        assert!(matches!(
            event_message(SyncEvent::Removed(port("1-1"))),
            Message::Remove { .. }
        ));
        let error = event_message(SyncEvent::Error("boom".to_string()));
        assert!(matches!(error, Message::StartSync(_)));
        assert!(error.is_error());
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"LIST\n"), b"LIST");
        assert_eq!(trim_line_ending(b"LIST\r\n"), b"LIST");
        assert_eq!(trim_line_ending(b"LIST"), b"LIST");
        assert_eq!(trim_line_ending(b"\n"), b"");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_unknown_command() {
        let engine = SyncEngine::new(
            Arc::new(common::test_utils::MockEnumerator::new()),
            Box::new(crate::sync::PollSource::default()),
        );
        let input: &[u8] = b"HELLO 1 \"x\"\n\xff\xfe\nSTOP\nQUIT\n";
        let mut output = Vec::new();

        DiscoveryServer::new(engine)
            .run(input, &mut output)
            .await
            .unwrap();

        let replies: Vec<Message> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| protocol::decode_message(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], Message::hello());
        assert_eq!(
            replies[1],
            Message::command_error("Command \u{FFFD}\u{FFFD} not supported")
        );
        assert_eq!(replies[2], Message::Stop(Reply::error("Discovery already STOPped")));
        assert_eq!(replies[3], Message::Quit(Reply::ok()));
    }

    #[test]
    fn test_new_server_awaits_hello() {
        let enumerator = Arc::new(common::test_utils::MockEnumerator::new());
        let engine = SyncEngine::new(
            enumerator.clone(),
            Box::new(crate::sync::PollSource::default()),
        );
        let server = DiscoveryServer::new(engine);
        assert_eq!(server.state(), ServerState::AwaitingHello);
        assert!(!enumerator.is_open());
        assert!(enumerator.enumerate().is_err());
    }
}
