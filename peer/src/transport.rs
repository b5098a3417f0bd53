//! TCP transport: a listener for the Host, an endpoint for the Client, and
//! the per-connection handler both are built on.
//!
//! Each connection runs a reader task that decodes frames and hands them to a
//! [`LinkHandler`], and a writer task fed through a bounded queue. `send`
//! never waits on the socket; frames that do not fit in the queue are dropped.
//! Closing a connection aborts both tasks,
//! which drops the socket halves and unblocks any pending read.

use crate::error::{ConnectionError, FrameError};
use crate::lock;
use log::{debug, error, info, warn};
use shared::protocol::{decode_header, decode_payload, encode_frame, Message, FRAME_HEADER_LEN};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Connection ids are process-wide and never reused.
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Frames a connection may hold for its writer before new ones are dropped.
pub const OUTBOUND_QUEUE_LEN: usize = 64;

/// Receiver of transport events. Called synchronously from transport tasks,
/// so implementations must not block.
pub trait LinkHandler: Send + Sync + 'static {
    /// A connection was admitted by a listener and is about to start reading.
    fn on_accepted(&self, _connection: &Arc<ConnectionHandler>) {}

    fn on_message(&self, connection_id: u32, message: Message);

    /// Fired exactly once per connection.
    fn on_disconnected(&self, connection_id: u32);
}

type Pending = (OwnedReadHalf, OwnedWriteHalf, mpsc::Receiver<Vec<u8>>);

pub struct ConnectionHandler {
    id: u32,
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
    connected: AtomicBool,
    pending: Mutex<Option<Pending>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    handler: Arc<dyn LinkHandler>,
}

impl ConnectionHandler {
    /// Wraps an established stream. Nothing is read until [`start`](Self::start).
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, handler: Arc<dyn LinkHandler>) -> Arc<Self> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);

        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            outbound,
            connected: AtomicBool::new(true),
            pending: Mutex::new(Some((reader, writer, outbound_rx))),
            tasks: Mutex::new(Vec::new()),
            handler,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frames waiting for the writer.
    pub fn queued_frames(&self) -> usize {
        OUTBOUND_QUEUE_LEN - self.outbound.capacity()
    }

    /// Spawns the reader and writer tasks. Later calls do nothing.
    pub fn start(self: &Arc<Self>) {
        let Some((reader, writer, outbound_rx)) = lock(&self.pending).take() else {
            return;
        };

        let read_task = tokio::spawn(Arc::clone(self).receive_loop(reader));
        let write_task = tokio::spawn(Arc::clone(self).send_loop(writer, outbound_rx));
        lock(&self.tasks).extend([read_task, write_task]);

        // Closed while the tasks were being spawned.
        if !self.is_connected() {
            self.abort_tasks();
        }
    }

    /// Queues a message. Failures are logged and the message is dropped.
    pub fn send(&self, message: &Message) {
        match encode_frame(message) {
            Ok(frame) => self.send_frame(frame, message.kind()),
            Err(e) => error!("Connection {}: cannot encode {}: {}", self.id, message.kind(), e),
        }
    }

    fn send_frame(&self, frame: Vec<u8>, kind: &str) {
        if !self.is_connected() {
            warn!("Connection {}: link down, dropping {}", self.id, kind);
            return;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Connection {}: send queue full, dropping {}", self.id, kind);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Connection {}: writer gone, dropping {}", self.id, kind);
            }
        }
    }

    /// Closes the connection. The disconnect notification fires only on the
    /// first call, whether that comes from here or from a failing stream.
    pub fn close(&self) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!("Connection {} to {} closed", self.id, self.peer_addr);
        lock(&self.pending).take();
        self.abort_tasks();
        self.handler.on_disconnected(self.id);
    }

    fn abort_tasks(&self) {
        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        loop {
            match read_frame(&mut reader).await {
                Ok(message) => {
                    debug!("Connection {}: received {}", self.id, message.kind());
                    self.handler.on_message(self.id, message);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Connection {}: dropping frame: {}", self.id, e);
                }
                Err(e) => {
                    info!("Connection {}: {}", self.id, e);
                    break;
                }
            }
        }
        self.close();
    }

    async fn send_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                warn!("Connection {}: write failed: {}", self.id, e);
                self.close();
                return;
            }
        }
    }
}

/// Reads one length-prefixed frame and decodes its payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = decode_header(header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(decode_payload(&payload)?)
}

/// Keeps the listener's connection table in step with disconnects before
/// forwarding events to the session.
struct ListenerLink {
    connections: Arc<Mutex<BTreeMap<u32, Arc<ConnectionHandler>>>>,
    inner: Arc<dyn LinkHandler>,
}

impl LinkHandler for ListenerLink {
    fn on_accepted(&self, connection: &Arc<ConnectionHandler>) {
        self.inner.on_accepted(connection);
    }

    fn on_message(&self, connection_id: u32, message: Message) {
        self.inner.on_message(connection_id, message);
    }

    fn on_disconnected(&self, connection_id: u32) {
        lock(&self.connections).remove(&connection_id);
        self.inner.on_disconnected(connection_id);
    }
}

/// Host side: accepts up to `max_connections` peers. Extra connections are
/// closed right away, before any message is exchanged.
pub struct ConnectionListener {
    local_addr: SocketAddr,
    connections: Arc<Mutex<BTreeMap<u32, Arc<ConnectionHandler>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl ConnectionListener {
    /// Binds on all interfaces. Port 0 picks a free port.
    pub async fn bind(
        port: u16,
        max_connections: usize,
        handler: Arc<dyn LinkHandler>,
    ) -> Result<Self, ConnectionError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ConnectionError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ConnectionError::Bind { port, source })?;
        info!("Listening on {}", local_addr);

        let connections = Arc::new(Mutex::new(BTreeMap::new()));
        let link: Arc<dyn LinkHandler> = Arc::new(ListenerLink {
            connections: Arc::clone(&connections),
            inner: handler,
        });
        let accept_task = tokio::spawn(accept_loop(
            listener,
            max_connections,
            Arc::clone(&connections),
            link,
        ));

        Ok(Self {
            local_addr,
            connections,
            accept_task: Mutex::new(Some(accept_task)),
            running: AtomicBool::new(true),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True until stopped.
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn send_to(&self, connection_id: u32, message: &Message) {
        let connection = lock(&self.connections).get(&connection_id).cloned();
        match connection {
            Some(connection) => connection.send(message),
            None => warn!(
                "No connection {}, dropping {}",
                connection_id,
                message.kind()
            ),
        }
    }

    pub fn broadcast(&self, message: &Message) {
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Cannot encode {}: {}", message.kind(), e);
                return;
            }
        };
        let connections: Vec<_> = lock(&self.connections).values().cloned().collect();
        for connection in connections {
            connection.send_frame(frame.clone(), message.kind());
        }
    }

    /// Stops accepting and closes every connection. Idempotent.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }
        let connections: Vec<_> = std::mem::take(&mut *lock(&self.connections))
            .into_values()
            .collect();
        for connection in connections {
            connection.close();
        }
        info!("Listener on {} stopped", self.local_addr);
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    max_connections: usize,
    connections: Arc<Mutex<BTreeMap<u32, Arc<ConnectionHandler>>>>,
    link: Arc<dyn LinkHandler>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if lock(&connections).len() >= max_connections {
                    info!("Rejecting {}: already at {} connection(s)", addr, max_connections);
                    drop(stream);
                    continue;
                }

                let connection = ConnectionHandler::new(stream, addr, Arc::clone(&link));
                lock(&connections).insert(connection.id(), Arc::clone(&connection));
                info!("Accepted connection {} from {}", connection.id(), addr);

                link.on_accepted(&connection);
                connection.start();
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Client side: a single outbound connection.
pub struct RemoteEndpoint {
    connection: Arc<ConnectionHandler>,
}

impl RemoteEndpoint {
    pub async fn connect(
        host: &str,
        port: u16,
        handler: Arc<dyn LinkHandler>,
    ) -> Result<Self, ConnectionError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectionError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|source| ConnectionError::Connect { addr, source })?;
        info!("Connected to {}", peer_addr);

        let connection = ConnectionHandler::new(stream, peer_addr, handler);
        connection.start();
        Ok(Self { connection })
    }

    pub fn connection_id(&self) -> u32 {
        self.connection.id()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn send(&self, message: &Message) {
        self.connection.send(message);
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.connection.close();
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{ClientUpdate, MAX_FRAME_LEN};
    use shared::Direction;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::time::timeout;

    #[derive(Debug)]
    enum Event {
        Accepted(u32),
        Message(u32, Message),
        Disconnected(u32),
    }

    struct Recorder {
        tx: UnboundedSender<Event>,
    }

    impl LinkHandler for Recorder {
        fn on_accepted(&self, connection: &Arc<ConnectionHandler>) {
            let _ = self.tx.send(Event::Accepted(connection.id()));
        }

        fn on_message(&self, connection_id: u32, message: Message) {
            let _ = self.tx.send(Event::Message(connection_id, message));
        }

        fn on_disconnected(&self, connection_id: u32) {
            let _ = self.tx.send(Event::Disconnected(connection_id));
        }
    }

    fn recorder() -> (Arc<Recorder>, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    fn client_update() -> Message {
        Message::ClientUpdate(ClientUpdate {
            player_id: 1,
            x: 1.0,
            y: 2.0,
            direction: Direction::Left,
            attacking: false,
            is_moving: true,
        })
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (host_handler, mut host_rx) = recorder();
        let listener = ConnectionListener::bind(0, 1, host_handler).await.unwrap();
        let port = listener.local_addr().port();

        let (client_handler, mut client_rx) = recorder();
        let endpoint = RemoteEndpoint::connect("127.0.0.1", port, client_handler)
            .await
            .unwrap();

        let conn_id = match next(&mut host_rx).await {
            Event::Accepted(id) => id,
            other => panic!("Unexpected event: {:?}", other),
        };
        listener.send_to(conn_id, &Message::AssignIdentity { id: 1 });
        match next(&mut client_rx).await {
            Event::Message(_, Message::AssignIdentity { id }) => assert_eq!(id, 1),
            other => panic!("Unexpected event: {:?}", other),
        }

        endpoint.send(&client_update());
        match next(&mut host_rx).await {
            Event::Message(id, message) => {
                assert_eq!(id, conn_id);
                assert_eq!(message, client_update());
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        listener.stop();
    }

    #[tokio::test]
    async fn test_disconnect_fires_once() {
        let (host_handler, mut host_rx) = recorder();
        let listener = ConnectionListener::bind(0, 1, host_handler).await.unwrap();
        let port = listener.local_addr().port();

        let (client_handler, mut client_rx) = recorder();
        let endpoint = RemoteEndpoint::connect("127.0.0.1", port, client_handler)
            .await
            .unwrap();
        assert!(matches!(next(&mut host_rx).await, Event::Accepted(_)));

        endpoint.stop();
        endpoint.stop();
        assert!(!endpoint.is_connected());

        assert!(matches!(next(&mut client_rx).await, Event::Disconnected(_)));
        assert!(matches!(next(&mut host_rx).await, Event::Disconnected(_)));
        assert_eq!(listener.connection_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client_rx.try_recv().is_err());
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_cap() {
        let (host_handler, mut host_rx) = recorder();
        let listener = ConnectionListener::bind(0, 1, host_handler).await.unwrap();
        let port = listener.local_addr().port();

        let (first_handler, _first_rx) = recorder();
        let _first = RemoteEndpoint::connect("127.0.0.1", port, first_handler)
            .await
            .unwrap();
        assert!(matches!(next(&mut host_rx).await, Event::Accepted(_)));

        let (second_handler, mut second_rx) = recorder();
        let second = RemoteEndpoint::connect("127.0.0.1", port, second_handler)
            .await
            .unwrap();
        assert!(matches!(next(&mut second_rx).await, Event::Disconnected(_)));
        assert!(!second.is_connected());
        assert_eq!(listener.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (host_handler, mut host_rx) = recorder();
        let listener = ConnectionListener::bind(0, 1, host_handler).await.unwrap();
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert!(matches!(next(&mut host_rx).await, Event::Accepted(_)));

        let garbage = [0xFFu8; 3];
        raw.write_all(&(garbage.len() as u32).to_le_bytes()).await.unwrap();
        raw.write_all(&garbage).await.unwrap();
        raw.write_all(&encode_frame(&client_update()).unwrap()).await.unwrap();

        match next(&mut host_rx).await {
            Event::Message(_, message) => assert_eq!(message, client_update()),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(listener.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_full_send_queue_drops_new_frames() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut peer, _) = server.accept().await.unwrap();

        let (handler, _rx) = recorder();
        let connection = ConnectionHandler::new(stream, addr, handler);
        // Writer not started yet, so nothing drains the queue.
        for _ in 0..OUTBOUND_QUEUE_LEN + 10 {
            connection.send(&client_update());
        }
        assert_eq!(connection.queued_frames(), OUTBOUND_QUEUE_LEN);
        assert!(connection.is_connected());

        connection.start();
        for _ in 0..OUTBOUND_QUEUE_LEN {
            let message = timeout(Duration::from_secs(2), read_frame(&mut peer))
                .await
                .expect("timed out waiting for queued frame")
                .unwrap();
            assert_eq!(message, client_update());
        }
        assert!(timeout(Duration::from_millis(100), read_frame(&mut peer))
            .await
            .is_err());
        assert_eq!(connection.queued_frames(), 0);

        connection.close();
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (host_handler, mut host_rx) = recorder();
        let listener = ConnectionListener::bind(0, 1, host_handler).await.unwrap();
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert!(matches!(next(&mut host_rx).await, Event::Accepted(_)));

        let len = (MAX_FRAME_LEN as u32) + 1;
        raw.write_all(&len.to_le_bytes()).await.unwrap();
        assert!(matches!(next(&mut host_rx).await, Event::Disconnected(_)));
        assert_eq!(listener.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connection_error() {
        let (handler, _rx) = recorder();
        let first = ConnectionListener::bind(0, 1, handler.clone()).await.unwrap();
        let port = first.local_addr().port();

        match ConnectionListener::bind(port, 1, handler).await {
            Err(ConnectionError::Bind { port: p, .. }) => assert_eq!(p, port),
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Second bind on port {} succeeded", port),
        }
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let (handler, _rx) = recorder();
        let port = {
            let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            unused.local_addr().unwrap().port()
        };
        let result = RemoteEndpoint::connect("127.0.0.1", port, handler).await;
        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }
}
