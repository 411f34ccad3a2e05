//! HTTP and push-channel connection tasks
//!
//! Each task owns one client slot. It accepts a TCP connection on port 80,
//! serves one HTTP request, and when that request upgrades to the push
//! channel it stays on the connection: inbound text frames become
//! [`BusEvent::Message`]s and frames queued in the slot's outbox are written
//! out. The tasks never touch lane state; all of that happens in the main
//! loop, which talks to a slot through its [`SlotClient`].

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_net::tcp::{self, TcpReader, TcpSocket, TcpWriter};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use embedded_io_async::{Read, ReadExactError, Write};
use log::{debug, info, warn};
use pitcaller_core::app_state::{BusChannel, BusEvent, InboundText};
use pitcaller_core::broadcaster::{ClientId, ClientSink, MAX_CLIENTS, SendError};
use pitcaller_core::http::{self, HttpError, MAX_REQUEST_HEAD, Route};
use pitcaller_core::protocol::Frame;
use pitcaller_core::websocket::{
    self, ControlFrame, FrameHeader, MAX_HEADER_LEN, MAX_INBOUND_PAYLOAD, Opcode, WebSocketError,
};
use thiserror_no_std::Error;

pub const HTTP_PORT: u16 = 80;

/// Frames that may wait for one slow client before new ones are dropped
const OUTBOX_DEPTH: usize = 4;
const SOCKET_BUFFER_LEN: usize = 2048;

/// Abort a plain HTTP exchange that stalls for this long
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Push channel liveness: keepalive interval and the silence that closes the socket
const KEEP_ALIVE: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

type Outbox = Channel<CriticalSectionRawMutex, Frame, OUTBOX_DEPTH>;

/// Latest control frame the reader wants written; a newer ping replaces an unsent pong
type ControlReply = Signal<NoopRawMutex, ControlFrame>;

/// Transport events for the main loop
pub static BUS_EVENTS: BusChannel<SlotClient> = BusChannel::new();

static OUTBOXES: [Outbox; MAX_CLIENTS] = [const { Outbox::new() }; MAX_CLIENTS];
static SLOT_OPEN: [AtomicBool; MAX_CLIENTS] = [const { AtomicBool::new(false) }; MAX_CLIENTS];

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("TCP error: {0:?}")]
    Tcp(tcp::Error),
    #[error("HTTP error: {0}")]
    Http(HttpError),
    #[error("WebSocket error: {0}")]
    WebSocket(WebSocketError),
    #[error("peer closed the connection")]
    Closed,
}

impl From<tcp::Error> for ConnectionError {
    fn from(e: tcp::Error) -> Self {
        Self::Tcp(e)
    }
}

impl From<ReadExactError<tcp::Error>> for ConnectionError {
    fn from(e: ReadExactError<tcp::Error>) -> Self {
        match e {
            ReadExactError::UnexpectedEof => Self::Closed,
            ReadExactError::Other(e) => Self::Tcp(e),
        }
    }
}

impl From<HttpError> for ConnectionError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl From<WebSocketError> for ConnectionError {
    fn from(e: WebSocketError) -> Self {
        Self::WebSocket(e)
    }
}

/// The main loop's handle on a push-channel connection
#[derive(Debug)]
pub struct SlotClient {
    slot: ClientId,
}

impl ClientSink for SlotClient {
    fn id(&self) -> ClientId {
        self.slot
    }

    fn send_text(&mut self, frame: &str) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }
        let mut owned = Frame::new();
        owned.push_str(frame).map_err(|_| SendError::Full)?;
        OUTBOXES[usize::from(self.slot)]
            .try_send(owned)
            .map_err(|_| SendError::Full)
    }

    fn is_alive(&self) -> bool {
        SLOT_OPEN[usize::from(self.slot)].load(Ordering::Acquire)
    }
}

#[embassy_executor::task(pool_size = MAX_CLIENTS)]
pub async fn connection_task(stack: Stack<'static>, slot: ClientId) -> ! {
    let mut rx_buffer = [0u8; SOCKET_BUFFER_LEN];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_LEN];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(REQUEST_TIMEOUT));

        if let Err(e) = socket.accept(HTTP_PORT).await {
            warn!("Slot {} failed to accept: {:?}", slot, e);
            continue;
        }
        debug!("Slot {} accepted {:?}", slot, socket.remote_endpoint());

        match serve(&mut socket, slot).await {
            Ok(()) | Err(ConnectionError::Closed) => {}
            Err(e) => warn!("Slot {} connection failed: {}", slot, e),
        }

        socket.close();
        if let Err(e) = socket.flush().await {
            debug!("Slot {} flush on close failed: {:?}", slot, e);
        }
        socket.abort();
    }
}

/// Answer one HTTP request, staying on the connection if it upgrades
async fn serve(socket: &mut TcpSocket<'_>, slot: ClientId) -> Result<(), ConnectionError> {
    let mut buf = [0u8; MAX_REQUEST_HEAD];
    let len = read_head(socket, &mut buf).await?;
    let request = http::parse_request(&buf[..len])?;
    info!("Slot {}: {} {}", slot, request.method, request.path);

    let key = match http::route(&request) {
        Route::PushChannel { key } => key,
        route => {
            let (head, body) = http::response_for(&route);
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(body).await?;
            socket.flush().await?;
            return Ok(());
        }
    };

    socket
        .write_all(http::upgrade_response(&key).as_bytes())
        .await?;
    socket.flush().await?;
    push_channel(socket, slot).await
}

async fn read_head(socket: &mut TcpSocket<'_>, buf: &mut [u8]) -> Result<usize, ConnectionError> {
    let mut filled = 0;
    loop {
        if filled == buf.len() {
            return Err(HttpError::TooLarge.into());
        }
        let n = socket.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        filled += n;
        if let Some(len) = http::head_len(&buf[..filled]) {
            return Ok(len);
        }
    }
}

async fn push_channel(socket: &mut TcpSocket<'_>, slot: ClientId) -> Result<(), ConnectionError> {
    let index = usize::from(slot);
    let outbox = &OUTBOXES[index];
    // Frames left over from the slot's previous connection are stale
    while outbox.try_receive().is_ok() {}

    socket.set_timeout(Some(PUSH_TIMEOUT));
    socket.set_keep_alive(Some(KEEP_ALIVE));

    SLOT_OPEN[index].store(true, Ordering::Release);
    BUS_EVENTS.send(BusEvent::Connected(SlotClient { slot })).await;

    let replies = ControlReply::new();
    let (mut reader, mut writer) = socket.split();
    let result = match select(
        read_frames(&mut reader, slot, &replies),
        write_frames(&mut writer, outbox, &replies),
    )
    .await
    {
        Either::First(result) | Either::Second(result) => result,
    };

    SLOT_OPEN[index].store(false, Ordering::Release);
    BUS_EVENTS.send(BusEvent::Disconnected(slot)).await;

    if result.is_ok() {
        // Client asked to close; echo the close frame
        let mut header = [0u8; MAX_HEADER_LEN];
        let len = FrameHeader::server(Opcode::Close, 0).encode(&mut header);
        writer.write_all(&header[..len]).await?;
    }
    result
}

/// Forward inbound text frames to the main loop until the client closes
async fn read_frames(
    reader: &mut TcpReader<'_>,
    slot: ClientId,
    replies: &ControlReply,
) -> Result<(), ConnectionError> {
    let mut header = [0u8; MAX_HEADER_LEN];
    let mut payload = [0u8; MAX_INBOUND_PAYLOAD];

    loop {
        reader.read_exact(&mut header[..2]).await?;
        let header_len = FrameHeader::header_len(header[1]);
        reader.read_exact(&mut header[2..header_len]).await?;

        let frame = FrameHeader::decode(&header[..header_len])?;
        frame.validate_client_frame()?;

        // Bounded by MAX_INBOUND_PAYLOAD after validation
        let body = &mut payload[..frame.payload_len as usize];
        reader.read_exact(body).await?;
        frame.unmask(body);

        match frame.opcode {
            Opcode::Text => match core::str::from_utf8(body) {
                Ok(text) => {
                    let mut inbound = InboundText::new();
                    let _ = inbound.push_str(text);
                    BUS_EVENTS.send(BusEvent::Message(slot, inbound)).await;
                }
                Err(_) => warn!("Slot {} sent a text frame that is not UTF-8", slot),
            },
            Opcode::Close => return Ok(()),
            Opcode::Ping => replies.signal(websocket::pong_frame(body)?),
            other => debug!("Slot {} ignoring {:?} frame", slot, other),
        }
    }
}

/// Write queued frames and control replies until the connection fails
async fn write_frames(
    writer: &mut TcpWriter<'_>,
    outbox: &Outbox,
    replies: &ControlReply,
) -> Result<(), ConnectionError> {
    let mut header = [0u8; MAX_HEADER_LEN];
    loop {
        match select(outbox.receive(), replies.wait()).await {
            Either::First(frame) => {
                let len = FrameHeader::server(Opcode::Text, frame.len()).encode(&mut header);
                writer.write_all(&header[..len]).await?;
                writer.write_all(frame.as_bytes()).await?;
            }
            Either::Second(control) => writer.write_all(&control).await?,
        }
        writer.flush().await?;
    }
}
