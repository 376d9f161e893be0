//! IPC client implementation
//!
//! Used by bridges written in Rust and by the daemon's integration tests.

use curfew_api::{Command, Event, Request, Response, ResponseResult};
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to curfewd
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    /// Events that arrived while waiting for a response
    pending_events: VecDeque<Event>,
}

impl IpcClient {
    /// Connect to curfewd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    async fn read_line(&mut self) -> IpcResult<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        Ok(line)
    }

    /// Send a command and wait for its response.
    ///
    /// Events received in the meantime are queued for [`IpcClient::next_event`].
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            let line = self.read_line().await?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Ok(response) = serde_json::from_str::<Response>(line) {
                return Ok(response);
            }

            match serde_json::from_str::<Event>(line) {
                Ok(event) => self.pending_events.push_back(event),
                Err(_) => return Err(IpcError::InvalidMessage(line.to_string())),
            }
        }
    }

    /// Wait for the next event on a subscribed connection
    pub async fn next_event(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }

        let line = self.read_line().await?;
        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(EventStream {
            reader: self.reader,
            pending: self.pending_events,
        })
    }
}

/// Stream of events from curfewd
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    pending: VecDeque<Event>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }
}
