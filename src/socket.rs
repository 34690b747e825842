//! Blocking WebSocket listener shared by the relay and alert sockets.
//!
//! A listener owns one socket on its own thread. There is no reconnect: a
//! dropped socket stops deliveries until the session is restarted. Teardown
//! is signalled through the `CancelToken`; the read timeout bounds how long
//! the thread takes to notice.

use anyhow::{anyhow, Result};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::cancel::CancelToken;

const READ_TIMEOUT: Duration = Duration::from_millis(250);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Strip the query (which carries the token) before a URL reaches the logs.
pub fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn connect(url: &str) -> Result<Socket> {
    let (mut socket, _response) = tungstenite::connect(url)
        .map_err(|e| anyhow!("connect {}: {}", redact_url(url), e))?;
    let stream = match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => Some(&*stream),
        MaybeTlsStream::Rustls(stream) => Some(&stream.sock),
        _ => None,
    };
    match stream {
        Some(stream) => stream.set_read_timeout(Some(READ_TIMEOUT))?,
        None => log::warn!(
            "socket {} has no read timeout; teardown waits for the next message",
            redact_url(url)
        ),
    }
    Ok(socket)
}

/// Read messages until the socket closes or the token is cancelled.
///
/// Text and UTF-8 binary payloads are handed to `on_text`; control frames
/// are ignored.
pub fn listen<F>(name: &str, url: &str, cancel: &CancelToken, mut on_text: F) -> Result<()>
where
    F: FnMut(&str),
{
    let mut socket = connect(url)?;
    log::info!("{} socket connected to {}", name, redact_url(url));
    loop {
        if cancel.is_cancelled() {
            if let Err(err) = socket.close(None).and_then(|_| socket.flush()) {
                log::debug!("{} socket close: {}", name, err);
            }
            log::info!("{} socket closed on teardown", name);
            return Ok(());
        }
        match socket.read() {
            Ok(Message::Text(text)) => on_text(text.as_str()),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => on_text(text),
                Err(_) => log::debug!("{} socket: ignoring non-utf8 binary message", name),
            },
            Ok(Message::Close(frame)) => {
                log::warn!("{} socket closed by server: {:?}", name, frame);
                return Ok(());
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                log::warn!("{} socket connection closed", name);
                return Ok(());
            }
            Err(err) => return Err(anyhow!("{} socket error: {}", name, err)),
        }
    }
}

/// Thread running one listener.
#[derive(Debug)]
pub struct ListenerHandle {
    name: &'static str,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the thread; the caller cancels the token first.
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} listener thread panicked", self.name))?;
        }
        Ok(())
    }
}

pub fn spawn_listener<F>(
    name: &'static str,
    url: String,
    cancel: CancelToken,
    on_text: F,
) -> Result<ListenerHandle>
where
    F: FnMut(&str) + Send + 'static,
{
    let join = std::thread::Builder::new()
        .name(format!("{}-socket", name))
        .spawn(move || {
            if let Err(err) = listen(name, &url, &cancel, on_text) {
                log::warn!("{} listener stopped: {:#}", name, err);
            }
        })?;
    Ok(ListenerHandle {
        name,
        join: Some(join),
    })
}
