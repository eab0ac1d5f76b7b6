//! A single server's RCON socket: a lazily-(re)connected [`TcpStream`]
//! behind a mutex, with a bounded reconnect-and-retry loop around every
//! request.

use ops_api::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

use crate::wire;

pub struct RconConnection {
    addr: String,
    password: String,
    stream: Mutex<Option<TcpStream>>,
}

impl RconConnection {
    pub fn new(addr: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: password.into(),
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::TransientTransport(e.to_string()))?;
        wire::auth(&mut stream, &self.password).await?;
        Ok(stream)
    }

    /// Submit `cmd` with zero *internal* retries against the held socket;
    /// a transport error tears the socket down so the next call reconnects.
    /// The caller (the pool's `raw`, or `safe`'s outer loop) owns whatever
    /// retrying across requests is appropriate for that call.
    async fn try_once(&self, guard: &mut Option<TcpStream>, cmd: &str) -> Result<String> {
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().unwrap();
        match wire::exec(stream, cmd).await {
            Ok(body) => Ok(body),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    /// Send `cmd`, reconnecting and retrying up to `max_retries` times on
    /// transport failure. Holds the per-server lock for the whole attempt,
    /// which is the mutual exclusion required by the safe-command protocol.
    pub async fn send(&self, cmd: &str, retries: u32) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let attempts = retries + 1;
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.try_once(&mut guard, cmd).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(server = %self.addr, attempt, "rcon request failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(Error::TransientTransport("rcon exhausted retries".into())))
    }
}
