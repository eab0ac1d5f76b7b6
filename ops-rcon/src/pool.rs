use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ops_api::{is_command_safe, Error, Result};
use ops_core::{RconPoolT, ServerProfile};
use tokio::sync::Mutex;

use crate::connection::RconConnection;

const LIST_PLAYERS_TTL: Duration = Duration::from_millis(500);
const SAFE_COMMAND_RETRIES: u32 = 3;

struct CachedList {
    body: String,
    fetched_at: Instant,
}

struct ServerHandle {
    conn: RconConnection,
    cached_list: Mutex<Option<CachedList>>,
}

/// One connection per server, using an `Arc<Mutex<HashMap<String, Handle>>>`
/// supervised-map pattern. Each server gets its own [`RconConnection`], so a
/// retry storm on one server never blocks commands to another.
pub struct RconPool {
    servers: HashMap<String, Arc<ServerHandle>>,
}

impl RconPool {
    pub fn new(profiles: &[ServerProfile]) -> Self {
        let servers = profiles
            .iter()
            .map(|p| {
                let handle = ServerHandle {
                    conn: RconConnection::new(format!("{}:{}", p.rcon_ip, p.rcon_port), p.rcon_password.clone()),
                    cached_list: Mutex::new(None),
                };
                (p.name.clone(), Arc::new(handle))
            })
            .collect();
        Self { servers }
    }

    fn handle(&self, server: &str) -> Result<&Arc<ServerHandle>> {
        self.servers
            .get(server)
            .ok_or_else(|| Error::Config(format!("unknown server: {server}")))
    }

    async fn list_players_inner(&self, server: &str, cache_ok: bool) -> Result<String> {
        let handle = self.handle(server)?;
        if cache_ok {
            let cached = handle.cached_list.lock().await;
            if let Some(c) = cached.as_ref() {
                if c.fetched_at.elapsed() < LIST_PLAYERS_TTL {
                    return Ok(c.body.clone());
                }
            }
        }
        let body = handle.conn.send("ListPlayers", 3).await?;
        let mut cached = handle.cached_list.lock().await;
        *cached = Some(CachedList {
            body: body.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body)
    }

    /// Parse a `ListPlayers` response: header line, then pipe-delimited
    /// rows `session_idx | char_name | ... | platform_id`. Tolerant of
    /// leading whitespace and empty lines.
    fn find_session_index(body: &str, char_name: &str) -> Option<u32> {
        for line in body.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('|').map(|f| f.trim());
            let idx = fields.next()?;
            let name = fields.next()?;
            if name == char_name {
                return idx.parse().ok();
            }
        }
        None
    }

    async fn resolve_index(&self, server: &str, char_name: &str, cache_ok: bool) -> Result<u32> {
        let body = self.list_players_inner(server, cache_ok).await?;
        Self::find_session_index(&body, char_name).ok_or(Error::PlayerNotOnline)
    }
}

#[async_trait]
impl RconPoolT for RconPool {
    async fn raw(&self, server: &str, cmd: &str, retries: u32) -> Result<String> {
        let handle = self.handle(server)?;
        handle.conn.send(cmd, retries).await
    }

    async fn list_players(&self, server: &str, cache_ok: bool) -> Result<String> {
        self.list_players_inner(server, cache_ok).await
    }

    async fn safe(
        &self,
        server: &str,
        char_name: &str,
        cmd_template: &(dyn Fn(u32) -> String + Send + Sync),
    ) -> Result<String> {
        let handle = self.handle(server)?;
        let mut last_err = None;
        for attempt in 0..SAFE_COMMAND_RETRIES {
            let index = match self.resolve_index(server, char_name, attempt == 0).await {
                Ok(i) => i,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            let rendered = cmd_template(index);
            if !is_command_safe(&rendered) {
                return Err(Error::SanitizationRejected);
            }
            match handle.conn.send(&rendered, 0).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(Error::PlayerNotOnline))
    }

    async fn safe_batch(
        &self,
        server: &str,
        char_name: &str,
        cmd_templates: &[Box<dyn Fn(u32) -> String + Send + Sync>],
    ) -> Result<Vec<String>> {
        let handle = self.handle(server)?;
        let mut last_err = None;
        for attempt in 0..SAFE_COMMAND_RETRIES {
            let index = match self.resolve_index(server, char_name, attempt == 0).await {
                Ok(i) => i,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            let rendered: Vec<String> = cmd_templates.iter().map(|t| t(index)).collect();
            if rendered.iter().any(|c| !is_command_safe(c)) {
                return Err(Error::SanitizationRejected);
            }

            let mut responses = Vec::with_capacity(rendered.len());
            let mut batch_failed = false;
            for cmd in &rendered {
                match handle.conn.send(cmd, 0).await {
                    Ok(resp) => responses.push(resp),
                    Err(e) => {
                        last_err = Some(e);
                        batch_failed = true;
                        break;
                    }
                }
            }
            if !batch_failed {
                return Ok(responses);
            }
        }
        Err(last_err.unwrap_or(Error::PlayerNotOnline))
    }
}
