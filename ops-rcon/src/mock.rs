//! An in-memory stand-in for [`RconPoolT`]. Lets `ops-marketplace`,
//! `ops-router`, and `ops-status` drive the safe-command protocol in tests
//! without a socket.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ops_api::{is_command_safe, Error, Result};
use ops_core::RconPoolT;

#[derive(Default)]
struct ServerState {
    online: Vec<(u32, String)>,
    commands: Vec<String>,
    fail_next: u32,
}

/// A scripted RCON stand-in. Tests seed `set_online` and can make the next
/// `N` submitted commands fail to exercise `safe`'s loop-retry.
pub struct DummyRcon {
    servers: Mutex<HashMap<String, ServerState>>,
}

impl Default for DummyRcon {
    fn default() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
        }
    }
}

impl DummyRcon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, server: &str, roster: Vec<(u32, String)>) {
        let mut servers = self.servers.lock().unwrap();
        servers.entry(server.to_string()).or_default().online = roster;
    }

    pub fn fail_next(&self, server: &str, times: u32) {
        let mut servers = self.servers.lock().unwrap();
        servers.entry(server.to_string()).or_default().fail_next = times;
    }

    pub fn commands_sent(&self, server: &str) -> Vec<String> {
        self.servers
            .lock()
            .unwrap()
            .get(server)
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    fn render_list(roster: &[(u32, String)]) -> String {
        let mut out = String::from("idx|name|a|b|platform\n");
        for (idx, name) in roster {
            out.push_str(&format!("{idx}|{name}|-|-|steam:{name}\n"));
        }
        out
    }
}

#[async_trait]
impl RconPoolT for DummyRcon {
    async fn raw(&self, server: &str, cmd: &str, _retries: u32) -> Result<String> {
        let mut servers = self.servers.lock().unwrap();
        let state = servers.entry(server.to_string()).or_default();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::TransientTransport("dummy rcon induced failure".into()));
        }
        state.commands.push(cmd.to_string());
        Ok(String::new())
    }

    async fn list_players(&self, server: &str, _cache_ok: bool) -> Result<String> {
        let servers = self.servers.lock().unwrap();
        Ok(Self::render_list(
            &servers.get(server).map(|s| s.online.clone()).unwrap_or_default(),
        ))
    }

    async fn safe(
        &self,
        server: &str,
        char_name: &str,
        cmd_template: &(dyn Fn(u32) -> String + Send + Sync),
    ) -> Result<String> {
        let index = {
            let servers = self.servers.lock().unwrap();
            servers
                .get(server)
                .and_then(|s| s.online.iter().find(|(_, n)| n == char_name).map(|(i, _)| *i))
                .ok_or(Error::PlayerNotOnline)?
        };
        let rendered = cmd_template(index);
        if !is_command_safe(&rendered) {
            return Err(Error::SanitizationRejected);
        }
        self.raw(server, &rendered, 0).await
    }

    async fn safe_batch(
        &self,
        server: &str,
        char_name: &str,
        cmd_templates: &[Box<dyn Fn(u32) -> String + Send + Sync>],
    ) -> Result<Vec<String>> {
        let index = {
            let servers = self.servers.lock().unwrap();
            servers
                .get(server)
                .and_then(|s| s.online.iter().find(|(_, n)| n == char_name).map(|(i, _)| *i))
                .ok_or(Error::PlayerNotOnline)?
        };
        let mut out = Vec::with_capacity(cmd_templates.len());
        for t in cmd_templates {
            let rendered = t(index);
            if !is_command_safe(&rendered) {
                return Err(Error::SanitizationRejected);
            }
            out.push(self.raw(server, &rendered, 0).await?);
        }
        Ok(out)
    }
}
