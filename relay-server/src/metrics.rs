//! Metrics tracking for the relay server

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Connection,
    Room,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Connection => "CONN",
            LogLevel::Room => "ROOM",
        }
    }
}

/// Server metrics
pub struct Metrics {
    /// Server start time
    pub start_time: DateTime<Local>,

    /// Address we listen on
    pub bind_addr: Option<SocketAddr>,

    /// Rooms held by the hub
    pub live_rooms: usize,

    /// Current number of open connections
    pub connected_clients: usize,

    /// Total connections since start
    pub total_connections: u64,

    /// Peak simultaneous connections
    pub peak_connections: usize,

    /// Frames received / sent
    pub frames_in: u64,
    pub frames_out: u64,

    /// Bytes received / sent, including length prefixes
    pub bytes_in: u64,
    pub bytes_out: u64,

    /// Room events pushed to clients
    pub events_relayed: u64,

    /// Open connections
    pub clients: Vec<ClientInfo>,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    /// Server status
    pub status: ServerStatus,
}

#[derive(Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub connected_at: DateTime<Local>,
}

#[derive(Clone, Copy, PartialEq)]
pub enum ServerStatus {
    Starting,
    Running,
    Error,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            bind_addr: None,
            live_rooms: 0,
            connected_clients: 0,
            total_connections: 0,
            peak_connections: 0,
            frames_in: 0,
            frames_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            events_relayed: 0,
            clients: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: ServerStatus::Starting,
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    pub fn connection_opened(&mut self, addr: SocketAddr) {
        if self.clients.iter().any(|c| c.addr == addr) {
            return;
        }

        self.connected_clients += 1;
        self.total_connections += 1;
        if self.connected_clients > self.peak_connections {
            self.peak_connections = self.connected_clients;
        }

        self.clients.push(ClientInfo {
            addr,
            user_id: None,
            room_id: None,
            connected_at: Local::now(),
        });
        self.log(LogLevel::Connection, format!("Connected: {}", addr));
    }

    /// Record a disconnection (only if the connection was tracked)
    pub fn connection_closed(&mut self, addr: SocketAddr) {
        let Some(client) = self.clients.iter().find(|c| c.addr == addr) else {
            return;
        };
        let who = client
            .user_id
            .as_deref()
            .map(short_id)
            .unwrap_or_else(|| addr.to_string());

        self.connected_clients = self.connected_clients.saturating_sub(1);
        self.clients.retain(|c| c.addr != addr);
        self.log(LogLevel::Connection, format!("Disconnected: {}", who));
    }

    pub fn client_identified(&mut self, addr: SocketAddr, user_id: &str) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.addr == addr) {
            client.user_id = Some(user_id.to_string());
        }
        self.log(LogLevel::Info, format!("Hello from {} ({})", short_id(user_id), addr));
    }

    pub fn client_joined(&mut self, addr: SocketAddr, room_id: &str) {
        let who = match self.clients.iter_mut().find(|c| c.addr == addr) {
            Some(client) => {
                client.room_id = Some(room_id.to_string());
                client.user_id.as_deref().map(short_id)
            }
            None => None,
        };
        let who = who.unwrap_or_else(|| addr.to_string());
        self.log(LogLevel::Room, format!("{} joined {}", who, room_id));
    }

    pub fn client_left_room(&mut self, addr: SocketAddr) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.addr == addr) {
            client.room_id = None;
        }
    }

    pub fn frame_received(&mut self, bytes: usize) {
        self.frames_in += 1;
        self.bytes_in += bytes as u64;
    }

    pub fn frame_sent(&mut self, bytes: usize) {
        self.frames_out += 1;
        self.bytes_out += bytes as u64;
    }

    pub fn event_relayed(&mut self) {
        self.events_relayed += 1;
    }

    pub fn uptime(&self) -> String {
        format_uptime(Local::now().signed_duration_since(self.start_time).num_seconds())
    }
}

fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, s) => format!("{}m {}s", m, s),
        (h, m, _) => format!("{}h {}m", h, m),
    }
}

/// Shorten long user ids for display (first and last few chars)
pub fn short_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 16 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_connection_counts() {
        let mut m = Metrics::new();
        m.connection_opened(addr(1));
        m.connection_opened(addr(2));
        m.connection_opened(addr(2));
        assert_eq!(m.connected_clients, 2);
        assert_eq!(m.total_connections, 2);

        m.connection_closed(addr(1));
        m.connection_closed(addr(1));
        assert_eq!(m.connected_clients, 1);
        assert_eq!(m.peak_connections, 2);

        m.connection_opened(addr(3));
        assert_eq!(m.total_connections, 3);
        assert_eq!(m.peak_connections, 2);
    }

    #[test]
    fn test_client_room_tracking() {
        let mut m = Metrics::new();
        m.connection_opened(addr(1));
        m.client_identified(addr(1), "alice");
        m.client_joined(addr(1), "ABCD-EFGH");
        assert_eq!(m.clients[0].user_id.as_deref(), Some("alice"));
        assert_eq!(m.clients[0].room_id.as_deref(), Some("ABCD-EFGH"));

        m.client_left_room(addr(1));
        assert!(m.clients[0].room_id.is_none());
        assert!(m.logs.back().unwrap().message.contains("alice joined"));
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let mut m = Metrics::new();
        for i in 0..(MAX_LOG_ENTRIES + 25) {
            m.log(LogLevel::Info, format!("line {}", i));
        }
        assert_eq!(m.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(m.logs.front().unwrap().message, "line 25");
    }

    #[test]
    fn test_traffic_counters() {
        let mut m = Metrics::new();
        m.frame_received(40);
        m.frame_sent(100);
        m.frame_sent(20);
        m.event_relayed();
        assert_eq!((m.frames_in, m.bytes_in), (1, 40));
        assert_eq!((m.frames_out, m.bytes_out), (2, 120));
        assert_eq!(m.events_relayed, 1);
    }

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3 * 3600 + 61), "3h 1m");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("alice"), "alice");
        assert_eq!(short_id("0123456789abcdefXYZW"), "01234567...XYZW");
    }
}
