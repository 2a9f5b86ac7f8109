use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind: String,
    /// Directory every client path is confined to
    pub root: PathBuf,
    /// Sessions served at once; further connections wait for a free slot
    pub workers: usize,
    /// How long a session may sit without sending a frame
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            root: PathBuf::from("./files"),
            workers: DEFAULT_WORKERS,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
