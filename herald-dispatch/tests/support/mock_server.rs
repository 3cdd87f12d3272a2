//! Mock SMTP server for dispatch tests.
//!
//! A configurable server that scripts replies per command (and per RCPT
//! address), records everything it receives for verification, and speaks
//! just enough of the protocol for the dispatcher: greeting, HELO, MAIL,
//! RCPT, DATA with dot-terminated content, QUIT.
#![allow(dead_code)] // Test utility module - not every helper is used in every test

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// A command received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Everything between the 354 and the terminating dot, verbatim.
    MessageContent(String),
    Quit,
    Other(String),
}

/// A scripted reply line.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub code: u16,
    pub message: String,
}

impl ScriptedReply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: ScriptedReply,
    helo: ScriptedReply,
    mail_from: ScriptedReply,
    rcpt_to: ScriptedReply,
    /// Per-address RCPT replies, keyed by the exact address received.
    rcpt_overrides: HashMap<String, ScriptedReply>,
    data: ScriptedReply,
    data_end: ScriptedReply,
    quit: ScriptedReply,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: ScriptedReply::new(220, "mock ESMTP ready"),
            helo: ScriptedReply::new(250, "mock hello"),
            mail_from: ScriptedReply::new(250, "OK"),
            rcpt_to: ScriptedReply::new(250, "OK"),
            rcpt_overrides: HashMap::new(),
            data: ScriptedReply::new(354, "end data with <CRLF>.<CRLF>"),
            data_end: ScriptedReply::new(250, "OK: queued"),
            quit: ScriptedReply::new(221, "bye"),
        }
    }
}

/// The running mock server.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::default()
    }

    /// Start a server answering 250/354 everywhere.
    pub async fn all_ok() -> std::io::Result<Self> {
        Self::builder().build().await
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Everything received so far, in order.
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// The RCPT addresses received so far, in order.
    pub async fn rcpt_addresses(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::RcptTo(addr) => Some(addr.clone()),
                _ => None,
            })
            .collect()
    }

    /// All recorded DATA contents, concatenated.
    pub async fn message_content(&self) -> String {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// How many times a command variant was received.
    pub async fn count(&self, matches: impl Fn(&SmtpCommand) -> bool) -> usize {
        self.commands.read().await.iter().filter(|c| matches(c)).count()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();
            let read = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await;
            let Ok(Ok(bytes)) = read else {
                return Ok(()); // timeout or error: drop the connection
            };
            if bytes == 0 {
                return Ok(());
            }

            let cmd_line = line.trim_end_matches(['\r', '\n']);
            let mut parts = cmd_line.splitn(2, ' ');
            let word = parts.next().unwrap_or_default().to_uppercase();
            let arg = parts.next().unwrap_or_default();

            let (reply, command) = match word.as_str() {
                "HELO" => (
                    config.helo.clone(),
                    SmtpCommand::Helo(arg.to_string()),
                ),
                "MAIL" => {
                    let address = arg.strip_prefix("FROM:").unwrap_or(arg).to_string();
                    (config.mail_from.clone(), SmtpCommand::MailFrom(address))
                }
                "RCPT" => {
                    let address = arg.strip_prefix("TO:").unwrap_or(arg).to_string();
                    let reply = config
                        .rcpt_overrides
                        .get(&address)
                        .cloned()
                        .unwrap_or_else(|| config.rcpt_to.clone());
                    (reply, SmtpCommand::RcptTo(address))
                }
                "DATA" => (config.data.clone(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit.to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    ScriptedReply::new(500, "unknown command"),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
            };

            commands.write().await.push(command.clone());
            writer.write_all(&reply.to_bytes()).await?;
            writer.flush().await?;

            // After a 354 the client streams content until a lone dot.
            if command == SmtpCommand::Data && reply.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    let bytes = reader.read_line(&mut line).await?;
                    if bytes == 0 {
                        return Ok(());
                    }
                    if line.trim_end_matches(['\r', '\n']) == "." {
                        break;
                    }
                    content.push_str(&line);
                }
                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&config.data_end.to_bytes()).await?;
                writer.flush().await?;
            }
        }
    }
}

/// Builder for a [`MockSmtpServer`].
#[derive(Default)]
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = ScriptedReply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.helo = ScriptedReply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = ScriptedReply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = ScriptedReply::new(code, message);
        self
    }

    /// Script the RCPT reply for one exact address.
    #[must_use]
    pub fn with_rcpt_override(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rcpt_overrides
            .insert(address.into(), ScriptedReply::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data = ScriptedReply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = ScriptedReply::new(code, message);
        self
    }

    /// Bind to an ephemeral local port and start serving.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_config = Arc::clone(&config);
        let accept_commands = Arc::clone(&commands);
        let accept_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                if accept_shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let accepted = timeout(Duration::from_millis(100), listener.accept()).await;
                if let Ok(Ok((stream, _peer))) = accepted {
                    let config = Arc::clone(&accept_config);
                    let commands = Arc::clone(&accept_commands);
                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            shutdown,
        })
    }
}
