//! Interactive console on stdin.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use grrrr_core::message::ChatMessage;
use grrrr_services::{DeliveryOutcome, DeliveryReport, PeerCache, RequestOutcome, TransferNode};

use crate::chat::{self, ChatContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Send { to: String, text: String },
    Broadcast { text: String },
    History,
    Style(String),
    Detail(String),
    Download(String),
    Exit,
}

/// Split a line into words, `"quoted text"` and `[bracketed]` arguments.
/// Quotes and brackets are kept on the token.
fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = line.trim_start();
    while !rest.is_empty() {
        let close = match rest.as_bytes()[0] {
            b'"' => rest[1..].find('"').map(|i| i + 2),
            b'[' => rest[1..].find(']').map(|i| i + 2),
            _ => None,
        };
        let end = close.unwrap_or_else(|| rest.find(char::is_whitespace).unwrap_or(rest.len()));
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    tokens
}

fn unwrap_arg(token: &str) -> String {
    let inner = token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .or_else(|| token.strip_prefix('"').and_then(|t| t.strip_suffix('"')));
    inner.unwrap_or(token).to_string()
}

/// Parse one console line. `None` means the command or its arguments are
/// not recognised.
pub fn parse(line: &str) -> Option<Command> {
    let tokens = tokenize(line);
    let (&name, args) = tokens.split_first()?;
    let cmd = match (name, args) {
        ("help", []) => Command::Help,
        ("list", []) => Command::List,
        ("send", [to, text]) => Command::Send {
            to: unwrap_arg(to),
            text: unwrap_arg(text),
        },
        ("broadcast", [text]) => Command::Broadcast {
            text: unwrap_arg(text),
        },
        ("history", []) => Command::History,
        ("style", [prompt]) => Command::Style(unwrap_arg(prompt)),
        ("detail", [user]) => Command::Detail(unwrap_arg(user)),
        ("download", [user]) => Command::Download(unwrap_arg(user)),
        ("exit", []) => Command::Exit,
        _ => return None,
    };
    Some(cmd)
}

/// Name of the cached peer whose datagram address is `addr`.
fn peer_name(peers: &PeerCache, addr: std::net::SocketAddr) -> Option<String> {
    peers
        .all()
        .into_iter()
        .find(|r| r.datagram_addr().is_ok_and(|a| a == addr))
        .map(|r| r.name)
}

fn delivery_line(report: &DeliveryReport, name: Option<&str>) -> String {
    let who = match name {
        Some(n) => n.to_string(),
        None => report.peer.to_string(),
    };
    match report.outcome {
        DeliveryOutcome::Delivered => {
            format!("[System] history data has been successfully delivered to {who}.")
        }
        DeliveryOutcome::Failed => format!("[System] failed to send history data to {who}."),
    }
}

/// Print the outcome of every history transfer this node sends.
pub async fn report_deliveries(mut reports: broadcast::Receiver<DeliveryReport>, peers: PeerCache) {
    loop {
        match reports.recv().await {
            Ok(report) => {
                let name = peer_name(&peers, report.peer);
                println!("{}", delivery_line(&report, name.as_deref()));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "delivery reports lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

pub struct Console {
    node: TransferNode,
    chat: ChatContext,
    shutdown: broadcast::Sender<()>,
    prompt: String,
}

impl Console {
    pub fn new(node: TransferNode, chat: ChatContext, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            node,
            chat,
            shutdown,
            prompt: ">> ".to_string(),
        }
    }

    /// Read commands until `exit` or end of input.
    pub async fn run(mut self) -> Result<()> {
        println!("**************************************");
        println!("*   Welcome to Grrrr!                *");
        println!("*   Enter command or type \"help\".    *");
        println!("**************************************");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}", self.prompt);
            let _ = std::io::stdout().flush();

            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse(&line) {
                Some(Command::Exit) => break,
                Some(cmd) => self.execute(cmd),
                None => println!("[System] Invalid command, try \"help\"."),
            }
        }

        println!("[System] Closing...");
        let _ = self.shutdown.send(());
        Ok(())
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Help => {
                println!("[System] All commands:");
                println!("(1) help");
                println!("(2) list");
                println!("(3) send [username] \"message\"");
                println!("(4) broadcast \"message\"");
                println!("(5) history");
                println!("(6) style content");
                println!("(7) detail [username]");
                println!("(8) download [username]");
                println!("(9) exit");
                println!("* message example: send [csung4] \"hello!\"");
            }
            Command::List => match self.refresh_peers() {
                Ok(names) => {
                    let list: Vec<String> = names.iter().map(|n| format!("[{n}]")).collect();
                    println!("[System] Nodes in group:");
                    println!("{}", list.join(", "));
                }
                Err(e) => println!("[System] cannot reach directory: {e}"),
            },
            Command::Send { to, text } => {
                let message = ChatMessage::new(&self.chat.own_name, text, false);
                let peers = self.chat.peers.clone();
                tokio::spawn(async move {
                    chat::deliver(&peers, &to, &message).await;
                });
            }
            Command::Broadcast { text } => {
                let message = ChatMessage::new(&self.chat.own_name, text, true);
                self.chat.history.add(message.clone());
                let peers = self.chat.peers.clone();
                tokio::spawn(async move {
                    chat::broadcast_message(&peers, &message).await;
                });
            }
            Command::History => {
                println!("[System] Broadcast history:");
                for m in self.node.current_history().messages {
                    println!("{}: {}", m.from, m.text);
                }
            }
            Command::Style(prompt) => {
                self.prompt = format!("{prompt} ");
                println!("[System] Style has been changed.");
            }
            Command::Detail(user) => match self.chat.peers.get(&user) {
                Some(r) => println!(
                    "[System] {user} is listening on {}:{} (history on {})",
                    r.host, r.stream_port, r.datagram_port
                ),
                None => println!("[System] {user} is no longer there."),
            },
            Command::Download(user) => self.download(user),
            Command::Exit => {}
        }
    }

    fn refresh_peers(&self) -> Result<Vec<String>> {
        Ok(self
            .chat
            .peers
            .refresh(self.chat.directory.as_ref(), &self.chat.own_name)?)
    }

    fn download(&self, user: String) {
        if self.chat.peers.get(&user).is_none() {
            let _ = self.refresh_peers();
        }
        let addr = match self.chat.peers.get(&user).map(|r| r.datagram_addr()) {
            Some(Ok(addr)) => addr,
            Some(Err(e)) => {
                println!("[System] cannot reach {user}: {e}");
                return;
            }
            None => {
                println!("[System] {user} is no longer there.");
                return;
            }
        };

        println!("[System] downloading history from {user}...");
        let node = self.node.clone();
        tokio::spawn(async move {
            match node.request_history(addr).await {
                RequestOutcome::Installed(n) => {
                    println!("[System] history from {user} installed ({n} messages).")
                }
                RequestOutcome::AlreadyInProgress => {
                    println!("[System] already downloading from {user}.")
                }
                RequestOutcome::TimedOut => {
                    println!("[System] waited too long for {user}, download aborted.")
                }
                RequestOutcome::Corrupt => {
                    println!("[System] history from {user} was corrupt, download failed.")
                }
            }
        });
    }
}
