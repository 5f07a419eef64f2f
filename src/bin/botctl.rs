//! botctl - remote control CLI for a running murkbot.
//!
//! Talks to the bot's RPC socket: either subscribing to a watch stream of
//! IRC traffic or injecting a single message into a network.

use std::path::PathBuf;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use murkbot::bot::proto::{method, Direction, IrcEvent, SendToRequest, SendToResponse, WatchRequest};
use murkbot::error::RpcError;
use murkbot::net::Connector;
use murkbot::rpc::{encode, CallHandle, Handler, RpcClient, Typed};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "botctl", about = "Remote control for a running murkbot")]
struct Args {
    /// Path to the bot's RPC socket.
    #[arg(short, long, default_value = "/run/murkbot/control.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Stream IRC traffic for the given networks (all when none given).
    Watch {
        /// Networks to watch.
        nets: Vec<String>,
    },
    /// Inject one message into a network.
    Send {
        /// Target network name.
        net: String,
        /// IRC command.
        command: String,
        /// Command arguments.
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = RpcClient::new(Connector::new().unix(&args.socket));

    match args.command {
        Cmd::Watch { nets } => watch(client, nets).await,
        Cmd::Send { net, command, args } => send(client, net, command, args).await,
    }
}

struct WatchPrinter {
    done: mpsc::UnboundedSender<Option<String>>,
}

#[async_trait]
impl Handler<IrcEvent> for WatchPrinter {
    async fn message(&mut self, _call: &CallHandle, event: &IrcEvent) {
        let mut line = String::new();
        if !event.prefix.is_empty() {
            line.push(':');
            line.push_str(&event.prefix);
            line.push(' ');
        }
        line.push_str(&event.command);
        for arg in &event.args {
            line.push(' ');
            line.push_str(arg);
        }
        let arrow = if event.direction() == Direction::Sent {
            '>'
        } else {
            '<'
        };
        println!("{arrow} [{}] {line}", event.net);
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        let _ = self.done.send(error.map(ToString::to_string));
    }
}

async fn watch(client: RpcClient, nets: Vec<String>) -> anyhow::Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let request = WatchRequest { nets };
    let call = client.call(
        method::WATCH,
        Typed::endpoint(WatchPrinter { done: done_tx }),
        Some(encode(&request)),
    );

    tokio::select! {
        closed = done_rx.recv() => {
            if let Some(Some(error)) = closed {
                anyhow::bail!("watch: {error}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            call.close(None, true);
            let _ = done_rx.recv().await;
        }
    }
    Ok(())
}

struct SendAck {
    done: mpsc::UnboundedSender<Result<bool, String>>,
}

#[async_trait]
impl Handler<SendToResponse> for SendAck {
    async fn message(&mut self, call: &CallHandle, resp: &SendToResponse) {
        let _ = self.done.send(Ok(resp.ok));
        call.close(None, true);
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        if let Some(error) = error {
            let _ = self.done.send(Err(error.to_string()));
        }
    }
}

async fn send(
    client: RpcClient,
    net: String,
    command: String,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let request = SendToRequest {
        net,
        event: Some(IrcEvent {
            command,
            args,
            ..Default::default()
        }),
    };
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let _call = client.call(
        method::SEND_TO,
        Typed::endpoint(SendAck { done: done_tx }),
        Some(encode(&request)),
    );

    match done_rx.recv().await {
        Some(Ok(true)) => {
            println!("message sent");
            Ok(())
        }
        Some(Ok(false)) => anyhow::bail!("send: no such network"),
        Some(Err(error)) => anyhow::bail!("send: {error}"),
        None => anyhow::bail!("send: call ended without a response"),
    }
}
