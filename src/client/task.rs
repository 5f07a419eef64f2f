//! The per-network connection task.
//!
//! One task owns the socket, the registration exchange, the flood-paced
//! write queue, and the channel state. It iterates the configured servers,
//! rotating to the next one after every loss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use murk_proto::flood::{CreditBucket, SendQueue};
use murk_proto::{LineCodec, Message};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::registration::Registrar;
use super::state::{normalize, ChannelStatus, SessionState, Shared};
use super::{Command, Event};
use crate::config::{NetworkConfig, ServerConfig};
use crate::error::NetError;
use crate::metrics;
use crate::net::{Connector, Stream};
use crate::runtime::Shutdown;

/// Wait after registration before autojoining, unless the end of the MOTD
/// arrives first.
const AUTOJOIN_DELAY: Duration = Duration::from_secs(10);

/// Period of nick regain attempts, aligned to the wall clock.
const NICK_REGAIN_PERIOD: Duration = Duration::from_secs(60);

pub(super) struct ConnectionTask {
    config: NetworkConfig,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<Event>,
    shutdown: Shutdown,
    current_server: usize,
}

impl ConnectionTask {
    pub(super) fn new(
        config: NetworkConfig,
        shared: Arc<Shared>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        events: broadcast::Sender<Event>,
        shutdown: Shutdown,
    ) -> ConnectionTask {
        ConnectionTask {
            config,
            shared,
            cmd_rx,
            events,
            shutdown,
            current_server: 0,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            if self.shutdown.is_triggered() {
                return;
            }

            let server = self.config.servers[self.current_server % self.config.servers.len()]
                .clone();
            match self.connect(&server).await {
                Ok(stream) => {
                    info!(net = %self.shared.net(), host = %server.host, port = server.port,
                          transport = stream.transport(), "connected");
                    let reason = Session::new(&mut self, &server, stream).run().await;
                    match reason {
                        SessionEnd::Shutdown => {
                            self.connection_down();
                            return;
                        }
                        SessionEnd::Lost(err) => {
                            warn!(net = %self.shared.net(), host = %server.host, error = %err,
                                  "connection lost - trying next server in {} ms",
                                  self.config.reconnect_delay_ms);
                        }
                    }
                }
                Err(err) => {
                    warn!(net = %self.shared.net(), host = %server.host, error = %err,
                          "connection failed - trying next server in {} ms",
                          self.config.reconnect_delay_ms);
                }
            }

            self.connection_down();
            self.current_server = (self.current_server + 1) % self.config.servers.len();

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = self.shutdown.wait() => return,
            }
        }
    }

    async fn connect(&self, server: &ServerConfig) -> Result<Stream, NetError> {
        let mut connector = Connector::new()
            .host(server.host.clone(), server.port)
            .resolve_timeout(self.config.resolve_timeout())
            .connect_timeout(self.config.connect_timeout());

        if let Some(tls) = &server.tls {
            connector = connector.tls(true);
            if let Some(cert) = &tls.client_cert {
                connector = connector.client_cert(cert);
            }
            if let Some(key) = &tls.client_key {
                connector = connector.client_key(key);
            }
        }

        tokio::select! {
            result = connector.connect() => result,
            _ = self.shutdown.wait() => Err(NetError::Config("shutting down".into())),
        }
    }

    /// Publishes the loss, resets tracked state, and zeroes the gauges.
    fn connection_down(&mut self) {
        let net = self.shared.net().to_owned();
        for chan in self.shared.reset_channels() {
            let _ = self.events.send(Event::ChannelLeft(chan));
        }
        let _ = self.events.send(Event::Lost);
        self.shared.set_nick(&self.config.nick);

        metrics::CONNECTION_UP.with_label_values(&[&net]).set(0);
        metrics::WRITE_QUEUE_BYTES.with_label_values(&[&net]).set(0);
    }
}

enum SessionEnd {
    Lost(NetError),
    Shutdown,
}

/// One established connection, from socket-open to loss.
struct Session<'t> {
    task: &'t mut ConnectionTask,
    reader: FramedRead<ReadHalf<Stream>, LineCodec>,
    writer: WriteHalf<Stream>,
    registrar: Registrar,
    state: SessionState,
    sendq: SendQueue,
    bucket: CreditBucket,
    /// Armed while waiting out the autojoin delay.
    autojoin_at: Option<Instant>,
    /// Armed while the write queue waits for credit.
    flush_at: Option<Instant>,
    /// Set when the configured nick needs periodic regain attempts.
    regain_nick: bool,
}

impl<'t> Session<'t> {
    fn new(task: &'t mut ConnectionTask, server: &ServerConfig, stream: Stream) -> Session<'t> {
        let registrar = Registrar::new(&task.config, server.password.as_deref());
        let (read_half, writer) = tokio::io::split(stream);
        Session {
            task,
            reader: FramedRead::new(read_half, LineCodec),
            writer,
            registrar,
            state: SessionState::Connecting,
            sendq: SendQueue::new(),
            bucket: CreditBucket::new(Instant::now()),
            autojoin_at: None,
            flush_at: None,
            regain_nick: false,
        }
    }

    async fn run(mut self) -> SessionEnd {
        let net = self.task.shared.net().to_owned();
        metrics::CONNECTION_UP.with_label_values(&[&net]).set(1);

        for msg in self.registrar.initial_burst() {
            self.queue(msg);
        }
        if let Err(err) = self.flush().await {
            return SessionEnd::Lost(err);
        }

        loop {
            let mut regain_tick = crate::runtime::wall_aligned_interval(NICK_REGAIN_PERIOD);
            tokio::select! {
                line = self.reader.next() => {
                    match line {
                        Some(Ok(line)) => {
                            metrics::RECEIVED_BYTES
                                .with_label_values(&[&net])
                                .inc_by(line.len() as u64 + 2);
                            match Message::parse(&line) {
                                Some(msg) => {
                                    metrics::RECEIVED_LINES.with_label_values(&[&net]).inc();
                                    if let Err(err) = self.handle_message(msg).await {
                                        return SessionEnd::Lost(err);
                                    }
                                }
                                None => {
                                    warn!(net = %net, "invalid IRC message");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let e = match e {
                                murk_proto::ProtocolError::Io(io) => io,
                                other => std::io::Error::other(other),
                            };
                            return SessionEnd::Lost(NetError::io("read", e));
                        }
                        None => {
                            return SessionEnd::Lost(NetError::io(
                                "read",
                                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "end of stream"),
                            ));
                        }
                    }
                }

                cmd = self.task.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send(msg)) => {
                            // public sends only flow on a ready connection
                            if self.state == SessionState::Ready {
                                self.send_traced(msg);
                            } else {
                                debug!(net = %net, "dropping message sent while not ready");
                            }
                        }
                        None => {
                            // handle dropped; nothing left to do
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                _ = sleep_until_opt(self.autojoin_at), if self.autojoin_at.is_some() => {
                    self.autojoin();
                }

                _ = sleep_until_opt(self.flush_at), if self.flush_at.is_some() => {
                    // fall through to the flush below
                }

                _ = regain_tick.tick(), if self.regain_nick && self.state != SessionState::Connecting => {
                    self.queue(Message::cmd("NICK").arg(self.registrar.configured_nick().to_owned()));
                }

                _ = self.task.shutdown.wait() => {
                    // best effort goodbye; the socket drops either way
                    self.queue(Message::cmd("QUIT").arg("shutting down"));
                    let _ = self.flush().await;
                    return SessionEnd::Shutdown;
                }
            }

            if let Err(err) = self.flush().await {
                return SessionEnd::Lost(err);
            }
        }
    }

    /// Serialises a message into the paced queue.
    fn queue(&mut self, msg: Message) {
        self.sendq.push(&msg);
        metrics::WRITE_QUEUE_BYTES
            .with_label_values(&[self.task.shared.net()])
            .set(self.sendq.queued_bytes() as i64);
    }

    /// Queues a message and publishes it to subscribers as sent.
    fn send_traced(&mut self, msg: Message) {
        self.queue(msg.clone());
        let _ = self.task.events.send(Event::MessageSent(msg));
    }

    /// Pushes the affordable prefix of the write queue onto the socket and
    /// re-arms the credit timer for whatever remains.
    async fn flush(&mut self) -> Result<(), NetError> {
        self.flush_at = None;
        if self.sendq.is_empty() {
            return Ok(());
        }

        self.bucket.refill(Instant::now());
        let can = self.sendq.affordable(self.bucket.credit());

        if can > 0 {
            let messages_before = self.sendq.queued_messages();
            {
                let (head, tail) = self.sendq.front(can);
                self.writer
                    .write_all(head)
                    .await
                    .map_err(|e| NetError::io("write", e))?;
                if let Some(tail) = tail {
                    self.writer
                        .write_all(tail)
                        .await
                        .map_err(|e| NetError::io("write", e))?;
                }
            }
            self.sendq.charge(can, &mut self.bucket);

            let net = self.task.shared.net();
            metrics::SENT_BYTES
                .with_label_values(&[net])
                .inc_by(can as u64);
            metrics::SENT_LINES
                .with_label_values(&[net])
                .inc_by((messages_before - self.sendq.queued_messages()) as u64);
            metrics::WRITE_QUEUE_BYTES
                .with_label_values(&[net])
                .set(self.sendq.queued_bytes() as i64);
        }

        // anything left is waiting for credit
        if let Some(debt) = self.sendq.debt(&self.bucket) {
            self.flush_at = Some(Instant::now() + debt);
        }
        Ok(())
    }

    async fn handle_message(&mut self, msg: Message) -> Result<(), NetError> {
        // PING is answered before subscribers see the message
        if msg.command_is("PING") {
            let token = match msg.args.first() {
                Some(token) if msg.args.len() == 1 => token.clone(),
                _ => self.task.shared.nick(),
            };
            self.queue(Message::cmd("PONG").arg(token));
            self.flush().await?;
        }

        let _ = self.task.events.send(Event::MessageReceived(msg.clone()));

        let outcome = self.registrar.handle(&msg);
        for reply in outcome.send {
            self.queue(reply);
        }
        if outcome.registered {
            self.on_registered();
        }
        if outcome.end_of_motd && self.state == SessionState::Registered {
            self.autojoin();
        }
        if let Some(nick) = outcome.nick_changed {
            self.task.shared.set_nick(&nick);
        }
        if outcome.regain_needed {
            self.regain_nick = true;
        }

        self.track(&msg);
        Ok(())
    }

    fn on_registered(&mut self) {
        self.state = SessionState::Registered;
        self.task.shared.set_nick(self.registrar.current_nick());
        self.autojoin_at = Some(Instant::now() + AUTOJOIN_DELAY);
        if self.registrar.current_nick() != self.registrar.configured_nick() {
            self.regain_nick = true;
        }
        info!(net = %self.task.shared.net(), nick = %self.registrar.current_nick(), "registered");
    }

    /// Joins every configured channel still in `Known` state and opens the
    /// connection for public sends.
    fn autojoin(&mut self) {
        self.autojoin_at = None;
        if self.state == SessionState::Registered {
            self.state = SessionState::Ready;
            let _ = self.task.events.send(Event::Ready);
        }

        let mut to_join = Vec::new();
        for chan in &self.task.config.channels {
            let key = normalize(chan);
            if let Some(mut entry) = self.task.shared.channels.get_mut(&key) {
                if entry.status == ChannelStatus::Known {
                    entry.status = ChannelStatus::Joining;
                    to_join.push(chan.clone());
                }
            }
        }
        for chan in to_join {
            self.send_traced(Message::cmd("JOIN").arg(chan));
        }
    }

    /// Keeps nick and channel state in step with the stream.
    fn track(&mut self, msg: &Message) {
        let own_nick = normalize(&self.task.shared.nick());
        let from = msg.prefix_nick().map(normalize);
        let from_self = from.as_deref() == Some(own_nick.as_str());

        if msg.command_is("JOIN") {
            let Some(chan) = msg.args.first() else { return };
            let key = normalize(chan);
            let mut entry = self.task.shared.channels.entry(key).or_default();
            if from_self {
                entry.status = ChannelStatus::Joined;
                entry.members.insert(own_nick);
                drop(entry);
                let _ = self.task.events.send(Event::ChannelJoined(chan.clone()));
            } else if let Some(nick) = from {
                entry.members.insert(nick);
            }
        } else if msg.command_is("PART") {
            let Some(chan) = msg.args.first() else { return };
            let key = normalize(chan);
            if from_self {
                if let Some(mut entry) = self.task.shared.channels.get_mut(&key) {
                    entry.status = ChannelStatus::Known;
                    entry.members.clear();
                }
                let _ = self.task.events.send(Event::ChannelLeft(chan.clone()));
            } else if let Some(nick) = from {
                if let Some(mut entry) = self.task.shared.channels.get_mut(&key) {
                    entry.members.remove(&nick);
                }
            }
        } else if msg.command_is("KICK") {
            let (Some(chan), Some(victim)) = (msg.args.first(), msg.args.get(1)) else {
                return;
            };
            let key = normalize(chan);
            let victim = normalize(victim);
            if victim == own_nick {
                if let Some(mut entry) = self.task.shared.channels.get_mut(&key) {
                    entry.status = ChannelStatus::Known;
                    entry.members.clear();
                }
                let _ = self.task.events.send(Event::ChannelLeft(chan.clone()));
            } else if let Some(mut entry) = self.task.shared.channels.get_mut(&key) {
                entry.members.remove(&victim);
            }
        } else if msg.command_is("QUIT") {
            if let Some(nick) = from {
                for mut entry in self.task.shared.channels.iter_mut() {
                    entry.members.remove(&nick);
                }
            }
        } else if msg.command_is("NICK") {
            let (Some(old), Some(new)) = (from, msg.args.first()) else {
                return;
            };
            let new_norm = normalize(new);
            for mut entry in self.task.shared.channels.iter_mut() {
                if entry.members.remove(&old) {
                    entry.members.insert(new_norm.clone());
                }
            }
            if from_self {
                self.task.shared.set_nick(new);
                if normalize(new) == normalize(self.registrar.configured_nick()) {
                    self.regain_nick = false;
                }
                let _ = self.task.events.send(Event::NickChanged {
                    old: msg.prefix_nick().unwrap_or_default().to_owned(),
                    new: new.clone(),
                });
            }
        } else if msg.command == "353" {
            // RPL_NAMREPLY: <me> <symbol> <channel> :<prefixed nicks>
            let (Some(chan), Some(names)) = (msg.args.get(2), msg.args.get(3)) else {
                return;
            };
            if let Some(mut entry) = self.task.shared.channels.get_mut(&normalize(chan)) {
                for name in names.split_whitespace() {
                    let nick = name.trim_start_matches(['@', '+', '%', '&', '~']);
                    if !nick.is_empty() {
                        entry.members.insert(normalize(nick));
                    }
                }
            }
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}
