//! Registration state machine: capability negotiation, SASL, and the
//! NICK/USER handshake.
//!
//! Pure request/response logic: feed it server messages, get back the
//! messages to send plus flags for the state transitions the session task
//! acts on. Keeping it socket-free makes the whole exchange testable as a
//! conversation.

use murk_proto::sasl::{self, Credentials, Mechanism};
use murk_proto::Message;
use tracing::{debug, warn};

use crate::config::NetworkConfig;

/// What one incoming message did to the registration exchange.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Messages to send in response, in order.
    pub send: Vec<Message>,
    /// The welcome numeric arrived; the connection is registered.
    pub registered: bool,
    /// End of MOTD arrived; safe to autojoin early.
    pub end_of_motd: bool,
    /// We picked a new nick after a collision during registration.
    pub nick_changed: Option<String>,
    /// Our nick is taken while registered; start regain attempts.
    pub regain_needed: bool,
}

/// Drives one connection's registration exchange.
#[derive(Debug)]
pub struct Registrar {
    configured_nick: String,
    current_nick: String,
    alt_suffix: u32,
    user: String,
    realname: String,
    password: Option<String>,
    sasl: Option<(Mechanism, Credentials)>,
    /// Capabilities accumulated over a possibly multi-line `CAP LS`.
    cap_ls: Vec<String>,
    registered: bool,
}

impl Registrar {
    /// Prepares the exchange for one connection attempt. A per-server
    /// password overrides the network-wide one.
    pub fn new(config: &NetworkConfig, server_password: Option<&str>) -> Registrar {
        let password = server_password
            .map(str::to_owned)
            .or_else(|| config.password.clone());
        let sasl = config
            .sasl
            .as_ref()
            .map(|s| (s.mechanism(), s.credentials()));

        Registrar {
            configured_nick: config.nick.clone(),
            current_nick: config.nick.clone(),
            alt_suffix: 0,
            user: config.user.clone(),
            realname: config.realname.clone(),
            password,
            sasl,
            cap_ls: Vec::new(),
            registered: false,
        }
    }

    /// The nick this exchange is currently trying to hold.
    pub fn current_nick(&self) -> &str {
        &self.current_nick
    }

    /// The preferred nick from the configuration.
    pub fn configured_nick(&self) -> &str {
        &self.configured_nick
    }

    /// True once the welcome numeric has been seen.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The opening burst, sent as soon as the socket is up: CAP discovery
    /// when SASL is wanted, then PASS, NICK, USER.
    pub fn initial_burst(&self) -> Vec<Message> {
        let mut out = Vec::new();
        if self.sasl.is_some() {
            out.push(Message::cmd("CAP").args(["LS", "302"]));
        }
        if let Some(pass) = &self.password {
            out.push(Message::cmd("PASS").arg(pass.clone()));
        }
        out.push(Message::cmd("NICK").arg(self.current_nick.clone()));
        out.push(
            Message::cmd("USER").args([self.user.as_str(), "0", "*", self.realname.as_str()]),
        );
        out
    }

    /// Feeds one server message through the exchange.
    pub fn handle(&mut self, msg: &Message) -> Outcome {
        let mut out = Outcome::default();

        if msg.command_is("CAP") {
            self.handle_cap(msg, &mut out);
        } else if msg.command_is("AUTHENTICATE") {
            self.handle_authenticate(msg, &mut out);
        } else if sasl::is_result_numeric(&msg.command) {
            if !sasl::is_success_numeric(&msg.command) {
                warn!(numeric = %msg.command, "SASL exchange failed");
            }
            // the exchange is over either way
            out.send.push(Message::cmd("CAP").arg("END"));
        } else if msg.command == "001" {
            self.registered = true;
            out.registered = true;
            // the server's idea of our nick is authoritative
            if let Some(nick) = msg.args.first() {
                self.current_nick = nick.clone();
            }
        } else if msg.command == "376" || msg.command == "422" {
            out.end_of_motd = true;
        } else if msg.command == "433" || msg.command == "437" {
            self.handle_nick_collision(&mut out);
        } else if msg.command_is("NICK") {
            // track our own nick changes after registration
            if msg.prefix_nick() == Some(self.current_nick.as_str()) {
                if let Some(new) = msg.args.first() {
                    self.current_nick = new.clone();
                }
            }
        }

        out
    }

    fn handle_cap(&mut self, msg: &Message, out: &mut Outcome) {
        if msg.arg_is(1, "LS") {
            // `CAP * LS * :caps` continues on the next line
            let more = msg.args.len() >= 4 && msg.args[2] == "*";
            if let Some(caps) = msg.args.last() {
                self.cap_ls
                    .extend(caps.split_whitespace().map(str::to_owned));
            }
            if more {
                return;
            }

            let have_sasl = self
                .cap_ls
                .iter()
                .any(|c| c == "sasl" || c.starts_with("sasl="));
            if self.sasl.is_some() && have_sasl {
                out.send.push(Message::cmd("CAP").args(["REQ", "sasl"]));
            } else {
                if self.sasl.is_some() {
                    warn!("server does not offer the sasl capability");
                }
                out.send.push(Message::cmd("CAP").arg("END"));
            }
        } else if msg.arg_is(1, "ACK") {
            let acked = msg.args.last().map(String::as_str).unwrap_or_default();
            if acked.split_whitespace().any(|c| c == "sasl") {
                if let Some((mechanism, _)) = &self.sasl {
                    debug!(mechanism = mechanism.name(), "starting SASL");
                    out.send
                        .push(Message::cmd("AUTHENTICATE").arg(mechanism.name()));
                    return;
                }
            }
            out.send.push(Message::cmd("CAP").arg("END"));
        } else if msg.arg_is(1, "NAK") {
            warn!("capability request rejected");
            out.send.push(Message::cmd("CAP").arg("END"));
        }
    }

    fn handle_authenticate(&mut self, msg: &Message, out: &mut Outcome) {
        if !msg.arg_is(0, "+") {
            return;
        }
        if let Some((mechanism, creds)) = &self.sasl {
            out.send
                .push(Message::cmd("AUTHENTICATE").arg(sasl::respond(*mechanism, creds)));
        }
    }

    fn handle_nick_collision(&mut self, out: &mut Outcome) {
        if self.registered {
            out.regain_needed = true;
            return;
        }
        self.alt_suffix += 1;
        self.current_nick = format!("{}{}", self.configured_nick, self.alt_suffix);
        debug!(nick = %self.current_nick, "nick in use - trying alternative");
        out.send
            .push(Message::cmd("NICK").arg(self.current_nick.clone()));
        out.nick_changed = Some(self.current_nick.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, SaslConfig, ServerConfig};

    fn network(sasl: Option<SaslConfig>, password: Option<String>) -> NetworkConfig {
        NetworkConfig {
            name: "test".into(),
            servers: vec![ServerConfig {
                host: "irc.example.net".into(),
                port: 6667,
                tls: None,
                password: None,
            }],
            nick: "mybot".into(),
            user: "mybot".into(),
            realname: "My Bot".into(),
            password,
            sasl,
            channels: vec![],
            resolve_timeout_ms: 30_000,
            connect_timeout_ms: 60_000,
            reconnect_delay_ms: 30_000,
        }
    }

    fn plain_sasl() -> SaslConfig {
        SaslConfig {
            mechanism: "PLAIN".into(),
            authzid: String::new(),
            account: "mybot".into(),
            password: "hunter2".into(),
        }
    }

    fn lines(messages: &[Message]) -> Vec<String> {
        messages.iter().map(Message::to_string).collect()
    }

    #[test]
    fn burst_without_sasl_or_password() {
        let reg = Registrar::new(&network(None, None), None);
        assert_eq!(
            lines(&reg.initial_burst()),
            ["NICK mybot", "USER mybot 0 * :My Bot"]
        );
    }

    #[test]
    fn burst_with_password_and_sasl() {
        let reg = Registrar::new(&network(Some(plain_sasl()), Some("pw".into())), None);
        assert_eq!(
            lines(&reg.initial_burst()),
            [
                "CAP LS 302",
                "PASS pw",
                "NICK mybot",
                "USER mybot 0 * :My Bot"
            ]
        );
    }

    #[test]
    fn server_password_overrides_network_password() {
        let reg = Registrar::new(&network(None, Some("netpw".into())), Some("srvpw"));
        assert_eq!(lines(&reg.initial_burst())[0], "PASS srvpw");
    }

    #[test]
    fn full_sasl_plain_exchange() {
        let mut reg = Registrar::new(&network(Some(plain_sasl()), None), None);

        let out = reg.handle(&Message::parse(b":srv CAP * LS :multi-prefix sasl=PLAIN,EXTERNAL").unwrap());
        assert_eq!(lines(&out.send), ["CAP REQ sasl"]);

        let out = reg.handle(&Message::parse(b":srv CAP mybot ACK :sasl").unwrap());
        assert_eq!(lines(&out.send), ["AUTHENTICATE PLAIN"]);

        let out = reg.handle(&Message::parse(b"AUTHENTICATE +").unwrap());
        // base64("\0mybot\0hunter2")
        assert_eq!(lines(&out.send), ["AUTHENTICATE AG15Ym90AGh1bnRlcjI="]);

        let out = reg.handle(&Message::parse(b":srv 903 mybot :SASL successful").unwrap());
        assert_eq!(lines(&out.send), ["CAP END"]);

        let out = reg.handle(&Message::parse(b":srv 001 mybot :Welcome").unwrap());
        assert!(out.registered);
        assert!(reg.is_registered());
    }

    #[test]
    fn multiline_cap_ls_accumulates() {
        let mut reg = Registrar::new(&network(Some(plain_sasl()), None), None);

        let out = reg.handle(&Message::parse(b":srv CAP * LS * :away-notify extended-join").unwrap());
        assert!(out.send.is_empty());

        let out = reg.handle(&Message::parse(b":srv CAP * LS :sasl").unwrap());
        assert_eq!(lines(&out.send), ["CAP REQ sasl"]);
    }

    #[test]
    fn sasl_failure_still_ends_cap() {
        let mut reg = Registrar::new(&network(Some(plain_sasl()), None), None);
        let out = reg.handle(&Message::parse(b":srv 904 mybot :SASL failed").unwrap());
        assert_eq!(lines(&out.send), ["CAP END"]);
    }

    #[test]
    fn missing_sasl_capability_ends_negotiation() {
        let mut reg = Registrar::new(&network(Some(plain_sasl()), None), None);
        let out = reg.handle(&Message::parse(b":srv CAP * LS :away-notify").unwrap());
        assert_eq!(lines(&out.send), ["CAP END"]);
    }

    #[test]
    fn nick_collision_during_registration_suffixes() {
        let mut reg = Registrar::new(&network(None, None), None);

        let out = reg.handle(&Message::parse(b":srv 433 * mybot :Nickname in use").unwrap());
        assert_eq!(lines(&out.send), ["NICK mybot1"]);
        assert_eq!(out.nick_changed.as_deref(), Some("mybot1"));
        assert!(!out.regain_needed);

        let out = reg.handle(&Message::parse(b":srv 433 * mybot1 :Nickname in use").unwrap());
        assert_eq!(lines(&out.send), ["NICK mybot2"]);
        assert_eq!(reg.current_nick(), "mybot2");
    }

    #[test]
    fn nick_collision_after_registration_requests_regain() {
        let mut reg = Registrar::new(&network(None, None), None);
        reg.handle(&Message::parse(b":srv 001 mybot2 :Welcome").unwrap());
        assert_eq!(reg.current_nick(), "mybot2");

        let out = reg.handle(&Message::parse(b":srv 433 mybot2 mybot :Nickname in use").unwrap());
        assert!(out.send.is_empty());
        assert!(out.regain_needed);
    }

    #[test]
    fn external_sasl_sends_plus() {
        let sasl = SaslConfig {
            mechanism: "EXTERNAL".into(),
            authzid: String::new(),
            account: String::new(),
            password: String::new(),
        };
        let mut reg = Registrar::new(&network(Some(sasl), None), None);
        reg.handle(&Message::parse(b":srv CAP * LS :sasl").unwrap());
        reg.handle(&Message::parse(b":srv CAP mybot ACK :sasl").unwrap());
        let out = reg.handle(&Message::parse(b"AUTHENTICATE +").unwrap());
        assert_eq!(lines(&out.send), ["AUTHENTICATE +"]);
    }

    #[test]
    fn own_nick_change_is_tracked() {
        let mut reg = Registrar::new(&network(None, None), None);
        reg.handle(&Message::parse(b":srv 001 mybot :Welcome").unwrap());
        reg.handle(&Message::parse(b":mybot!u@h NICK :mybot_away").unwrap());
        assert_eq!(reg.current_nick(), "mybot_away");
    }
}
