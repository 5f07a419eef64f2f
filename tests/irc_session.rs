//! IRC connection tests against a scripted server on loopback TCP:
//! registration ordering, autojoin, ping handling, membership tracking,
//! send gating, and nick collisions.

use futures_util::{SinkExt, StreamExt};
use murk_proto::{IrcCodec, Message};
use murkbot::client::{Connection, Event};
use murkbot::config::{NetworkConfig, ServerConfig};
use murkbot::runtime::Shutdown;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;

type ServerLink = Framed<TcpStream, IrcCodec>;

fn network(port: u16, channels: Vec<String>) -> NetworkConfig {
    NetworkConfig {
        name: "testnet".into(),
        servers: vec![ServerConfig {
            host: "127.0.0.1".into(),
            port,
            tls: None,
            password: None,
        }],
        nick: "mybot".into(),
        user: "mybot".into(),
        realname: "Test Bot".into(),
        password: None,
        sasl: None,
        channels,
        resolve_timeout_ms: 5_000,
        connect_timeout_ms: 5_000,
        reconnect_delay_ms: 100,
    }
}

async fn accept(listener: &TcpListener) -> ServerLink {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client connects in time")
        .unwrap();
    Framed::new(stream, IrcCodec::new())
}

async fn read_line(link: &mut ServerLink) -> Message {
    timeout(Duration::from_secs(5), link.next())
        .await
        .expect("line in time")
        .expect("stream open")
        .expect("valid message")
}

async fn send_line(link: &mut ServerLink, raw: &str) {
    let msg = Message::parse(raw.as_bytes()).expect("test line parses");
    link.send(msg).await.unwrap();
}

async fn expect_event<F>(events: &mut broadcast::Receiver<Event>, mut want: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("stream open");
        if want(&event) {
            return event;
        }
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn registration_autojoin_and_tracking() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let shutdown = Shutdown::new();
    let conn = Connection::spawn(network(port, vec!["#chan".into()]), shutdown.clone());
    let mut events = conn.subscribe();

    let mut server = accept(&listener).await;

    // registration burst arrives in order
    let nick = read_line(&mut server).await;
    assert_eq!(nick.to_string(), "NICK mybot");
    let user = read_line(&mut server).await;
    assert_eq!(user.args[0], "mybot");
    assert!(user.command_is("USER"));

    // a message posted before the connection is ready is dropped; the
    // pause lets the task process it while still unregistered
    conn.send(Message::cmd("PRIVMSG").args(["#chan", "too early"]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // welcome plus end-of-MOTD short-circuits the autojoin delay
    send_line(&mut server, ":srv 001 mybot :Welcome to the test network").await;
    send_line(&mut server, ":srv 376 mybot :End of /MOTD command.").await;

    expect_event(&mut events, |e| matches!(e, Event::Ready)).await;

    let join = read_line(&mut server).await;
    assert_eq!(join.to_string(), "JOIN #chan");

    // join echo and NAMES seed the membership view
    send_line(&mut server, ":mybot!bot@host JOIN #chan").await;
    expect_event(
        &mut events,
        |e| matches!(e, Event::ChannelJoined(c) if c == "#chan"),
    )
    .await;
    send_line(&mut server, ":srv 353 mybot = #chan :@oper mybot friend").await;

    let conn2 = conn.clone();
    wait_until(move || conn2.on_channel("friend", "#chan")).await;
    assert!(conn.on_channel("Oper", "#CHAN"));
    assert!(!conn.on_channel("stranger", "#chan"));

    // PING is answered without waiting on anything else
    send_line(&mut server, "PING :token-1").await;
    let pong = read_line(&mut server).await;
    assert_eq!(pong.to_string(), "PONG token-1");

    // a ready connection passes public sends through, in order
    conn.send(Message::cmd("PRIVMSG").args(["#chan", "hello world"]));
    let privmsg = read_line(&mut server).await;
    assert_eq!(privmsg.to_string(), "PRIVMSG #chan :hello world");
    // and the pre-ready message never surfaced
    assert_ne!(privmsg.args[1], "too early");

    // membership updates on PART and QUIT
    send_line(&mut server, ":friend!f@h PART #chan").await;
    let conn2 = conn.clone();
    wait_until(move || !conn2.on_channel("friend", "#chan")).await;
    send_line(&mut server, ":oper!o@h QUIT :gone").await;
    let conn2 = conn.clone();
    wait_until(move || !conn2.on_channel("oper", "#chan")).await;

    // shutdown says goodbye
    shutdown.trigger();
    let quit = read_line(&mut server).await;
    assert!(quit.command_is("QUIT"));
}

#[tokio::test]
async fn nick_collision_retries_with_suffix() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let shutdown = Shutdown::new();
    let conn = Connection::spawn(network(port, vec![]), shutdown.clone());

    let mut server = accept(&listener).await;
    assert_eq!(read_line(&mut server).await.to_string(), "NICK mybot");
    let _user = read_line(&mut server).await;

    send_line(&mut server, ":srv 433 * mybot :Nickname is already in use").await;
    assert_eq!(read_line(&mut server).await.to_string(), "NICK mybot1");

    send_line(&mut server, ":srv 001 mybot1 :Welcome").await;
    let conn2 = conn.clone();
    wait_until(move || conn2.nick() == "mybot1").await;

    shutdown.trigger();
}

#[tokio::test]
async fn reconnects_after_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let shutdown = Shutdown::new();
    let conn = Connection::spawn(network(port, vec![]), shutdown.clone());
    let mut events = conn.subscribe();

    // first session: drop it right after registration starts
    let mut server = accept(&listener).await;
    let _ = read_line(&mut server).await;
    drop(server);

    expect_event(&mut events, |e| matches!(e, Event::Lost)).await;

    // the task comes back after the reconnect delay
    let mut server = accept(&listener).await;
    assert_eq!(read_line(&mut server).await.to_string(), "NICK mybot");

    shutdown.trigger();
}
