//! Integration tests for the SMTP client.
//!
//! These tests run the client against a scripted server on a local TCP
//! listener, so the whole stack from `Client::connect` down to the socket is
//! exercised.

#![allow(clippy::unwrap_used)]

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use mailwisp_mime::{Content, Mail, MailUser};
use mailwisp_smtp::{
    AuthMechanism, Client, Config, Credentials, Error, Security, Sender, SenderConfig,
};

/// Server side of one accepted connection.
struct Peer {
    stream: BufReader<TcpStream>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        line
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.line().await, expected);
    }

    async fn reply(&mut self, reply: &str) {
        self.stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
    }

    /// Reads message data up to and including the end marker.
    async fn data(&mut self) -> String {
        let mut data = String::new();
        loop {
            let line = self.line().await;
            assert!(!line.is_empty(), "connection closed inside DATA");
            data.push_str(&line);
            if line == ".\r\n" {
                return data;
            }
        }
    }

    async fn greet(&mut self) {
        self.reply("220 smtp.test ESMTP ready\r\n").await;
        self.expect("EHLO client.test\r\n").await;
        self.reply("250-smtp.test\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n")
            .await;
    }

    /// Serves one mail transaction and returns the envelope recipients and data.
    async fn transaction(&mut self, from: &str) -> (Vec<String>, String) {
        self.expect(&format!("MAIL FROM: <{from}> BODY=8BITMIME\r\n")).await;
        self.reply("250 sender ok\r\n").await;

        let mut recipients = Vec::new();
        loop {
            let line = self.line().await;
            if line == "DATA\r\n" {
                break;
            }
            let rcpt = line
                .strip_prefix("RCPT TO: <")
                .and_then(|l| l.strip_suffix(">\r\n"))
                .unwrap_or_else(|| panic!("unexpected command {line:?}"));
            recipients.push(rcpt.to_owned());
            self.reply("250 recipient ok\r\n").await;
        }

        self.reply("354 end data with <CR><LF>.<CR><LF>\r\n").await;
        let data = self.data().await;
        self.reply("250 queued\r\n").await;
        (recipients, data)
    }
}

async fn listener() -> (TcpListener, Config) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::Insecure)
        .hello_name("client.test")
        .build();
    (listener, config)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mail(from: &str, to: &str) -> Mail {
    Mail::new(from, [to], "Hello", Content::plain("Hello world"))
}

#[tokio::test]
async fn test_send_plain_mail() {
    init_tracing();
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let transaction = peer.transaction("sender@example.com").await;
        peer.expect("QUIT\r\n").await;
        peer.reply("221 bye\r\n").await;
        transaction
    });

    let client = Client::connect(&config).await.unwrap();
    assert!(client.server_info().supports_auth(AuthMechanism::Login));
    client
        .send_mail(&mail("sender@example.com", "rcpt@example.com"))
        .await
        .unwrap();
    client.quit().await.unwrap();

    let (recipients, data) = server.await.unwrap();
    assert_eq!(recipients, ["rcpt@example.com"]);
    assert!(data.starts_with("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(data.contains("\r\nTo: <rcpt@example.com>\r\n"));
    assert!(data.ends_with("\r\n\r\nHello world\r\n.\r\n"));
}

#[tokio::test]
async fn test_every_recipient_in_envelope_but_bcc_hidden() {
    init_tracing();
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        peer.transaction("boss@example.com").await
    });

    let mail = Mail::new(
        MailUser::with_name("Boss", "boss@example.com"),
        ["ann@example.com", "bob@example.com"],
        "Quarterly numbers",
        Content::alternative("See attached", "<p>See attached</p>"),
    )
    .cc("carl@example.com")
    .bcc("audit@example.com");

    let client = Client::connect(&config).await.unwrap();
    client.send_mail(&mail).await.unwrap();

    let (recipients, data) = server.await.unwrap();
    assert_eq!(
        recipients,
        [
            "ann@example.com",
            "bob@example.com",
            "carl@example.com",
            "audit@example.com"
        ]
    );
    assert!(data.contains("Cc: <carl@example.com>\r\n"));
    assert!(!data.contains("audit@example.com"));
    assert!(!data.contains("Bcc"));
}

#[tokio::test]
async fn test_concurrent_mails_do_not_interleave() {
    init_tracing();
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        let first = peer.transaction("one@example.com").await;
        let second = peer.transaction("two@example.com").await;
        (first.0, second.0)
    });

    let client = Arc::new(Client::connect(&config).await.unwrap());
    let one = mail("one@example.com", "first@example.com");
    let two = mail("two@example.com", "second@example.com");
    let (a, b) = tokio::join!(client.send_mail(&one), client.send_mail(&two));
    a.unwrap();
    b.unwrap();

    let (first, second) = server.await.unwrap();
    assert_eq!(first, ["first@example.com"]);
    assert_eq!(second, ["second@example.com"]);
}

#[tokio::test]
async fn test_server_closing_mid_transaction() {
    init_tracing();
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        peer.line().await;
    });

    let client = Client::connect(&config).await.unwrap();
    let result = client
        .send_mail(&mail("sender@example.com", "rcpt@example.com"))
        .await;
    server.await.unwrap();

    assert!(result.unwrap_err().is_connection_fatal());
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_sender_reconnects_after_backoff() {
    init_tracing();
    let backoff = Duration::from_millis(300);
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.greet().await;
        first.expect("MAIL FROM: <sender@example.com> BODY=8BITMIME\r\n").await;
        drop(first);
        let dropped = Instant::now();

        let mut second = Peer::accept(&listener).await;
        let waited = dropped.elapsed();
        second.greet().await;
        let (recipients, _) = second.transaction("sender@example.com").await;
        (waited, recipients)
    });

    let (sender, task) = Sender::spawn(SenderConfig::new(config).backoff(backoff), ());

    let lost = sender
        .send_mail(mail("sender@example.com", "lost@example.com"))
        .await;
    assert!(lost.unwrap_err().is_connection_fatal());

    sender
        .send_mail(mail("sender@example.com", "retried@example.com"))
        .await
        .unwrap();

    let (waited, recipients) = server.await.unwrap();
    assert!(waited >= Duration::from_millis(250), "reconnected after {waited:?}");
    assert_eq!(recipients, ["retried@example.com"]);

    sender.shutdown();
    task.await.unwrap();
    assert!(matches!(
        sender.send_mail(mail("sender@example.com", "late@example.com")).await,
        Err(Error::NotRunning)
    ));
}

#[tokio::test]
async fn test_sender_logs_in_on_every_connection() {
    init_tracing();
    let (listener, config) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.greet().await;
        first.expect("AUTH PLAIN AHVzZXIAd3Jvbmc=\r\n").await;
        first.reply("535 authentication failed\r\n").await;

        let mut second = Peer::accept(&listener).await;
        second.greet().await;
        second.expect("AUTH PLAIN AHVzZXIAd3Jvbmc=\r\n").await;
        second.reply("235 welcome\r\n").await;
        second.transaction("sender@example.com").await.0
    });

    let config = SenderConfig::new(config).backoff(Duration::from_millis(50));
    let (sender, _task) = Sender::spawn(config, Credentials::new("user", "wrong"));

    sender
        .send_mail(mail("sender@example.com", "rcpt@example.com"))
        .await
        .unwrap();
    assert_eq!(server.await.unwrap(), ["rcpt@example.com"]);
}

#[tokio::test]
async fn test_connect_timeout_covers_silent_server() {
    init_tracing();
    let (listener, mut config) = listener().await;
    config.connect_timeout = Duration::from_millis(200);
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        // Never greet, just wait for the client to hang up.
        peer.line().await
    });

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(3), Client::connect(&config))
        .await
        .unwrap();

    assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(server.await.unwrap(), "");
}

#[tokio::test]
async fn test_sender_retries_after_silent_server() {
    init_tracing();
    let (listener, mut config) = listener().await;
    config.connect_timeout = Duration::from_millis(200);
    let server = tokio::spawn(async move {
        let mut silent = Peer::accept(&listener).await;
        let mut second = Peer::accept(&listener).await;
        assert_eq!(silent.line().await, "");
        second.greet().await;
        second.transaction("sender@example.com").await.0
    });

    let config = SenderConfig::new(config).backoff(Duration::from_millis(50));
    let (sender, _task) = Sender::spawn(config, ());

    let sent = tokio::time::timeout(
        Duration::from_secs(3),
        sender.send_mail(mail("sender@example.com", "rcpt@example.com")),
    )
    .await
    .unwrap();
    sent.unwrap();
    assert_eq!(server.await.unwrap(), ["rcpt@example.com"]);
}

#[tokio::test]
async fn test_shutdown_cancels_mail_in_flight() {
    init_tracing();
    let (listener, config) = listener().await;
    let (mail_from_seen, seen) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.greet().await;
        peer.expect("MAIL FROM: <sender@example.com> BODY=8BITMIME\r\n").await;
        mail_from_seen.send(()).unwrap();
        // Stall without replying until the client drops the connection.
        peer.line().await
    });

    let (sender, task) = Sender::spawn(SenderConfig::new(config), ());
    let pending = tokio::spawn({
        let sender = sender.clone();
        async move {
            sender
                .send_mail(mail("sender@example.com", "rcpt@example.com"))
                .await
        }
    });

    seen.await.unwrap();
    sender.shutdown();

    assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
    task.await.unwrap();
    assert!(!sender.is_running());
    assert_eq!(server.await.unwrap(), "");
}
