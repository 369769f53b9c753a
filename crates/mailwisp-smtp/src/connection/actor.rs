//! Connection actor owning the SMTP stream.
//!
//! Exactly one request is on the wire at a time. Requests are served in the
//! order they were queued; the reply to each is routed back over its own
//! oneshot channel. A fatal error ends the actor and is handed to every
//! queued request and to every later caller.

use std::sync::{Arc, OnceLock};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::TlsConnector;

use super::config::TlsConfig;
use super::stream::{self, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{ReplyAssembler, ReplyDecoder};
use crate::types::{Reply, ReplyCode};

enum Request {
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Reply>>,
    },
    StartTls {
        connector: TlsConnector,
        server_name: ServerName<'static>,
        done: oneshot::Sender<Result<()>>,
    },
}

impl Request {
    fn fail(self, error: Error) {
        // The requester may have stopped waiting.
        match self {
            Self::Send { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::StartTls { done, .. } => {
                let _ = done.send(Err(error));
            }
        }
    }
}

/// Handle to a running connection actor.
///
/// Cloning the handle shares the same connection. The actor stops once
/// [`Connection::close`] is called or every handle is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    requests: mpsc::UnboundedSender<Request>,
    shutdown: Arc<watch::Sender<bool>>,
    terminal: Arc<OnceLock<Error>>,
}

impl Connection {
    /// Spawns the actor on the current tokio runtime.
    #[must_use]
    pub fn spawn(stream: SmtpStream) -> Self {
        let (requests, queue) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let terminal = Arc::new(OnceLock::new());

        let actor = Actor {
            wire: Wire::new(stream),
            queue,
            shutdown: shutdown_rx,
            terminal: Arc::clone(&terminal),
        };
        tokio::spawn(actor.run());

        Self {
            requests,
            shutdown: Arc::new(shutdown),
            terminal,
        }
    }

    /// Writes `payload` and waits for the next complete reply.
    ///
    /// An empty payload writes nothing and only reads a reply, which is how
    /// the server greeting is received.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection, or the read or decode
    /// error hit while serving this request.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<Reply> {
        let (reply, response) = oneshot::channel();
        self.submit(Request::Send {
            payload: payload.into(),
            reply,
        })?;
        response.await.map_err(|_| self.closed_error())?
    }

    /// Sends a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_command(&self, command: &Command) -> Result<Reply> {
        tracing::debug!(?command, "sending SMTP command");
        let reply = self.send(command.serialize()).await?;
        tracing::debug!(code = %reply.code, "received SMTP reply");
        Ok(reply)
    }

    /// Sends STARTTLS and, on a 220 reply, upgrades the stream to TLS.
    ///
    /// No request queued after this one is written before the handshake ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartTlsFailure`] if the server refuses (the
    /// connection stays usable in plaintext) or the handshake fails (the
    /// connection is closed). Data buffered behind the 220 reply is a
    /// [`Error::Protocol`] error.
    pub async fn start_tls(&self, tls: &TlsConfig, host: &str) -> Result<()> {
        let connector = stream::create_tls_connector(tls).await?;
        let server_name = stream::server_name(host)?;

        let (done, response) = oneshot::channel();
        self.submit(Request::StartTls {
            connector,
            server_name,
            done,
        })?;
        response.await.map_err(|_| self.closed_error())?
    }

    /// Stops the actor. Queued and in-flight requests fail with
    /// [`Error::EndOfStream`].
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true once the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    fn submit(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> Error {
        self.terminal.get().cloned().unwrap_or(Error::EndOfStream)
    }
}

struct Actor {
    wire: Wire,
    queue: mpsc::UnboundedReceiver<Request>,
    shutdown: watch::Receiver<bool>,
    terminal: Arc<OnceLock<Error>>,
}

impl Actor {
    async fn run(mut self) {
        let error = loop {
            let request = tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => break Error::EndOfStream,
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => break Error::EndOfStream,
                },
            };

            if let Some(error) = self.serve(request).await {
                break error;
            }
        };

        match &error {
            Error::EndOfStream => tracing::debug!("SMTP connection closed"),
            e => tracing::warn!(?e, "SMTP connection failed"),
        }

        let _ = self.terminal.set(error.clone());
        self.queue.close();
        while let Some(request) = self.queue.recv().await {
            request.fail(error.clone());
        }
        self.wire.close().await;
    }

    /// Serves one request. Returns the error that ends the connection, if any.
    async fn serve(&mut self, request: Request) -> Option<Error> {
        match request {
            Request::Send { payload, reply } => {
                let result = tokio::select! {
                    biased;
                    () = shutdown_requested(&mut self.shutdown) => Err(Error::EndOfStream),
                    result = self.wire.exchange(&payload) => result,
                };
                let fatal = result
                    .as_ref()
                    .err()
                    .filter(|e| e.is_connection_fatal())
                    .cloned();
                let _ = reply.send(result);
                fatal
            }
            Request::StartTls {
                connector,
                server_name,
                done,
            } => {
                let result = tokio::select! {
                    biased;
                    () = shutdown_requested(&mut self.shutdown) => Err(Error::EndOfStream),
                    result = self.wire.start_tls(&connector, server_name) => result,
                };
                let fatal = match &result {
                    Err(e) if e.is_connection_fatal() || !self.wire.is_open() => Some(e.clone()),
                    _ => None,
                };
                let _ = done.send(result);
                fatal
            }
        }
    }
}

/// Resolves once a close was requested or every handle is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Stream plus the bytes read from it but not yet decoded.
struct Wire {
    stream: Option<SmtpStream>,
    decoder: ReplyDecoder,
}

impl Wire {
    fn new(stream: SmtpStream) -> Self {
        Self {
            stream: Some(stream),
            decoder: ReplyDecoder::new(),
        }
    }

    const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<Reply> {
        if !payload.is_empty() {
            let stream = self.stream.as_mut().ok_or(Error::EndOfStream)?;
            stream.write_all(payload).await?;
            stream.flush().await?;
        }
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut assembler = ReplyAssembler::new();
        loop {
            while let Some(line) = self.decoder.decode()? {
                tracing::trace!(code = %line.code, last = line.is_last, "reply line");
                if let Some(reply) = assembler.push(line)? {
                    return Ok(reply);
                }
            }

            let stream = self.stream.as_mut().ok_or(Error::EndOfStream)?;
            if stream.read_buf(self.decoder.read_buffer()).await? == 0 {
                return Err(Error::EndOfStream);
            }
        }
    }

    async fn start_tls(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
    ) -> Result<()> {
        if self.stream.as_ref().is_some_and(SmtpStream::is_tls) {
            return Err(Error::StartTlsFailure("connection already uses TLS".into()));
        }

        let reply = self.exchange(&Command::StartTls.serialize()).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(Error::StartTlsFailure(format!(
                "server replied {}: {}",
                reply.code,
                reply.message_text()
            )));
        }
        if self.decoder.has_buffered() {
            return Err(Error::Protocol(
                "server sent data after accepting STARTTLS".into(),
            ));
        }

        let plain = self.stream.take().ok_or(Error::EndOfStream)?;
        let tls = plain.upgrade_to_tls(connector, server_name).await?;
        self.stream = Some(tls);
        tracing::debug!("connection upgraded to TLS");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!(?e, "error shutting down SMTP stream");
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn pair() -> (Connection, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        (Connection::spawn(SmtpStream::plain(client)), BufReader::new(server))
    }

    async fn read_line(server: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_empty_payload_reads_greeting() {
        let (connection, mut server) = pair();
        server
            .get_mut()
            .write_all(b"220-smtp.example.com ESMTP\r\n220 ready\r\n")
            .await
            .unwrap();

        let greeting = connection.send(Vec::new()).await.unwrap();
        assert_eq!(greeting.code, ReplyCode::SERVICE_READY);
        assert_eq!(greeting.lines, ["smtp.example.com ESMTP", "ready"]);
    }

    #[tokio::test]
    async fn test_send_writes_payload_then_reads_reply() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            let line = read_line(&mut server).await;
            server.get_mut().write_all(b"250 ok\r\n").await.unwrap();
            line
        });

        let reply = connection.send("NOOP\r\n").await.unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(server_task.await.unwrap(), "NOOP\r\n");
    }

    #[tokio::test]
    async fn test_requests_served_in_order() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            let mut seen = vec![read_line(&mut server).await];
            server
                .get_mut()
                .write_all(b"250 one\r\n251 two\r\n252 three\r\n")
                .await
                .unwrap();
            seen.push(read_line(&mut server).await);
            seen.push(read_line(&mut server).await);
            seen
        });

        let (a, b, c) = tokio::join!(
            connection.send("A\r\n"),
            connection.send("B\r\n"),
            connection.send("C\r\n"),
        );
        assert_eq!(a.unwrap().code.as_u16(), 250);
        assert_eq!(b.unwrap().code.as_u16(), 251);
        assert_eq!(c.unwrap().code.as_u16(), 252);
        assert_eq!(server_task.await.unwrap(), ["A\r\n", "B\r\n", "C\r\n"]);
    }

    #[tokio::test]
    async fn test_greeting_then_command_on_mock() {
        let mock = tokio_test::io::Builder::new()
            .read(b"220 mock.test\r\n")
            .write(b"EHLO client.test\r\n")
            .read(b"250-mock.test\r\n250 ")
            .read(b"STARTTLS\r\n")
            .build();
        let connection = Connection::spawn(SmtpStream::plain(mock));

        assert_eq!(connection.send(Vec::new()).await.unwrap().code, ReplyCode::SERVICE_READY);
        let ehlo = connection
            .send_command(&Command::Ehlo {
                hostname: "client.test".into(),
            })
            .await
            .unwrap();
        assert_eq!(ehlo.lines, ["mock.test", "STARTTLS"]);
    }

    #[tokio::test]
    async fn test_code_mismatch_closes_connection() {
        let (connection, mut server) = pair();
        server
            .get_mut()
            .write_all(b"250-first\r\n251 second\r\n")
            .await
            .unwrap();

        assert!(matches!(connection.send(Vec::new()).await, Err(Error::Protocol(_))));
        assert!(matches!(connection.send("RSET\r\n").await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_queued_requests() {
        let (connection, mut server) = pair();
        server.get_mut().write_all(b"hello\r\n").await.unwrap();

        let (first, second) = tokio::join!(connection.send(Vec::new()), connection.send("DATA\r\n"));
        assert!(matches!(first, Err(Error::InvalidReplyCode(_))));
        assert!(matches!(second, Err(Error::InvalidReplyCode(_))));
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let (connection, server) = pair();
        drop(server);

        assert!(matches!(connection.send(Vec::new()).await, Err(Error::EndOfStream)));
        assert!(connection.send("QUIT\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_request() {
        let (connection, _server) = pair();
        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send(Vec::new()).await })
        };
        tokio::task::yield_now().await;

        connection.close();
        assert!(matches!(pending.await.unwrap(), Err(Error::EndOfStream)));
        assert!(matches!(connection.send("QUIT\r\n").await, Err(Error::EndOfStream)));
    }

    #[tokio::test]
    async fn test_starttls_refused_keeps_plaintext() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            assert_eq!(read_line(&mut server).await, "STARTTLS\r\n");
            server.get_mut().write_all(b"454 not now\r\n").await.unwrap();
            let next = read_line(&mut server).await;
            server.get_mut().write_all(b"221 bye\r\n").await.unwrap();
            next
        });

        let result = connection.start_tls(&TlsConfig::Default, "localhost").await;
        assert!(matches!(result, Err(Error::StartTlsFailure(_))));

        let reply = connection.send("QUIT\r\n").await.unwrap();
        assert_eq!(reply.code, ReplyCode::CLOSING);
        assert_eq!(server_task.await.unwrap(), "QUIT\r\n");
    }

    #[tokio::test]
    async fn test_starttls_accepted_starts_handshake() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            assert_eq!(read_line(&mut server).await, "STARTTLS\r\n");
            server.get_mut().write_all(b"220 go ahead\r\n").await.unwrap();
            let mut record_type = [0u8; 1];
            server.read_exact(&mut record_type).await.unwrap();
            record_type[0]
        });

        let result = connection.start_tls(&TlsConfig::Default, "localhost").await;

        // 0x16 is a TLS handshake record, i.e. the ClientHello.
        assert_eq!(server_task.await.unwrap(), 0x16);
        assert!(matches!(result, Err(Error::StartTlsFailure(_))));
        assert!(connection.send("QUIT\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_starttls_with_buffered_plaintext() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            read_line(&mut server).await;
            server
                .get_mut()
                .write_all(b"220 go ahead\r\n250 injected\r\n")
                .await
                .unwrap();
            server
        });

        let result = connection.start_tls(&TlsConfig::Default, "localhost").await;
        let _server = server_task.await.unwrap();
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
