//! High-level SMTP client.

use std::io;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mailwisp_mime::Mail;
use tokio::sync::Mutex;

use super::actor::Connection;
use super::config::{Config, Security, TlsConfig};
use super::stream::{self, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{AuthMechanism, Handshake, Reply, ReplyCode};

/// SMTP client session.
///
/// All commands go through one [`Connection`], so a `Client` can be shared
/// by reference between tasks and their commands are serialized in call order.
/// Concurrent [`Client::send_mail`] calls run their transactions one after another.
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    host: String,
    hello_name: String,
    server_info: Handshake,
    transaction: Mutex<()>,
}

impl Client {
    /// Connects to the server described by `config`.
    ///
    /// Reads the greeting, performs the EHLO/HELO handshake and, with
    /// [`Security::StartTls`], upgrades the connection when the server offers
    /// it and repeats the handshake over TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, greeting, handshake or TLS upgrade
    /// fails, and an [`io::ErrorKind::TimedOut`] I/O error if all of it takes
    /// longer than [`Config::connect_timeout`].
    pub async fn connect(config: &Config) -> Result<Self> {
        tracing::info!(host = %config.host, port = config.port, "connecting to SMTP server");

        let setup = async {
            let stream = open(config).await?;
            Self::from_stream(stream, config).await
        };
        tokio::time::timeout(config.connect_timeout, setup)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "SMTP session setup timed out"))?
    }

    /// Runs the session setup of [`Client::connect`] over an established stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] for a rejecting greeting, and any
    /// handshake or TLS upgrade error.
    pub async fn from_stream(stream: SmtpStream, config: &Config) -> Result<Self> {
        let connection = Connection::spawn(stream);

        let greeting = connection.send(Vec::new()).await?;
        if !greeting.is_successful() {
            return Err(Error::command_failed(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        let mut client = Self {
            connection,
            host: config.host.clone(),
            hello_name: config.hello_name().to_owned(),
            server_info: Handshake::default(),
            transaction: Mutex::new(()),
        };
        client.handshake().await?;

        if let Security::StartTls(tls) = &config.security {
            if client.server_info.supports_starttls() {
                client.starttls(tls).await?;
            } else {
                tracing::warn!(host = %client.host, "server does not offer STARTTLS, continuing in plaintext");
            }
        }

        Ok(client)
    }

    /// Sends EHLO, falling back to HELO, and records the advertised capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHandshake`] if both are rejected.
    pub async fn handshake(&mut self) -> Result<&Handshake> {
        let ehlo = self
            .send(&Command::Ehlo {
                hostname: self.hello_name.clone(),
            })
            .await?;

        let reply = if ehlo.is_successful() {
            ehlo
        } else {
            tracing::debug!(code = %ehlo.code, "EHLO rejected, falling back to HELO");
            let helo = self
                .send(&Command::Helo {
                    hostname: self.hello_name.clone(),
                })
                .await?;
            if !helo.is_successful() {
                return Err(Error::MissingHandshake);
            }
            helo
        };

        self.server_info = Handshake::from_reply(&reply);
        Ok(&self.server_info)
    }

    /// Upgrades the connection with STARTTLS and repeats the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartTlsFailure`] if the server refuses or the TLS
    /// handshake fails, or a handshake error afterwards.
    pub async fn starttls(&mut self, tls: &TlsConfig) -> Result<()> {
        self.connection.start_tls(tls, &self.host).await?;
        self.handshake().await?;
        Ok(())
    }

    /// Capabilities from the most recent handshake.
    #[must_use]
    pub const fn server_info(&self) -> &Handshake {
        &self.server_info
    }

    /// Authenticates with PLAIN if the server advertises it, else LOGIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoginFailed`] if any step gets an unexpected reply.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.login_with(self.server_info.preferred_auth(), username, password)
            .await
    }

    /// Authenticates with the given mechanism.
    ///
    /// For [`AuthMechanism::XOAuth2`] the password is the access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoginFailed`] if any step gets an unexpected reply,
    /// and [`Error::UnsupportedAuth`] for CRAM-MD5 without writing anything.
    pub async fn login_with(
        &self,
        mechanism: AuthMechanism,
        username: &str,
        password: &str,
    ) -> Result<()> {
        tracing::debug!(%mechanism, "authenticating");

        match mechanism {
            AuthMechanism::Plain => {
                let credentials = format!("\0{username}\0{password}");
                self.send(&Command::Auth {
                    mechanism,
                    initial_response: Some(BASE64.encode(credentials)),
                })
                .await?
                .require_or(&[ReplyCode::AUTH_SUCCEEDED], login_failed)?;
            }
            AuthMechanism::Login => {
                self.send(&Command::Auth {
                    mechanism,
                    initial_response: None,
                })
                .await?
                .require_or(&[ReplyCode::AUTH_CHALLENGE], login_failed)?;
                self.send(&Command::AuthResponse(BASE64.encode(username)))
                    .await?
                    .require_or(&[ReplyCode::AUTH_CHALLENGE], login_failed)?;
                self.send(&Command::AuthResponse(BASE64.encode(password)))
                    .await?
                    .require_or(&[ReplyCode::AUTH_SUCCEEDED], login_failed)?;
            }
            AuthMechanism::XOAuth2 => return self.login_xoauth2(username, password).await,
            AuthMechanism::CramMd5 => return Err(Error::UnsupportedAuth(mechanism)),
        }

        tracing::info!(%mechanism, "authenticated");
        Ok(())
    }

    /// Authenticates with an `OAuth2` access token (XOAUTH2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoginFailed`] with the server's final code if the token is refused.
    pub async fn login_xoauth2(&self, username: &str, access_token: &str) -> Result<()> {
        let response = format!("user={username}\x01auth=Bearer {access_token}\x01\x01");
        let reply = self
            .send(&Command::Auth {
                mechanism: AuthMechanism::XOAuth2,
                initial_response: Some(BASE64.encode(response)),
            })
            .await?;

        // A refused token gets a 334 carrying error details; an empty
        // response makes the server send its final status.
        let reply = if reply.code == ReplyCode::AUTH_CHALLENGE {
            tracing::debug!(details = %reply.message_text(), "XOAUTH2 challenge");
            self.send(&Command::AuthResponse(String::new())).await?
        } else {
            reply
        };

        reply.require_or(&[ReplyCode::AUTH_SUCCEEDED], login_failed)?;
        tracing::info!(mechanism = %AuthMechanism::XOAuth2, "authenticated");
        Ok(())
    }

    /// Sends one mail: MAIL FROM, a RCPT TO per recipient, DATA and the message.
    ///
    /// Recipients are the mail's to, cc and bcc addresses. Bcc addresses only
    /// appear in the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] without starting a transaction if
    /// the rendered mail exceeds the server's advertised `SIZE`.
    /// Returns [`Error::CommandFailed`] for the first step the server rejects.
    /// The transaction is then reset so the connection can be reused.
    pub async fn send_mail(&self, mail: &Mail) -> Result<()> {
        let _transaction = self.transaction.lock().await;
        let recipients = mail.recipients();
        let data = mail.render();
        tracing::debug!(
            message_id = %mail.message_id,
            recipients = recipients.len(),
            size = data.len(),
            "sending mail"
        );

        if let Some(limit) = self
            .server_info
            .max_message_size()
            .filter(|&limit| data.len() > limit)
        {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                limit,
            });
        }

        self.send(&Command::MailFrom {
            from: mail.from.email.clone(),
        })
        .await?
        .require(&[ReplyCode::OK])?;

        if let Err(e) = self.transfer(data, &recipients).await {
            if !e.is_connection_fatal() {
                self.reset().await;
            }
            return Err(e);
        }

        tracing::info!(message_id = %mail.message_id, "mail accepted");
        Ok(())
    }

    /// Sends QUIT and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers QUIT with anything but 221.
    pub async fn quit(self) -> Result<()> {
        let reply = self.send(&Command::Quit).await;
        self.connection.close();
        match reply {
            Ok(reply) => reply.require(&[ReplyCode::CLOSING]).map(drop),
            Err(Error::EndOfStream) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sends a raw command and returns the server's reply, whatever its code.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn send(&self, command: &Command) -> Result<Reply> {
        self.connection.send_command(command).await
    }

    /// Underlying connection handle.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns true once the connection has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn transfer(&self, data: String, recipients: &[&str]) -> Result<()> {
        for recipient in recipients {
            self.send(&Command::RcptTo {
                to: (*recipient).to_owned(),
            })
            .await?
            .require(&[ReplyCode::OK, ReplyCode::WILL_FORWARD])?;
        }

        self.send(&Command::Data)
            .await?
            .require(&[ReplyCode::START_MAIL_INPUT])?;
        self.send(&Command::MailData(data))
            .await?
            .require(&[ReplyCode::OK])?;
        Ok(())
    }

    async fn reset(&self) {
        if let Err(e) = self.send(&Command::Rset).await {
            tracing::debug!(?e, "RSET after failed transaction failed");
        }
    }
}

async fn open(config: &Config) -> Result<SmtpStream> {
    match &config.security {
        Security::Insecure | Security::StartTls(_) => stream::connect(&config.host, config.port).await,
        Security::Tls(tls) => stream::connect_tls(&config.host, config.port, tls).await,
    }
}

fn login_failed(reply: &Reply) -> Error {
    Error::LoginFailed {
        code: reply.code.as_u16(),
        message: reply.message_text(),
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
    use mailwisp_mime::{Content, MailUser};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    /// Plays a server: writes `greeting`, then answers each received
    /// command (a whole message after an accepted DATA) with the next reply.
    async fn scripted_server(
        stream: DuplexStream,
        greeting: &'static str,
        replies: Vec<&'static str>,
    ) -> Vec<String> {
        let mut server = BufReader::new(stream);
        server.get_mut().write_all(greeting.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        let mut in_data = false;
        for reply in replies {
            let mut entry = String::new();
            loop {
                let mut line = String::new();
                if server.read_line(&mut line).await.unwrap() == 0 {
                    return received;
                }
                entry.push_str(&line);
                if !in_data || line == ".\r\n" {
                    break;
                }
            }
            in_data = entry == "DATA\r\n" && reply.starts_with("354");
            received.push(entry);
            server.get_mut().write_all(reply.as_bytes()).await.unwrap();
        }
        received
    }

    fn config(security: Security) -> Config {
        Config::builder("localhost")
            .security(security)
            .hello_name("client.test")
            .build()
    }

    fn start(
        security: Security,
        greeting: &'static str,
        replies: Vec<&'static str>,
    ) -> (
        impl std::future::Future<Output = Result<Client>>,
        JoinHandle<Vec<String>>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(scripted_server(server_io, greeting, replies));
        let config = config(security);
        let client = async move { Client::from_stream(SmtpStream::plain(client_io), &config).await };
        (client, server)
    }

    /// Connected insecure client whose server already answered EHLO.
    async fn connected(mut replies: Vec<&'static str>) -> (Client, JoinHandle<Vec<String>>) {
        replies.insert(0, "250-smtp.test\r\n250 AUTH LOGIN PLAIN\r\n");
        let (client, server) = start(Security::Insecure, "220 smtp.test ESMTP\r\n", replies);
        (client.await.unwrap(), server)
    }

    mod session_tests {
        use super::*;

        #[tokio::test]
        async fn test_greeting_and_ehlo() {
            let (client, server) = connected(vec![]).await;

            assert!(client.server_info().supports_auth(AuthMechanism::Plain));
            drop(client);
            assert_eq!(server.await.unwrap(), ["EHLO client.test\r\n"]);
        }

        #[tokio::test]
        async fn test_rejecting_greeting() {
            let (client, _server) = start(Security::Insecure, "554 go away\r\n", vec![]);
            assert!(matches!(
                client.await,
                Err(Error::CommandFailed { code: 554, .. })
            ));
        }

        #[tokio::test]
        async fn test_helo_fallback() {
            let (client, server) = start(
                Security::Insecure,
                "220 old.test\r\n",
                vec!["502 what\r\n", "250 old.test\r\n"],
            );
            let client = client.await.unwrap();

            assert!(client.server_info().capabilities.is_empty());
            drop(client);
            assert_eq!(
                server.await.unwrap(),
                ["EHLO client.test\r\n", "HELO client.test\r\n"]
            );
        }

        #[tokio::test]
        async fn test_missing_handshake() {
            let (client, _server) = start(
                Security::Insecure,
                "220 old.test\r\n",
                vec!["502 what\r\n", "500 no\r\n"],
            );
            assert!(matches!(client.await, Err(Error::MissingHandshake)));
        }

        #[tokio::test]
        async fn test_starttls_skipped_when_not_offered() {
            let (client, server) = start(
                Security::StartTls(TlsConfig::Default),
                "220 smtp.test\r\n",
                vec!["250-smtp.test\r\n250 8BITMIME\r\n", "221 bye\r\n"],
            );
            let client = client.await.unwrap();
            client.quit().await.unwrap();

            assert_eq!(
                server.await.unwrap(),
                ["EHLO client.test\r\n", "QUIT\r\n"]
            );
        }

        #[tokio::test]
        async fn test_starttls_refused() {
            let (client, server) = start(
                Security::StartTls(TlsConfig::Default),
                "220 smtp.test\r\n",
                vec!["250-smtp.test\r\n250 STARTTLS\r\n", "454 TLS unavailable\r\n"],
            );
            assert!(matches!(client.await, Err(Error::StartTlsFailure(_))));
            assert_eq!(server.await.unwrap()[1], "STARTTLS\r\n");
        }

        #[tokio::test]
        async fn test_quit() {
            let (client, server) = connected(vec!["221 bye\r\n"]).await;
            client.quit().await.unwrap();
            assert_eq!(server.await.unwrap()[1], "QUIT\r\n");
        }
    }

    mod login_tests {
        use super::*;

        #[tokio::test]
        async fn test_auto_prefers_plain() {
            let (client, server) = connected(vec!["235 ok\r\n"]).await;
            client.login("user", "pass").await.unwrap();

            drop(client);
            assert_eq!(server.await.unwrap()[1], "AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        }

        #[tokio::test]
        async fn test_login_mechanism() {
            let (client, server) =
                connected(vec!["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n", "235 ok\r\n"]).await;
            client
                .login_with(AuthMechanism::Login, "user", "pass")
                .await
                .unwrap();

            drop(client);
            assert_eq!(
                server.await.unwrap()[1..],
                ["AUTH LOGIN\r\n", "dXNlcg==\r\n", "cGFzcw==\r\n"]
            );
        }

        #[tokio::test]
        async fn test_login_unexpected_ok_stops_before_username() {
            let (client, server) = connected(vec!["250 sure\r\n"]).await;
            let result = client.login_with(AuthMechanism::Login, "user", "pass").await;

            assert!(matches!(result, Err(Error::LoginFailed { code: 250, .. })));
            drop(client);
            assert_eq!(server.await.unwrap()[1..], ["AUTH LOGIN\r\n"]);
        }

        #[tokio::test]
        async fn test_plain_rejected() {
            let (client, _server) = connected(vec!["535 bad credentials\r\n"]).await;
            let result = client.login("user", "wrong").await;
            assert!(matches!(result, Err(Error::LoginFailed { code: 535, .. })));
        }

        #[tokio::test]
        async fn test_cram_md5_unsupported() {
            let (client, server) = connected(vec![]).await;
            let result = client.login_with(AuthMechanism::CramMd5, "user", "pass").await;

            assert!(matches!(
                result,
                Err(Error::UnsupportedAuth(AuthMechanism::CramMd5))
            ));
            drop(client);
            assert_eq!(server.await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_xoauth2() {
            let (client, server) = connected(vec!["235 ok\r\n"]).await;
            client.login_xoauth2("user@example.com", "ya29.token").await.unwrap();

            drop(client);
            let expected = BASE64.encode("user=user@example.com\x01auth=Bearer ya29.token\x01\x01");
            assert_eq!(
                server.await.unwrap()[1],
                format!("AUTH XOAUTH2 {expected}\r\n")
            );
        }

        #[tokio::test]
        async fn test_xoauth2_refused_token() {
            let (client, server) = connected(vec!["334 eyJzdGF0dXMiOiI0MDEifQ==\r\n", "535 no\r\n"]).await;
            let result = client.login_xoauth2("user@example.com", "expired").await;

            assert!(matches!(result, Err(Error::LoginFailed { code: 535, .. })));
            drop(client);
            assert_eq!(server.await.unwrap()[2], "\r\n");
        }
    }

    mod send_mail_tests {
        use super::*;

        fn mail() -> Mail {
            Mail::new(
                MailUser::with_name("Sender", "sender@example.com"),
                ["a@example.com", "b@example.com"],
                "Report",
                Content::plain("Line one\r\n.dotted line"),
            )
            .cc("c@example.com")
            .bcc("hidden@example.com")
        }

        #[tokio::test]
        async fn test_full_transaction() {
            let (client, server) = connected(vec![
                "250 sender ok\r\n",
                "250 a ok\r\n",
                "251 b forwarded\r\n",
                "250 c ok\r\n",
                "250 hidden ok\r\n",
                "354 go ahead\r\n",
                "250 queued\r\n",
            ])
            .await;
            client.send_mail(&mail()).await.unwrap();

            drop(client);
            let received = server.await.unwrap();
            assert_eq!(
                received[1..6],
                [
                    "MAIL FROM: <sender@example.com> BODY=8BITMIME\r\n",
                    "RCPT TO: <a@example.com>\r\n",
                    "RCPT TO: <b@example.com>\r\n",
                    "RCPT TO: <c@example.com>\r\n",
                    "RCPT TO: <hidden@example.com>\r\n",
                ]
            );
            assert_eq!(received[6], "DATA\r\n");

            let data = &received[7];
            assert!(data.contains("Subject: =?utf-8?B?UmVwb3J0?=\r\n"));
            assert!(data.contains("Cc: <c@example.com>\r\n"));
            assert!(!data.contains("hidden@example.com"));
            assert!(data.contains("\r\n..dotted line"));
            assert!(data.ends_with("\r\n.\r\n"));
        }

        #[tokio::test]
        async fn test_rejected_recipient_resets() {
            let (client, server) = connected(vec![
                "250 sender ok\r\n",
                "550 no such user\r\n",
                "250 reset\r\n",
            ])
            .await;
            let result = client.send_mail(&mail()).await;

            assert!(matches!(result, Err(Error::CommandFailed { code: 550, .. })));
            assert!(!client.is_closed());
            drop(client);
            assert_eq!(
                server.await.unwrap()[2..],
                ["RCPT TO: <a@example.com>\r\n", "RSET\r\n"]
            );
        }

        #[tokio::test]
        async fn test_rejected_sender() {
            let (client, server) = connected(vec!["553 not allowed\r\n"]).await;
            let result = client.send_mail(&mail()).await;

            assert!(matches!(result, Err(Error::CommandFailed { code: 553, .. })));
            drop(client);
            assert_eq!(server.await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_oversized_mail_not_started() {
            let (client, server) = start(
                Security::Insecure,
                "220 smtp.test ESMTP\r\n",
                vec!["250-smtp.test\r\n250 SIZE 512\r\n"],
            );
            let client = client.await.unwrap();
            let mut big = mail();
            big.content = Content::plain("x".repeat(1024));

            let result = client.send_mail(&big).await;
            assert!(matches!(
                result,
                Err(Error::MessageTooLarge { limit: 512, size }) if size > 1024
            ));
            assert!(!client.is_closed());
            drop(client);
            assert_eq!(server.await.unwrap(), ["EHLO client.test\r\n"]);
        }

        #[tokio::test]
        async fn test_data_refused() {
            let (client, _server) = connected(vec![
                "250 sender ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "451 try later\r\n",
                "250 reset\r\n",
            ])
            .await;
            let result = client.send_mail(&mail()).await;
            assert!(result.unwrap_err().is_transient());
        }
    }
}
