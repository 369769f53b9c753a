//! Resilient mail sender.
//!
//! A [`Sender`] owns at most one SMTP connection and feeds it mails from a
//! queue, one at a time. When the connection fails it waits for the backoff
//! period and connects again; queued mails wait meanwhile. Every new
//! connection runs a [`ConnectHook`] first, typically to log in.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mailwisp_mime::Mail;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{Client, Config, shutdown_requested};
use crate::error::{Error, Result};
use crate::types::AuthMechanism;

/// Setup run on every new connection before mail is sent over it.
pub trait ConnectHook: Send + Sync + 'static {
    /// Prepares a freshly connected client. An error drops the connection
    /// and triggers a reconnect after the backoff.
    fn on_connect(&self, client: &mut Client) -> impl Future<Output = Result<()>> + Send;
}

/// No setup.
impl ConnectHook for () {
    async fn on_connect(&self, _client: &mut Client) -> Result<()> {
        Ok(())
    }
}

/// Username and password to log in with on every connection.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password, or access token for XOAUTH2.
    pub password: String,
    /// Mechanism to use. `None` picks PLAIN if advertised, else LOGIN.
    pub mechanism: Option<AuthMechanism>,
}

impl Credentials {
    /// Creates credentials using the automatically chosen mechanism.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mechanism: None,
        }
    }

    /// Forces a mechanism.
    #[must_use]
    pub const fn mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.mechanism = Some(mechanism);
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

impl ConnectHook for Credentials {
    async fn on_connect(&self, client: &mut Client) -> Result<()> {
        match self.mechanism {
            Some(mechanism) => {
                client
                    .login_with(mechanism, &self.username, &self.password)
                    .await
            }
            None => client.login(&self.username, &self.password).await,
        }
    }
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Server to send through.
    pub connection: Config,
    /// Wait between a connection failure and the next attempt.
    pub backoff: Duration,
}

impl SenderConfig {
    /// Default wait between reconnect attempts.
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

    /// Creates a configuration with the default backoff.
    #[must_use]
    pub const fn new(connection: Config) -> Self {
        Self {
            connection,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }

    /// Sets the reconnect backoff.
    #[must_use]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

struct Submission {
    mail: Mail,
    done: oneshot::Sender<Result<()>>,
}

/// Handle for submitting mail to a running [`Sender`].
#[derive(Debug, Clone)]
pub struct SenderHandle {
    queue: mpsc::UnboundedSender<Submission>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SenderHandle {
    /// Queues a mail and waits until the server accepted or rejected it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] once the sender stopped,
    /// [`Error::Cancelled`] if it stopped before this mail was sent, or the
    /// error of the failed transaction.
    pub async fn send_mail(&self, mail: Mail) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.queue
            .send(Submission { mail, done })
            .map_err(|_| Error::NotRunning)?;
        result.await.map_err(|_| Error::Cancelled)?
    }

    /// Stops the sender. Queued mails and the mail in flight fail with
    /// [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true while the sender accepts mail.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }
}

/// Background mail sender with automatic reconnects.
pub struct Sender<H = ()> {
    config: SenderConfig,
    hook: H,
    queue: mpsc::UnboundedReceiver<Submission>,
    shutdown: watch::Receiver<bool>,
}

impl<H: ConnectHook> Sender<H> {
    /// Creates a sender and the handle that feeds it. Nothing happens until
    /// [`Sender::run`] is polled.
    #[must_use]
    pub fn new(config: SenderConfig, hook: H) -> (Self, SenderHandle) {
        let (queue_tx, queue) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let sender = Self {
            config,
            hook,
            queue,
            shutdown,
        };
        let handle = SenderHandle {
            queue: queue_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (sender, handle)
    }

    /// Creates a sender and runs it on a new task.
    #[must_use]
    pub fn spawn(config: SenderConfig, hook: H) -> (SenderHandle, JoinHandle<()>) {
        let (sender, handle) = Self::new(config, hook);
        (handle, tokio::spawn(sender.run()))
    }

    /// Serves the queue until shut down or every handle is dropped.
    pub async fn run(self) {
        let Self {
            config,
            hook,
            mut queue,
            mut shutdown,
        } = self;
        tracing::info!(host = %config.connection.host, "mail sender started");

        loop {
            let outcome = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                outcome = serve(&config.connection, &hook, &mut queue) => outcome,
            };

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(?e, backoff = ?config.backoff, "SMTP connection lost, reconnecting");
                }
            }

            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                () = tokio::time::sleep(config.backoff) => {}
            }
        }

        queue.close();
        while let Some(submission) = queue.recv().await {
            let _ = submission.done.send(Err(Error::Cancelled));
        }
        tracing::info!("mail sender stopped");
    }
}

/// Runs one connection until it fails. Returns `Ok` once the queue is closed.
async fn serve<H: ConnectHook>(
    config: &Config,
    hook: &H,
    queue: &mut mpsc::UnboundedReceiver<Submission>,
) -> Result<()> {
    let mut client = Client::connect(config).await?;
    hook.on_connect(&mut client).await?;
    tracing::debug!("SMTP connection ready");

    while let Some(Submission { mail, done }) = queue.recv().await {
        let result = client.send_mail(&mail).await;
        let lost = match &result {
            Err(e) if e.is_connection_fatal() || client.is_closed() => Some(e.clone()),
            _ => None,
        };
        if let Err(e) = &result {
            tracing::warn!(?e, message_id = %mail.message_id, "mail not sent");
        }
        let _ = done.send(result);

        if let Some(e) = lost {
            return Err(e);
        }
    }

    client.quit().await
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
    use crate::connection::Security;
    use mailwisp_mime::Content;
    use tokio::net::TcpListener;

    /// Config pointing at a local port nobody listens on.
    async fn unreachable(backoff: Duration) -> SenderConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connection = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::Insecure)
            .build();
        SenderConfig::new(connection).backoff(backoff)
    }

    fn mail() -> Mail {
        Mail::new("a@example.com", ["b@example.com"], "Hi", Content::plain("x"))
    }

    #[test]
    fn test_default_backoff() {
        let config = SenderConfig::new(Config::new("smtp.example.com"));
        assert_eq!(config.backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("user", "hunter2").mechanism(AuthMechanism::Login);
        let debug = format!("{credentials:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiting_mail() {
        let (handle, task) = Sender::spawn(unreachable(Duration::from_secs(60)).await, ());

        let pending = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.send_mail(mail()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.shutdown();
        task.await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
        assert!(!handle.is_running());
        assert!(matches!(handle.send_mail(mail()).await, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_sender() {
        let (handle, task) = Sender::spawn(unreachable(Duration::from_secs(60)).await, ());
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
