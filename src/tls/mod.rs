//! TLS credentials and the sources that supply them.
//!
//! A `CredentialSource` is an ordered stream of `TlsCredential`s fed by a
//! producer task (a certificate command, a pair of PEM files, or an
//! in-process channel). The rotation supervisor consumes it.

pub mod listener;
pub mod supervisor;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use notify::{RecursiveMode, Watcher};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{TlsConfig, TlsMode};

/// Credentials buffered between producer and supervisor
const CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no certificate found in PEM data")]
    MissingCertificate,

    #[error("no private key found in PEM data")]
    MissingKey,

    #[error("malformed credential message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("certificate command exited with {0}")]
    CommandFailed(ExitStatus),

    #[error("certificate command has no stdout")]
    NoStdout,

    #[error("watching certificate files failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("credential producer panicked: {0}")]
    Producer(String),
}

/// A certificate chain, its key and the validity window reported by the source
pub struct TlsCredential {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl TlsCredential {
    /// Parse a PEM certificate chain and a PEM private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CredentialError> {
        let cert_chain = rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<Vec<_>, _>>()?;
        if cert_chain.is_empty() {
            return Err(CredentialError::MissingCertificate);
        }
        let key = rustls_pemfile::private_key(&mut &key_pem[..])?.ok_or(CredentialError::MissingKey)?;

        Ok(Self { cert_chain, key, not_before: None, not_after: None })
    }

    pub fn with_validity(mut self, not_before: Option<DateTime<Utc>>, not_after: Option<DateTime<Utc>>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Hex SHA-256 of the leaf certificate
    pub fn fingerprint(&self) -> String {
        match self.cert_chain.first() {
            Some(leaf) => hex::encode(Sha256::digest(leaf.as_ref())),
            None => String::new(),
        }
    }

    /// Build a rustls server configuration around this credential.
    pub fn server_config(&self) -> Result<rustls::ServerConfig, rustls::Error> {
        rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
    }
}

impl fmt::Debug for TlsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredential")
            .field("fingerprint", &self.fingerprint())
            .field("chain_len", &self.cert_chain.len())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl fmt::Display for TlsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fingerprint = self.fingerprint();
        write!(f, "{}", &fingerprint[..fingerprint.len().min(16)])?;
        if let Some(not_after) = self.not_after {
            write!(f, " valid until {}", not_after.to_rfc3339())?;
        }
        Ok(())
    }
}

/// One line printed by a certificate command
#[derive(Debug, Deserialize)]
struct CredentialMessage {
    cert_pem: String,
    key_pem: String,
    #[serde(default)]
    not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    not_after: Option<DateTime<Utc>>,
}

impl CredentialMessage {
    fn parse(line: &str) -> Result<TlsCredential, CredentialError> {
        let message: CredentialMessage = serde_json::from_str(line)?;
        Ok(TlsCredential::from_pem(message.cert_pem.as_bytes(), message.key_pem.as_bytes())?
            .with_validity(message.not_before, message.not_after))
    }
}

/// Ordered stream of credentials plus the task producing them
pub struct CredentialSource {
    receiver: mpsc::Receiver<TlsCredential>,
    producer: Option<JoinHandle<Result<(), CredentialError>>>,
    stop: CancellationToken,
}

impl CredentialSource {
    /// In-process source: whatever is sent on the returned sender, in order.
    /// The stream closes when every sender is dropped.
    pub fn channel(capacity: usize) -> (mpsc::Sender<TlsCredential>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        let source = Self { receiver, producer: None, stop: CancellationToken::new() };
        (sender, source)
    }

    /// Run `command` through the shell and read one JSON credential per line.
    pub fn from_command(command: &str) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let producer = tokio::spawn(run_command(command.to_string(), sender, stop.clone()));
        Self { receiver, producer: Some(producer), stop }
    }

    /// Load a PEM pair, then reload it whenever either file changes.
    ///
    /// After a change the reload waits `settle` so that a writer replacing
    /// both files is picked up as one credential.
    pub fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>, settle: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let producer = tokio::spawn(watch_files(
            cert_path.as_ref().to_path_buf(),
            key_path.as_ref().to_path_buf(),
            settle,
            sender,
            stop.clone(),
        ));
        Self { receiver, producer: Some(producer), stop }
    }

    /// Source described by the configuration; `None` when TLS is off.
    pub fn from_config(config: &TlsConfig) -> Option<Self> {
        match config.mode {
            TlsMode::None => None,
            TlsMode::Files => Some(Self::from_files(
                &config.cert_path,
                &config.key_path,
                Duration::from_millis(config.settle_millis),
            )),
            TlsMode::Command => Some(Self::from_command(&config.command)),
        }
    }

    /// Next credential, or `None` once the producer is done. Cancel safe.
    pub async fn recv(&mut self) -> Option<TlsCredential> {
        self.receiver.recv().await
    }

    /// Stop the producer and wait for it, returning its terminal error.
    pub async fn wait(mut self) -> Result<(), CredentialError> {
        self.stop.cancel();
        self.receiver.close();
        match self.producer.take() {
            Some(producer) => producer
                .await
                .map_err(|e| CredentialError::Producer(e.to_string()))?,
            None => Ok(()),
        }
    }
}

async fn send_or_stop(
    sender: &mpsc::Sender<TlsCredential>,
    credential: TlsCredential,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        sent = sender.send(credential) => sent.is_ok(),
    }
}

async fn run_command(
    command: String,
    sender: mpsc::Sender<TlsCredential>,
    stop: CancellationToken,
) -> Result<(), CredentialError> {
    info!("Starting certificate command: {}", command);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child.stdout.take().ok_or(CredentialError::NoStdout)?;
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => {
                child.kill().await?;
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let line = match line {
            Some(line) => line,
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match CredentialMessage::parse(&line) {
            Ok(credential) => {
                info!("Certificate command produced {}", credential);
                if !send_or_stop(&sender, credential, &stop).await {
                    child.kill().await?;
                    return Ok(());
                }
            }
            Err(e) => warn!("Ignoring output line of certificate command: {}", e),
        }
    }

    // Stdout is closed but the command may linger.
    let waited = tokio::select! {
        _ = stop.cancelled() => None,
        status = child.wait() => Some(status),
    };
    let status = match waited {
        Some(status) => status?,
        None => {
            child.kill().await?;
            return Ok(());
        }
    };
    if status.success() {
        info!("Certificate command exited");
        Ok(())
    } else {
        Err(CredentialError::CommandFailed(status))
    }
}

async fn read_pem_pair(cert_path: &Path, key_path: &Path) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let cert = tokio::fs::read(cert_path).await?;
    let key = tokio::fs::read(key_path).await?;
    Ok((cert, key))
}

/// Directory to watch for changes to `path`
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn watch_files(
    cert_path: PathBuf,
    key_path: PathBuf,
    settle: Duration,
    sender: mpsc::Sender<TlsCredential>,
    stop: CancellationToken,
) -> Result<(), CredentialError> {
    // Watch before the first load so no change slips in between.
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let _ = events_tx.send(event);
    })?;
    let cert_dir = watch_dir(&cert_path);
    let key_dir = watch_dir(&key_path);
    watcher.watch(&cert_dir, RecursiveMode::NonRecursive)?;
    if key_dir != cert_dir {
        watcher.watch(&key_dir, RecursiveMode::NonRecursive)?;
    }

    let mut loaded = read_pem_pair(&cert_path, &key_path).await?;
    let credential = TlsCredential::from_pem(&loaded.0, &loaded.1)?;
    info!("Loaded certificate {} from {}", credential, cert_path.display());
    if !send_or_stop(&sender, credential, &stop).await {
        return Ok(());
    }

    let watched_names = [cert_path.file_name(), key_path.file_name()];
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            event = events.recv() => event,
        };
        match event {
            None => return Ok(()),
            Some(Err(e)) => {
                warn!("Certificate file watch error: {}", e);
                continue;
            }
            Some(Ok(event)) => {
                let touched = !event.kind.is_access()
                    && event.paths.iter().any(|p| watched_names.contains(&p.file_name()));
                if !touched {
                    continue;
                }
                debug!("Certificate files changed: {:?}", event.kind);
            }
        }

        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = tokio::time::sleep(settle) => {}
        }
        while events.try_recv().is_ok() {}

        let pair = match read_pem_pair(&cert_path, &key_path).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Keeping current certificate, reload failed: {}", e);
                continue;
            }
        };
        if pair == loaded {
            continue;
        }
        match TlsCredential::from_pem(&pair.0, &pair.1) {
            Ok(credential) => {
                info!("Reloaded certificate {} from {}", credential, cert_path.display());
                loaded = pair;
                if !send_or_stop(&sender, credential, &stop).await {
                    return Ok(());
                }
            }
            Err(e) => warn!("Keeping current certificate, reload failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(name: &str) -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn test_credential_from_pem() {
        let (cert, key) = self_signed("media.example");
        let credential = TlsCredential::from_pem(cert.as_bytes(), key.as_bytes()).unwrap();
        assert_eq!(credential.cert_chain.len(), 1);
        assert_eq!(credential.fingerprint().len(), 64);
        assert!(credential.server_config().is_ok());
    }

    #[test]
    fn test_credential_from_bad_pem() {
        let (cert, _) = self_signed("media.example");
        assert!(matches!(
            TlsCredential::from_pem(b"", b""),
            Err(CredentialError::MissingCertificate)
        ));
        assert!(matches!(
            TlsCredential::from_pem(cert.as_bytes(), b"nothing here"),
            Err(CredentialError::MissingKey)
        ));
    }

    #[test]
    fn test_credential_message() {
        let (cert, key) = self_signed("media.example");
        let line = serde_json::json!({
            "cert_pem": cert,
            "key_pem": key,
            "not_after": "2030-01-01T00:00:00Z",
        })
        .to_string();

        let credential = CredentialMessage::parse(&line).unwrap();
        assert_eq!(credential.not_after.map(|t| t.timestamp()), Some(1_893_456_000));
        assert!(credential.not_before.is_none());
        assert!(matches!(CredentialMessage::parse("{}"), Err(CredentialError::Message(_))));
    }

    #[tokio::test]
    async fn test_channel_source_closes() {
        let (cert, key) = self_signed("media.example");
        let (sender, mut source) = CredentialSource::channel(1);
        sender
            .send(TlsCredential::from_pem(cert.as_bytes(), key.as_bytes()).unwrap())
            .await
            .unwrap();
        drop(sender);

        assert!(source.recv().await.is_some());
        assert!(source.recv().await.is_none());
        assert!(source.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_source() {
        let (cert, key) = self_signed("media.example");
        let line = serde_json::json!({ "cert_pem": cert, "key_pem": key }).to_string();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cert.json");
        std::fs::write(&path, format!("not json\n{}\n", line)).unwrap();

        let mut source = CredentialSource::from_command(&format!("cat {}", path.display()));
        assert!(source.recv().await.is_some());
        assert!(source.recv().await.is_none());
        assert!(source.wait().await.is_ok());

        let mut failing = CredentialSource::from_command("exit 3");
        assert!(failing.recv().await.is_none());
        assert!(matches!(failing.wait().await, Err(CredentialError::CommandFailed(_))));
    }

    #[tokio::test]
    async fn test_file_source() {
        let (cert, key) = self_signed("media.example");
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();

        let mut source = CredentialSource::from_files(&cert_path, &key_path, Duration::from_millis(10));
        assert!(source.recv().await.is_some());
        assert!(source.wait().await.is_ok());

        let mut missing = CredentialSource::from_files(dir.path().join("nope.pem"), &key_path, Duration::from_millis(10));
        assert!(missing.recv().await.is_none());
        assert!(matches!(missing.wait().await, Err(CredentialError::Io(_))));
    }

    #[tokio::test]
    async fn test_file_source_reloads_on_change() {
        let (cert, key) = self_signed("a.media.example");
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();

        let mut source = CredentialSource::from_files(&cert_path, &key_path, Duration::from_millis(100));
        let first = tokio::time::timeout(Duration::from_secs(5), source.recv()).await.unwrap().unwrap();

        let (cert, key) = self_signed("b.media.example");
        std::fs::write(&key_path, key).unwrap();
        std::fs::write(&cert_path, cert).unwrap();

        // A reload may land between the two writes; wait for the new leaf.
        let second = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let next = source.recv().await.unwrap();
                if next.fingerprint() != first.fingerprint() {
                    return next;
                }
            }
        })
        .await
        .unwrap();
        assert!(second.server_config().is_ok());
        assert!(source.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_lingering_command_is_stopped() {
        let mut source = CredentialSource::from_command("exec 1>&-; sleep 20");
        assert!(tokio::time::timeout(Duration::from_millis(300), source.recv()).await.is_err());

        let waited = tokio::time::timeout(Duration::from_secs(5), source.wait()).await;
        assert!(matches!(waited, Ok(Ok(()))));
    }
}
