//! Certificate rotation supervisor.
//!
//! Keeps one listener alive per certificate epoch. Each epoch gets a child
//! of the outer cancellation token; a new certificate cancels only that
//! child, waits for the listener to drain, and starts the next epoch.
//!
//! The listener future is not spawned. actix servers are not `Send`, so the
//! supervisor drives `serve` inline on its own task through a biased
//! three-way `select!` over outer cancellation, listener completion and the
//! next credential, then keeps polling the same pinned future to drain it.
//!
//! ```text
//! AwaitingFirst --cert--> Serving --cert--> Draining --> Serving
//!       |                    |                  |
//!       +-- outer cancel ----+--> Terminated <--+-- source closed (error)
//! ```

use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::tls::{CredentialError, CredentialSource, TlsCredential};

#[derive(Debug, Error)]
pub enum ListenerError {
    /// The epoch token was cancelled and the listener stopped as asked
    #[error("listener stopped by cancellation")]
    Cancelled,

    #[error("invalid TLS credential: {0}")]
    InvalidCredential(#[source] rustls::Error),

    #[error("listener failed: {0}")]
    Fatal(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("credential source closed before producing a certificate")]
    NoCertificateAvailable(#[source] Option<CredentialError>),

    #[error("credential source exited while serving")]
    CredentialSourceExited(#[source] Option<CredentialError>),

    #[error("listener failed: {0}")]
    ListenerFatal(#[source] std::io::Error),

    #[error("listener exited without being stopped")]
    ListenerExited,

    #[error("invalid TLS credential: {0}")]
    InvalidCredential(#[source] rustls::Error),
}

/// Something that can serve HTTPS with one credential until told to stop.
///
/// `serve` must return `Err(ListenerError::Cancelled)` (or `Ok`) once `epoch`
/// is cancelled and in-flight work has drained, and must bound that drain by
/// its own deadline rather than by any cancellation token.
#[async_trait(?Send)]
pub trait EpochListener {
    async fn serve(&self, credential: TlsCredential, epoch: CancellationToken) -> Result<(), ListenerError>;
}

enum Exit {
    Shutdown,
    NoCertificate,
    SourceExited,
    Failed(RotationError),
}

enum Event {
    Shutdown,
    ListenerDone(Result<(), ListenerError>),
    Credential(Option<TlsCredential>),
}

pub struct RotationSupervisor<L> {
    listener: L,
}

impl<L: EpochListener> RotationSupervisor<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Serve until `outer` is cancelled (`Ok`) or something fatal happens.
    pub async fn run(&self, outer: CancellationToken, mut source: CredentialSource) -> Result<(), RotationError> {
        let exit = self.rotate(&outer, &mut source).await;
        let producer = source.wait().await;

        match exit {
            Exit::Shutdown => {
                if let Err(e) = producer {
                    warn!("Credential source ended with an error during shutdown: {}", e);
                }
                info!("Rotation supervisor stopped");
                Ok(())
            }
            Exit::NoCertificate => {
                error!("Credential source closed before producing a certificate");
                Err(RotationError::NoCertificateAvailable(producer.err()))
            }
            Exit::SourceExited => {
                error!("Credential source exited while serving");
                Err(RotationError::CredentialSourceExited(producer.err()))
            }
            Exit::Failed(e) => {
                error!("Rotation supervisor failed: {}", e);
                Err(e)
            }
        }
    }

    async fn rotate(&self, outer: &CancellationToken, source: &mut CredentialSource) -> Exit {
        info!("Awaiting first certificate");
        let mut current = tokio::select! {
            biased;
            _ = outer.cancelled() => return Exit::Shutdown,
            credential = source.recv() => match credential {
                Some(credential) => credential,
                None => return Exit::NoCertificate,
            },
        };

        let mut epoch_number: u64 = 0;
        loop {
            epoch_number += 1;
            let epoch = outer.child_token();
            info!("Serving certificate {} (epoch {})", current, epoch_number);

            let serve = self.listener.serve(current, epoch.clone());
            tokio::pin!(serve);

            let event = tokio::select! {
                biased;
                _ = outer.cancelled() => Event::Shutdown,
                result = &mut serve => Event::ListenerDone(result),
                credential = source.recv() => Event::Credential(credential),
            };

            let next = match event {
                Event::Shutdown => {
                    // The epoch is a child of `outer` and is already cancelled.
                    match serve.await {
                        Ok(()) | Err(ListenerError::Cancelled) => {}
                        Err(e) => warn!("Listener error while shutting down: {}", e),
                    }
                    return Exit::Shutdown;
                }
                Event::ListenerDone(result) => {
                    return match result {
                        Err(ListenerError::Fatal(e)) => Exit::Failed(RotationError::ListenerFatal(e)),
                        Err(ListenerError::InvalidCredential(e)) => Exit::Failed(RotationError::InvalidCredential(e)),
                        Ok(()) | Err(ListenerError::Cancelled) => Exit::Failed(RotationError::ListenerExited),
                    };
                }
                Event::Credential(next) => next,
            };

            debug!("Draining epoch {}", epoch_number);
            epoch.cancel();
            match serve.await {
                Ok(()) | Err(ListenerError::Cancelled) => debug!("Epoch {} drained", epoch_number),
                Err(ListenerError::Fatal(e)) => return Exit::Failed(RotationError::ListenerFatal(e)),
                Err(ListenerError::InvalidCredential(e)) => {
                    return Exit::Failed(RotationError::InvalidCredential(e))
                }
            }

            match next {
                Some(credential) => {
                    info!("Rotating to certificate {}", credential);
                    current = credential;
                }
                None => return Exit::SourceExited,
            }
        }
    }
}
