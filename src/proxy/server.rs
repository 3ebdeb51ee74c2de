use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;

use crate::common::auth::Credentials;
use crate::common::config::Config;
use crate::common::observer::SessionObserver;
use crate::proxy::session;

/// Accept loop: one detached task per connection, nothing shared between
/// them but the immutable configuration.
pub struct Trampoline {
    config: Arc<Config>,
    credentials: Arc<Credentials>,
    observer: Arc<dyn SessionObserver>,
}

impl Trampoline {
    pub fn new(config: Arc<Config>, observer: Arc<dyn SessionObserver>) -> Self {
        let credentials = Arc::new(Credentials::new(&config.username, &config.password));
        Trampoline {
            config,
            credentials,
            observer,
        }
    }

    /// Accept connections until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        match listener.local_addr() {
            Ok(addr) => info!("Trampoline listening on {}", addr),
            Err(e) => error!("Listener has no local address: {}", e),
        }

        let mut incoming = TcpListenerStream::new(listener);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                next = incoming.next() => {
                    match next {
                        Some(Ok(stream)) => self.dispatch(stream),
                        Some(Err(e)) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        None => break,
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Stopped accepting new connections");
    }

    fn dispatch(&self, stream: TcpStream) {
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                error!("Dropping connection without peer address: {}", e);
                return;
            }
        };

        let config = self.config.clone();
        let credentials = self.credentials.clone();
        let observer = self.observer.clone();
        observer.session_opened(peer);
        task::spawn(async move {
            let report = session::serve(stream, peer, &config, &credentials).await;
            observer.session_closed(&report);
        });
    }
}
