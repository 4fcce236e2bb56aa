//! Provider registry facade and its serializer worker.
//!
//! Every state-touching operation (`add_provider`, `get_providers`, and the
//! expiry sweep) funnels through one worker task fed by a command channel.
//! Channel admission order is the total order all callers observe: the worker
//! finishes one command, including its datastore awaits, before taking the
//! next, so the cache and the backend are never observed mid-mutation.
//!
//! `start` and `stop` only arm and disarm the sweep ticker. Operations
//! submitted before `start` (or after `stop`) are still served; they simply
//! run without background expiry.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cache::PeerMap;
use crate::cache::ProviderCache;
use crate::clock::Clock;
use crate::codec;
use crate::config::RegistryConfig;
use crate::datastore::Datastore;
use crate::error::BackendSnafu;
use crate::error::RegistryError;
use crate::error::Result;
use crate::keys;
use crate::sweep;
use crate::sweep::SweepOutcome;
use crate::types::ContentId;
use crate::types::PeerId;

/// Depth of the command channel feeding the worker.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Commands admitted through the serializer, in channel order.
enum Command {
    AddProvider {
        cid: ContentId,
        peer: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    GetProviders {
        cid: ContentId,
        reply: oneshot::Sender<Result<Vec<PeerId>>>,
    },
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    #[cfg(test)]
    Sweep {
        reply: oneshot::Sender<Result<SweepOutcome>>,
    },
}

/// Handle to the provider registry.
///
/// Remembers which peers claim to serve which content, persists the claims
/// in the backing [`Datastore`], and expires them after the configured
/// validity. Handles are cheap to clone and usable from any task; all clones
/// feed the same worker.
#[derive(Clone)]
pub struct ProviderRegistry {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl ProviderRegistry {
    /// Spawn the registry worker over a datastore and clock.
    ///
    /// No sweeps are scheduled until [`start`](Self::start) is called.
    /// Returns the handle and the worker's join handle; cancel with
    /// [`shutdown`](Self::shutdown) and await the join handle for a clean
    /// exit.
    pub fn spawn(
        datastore: Arc<dyn Datastore>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        let capacity = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        let worker = Worker {
            datastore,
            clock,
            cache: ProviderCache::new(capacity),
            cleanup_interval: config.cleanup_interval,
            provide_validity: config.provide_validity,
            ticker: None,
        };

        let task = tokio::spawn(worker.run(command_rx, cancel.clone()));

        (
            Self {
                commands: command_tx,
                cancel,
            },
            task,
        )
    }

    /// Begin periodic expiry sweeps. Idempotent.
    ///
    /// The first sweep runs one full `cleanup_interval` after this call.
    pub async fn start(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Start { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Stop scheduling expiry sweeps. Idempotent.
    ///
    /// An in-flight sweep runs to completion because it occupies the
    /// serializer slot, but no further sweeps fire. `add_provider` and
    /// `get_providers` continue to be served.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Record that `peer` claims to serve `cid`.
    ///
    /// Re-providing is not an error: the existing record's timestamp is
    /// refreshed in place, which is how honest providers keep their claims
    /// alive.
    pub async fn add_provider(&self, cid: &ContentId, peer: &PeerId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::AddProvider {
                cid: cid.clone(),
                peer: peer.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;

        reply_rx.await.map_err(|_| RegistryError::Shutdown)?
    }

    /// List the peers currently claiming to serve `cid`.
    ///
    /// An unknown cid yields the empty list, not an error. Order is
    /// unspecified but stable within one call. No internal timeout is
    /// imposed; abandoning the returned future does not cancel work already
    /// admitted to the serializer.
    pub async fn get_providers(&self, cid: &ContentId) -> Result<Vec<PeerId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::GetProviders {
                cid: cid.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;

        reply_rx.await.map_err(|_| RegistryError::Shutdown)?
    }

    /// Run one sweep immediately through the serializer.
    #[cfg(test)]
    pub(crate) async fn trigger_sweep(&self) -> Result<SweepOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Sweep { reply: reply_tx })
            .await
            .map_err(|_| RegistryError::Shutdown)?;

        reply_rx.await.map_err(|_| RegistryError::Shutdown)?
    }

    /// Terminate the worker task.
    ///
    /// Commands still queued when the cancellation lands are dropped; their
    /// callers observe [`RegistryError::Shutdown`]. Await the join handle
    /// returned by [`spawn`](Self::spawn) to synchronize with the exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The serializer: owns the cache and runs one command at a time.
struct Worker {
    datastore: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
    cache: ProviderCache,
    cleanup_interval: Duration,
    provide_validity: Duration,
    ticker: Option<Interval>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        info!(
            cleanup_interval_ms = self.cleanup_interval.as_millis() as u64,
            provide_validity_ms = self.provide_validity.as_millis() as u64,
            "provider registry worker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },

                _ = Self::next_tick(&mut self.ticker) => {
                    if let Err(err) = self.sweep_once().await {
                        warn!(error = %err, "scheduled provider sweep failed; retrying next tick");
                    }
                }
            }
        }

        info!("provider registry worker stopped");
    }

    /// Resolves on the next sweep tick, or never while the sweeper is stopped.
    async fn next_tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::AddProvider { cid, peer, reply } => {
                let _ = reply.send(self.add_provider(&cid, &peer).await);
            }
            Command::GetProviders { cid, reply } => {
                let _ = reply.send(self.get_providers(&cid).await);
            }
            Command::Start { reply } => {
                self.start_sweeper();
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop_sweeper();
                let _ = reply.send(());
            }
            #[cfg(test)]
            Command::Sweep { reply } => {
                let _ = reply.send(self.sweep_once().await);
            }
        }
    }

    fn start_sweeper(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + self.cleanup_interval, self.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(interval);
        info!(interval_ms = self.cleanup_interval.as_millis() as u64, "provider sweeper started");
    }

    fn stop_sweeper(&mut self) {
        if self.ticker.take().is_some() {
            info!("provider sweeper stopped");
        }
    }

    async fn add_provider(&mut self, cid: &ContentId, peer: &PeerId) -> Result<()> {
        let cid_text = cid.text();
        let mut peers = match self.cache.get(&cid_text) {
            Some(map) => map.clone(),
            None => self.load_peer_map(cid).await?,
        };

        let now = self.clock.now_ms();
        peers.insert(peer.text(), now);
        self.cache.put(cid_text, peers);

        let key = keys::record_key(cid, peer);
        self.datastore
            .put(&key, codec::encode_timestamp(now))
            .await
            .context(BackendSnafu)?;
        debug!(key = %key, timestamp_ms = now, "provider record written");
        Ok(())
    }

    async fn get_providers(&mut self, cid: &ContentId) -> Result<Vec<PeerId>> {
        let cid_text = cid.text();
        let peers = match self.cache.get(&cid_text) {
            Some(map) => map.clone(),
            None => {
                let map = self.load_peer_map(cid).await?;
                self.cache.put(cid_text, map.clone());
                map
            }
        };

        Ok(peers.keys().filter_map(|text| PeerId::from_text(text)).collect())
    }

    /// Materialize a cid's peer map from a backend prefix scan.
    async fn load_peer_map(&self, cid: &ContentId) -> Result<PeerMap> {
        // The trailing slash keeps sibling cids whose text extends this one
        // out of the scan.
        let prefix = format!("{}/", keys::cid_prefix(cid));
        let mut map = PeerMap::new();

        let mut scan = self.datastore.query(&prefix);
        while let Some(item) = scan.next().await {
            let (key, value) = item.context(BackendSnafu)?;

            let peer_text = match keys::parse_key(&key) {
                Ok((_, peer_text)) => peer_text,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unparseable provider key");
                    continue;
                }
            };
            if PeerId::from_text(peer_text).is_none() {
                warn!(key = %key, "skipping provider key with non-canonical peer id");
                continue;
            }

            match codec::decode_timestamp(&value) {
                Ok(timestamp) => {
                    map.insert(peer_text.to_string(), timestamp);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping provider record with undecodable timestamp");
                }
            }
        }

        Ok(map)
    }

    async fn sweep_once(&mut self) -> Result<SweepOutcome> {
        sweep::sweep_expired(
            self.datastore.as_ref(),
            &mut self.cache,
            self.clock.as_ref(),
            self.provide_validity,
        )
        .await
        .context(BackendSnafu)
    }
}
