//! The scoped engine connection compositions are resolved through.
//!
//! A [`Client`] owns one engine connection. Clones share it; the connection
//! is closed exactly once, either explicitly through [`Client::close`] or
//! when the last clone is dropped, so every exit path of an invocation
//! releases it. Every call that touches the engine is a suspension point
//! that observes the client's [`CancelToken`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dockyard_common::config::EngineConfig;
use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::ImageRef;

use crate::cancel::CancelToken;
use crate::composition::Composition;
use crate::engine::{Artifact, Engine};
use crate::variant::{PlatformVariantSet, PublishedReference};

struct Connection {
    engine: Arc<dyn Engine>,
    closed: AtomicBool,
}

impl Connection {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(engine = self.engine.name(), "closing engine connection");
        self.engine.close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "engine connection did not close cleanly");
        }
    }
}

/// A handle on one engine connection.
#[derive(Clone)]
pub struct Client {
    connection: Arc<Connection>,
    cancel: CancelToken,
    parallelism: usize,
}

impl Client {
    /// Wraps an opened engine.
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    /// Wraps an opened engine, taking parallelism from `config`.
    pub fn connect(engine: impl Engine + 'static, config: &EngineConfig) -> Self {
        Self::new(engine).with_parallelism(config.parallelism)
    }

    /// Wraps an already shared engine.
    pub fn from_arc(engine: Arc<dyn Engine>) -> Self {
        tracing::info!(engine = engine.name(), "engine connection opened");
        Self {
            connection: Arc::new(Connection {
                engine,
                closed: AtomicBool::new(false),
            }),
            cancel: CancelToken::new(),
            parallelism: 1,
        }
    }

    /// Returns a clone sharing the connection but observing `cancel`.
    #[must_use]
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            cancel,
            parallelism: self.parallelism,
        }
    }

    /// Sets how many compositions callers may resolve at once.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// How many compositions callers may resolve at once.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// The token this client observes.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Name of the underlying engine.
    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.connection.engine.name()
    }

    /// Returns `true` once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection for every clone. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if it fails to release resources.
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }

    /// Realizes a composition.
    ///
    /// # Errors
    ///
    /// Returns the engine's error unchanged, `DockyardError::Cancelled` if
    /// the token fires first, or `DockyardError::Connection` after close.
    pub async fn resolve(&self, composition: &Composition) -> Result<Artifact> {
        tracing::debug!(digest = %composition.digest().short(), "resolving composition");
        let composition = composition.clone();
        self.run_blocking("resolve", move |engine, cancel| {
            engine.realize(&composition, cancel)
        })
        .await
    }

    /// Realizes a composition and returns the stdout of its last command.
    ///
    /// # Errors
    ///
    /// See [`Client::resolve`].
    pub async fn stdout(&self, composition: &Composition) -> Result<String> {
        Ok(self.resolve(composition).await?.stdout)
    }

    /// Realizes a composition and copies its filesystem to `target`.
    ///
    /// # Errors
    ///
    /// See [`Client::resolve`]; also fails if `target` cannot be written.
    pub async fn export(
        &self,
        composition: &Composition,
        target: impl AsRef<Path>,
    ) -> Result<Vec<PathBuf>> {
        let artifact = self.resolve(composition).await?;
        self.export_artifact(artifact, target).await
    }

    /// Copies an already realized artifact's filesystem to `target`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, `DockyardError::Cancelled` if the token
    /// fires first, or `DockyardError::Connection` after close.
    pub async fn export_artifact(
        &self,
        artifact: Artifact,
        target: impl AsRef<Path>,
    ) -> Result<Vec<PathBuf>> {
        let target = target.as_ref().to_path_buf();
        tracing::info!(
            digest = %artifact.content.short(),
            target = %target.display(),
            "exporting artifact"
        );
        self.run_blocking("export", move |engine, _| engine.export(&artifact, &target))
            .await
    }

    /// Resolves every variant, then submits them as one multi-platform
    /// publish. Nothing is submitted unless every variant resolved.
    ///
    /// # Errors
    ///
    /// Returns the first variant's resolution error, or the engine's
    /// publish error.
    pub async fn publish(
        &self,
        reference: &ImageRef,
        variants: &PlatformVariantSet<Composition>,
    ) -> Result<PublishedReference> {
        let mut resolved = Vec::with_capacity(variants.len());
        for (platform, composition) in variants.entries() {
            let artifact = self.resolve(composition).await?;
            tracing::debug!(platform = %platform, digest = %artifact.content.short(), "variant resolved");
            resolved.push((*platform, artifact));
        }
        let resolved = PlatformVariantSet::new(resolved)?;
        let platforms = resolved.platforms();

        tracing::info!(reference = %reference, variants = platforms.len(), "publishing");
        let target = reference.clone();
        let digest = self
            .run_blocking("publish", move |engine, _| engine.publish(&target, &resolved))
            .await?;
        Ok(PublishedReference {
            reference: reference.clone(),
            digest,
            platforms,
        })
    }

    async fn run_blocking<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Engine, &CancelToken) -> Result<T> + Send + 'static,
    {
        if self.is_closed() {
            return Err(DockyardError::Connection {
                engine: self.engine_name().to_string(),
                message: "connection already closed".into(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(DockyardError::Cancelled);
        }

        let engine = Arc::clone(&self.connection.engine);
        let cancel = self.cancel.clone();
        let task = tokio::task::spawn_blocking(move || f(engine.as_ref(), &cancel));

        tokio::select! {
            joined = task => joined.map_err(|e| DockyardError::execution(what, format!("engine task failed: {e}")))?,
            () = self.cancel.cancelled() => {
                tracing::info!(what, "cancelled while waiting on engine");
                Err(DockyardError::Cancelled)
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.engine_name())
            .field("closed", &self.is_closed())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}
