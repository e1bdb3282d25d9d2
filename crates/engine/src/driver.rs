//! The live engine: one spawned task owning the conversation context,
//! executing scheduler wakes and user commands against the shared document.

use chatnav_adapters::{AdapterError, AdapterRegistry, OWN_ATTR_PREFIX};
use chatnav_dom::{MutationKind, MutationObserver, MutationRecord, ObserveOptions, SharedDocument, Url};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use crate::config::EngineConfig;
use crate::context::{ContextGeneration, ConversationContext};
use crate::dedup::MergeOutcome;
use crate::error::{EngineError, Result};
use crate::message::{Message, MessageId};
use crate::persistence::{FavoritesSet, SettingsStore, StoredSettings, DEFAULT_THEME};
use crate::projection::{self, ProjectedRow, ProjectionQuery, UiAction};
use crate::scheduler::{Phase, ScanReason, SyncScheduler, Wake, WakeAction};
use crate::scroll::{self, HighlightTracker, ScrollOutcome};

const DEFAULT_ASSISTANT_NAME: &str = "Assistant";

/// Read-only view of the current sequence. Readers re-read it instead of
/// holding on to slices.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceSnapshot {
    pub generation: u64,
    pub context_key: Option<String>,
    pub adapter: Option<String>,
    pub assistant_name: String,
    pub messages: Arc<Vec<Message>>,
    pub favorites: Arc<FavoritesSet>,
    pub theme: String,
}

impl SequenceSnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            context_key: None,
            adapter: None,
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            messages: Arc::new(Vec::new()),
            favorites: Arc::new(FavoritesSet::default()),
            theme: DEFAULT_THEME.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn project(&self, query: &ProjectionQuery) -> Vec<ProjectedRow> {
        projection::project(&self.messages, &self.favorites, query)
    }

    pub fn clipboard_text(&self, id: &MessageId) -> Option<String> {
        projection::clipboard_text(&self.messages, id, &self.assistant_name)
    }

    pub fn transcript_markdown(&self) -> String {
        projection::transcript_markdown(&self.messages, &self.assistant_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceUpdate {
    ContextChanged {
        generation: u64,
        key: Option<String>,
        adapter: Option<String>,
    },
    MessagesAdded {
        generation: u64,
        reason: ScanReason,
        added: Vec<MessageId>,
        total: usize,
    },
    MessagesRefreshed {
        generation: u64,
        refreshed: usize,
    },
    FavoriteToggled {
        id: MessageId,
        favorite: bool,
    },
    ThemeChanged {
        theme: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineHealth {
    pub phase: Phase,
    pub generation: u64,
    pub context_key: Option<String>,
    pub adapter: Option<String>,
    pub subscribed: bool,
    pub messages: usize,
    pub passes: u64,
    pub last_pass_ms: Option<u64>,
    pub last_pass_reason: Option<ScanReason>,
    pub adapter_failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub stale_wakes: u64,
    pub persistence_failures: u64,
}

/// Result of a [`UiAction`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UiOutcome {
    Scrolled { outcome: ScrollOutcome },
    Copied { text: Option<String> },
    Favorite { favorite: bool },
}

enum EngineCommand {
    Navigate { url: String },
    ForceScan,
    ScrollTo {
        id: MessageId,
        reply: oneshot::Sender<ScrollOutcome>,
    },
    VisibleMessage {
        reply: oneshot::Sender<Option<MessageId>>,
    },
    ToggleFavorite {
        id: MessageId,
        reply: oneshot::Sender<bool>,
    },
    SetTheme { theme: String },
    Shutdown,
}

/// Handle to a running engine. Dropping the last clone stops it.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncEngineInner>,
}

struct SyncEngineInner {
    command_tx: mpsc::Sender<EngineCommand>,
    snapshot_tx: watch::Sender<SequenceSnapshot>,
    update_tx: broadcast::Sender<SequenceUpdate>,
    health_tx: watch::Sender<EngineHealth>,
}

impl SyncEngine {
    /// Spawns the driver task; must be called inside a tokio runtime. The
    /// document's current location, if any, is treated as the first
    /// navigation.
    pub fn start(
        doc: SharedDocument,
        registry: AdapterRegistry,
        config: EngineConfig,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        config.validate().map_err(EngineError::Config)?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (snapshot_tx, _) = watch::channel(SequenceSnapshot::empty());
        let (health_tx, _) = watch::channel(EngineHealth::default());
        let (update_tx, _) = broadcast::channel(64);

        let driver = Driver {
            highlights: HighlightTracker::new(doc.clone(), config.highlight.clone()),
            scheduler: SyncScheduler::new(config.scheduler.clone()),
            doc,
            registry,
            config,
            store,
            generations: ContextGeneration::new(),
            context: None,
            observer: None,
            observes_attributes: false,
            favorites: FavoritesSet::default(),
            theme: DEFAULT_THEME.to_string(),
            health: EngineHealth::default(),
            snapshot_tx: snapshot_tx.clone(),
            update_tx: update_tx.clone(),
            health_tx: health_tx.clone(),
        };
        tokio::spawn(driver.run(command_rx));

        Ok(Self {
            inner: Arc::new(SyncEngineInner {
                command_tx,
                snapshot_tx,
                update_tx,
                health_tx,
            }),
        })
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::ShutDown)
    }

    /// Address change signal, including same-document navigation.
    pub async fn navigate(&self, url: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::Navigate { url: url.into() }).await
    }

    pub async fn force_scan(&self) -> Result<()> {
        self.send(EngineCommand::ForceScan).await
    }

    /// Scrolls to a message and highlights it. Resolves once the animation
    /// is over.
    pub async fn scroll_to(&self, id: &MessageId) -> Result<ScrollOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ScrollTo {
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ShutDown)
    }

    /// Message currently at the reading position of the scroll container.
    pub async fn visible_message(&self) -> Result<Option<MessageId>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::VisibleMessage { reply }).await?;
        rx.await.map_err(|_| EngineError::ShutDown)
    }

    pub async fn toggle_favorite(&self, id: &MessageId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ToggleFavorite {
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ShutDown)
    }

    pub async fn set_theme(&self, theme: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SetTheme {
            theme: theme.into(),
        })
        .await
    }

    pub fn copy_text(&self, id: &MessageId) -> Option<String> {
        self.snapshot().clipboard_text(id)
    }

    pub async fn dispatch(&self, action: UiAction) -> Result<UiOutcome> {
        match action {
            UiAction::ScrollTo(id) => Ok(UiOutcome::Scrolled {
                outcome: self.scroll_to(&id).await?,
            }),
            UiAction::Copy(id) => Ok(UiOutcome::Copied {
                text: self.copy_text(&id),
            }),
            UiAction::ToggleFavorite(id) => Ok(UiOutcome::Favorite {
                favorite: self.toggle_favorite(&id).await?,
            }),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown).await
    }

    #[must_use]
    pub fn snapshot(&self) -> SequenceSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SequenceSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<SequenceUpdate> {
        self.inner.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> EngineHealth {
        self.inner.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<EngineHealth> {
        self.inner.health_tx.subscribe()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(EngineCommand::Shutdown);
        }
    }
}

struct Driver {
    doc: SharedDocument,
    registry: AdapterRegistry,
    config: EngineConfig,
    store: Arc<dyn SettingsStore>,
    scheduler: SyncScheduler,
    generations: ContextGeneration,
    context: Option<ConversationContext>,
    observer: Option<MutationObserver>,
    observes_attributes: bool,
    favorites: FavoritesSet,
    theme: String,
    highlights: HighlightTracker,
    health: EngineHealth,
    snapshot_tx: watch::Sender<SequenceSnapshot>,
    update_tx: broadcast::Sender<SequenceUpdate>,
    health_tx: watch::Sender<EngineHealth>,
}

impl Driver {
    async fn run(mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        self.load_settings().await;
        let initial = self.doc.lock().location().map(Url::to_string);
        if let Some(url) = initial {
            self.navigate(&url);
        }
        self.publish_snapshot();
        self.publish_health();

        loop {
            let next_deadline = self.scheduler.next_deadline();

            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                record = next_record(&mut self.observer) => {
                    self.handle_record(record);
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    self.run_due();
                }
            }
        }

        self.teardown_context();
        self.publish_health();
        debug!("sync engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Navigate { url } => self.navigate(&url),
            EngineCommand::ForceScan => {
                if !self.scheduler.force_scan() {
                    debug!("force scan ignored in {:?} phase", self.scheduler.phase());
                }
            }
            EngineCommand::ScrollTo { id, reply } => self.scroll_to(id, reply),
            EngineCommand::VisibleMessage { reply } => {
                let _ = reply.send(self.visible_message());
            }
            EngineCommand::ToggleFavorite { id, reply } => {
                let favorite = self.favorites.toggle(&id);
                self.persist_settings().await;
                let _ = self
                    .update_tx
                    .send(SequenceUpdate::FavoriteToggled { id, favorite });
                self.publish_snapshot();
                let _ = reply.send(favorite);
            }
            EngineCommand::SetTheme { theme } => {
                if theme != self.theme {
                    self.theme.clone_from(&theme);
                    self.persist_settings().await;
                    let _ = self.update_tx.send(SequenceUpdate::ThemeChanged { theme });
                    self.publish_snapshot();
                }
            }
            EngineCommand::Shutdown => return false,
        }
        self.publish_health();
        true
    }

    // ---------------------------------------------------------------------
    // Context lifecycle

    fn navigate(&mut self, raw: &str) {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(err) => {
                warn!("ignoring navigation to invalid address `{raw}`: {err}");
                return;
            }
        };
        let adapter = self.registry.select(&url);
        let key = adapter.as_ref().map(|a| a.normalize_url(&url));

        if let (Some(ctx), Some(adapter), Some(key)) = (&self.context, &adapter, &key) {
            if ctx.matches(adapter.name(), key) {
                debug!("{url}: same conversation {key}");
                return;
            }
        }
        if self.context.is_none() && adapter.is_none() {
            debug!("{url}: no adapter and no conversation to tear down");
            return;
        }

        let after_teardown = self.teardown_context();
        let token = self.generations.advance();
        match (adapter, key) {
            (Some(adapter), Some(key)) => {
                info!(
                    "conversation {key} on {} (generation {})",
                    adapter.name(),
                    token.generation()
                );
                let timing = adapter.timing();
                self.observes_attributes = adapter.observes_attributes();
                self.context = Some(ConversationContext::new(key, adapter, token.clone()));
                self.scheduler
                    .begin(token.generation(), timing, Instant::now(), after_teardown);
            }
            _ => info!("{url}: no adapter is active"),
        }

        let _ = self.update_tx.send(SequenceUpdate::ContextChanged {
            generation: token.generation(),
            key: self.context.as_ref().map(|c| c.key().to_string()),
            adapter: self.context.as_ref().map(|c| c.adapter().name().to_string()),
        });
        self.publish_snapshot();
    }

    /// Returns whether there was a context to tear down.
    fn teardown_context(&mut self) -> bool {
        let Some(mut ctx) = self.context.take() else {
            return false;
        };
        info!(
            "tearing down conversation {} ({} messages)",
            ctx.key(),
            ctx.index().len()
        );
        ctx.teardown();
        self.observer = None;
        self.scheduler.teardown();
        self.highlights.cancel_all();
        true
    }

    // ---------------------------------------------------------------------
    // Scheduling

    fn handle_record(&mut self, record: Option<MutationRecord>) {
        let Some(first) = record else {
            debug!("mutation stream closed");
            self.observer = None;
            return;
        };
        let rest = self
            .observer
            .as_mut()
            .map(MutationObserver::take_records)
            .unwrap_or_default();
        let qualifies = std::iter::once(&first)
            .chain(rest.iter())
            .any(|r| is_host_change(r, self.observes_attributes));
        if qualifies && self.scheduler.on_mutation(Instant::now()) {
            self.publish_health();
        }
    }

    fn run_due(&mut self) {
        let now = Instant::now();
        while let Some(wake) = self.scheduler.take_due(now) {
            self.execute(wake);
        }
        self.publish_health();
    }

    fn execute(&mut self, wake: Wake) {
        let current = self.context.as_ref().map(ConversationContext::generation);
        if current != Some(wake.generation) {
            debug!("dropping stale wake {wake:?} (current {current:?})");
            self.health.stale_wakes += 1;
            return;
        }
        match wake.action {
            WakeAction::Prime { attempt, last } => {
                let subscribed = self.ensure_subscription(last);
                let outcome = self.scan(ScanReason::Priming);
                let total = self.message_count();
                debug!(
                    "priming attempt {attempt}: subscribed={subscribed}, {total} messages (+{})",
                    outcome.accepted.len()
                );
                self.scheduler.primed(Instant::now(), subscribed, total);
            }
            WakeAction::CheckStreaming { check } => {
                let streaming = self.is_streaming();
                debug!("streaming check {check}: {streaming}");
                self.scheduler.streaming_checked(Instant::now(), streaming);
            }
            WakeAction::Scan(reason) => {
                let outcome = self.scan(reason);
                let total = self.message_count();
                self.scheduler
                    .scanned(Instant::now(), reason, total, outcome.accepted.len());
                if !self.subscription_alive() {
                    self.observer = None;
                    self.scheduler.restart_priming(Instant::now());
                }
            }
        }
    }

    fn subscription_alive(&self) -> bool {
        self.observer
            .as_ref()
            .is_some_and(|o| self.doc.lock().is_attached(o.target()))
    }

    /// Subscribes to the adapter's container, or to the document root when
    /// `fallback_to_root` is set and the container is missing.
    fn ensure_subscription(&mut self, fallback_to_root: bool) -> bool {
        if self.subscription_alive() {
            return true;
        }
        self.observer = None;
        let Some(adapter) = self.context.as_ref().map(|c| c.adapter().clone()) else {
            return false;
        };
        let shared = self.doc.clone();
        let mut doc = shared.lock();
        let container = match adapter.container(&doc) {
            Ok(container) => container,
            Err(err) => {
                self.record_adapter_failure(adapter.name(), &err);
                None
            }
        };
        let target = match container {
            Some(container) => container,
            None if fallback_to_root => {
                debug!("{}: container never appeared; watching the whole document", adapter.name());
                doc.root()
            }
            None => return false,
        };
        let options = ObserveOptions::default().with_attributes(adapter.observes_attributes());
        match doc.observe(target, options) {
            Ok(observer) => {
                debug!("{}: watching {target}", adapter.name());
                self.observer = Some(observer);
                true
            }
            Err(err) => {
                warn!("{}: cannot observe {target}: {err}", adapter.name());
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Detection

    fn scan(&mut self, reason: ScanReason) -> MergeOutcome {
        let Some(adapter) = self.context.as_ref().map(|c| c.adapter().clone()) else {
            return MergeOutcome::default();
        };
        let started = std::time::Instant::now();
        let shared = self.doc.clone();
        let mut doc = shared.lock();

        let candidates = match adapter.detect_messages(&mut doc) {
            Ok(candidates) => {
                self.health.consecutive_failures = 0;
                candidates
            }
            Err(err) => {
                self.record_adapter_failure(adapter.name(), &err);
                Vec::new()
            }
        };
        let Some(ctx) = self.context.as_mut() else {
            return MergeOutcome::default();
        };
        let outcome = ctx.index.merge(
            candidates,
            adapter.order_policy(),
            &doc,
            current_unix_ms(),
            &self.config,
        );
        let generation = ctx.generation();
        let total = ctx.index.len();
        drop(doc);

        self.health.passes += 1;
        self.health.last_pass_ms = u64::try_from(started.elapsed().as_millis()).ok();
        self.health.last_pass_reason = Some(reason);

        if outcome.changed() {
            info!(
                "{:?} pass: +{} messages ({total} total)",
                reason,
                outcome.accepted.len()
            );
            let _ = self.update_tx.send(SequenceUpdate::MessagesAdded {
                generation,
                reason,
                added: outcome.accepted.clone(),
                total,
            });
        } else if outcome.refreshed > 0 {
            let _ = self.update_tx.send(SequenceUpdate::MessagesRefreshed {
                generation,
                refreshed: outcome.refreshed,
            });
        }
        if outcome.dropped_near_duplicate > 0 {
            debug!(
                "{:?} pass dropped {} near-duplicates",
                reason, outcome.dropped_near_duplicate
            );
        }
        if outcome.touched() {
            self.publish_snapshot();
        }
        outcome
    }

    fn is_streaming(&mut self) -> bool {
        let Some(adapter) = self.context.as_ref().map(|c| c.adapter().clone()) else {
            return false;
        };
        let shared = self.doc.clone();
        let doc = shared.lock();
        match adapter.is_streaming(&doc) {
            Ok(streaming) => streaming,
            Err(err) => {
                self.record_adapter_failure(adapter.name(), &err);
                false
            }
        }
    }

    fn record_adapter_failure(&mut self, adapter: &str, err: &AdapterError) {
        warn!("{adapter} adapter failed: {err}");
        self.health.adapter_failures += 1;
        self.health.consecutive_failures += 1;
        self.health.last_error = Some(err.to_string());
    }

    fn message_count(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.index().len())
    }

    // ---------------------------------------------------------------------
    // Scrolling

    fn scroll_to(&mut self, id: MessageId, reply: oneshot::Sender<ScrollOutcome>) {
        let Some(ctx) = self.context.as_mut() else {
            let _ = reply.send(ScrollOutcome::NotFound);
            return;
        };
        let Some(message) = ctx.index.get(&id).cloned() else {
            debug!("scroll request for unknown message {id}");
            let _ = reply.send(ScrollOutcome::NotFound);
            return;
        };
        let adapter = ctx.adapter().clone();
        let shared = self.doc.clone();
        let resolved = {
            let doc = shared.lock();
            match scroll::resolve_element(adapter.as_ref(), &doc, &message) {
                Ok(Some(element)) => {
                    let container = scroll::resolve_container(
                        adapter.as_ref(),
                        &doc,
                        element,
                        &mut ctx.scroll_container,
                        &self.config.scroll,
                    )
                    .unwrap_or_else(|err| {
                        warn!("{}: scroll container lookup failed: {err}", adapter.name());
                        doc.root()
                    });
                    Some((element, container))
                }
                Ok(None) => None,
                Err(err) => {
                    warn!("{}: cannot re-locate {id}: {err}", adapter.name());
                    None
                }
            }
        };
        let Some((element, container)) = resolved else {
            debug!("{id}: no live element; ignoring scroll request");
            let _ = reply.send(ScrollOutcome::NotFound);
            return;
        };
        if message.element != Some(element) {
            ctx.index.set_element(&id, element);
        }

        let token = ctx.token().clone();
        let config = self.config.scroll.clone();
        let highlights = self.highlights.clone();
        tokio::spawn(async move {
            let outcome = scroll::scroll_into_view(&shared, element, container, &token, &config).await;
            if matches!(outcome, ScrollOutcome::Completed { .. }) && token.is_current() {
                highlights.highlight(element);
            }
            let _ = reply.send(outcome);
        });
    }

    fn visible_message(&mut self) -> Option<MessageId> {
        let ctx = self.context.as_mut()?;
        let adapter = ctx.adapter().clone();
        let shared = self.doc.clone();
        let doc = shared.lock();
        let container = match ctx.scroll_container.filter(|c| doc.is_attached(*c)) {
            Some(container) => container,
            None => {
                let anchor = ctx
                    .index
                    .messages()
                    .iter()
                    .find_map(|m| m.element.filter(|el| doc.is_attached(*el)))?;
                scroll::resolve_container(
                    adapter.as_ref(),
                    &doc,
                    anchor,
                    &mut ctx.scroll_container,
                    &self.config.scroll,
                )
                .ok()?
            }
        };
        projection::visible_message(
            &doc,
            ctx.index.messages(),
            container,
            self.config.scroll.viewport_offset_ratio,
        )
    }

    // ---------------------------------------------------------------------
    // Settings and publication

    async fn load_settings(&mut self) {
        match self.store.load().await {
            Ok(settings) => {
                self.favorites = settings.favorites.into_iter().collect();
                self.theme = settings.theme;
                debug!(
                    "loaded {} favorites, theme {}",
                    self.favorites.len(),
                    self.theme
                );
            }
            Err(err) => {
                warn!("settings unavailable, using defaults: {err}");
                self.health.persistence_failures += 1;
            }
        }
    }

    async fn persist_settings(&mut self) {
        let settings = StoredSettings {
            favorites: self.favorites.to_vec(),
            theme: self.theme.clone(),
        };
        if let Err(err) = self.store.store(&settings).await {
            warn!("failed to store settings: {err}");
            self.health.persistence_failures += 1;
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = match &self.context {
            Some(ctx) => SequenceSnapshot {
                generation: ctx.generation(),
                context_key: Some(ctx.key().to_string()),
                adapter: Some(ctx.adapter().name().to_string()),
                assistant_name: ctx.adapter().assistant_name().to_string(),
                messages: Arc::new(ctx.index().messages().to_vec()),
                favorites: Arc::new(self.favorites.clone()),
                theme: self.theme.clone(),
            },
            None => SequenceSnapshot {
                generation: self.generations.current(),
                favorites: Arc::new(self.favorites.clone()),
                theme: self.theme.clone(),
                ..SequenceSnapshot::empty()
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    fn publish_health(&mut self) {
        self.health.phase = self.scheduler.phase();
        self.health.generation = self.generations.current();
        self.health.context_key = self.context.as_ref().map(|c| c.key().to_string());
        self.health.adapter = self.context.as_ref().map(|c| c.adapter().name().to_string());
        self.health.messages = self.message_count();
        self.health.subscribed = self.observer.is_some();
        self.health_tx.send_replace(self.health.clone());
    }
}

async fn next_record(observer: &mut Option<MutationObserver>) -> Option<MutationRecord> {
    match observer {
        Some(observer) => observer.recv().await,
        None => std::future::pending().await,
    }
}

/// Host changes worth a rescan. Markers and highlight styling written by the
/// engine itself never qualify.
fn is_host_change(record: &MutationRecord, observes_attributes: bool) -> bool {
    match &record.kind {
        MutationKind::ChildList { .. } => true,
        MutationKind::CharacterData => observes_attributes,
        MutationKind::Attribute { name } => {
            observes_attributes && name != "style" && !name.starts_with(OWN_ATTR_PREFIX)
        }
    }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}
