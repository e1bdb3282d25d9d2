use chatnav_adapters::{
    AdapterError, AdapterRegistry, MessageElement, OrderPolicy, PlatformAdapter, Role,
};
use chatnav_dom::{Document, Layout, NodeId, SharedDocument, Url};
use chatnav_engine::{
    EngineConfig, EngineError, EngineHealth, MemorySettingsStore, MessageFilter, MessageId, Phase,
    ProjectionQuery, ScanReason, ScrollOutcome, SequenceSnapshot, SequenceUpdate, SettingsStore,
    StoredSettings, SyncEngine, UiAction, UiOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time;

const CONVERSATION: &str = "https://chat.test/c/1";

/// `.msg` elements inside `#thread`, role in `data-role`, optional host id in
/// `data-id`; `.streaming` anywhere means a reply is being generated.
struct FixtureAdapter {
    policy: OrderPolicy,
}

impl PlatformAdapter for FixtureAdapter {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn is_active(&self, location: &Url) -> bool {
        location.host_str() == Some("chat.test")
    }

    fn container(&self, doc: &Document) -> chatnav_adapters::Result<Option<NodeId>> {
        Ok(doc.query(doc.body(), "#thread")?)
    }

    fn message_elements(&self, doc: &Document) -> chatnav_adapters::Result<Vec<MessageElement>> {
        let Some(thread) = self.container(doc)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for node in doc.query_all(thread, ".msg")? {
            let role = match doc.attr(node, "data-role") {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                other => {
                    return Err(AdapterError::markup(
                        "fixture",
                        format!("unknown role {other:?} on {node}"),
                    ))
                }
            };
            let mut item = MessageElement::new(role, node);
            item.host_id = doc.attr(node, "data-id").map(str::to_string);
            out.push(item);
        }
        Ok(out)
    }

    fn is_streaming(&self, doc: &Document) -> chatnav_adapters::Result<bool> {
        Ok(doc.query(doc.root(), ".streaming")?.is_some())
    }

    fn order_policy(&self) -> OrderPolicy {
        self.policy
    }
}

fn page(url: &str) -> (SharedDocument, NodeId) {
    let mut doc = Document::with_location(url).expect("location");
    let body = doc.body();
    let thread = doc
        .append_element_with(body, "div", &[("id", "thread")])
        .expect("thread");
    doc.set_layout(thread, Layout::scroller(0.0, 400.0, 2000.0))
        .expect("layout");
    (SharedDocument::new(doc), thread)
}

fn add_message(doc: &mut Document, parent: NodeId, role: &str, id: Option<&str>, text: &str) -> NodeId {
    let mut attrs = vec![("class", "msg"), ("data-role", role)];
    if let Some(id) = id {
        attrs.push(("data-id", id));
    }
    let el = doc.append_element_with(parent, "div", &attrs).expect("message");
    doc.append_text(el, text).expect("text");
    el
}

fn start(doc: &SharedDocument, policy: OrderPolicy, store: Arc<dyn SettingsStore>) -> SyncEngine {
    let registry = AdapterRegistry::new(vec![Arc::new(FixtureAdapter { policy })]);
    SyncEngine::start(doc.clone(), registry, EngineConfig::default(), store).expect("start")
}

fn memory_store() -> Arc<dyn SettingsStore> {
    Arc::new(MemorySettingsStore::default())
}

async fn wait_snapshot(
    engine: &SyncEngine,
    condition: impl FnMut(&SequenceSnapshot) -> bool,
) -> SequenceSnapshot {
    let mut rx = engine.subscribe();
    let snapshot = time::timeout(Duration::from_secs(60), rx.wait_for(condition))
        .await
        .expect("timed out waiting for snapshot")
        .expect("engine stopped")
        .clone();
    snapshot
}

async fn wait_health(
    engine: &SyncEngine,
    condition: impl FnMut(&EngineHealth) -> bool,
) -> EngineHealth {
    let mut rx = engine.health_stream();
    let health = time::timeout(Duration::from_secs(60), rx.wait_for(condition))
        .await
        .expect("timed out waiting for health")
        .expect("engine stopped")
        .clone();
    health
}

fn ids(snapshot: &SequenceSnapshot) -> Vec<&str> {
    snapshot.messages.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn messages_present_at_load_are_detected_in_order() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "How do lifetimes work?");
        add_message(d, thread, "assistant", Some("a1"), "They bound borrows.");
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());

    let snapshot = wait_snapshot(&engine, |s| s.len() == 2).await;
    assert_eq!(ids(&snapshot), vec!["u1", "a1"]);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.context_key.as_deref(), Some(CONVERSATION));
    assert_eq!(snapshot.adapter.as_deref(), Some("fixture"));

    let health = wait_health(&engine, |h| h.phase == Phase::Watching).await;
    assert!(health.subscribed);
    assert_eq!(health.messages, 2);
}

#[tokio::test(start_paused = true)]
async fn streaming_reply_is_scanned_once_when_generation_ends() {
    let (doc, thread) = page(CONVERSATION);
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    let passes = wait_health(&engine, |h| h.phase == Phase::Watching).await.passes;

    let (reply, indicator) = doc.with(|d| {
        let reply = add_message(d, thread, "assistant", Some("a1"), "Partial");
        let indicator = d
            .append_element_with(thread, "div", &[("class", "streaming")])
            .expect("indicator");
        (reply, indicator)
    });

    // debounce, then three positive streaming checks
    time::sleep(Duration::from_millis(5_000)).await;
    let health = engine.health_snapshot();
    assert_eq!(health.phase, Phase::StreamingCheck);
    assert_eq!(health.passes, passes);
    assert!(engine.snapshot().is_empty());

    doc.with(|d| {
        let text = d.children(reply)[0];
        d.set_text(text, "Partial answer, now complete.").expect("text");
        d.remove(indicator).expect("remove");
    });

    let snapshot = wait_snapshot(&engine, |s| s.len() == 1).await;
    assert_eq!(snapshot.messages[0].full_content, "Partial answer, now complete.");
    let health = engine.health_snapshot();
    assert_eq!(health.passes, passes + 1);
    assert_eq!(health.last_pass_reason, Some(ScanReason::StreamingEnded));

    time::sleep(Duration::from_millis(3_000)).await;
    let health = engine.health_snapshot();
    assert_eq!(health.passes, passes + 2);
    assert_eq!(health.last_pass_reason, Some(ScanReason::Confirm));
    assert_eq!(engine.snapshot().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_reply_is_announced_as_an_addition() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "Ping");
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    let first = wait_snapshot(&engine, |s| s.len() == 1).await;

    let mut updates = engine.subscribe_updates();
    doc.with(|d| {
        add_message(d, thread, "assistant", Some("a1"), "Pong");
    });

    let update = time::timeout(Duration::from_secs(10), async {
        loop {
            if let update @ SequenceUpdate::MessagesAdded { .. } = updates.recv().await.expect("updates") {
                break update;
            }
        }
    })
    .await
    .expect("no addition announced");
    assert_eq!(
        update,
        SequenceUpdate::MessagesAdded {
            generation: first.generation,
            reason: ScanReason::Mutation,
            added: vec![MessageId::new("a1")],
            total: 2,
        }
    );
    assert_eq!(ids(&engine.snapshot()), vec!["u1", "a1"]);
}

#[tokio::test(start_paused = true)]
async fn repeated_text_far_apart_is_kept_but_nearby_copy_is_dropped() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("m-1"), "Thanks!");
        let mut parent = thread;
        for _ in 0..10 {
            parent = d.append_element(parent, "div").expect("wrapper");
        }
        add_message(d, parent, "user", Some("m-2"), "Thanks!");
        add_message(d, thread, "user", Some("m-3"), "Thanks!");
    });
    let engine = start(&doc, OrderPolicy::Renumber, memory_store());

    let snapshot = wait_snapshot(&engine, |s| !s.is_empty()).await;
    let orders: Vec<_> = snapshot
        .messages
        .iter()
        .map(|m| (m.id.as_str(), m.order))
        .collect();
    assert_eq!(orders, vec![("m-1", Some(0)), ("m-2", Some(1))]);
}

#[tokio::test(start_paused = true)]
async fn history_loaded_above_sorts_by_document_position() {
    let (doc, thread) = page(CONVERSATION);
    let latest = doc.with(|d| add_message(d, thread, "user", Some("u2"), "latest question"));
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    wait_snapshot(&engine, |s| s.len() == 1).await;

    doc.with(|d| {
        let older = d.insert_element_before(thread, latest, "div").expect("insert");
        d.set_attribute(older, "class", "msg").expect("class");
        d.set_attribute(older, "data-role", "user").expect("role");
        d.set_attribute(older, "data-id", "u1").expect("id");
        d.append_text(older, "older question").expect("text");
    });

    let snapshot = wait_snapshot(&engine, |s| s.len() == 2).await;
    assert_eq!(ids(&snapshot), vec!["u1", "u2"]);
    assert!(snapshot.messages.iter().all(|m| m.order.is_none()));
}

#[tokio::test(start_paused = true)]
async fn navigation_isolates_conversations() {
    let (doc, thread) = page(CONVERSATION);
    let old = doc.with(|d| add_message(d, thread, "user", Some("u1"), "first conversation"));
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    let first = wait_snapshot(&engine, |s| s.len() == 1).await;

    engine
        .navigate(format!("{CONVERSATION}#latest"))
        .await
        .expect("navigate");
    engine.visible_message().await.expect("round trip");
    assert_eq!(engine.snapshot().generation, first.generation);

    let next = "https://chat.test/c/2";
    doc.with(|d| {
        d.set_location(next).expect("location");
        d.remove(old).expect("remove");
        add_message(d, thread, "user", Some("u9"), "second conversation");
    });
    engine.navigate(next).await.expect("navigate");

    let switched = wait_snapshot(&engine, |s| s.context_key.as_deref() == Some(next)).await;
    assert!(switched.generation > first.generation);
    assert!(switched.is_empty());

    let rebuilt = wait_snapshot(&engine, |s| s.len() == 1).await;
    assert_eq!(ids(&rebuilt), vec!["u9"]);
    assert_eq!(rebuilt.generation, switched.generation);
}

#[tokio::test(start_paused = true)]
async fn leaving_supported_hosts_clears_the_sequence() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "hello");
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    wait_snapshot(&engine, |s| s.len() == 1).await;

    engine.navigate("https://example.org/").await.expect("navigate");
    let cleared = wait_snapshot(&engine, |s| s.adapter.is_none()).await;
    assert!(cleared.is_empty());
    let health = wait_health(&engine, |h| h.phase == Phase::Idle).await;
    assert_eq!(health.context_key, None);
    assert!(!health.subscribed);
}

#[tokio::test(start_paused = true)]
async fn scroll_relocates_rerendered_element_and_ignores_missing_ones() {
    let (doc, thread) = page(CONVERSATION);
    let text = "Where does the borrow checker run?";
    doc.with(|d| {
        let el = add_message(d, thread, "user", None, text);
        d.set_layout(el, Layout::block(1000.0, 80.0)).expect("layout");
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    let snapshot = wait_snapshot(&engine, |s| s.len() == 1).await;
    let id = snapshot.messages[0].id.clone();

    let replacement = doc.with(|d| {
        let old = snapshot.messages[0].element.expect("element");
        d.remove(old).expect("remove");
        let el = add_message(d, thread, "user", None, text);
        d.set_layout(el, Layout::block(1000.0, 80.0)).expect("layout");
        el
    });

    let outcome = engine.scroll_to(&id).await.expect("scroll");
    assert_eq!(
        outcome,
        ScrollOutcome::Completed {
            scroll_top: 940.0,
            retried: false
        }
    );
    assert_eq!(
        doc.with(|d| d.attr(replacement, "data-chatnav-highlight").map(str::to_string)),
        Some("active".to_string())
    );

    doc.with(|d| d.remove(replacement)).expect("remove");
    assert_eq!(engine.scroll_to(&id).await.expect("scroll"), ScrollOutcome::NotFound);
    assert_eq!(
        engine.scroll_to(&MessageId::new("nope")).await.expect("scroll"),
        ScrollOutcome::NotFound
    );
    assert_eq!(
        doc.with(|d| d.layout(thread).map(|l| l.scroll_top)),
        Some(940.0)
    );
}

#[tokio::test(start_paused = true)]
async fn unavailable_storage_falls_back_to_defaults() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "hello");
    });
    let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::unavailable());
    let engine = start(&doc, OrderPolicy::Native, store);

    let snapshot = wait_snapshot(&engine, |s| s.len() == 1).await;
    assert_eq!(snapshot.theme, "auto");
    assert!(snapshot.favorites.is_empty());
    assert_eq!(engine.health_snapshot().persistence_failures, 1);

    let id = MessageId::new("u1");
    assert!(engine.toggle_favorite(&id).await.expect("toggle"));
    let snapshot = engine.snapshot();
    assert!(snapshot.favorites.contains(&id));
    let rows = snapshot.project(&ProjectionQuery::new(MessageFilter::Favorites, ""));
    assert_eq!(rows.len(), 1);
    assert_eq!(engine.health_snapshot().persistence_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn settings_are_loaded_once_and_pushed_on_change() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "How do lifetimes work?");
    });
    let store = Arc::new(MemorySettingsStore::new(StoredSettings {
        favorites: vec![MessageId::new("u1")],
        theme: "dark".to_string(),
    }));
    let engine = start(&doc, OrderPolicy::Native, store.clone());

    let snapshot = wait_snapshot(&engine, |s| s.len() == 1).await;
    let id = MessageId::new("u1");
    assert_eq!(snapshot.theme, "dark");
    assert!(snapshot.favorites.contains(&id));

    let outcome = engine
        .dispatch(UiAction::ToggleFavorite(id.clone()))
        .await
        .expect("toggle");
    assert_eq!(outcome, UiOutcome::Favorite { favorite: false });
    assert!(store.current().favorites.is_empty());

    engine.set_theme("light").await.expect("theme");
    engine.visible_message().await.expect("round trip");
    assert_eq!(store.current().theme, "light");
    assert_eq!(engine.snapshot().theme, "light");

    let copied = engine.dispatch(UiAction::Copy(id)).await.expect("copy");
    assert_eq!(
        copied,
        UiOutcome::Copied {
            text: Some("1. You\nHow do lifetimes work?".to_string())
        }
    );
}

#[tokio::test(start_paused = true)]
async fn rescanning_an_unchanged_page_accepts_nothing() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "one");
        add_message(d, thread, "assistant", None, "two");
    });
    let engine = start(&doc, OrderPolicy::Renumber, memory_store());
    wait_snapshot(&engine, |s| s.len() == 2).await;
    let before = wait_health(&engine, |h| h.phase == Phase::Watching).await;

    let mut updates = engine.subscribe_updates();
    engine.force_scan().await.expect("force");
    let after = wait_health(&engine, |h| h.passes == before.passes + 1).await;

    assert_eq!(after.last_pass_reason, Some(ScanReason::Forced));
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot.messages.iter().map(|m| m.order).collect::<Vec<_>>(),
        vec![Some(0), Some(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn adapter_failures_are_counted_and_recovered_from() {
    let (doc, thread) = page(CONVERSATION);
    let odd = doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "hello");
        add_message(d, thread, "narrator", None, "Meanwhile...")
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());

    let health = wait_health(&engine, |h| h.adapter_failures >= 1).await;
    assert!(health
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("unexpected markup")));
    assert!(engine.snapshot().is_empty());

    doc.with(|d| d.remove(odd)).expect("remove");
    let snapshot = wait_snapshot(&engine, |s| s.len() == 1).await;
    assert_eq!(ids(&snapshot), vec!["u1"]);
    assert_eq!(engine.health_snapshot().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_subscription() {
    let (doc, thread) = page(CONVERSATION);
    doc.with(|d| {
        add_message(d, thread, "user", Some("u1"), "hello");
    });
    let engine = start(&doc, OrderPolicy::Native, memory_store());
    wait_snapshot(&engine, |s| s.len() == 1).await;
    assert_eq!(doc.with(|d| d.observer_count()), 1);

    engine.shutdown().await.expect("shutdown");
    time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(engine.force_scan().await, Err(EngineError::ShutDown)));
    assert_eq!(doc.with(|d| d.observer_count()), 0);
}
