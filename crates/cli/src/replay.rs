//! Scripted sessions: a starting snapshot plus timed host mutations, run
//! against the live engine in real time.

use anyhow::{Context as AnyhowContext, Result};
use chatnav_adapters::AdapterRegistry;
use chatnav_dom::{Document, DocumentSnapshot, NodeSnapshot, SharedDocument};
use chatnav_engine::{
    EngineConfig, EngineHealth, MemorySettingsStore, ScrollOutcome, SequenceSnapshot,
    SequenceUpdate, SyncEngine,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Attribute tagging indicators added by `set_streaming`.
const INDICATOR_ATTR: &str = "data-replay-indicator";

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    pub document: DocumentSnapshot,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
    /// How long to keep listening after the last step.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayStep {
    /// Delay before this step, relative to the previous one.
    #[serde(default)]
    pub after_ms: u64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepAction {
    Append { parent: String, node: NodeSnapshot },
    SetText { selector: String, text: String },
    Remove { selector: String },
    SetAttribute {
        selector: String,
        name: String,
        value: String,
    },
    /// Adds `node` under `parent` while on, removes it again when off.
    SetStreaming {
        parent: String,
        #[serde(default)]
        node: Option<NodeSnapshot>,
        on: bool,
    },
    Navigate { url: String },
    ForceScan,
    /// 1-based message number in the current sequence.
    ScrollTo { number: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct TimedUpdate {
    pub at_ms: u64,
    #[serde(flatten)]
    pub update: SequenceUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrollRecord {
    pub at_ms: u64,
    pub number: usize,
    pub outcome: ScrollOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub updates: Vec<TimedUpdate>,
    pub scrolls: Vec<ScrollRecord>,
    pub snapshot: SequenceSnapshot,
    pub health: EngineHealth,
}

pub async fn run(script: ReplayScript, config: EngineConfig) -> Result<ReplayReport> {
    let doc = SharedDocument::new(
        Document::from_snapshot(&script.document).context("Invalid script document")?,
    );
    let engine = SyncEngine::start(
        doc.clone(),
        AdapterRegistry::with_builtin(),
        config,
        Arc::new(MemorySettingsStore::default()),
    )?;
    let mut updates = engine.subscribe_updates();
    let started = Instant::now();
    let mut report = Recorder {
        started,
        updates: Vec::new(),
        scrolls: Vec::new(),
    };

    for (idx, step) in script.steps.iter().enumerate() {
        report
            .listen(&mut updates, Duration::from_millis(step.after_ms))
            .await;
        log::debug!("step {}: {:?}", idx + 1, step.action);
        apply(&doc, &engine, &step.action, &mut report)
            .await
            .with_context(|| format!("Step {} failed", idx + 1))?;
    }
    report
        .listen(&mut updates, Duration::from_millis(script.settle_ms))
        .await;

    let snapshot = engine.snapshot();
    let health = engine.health_snapshot();
    engine.shutdown().await?;
    Ok(ReplayReport {
        updates: report.updates,
        scrolls: report.scrolls,
        snapshot,
        health,
    })
}

struct Recorder {
    started: Instant,
    updates: Vec<TimedUpdate>,
    scrolls: Vec<ScrollRecord>,
}

impl Recorder {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records updates until `wait` has passed.
    async fn listen(&mut self, updates: &mut broadcast::Receiver<SequenceUpdate>, wait: Duration) {
        let deadline = Instant::now() + wait;
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) => {
                        let at_ms = self.elapsed_ms();
                        self.updates.push(TimedUpdate { at_ms, update });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("replay missed {missed} updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        time::sleep_until(deadline).await;
                        break;
                    }
                },
                () = time::sleep_until(deadline) => break,
            }
        }
    }
}

async fn apply(
    doc: &SharedDocument,
    engine: &SyncEngine,
    action: &StepAction,
    report: &mut Recorder,
) -> Result<()> {
    match action {
        StepAction::Append { parent, node } => doc.with(|d| {
            let parent = find(d, parent)?;
            d.append_snapshot(parent, node)?;
            Ok(())
        }),
        StepAction::SetText { selector, text } => doc.with(|d| {
            let target = find(d, selector)?;
            d.set_text(target, text)?;
            Ok(())
        }),
        StepAction::Remove { selector } => doc.with(|d| {
            let target = find(d, selector)?;
            d.remove(target)?;
            Ok(())
        }),
        StepAction::SetAttribute {
            selector,
            name,
            value,
        } => doc.with(|d| {
            let target = find(d, selector)?;
            d.set_attribute(target, name, value)?;
            Ok(())
        }),
        StepAction::SetStreaming { parent, node, on } => doc.with(|d| {
            if *on {
                let parent = find(d, parent)?;
                let indicator = node
                    .clone()
                    .unwrap_or_else(|| NodeSnapshot::element("div").class("result-streaming"))
                    .attr(INDICATOR_ATTR, "");
                d.append_snapshot(parent, &indicator)?;
            } else {
                let selector = format!("[{INDICATOR_ATTR}]");
                for indicator in d.query_all(d.root(), &selector)? {
                    if d.is_attached(indicator) {
                        d.remove(indicator)?;
                    }
                }
            }
            Ok(())
        }),
        StepAction::Navigate { url } => {
            doc.with(|d| d.set_location(url))?;
            engine.navigate(url.as_str()).await?;
            Ok(())
        }
        StepAction::ForceScan => {
            engine.force_scan().await?;
            Ok(())
        }
        StepAction::ScrollTo { number } => {
            let snapshot = engine.snapshot();
            let id = number
                .checked_sub(1)
                .and_then(|idx| snapshot.messages.get(idx))
                .map(|m| m.id.clone())
                .with_context(|| {
                    format!("No message #{number} (sequence has {})", snapshot.len())
                })?;
            let outcome = engine.scroll_to(&id).await?;
            log::info!("scroll to #{number}: {outcome:?}");
            let at_ms = report.elapsed_ms();
            report.scrolls.push(ScrollRecord {
                at_ms,
                number: *number,
                outcome,
            });
            Ok(())
        }
    }
}

fn find(doc: &Document, selector: &str) -> Result<chatnav_dom::NodeId> {
    doc.query(doc.root(), selector)?
        .with_context(|| format!("No element matches `{selector}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_with_defaults() {
        let raw = r#"{
            "document": {"url": "https://chatgpt.com/c/1", "body": [{"tag": "main"}]},
            "steps": [
                {"op": "append", "after_ms": 100, "parent": "main",
                 "node": {"tag": "div", "attrs": {"data-message-author-role": "user"}, "text": "hi"}},
                {"op": "set_streaming", "parent": "main", "on": true},
                {"op": "force_scan"},
                {"op": "scroll_to", "number": 1}
            ]
        }"#;
        let script: ReplayScript = serde_json::from_str(raw).expect("parse");
        assert_eq!(script.settle_ms, 3_000);
        assert_eq!(script.steps.len(), 4);
        assert_eq!(script.steps[0].after_ms, 100);
        assert!(matches!(script.steps[1].action, StepAction::SetStreaming { on: true, node: None, .. }));
        assert!(matches!(script.steps[3].action, StepAction::ScrollTo { number: 1 }));
    }

    #[test]
    fn rejects_unknown_operations() {
        let raw = r#"{"document": {}, "steps": [{"op": "explode"}]}"#;
        assert!(serde_json::from_str::<ReplayScript>(raw).is_err());
    }

    #[tokio::test]
    async fn replays_appended_message() {
        let script: ReplayScript = serde_json::from_str(
            r#"{
                "document": {"url": "https://chatgpt.com/c/7", "body": [{"tag": "main"}]},
                "steps": [
                    {"op": "append", "after_ms": 50, "parent": "main",
                     "node": {"tag": "div",
                              "attrs": {"data-message-author-role": "user", "data-message-id": "u-1"},
                              "text": "What is a lifetime?"}}
                ],
                "settle_ms": 1500
            }"#,
        )
        .expect("parse");
        let report = run(script, EngineConfig::default()).await.expect("replay");
        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.snapshot.messages[0].id.as_str(), "u-1");
        assert!(report
            .updates
            .iter()
            .any(|u| matches!(u.update, SequenceUpdate::MessagesAdded { .. })));
    }
}
