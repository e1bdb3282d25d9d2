//! Mapping a logical message back to a live element and scrolling to it.

use chatnav_adapters::PlatformAdapter;
use chatnav_dom::{Document, NodeId, SharedDocument};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

use crate::config::{HighlightConfig, ScrollConfig};
use crate::context::ContextToken;
use crate::error::Result;
use crate::message::{comparison_key, Message};

const RELOCATION_PREFIX_CHARS: usize = 60;

pub const HIGHLIGHT_ATTR: &str = "data-chatnav-highlight";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrollOutcome {
    /// No element could be found for the message.
    NotFound,
    /// The context changed or the container vanished mid-animation.
    Abandoned,
    Completed {
        scroll_top: f64,
        retried: bool,
    },
}

/// Live element for `message`: the cached handle when still attached, else
/// the element carrying its identifier, else the first element of the same
/// role whose text starts like the message.
pub fn resolve_element(
    adapter: &dyn PlatformAdapter,
    doc: &Document,
    message: &Message,
) -> Result<Option<NodeId>> {
    if let Some(element) = message.element.filter(|el| doc.is_attached(*el)) {
        return Ok(Some(element));
    }
    if let Some(element) = adapter.locate_by_id(doc, message.id.as_str())? {
        debug!("{}: re-located by identifier", message.id);
        return Ok(Some(element));
    }
    let prefix: String = comparison_key(&message.full_content)
        .chars()
        .take(RELOCATION_PREFIX_CHARS)
        .collect();
    let found = adapter.locate_by_content(doc, message.role, &prefix)?;
    if found.is_some() {
        debug!("{}: re-located by content prefix", message.id);
    }
    Ok(found)
}

/// Scrollable ancestor of `element`. The cache is reused while it still
/// contains the element and still has scrollable slack.
pub fn resolve_container(
    adapter: &dyn PlatformAdapter,
    doc: &Document,
    element: NodeId,
    cache: &mut Option<NodeId>,
    config: &ScrollConfig,
) -> Result<NodeId> {
    if let Some(cached) = *cache {
        let slack = doc.layout(cached).map_or(0.0, |l| l.max_scroll_top());
        if doc.contains(cached, element) && slack > config.min_slack_px {
            return Ok(cached);
        }
        debug!("scroll container {cached} no longer scrolls; resolving again");
        *cache = None;
    }

    let generic = nearest_scrollable_ancestor(doc, element, config.min_slack_px);
    let candidate = adapter
        .scroll_container_candidates(doc)?
        .into_iter()
        .find(|c| *c != element && doc.contains(*c, element) && has_overflow(doc, *c));

    let chosen = match (candidate, generic) {
        (Some(candidate), Some(generic)) if candidate != generic => {
            if doc.contains(candidate, generic) {
                debug!("adapter container {candidate} encloses nearer scroller {generic}");
                generic
            } else {
                candidate
            }
        }
        (Some(candidate), _) => candidate,
        (None, Some(generic)) => generic,
        (None, None) => doc.root(),
    };
    if chosen != doc.root() {
        *cache = Some(chosen);
    }
    Ok(chosen)
}

fn nearest_scrollable_ancestor(doc: &Document, element: NodeId, min_slack: f64) -> Option<NodeId> {
    doc.ancestors(element)
        .into_iter()
        .find(|a| doc.is_scroll_container(*a, min_slack))
}

fn has_overflow(doc: &Document, node: NodeId) -> bool {
    doc.layout(node)
        .is_some_and(|l| l.scroll_height > l.client_height)
}

/// Start and end of one scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPlan {
    pub start: f64,
    pub target: f64,
}

impl ScrollPlan {
    /// Puts the element `viewport_offset_ratio` of the way down the
    /// container, clamped to the scrollable range.
    pub fn compute(doc: &Document, element: NodeId, container: NodeId, config: &ScrollConfig) -> Option<Self> {
        if !doc.contains(container, element) {
            return None;
        }
        let layout = doc.layout(container)?;
        let relative = doc.rect_top(element)? - doc.rect_top(container)?;
        let content_top = relative + layout.scroll_top;
        let target = (content_top - layout.client_height * config.viewport_offset_ratio)
            .clamp(0.0, layout.max_scroll_top());
        Some(Self {
            start: layout.scroll_top,
            target,
        })
    }

    pub fn distance(&self) -> f64 {
        self.target - self.start
    }

    pub fn at(&self, progress: f64) -> f64 {
        self.start + self.distance() * ease_out_quart(progress)
    }
}

pub fn ease_out_quart(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(4)
}

/// Animates `container` so `element` lands at the anchor line, retrying
/// once, faster, when the host moved things underneath.
pub async fn scroll_into_view(
    doc: &SharedDocument,
    element: NodeId,
    container: NodeId,
    token: &ContextToken,
    config: &ScrollConfig,
) -> ScrollOutcome {
    let Some(mut scroll_top) = animate(doc, element, container, token, config, None).await else {
        return ScrollOutcome::Abandoned;
    };
    let drift = doc.with(|d| ScrollPlan::compute(d, element, container, config).map(|p| p.distance()));
    let mut retried = false;
    if drift.is_some_and(|d| d.abs() > config.settle_tolerance_px) {
        debug!("element drifted {drift:?}px after scrolling; retrying");
        retried = true;
        let retry = Duration::from_millis(config.retry_duration_ms);
        match animate(doc, element, container, token, config, Some(retry)).await {
            Some(value) => scroll_top = value,
            None => return ScrollOutcome::Abandoned,
        }
    }
    ScrollOutcome::Completed {
        scroll_top,
        retried,
    }
}

async fn animate(
    doc: &SharedDocument,
    element: NodeId,
    container: NodeId,
    token: &ContextToken,
    config: &ScrollConfig,
    duration: Option<Duration>,
) -> Option<f64> {
    let plan = doc.with(|d| ScrollPlan::compute(d, element, container, config))?;
    let duration = duration.unwrap_or_else(|| config.duration_for(plan.distance()));
    let started = Instant::now();
    loop {
        time::sleep(config.frame()).await;
        if !token.is_current() {
            debug!("context changed during scroll animation");
            return None;
        }
        let progress = if duration.is_zero() {
            1.0
        } else {
            started.elapsed().as_secs_f64() / duration.as_secs_f64()
        };
        let applied = doc.with(|d| d.set_scroll_top(container, plan.at(progress))).ok()?;
        if progress >= 1.0 {
            return Some(applied);
        }
    }
}

/// Highlight animations, at most one per element.
#[derive(Clone)]
pub struct HighlightTracker {
    doc: SharedDocument,
    config: HighlightConfig,
    active: Arc<Mutex<HashMap<NodeId, JoinHandle<()>>>>,
}

impl HighlightTracker {
    pub fn new(doc: SharedDocument, config: HighlightConfig) -> Self {
        Self {
            doc,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Highlights `element`, cancelling and resetting a previous highlight
    /// of the same element first.
    pub fn highlight(&self, element: NodeId) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = active.remove(&element) {
            previous.abort();
        }
        let config = self.config.clone();
        let applied = self.doc.with(|d| {
            clear_highlight(d, element);
            apply_highlight(d, element, &config)
        });
        if applied.is_err() {
            return;
        }

        let doc = self.doc.clone();
        let handle = tokio::spawn(async move {
            time::sleep(Duration::from_millis(config.fade_after_ms)).await;
            doc.with(|d| fade_highlight(d, element));
            let rest = config.reset_after_ms.saturating_sub(config.fade_after_ms);
            time::sleep(Duration::from_millis(rest)).await;
            doc.with(|d| clear_highlight(d, element));
        });
        active.insert(element, handle);
    }

    pub fn active_count(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.retain(|_, handle| !handle.is_finished());
        active.len()
    }

    /// Cancels every running highlight and clears its styles.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.drain().collect()
        };
        for (element, handle) in drained {
            handle.abort();
            self.doc.with(|d| clear_highlight(d, element));
        }
    }
}

impl std::fmt::Debug for HighlightTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn apply_highlight(doc: &mut Document, element: NodeId, config: &HighlightConfig) -> chatnav_dom::Result<()> {
    doc.set_style(element, "transition", "background-color 0.6s ease, box-shadow 0.6s ease")?;
    doc.set_style(element, "background-color", &config.color)?;
    doc.set_style(element, "box-shadow", &format!("0 0 0 2px {}", config.color))?;
    doc.set_attribute(element, HIGHLIGHT_ATTR, "active")
}

fn fade_highlight(doc: &mut Document, element: NodeId) {
    if !doc.is_attached(element) {
        return;
    }
    let _ = doc.set_style(element, "background-color", "transparent");
    let _ = doc.set_style(element, "box-shadow", "none");
    let _ = doc.set_attribute(element, HIGHLIGHT_ATTR, "fading");
}

fn clear_highlight(doc: &mut Document, element: NodeId) {
    if !doc.is_attached(element) {
        return;
    }
    for property in ["transition", "background-color", "box-shadow"] {
        let _ = doc.remove_style(element, property);
    }
    let _ = doc.remove_attribute(element, HIGHLIGHT_ATTR);
}
