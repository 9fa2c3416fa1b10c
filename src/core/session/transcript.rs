//! Ordered conversation history built from streaming transcript events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Streaming,
    Final,
}

/// One message of the conversation, identified by the upstream item id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptItem {
    pub id: String,
    pub role: TranscriptRole,
    pub text: String,
    pub status: ItemStatus,
    /// Unix milliseconds
    pub created_at: i64,
}

/// A non-message annotation such as a tool call or an agent handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Entry of the combined timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEntry {
    Message(usize),
    Breadcrumb(usize),
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Folds deltas and completions into an ordered list of items.
///
/// Item order is first-arrival order. A delta appends, a completion overwrites
/// with the authoritative text, and deltas arriving after the completion are
/// dropped so a final item is never truncated or extended.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    items: Vec<TranscriptItem>,
    index: HashMap<String, usize>,
    breadcrumbs: Vec<Breadcrumb>,
    timeline: Vec<TimelineEntry>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, item_id: &str, role: TranscriptRole, status: ItemStatus) -> usize {
        if let Some(&idx) = self.index.get(item_id) {
            return idx;
        }
        let idx = self.items.len();
        self.items.push(TranscriptItem {
            id: item_id.to_string(),
            role,
            text: String::new(),
            status,
            created_at: now_millis(),
        });
        self.index.insert(item_id.to_string(), idx);
        self.timeline.push(TimelineEntry::Message(idx));
        idx
    }

    /// Append a streamed fragment, creating the item on first sight.
    ///
    /// Returns the updated item, or `None` when the item is already final.
    pub fn append_delta(
        &mut self,
        item_id: &str,
        role: TranscriptRole,
        fragment: &str,
    ) -> Option<&TranscriptItem> {
        let idx = self.slot(item_id, role, ItemStatus::Streaming);
        let item = &mut self.items[idx];
        if item.status == ItemStatus::Final {
            return None;
        }
        item.text.push_str(fragment);
        Some(item)
    }

    /// Replace the item's text with the full text and mark it final.
    pub fn finalize(&mut self, item_id: &str, role: TranscriptRole, text: &str) -> &TranscriptItem {
        let idx = self.slot(item_id, role, ItemStatus::Final);
        let item = &mut self.items[idx];
        item.text = text.to_string();
        item.status = ItemStatus::Final;
        item
    }

    /// Record a side annotation and return its generated id.
    pub fn add_breadcrumb(
        &mut self,
        title: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> &Breadcrumb {
        let idx = self.breadcrumbs.len();
        self.breadcrumbs.push(Breadcrumb {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            data,
            created_at: now_millis(),
        });
        self.timeline.push(TimelineEntry::Breadcrumb(idx));
        &self.breadcrumbs[idx]
    }

    pub fn get(&self, item_id: &str) -> Option<&TranscriptItem> {
        self.index.get(item_id).map(|&idx| &self.items[idx])
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn breadcrumbs(&self) -> &[Breadcrumb] {
        &self.breadcrumbs
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.breadcrumbs.clear();
        self.timeline.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_overwrites_deltas() {
        let mut transcript = TranscriptReconciler::new();
        transcript.append_delta("X", TranscriptRole::Assistant, "Hel");
        transcript.append_delta("X", TranscriptRole::Assistant, "lo");
        assert_eq!(transcript.get("X").unwrap().text, "Hello");
        assert_eq!(transcript.get("X").unwrap().status, ItemStatus::Streaming);

        let item = transcript.finalize("X", TranscriptRole::Assistant, "Hello there");
        assert_eq!(item.text, "Hello there");
        assert_eq!(item.status, ItemStatus::Final);
        assert_eq!(transcript.items().len(), 1);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut transcript = TranscriptReconciler::new();
        transcript.finalize("X", TranscriptRole::User, "Kia ora");
        transcript.finalize("X", TranscriptRole::User, "Kia ora");

        assert_eq!(transcript.items().len(), 1);
        let item = transcript.get("X").unwrap();
        assert_eq!(item.text, "Kia ora");
        assert_eq!(item.status, ItemStatus::Final);
    }

    #[test]
    fn test_delta_after_final_is_ignored() {
        let mut transcript = TranscriptReconciler::new();
        transcript.finalize("X", TranscriptRole::Assistant, "done");
        assert!(transcript.append_delta("X", TranscriptRole::Assistant, " more").is_none());
        assert_eq!(transcript.get("X").unwrap().text, "done");
    }

    #[test]
    fn test_order_is_first_arrival() {
        let mut transcript = TranscriptReconciler::new();
        transcript.append_delta("a", TranscriptRole::User, "first");
        transcript.append_delta("b", TranscriptRole::Assistant, "second");
        transcript.finalize("a", TranscriptRole::User, "first!");

        let ids: Vec<_> = transcript.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_breadcrumbs_are_side_entries() {
        let mut transcript = TranscriptReconciler::new();
        transcript.append_delta("a", TranscriptRole::User, "hi");
        let id = transcript
            .add_breadcrumb("Agent handoff", Some(serde_json::json!({"to": "meterHelper"})))
            .id
            .clone();

        assert_eq!(transcript.items().len(), 1);
        assert_eq!(transcript.breadcrumbs()[0].id, id);
        assert_eq!(
            transcript.timeline(),
            &[TimelineEntry::Message(0), TimelineEntry::Breadcrumb(0)]
        );

        transcript.clear();
        assert!(transcript.items().is_empty());
        assert!(transcript.timeline().is_empty());
    }
}
