use crate::types::LedgerEntry;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// All ledger entries addressed to one phone number, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub phone_number: String,
    pub entries: Vec<LedgerEntry>,
}

impl Conversation {
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.sent_at)
    }
}

/// Group entries by phone number. Conversations with the most recent
/// activity come first.
pub fn group_by_phone_number(entries: &[LedgerEntry]) -> Vec<Conversation> {
    let mut by_phone: IndexMap<&str, Vec<LedgerEntry>> = IndexMap::new();
    for entry in entries {
        by_phone
            .entry(entry.phone_number.as_str())
            .or_default()
            .push(entry.clone());
    }

    let mut conversations: Vec<Conversation> = by_phone
        .into_iter()
        .map(|(phone_number, mut entries)| {
            entries.sort_by_key(|e| e.sent_at);
            Conversation {
                phone_number: phone_number.to_string(),
                entries,
            }
        })
        .collect();

    conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    conversations
}
