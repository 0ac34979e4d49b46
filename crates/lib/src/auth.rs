//! Authorization gate: the static allow-list of operator ids.

use crate::config::ConfigError;
use std::collections::BTreeSet;

/// Numeric Telegram user ids permitted to issue authorized commands. Immutable after startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: BTreeSet<i64>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse a comma-separated id list (`"1, 2,3"`). Whitespace and empty segments are ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let ids = cleaned
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| ConfigError::InvalidAdminId(s.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { ids })
    }

    /// True iff `id` is present and allow-listed. An absent sender is never authorized.
    pub fn is_authorized(&self, id: Option<i64>) -> bool {
        id.is_some_and(|id| self.ids.contains(&id))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }
}
