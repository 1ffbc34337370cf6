// Per-account preview colors, set by the operator.
//
// Colors only decorate new previews; changing one never touches messages
// that were already published.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::AccountId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorPrefs(BTreeMap<AccountId, u32>);

impl ColorPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &str) -> Option<u32> {
        self.0.get(account).copied()
    }

    pub fn set(&mut self, account: &str, color: u32) {
        self.0.insert(account.to_string(), color);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse an operator-supplied hex color: `ff8800`, `#ff8800` or `0xff8800`.
///
/// Values wider than 24 bits are rejected.
pub fn parse_hex_color(input: &str) -> Option<u32> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 6 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Render a color the way operators type it.
pub fn format_hex_color(color: u32) -> String {
    format!("#{color:06x}")
}
