// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic prompt text for inline button follow-up turns.

use std::sync::OnceLock;

use regex::Regex;
use relaybot_storage::{SessionRow, TurnRow};

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s)>"]+"#).expect("static regex"))
}

fn or_none(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() { "(none)" } else { trimmed }
}

pub fn build_summary_prompt(
    session: &SessionRow,
    origin_turn: &TurnRow,
    latest_turn: Option<&TurnRow>,
) -> String {
    let latest_assistant = latest_turn
        .and_then(|turn| turn.assistant_text.as_deref())
        .unwrap_or("");
    format!(
        "You are helping in Telegram. Create a concise Korean summary for the user.\n\
         Output format:\n\
         1) 핵심 요약 (5-8줄)\n\
         2) 다음 액션 3개\n\
         3) 주의할 점 1-2개\n\n\
         [Rolling Summary]\n{}\n\n\
         [Origin User Request]\n{}\n\n\
         [Origin Assistant Response]\n{}\n\n\
         [Latest Assistant Response]\n{}\n",
        or_none(&session.rolling_summary_md),
        or_none(&origin_turn.user_text),
        or_none(origin_turn.assistant_text.as_deref().unwrap_or("")),
        or_none(latest_assistant),
    )
}

pub fn build_regen_prompt(session: &SessionRow, origin_turn: &TurnRow) -> String {
    format!(
        "Regenerate an alternative answer for the same request.\n\
         Constraints:\n\
         - Use a different approach.\n\
         - Be more concise and structured.\n\
         - Keep practical and actionable style.\n\n\
         [Rolling Summary]\n{}\n\n\
         [Original User Request]\n{}\n\n\
         [Previous Assistant Response]\n{}\n",
        or_none(&session.rolling_summary_md),
        or_none(&origin_turn.user_text),
        or_none(origin_turn.assistant_text.as_deref().unwrap_or("")),
    )
}

pub fn build_next_prompt(
    session: &SessionRow,
    origin_turn: &TurnRow,
    latest_assistant_text: &str,
) -> String {
    let origin_assistant = origin_turn.assistant_text.as_deref().unwrap_or("");
    let link_source = if latest_assistant_text.trim().is_empty() {
        origin_assistant
    } else {
        latest_assistant_text
    };
    let urls = extract_urls(link_source);
    let url_block = if urls.is_empty() {
        "(none)".to_string()
    } else {
        urls.iter()
            .take(6)
            .map(|url| format!("- {url}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Suggest 3 next recommendations for Telegram user.\n\
         Output format for each item:\n\
         - title\n\
         - why (one line)\n\
         - optional link\n\n\
         [Rolling Summary]\n{}\n\n\
         [User Request]\n{}\n\n\
         [Assistant Context]\n{}\n\n\
         [Detected Links]\n{}\n",
        or_none(&session.rolling_summary_md),
        or_none(&origin_turn.user_text),
        or_none(origin_assistant),
        url_block,
    )
}

fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for found in url_re().find_iter(text) {
        let normalized = found.as_str().trim_end_matches(['.', ',', ';', '!', '?', ')']);
        if seen.insert(normalized.to_string()) {
            urls.push(normalized.to_string());
        }
    }
    urls
}
