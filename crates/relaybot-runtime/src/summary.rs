// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic rolling-summary compactor.
//!
//! No model call is involved: the summary is a pure function of
//! (previous summary, user text, assistant text, command notes, error),
//! bounded in length, so identical inputs always produce identical
//! output and tests can assert exact strings.

/// Upper bound on the rolling summary, in characters.
pub const MAX_SUMMARY_LEN: usize = 4000;

/// Inputs for one summary update, gathered at turn completion.
#[derive(Debug, Clone, Default)]
pub struct SummaryInput {
    pub previous_summary: String,
    pub user_text: String,
    pub assistant_text: String,
    pub command_notes: Vec<String>,
    pub error_text: Option<String>,
}

/// Produce the next rolling summary.
pub fn build_summary(input: &SummaryInput) -> String {
    let goals = pick_line(&input.user_text, "- Process the current user request");
    let decisions = pick_line(&input.assistant_text, "- Assistant response generated");
    let constraints = "- Keep Telegram to CLI bridge context stable";
    let open_issues = match input.error_text.as_deref().map(str::trim) {
        Some(error) if !error.is_empty() => format!("- {error}"),
        _ => "- none".to_string(),
    };
    let artifacts = if input.command_notes.is_empty() {
        "- no command execution notes".to_string()
    } else {
        input
            .command_notes
            .iter()
            .take(10)
            .map(|line| format!("- {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let previous = input.previous_summary.trim();
    let previous_block = if previous.is_empty() {
        String::new()
    } else {
        format!("## Previous Summary\n{previous}\n\n")
    };

    let summary = format!(
        "{previous_block}## Goal\n{goals}\n\n## Decisions\n{decisions}\n\n\
         ## Constraints\n{constraints}\n\n## Open Issues\n{open_issues}\n\n\
         ## Key Artifacts\n{artifacts}\n"
    );
    trim_to_limit(&summary)
}

/// The preamble injected on the first turn after a reset or agent
/// switch, carrying the prior rolling summary into the fresh thread.
pub fn build_recovery_preamble(summary_md: &str) -> String {
    if summary_md.trim().is_empty() {
        return String::new();
    }
    format!(
        "[Session Memory Summary]\n\
         Continue work while preserving prior context using this summary.\n\n{}",
        trim_to_limit(summary_md)
    )
}

fn pick_line(text: &str, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    let single = trimmed.replace('\n', " ");
    let single = single.trim();
    if single.chars().count() <= 300 {
        format!("- {single}")
    } else {
        let head: String = single.chars().take(297).collect();
        format!("- {head}...")
    }
}

fn trim_to_limit(text: &str) -> String {
    if text.chars().count() <= MAX_SUMMARY_LEN {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_SUMMARY_LEN - 16).collect();
    format!("{head}\n\n[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_deterministic_and_exact() {
        let input = SummaryInput {
            previous_summary: String::new(),
            user_text: "build a parser".into(),
            assistant_text: "parser built".into(),
            command_notes: vec![],
            error_text: None,
        };
        let expected = "## Goal\n- build a parser\n\n## Decisions\n- parser built\n\n\
             ## Constraints\n- Keep Telegram to CLI bridge context stable\n\n\
             ## Open Issues\n- none\n\n## Key Artifacts\n- no command execution notes\n";
        assert_eq!(build_summary(&input), expected);
        assert_eq!(build_summary(&input), build_summary(&input));
    }

    #[test]
    fn previous_summary_is_carried_as_block() {
        let input = SummaryInput {
            previous_summary: "## Goal\n- old goal".into(),
            user_text: "next step".into(),
            assistant_text: "done".into(),
            command_notes: vec!["cargo test".into()],
            error_text: Some("flaky network".into()),
        };
        let summary = build_summary(&input);
        assert!(summary.starts_with("## Previous Summary\n## Goal\n- old goal\n\n"));
        assert!(summary.contains("## Open Issues\n- flaky network"));
        assert!(summary.contains("## Key Artifacts\n- cargo test\n"));
    }

    #[test]
    fn long_user_text_is_clipped_to_one_line() {
        let input = SummaryInput {
            user_text: format!("a{}", "b".repeat(400)),
            ..SummaryInput::default()
        };
        let summary = build_summary(&input);
        let goal_line = summary
            .lines()
            .find(|line| line.starts_with("- a"))
            .unwrap();
        assert_eq!(goal_line.chars().count(), 302); // "- " + 297 chars + "..."
        assert!(goal_line.ends_with("..."));
    }

    #[test]
    fn summary_stays_within_bound() {
        let input = SummaryInput {
            previous_summary: "x".repeat(6000),
            user_text: "u".into(),
            assistant_text: "a".into(),
            ..SummaryInput::default()
        };
        let summary = build_summary(&input);
        assert!(summary.chars().count() <= MAX_SUMMARY_LEN);
        assert!(summary.ends_with("\n\n[truncated]"));
    }

    #[test]
    fn preamble_is_empty_without_summary() {
        assert_eq!(build_recovery_preamble("   "), "");
        let preamble = build_recovery_preamble("## Goal\n- things");
        assert!(preamble.starts_with("[Session Memory Summary]\n"));
        assert!(preamble.ends_with("## Goal\n- things"));
    }
}
