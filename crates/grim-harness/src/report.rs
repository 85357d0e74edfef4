use std::fmt::Write as _;

use grim_collect::ReconciledLog;

use crate::result::RunResult;

const MESSAGE_PREVIEW_CHARS: usize = 800;

fn truncate_preview(text: &str) -> &str {
    match text.char_indices().nth(MESSAGE_PREVIEW_CHARS) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Renders a reconciled log one event per line, chat payloads expanded.
pub fn render_events(log: &ReconciledLog) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total events: {} ({})", log.events.len(), log.provenance.label());
    for event in &log.events {
        let seq = event
            .seq
            .map(|seq| seq.to_string())
            .unwrap_or_else(|| "?".to_string());
        let actor = event.actor_user_id.as_deref().unwrap_or("system");
        match event.chat_message() {
            Some(message) => {
                let _ = writeln!(out, "\n[{seq}] {} by {actor}:", event.event_type);
                let _ = writeln!(out, "  {}", truncate_preview(message));
            }
            None => {
                let _ = writeln!(out, "[{seq}] {} by {actor}", event.event_type);
            }
        }
    }
    out
}

/// Renders the summary block for one run.
pub fn render_report(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "  Results for {}", result.provider.to_uppercase());
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "  Total events:  {}", result.total_events);
    let _ = writeln!(out, "  Chat messages: {}", result.chat_count);
    let _ = writeln!(out, "  Elapsed:       {}s", result.elapsed_seconds);
    let _ = writeln!(out, "  Room ID:       {}", result.room_id);
    let _ = writeln!(out, "  Source:        {}", result.provenance.label());
    for (index, line) in result.messages.iter().enumerate() {
        let seq = line
            .seq
            .map(|seq| seq.to_string())
            .unwrap_or_else(|| "?".to_string());
        let actor = line.actor.as_deref().unwrap_or("system");
        let _ = writeln!(out, "\n--- Message {} (seq {seq}, {actor}) ---", index + 1);
        let _ = writeln!(out, "{}", truncate_preview(&line.message));
    }
    out
}

/// Side-by-side comparison of two saved runs.
pub fn render_comparison(a: &RunResult, b: &RunResult) -> String {
    let mut out = String::new();
    let left = a.provider.to_uppercase();
    let right = b.provider.to_uppercase();

    let _ = writeln!(out, "{}", "=".repeat(70));
    let _ = writeln!(out, "  {left} vs {right} Comparison");
    let _ = writeln!(out, "{}", "=".repeat(70));
    let _ = writeln!(out, "\n{:<21}{:<20}{}", "Metric", left, right);
    let _ = writeln!(out, "{}", "-".repeat(65));
    let _ = writeln!(
        out,
        "{:<21}{:<20}{}",
        "Total Events", a.total_events, b.total_events
    );
    let _ = writeln!(
        out,
        "{:<21}{:<20}{}",
        "Chat Messages", a.chat_count, b.chat_count
    );
    let _ = writeln!(
        out,
        "{:<21}{:<20}{}",
        "Elapsed (sec)", a.elapsed_seconds, b.elapsed_seconds
    );
    let _ = writeln!(
        out,
        "{:<21}{:<20}{}",
        "Source",
        a.provenance.label(),
        b.provenance.label()
    );

    for result in [a, b] {
        let _ = writeln!(out, "\n{}", "=".repeat(70));
        let _ = writeln!(out, "  {} Narrator Messages", result.provider.to_uppercase());
        let _ = writeln!(out, "{}", "=".repeat(70));
        for (index, line) in result.messages.iter().enumerate() {
            let _ = writeln!(
                out,
                "\n--- {} Msg {} ---",
                result.provider,
                index + 1
            );
            let _ = writeln!(out, "{}", truncate_preview(&line.message));
        }
    }
    out
}
