//! Per-replay metrics and the summary histogram printed after a run.

use quill_core::RenderOutcome;
use std::time::Duration;

/// What one replayed generation cost and produced.
#[derive(Debug, Clone)]
pub struct ReplayMetrics {
    pub label: String,
    pub messages_sent: usize,
    pub chunks_received: usize,
    pub tool_uses: u32,
    pub first_chunk_after: Option<Duration>,
    pub wall_clock_time: Duration,
    pub failed_upstream: bool,
}

impl ReplayMetrics {
    pub fn from_outcome(label: impl Into<String>, outcome: &RenderOutcome) -> Self {
        Self {
            label: label.into(),
            messages_sent: outcome.sent_message_ids.len(),
            chunks_received: outcome.chunks_received,
            tool_uses: outcome.total_tool_uses(),
            first_chunk_after: outcome.first_chunk_after,
            wall_clock_time: outcome.elapsed,
            failed_upstream: outcome.is_error(),
        }
    }
}

/// Format a Duration as human-readable elapsed time (e.g., "1h 23m 45s").
pub fn format_elapsed_time(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    match (hours, minutes, seconds) {
        (h, m, s) if h > 0 => format!("{}h {}m {}s", h, m, s),
        (_, m, s) if m > 0 => format!("{}m {}s", m, s),
        (_, _, s) if s > 0 => format!("{}s", s),
        _ => format!("{}ms", duration.as_millis()),
    }
}

/// One line per replay: messages sent and wall clock time as bars.
pub fn generate_replay_histogram(replays: &[ReplayMetrics]) -> String {
    if replays.is_empty() {
        return "   No replays finished".to_string();
    }

    const MAX_BAR_WIDTH: usize = 30;
    const MESSAGE_CHAR: char = '█';
    const TIME_CHAR: char = '▓';

    let max_messages = replays.iter().map(|r| r.messages_sent).max().unwrap_or(1);
    let max_time_ms = replays
        .iter()
        .map(|r| duration_ms(r.wall_clock_time))
        .max()
        .unwrap_or(1);
    let label_width = replays
        .iter()
        .map(|r| r.label.chars().count())
        .max()
        .unwrap_or(0)
        .min(24);

    let mut out = String::new();
    out.push_str("\n📊 Replay summary:\n");
    out.push_str(&format!(
        "   {} = messages sent (max: {})\n",
        MESSAGE_CHAR, max_messages
    ));
    out.push_str(&format!(
        "   {} = wall clock time (max: {})\n\n",
        TIME_CHAR,
        format_duration_ms(max_time_ms)
    ));

    for replay in replays {
        let time_ms = duration_ms(replay.wall_clock_time);
        let message_bar = MESSAGE_CHAR
            .to_string()
            .repeat(scale_bar(replay.messages_sent as u64, max_messages as u64, MAX_BAR_WIDTH));
        let time_bar = TIME_CHAR
            .to_string()
            .repeat(scale_bar(time_ms, max_time_ms, MAX_BAR_WIDTH));
        let marker = if replay.failed_upstream { " ⚠" } else { "" };

        out.push_str(&format!(
            "   {:<width$} {:>3} msgs │{:<30}│{}\n",
            truncate_label(&replay.label, label_width),
            replay.messages_sent,
            message_bar,
            marker,
            width = label_width
        ));
        out.push_str(&format!(
            "   {:<width$} {:>8} │{:<30}│\n",
            "",
            format_duration_ms(time_ms),
            time_bar,
            width = label_width
        ));
    }

    append_summary_statistics(&mut out, replays);
    out
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

/// Scale a value to a bar length proportional to max.
fn scale_bar(value: u64, max: u64, max_width: usize) -> usize {
    if max == 0 {
        0
    } else {
        ((value as f64 / max as f64) * max_width as f64) as usize
    }
}

fn format_duration_ms(ms: u64) -> String {
    match ms {
        ms if ms < 1000 => format!("{}ms", ms),
        ms if ms < 60_000 => format!("{:.1}s", ms as f64 / 1000.0),
        ms => {
            let minutes = ms / 60_000;
            let seconds = (ms % 60_000) as f64 / 1000.0;
            format!("{}m{:.1}s", minutes, seconds)
        }
    }
}

fn truncate_label(label: &str, width: usize) -> String {
    if label.chars().count() <= width {
        return label.to_string();
    }
    let kept: String = label.chars().take(width.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn append_summary_statistics(out: &mut String, replays: &[ReplayMetrics]) {
    let total_messages: usize = replays.iter().map(|r| r.messages_sent).sum();
    let total_chunks: usize = replays.iter().map(|r| r.chunks_received).sum();
    let total_tools: u32 = replays.iter().map(|r| r.tool_uses).sum();
    let failed = replays.iter().filter(|r| r.failed_upstream).count();
    let latencies: Vec<Duration> = replays.iter().filter_map(|r| r.first_chunk_after).collect();

    out.push_str("\n📈 Totals:\n");
    out.push_str(&format!(
        "   • {} messages from {} chunks across {} replays\n",
        total_messages,
        total_chunks,
        replays.len()
    ));
    out.push_str(&format!("   • Tool calls: {}\n", total_tools));
    if !latencies.is_empty() {
        let avg = latencies.iter().sum::<Duration>() / latencies.len() as u32;
        out.push_str(&format!(
            "   • Average first chunk: {}\n",
            format_duration_ms(duration_ms(avg))
        ));
    }
    if failed > 0 {
        out.push_str(&format!("   • Upstream failures: {}\n", failed));
    }
}
