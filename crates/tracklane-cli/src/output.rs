//! Output formatting for CLI

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracklane_core::{ContentType, DebugSnapshot, SessionEvent, SessionEventRecord};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Everything a demo run produced
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub uri: String,
    pub content_type: ContentType,
    pub snapshot: DebugSnapshot,
    pub events: Vec<SessionEventRecord>,
}

/// One track type of a renderer layout
#[derive(Debug, Serialize, Tabled)]
pub struct LayoutRow {
    pub track: String,
    pub renderer: String,
    pub switchable: bool,
    pub tracks: usize,
    pub names: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "#")]
    sequence: u64,
    time: String,
    event: &'static str,
    detail: String,
}

fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Event fields other than the tag, as compact JSON
fn detail(event: &SessionEvent) -> String {
    match serde_json::to_value(event) {
        Ok(serde_json::Value::Object(mut fields)) => {
            fields.remove("event");
            serde_json::Value::Object(fields).to_string()
        }
        _ => String::new(),
    }
}

pub fn render_demo(report: &DemoReport, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => to_json(report),
        OutputFormat::Table => {
            let rows = report.events.iter().map(|record| EventRow {
                sequence: record.sequence,
                time: record.timestamp.format("%H:%M:%S%.3f").to_string(),
                event: record.event.name(),
                detail: detail(&record.event),
            });
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            format!("{} ({})\n{}\n{}", report.uri, report.content_type, table, summary(&report.snapshot))
        }
        OutputFormat::Text => {
            let mut out = format!("Session {} on {} ({})\n\nEvents:\n", report.snapshot.session_id, report.uri, report.content_type);
            for record in &report.events {
                out.push_str(&format!(
                    "  {:>3}. {:<20} {}\n",
                    record.sequence,
                    record.event.name(),
                    detail(&record.event)
                ));
            }
            out.push('\n');
            out.push_str(&summary(&report.snapshot));
            out
        }
    }
}

fn summary(snapshot: &DebugSnapshot) -> String {
    let mut out = String::from("Final state:\n");
    out.push_str(&format!("  Build: {}\n", snapshot.build_state));
    out.push_str(&format!("  Playback: {} (play when ready: {})\n", snapshot.playback_state, snapshot.play_when_ready));
    out.push_str(&format!("  Position: {}ms of {:?}ms\n", snapshot.position_ms, snapshot.duration_ms));
    if let Some(format) = &snapshot.video_format {
        out.push_str(&format!("  Video: {} {}bps\n", format.id, format.bitrate));
    }
    if let Some(estimate) = snapshot.bandwidth_estimate {
        out.push_str(&format!("  Bandwidth: {}bps\n", estimate));
    }
    if let Some(counters) = &snapshot.codec_counters {
        out.push_str(&format!("  Drop ratio: {:.3}\n", counters.drop_ratio()));
    }
    for (track, selection) in snapshot.selected_tracks.iter() {
        out.push_str(&format!("  {}: {}\n", track, selection));
    }
    out
}

pub fn render_layout(uri: &str, content_type: ContentType, rows: &[LayoutRow], format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => to_json(&serde_json::json!({
            "uri": uri,
            "content_type": content_type,
            "adaptive": content_type.is_adaptive(),
            "tracks": rows,
        })),
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            format!("{} ({})\n{}", uri, content_type, table)
        }
        OutputFormat::Text => {
            let mut out = format!("Content: {}\n  Type: {}\n  Adaptive: {}\n\nTracks:\n", uri, content_type, content_type.is_adaptive());
            for row in rows {
                out.push_str(&format!(
                    "  {:<9} renderer={:<8} tracks={} switchable={} [{}]\n",
                    row.track, row.renderer, row.tracks, row.switchable, row.names
                ));
            }
            out
        }
    }
}
