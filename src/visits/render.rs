//! HTML page for the visit log, filled from an embedded template

use anyhow::{Context, Result};
use rust_embed::RustEmbed;

use crate::models::{Visit, VisitLog};

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

const INDEX_TEMPLATE: &str = "index.html";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render the index page for `log`
pub fn render_index(log: &VisitLog) -> Result<String> {
    let template = Templates::get(INDEX_TEMPLATE)
        .with_context(|| format!("template {INDEX_TEMPLATE} is not embedded"))?;
    let template = std::str::from_utf8(&template.data)
        .with_context(|| format!("template {INDEX_TEMPLATE} is not valid UTF-8"))?;

    let rows: String = log.visits.iter().map(render_row).collect();

    // Placeholders are substituted into the template only, never into values
    Ok(template
        .replace("{{ipv4_count}}", &log.ipv4_count.to_string())
        .replace("{{rows}}", &rows))
}

fn render_row(visit: &Visit) -> String {
    format!(
        "<tr class=\"visit\"><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        escape_html(&visit.ip),
        visit.timestamp.format(TIMESTAMP_FORMAT),
        escape_html(&visit.user_agent),
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
