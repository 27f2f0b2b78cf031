//! Kodi NFO documents.
//!
//! A `<movie>` element per title; empty fields are omitted. When the IMDb id
//! is known its URL follows the document on its own line, which Kodi's
//! scrapers pick up.

use std::fmt::Write;

use crate::metadata::MetadataRecord;

/// Escape text for XML and HTML element content and attribute values.
pub fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn element(out: &mut String, indent: &str, name: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "{}<{}>{}</{}>", indent, name, escape_markup(value), name);
    }
}

/// Render the NFO document for a record.
pub fn render(record: &MetadataRecord) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<movie>\n");
    let indent = "  ";

    element(&mut out, indent, "title", &record.title);
    element(&mut out, indent, "sorttitle", &record.sort_title);
    if let Some(year) = record.year {
        element(&mut out, indent, "year", &year.to_string());
    }
    for thumb in &record.thumbs {
        let _ = writeln!(
            out,
            "{}<thumb aspect=\"{}\">{}</thumb>",
            indent,
            escape_markup(&thumb.aspect),
            escape_markup(&thumb.url)
        );
    }
    for director in &record.directors {
        element(&mut out, indent, "director", director);
    }
    for actor in &record.actors {
        out.push_str("  <actor>\n");
        let _ = writeln!(out, "    <name>{}</name>", escape_markup(&actor.name));
        element(&mut out, "    ", "role", &actor.role);
        let _ = writeln!(out, "    <order>{}</order>", actor.order);
        out.push_str("  </actor>\n");
    }
    if let Some(runtime) = record.runtime {
        element(&mut out, indent, "runtime", &runtime.to_string());
    }
    element(&mut out, indent, "trailer", &record.trailer);
    element(&mut out, indent, "outline", &record.outline);
    element(&mut out, indent, "plot", &record.plot);
    element(&mut out, indent, "tagline", &record.tagline);
    element(&mut out, indent, "genre", &record.genre);
    out.push_str("</movie>");

    if let Some(url) = record.imdb_url() {
        let _ = write!(out, "\n{}\n", url);
    }
    out
}
