//! HTML projection of the transcript.
//!
//! Pure functions from turns and items to HTML fragments. Every item is
//! wrapped in a slot (`data-item`) inside its turn (`data-turn`) so the
//! browser can replace a single item when the reducer touches it.

use std::fmt::Write as _;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd, html};

use crate::transcript::{ContentItem, Transcript, Turn};

/// Render one content item without its slot wrapper.
///
/// `Unknown` items render to an empty string.
pub fn render_item(item: &ContentItem) -> String {
    match item {
        ContentItem::Text { content } => markdown(content),
        ContentItem::CodeInput { content } => code_block("Code", "code-input", content),
        ContentItem::CodeOutput { content } => code_block("Results", "code-output", content),
        // Image markup is produced by `image_markup` and inserted as-is.
        ContentItem::Image { content } => format!(
            r#"<div class="images">{}</div>"#,
            content.concat()
        ),
        ContentItem::Unknown => String::new(),
    }
}

/// Render an item inside its addressable slot.
pub fn render_item_slot(index: usize, item: &ContentItem) -> String {
    format!(
        r#"<div class="item" data-item="{index}">{}</div>"#,
        render_item(item)
    )
}

/// Render a whole turn.
pub fn render_turn(index: usize, turn: &Turn) -> String {
    let role = turn.role.as_str();
    let mut out = format!(r#"<div class="turn turn-{role}" data-turn="{index}">"#);
    let _ = write!(out, r#"<div class="avatar" aria-hidden="true">{}</div>"#, avatar(role));
    out.push_str(r#"<div class="items">"#);
    for (i, item) in turn.items.iter().enumerate() {
        if matches!(item, ContentItem::Unknown) {
            continue;
        }
        out.push_str(&render_item_slot(i, item));
    }
    out.push_str("</div></div>");
    out
}

/// Render every completed turn in order.
pub fn render_transcript(transcript: &Transcript) -> String {
    transcript
        .current()
        .iter()
        .enumerate()
        .map(|(i, turn)| render_turn(i, turn))
        .collect()
}

/// Full chat page: header, seeded transcript, input form.
///
/// `session_id` is read by the browser script from `data-session-id`.
pub fn page(title: &str, session_id: &str, transcript: &Transcript, placeholder: &str) -> String {
    let content = format!(
        r#"<main id="chat" class="chat" data-session-id="{session_id}">
        <section id="transcript" class="transcript" aria-live="polite">{turns}</section>
        <div id="toast" class="toast" role="status" hidden></div>
        <form id="composer" class="composer" autocomplete="off">
            <input type="text" name="message" placeholder="{placeholder}" aria-label="Message" required>
            <button type="submit">Send</button>
            <button type="button" id="stop" hidden>Stop</button>
        </form>
    </main>"#,
        session_id = escape_html(session_id),
        turns = render_transcript(transcript),
        placeholder = escape_html(placeholder),
    );
    html_shell(title, &content)
}

/// Document shell around `content`.
pub fn html_shell(title: &str, content: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <link rel="stylesheet" href="/static/app.css">
    <script defer src="/static/chat.js"></script>
</head>
<body>
    <header class="app-header"><h1>{title}</h1></header>
    {content}
</body>
</html>"#
    )
}

/// Markup for an image produced by a code interpreter call.
///
/// The image bytes are served by the file proxy route, which only answers
/// for files generated in `session_id`.
pub fn image_markup(file_id: &str, session_id: Option<&str>) -> String {
    let id = escape_html(file_id);
    let query = session_id
        .map(|s| format!("?session_id={}", escape_html(s)))
        .unwrap_or_default();
    format!(
        r#"<img class="generated-image" src="/api/files/{id}{query}" alt="Generated image {id}" loading="lazy">"#
    )
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn avatar(role: &str) -> &'static str {
    if role == "user" { "🧑" } else { "🏂" }
}

fn code_block(label: &str, class: &str, code: &str) -> String {
    format!(
        r#"<details class="code-block {class}" open><summary>{label}</summary><pre><code>{}</code></pre></details>"#,
        escape_html(code)
    )
}

/// Markdown to HTML. Raw HTML in the source is shown as text, and links or
/// images with a scripting scheme are reduced to their text.
fn markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    // One entry per open link or image: whether its tags are kept.
    let mut kept: Vec<bool> = Vec::new();
    let events = Parser::new_ext(text, options).filter_map(move |event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Some(Event::Text(raw)),
        Event::Start(Tag::Link { ref dest_url, .. } | Tag::Image { ref dest_url, .. }) => {
            let safe = is_safe_url(dest_url);
            kept.push(safe);
            safe.then_some(event)
        }
        Event::End(TagEnd::Link | TagEnd::Image) => kept.pop().unwrap_or(true).then_some(event),
        other => Some(other),
    });

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

/// Relative URLs and `http`, `https` or `mailto` ones.
fn is_safe_url(url: &str) -> bool {
    let Some((prefix, _)) = url.split_once(':') else {
        return true;
    };
    if prefix.contains(['/', '?', '#']) {
        return true;
    }
    // Browsers ignore whitespace and control characters inside the scheme.
    let scheme: String = prefix
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect();
    ["http", "https", "mailto"]
        .iter()
        .any(|allowed| scheme.eq_ignore_ascii_case(allowed))
}
