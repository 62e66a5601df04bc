use html_escape::encode_text;

use crate::types::api::PasteView;

/// The landing page with the paste form.
pub const INDEX_PAGE: &str = include_str!("../assets/index.html");

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>body{{font-family:sans-serif;max-width:60rem;margin:2rem auto;padding:0 1rem}}pre{{white-space:pre-wrap;background:#f4f4f4;padding:1rem}}</style>
</head>
<body>{body}</body></html>"#
    )
}

pub fn paste_page(view: &PasteView) -> String {
    let mut meta = Vec::new();
    if let Some(remaining) = view.remaining_views {
        meta.push(format!("{remaining} views remaining"));
    }
    if let Some(expires_at) = &view.expires_at {
        meta.push(format!("expires {}", encode_text(expires_at)));
    }
    let meta = if meta.is_empty() {
        String::new()
    } else {
        format!("<p><small>{}</small></p>", meta.join(" &middot; "))
    };

    let content = encode_text(&view.content);
    layout("Paste", &format!("<pre>{content}</pre>{meta}<p><a href=\"/\">new paste</a></p>"))
}

pub fn unavailable_page() -> String {
    layout(
        "Unavailable",
        "<h1>Unavailable</h1><p>This paste is unavailable, expired, or does not exist.</p>",
    )
}

pub fn error_page() -> String {
    layout("Error", "<h1>Error</h1><p>Something went wrong. Please try again later.</p>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_escaped() {
        let page = paste_page(&PasteView {
            content: "<script>alert(1)</script>".to_owned(),
            remaining_views: Some(2),
            expires_at: None,
        });
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("2 views remaining"));
        assert!(!page.contains("expires"));
    }
}
