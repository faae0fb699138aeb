//! Readable-text extraction from HTML.
//!
//! Pulls the title, the content-bearing text blocks, and candidate content
//! images out of a page. Chrome junk (scripts, nav, footers) is dropped by
//! only walking content-level elements.

use scraper::{Html, Selector};
use url::Url;

pub struct ExtractedPage {
    pub title: String,
    pub text: String,
    pub image_urls: Vec<String>,
}

const MAX_IMAGES: usize = 10;

pub fn extract_page(html: &str, page_url: &str) -> ExtractedPage {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            doc.select(&sel)
                .next()
                .map(|t| t.text().collect::<String>())
        })
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let text = extract_text(&doc);
    let image_urls = extract_images(&doc, page_url);

    ExtractedPage {
        title,
        text,
        image_urls,
    }
}

fn extract_text(doc: &Html) -> String {
    let sel = Selector::parse("p, h1, h2, h3, h4, h5, h6, li, pre, blockquote, td")
        .expect("static selector");
    let mut blocks: Vec<String> = Vec::new();
    for element in doc.select(&sel) {
        // Nested matches (li inside li, td inside table rows) would repeat
        // text; skip elements whose parent also matches the selector.
        let parent_matches = element
            .parent()
            .and_then(scraper::ElementRef::wrap)
            .map(|p| {
                matches!(
                    p.value().name(),
                    "p" | "li" | "pre" | "blockquote" | "td"
                )
            })
            .unwrap_or(false);
        if parent_matches {
            continue;
        }

        let block = element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !block.is_empty() {
            blocks.push(block);
        }
    }
    blocks.join("\n\n")
}

/// Filename fragments that mark decorative rather than content images.
const NOISE_MARKERS: &[&str] = &[
    "logo", "icon", "sprite", "avatar", "badge", "pixel", "spacer", "tracking",
];

fn extract_images(doc: &Html, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let sel = Selector::parse("img[src]").expect("static selector");

    let mut out = Vec::new();
    for img in doc.select(&sel) {
        if out.len() >= MAX_IMAGES {
            break;
        }
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if src.starts_with("data:") {
            continue;
        }
        let lower = src.to_ascii_lowercase();
        if NOISE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            continue;
        }
        // Tiny declared dimensions are tracking pixels or UI chrome.
        let too_small = ["width", "height"].iter().any(|attr| {
            img.value()
                .attr(attr)
                .and_then(|v| v.trim_end_matches("px").parse::<u32>().ok())
                .map(|n| n < 100)
                .unwrap_or(false)
        });
        if too_small {
            continue;
        }

        if let Ok(resolved) = base.join(src) {
            let resolved = resolved.to_string();
            if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title>  Test   Page </title></head>
        <body>
          <nav><a href="/">Home</a></nav>
          <h1>Heading</h1>
          <p>First paragraph with <b>bold</b> text.</p>
          <script>var x = "ignored";</script>
          <img src="/images/figure-1.png" width="640">
          <img src="/assets/logo.svg">
          <img src="pixel.gif" width="1" height="1">
          <img src="data:image/png;base64,xyz">
          <footer><p>Copyright</p></footer>
        </body></html>
    "#;

    #[test]
    fn extracts_title_and_text() {
        let page = extract_page(PAGE, "https://example.com/article");
        assert_eq!(page.title, "Test Page");
        assert!(page.text.contains("Heading"));
        assert!(page.text.contains("First paragraph with bold text."));
        assert!(!page.text.contains("var x"));
    }

    #[test]
    fn filters_and_resolves_images() {
        let page = extract_page(PAGE, "https://example.com/article");
        assert_eq!(
            page.image_urls,
            vec!["https://example.com/images/figure-1.png".to_string()]
        );
    }
}
