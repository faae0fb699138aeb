//! arXiv specialization: abs/pdf links resolve through the export API so
//! we get the title and abstract without fighting the HTML. arXiv sources
//! never yield images.

use anyhow::{bail, Context, Result};
use regex::Regex;

const EXPORT_URL: &str = "https://export.arxiv.org/api/query";

/// Pull the paper id out of any arxiv.org URL form
/// (`/abs/2403.01234v2`, `/pdf/2403.01234.pdf`, …).
pub fn arxiv_id(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    if !parsed
        .host_str()
        .map(|h| h == "arxiv.org" || h.ends_with(".arxiv.org"))
        .unwrap_or(false)
    {
        return None;
    }
    let mut segments = parsed.path_segments()?;
    let kind = segments.next()?;
    if !matches!(kind, "abs" | "pdf") {
        return None;
    }
    let id: Vec<&str> = segments.collect();
    if id.is_empty() {
        return None;
    }
    let id = id.join("/");
    Some(id.trim_end_matches(".pdf").to_string())
}

pub struct ArxivPaper {
    pub title: String,
    pub text: String,
}

pub async fn fetch(http: &reqwest::Client, url: &str) -> Result<ArxivPaper> {
    let id = arxiv_id(url).context("not an arXiv abs/pdf URL")?;
    let resp = http
        .get(EXPORT_URL)
        .query(&[("id_list", id.as_str()), ("max_results", "1")])
        .send()
        .await
        .context("arxiv export request failed")?
        .error_for_status()
        .context("arxiv export returned an error status")?;
    let body = resp.text().await.context("arxiv body unreadable")?;
    parse_atom_entry(&body)
}

/// The export API returns Atom; one entry carries `<title>` and
/// `<summary>`. A full XML parser is overkill for two known tags.
fn parse_atom_entry(atom: &str) -> Result<ArxivPaper> {
    let entry = atom
        .split("<entry>")
        .nth(1)
        .context("arxiv response has no entry")?;

    let tag = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(r"(?s)<{name}[^>]*>(.*?)</{name}>")).ok()?;
        let raw = re.captures(entry)?.get(1)?.as_str();
        Some(
            raw.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&amp;", "&")
                .replace("&quot;", "\"")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        )
    };

    let Some(title) = tag("title") else {
        bail!("arxiv entry missing title");
    };
    let summary = tag("summary").unwrap_or_default();
    if summary.is_empty() {
        bail!("arxiv entry missing summary");
    }

    Ok(ArxivPaper {
        text: format!("{title}\n\n{summary}"),
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_from_url_forms() {
        assert_eq!(
            arxiv_id("https://arxiv.org/abs/2403.01234v2").as_deref(),
            Some("2403.01234v2")
        );
        assert_eq!(
            arxiv_id("https://arxiv.org/pdf/2403.01234.pdf").as_deref(),
            Some("2403.01234")
        );
        assert_eq!(arxiv_id("https://example.com/abs/2403.01234"), None);
        assert_eq!(arxiv_id("https://arxiv.org/list/cs.CL/recent"), None);
    }

    #[test]
    fn parses_atom_entry() {
        let atom = r#"<feed><entry>
            <title>Attention Is
            All You Need</title>
            <summary>We propose a new &amp; simple network architecture.</summary>
        </entry></feed>"#;
        let paper = parse_atom_entry(atom).unwrap();
        assert_eq!(paper.title, "Attention Is All You Need");
        assert!(paper.text.contains("new & simple network architecture"));
    }

    #[test]
    fn missing_entry_is_an_error() {
        assert!(parse_atom_entry("<feed></feed>").is_err());
    }
}
