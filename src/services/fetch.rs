use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::warn;

use crate::model::Publication;
use crate::semantic::normalize_whitespace;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const FETCH_ATTEMPTS: usize = 3;
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fetches `{title, abstract}` metadata for a publication URL. Site support
/// is intentionally narrow and the extraction purely syntactic; an
/// unsupported host or a page that drifted from the expected shape is an
/// error the caller records and skips.
pub struct PublicationFetcher {
    http: reqwest::blocking::Client,
}

impl PublicationFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("failed to build fetch http client")?;

        Ok(Self { http })
    }

    pub fn fetch(&self, url: &str) -> Result<Publication> {
        let (title, abstract_text) = if url.starts_with("https://arxiv.org") {
            let api_url = arxiv_api_url(url)?;
            let body = self.get_with_retry(&api_url)?;
            parse_arxiv_feed(&body).with_context(|| format!("unexpected arxiv response for {url}"))?
        } else if url.starts_with("https://openreview.net") {
            let body = self.get_with_retry(url)?;
            parse_citation_meta(&body)
                .with_context(|| format!("citation metadata not found at {url}"))?
        } else if url.starts_with("https://proceedings.neurips.cc") {
            let body = self.get_with_retry(url)?;
            parse_neurips_page(&body)
                .with_context(|| format!("abstract block not found at {url}"))?
        } else {
            bail!("unsupported publication host: {url}");
        };

        Ok(Publication {
            title,
            abstract_text,
            source_url: Some(url.to_string()),
        })
    }

    fn get_with_retry(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url) {
                Ok(body) => return Ok(body),
                Err(error) => {
                    if attempt >= FETCH_ATTEMPTS {
                        return Err(error.context(format!("giving up after {attempt} attempts")));
                    }
                    warn!(url, attempt, error = %error, "fetch attempt failed, retrying");
                    std::thread::sleep(FETCH_RETRY_DELAY);
                }
            }
        }
    }

    fn get_once(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned {status}");
        }

        response
            .text()
            .with_context(|| format!("failed to read body from {url}"))
    }
}

pub fn arxiv_api_url(url: &str) -> Result<String> {
    let pattern = Regex::new(r"arxiv\.org/abs/([\w.-]+)").context("arxiv id pattern")?;
    let arxiv_id = pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
        .with_context(|| format!("could not extract arxiv id from {url}"))?;

    Ok(format!(
        "http://export.arxiv.org/api/query?id_list={arxiv_id}"
    ))
}

/// Pulls title and summary out of the first `<entry>` of an arXiv Atom feed.
pub fn parse_arxiv_feed(xml: &str) -> Result<(String, String)> {
    let entry_pattern = Regex::new(r"(?s)<entry>(.*?)</entry>").context("entry pattern")?;
    let entry = entry_pattern
        .captures(xml)
        .and_then(|captures| captures.get(1))
        .map(|entry| entry.as_str())
        .context("feed contains no entry")?;

    let title = extract_tag(entry, "title").context("entry has no title")?;
    let summary = extract_tag(entry, "summary").context("entry has no summary")?;
    Ok((title, summary))
}

/// Pulls `citation_title` / `citation_abstract` meta tags out of an HTML page
/// (the OpenReview layout).
pub fn parse_citation_meta(html: &str) -> Result<(String, String)> {
    let title = extract_meta_content(html, "citation_title").context("citation_title missing")?;
    let abstract_text =
        extract_meta_content(html, "citation_abstract").context("citation_abstract missing")?;
    Ok((title, abstract_text))
}

/// Pulls the first `<h4>` heading and the paragraph following the
/// `<h4>Abstract</h4>` heading out of a NeurIPS proceedings page.
pub fn parse_neurips_page(html: &str) -> Result<(String, String)> {
    let title_pattern = Regex::new(r"(?s)<h4[^>]*>(.*?)</h4>").context("h4 pattern")?;
    let title = title_pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|title| clean_fragment(title.as_str()))
        .context("page has no h4 title")?;

    let abstract_pattern =
        Regex::new(r"(?s)<h4[^>]*>\s*Abstract\s*</h4>\s*<p[^>]*>(.*?)</p>")
            .context("abstract pattern")?;
    let abstract_text = abstract_pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|text| clean_fragment(text.as_str()))
        .context("page has no abstract paragraph")?;

    Ok((title, abstract_text))
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>")).ok()?;
    pattern
        .captures(xml)
        .and_then(|captures| captures.get(1))
        .map(|value| clean_fragment(value.as_str()))
}

fn extract_meta_content(html: &str, name: &str) -> Option<String> {
    let patterns = [
        format!(r#"<meta[^>]*name="{name}"[^>]*content="([^"]*)""#),
        format!(r#"<meta[^>]*content="([^"]*)"[^>]*name="{name}""#),
    ];

    for pattern in patterns {
        let regex = Regex::new(&pattern).ok()?;
        if let Some(value) = regex
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|value| clean_fragment(value.as_str()))
        {
            return Some(value);
        }
    }
    None
}

fn clean_fragment(fragment: &str) -> String {
    let tag_pattern = Regex::new(r"<[^>]+>").expect("tag pattern is valid");
    let without_tags = tag_pattern.replace_all(fragment, " ");
    normalize_whitespace(&decode_entities(&without_tags))
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::{arxiv_api_url, parse_arxiv_feed, parse_citation_meta, parse_neurips_page};

    #[test]
    fn arxiv_api_url_extracts_identifier() {
        let url = arxiv_api_url("https://arxiv.org/abs/1706.03762").expect("valid url");
        assert_eq!(url, "http://export.arxiv.org/api/query?id_list=1706.03762");
    }

    #[test]
    fn arxiv_api_url_rejects_non_abs_url() {
        assert!(arxiv_api_url("https://arxiv.org/list/cs.LG/recent").is_err());
    }

    #[test]
    fn parse_arxiv_feed_reads_first_entry() {
        let xml = r#"<feed><title>query feed</title><entry>
            <title>Attention Is
            All You Need</title>
            <summary>  The dominant sequence transduction models...  </summary>
        </entry></feed>"#;

        let (title, summary) = parse_arxiv_feed(xml).expect("well-formed feed");
        assert_eq!(title, "Attention Is All You Need");
        assert_eq!(summary, "The dominant sequence transduction models...");
    }

    #[test]
    fn parse_citation_meta_reads_both_attribute_orders() {
        let html = r#"<head>
            <meta name="citation_title" content="Deep Residual Learning"/>
            <meta content="We present a residual learning framework." name="citation_abstract"/>
        </head>"#;

        let (title, abstract_text) = parse_citation_meta(html).expect("meta tags present");
        assert_eq!(title, "Deep Residual Learning");
        assert_eq!(abstract_text, "We present a residual learning framework.");
    }

    #[test]
    fn parse_neurips_page_finds_title_and_abstract() {
        let html = r#"<div class="col p-3">
            <h4>Scaling Laws for Neural Language Models</h4>
            <h4>Authors</h4>
            <p>Someone</p>
            <h4>Abstract</h4>
            <p>We study <i>empirical</i> scaling laws.</p>
        </div>"#;

        let (title, abstract_text) = parse_neurips_page(html).expect("expected layout");
        assert_eq!(title, "Scaling Laws for Neural Language Models");
        assert_eq!(abstract_text, "We study empirical scaling laws.");
    }
}
