//! Fetch a web page and pull out its readable text.

use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ApiError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

/// Elements whose text is never part of the article.
const SKIPPED: &[&str] = &["script", "style", "noscript", "template", "svg"];

pub async fn fetch_page_text(client: &reqwest::Client, url: &str) -> Result<String, ApiError> {
    let response = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| ApiError::bad_gateway(format!("Failed to fetch URL: {e}")))?;

    if let Some(length) = response.content_length() {
        if length > MAX_PAGE_BYTES as u64 {
            return Err(ApiError::bad_gateway(format!(
                "Page too large: {length} bytes"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::bad_gateway(format!("Failed to fetch URL: {e}")))?;
    if bytes.len() > MAX_PAGE_BYTES {
        return Err(ApiError::bad_gateway(format!(
            "Page too large: {} bytes",
            bytes.len()
        )));
    }

    let html = String::from_utf8_lossy(&bytes);
    let text = extract_text(&html)?;
    debug!("Extracted {} chars from {}", text.chars().count(), url);
    Ok(text)
}

/// Paragraph text when the page has any, otherwise all visible body text.
pub fn extract_text(html: &str) -> Result<String, ApiError> {
    let document = Html::parse_document(html);
    let paragraphs = selector("p")?;
    let body = selector("body")?;

    let text = document
        .select(&paragraphs)
        .map(visible_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !text.is_empty() {
        return Ok(text);
    }

    Ok(document
        .select(&body)
        .map(visible_text)
        .collect::<Vec<_>>()
        .join(" "))
}

fn selector(css: &str) -> Result<Selector, ApiError> {
    Selector::parse(css).map_err(|e| ApiError::internal(format!("Invalid selector {css}: {e}")))
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut words = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED.contains(&el.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Ignored title</title><style>p { color: red; }</style></head>
  <body>
    <nav>Home | About</nav>
    <article>
      <h1>Headline</h1>
      <p>The river   rose overnight,
         flooding the lower town.</p>
      <p>Residents were <b>evacuated</b> by boat.<script>track();</script></p>
      <p>   </p>
    </article>
  </body>
</html>"#;

    #[test]
    fn test_paragraph_text_is_joined_and_normalised() {
        let text = extract_text(ARTICLE).unwrap();
        assert_eq!(
            text,
            "The river rose overnight, flooding the lower town. Residents were evacuated by boat."
        );
    }

    #[test]
    fn test_body_text_when_no_paragraphs() {
        let html = "<html><body><div>Plain   text page</div><script>var x = 1;</script>\
                    <noscript>enable js</noscript></body></html>";
        assert_eq!(extract_text(html).unwrap(), "Plain text page");
    }

    #[test]
    fn test_empty_page() {
        assert_eq!(extract_text("").unwrap(), "");
    }
}
