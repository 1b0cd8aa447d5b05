//! Web search via the DuckDuckGo HTML endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

const MAX_RESULTS: usize = 5;

/// Search the web (DuckDuckGo HTML, no API key needed).
pub struct WebSearch {
    timeout: Duration,
}

impl WebSearch {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web. Useful for questions about current events, outages, vendor documentation or error messages. Ask targeted questions."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("query", ParamKind::String, "The search query"),
            ParamSpec::optional(
                "num_results",
                ParamKind::Integer,
                "Maximum number of results to return (default: 5)",
                json!(MAX_RESULTS),
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let query = args.str("query")?;
        let limit = args.int("num_results")?.clamp(1, MAX_RESULTS as i64) as usize;

        let encoded_query = urlencoding::encode(query);
        let url = format!("https://html.duckduckgo.com/html/?q={}", encoded_query);

        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; netops-agent/1.0)")
            .timeout(self.timeout)
            .build()?;

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }
        let html = response.text().await?;

        let results = extract_ddg_results(&html, limit);
        tracing::debug!(query, results = results.len(), "web search finished");

        if results.is_empty() {
            Ok(ToolOutput::Text(format!("No results found for: {}", query)))
        } else {
            Ok(ToolOutput::Text(results.join("\n\n")))
        }
    }
}

/// Extract search results from DuckDuckGo HTML.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<String> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"result__body\"").skip(1) {
        if results.len() >= limit {
            break;
        }

        let title = field_text(chunk, "result__a").unwrap_or_default();
        let snippet = field_text(chunk, "result__snippet").unwrap_or("No snippet");
        let url = field_text(chunk, "result__url").unwrap_or("");

        if !title.is_empty() {
            results.push(format!(
                "**{}**\n{}\nURL: {}",
                html_decode(title),
                html_decode(snippet),
                url
            ));
        }
    }

    results
}

/// Text between the opening tag carrying `class` and the next `<`.
fn field_text<'a>(chunk: &'a str, class: &str) -> Option<&'a str> {
    chunk
        .split(&format!("class=\"{}\"", class))
        .nth(1)
        .and_then(|s| s.split('>').nth(1))
        .and_then(|s| s.split('<').next())
        .map(str::trim)
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <div class="result__body">
          <a class="result__a" href="/l/?u=1">Cloudflare &amp; DNS outage</a>
          <a class="result__snippet">Resolvers &quot;1.1.1.1&quot; degraded</a>
          <a class="result__url"> cloudflarestatus.com </a>
        </div>
        <div class="result__body">
          <a class="result__a" href="/l/?u=2">Second</a>
        </div>
        <div class="result__body">
          <a class="result__a" href="/l/?u=3">Third</a>
        </div>
    "#;

    #[test]
    fn extracts_title_snippet_and_url() {
        let results = extract_ddg_results(PAGE, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0],
            "**Cloudflare & DNS outage**\nResolvers \"1.1.1.1\" degraded\nURL: cloudflarestatus.com"
        );
        assert!(results[1].contains("No snippet"));
    }

    #[test]
    fn respects_limit() {
        assert_eq!(extract_ddg_results(PAGE, 2).len(), 2);
    }

    #[test]
    fn empty_page_has_no_results() {
        assert!(extract_ddg_results("<html></html>", 5).is_empty());
    }
}
