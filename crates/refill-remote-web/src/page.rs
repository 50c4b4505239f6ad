//! Dashboard markup heuristics
//!
//! Everything that knows what the dashboard's HTML looks like lives here:
//! the usage counter element, the CSRF token on the login page, and the
//! label of the reset button.

use regex::Regex;
use scraper::{Html, Selector};

use refill_remote_api::{RemoteError, RemoteResult};

/// What the reset button says about today's quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetControl {
    /// The button offers a reset; `remaining` of `total` are left today
    Available { label: String, remaining: u32, total: u32 },
    /// Today's resets are spent
    Exhausted { label: String },
    /// No recognizable button state on the page
    Unknown,
}

/// Compiled selectors and patterns for one dashboard
#[derive(Debug)]
pub struct PageParser {
    usage_selector: Selector,
    usage_text: Regex,
    button_selector: Selector,
    password_input: Selector,
    button_status: Vec<Regex>,
    csrf_patterns: Vec<Regex>,
    reset_keywords: Vec<String>,
    exhausted_markers: Vec<String>,
}

impl PageParser {
    pub fn new(
        usage_selector: &str,
        reset_keywords: &[String],
        exhausted_markers: &[String],
    ) -> RemoteResult<Self> {
        let selector = |css: &str| {
            Selector::parse(css)
                .map_err(|e| RemoteError::Internal(format!("invalid selector '{}': {}", css, e)))
        };
        let regex = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| RemoteError::Internal(format!("invalid pattern '{}': {}", pattern, e)))
        };

        Ok(Self {
            usage_selector: selector(usage_selector)?,
            usage_text: regex(r"^([\d,]+)\s*/\s*([\d,]+)$")?,
            button_selector: selector("button")?,
            password_input: selector(r#"input[type="password"]"#)?,
            button_status: [
                r"今日已用完\s*\((\d+)/(\d+)\)",
                r"点击重置积分至上限\s*\((\d+)/(\d+)\s*次?\)",
                r"重置积分.*?\((\d+)/(\d+)\)",
                r"(?i)reset.*?\((\d+)\s*/\s*(\d+)\)",
            ]
            .into_iter()
            .map(regex)
            .collect::<RemoteResult<_>>()?,
            csrf_patterns: [
                r#"csrfToken['"]\s*:\s*['"]([^'"]+)['"]"#,
                r#""csrfToken":\s*"([^"]+)""#,
                r#"name="csrfToken"[^>]*value="([^"]+)""#,
                r#"value="([^"]+)"[^>]*name="csrfToken""#,
                r#"<meta name="csrf-token" content="([^"]+)""#,
            ]
            .into_iter()
            .map(regex)
            .collect::<RemoteResult<_>>()?,
            reset_keywords: reset_keywords.to_vec(),
            exhausted_markers: exhausted_markers.to_vec(),
        })
    }

    /// Read `current / ceiling` from the usage element
    pub fn usage(&self, html: &str) -> RemoteResult<(u64, u64)> {
        let document = Html::parse_document(html);

        let mut seen = Vec::new();
        for element in document.select(&self.usage_selector) {
            let text = normalize(&element.text().collect::<String>());
            if let Some(counter) = self.parse_usage_text(&text) {
                return Ok(counter);
            }
            seen.push(text);
        }

        if seen.is_empty() {
            if self.is_login_page_document(&document) {
                return Err(RemoteError::Authentication(
                    "dashboard answered with the login page".into(),
                ));
            }
            return Err(RemoteError::Parse("usage element not found".into()));
        }
        Err(RemoteError::Parse(format!(
            "no usage element reads as current/ceiling (saw {:?})",
            seen
        )))
    }

    /// Parse `"18,881 / 20,000"`; the ceiling must be positive
    pub fn parse_usage_text(&self, text: &str) -> Option<(u64, u64)> {
        let caps = self.usage_text.captures(text.trim())?;
        let current = parse_grouped(caps.get(1)?.as_str())?;
        let ceiling = parse_grouped(caps.get(2)?.as_str())?;
        (ceiling > 0).then_some((current, ceiling))
    }

    /// Find the CSRF token on the login page
    pub fn csrf_token(&self, html: &str) -> Option<String> {
        self.csrf_patterns
            .iter()
            .find_map(|re| re.captures(html))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Whether the page is a login form rather than the dashboard
    pub fn is_login_page(&self, html: &str) -> bool {
        self.is_login_page_document(&Html::parse_document(html))
    }

    fn is_login_page_document(&self, document: &Html) -> bool {
        document.select(&self.password_input).next().is_some()
    }

    /// Work out whether today's reset is still available
    pub fn reset_control(&self, html: &str) -> ResetControl {
        let document = Html::parse_document(html);

        let button = document
            .select(&self.button_selector)
            .map(|el| normalize(&el.text().collect::<String>()))
            .find(|label| {
                self.reset_keywords
                    .iter()
                    .chain(self.exhausted_markers.iter())
                    .any(|word| label.contains(word.as_str()))
            });

        if let Some(label) = button {
            if self.has_exhausted_marker(&label) {
                return ResetControl::Exhausted { label };
            }
            if let Some(control) = self.control_from_counts(&label) {
                return control;
            }
            return ResetControl::Available {
                label,
                remaining: 0,
                total: 0,
            };
        }

        // Status text rendered outside a <button>
        let text = normalize(&document.root_element().text().collect::<String>());
        if let Some(control) = self.control_from_counts(&text) {
            return control;
        }
        if let Some(marker) = self
            .exhausted_markers
            .iter()
            .find(|m| text.contains(m.as_str()))
        {
            return ResetControl::Exhausted {
                label: marker.clone(),
            };
        }
        ResetControl::Unknown
    }

    /// Whether `text` carries one of the "used up" markers
    pub fn has_exhausted_marker(&self, text: &str) -> bool {
        self.exhausted_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }

    fn control_from_counts(&self, text: &str) -> Option<ResetControl> {
        let caps = self.button_status.iter().find_map(|re| re.captures(text))?;
        let label = caps.get(0)?.as_str().to_string();
        // The label counts what is left, not what was spent: "(1/1)" means
        // one reset still available, "(0/1)" means none
        let remaining: u32 = caps.get(1)?.as_str().parse().ok()?;
        let total: u32 = caps.get(2)?.as_str().parse().ok()?;

        if remaining == 0 || self.has_exhausted_marker(&label) {
            Some(ResetControl::Exhausted { label })
        } else {
            Some(ResetControl::Available {
                label,
                remaining,
                total,
            })
        }
    }
}

/// Whether a reset response body signals success
pub fn reset_succeeded(body: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => {
            json.get("success").and_then(|v| v.as_bool()) == Some(true)
                || json.get("status").and_then(|v| v.as_str()) == Some("success")
        }
        Err(_) => body.contains("成功") || body.to_lowercase().contains("success"),
    }
}

/// Whether a session endpoint body shows a logged-in user
pub fn session_has_user(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("user")
                .and_then(|user| user.get("email"))
                .and_then(|email| email.as_str())
                .map(|email| !email.is_empty())
        })
        .unwrap_or(false)
}

fn parse_grouped(digits: &str) -> Option<u64> {
    digits.replace(',', "").parse().ok()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
