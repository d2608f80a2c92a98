//! Keyword, domain, and label heuristics for derived memory metadata.
//!
//! Connectors only depend on the `Heuristics` methods, never on the tables below.

use chrono::{DateTime, Timelike, Utc};
use chronicle_core::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;

const DOMAIN_CATEGORIES: &[(&str, &str)] = &[
    ("github.com", "development"),
    ("gitlab.com", "development"),
    ("atlassian.net", "work"),
    ("slack.com", "work"),
    ("linkedin.com", "professional"),
    ("amazon.com", "shopping"),
    ("ebay.com", "shopping"),
    ("etsy.com", "shopping"),
    ("paypal.com", "finance"),
    ("stripe.com", "finance"),
    ("chase.com", "finance"),
    ("facebookmail.com", "social"),
    ("instagram.com", "social"),
    ("twitter.com", "social"),
    ("x.com", "social"),
    ("airbnb.com", "travel"),
    ("booking.com", "travel"),
    ("uber.com", "travel"),
    ("spotify.com", "entertainment"),
    ("netflix.com", "entertainment"),
];

const CONTENT_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\b(invoice|receipt|payment|billing|refund)\b", "finance"),
    (r"(?i)\b(meeting|calendar|invite|invitation|agenda)\b", "meeting"),
    (r"(?i)\b(flight|hotel|booking|itinerary|boarding)\b", "travel"),
    (r"(?i)\b(order|shipped|shipping|delivery|tracking)\b", "shopping"),
    (r"(?i)\b(urgent|asap|immediately|action required)\b", "urgent"),
    (r"(?i)\b(birthday|anniversary|wedding|party)\b", "celebration"),
];

/// Compiled heuristic tables, built once per connector.
pub struct Heuristics {
    email: Regex,
    content: Vec<(Regex, &'static str)>,
}

impl Heuristics {
    pub fn new() -> Result<Self> {
        let email = Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
            .map_err(|e| Error::backend("heuristics email pattern", e))?;
        let content = CONTENT_PATTERNS
            .iter()
            .map(|(pattern, tag)| {
                Regex::new(pattern)
                    .map(|re| (re, *tag))
                    .map_err(|e| Error::backend("heuristics content pattern", e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { email, content })
    }

    /// Lowercased addresses found in a header like `"Ann <ann@x.io>, bob@y.io"`.
    pub fn email_addresses(&self, header: &str) -> Vec<String> {
        self.email
            .find_iter(header)
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect()
    }

    /// Category of a sender domain. Subdomains match their parent entry.
    pub fn domain_category(&self, domain: &str) -> Option<&'static str> {
        let domain = domain.trim().to_ascii_lowercase();
        DOMAIN_CATEGORIES
            .iter()
            .find(|(known, _)| domain == *known || domain.ends_with(&format!(".{known}")))
            .map(|(_, category)| *category)
    }

    pub fn content_tags(&self, text: &str) -> BTreeSet<String> {
        self.content
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, tag)| tag.to_string())
            .collect()
    }

    /// Tags for Gmail labels. System labels map to fixed tags; user labels are lowercased.
    pub fn label_tags<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        labels
            .into_iter()
            .filter_map(|label| match label {
                "IMPORTANT" => Some("important".to_string()),
                "STARRED" => Some("starred".to_string()),
                "SENT" => Some("sent".to_string()),
                "CATEGORY_PERSONAL" => Some("personal".to_string()),
                "CATEGORY_SOCIAL" => Some("social".to_string()),
                "CATEGORY_PROMOTIONS" => Some("promotions".to_string()),
                "CATEGORY_UPDATES" => Some("updates".to_string()),
                "CATEGORY_FORUMS" => Some("forums".to_string()),
                "INBOX" | "UNREAD" | "DRAFT" | "SPAM" | "TRASH" | "CHAT" => None,
                other => {
                    let tag = other.trim().to_lowercase();
                    (!tag.is_empty()).then_some(tag)
                }
            })
            .collect()
    }

    /// `morning`, `afternoon`, `evening`, or `night` (UTC hour).
    pub fn time_of_day(&self, at: DateTime<Utc>) -> &'static str {
        match at.hour() {
            5..=11 => "morning",
            12..=16 => "afternoon",
            17..=20 => "evening",
            _ => "night",
        }
    }
}

/// Domain part of an email address.
pub fn email_domain(address: &str) -> Option<&str> {
    address.rsplit_once('@').map(|(_, domain)| domain)
}
