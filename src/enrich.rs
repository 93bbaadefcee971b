use core::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const WIKI_SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const WEATHER_URL: &str = "https://wttr.in/";

/// Prefixes that read as an encyclopedia question; the remainder of the
/// message is the topic.
const TOPIC_PREFIXES: &[&str] =
    &["who is ", "who was ", "what is ", "what are ", "tell me about "];

/// Words that read as a weather question; the location is whatever
/// follows "in".
const WEATHER_MARKERS: &[&str] = &["weather", "temperature", "forecast"];

#[derive(Deserialize)]
struct WikiSummary {
    extract: Option<String>,
}

/// Context producers that run ahead of a dispatch. Both lookups are
/// best-effort: failures and timeouts degrade to "no context", never to
/// an error the chat loop has to deal with.
pub struct Enrichment {
    client: Client,
    timeout: Duration,
}

impl Enrichment {
    #[inline]
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// Run every provider the message triggers, concurrently, and fold
    /// the answers into one context block. `None` when nothing
    /// triggered or every lookup came back empty.
    pub async fn gather(&self, message: &str) -> Option<String> {
        let topic = detect_topic(message);
        let location = detect_weather_location(message);

        if topic.is_none() && location.is_none() {
            return None;
        }

        // Joined, not raced: a cancelled chat request drops this future
        // and both lookups with it.
        let (encyclopedia, weather) = futures::join!(
            self.encyclopedia(topic),
            self.weather(location),
        );

        let sections: Vec<String> =
            [encyclopedia, weather].into_iter().flatten().collect();

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n"))
        }
    }

    async fn encyclopedia(&self, topic: Option<&str>) -> Option<String> {
        let topic = topic?;
        let url =
            format!("{WIKI_SUMMARY_URL}{}", urlencode(topic));

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!(topic, status = response.status().as_u16(), "encyclopedia lookup failed");
            return None;
        }

        let summary: WikiSummary = response.json().await.ok()?;
        summary
            .extract
            .map(|extract| format!("Encyclopedia note on {topic}: {extract}"))
    }

    async fn weather(&self, location: Option<&str>) -> Option<String> {
        let location = location?;
        let url = format!("{WEATHER_URL}{}?format=3", urlencode(location));

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!(location, status = response.status().as_u16(), "weather lookup failed");
            return None;
        }

        let line = response.text().await.ok()?;
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(format!("Current weather: {line}"))
        }
    }
}

/// Topic of an encyclopedia-style question, if the message looks like
/// one.
#[must_use]
pub fn detect_topic(message: &str) -> Option<&str> {
    let lower = message.to_lowercase();
    for prefix in TOPIC_PREFIXES {
        if lower.starts_with(prefix) {
            let topic = message.get(prefix.len()..)?.trim().trim_end_matches('?');
            if !topic.is_empty() {
                return Some(topic.trim());
            }
        }
    }
    None
}

/// Location of a weather question: the text after the last " in ", when
/// a weather word appears anywhere in the message.
#[must_use]
pub fn detect_weather_location(message: &str) -> Option<&str> {
    let lower = message.to_lowercase();
    if !WEATHER_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return None;
    }

    let idx = lower.rfind(" in ")?;
    let location = message.get(idx + 4..)?.trim().trim_end_matches('?');
    if location.is_empty() {
        None
    } else {
        Some(location.trim())
    }
}

/// Percent-encode the handful of characters that break a path segment.
/// Spaces become underscores first, matching encyclopedia title
/// conventions.
fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            ' ' => encoded.push('_'),
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => {
                encoded.push(ch);
            }
            _ => {
                let mut buf = [0_u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_encyclopedia_topics() {
        assert_eq!(detect_topic("Who is Ada Lovelace?"), Some("Ada Lovelace"));
        assert_eq!(
            detect_topic("tell me about the Rust language"),
            Some("the Rust language")
        );
        assert_eq!(detect_topic("How do I boil an egg?"), None);
        assert_eq!(detect_topic("who is "), None);
    }

    #[test]
    fn detects_weather_locations() {
        assert_eq!(
            detect_weather_location("what's the weather in Budapest?"),
            Some("Budapest")
        );
        assert_eq!(
            detect_weather_location("temperature in New York"),
            Some("New York")
        );
        assert_eq!(detect_weather_location("weather"), None);
        assert_eq!(detect_weather_location("I live in Oslo"), None);
    }

    #[test]
    fn urlencode_keeps_safe_characters() {
        assert_eq!(urlencode("Ada Lovelace"), "Ada_Lovelace");
        assert_eq!(urlencode("C++"), "C%2B%2B");
        assert_eq!(urlencode("plain-text_1.0~"), "plain-text_1.0~");
    }
}
