//! Heuristic bot-traffic classification
//!
//! Three independent checks are OR-ed together: a user-agent signature list,
//! known crawler IP prefixes, and request timing. Everything here is pure so it
//! can run on every request without synchronization.

use std::time::Duration;

/// Requests arriving faster than this after the previous one look scripted
pub const FAST_REPEAT_THRESHOLD: Duration = Duration::from_millis(200);

/// Case-insensitive substrings identifying automated user agents
const USER_AGENT_SIGNATURES: &[&str] = &[
    // generic markers, anchored so device names like "Cubot" stay human
    "bot/",
    "bot;",
    "bot)",
    "+http",
    "crawler",
    "spider",
    "crawling",
    // search engines
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandex",
    "sogou",
    "exabot",
    "applebot",
    // social previews
    "facebookexternalhit",
    "facebot",
    "twitterbot",
    "linkedinbot",
    "slackbot",
    "discordbot",
    "telegrambot",
    "pinterestbot",
    "embedly",
    "quora link preview",
    // uptime and SEO tooling
    "pingdom",
    "uptimerobot",
    "statuscake",
    "site24x7",
    "ahrefs",
    "semrush",
    "mj12bot",
    "dotbot",
    "rogerbot",
    "screaming frog",
    "lighthouse",
    "gtmetrix",
    // headless browsers and scripted clients
    "headlesschrome",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "webdriver",
    "python-requests",
    "python-urllib",
    "curl/",
    "wget/",
    "go-http-client",
    "libwww-perl",
    "okhttp",
    "axios/",
    "node-fetch",
];

/// User agents that identify a link-preview fetcher only at the very start;
/// the same product names appear inside in-app browser user agents
const USER_AGENT_PREFIXES: &[&str] = &["whatsapp/"];

/// Address prefixes of well-known crawler ranges
const CRAWLER_IP_PREFIXES: &[&str] = &[
    // Googlebot
    "66.249.",
    "64.233.",
    // Bingbot
    "157.55.",
    "207.46.",
    "40.77.167.",
    // Yandex
    "5.255.",
    "77.88.",
    "95.108.",
    // Baidu
    "180.76.",
    "123.125.71.",
    // Facebook crawler
    "69.171.",
    "173.252.",
    "31.13.",
    // Applebot
    "17.58.",
    // Ahrefs / Semrush
    "54.36.148.",
    "185.191.171.",
];

/// Request signals available to the classifier
#[derive(Debug, Clone, Default)]
pub struct BotSignals<'a> {
    pub user_agent: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub referrer: Option<&'a str>,
    /// Time since the same client's previous request. `None` on a first load.
    pub request_interval: Option<Duration>,
}

/// Which heuristic flagged the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotReason {
    UserAgentSignature,
    CrawlerIpRange,
    FastRepeat,
    MissingReferrer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotVerdict {
    pub is_bot: bool,
    pub reason: Option<BotReason>,
}

impl BotVerdict {
    fn human() -> Self {
        Self {
            is_bot: false,
            reason: None,
        }
    }

    fn bot(reason: BotReason) -> Self {
        Self {
            is_bot: true,
            reason: Some(reason),
        }
    }
}

pub fn is_bot(signals: &BotSignals<'_>) -> bool {
    classify(signals).is_bot
}

/// Classify a request, reporting the first heuristic that matched
pub fn classify(signals: &BotSignals<'_>) -> BotVerdict {
    if signals.user_agent.is_some_and(matches_signature) {
        return BotVerdict::bot(BotReason::UserAgentSignature);
    }

    if signals.ip.is_some_and(in_crawler_range) {
        return BotVerdict::bot(BotReason::CrawlerIpRange);
    }

    if let Some(interval) = signals.request_interval {
        if interval < FAST_REPEAT_THRESHOLD {
            return BotVerdict::bot(BotReason::FastRepeat);
        }

        // A repeat request from a real browser carries the embedding page
        let has_referrer = signals
            .referrer
            .is_some_and(|referrer| !referrer.trim().is_empty());
        if !has_referrer {
            return BotVerdict::bot(BotReason::MissingReferrer);
        }
    }

    BotVerdict::human()
}

fn matches_signature(user_agent: &str) -> bool {
    let ua = user_agent.trim().to_ascii_lowercase();
    USER_AGENT_SIGNATURES.iter().any(|sig| ua.contains(sig))
        || USER_AGENT_PREFIXES.iter().any(|prefix| ua.starts_with(prefix))
}

fn in_crawler_range(ip: &str) -> bool {
    let ip = ip.trim();
    CRAWLER_IP_PREFIXES.iter().any(|prefix| ip.starts_with(prefix))
}
