//! User-Agent denylist

use lazy_static::lazy_static;
use regex::RegexSet;

/// Lines at or beyond this many characters look like a payload
const MAX_LINE_CHARS: usize = 500;

lazy_static! {
    static ref SUSPICIOUS_AGENTS: RegexSet = RegexSet::new([
        // generic or scripted clients
        r"(?i)^Mozilla/5\.0$",
        r"(?i)curl",
        r"(?i)wget",
        r"(?i)python",
        r"(?i)bot",
        r"(?i)crawl",
        r"(?i)spider",
        r"(?i)scraper",
        // ancient browsers
        r"(?i)MSIE [1-6]\.",
        r"[<>{}]",
        // API tooling
        r"(?i)PostmanRuntime",
        r"(?i)Insomnia",
        r"(?i)HTTPie",
        r"(?i)Apache-HttpClient",
    ])
    .unwrap();
}

pub fn is_suspicious_user_agent(user_agent: Option<&str>) -> bool {
    let agent = match user_agent {
        Some(agent) if !agent.is_empty() => agent,
        _ => return true,
    };

    agent.chars().any(char::is_control)
        || agent.lines().any(|line| line.chars().count() >= MAX_LINE_CHARS)
        || SUSPICIOUS_AGENTS.is_match(agent)
}
