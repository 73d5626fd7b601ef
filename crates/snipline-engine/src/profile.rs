#![forbid(unsafe_code)]

//! Per-site target descriptors.
//!
//! A [`SiteProfile`] tells acquisition what the editing surface of one site
//! looks like. Patterns are ordered from generic to specific: when several
//! patterns match, acquisition prefers the one listed last.
//!
//! Sites without a built-in profile use [`SiteProfile::generic`].

use snipline_core::site::Placement;

/// Where a trigger goes inside a site's own control bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBar {
    /// Pattern locating the bar.
    pub selector: String,
    /// Optional reference sibling inside the bar.
    pub sibling: Option<String>,
    /// Placement relative to the sibling (or inside the bar when there is none).
    pub placement: Placement,
}

impl TriggerBar {
    #[must_use]
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            sibling: None,
            placement: Placement::InsideEnd,
        }
    }

    #[must_use]
    pub fn next_to(mut self, sibling: &str, placement: Placement) -> Self {
        self.sibling = Some(sibling.to_string());
        self.placement = placement;
        self
    }
}

/// Ordered structural patterns for one platform, plus its control bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    patterns: Vec<String>,
    control_bar: Option<TriggerBar>,
}

impl TargetDescriptor {
    #[must_use]
    pub fn new(patterns: &[&str], control_bar: Option<TriggerBar>) -> Self {
        Self {
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            control_bar,
        }
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn control_bar(&self) -> Option<&TriggerBar> {
        self.control_bar.as_ref()
    }

    /// All patterns as one selector list; also the memo key.
    #[must_use]
    pub fn combined(&self) -> String {
        self.patterns.join(", ")
    }
}

/// A known platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub name: &'static str,
    /// Hostnames served by this profile (subdomains included).
    pub hostnames: &'static [&'static str],
    pub descriptor: TargetDescriptor,
    /// Narrowest container worth observing for mutations.
    pub observe_scope: Option<&'static str>,
}

impl SiteProfile {
    /// Fallback for sites without a built-in profile.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            name: "generic",
            hostnames: &[],
            descriptor: TargetDescriptor::new(
                &["textarea", "[role='textbox']", "[contenteditable='true']"],
                None,
            ),
            observe_scope: None,
        }
    }

    /// Whether `hostname` is one of ours (exact or subdomain).
    #[must_use]
    pub fn serves(&self, hostname: &str) -> bool {
        let hostname = normalize_host(hostname);
        self.hostnames.iter().any(|h| {
            hostname == *h
                || hostname
                    .strip_suffix(*h)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

fn normalize_host(hostname: &str) -> String {
    let lower = hostname.trim().to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Every built-in platform profile.
#[must_use]
pub fn builtin_profiles() -> Vec<SiteProfile> {
    vec![
        SiteProfile {
            name: "chatgpt",
            hostnames: &["chatgpt.com", "chat.openai.com"],
            descriptor: TargetDescriptor::new(
                &[
                    "textarea",
                    "div[contenteditable='true']",
                    "#prompt-textarea",
                ],
                Some(
                    TriggerBar::new("[data-testid='composer-trailing-actions']")
                        .next_to("[data-testid='send-button']", Placement::Before),
                ),
            ),
            observe_scope: Some("main"),
        },
        SiteProfile {
            name: "claude",
            hostnames: &["claude.ai"],
            descriptor: TargetDescriptor::new(
                &[
                    "div[contenteditable='true']",
                    "div.ProseMirror[contenteditable='true']",
                    "fieldset div.ProseMirror",
                ],
                Some(
                    TriggerBar::new("fieldset div.flex.items-center")
                        .next_to("button[aria-label='Send message']", Placement::Before),
                ),
            ),
            observe_scope: None,
        },
        SiteProfile {
            name: "gemini",
            hostnames: &["gemini.google.com"],
            descriptor: TargetDescriptor::new(
                &[
                    "div[contenteditable='true']",
                    "rich-textarea div.ql-editor",
                ],
                Some(TriggerBar::new("div.input-buttons-wrapper-bottom")),
            ),
            observe_scope: Some("main"),
        },
        SiteProfile {
            name: "perplexity",
            hostnames: &["perplexity.ai"],
            descriptor: TargetDescriptor::new(
                &[
                    "textarea",
                    "textarea[placeholder]",
                    "#ask-input[contenteditable='true']",
                ],
                None,
            ),
            observe_scope: Some("main"),
        },
        SiteProfile {
            name: "mistral",
            hostnames: &["chat.mistral.ai"],
            descriptor: TargetDescriptor::new(
                &["textarea", "div.ProseMirror[contenteditable='true']"],
                None,
            ),
            observe_scope: None,
        },
        SiteProfile {
            name: "deepseek",
            hostnames: &["chat.deepseek.com"],
            descriptor: TargetDescriptor::new(&["textarea", "textarea#chat-input"], None),
            observe_scope: None,
        },
        SiteProfile {
            name: "copilot",
            hostnames: &["copilot.microsoft.com"],
            descriptor: TargetDescriptor::new(&["textarea", "textarea#userInput"], None),
            observe_scope: Some("main"),
        },
    ]
}

/// Profile for `hostname`, falling back to the generic descriptor.
#[must_use]
pub fn profile_for(hostname: &str) -> SiteProfile {
    builtin_profiles()
        .into_iter()
        .find(|p| p.serves(hostname))
        .unwrap_or_else(SiteProfile::generic)
}

/// Whether the site gate enables `hostname` without a custom entry.
#[must_use]
pub fn is_builtin_host(hostname: &str) -> bool {
    builtin_profiles().iter().any(|p| p.serves(hostname))
}
