#![forbid(unsafe_code)]

//! Target acquisition: find the best visible, interactive editing surface.
//!
//! # Algorithm
//!
//! 1. Reuse the memoized result if it is younger than the TTL, was computed
//!    for the same pattern set, and still passes every check.
//! 2. Run all patterns as one combined query. If the page's selector engine
//!    rejects the combination, run each pattern on its own and skip the ones
//!    that fail.
//! 3. Rank candidates by the index of the last pattern they match (later
//!    patterns are more specific), keeping document order among equals.
//! 4. Walk the ranking: reject on the probe snapshot first (detached, zero
//!    size, disabled, read-only, nothing typeable), and only then pay for the
//!    computed-style read. The first survivor wins.
//!
//! Acquisition only reads from the page.

use snipline_core::config::AcquisitionConfig;
use snipline_core::error::HostError;
use snipline_core::host::{ElementId, ElementProbe, Host};
use tracing::{debug, trace};
use web_time::Duration;

use crate::editor::EditorKind;
use crate::profile::TargetDescriptor;

/// A surface that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub element: ElementId,
    pub kind: EditorKind,
    pub probe: ElementProbe,
    pub pattern_index: usize,
}

#[derive(Debug, Clone)]
struct Memo {
    key: String,
    element: ElementId,
    pattern_index: usize,
    at: Duration,
}

/// Memoizing acquisition engine.
#[derive(Debug, Clone)]
pub struct AcquisitionEngine {
    ttl: Duration,
    memo: Option<Memo>,
}

impl AcquisitionEngine {
    #[must_use]
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.cache_ttl_ms),
            memo: None,
        }
    }

    pub fn set_config(&mut self, config: &AcquisitionConfig) {
        self.ttl = Duration::from_millis(config.cache_ttl_ms);
        self.memo = None;
    }

    /// Forget the memoized result.
    pub fn invalidate(&mut self) {
        self.memo = None;
    }

    #[must_use]
    pub fn has_memo(&self) -> bool {
        self.memo.is_some()
    }

    /// Find the best surface for `descriptor`, or `None`.
    pub fn acquire(
        &mut self,
        host: &dyn Host,
        descriptor: &TargetDescriptor,
        now: Duration,
    ) -> Option<Acquired> {
        let key = descriptor.combined();
        if let Some(hit) = self.memo_hit(host, &key, now) {
            trace!(element = hit.element.get(), "acquisition memo hit");
            return Some(hit);
        }
        self.memo = None;

        let mut candidates = candidates(host, descriptor);
        // Stable: document order survives among equal pattern indices.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let found = candidates
            .into_iter()
            .find_map(|(element, pattern_index)| qualify(host, element, pattern_index));
        match &found {
            Some(acquired) => {
                debug!(
                    element = acquired.element.get(),
                    kind = acquired.kind.as_str(),
                    pattern = pattern_at(descriptor, acquired.pattern_index),
                    "editing surface acquired"
                );
                self.memo = Some(Memo {
                    key,
                    element: acquired.element,
                    pattern_index: acquired.pattern_index,
                    at: now,
                });
            }
            None => trace!("no editing surface on this pass"),
        }
        found
    }

    fn memo_hit(&self, host: &dyn Host, key: &str, now: Duration) -> Option<Acquired> {
        let memo = self.memo.as_ref()?;
        if memo.key != key || now.saturating_sub(memo.at) >= self.ttl {
            return None;
        }
        qualify(host, memo.element, memo.pattern_index)
    }
}

fn pattern_at(descriptor: &TargetDescriptor, index: usize) -> &str {
    descriptor
        .patterns()
        .get(index)
        .map_or("", String::as_str)
}

/// `(element, index of the last pattern it matches)`, in document order.
fn candidates(host: &dyn Host, descriptor: &TargetDescriptor) -> Vec<(ElementId, usize)> {
    let patterns = descriptor.patterns();
    match host.query_all(&descriptor.combined()) {
        Ok(elements) => elements
            .into_iter()
            .map(|el| {
                let index = patterns
                    .iter()
                    .rposition(|p| host.matches(el, p).unwrap_or(false))
                    .unwrap_or(0);
                (el, index)
            })
            .collect(),
        Err(HostError::InvalidSelector(reason)) => {
            debug!(%reason, "combined pattern rejected, querying patterns one by one");
            per_pattern(host, patterns)
        }
        Err(err) => {
            debug!(error = %err, "combined query failed");
            Vec::new()
        }
    }
}

fn per_pattern(host: &dyn Host, patterns: &[String]) -> Vec<(ElementId, usize)> {
    let mut out: Vec<(ElementId, usize)> = Vec::new();
    for (index, pattern) in patterns.iter().enumerate() {
        let elements = match host.query_all(pattern) {
            Ok(elements) => elements,
            Err(err) => {
                trace!(%pattern, error = %err, "pattern skipped");
                continue;
            }
        };
        for el in elements {
            match out.iter_mut().find(|(seen, _)| *seen == el) {
                Some(entry) => entry.1 = index,
                None => out.push((el, index)),
            }
        }
    }
    out
}

fn qualify(host: &dyn Host, element: ElementId, pattern_index: usize) -> Option<Acquired> {
    let probe = host.probe(element)?;
    if !probe.passes_cheap_checks() {
        return None;
    }
    let kind = EditorKind::classify(probe.traits)?;
    if !host.computed_style(element)?.is_visible() {
        return None;
    }
    Some(Acquired {
        element,
        kind,
        probe,
        pattern_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipline_harness::{ElementSpec, FakeDom};

    fn engine() -> AcquisitionEngine {
        AcquisitionEngine::new(&AcquisitionConfig::default())
    }

    fn descriptor(patterns: &[&str]) -> TargetDescriptor {
        TargetDescriptor::new(patterns, None)
    }

    #[test]
    fn prefers_the_last_listed_pattern() {
        let mut dom = FakeDom::new("https://example.com/");
        let generic = dom.append(dom.body(), ElementSpec::textarea());
        let specific = dom.append(dom.body(), ElementSpec::textarea().id("prompt"));
        let d = descriptor(&["textarea", "#prompt"]);
        let got = engine().acquire(&dom, &d, Duration::ZERO).unwrap();
        assert_eq!(got.element, specific);
        assert_eq!(got.pattern_index, 1);
        assert_ne!(got.element, generic);
    }

    #[test]
    fn cheap_rejects_skip_the_style_read() {
        let mut dom = FakeDom::new("https://example.com/");
        dom.append(dom.body(), ElementSpec::textarea().rect(0.0, 0.0, 0.0, 0.0));
        dom.append(dom.body(), ElementSpec::textarea().attr("disabled", ""));
        dom.append(dom.body(), ElementSpec::textarea().attr("readonly", ""));
        let d = descriptor(&["textarea"]);
        assert!(engine().acquire(&dom, &d, Duration::ZERO).is_none());
        assert_eq!(dom.style_reads(), 0);
    }

    #[test]
    fn hidden_candidates_lose_to_visible_ones() {
        let mut dom = FakeDom::new("https://example.com/");
        dom.append(dom.body(), ElementSpec::textarea().id("prompt").hidden());
        let visible = dom.append(dom.body(), ElementSpec::textarea());
        let d = descriptor(&["textarea", "#prompt"]);
        let got = engine().acquire(&dom, &d, Duration::ZERO).unwrap();
        assert_eq!(got.element, visible);
    }

    #[test]
    fn invalid_combined_query_falls_back_per_pattern() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let d = descriptor(&["div:has(textarea)", "textarea"]);
        let got = engine().acquire(&dom, &d, Duration::ZERO).unwrap();
        assert_eq!(got.element, field);
        assert_eq!(got.pattern_index, 1);
        assert_eq!(
            dom.queries().first().map(String::as_str),
            Some("div:has(textarea), textarea")
        );
    }

    #[test]
    fn memo_is_reused_within_ttl_and_revalidated() {
        let mut dom = FakeDom::new("https://example.com/");
        let field = dom.append(dom.body(), ElementSpec::textarea());
        let d = descriptor(&["textarea"]);
        let mut acq = engine();
        acq.acquire(&dom, &d, Duration::ZERO).unwrap();
        dom.clear_queries();

        let again = acq.acquire(&dom, &d, Duration::from_millis(500)).unwrap();
        assert_eq!(again.element, field);
        assert!(dom.queries().is_empty(), "memo hit must not query");

        dom.detach(field);
        assert!(acq.acquire(&dom, &d, Duration::from_millis(600)).is_none());
        assert!(!dom.queries().is_empty(), "stale memo is discarded");
    }

    #[test]
    fn memo_expires() {
        let mut dom = FakeDom::new("https://example.com/");
        dom.append(dom.body(), ElementSpec::textarea());
        let d = descriptor(&["textarea"]);
        let mut acq = engine();
        acq.acquire(&dom, &d, Duration::ZERO).unwrap();
        dom.clear_queries();
        acq.acquire(&dom, &d, Duration::from_millis(2_000)).unwrap();
        assert!(!dom.queries().is_empty());
    }

    #[test]
    fn non_editable_matches_are_ignored() {
        let mut dom = FakeDom::new("https://example.com/");
        dom.append(dom.body(), ElementSpec::new("div").class("composer"));
        let d = descriptor(&["div.composer"]);
        assert!(engine().acquire(&dom, &d, Duration::ZERO).is_none());
    }
}
