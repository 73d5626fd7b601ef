#![forbid(unsafe_code)]

//! JSON bridge between the page glue and an [`EngineSession`].
//!
//! The page-side script forwards callbacks as small tagged objects and
//! receives requests and acknowledgements back as JSON strings. Everything in
//! this module is plain data, so it is tested natively without a browser.
//!
//! # Events (page → engine)
//!
//! ```json
//! {"kind":"site_enabled","enabled":true}
//! {"kind":"custom_site","config":{"hostname":"a.test","enabled":true}}
//! {"kind":"snippets","snippets":[{"id":"1","title":"Hello","content":"Hi"}]}
//! {"kind":"mutations","records":[{"type":"attributes","target":7,"name":"class"}]}
//! {"kind":"history"}
//! {"kind":"key","key":"ArrowDown","mods":0}
//! {"kind":"query","query":"hel"}
//! {"kind":"pick","id":"1"}
//! ```
//!
//! A `snippets` payload that does not decode is an empty library, never an
//! error: the store contract is that loading snippets cannot fail.
//!
//! # Requests and acks (engine → page)
//!
//! Requests are drained as one JSON array of [`HostRequest`] objects; acks
//! are `{"success":true}`.
//!
//! [`EngineSession`]: snipline_engine::EngineSession

use serde::Deserialize;
use snipline_core::host::{AddedNode, ElementId, MutationRecord};
use snipline_core::key::{Key, KeyInput, Modifiers};
use snipline_core::message::{Ack, ControlMessage, HostRequest};
use snipline_core::site::CustomSiteConfig;
use snipline_core::snippet::snippets_from_value;
use snipline_engine::SessionEvent;

// ============================================================================
// Errors
// ============================================================================

/// A bridge payload that could not be decoded or encoded.
#[derive(Debug)]
pub enum ProtocolError {
    /// Malformed JSON or a shape that matches no known event.
    Json(serde_json::Error),
    /// The `mods` bitset carries bits outside the known modifiers.
    UnknownModifiers(u8),
    /// A key event without a key name.
    EmptyKey,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "bridge payload error: {e}"),
            Self::UnknownModifiers(bits) => write!(f, "unknown modifier bits: {bits:#06b}"),
            Self::EmptyKey => f.write_str("key event without a key"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::UnknownModifiers(_) | Self::EmptyKey => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireEvent {
    SiteEnabled {
        enabled: bool,
    },
    CustomSite {
        #[serde(default)]
        config: Option<CustomSiteConfig>,
    },
    Snippets {
        #[serde(default)]
        snippets: serde_json::Value,
    },
    Mutations {
        records: Vec<WireRecord>,
    },
    History,
    Scroll,
    Resize,
    AnimationFrame,
    Intersection {
        visible: bool,
    },
    Visibility {
        visible: bool,
    },
    Unload,
    Trigger,
    Key {
        key: String,
        #[serde(default)]
        mods: u8,
    },
    Query {
        query: String,
    },
    Pick {
        id: String,
    },
    OutsideClick,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRecord {
    ChildList {
        target: u64,
        #[serde(default)]
        added: Vec<WireAdded>,
        #[serde(default)]
        removed: usize,
    },
    Attributes {
        target: u64,
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAdded {
    #[serde(default)]
    element: Option<u64>,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    editable_hint: bool,
    #[serde(default)]
    child_elements: usize,
}

impl From<WireAdded> for AddedNode {
    fn from(w: WireAdded) -> Self {
        Self {
            element: w.element.map(ElementId::new),
            tag: w.tag.to_ascii_lowercase(),
            editable_hint: w.editable_hint,
            child_elements: w.child_elements,
        }
    }
}

impl From<WireRecord> for MutationRecord {
    fn from(w: WireRecord) -> Self {
        match w {
            WireRecord::ChildList {
                target,
                added,
                removed,
            } => Self::ChildList {
                target: ElementId::new(target),
                added: added.into_iter().map(AddedNode::from).collect(),
                removed,
            },
            WireRecord::Attributes { target, name } => Self::Attributes {
                target: ElementId::new(target),
                name,
            },
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one page callback.
pub fn decode_event(json: &str) -> Result<SessionEvent, ProtocolError> {
    let wire: WireEvent = serde_json::from_str(json)?;
    Ok(match wire {
        WireEvent::SiteEnabled { enabled } => SessionEvent::SiteEnabled(enabled),
        WireEvent::CustomSite { config } => SessionEvent::CustomSiteLoaded(config),
        WireEvent::Snippets { snippets } => {
            SessionEvent::SnippetsLoaded(snippets_from_value(snippets))
        }
        WireEvent::Mutations { records } => {
            SessionEvent::Mutations(records.into_iter().map(MutationRecord::from).collect())
        }
        WireEvent::History => SessionEvent::HistoryChanged,
        WireEvent::Scroll => SessionEvent::Scroll,
        WireEvent::Resize => SessionEvent::Resize,
        WireEvent::AnimationFrame => SessionEvent::AnimationFrame,
        WireEvent::Intersection { visible } => SessionEvent::Intersection { visible },
        WireEvent::Visibility { visible } => SessionEvent::VisibilityChanged { visible },
        WireEvent::Unload => SessionEvent::Unload,
        WireEvent::Trigger => SessionEvent::TriggerActivated,
        WireEvent::Key { key, mods } => SessionEvent::PanelKey(key_input(&key, mods)?),
        WireEvent::Query { query } => SessionEvent::PanelQuery(query),
        WireEvent::Pick { id } => SessionEvent::PanelPick { id },
        WireEvent::OutsideClick => SessionEvent::OutsideClick,
    })
}

/// Normalize a DOM key name plus `mods` bitset.
pub fn key_input(key: &str, mods: u8) -> Result<KeyInput, ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    let mods = Modifiers::from_bits(mods).ok_or(ProtocolError::UnknownModifiers(mods))?;
    Ok(KeyInput::new(Key::from_dom_key(key)).with_mods(mods))
}

/// Decode a controller message (`{"action":"ACTIVATE"}`).
pub fn decode_message(json: &str) -> Result<ControlMessage, ProtocolError> {
    Ok(serde_json::from_str(json)?)
}

// ============================================================================
// Encoding
// ============================================================================

/// `{"success":true}` / `{"success":false}`.
pub fn encode_ack(ack: Ack) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&ack)?)
}

/// JSON array of pending requests, oldest first.
pub fn encode_requests(requests: &[HostRequest]) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(requests)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_lifecycle_answers() {
        assert_eq!(
            decode_event(r#"{"kind":"site_enabled","enabled":true}"#).unwrap(),
            SessionEvent::SiteEnabled(true)
        );
        assert_eq!(
            decode_event(r#"{"kind":"custom_site"}"#).unwrap(),
            SessionEvent::CustomSiteLoaded(None)
        );
        let SessionEvent::SnippetsLoaded(list) = decode_event(
            r#"{"kind":"snippets","snippets":[{"id":"1","title":"Hello","content":"Hi","createdAt":5}]}"#,
        )
        .unwrap() else {
            panic!("expected snippets");
        };
        assert_eq!(list[0].created_at, 5);
        assert_eq!(list[0].category, "");
    }

    #[test]
    fn malformed_snippet_payload_is_an_empty_library() {
        for json in [
            r#"{"kind":"snippets"}"#,
            r#"{"kind":"snippets","snippets":null}"#,
            r#"{"kind":"snippets","snippets":{"id":"1"}}"#,
            r#"{"kind":"snippets","snippets":[{"id":"1"}]}"#,
        ] {
            assert_eq!(
                decode_event(json).unwrap(),
                SessionEvent::SnippetsLoaded(Vec::new()),
                "{json}"
            );
        }
    }

    #[test]
    fn decodes_custom_site_entry() {
        let SessionEvent::CustomSiteLoaded(Some(cfg)) = decode_event(
            r##"{"kind":"custom_site","config":{"hostname":"a.test","enabled":true,
                "positioning":{"mode":"custom","selector":"#bar","placement":"before"}}}"##,
        )
        .unwrap() else {
            panic!("expected entry");
        };
        assert_eq!(cfg.custom_selector(), Some("#bar"));
    }

    #[test]
    fn decodes_mutation_records() {
        let event = decode_event(
            r#"{"kind":"mutations","records":[
                {"type":"child_list","target":3,"added":[{"element":9,"tag":"DIV","childElements":2}]},
                {"type":"attributes","target":4,"name":"contenteditable"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            SessionEvent::Mutations(vec![
                MutationRecord::ChildList {
                    target: ElementId::new(3),
                    added: vec![AddedNode {
                        element: Some(ElementId::new(9)),
                        tag: "div".into(),
                        editable_hint: false,
                        child_elements: 2,
                    }],
                    removed: 0,
                },
                MutationRecord::Attributes {
                    target: ElementId::new(4),
                    name: "contenteditable".into(),
                },
            ])
        );
    }

    #[test]
    fn decodes_panel_input() {
        assert_eq!(
            decode_event(r#"{"kind":"key","key":"ArrowDown"}"#).unwrap(),
            SessionEvent::PanelKey(KeyInput::new(Key::Down))
        );
        assert_eq!(
            decode_event(r#"{"kind":"key","key":"c","mods":4}"#).unwrap(),
            SessionEvent::PanelKey(KeyInput::new(Key::Char('c')).with_mods(Modifiers::CTRL))
        );
        assert_eq!(
            decode_event(r#"{"kind":"query","query":"hel"}"#).unwrap(),
            SessionEvent::PanelQuery("hel".into())
        );
        assert_eq!(
            decode_event(r#"{"kind":"pick","id":"2"}"#).unwrap(),
            SessionEvent::PanelPick { id: "2".into() }
        );
        assert_eq!(
            decode_event(r#"{"kind":"outside_click"}"#).unwrap(),
            SessionEvent::OutsideClick
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            decode_event(r#"{"kind":"teleport"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_event(r#"{"kind":"pick"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_event(r#"{"kind":"key","key":""}"#),
            Err(ProtocolError::EmptyKey)
        ));
        assert!(matches!(
            decode_event(r#"{"kind":"key","key":"a","mods":64}"#),
            Err(ProtocolError::UnknownModifiers(64))
        ));
        assert!(decode_event("not json").is_err());
    }

    #[test]
    fn encodes_requests_and_acks() {
        let out = encode_requests(&[
            HostRequest::CheckSiteEnabled {
                hostname: "a.test".into(),
            },
            HostRequest::LoadSnippets,
        ])
        .unwrap();
        assert_eq!(
            out,
            r#"[{"kind":"check_site_enabled","hostname":"a.test"},{"kind":"load_snippets"}]"#
        );
        assert_eq!(encode_ack(Ack::FAILED).unwrap(), r#"{"success":false}"#);
        assert_eq!(
            decode_message(r#"{"action":"DEACTIVATE"}"#).unwrap(),
            ControlMessage::Deactivate
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::UnknownModifiers(0b1_0000).to_string(),
            "unknown modifier bits: 0b10000"
        );
        assert_eq!(ProtocolError::EmptyKey.to_string(), "key event without a key");
    }
}
