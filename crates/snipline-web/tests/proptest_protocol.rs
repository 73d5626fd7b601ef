#![cfg(not(target_arch = "wasm32"))]
#![forbid(unsafe_code)]

//! Property tests for the JSON bridge.
//!
//! ## Invariants
//!
//! 1. Decoding never panics, whatever the page sends
//! 2. Modifier bitsets are accepted exactly when they stay within the four
//!    known modifiers
//! 3. Mutation batches keep their record count and order
//! 4. A `snippets` event always decodes; a payload that is not a snippet list
//!    becomes an empty library
//!
//! Run:
//!   cargo test -p snipline-web --test proptest_protocol

use proptest::prelude::*;
use snipline_core::host::{ElementId, MutationRecord};
use snipline_engine::SessionEvent;
use snipline_web::protocol::{ProtocolError, decode_event, key_input};

/// JSON fragments for the `snippets` field, valid and invalid.
fn arb_snippet_payload() -> impl Strategy<Value = (String, bool)> {
    prop_oneof![
        ("[a-z0-9]{1,6}", "[a-zA-Z ]{0,12}").prop_map(|(id, title)| (
            format!(r#"[{{"id":"{id}","title":"{title}","content":"x"}}]"#),
            true
        )),
        Just(("[]".to_string(), true)),
        Just(("null".to_string(), false)),
        Just((r#"{"id":"1"}"#.to_string(), false)),
        Just((r#"[{"id":"1"}]"#.to_string(), false)),
        Just((r#"[1,2,3]"#.to_string(), false)),
        any::<i32>().prop_map(|n| (n.to_string(), false)),
        "[a-z]{0,8}".prop_map(|s| (format!(r#""{s}""#), false)),
    ]
}

fn arb_record() -> impl Strategy<Value = (bool, u64, String)> {
    (any::<bool>(), 0u64..10_000, "[a-z-]{1,12}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn decoding_arbitrary_text_never_panics(input in ".{0,200}") {
        let _ = decode_event(&input);
    }

    #[test]
    fn decoding_arbitrary_kinds_never_panics(kind in "[a-z_]{0,16}", field in "[a-z]{0,8}") {
        let json = format!(r#"{{"kind":"{kind}","{field}":1}}"#);
        let _ = decode_event(&json);
    }

    #[test]
    fn modifier_bits_are_validated(bits in any::<u8>(), key in "[a-zA-Z0-9]") {
        match key_input(&key, bits) {
            Ok(input) => {
                prop_assert!(bits < 16);
                prop_assert_eq!(input.mods.bits(), bits);
            }
            Err(ProtocolError::UnknownModifiers(b)) => {
                prop_assert!(bits >= 16);
                prop_assert_eq!(b, bits);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn mutation_batches_keep_order(records in prop::collection::vec(arb_record(), 0..20)) {
        let body: Vec<String> = records
            .iter()
            .map(|(attr, target, name)| {
                if *attr {
                    format!(r#"{{"type":"attributes","target":{target},"name":"{name}"}}"#)
                } else {
                    format!(r#"{{"type":"child_list","target":{target},"removed":1}}"#)
                }
            })
            .collect();
        let json = format!(r#"{{"kind":"mutations","records":[{}]}}"#, body.join(","));
        let SessionEvent::Mutations(decoded) = decode_event(&json).unwrap() else {
            panic!("expected a mutation batch");
        };
        prop_assert_eq!(decoded.len(), records.len());
        for (record, (attr, target, _)) in decoded.iter().zip(&records) {
            let id = match record {
                MutationRecord::Attributes { target, .. } => {
                    prop_assert!(*attr);
                    *target
                }
                MutationRecord::ChildList { target, .. } => {
                    prop_assert!(!*attr);
                    *target
                }
            };
            prop_assert_eq!(id, ElementId::new(*target));
        }
    }

    #[test]
    fn snippet_payloads_never_reject((payload, valid) in arb_snippet_payload()) {
        let json = format!(r#"{{"kind":"snippets","snippets":{payload}}}"#);
        let SessionEvent::SnippetsLoaded(list) = decode_event(&json).unwrap() else {
            panic!("expected a snippet list");
        };
        if valid {
            prop_assert_eq!(list.len(), usize::from(payload != "[]"));
        } else {
            prop_assert!(list.is_empty());
        }
    }
}
