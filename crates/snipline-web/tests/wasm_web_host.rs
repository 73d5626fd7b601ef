#![cfg(target_arch = "wasm32")]
#![forbid(unsafe_code)]

//! `WebHost` against a real browser document.
//!
//! Run:
//!   wasm-pack test --headless --chrome crates/snipline-web

use snipline_core::host::{
    ControlSpec, EditorTraits, Host, SESSION_ATTRIBUTE, SessionId, SyntheticEvent,
};
use snipline_core::site::{Offset, Placement};
use snipline_web::{SniplineRuntime, WebHost};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::HtmlTextAreaElement;

wasm_bindgen_test_configure!(run_in_browser);

fn mount_textarea(id: &str) -> HtmlTextAreaElement {
    let document = web_sys::window().unwrap().document().unwrap();
    let area = document
        .create_element("textarea")
        .unwrap()
        .dyn_into::<HtmlTextAreaElement>()
        .unwrap();
    area.set_id(id);
    document.body().unwrap().append_child(&area).unwrap();
    area
}

fn spec(session: &str) -> ControlSpec {
    ControlSpec {
        session: SessionId::new(session),
        label: "Insert snippet".into(),
        class_name: "snipline-trigger".into(),
        floating: false,
        z_index: None,
        offset: Offset::default(),
    }
}

#[wasm_bindgen_test]
fn probes_a_textarea() {
    let area = mount_textarea("probe-me");
    let host = WebHost::new().unwrap();
    let found = host.query_all("#probe-me").unwrap();
    assert_eq!(found.len(), 1);
    let probe = host.probe(found[0]).unwrap();
    assert!(probe.connected);
    assert_eq!(probe.tag, "textarea");
    assert!(probe.traits.contains(EditorTraits::TEXT_FIELD));
    assert_eq!(host.query_all("#probe-me").unwrap(), found);
    area.remove();
}

#[wasm_bindgen_test]
fn invalid_selector_is_an_error() {
    let host = WebHost::new().unwrap();
    assert!(host.query_all("[[").is_err());
}

#[wasm_bindgen_test]
fn assignment_reads_back() {
    let area = mount_textarea("assign-me");
    let mut host = WebHost::new().unwrap();
    let el = host.query_all("#assign-me").unwrap()[0];
    host.assign_content(el, "Hi there").unwrap();
    host.dispatch_event(el, &SyntheticEvent::Change).unwrap();
    assert_eq!(host.read_text(el).unwrap(), "Hi there");
    host.set_value_native(el, "native").unwrap();
    assert_eq!(area.value(), "native");
    area.remove();
}

#[wasm_bindgen_test]
fn controls_are_tagged_and_removable() {
    let area = mount_textarea("anchor-me");
    let mut host = WebHost::new().unwrap();
    let anchor = host.query_all("#anchor-me").unwrap()[0];
    let control = host.create_control(&spec("web-1")).unwrap();
    host.insert_control(control, anchor, Placement::After).unwrap();

    let tagged = host.tagged_controls();
    assert!(
        tagged
            .iter()
            .any(|c| c.element == control && c.session == "web-1")
    );
    assert!(host.query_all(&format!("[{SESSION_ATTRIBUTE}]")).unwrap().len() >= 1);

    host.remove_element(control).unwrap();
    assert!(host.tagged_controls().iter().all(|c| c.session != "web-1"));
    area.remove();
}

#[wasm_bindgen_test]
fn runtime_asks_for_the_site_gate() {
    let mut runtime = SniplineRuntime::new("web-2", None).unwrap();
    assert_eq!(
        runtime.handle_message(r#"{"action":"ACTIVATE"}"#).unwrap(),
        r#"{"success":true}"#
    );
    let requests = runtime.take_requests().unwrap();
    assert!(requests.contains("check_site_enabled"), "{requests}");
    assert!(runtime.teardown());
}
