//! Page-side interceptor.
//!
//! The script is registered to run at document creation, ahead of every page
//! script. It wraps `window.fetch` and `XMLHttpRequest` so that JSON bodies of
//! responses whose URL contains the marker land in a page-scoped slot object.
//! The page's own consumers receive the original promise / XHR untouched; the
//! body is read from a clone after the page's path has it.

pub const DEFAULT_SLOT_NAME: &str = "__liqmapCapture";

const TEMPLATE: &str = r#"(() => {
  const MARKER = __MARKER__;
  const SLOT = __SLOT__;
  if (window[SLOT] && window[SLOT].installed) return;
  const state = {
    installed: true,
    installedReadyState: document.readyState,
    seq: 0,
    url: null,
    payload: null,
    parseFailures: 0,
  };
  Object.defineProperty(window, SLOT, { value: state, enumerable: false, configurable: false, writable: false });

  const matches = (url) => typeof url === 'string' && url.indexOf(MARKER) !== -1;
  const urlOf = (input) => {
    if (typeof input === 'string') return input;
    if (input && typeof input.url === 'string') return input.url;
    try { return String(input); } catch (_) { return ''; }
  };
  const store = (url, text) => {
    let parsed;
    try { parsed = JSON.parse(text); } catch (_) { state.parseFailures += 1; return; }
    if (parsed === null || typeof parsed !== 'object') { state.parseFailures += 1; return; }
    state.seq += 1;
    state.url = url;
    state.payload = parsed;
  };

  const originalFetch = window.fetch;
  if (typeof originalFetch === 'function') {
    window.fetch = function (input, init) {
      const url = urlOf(input);
      const pending = originalFetch.apply(this, arguments);
      if (matches(url)) {
        pending.then((response) => {
          let copy;
          try { copy = response.clone(); } catch (_) { return; }
          copy.text().then((text) => store(url, text), () => { state.parseFailures += 1; });
        }, () => {});
      }
      return pending;
    };
  }

  const proto = window.XMLHttpRequest && window.XMLHttpRequest.prototype;
  if (proto) {
    const originalOpen = proto.open;
    const originalSend = proto.send;
    proto.open = function (method, url) {
      this.__liqmapUrl = urlOf(url);
      return originalOpen.apply(this, arguments);
    };
    proto.send = function () {
      const url = this.__liqmapUrl;
      if (matches(url)) {
        this.addEventListener('load', () => {
          let text = null;
          try {
            if (this.responseType === '' || this.responseType === 'text') text = this.responseText;
            else if (this.responseType === 'json' && this.response !== null) text = JSON.stringify(this.response);
          } catch (_) { text = null; }
          if (text === null) { state.parseFailures += 1; return; }
          store(url, text);
        });
      }
      return originalSend.apply(this, arguments);
    };
  }
})();"#;

/// Interceptor source for `Page.addScriptToEvaluateOnNewDocument`.
pub fn interceptor_script(marker: &str, slot_name: &str) -> String {
    TEMPLATE
        .replace("__MARKER__", &js_string(marker))
        .replace("__SLOT__", &js_string(slot_name))
}

/// Expression returning a by-value snapshot of the page slot, or `null` when
/// the interceptor never ran in this document. Reading does not modify it.
pub fn probe_expression(slot_name: &str) -> String {
    format!(
        "(() => {{ const s = window[{slot}]; if (!s) return null; \
         return {{ installedReadyState: s.installedReadyState, seq: s.seq, url: s.url, \
         payload: s.payload, parseFailures: s.parseFailures }}; }})()",
        slot = js_string(slot_name)
    )
}

fn js_string(s: &str) -> String {
    // JSON string literals are valid JavaScript string literals
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_wraps_both_primitives() {
        let s = interceptor_script("/api/liqMap/getLiqHeatMap", DEFAULT_SLOT_NAME);
        assert!(s.contains("window.fetch = function"));
        assert!(s.contains("proto.open = function"));
        assert!(s.contains("proto.send = function"));
        assert!(s.contains(r#"const MARKER = "/api/liqMap/getLiqHeatMap";"#));
        assert!(s.contains(r#"const SLOT = "__liqmapCapture";"#));
        assert!(!s.contains("__MARKER__"));
    }

    #[test]
    fn test_script_returns_original_fetch_promise() {
        let s = interceptor_script("/x", "slot");
        assert!(s.contains("return pending;"));
        assert!(s.contains("response.clone()"));
    }

    #[test]
    fn test_unusable_bodies_count_as_failures() {
        let s = interceptor_script("/x", "slot");
        // a json-typed XHR whose body failed to parse exposes `response === null`
        assert!(s.contains("this.responseType === 'json' && this.response !== null"));
        assert!(s.contains("if (text === null) { state.parseFailures += 1; return; }"));
        // a body parsing to a bare null or scalar never replaces a capture
        let store = &s[s.find("const store").unwrap()..s.find("const originalFetch").unwrap()];
        let guard = store.find("parsed === null").unwrap();
        assert!(guard < store.find("state.seq += 1").unwrap());
        assert!(guard < store.find("state.payload = parsed").unwrap());
    }

    #[test]
    fn test_marker_is_escaped() {
        let s = interceptor_script("a\"b'</script>", "slot");
        assert!(s.contains(r#"const MARKER = "a\"b'</script>";"#));
    }

    #[test]
    fn test_slot_read_uses_slot_name() {
        assert!(probe_expression("mySlot").contains(r#"window["mySlot"]"#));
        assert!(probe_expression("mySlot").contains("parseFailures"));
    }
}
