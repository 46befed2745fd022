//! Instrumentation injection for served HTML documents.
//!
//! The document is prefixed with an inline `<script>` that, inside the
//! sandboxed page, forwards console output, uncaught errors and the
//! framework's symbol/resume signals to the parent window. Injection is
//! plain text prefixing; the original markup is never parsed.

use crate::config::InstrumentationConfig;
use crate::models::SessionId;

const CLIENT_ID: &str = "__REPL_CLIENT_ID__";
const SYMBOL_EVENT: &str = "__REPL_SYMBOL_EVENT__";
const RESUME_EVENT: &str = "__REPL_RESUME_EVENT__";

// Relay faults are swallowed; the original console method always runs.
const BRIDGE_TEMPLATE: &str = r#"
(() => {
  const relay = (event) => {
    try {
      parent.postMessage(JSON.stringify({
        type: 'event',
        clientId: '__REPL_CLIENT_ID__',
        event
      }));
    } catch {}
  };

  const text = (value) => {
    try {
      return String(value);
    } catch {
      return '[unprintable]';
    }
  };

  const now = () => performance.now();

  const wrap = (method, kind) => {
    const original = console[method];
    console[method] = (...args) => {
      try {
        relay({ kind, scope: 'client', message: args.map(text), start: now() });
      } catch {}
      original.apply(console, args);
    };
  };

  wrap('log', 'console-log');
  wrap('warn', 'console-warn');
  wrap('error', 'console-error');

  window.addEventListener('error', (ev) => {
    relay({ kind: 'error', scope: 'client', message: [text(ev.message)], start: now() });
  });

  document.addEventListener('__REPL_SYMBOL_EVENT__', (ev) => {
    relay({ kind: 'symbol', scope: 'client', message: [text(ev.detail)], start: now() });
  });

  document.addEventListener('__REPL_RESUME_EVENT__', () => {
    relay({ kind: 'resume', scope: 'client', message: '', start: now() });
  });
})();"#;

/// Builds the instrumentation prefix for documents served to a session.
#[derive(Debug, Clone)]
pub struct Injector {
    symbol_event: String,
    resume_event: String,
}

impl Injector {
    pub fn new(config: &InstrumentationConfig) -> Self {
        Self {
            symbol_event: config.symbol_event.clone(),
            resume_event: config.resume_event.clone(),
        }
    }

    /// The inline bridge script for `session`, without the `<script>` tags.
    pub fn bridge_script(&self, session: &SessionId) -> String {
        // client id last: it is untrusted and must not be rescanned
        BRIDGE_TEMPLATE
            .replace(SYMBOL_EVENT, &js_string_body(&self.symbol_event))
            .replace(RESUME_EVENT, &js_string_body(&self.resume_event))
            .replace(CLIENT_ID, &js_string_body(session.as_str()))
    }

    /// `html` prefixed with the bridge script. A missing body yields the script alone.
    pub fn inject(&self, session: &SessionId, html: Option<&str>) -> String {
        format!(
            "<script>{}</script>{}",
            self.bridge_script(session),
            html.unwrap_or("")
        )
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new(&InstrumentationConfig::default())
    }
}

/// Escape `s` for use between single quotes in an inline script.
fn js_string_body(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
