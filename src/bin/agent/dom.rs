use anyhow::{Context, Result, anyhow};
use ask_studio_agent::locator::{Element, ElementInfo, ElementRef, Scope, ScopeRef, Surface};
use async_trait::async_trait;
use headless_chrome::Tab;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Shared by every injected script. Matched elements are kept in a page-side
/// registry keyed by a short id, since shadow-hosted nodes have no selector
/// path reachable from the document.
const PRELUDE: &str = r#"
  const reg = window.__asaRefs || (window.__asaRefs = { seq: 0, map: new Map() });
  if (reg.map.size > 2000) {
    for (const [k, v] of reg.map) if (!v.isConnected) reg.map.delete(k);
  }
  const remember = (el) => {
    if (!el.__asaId) el.__asaId = 'e' + (++reg.seq);
    reg.map.set(el.__asaId, el);
    return el.__asaId;
  };
  const lookup = (id) => {
    const el = reg.map.get(id);
    if (!el || !el.isConnected) throw new Error('stale element ' + id);
    return el;
  };
  const rootOf = (host) => host === null ? document : lookup(host).shadowRoot;
  const describe = (el) => {
    const r = el.getBoundingClientRect();
    return {
      id: remember(el),
      tag: el.tagName.toLowerCase(),
      elId: el.id || '',
      ariaLabel: el.getAttribute('aria-label') || '',
      text: el.innerText || el.textContent || '',
      width: r.width,
      height: r.height,
      contentEditable: !!el.isContentEditable,
      disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true',
    };
  };
  const fire = (el, type) => el.dispatchEvent(new Event(type, { bubbles: true }));
"#;

const DIALOG_SELECTOR: &str =
    r#"[role="dialog"], ytcp-creator-chat-dialog, ytcp-omnisearch-dialog, [class*="CreatorChatEntity"]"#;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    id: String,
    tag: String,
    el_id: String,
    aria_label: String,
    text: String,
    width: f64,
    height: f64,
    content_editable: bool,
    disabled: bool,
}

fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Run `body` inside the prelude on a blocking thread. The body returns a
/// JSON string, which is decoded here.
async fn run<T: DeserializeOwned + Send + 'static>(tab: &Arc<Tab>, body: String) -> Result<T> {
    let tab = tab.clone();
    let script = format!("(() => {{ {PRELUDE}\n return JSON.stringify((() => {{ {body} }})()); }})()");
    let raw = tokio::task::spawn_blocking(move || -> Result<String> {
        let result = tab.evaluate(&script, false)?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "null".to_string()))
    })
    .await
    .map_err(|e| anyhow!("page script panicked: {e}"))??;

    serde_json::from_str(&raw).with_context(|| format!("unexpected page script result: {raw}"))
}

pub struct ChromeSurface {
    tab: Arc<Tab>,
}

impl ChromeSurface {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }
}

#[async_trait]
impl Surface for ChromeSurface {
    fn root(&self) -> ScopeRef {
        Arc::new(ChromeScope {
            tab: self.tab.clone(),
            host: None,
        })
    }

    async fn body_text(&self) -> Result<String> {
        run(&self.tab, "return document.body ? document.body.innerText : '';".into()).await
    }
}

/// The document (`host == None`) or the shadow root of a registered element.
struct ChromeScope {
    tab: Arc<Tab>,
    host: Option<String>,
}

impl ChromeScope {
    fn elements(&self, raw: Vec<RawElement>) -> Vec<ElementRef> {
        raw.into_iter()
            .map(|r| -> ElementRef {
                Arc::new(ChromeElement {
                    tab: self.tab.clone(),
                    id: r.id,
                    info: ElementInfo {
                        tag: r.tag,
                        id: r.el_id,
                        aria_label: r.aria_label,
                        text: r.text,
                        width: r.width,
                        height: r.height,
                        content_editable: r.content_editable,
                        disabled: r.disabled,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl Scope for ChromeScope {
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>> {
        let body = format!(
            "const root = rootOf({host}); if (!root) return [];
             return [...root.querySelectorAll({selector})].map(describe);",
            host = js_literal(&self.host)?,
            selector = js_literal(selector)?,
        );
        let raw: Vec<RawElement> = run(&self.tab, body).await?;
        Ok(self.elements(raw))
    }

    async fn children(&self) -> Result<Vec<ScopeRef>> {
        let body = format!(
            "const root = rootOf({host}); if (!root) return [];
             return [...root.querySelectorAll('*')].filter(e => e.shadowRoot).map(remember);",
            host = js_literal(&self.host)?,
        );
        let hosts: Vec<String> = run(&self.tab, body).await?;
        Ok(hosts
            .into_iter()
            .map(|host| -> ScopeRef {
                Arc::new(ChromeScope {
                    tab: self.tab.clone(),
                    host: Some(host),
                })
            })
            .collect())
    }

    /// Whole-tree search in one page call; a region-by-region walk costs two
    /// round trips per shadow root.
    async fn query_deep(&self, selector: &str) -> Result<Vec<ElementRef>> {
        let body = format!(
            "const root = rootOf({host}); if (!root) return [];
             const out = [];
             const walk = (r) => {{
               out.push(...r.querySelectorAll({selector}));
               for (const e of r.querySelectorAll('*')) if (e.shadowRoot) walk(e.shadowRoot);
             }};
             walk(root);
             return out.map(describe);",
            host = js_literal(&self.host)?,
            selector = js_literal(selector)?,
        );
        let raw: Vec<RawElement> = run(&self.tab, body).await?;
        Ok(self.elements(raw))
    }
}

struct ChromeElement {
    tab: Arc<Tab>,
    id: String,
    info: ElementInfo,
}

impl ChromeElement {
    async fn exec<T: DeserializeOwned + Send + 'static>(&self, body: &str) -> Result<T> {
        let script = format!("const el = lookup({}); {body}", js_literal(&self.id)?);
        run(&self.tab, script).await
    }

    async fn exec_unit(&self, body: &str) -> Result<()> {
        let _: Value = self.exec(&format!("{body} return null;")).await?;
        Ok(())
    }
}

#[async_trait]
impl Element for ChromeElement {
    fn info(&self) -> &ElementInfo {
        &self.info
    }

    async fn click(&self) -> Result<()> {
        self.exec_unit("el.click();").await
    }

    async fn focus(&self) -> Result<()> {
        self.exec_unit("el.focus();").await
    }

    async fn text(&self) -> Result<String> {
        self.exec("return el.innerText || el.textContent || '';").await
    }

    async fn set_content(&self, text: &str) -> Result<String> {
        self.exec(&format!(
            "el.innerHTML = ''; el.textContent = {text};
             fire(el, 'input'); fire(el, 'change');
             return el.textContent || '';",
            text = js_literal(text)?
        ))
        .await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.exec_unit(&format!(
            "el.focus(); document.execCommand('selectAll', false, null);
             document.execCommand('insertText', false, {text});",
            text = js_literal(text)?
        ))
        .await
    }

    async fn set_value(&self, text: &str) -> Result<()> {
        self.exec_unit(&format!(
            "el.value = {text}; fire(el, 'input'); fire(el, 'change');",
            text = js_literal(text)?
        ))
        .await
    }

    async fn press_enter(&self) -> Result<()> {
        self.exec_unit(
            "for (const type of ['keydown', 'keyup']) {
               el.dispatchEvent(new KeyboardEvent(type, {
                 key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true,
               }));
             }",
        )
        .await
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.exec_unit("el.scrollTop = el.scrollHeight;").await
    }

    async fn dialog_text(&self) -> Result<Option<String>> {
        // closest() stops at shadow boundaries, so hop through each host.
        self.exec(&format!(
            "let node = el;
             while (node) {{
               const dialog = node.closest({dialog});
               if (dialog) return dialog.innerText || '';
               const root = node.getRootNode();
               node = root && root.host ? root.host : null;
             }}
             return null;",
            dialog = js_literal(DIALOG_SELECTOR)?
        ))
        .await
    }
}
