//! Deep element lookup.
//!
//! The host page hides most of its widgets inside encapsulated sub-trees
//! (shadow roots), so an ordinary selector query from the document only sees
//! the outer shell. Lookups here walk every nested [`Scope`] reachable from the
//! root, in document order, and then apply a visibility filter.
//!
//! The page itself is abstracted behind [`Surface`], [`Scope`] and [`Element`]
//! so the same lookup code drives a real Chrome tab and the in-memory fake used
//! by the tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Attributes of an element, read when it was matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementInfo {
    pub tag: String,
    pub id: String,
    pub aria_label: String,
    pub text: String,
    pub width: f64,
    pub height: f64,
    pub content_editable: bool,
    /// `disabled` property or `aria-disabled="true"`.
    pub disabled: bool,
}

impl ElementInfo {
    pub fn is_rendered(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[async_trait]
pub trait Element: Send + Sync {
    fn info(&self) -> &ElementInfo;

    async fn click(&self) -> Result<()>;
    async fn focus(&self) -> Result<()>;
    /// Current rendered text, read fresh from the page.
    async fn text(&self) -> Result<String>;
    /// Clear an editable region, set its text and fire `input`/`change`.
    /// Returns the content the region reports afterwards.
    async fn set_content(&self, text: &str) -> Result<String>;
    /// Select-all then insert through the editing command path.
    async fn insert_text(&self, text: &str) -> Result<()>;
    /// Assign `value` on a plain field and fire `input`/`change`.
    async fn set_value(&self, text: &str) -> Result<()>;
    /// Enter keydown then keyup on this element.
    async fn press_enter(&self) -> Result<()>;
    async fn scroll_to_end(&self) -> Result<()>;
    /// Text of the closest enclosing dialog, if any.
    async fn dialog_text(&self) -> Result<Option<String>>;
}

pub type ElementRef = Arc<dyn Element>;

/// One search region: the document or an encapsulated sub-tree.
#[async_trait]
pub trait Scope: Send + Sync {
    /// Matches directly inside this region, not descending into nested ones.
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>>;
    /// Encapsulated regions hosted by elements of this region.
    async fn children(&self) -> Result<Vec<ScopeRef>>;

    /// Matches in this region and every region nested below it, pre-order.
    /// Drivers that can search the whole tree in one call should override it.
    async fn query_deep(&self, selector: &str) -> Result<Vec<ElementRef>> {
        let mut results = self.query(selector).await?;
        let mut pending = self.children().await?;
        pending.reverse();

        while let Some(scope) = pending.pop() {
            results.extend(scope.query(selector).await?);
            let mut nested = scope.children().await?;
            nested.reverse();
            pending.extend(nested);
        }

        Ok(results)
    }
}

pub type ScopeRef = Arc<dyn Scope>;

/// The host page as seen by the agent.
#[async_trait]
pub trait Surface: Send + Sync {
    fn root(&self) -> ScopeRef;
    async fn body_text(&self) -> Result<String>;
}

/// A way of finding an element, tried in priority order by [`find_first`].
#[derive(Clone, Copy)]
pub enum Descriptor {
    Css(&'static str),
    /// Broad query narrowed by a predicate over the matched element.
    Scan {
        selector: &'static str,
        filter: fn(&ElementInfo) -> bool,
    },
}

impl Descriptor {
    pub fn selector(&self) -> &'static str {
        match self {
            Descriptor::Css(selector) => selector,
            Descriptor::Scan { selector, .. } => selector,
        }
    }

    fn accepts(&self, info: &ElementInfo) -> bool {
        match self {
            Descriptor::Css(_) => true,
            Descriptor::Scan { filter, .. } => filter(info),
        }
    }
}

/// Minimum rendered box for a match to count as visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinSize {
    pub width: f64,
    pub height: f64,
}

impl MinSize {
    /// Any non-zero box.
    pub const RENDERED: MinSize = MinSize {
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn admits(&self, info: &ElementInfo) -> bool {
        info.is_rendered() && info.width > self.width && info.height > self.height
    }
}

/// Every match for `selector` in `root` and all nested regions, pre-order.
pub async fn query_all_deep(root: &ScopeRef, selector: &str) -> Result<Vec<ElementRef>> {
    root.query_deep(selector).await
}

/// First visible match, trying descriptors in order. Absence is not an error;
/// driver failures on one descriptor just move on to the next.
pub async fn find_first(
    root: &ScopeRef,
    descriptors: &[Descriptor],
    min: MinSize,
) -> Option<ElementRef> {
    for descriptor in descriptors {
        let selector = descriptor.selector();
        let found = match query_all_deep(root, selector).await {
            Ok(found) => found,
            Err(e) => {
                debug!(selector, error = %e, "lookup failed");
                continue;
            }
        };

        if let Some(el) = found
            .into_iter()
            .find(|el| min.admits(el.info()) && descriptor.accepts(el.info()))
        {
            debug!(selector, tag = %el.info().tag, id = %el.info().id, "element located");
            return Some(el);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticElement, StaticScope};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers whole-tree searches in one call and refuses region-by-region ones.
    struct FlatScope {
        deep_calls: AtomicUsize,
        hits: Vec<ElementRef>,
    }

    #[async_trait]
    impl Scope for FlatScope {
        async fn query(&self, _selector: &str) -> Result<Vec<ElementRef>> {
            Err(anyhow!("region query not supported"))
        }

        async fn children(&self) -> Result<Vec<ScopeRef>> {
            Err(anyhow!("region walk not supported"))
        }

        async fn query_deep(&self, _selector: &str) -> Result<Vec<ElementRef>> {
            self.deep_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    fn el(tag: &str, label: &str, width: f64, height: f64) -> ElementRef {
        StaticElement::new(ElementInfo {
            tag: tag.into(),
            aria_label: label.into(),
            width,
            height,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn descends_into_nested_regions_in_document_order() {
        let inner = StaticScope::new(vec![("button", el("button", "inner", 10.0, 10.0))], vec![]);
        let middle = StaticScope::new(vec![("button", el("button", "middle", 10.0, 10.0))], vec![inner]);
        let sibling = StaticScope::new(vec![("button", el("button", "sibling", 10.0, 10.0))], vec![]);
        let root: ScopeRef = StaticScope::new(
            vec![("button", el("button", "outer", 10.0, 10.0))],
            vec![middle, sibling],
        );

        let labels: Vec<String> = query_all_deep(&root, "button")
            .await
            .unwrap()
            .iter()
            .map(|e| e.info().aria_label.clone())
            .collect();
        assert_eq!(labels, vec!["outer", "middle", "inner", "sibling"]);
    }

    #[tokio::test]
    async fn skips_unrendered_matches() {
        let root: ScopeRef = StaticScope::new(
            vec![
                ("#send", el("button", "hidden", 0.0, 24.0)),
                ("#send", el("button", "shown", 24.0, 24.0)),
            ],
            vec![],
        );
        let found = find_first(&root, &[Descriptor::Css("#send")], MinSize::RENDERED)
            .await
            .unwrap();
        assert_eq!(found.info().aria_label, "shown");
    }

    #[tokio::test]
    async fn earlier_descriptors_win_even_when_later_ones_match_first_in_tree() {
        let nested = StaticScope::new(vec![("[aria-label=\"Ask Studio\"]", el("ytcp-icon-button", "Ask Studio", 40.0, 40.0))], vec![]);
        let root: ScopeRef = StaticScope::new(vec![("button", el("button", "Upload", 40.0, 40.0))], vec![nested]);

        let found = find_first(
            &root,
            &[
                Descriptor::Css("[aria-label=\"Ask Studio\"]"),
                Descriptor::Css("button"),
            ],
            MinSize::RENDERED,
        )
        .await
        .unwrap();
        assert_eq!(found.info().aria_label, "Ask Studio");
    }

    #[tokio::test]
    async fn scan_filter_and_min_size_both_apply() {
        let root: ScopeRef = StaticScope::new(
            vec![
                ("button", el("button", "Create task", 40.0, 40.0)),
                ("button", el("button", "Ask", 40.0, 5.0)),
                ("button", el("button", "Ask", 60.0, 20.0)),
            ],
            vec![],
        );
        let ask = Descriptor::Scan {
            selector: "button",
            filter: |info| info.aria_label.to_lowercase().contains("ask"),
        };
        let found = find_first(&root, &[ask], MinSize::new(50.0, 10.0)).await.unwrap();
        assert_eq!(found.info().width, 60.0);

        assert!(find_first(&root, &[Descriptor::Css("textarea")], MinSize::RENDERED).await.is_none());
    }

    #[tokio::test]
    async fn whole_tree_search_is_a_single_call_when_the_driver_supports_it() {
        let flat = Arc::new(FlatScope {
            deep_calls: AtomicUsize::new(0),
            hits: vec![
                el("button", "tiny", 2.0, 2.0),
                el("ytcp-icon-button", "Ask Studio", 40.0, 40.0),
            ],
        });
        let root: ScopeRef = flat.clone();

        let found = find_first(&root, &[Descriptor::Css("button")], MinSize::new(20.0, 20.0))
            .await
            .unwrap();
        assert_eq!(found.info().aria_label, "Ask Studio");
        assert_eq!(flat.deep_calls.load(Ordering::SeqCst), 1);
    }
}
