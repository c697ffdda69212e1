use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::locator::{Descriptor, ElementInfo, ElementRef, MinSize, Surface, find_first};

use Descriptor::{Css, Scan};

/// Ask Studio activation control, most to least specific.
pub(crate) const ASK_BUTTON: &[Descriptor] = &[
    Css(r#"ytcp-icon-button[aria-label="Ask Studio"]"#),
    Css(r#"ytcp-icon-button[aria-label*="Ask"]"#),
    Css(r#"ytcp-icon-button[icon="sparkles"]"#),
    Css(r#"ytcp-icon-button[icon*="sparkle"]"#),
    Css("#ask-studio-button"),
    Css(r#"button[aria-label*="Ask"]"#),
    Css(r#"ytcp-icon-button[aria-label*="Assistant"]"#),
    Css("#search-icon-button"),
    Css("ytcp-icon-button#search-icon"),
    Css(r#"[aria-label="Search across your channel"]"#),
    Scan {
        selector: r#"ytcp-icon-button, button, [role="button"]"#,
        filter: looks_like_ask_control,
    },
    // The omnisearch bar opens the same panel.
    Css("ytcp-omnisearch-input, #search-input"),
];

/// Chat entry surface. Needs a real box, not a collapsed placeholder.
pub(crate) const INPUT_BOX: &[Descriptor] = &[
    Css(".ytcpCreatorChatEntityAttachmentInlineFlowPromptBox"),
    Css(".ytcp-creator-chat-entity-attachment-inline-flow-prompt-box"),
    Css("ytcp-creator-chat-input #input"),
    Css(r#"ytcp-creator-chat-spark [contenteditable="true"]"#),
    Css(r#"div[contenteditable="true"][aria-label="Ask something"]"#),
    Css(r#"[aria-label="Ask something"]"#),
    Css(r#"[placeholder="Ask something"]"#),
    Css(r#"[aria-placeholder="Ask something"]"#),
    Css(r#"div[contenteditable="true"]"#),
    Css(r#"[role="textbox"]"#),
    Css("ytcp-omnisearch-input input"),
];
pub(crate) const INPUT_MIN: MinSize = MinSize::new(50.0, 10.0);

pub(crate) const DIALOG: &[Descriptor] = &[Css(
    r#"ytcp-creator-chat-dialog, #creator-chat-dialog, [class*="CreatorChatEntity"], ytcp-omnisearch-dialog"#,
)];
const DIALOG_OPEN_MIN: MinSize = MinSize::new(100.0, 0.0);

pub(crate) const SCROLL_CONTAINER: &[Descriptor] = &[Css(
    r#"[class*="CreatorChatEntity"], [class*="omnisearch"], ytcp-creator-chat-dialog"#,
)];

pub(crate) const CLOSE_BUTTON: &[Descriptor] =
    &[Css(r#"[aria-label="Close"], .close-button, [icon="close"]"#)];

fn looks_like_ask_control(info: &ElementInfo) -> bool {
    let label = info.aria_label.to_lowercase();
    let text = info.text.trim().to_lowercase();
    (label.contains("ask") && !label.contains("task"))
        || text.contains("ask studio")
        || text == "ask"
        || label.contains("sparkle")
        || label.contains("assistant")
        || label.contains("search across")
}

/// Opens the Ask Studio dialog and finds its entry field.
pub struct DialogActivator<'a> {
    surface: &'a dyn Surface,
    config: &'a AgentConfig,
}

impl<'a> DialogActivator<'a> {
    pub fn new(surface: &'a dyn Surface, config: &'a AgentConfig) -> Self {
        Self { surface, config }
    }

    pub async fn find_input(&self) -> Option<ElementRef> {
        find_first(&self.surface.root(), INPUT_BOX, INPUT_MIN).await
    }

    pub async fn find_activation_control(&self) -> Option<ElementRef> {
        find_first(&self.surface.root(), ASK_BUTTON, MinSize::RENDERED).await
    }

    /// Make sure the dialog is open and scrolled to its end. Returns the entry
    /// field when it was already visible. Never reopens an open dialog.
    pub async fn open(&self) -> AgentResult<Option<ElementRef>> {
        let root = self.surface.root();
        let input = self.find_input().await;
        let already_open =
            input.is_some() || find_first(&root, DIALOG, DIALOG_OPEN_MIN).await.is_some();

        if already_open {
            info!("Ask Studio dialog already open");
        } else {
            let control = self
                .wait_for_activation_control()
                .await
                .ok_or_else(|| AgentError::ElementNotFound("Ask Studio button".to_string()))?;

            info!(label = %control.info().aria_label, "clicking Ask Studio button");
            control.click().await?;
            debug!(delay = ?self.config.settle_delay, "waiting for dialog to render");
            sleep(self.config.settle_delay).await;
        }

        if let Some(container) = find_first(&root, SCROLL_CONTAINER, MinSize::RENDERED).await {
            match container.scroll_to_end().await {
                Ok(()) => debug!("scrolled dialog to bottom"),
                Err(e) => warn!(error = %e, "could not scroll dialog"),
            }
        }
        sleep(self.config.post_open_pause).await;

        Ok(input)
    }

    async fn wait_for_activation_control(&self) -> Option<ElementRef> {
        let attempts = self.config.activation_attempts;
        for attempt in 1..=attempts {
            debug!(attempt, attempts, "looking for Ask Studio button");
            if let Some(control) = self.find_activation_control().await {
                return Some(control);
            }
            sleep(self.config.activation_interval).await;
        }
        warn!(attempts, "Ask Studio button not found");
        None
    }

    /// Entry field, waiting for it to render. Re-clicks the activation control
    /// once midway in case the first click was swallowed.
    pub async fn wait_for_input(&self, found: Option<ElementRef>) -> AgentResult<ElementRef> {
        if let Some(input) = found {
            return Ok(input);
        }

        for attempt in 0..self.config.input_attempts {
            debug!(attempt = attempt + 1, "looking for input box");
            if let Some(input) = self.find_input().await {
                return Ok(input);
            }
            if attempt == self.config.input_reactivate_at {
                if let Some(control) = self.find_activation_control().await {
                    info!("input still missing, clicking Ask Studio button again");
                    if let Err(e) = control.click().await {
                        warn!(error = %e, "re-click failed");
                    }
                }
            }
            sleep(self.config.activation_interval).await;
        }

        Err(AgentError::ElementNotFound("Ask Studio input box".to_string()))
    }

    /// Full dialog text, falling back to the page body.
    pub async fn transcript_text(&self) -> String {
        let root = self.surface.root();
        if let Some(container) = find_first(&root, SCROLL_CONTAINER, MinSize::RENDERED).await {
            if let Ok(text) = container.text().await {
                return text;
            }
        }
        self.surface.body_text().await.unwrap_or_default()
    }

    /// Close the dialog so the next attempt starts clean. Absent control is fine.
    pub async fn close(&self) {
        let Some(close) = find_first(&self.surface.root(), CLOSE_BUTTON, MinSize::RENDERED).await
        else {
            debug!("no close control found");
            return;
        };
        if let Err(e) = close.click().await {
            warn!(error = %e, "closing dialog failed");
            return;
        }
        sleep(self.config.close_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStudio;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn open_dialog_is_not_reopened() {
        let studio = FakeStudio::new();
        studio.with(|s| s.dialog_open = true);
        let config = AgentConfig::default();

        let input = DialogActivator::new(&studio, &config).open().await.unwrap();
        assert!(input.is_some());
        studio.with(|s| {
            assert_eq!(s.opens, 0);
            assert_eq!(s.scrolls, 1);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_the_button_and_waits_for_render() {
        let studio = FakeStudio::new();
        let config = AgentConfig::default();
        let start = Instant::now();

        let found = DialogActivator::new(&studio, &config).open().await.unwrap();
        assert!(found.is_none());
        assert_eq!(start.elapsed(), config.settle_delay + config.post_open_pause);
        studio.with(|s| assert_eq!(s.opens, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ten_attempts() {
        let studio = FakeStudio::new();
        studio.with(|s| s.ask_button_visible = false);
        let config = AgentConfig::default();
        let start = Instant::now();

        let Err(err) = DialogActivator::new(&studio, &config).open().await else {
            panic!("opened without an activation control");
        };
        assert!(matches!(err, AgentError::ElementNotFound(ref what) if what == "Ask Studio button"));
        assert_eq!(start.elapsed().as_secs(), 20);
        studio.with(|s| assert_eq!(s.ask_lookups, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn reclicks_activation_when_input_is_slow() {
        let studio = FakeStudio::new();
        studio.with(|s| {
            s.dialog_open = true;
            s.input_visible = false;
        });
        let config = AgentConfig::default();
        let activator = DialogActivator::new(&studio, &config);

        let Err(err) = activator.wait_for_input(None).await else {
            panic!("input box appeared unexpectedly");
        };
        assert!(matches!(err, AgentError::ElementNotFound(_)));
        studio.with(|s| assert_eq!(s.ask_clicks, 1));
    }
}
