use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::locator::{Descriptor, ElementRef, MinSize, Surface, find_first};

use Descriptor::Css;

pub(crate) const SEND_BUTTON: &[Descriptor] = &[
    Css("#send-button"),
    Css(r#"button[aria-label="Send"]"#),
    Css(r#"button[aria-label="Submit"]"#),
    Css(r#"ytcp-icon-button[icon="send"]"#),
    Css(r#"ytcp-icon-button[aria-label="Send"]"#),
    Css(r#"button[aria-label*="send"]"#),
    Css(r#"ytcp-button[aria-label*="Send"]"#),
    Css("#search-button"),
];
const SEND_MIN: MinSize = MinSize::new(10.0, 10.0);

/// How the prompt reached the entry surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMethod {
    EditableContent,
    /// Direct mutation was not observed, went through the editing command path.
    InsertTextFallback,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMethod {
    Button,
    EnterKey,
}

/// Types the prompt into the dialog and submits it.
pub struct PromptInjector<'a> {
    surface: &'a dyn Surface,
    config: &'a AgentConfig,
}

impl<'a> PromptInjector<'a> {
    pub fn new(surface: &'a dyn Surface, config: &'a AgentConfig) -> Self {
        Self { surface, config }
    }

    pub async fn inject(&self, input: &ElementRef, prompt: &str) -> AgentResult<InjectionMethod> {
        input.focus().await?;

        let info = input.info();
        let editable = info.content_editable || info.tag.eq_ignore_ascii_case("div");

        let method = if editable {
            debug!("writing prompt into editable region");
            let observed = input.set_content(prompt).await?;
            if observed == prompt {
                InjectionMethod::EditableContent
            } else {
                debug!(observed_len = observed.len(), "content not observed, inserting as text");
                input.insert_text(prompt).await?;
                InjectionMethod::InsertTextFallback
            }
        } else {
            debug!("writing prompt into value field");
            input.set_value(prompt).await?;
            InjectionMethod::Value
        };

        info!(?method, chars = prompt.chars().count(), "prompt injected");
        Ok(method)
    }

    /// Click an enabled send control, or press Enter on the input.
    pub async fn send(&self, input: &ElementRef) -> AgentResult<SendMethod> {
        sleep(self.config.injection_pause).await;

        match self.find_send_button().await {
            Some(button) => {
                info!("clicking send button");
                button.click().await?;
                Ok(SendMethod::Button)
            }
            None => {
                info!("send button not clickable, pressing Enter");
                input.press_enter().await?;
                Ok(SendMethod::EnterKey)
            }
        }
    }

    /// Re-submit after the host cancelled its own answer. Failures are logged;
    /// the watcher keeps polling either way.
    pub async fn resubmit(&self) {
        let Some(input) = find_first(
            &self.surface.root(),
            crate::activator::INPUT_BOX,
            crate::activator::INPUT_MIN,
        )
        .await
        else {
            warn!("resubmit skipped, input box gone");
            return;
        };

        if let Err(e) = input.focus().await {
            warn!(error = %e, "focus before resubmit failed");
        }
        let result = match self.find_send_button().await {
            Some(button) => button.click().await,
            None => input.press_enter().await,
        };
        match result {
            Ok(()) => info!("resubmitted prompt"),
            Err(e) => warn!(error = %e, "resubmit failed"),
        }
    }

    async fn find_send_button(&self) -> Option<ElementRef> {
        find_first(&self.surface.root(), SEND_BUTTON, SEND_MIN)
            .await
            .filter(|button| !button.info().disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::DialogActivator;
    use crate::testing::FakeStudio;

    async fn open_input(studio: &FakeStudio, config: &AgentConfig) -> ElementRef {
        studio.with(|s| s.dialog_open = true);
        DialogActivator::new(studio, config)
            .wait_for_input(None)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn editable_region_takes_content_directly() {
        let studio = FakeStudio::new();
        let config = AgentConfig::default();
        let input = open_input(&studio, &config).await;
        let injector = PromptInjector::new(&studio, &config);

        let method = injector.inject(&input, "How are my shorts doing?").await.unwrap();
        assert_eq!(method, InjectionMethod::EditableContent);
        assert_eq!(injector.send(&input).await.unwrap(), SendMethod::Button);
        studio.with(|s| assert_eq!(s.sent_prompts, vec!["How are my shorts doing?".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_insert_text_when_mutation_is_ignored() {
        let studio = FakeStudio::new();
        studio.with(|s| s.ignore_direct_content = true);
        let config = AgentConfig::default();
        let input = open_input(&studio, &config).await;

        let method = PromptInjector::new(&studio, &config)
            .inject(&input, "Who is my audience?")
            .await
            .unwrap();
        assert_eq!(method, InjectionMethod::InsertTextFallback);
        studio.with(|s| assert_eq!(s.input_content, "Who is my audience?"));
    }

    #[tokio::test(start_paused = true)]
    async fn value_field_and_disabled_send_use_enter() {
        let studio = FakeStudio::new();
        studio.with(|s| {
            s.input_editable = false;
            s.send_enabled = false;
        });
        let config = AgentConfig::default();
        let input = open_input(&studio, &config).await;
        let injector = PromptInjector::new(&studio, &config);

        assert_eq!(injector.inject(&input, "traffic?").await.unwrap(), InjectionMethod::Value);
        assert_eq!(injector.send(&input).await.unwrap(), SendMethod::EnterKey);
        studio.with(|s| {
            assert_eq!(s.enter_presses, 1);
            assert_eq!(s.sent_prompts.len(), 1);
        });
    }
}
