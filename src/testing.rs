//! In-memory page and relay fakes shared by the unit tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::activator::{ASK_BUTTON, CLOSE_BUTTON, DIALOG, INPUT_BOX, SCROLL_CONTAINER};
use crate::injector::SEND_BUTTON;
use crate::locator::{Element, ElementInfo, ElementRef, Scope, ScopeRef, Surface};
use crate::relay::{OutboundMessage, Relay};
use crate::watcher::MESSAGE_BUBBLE;

/// Element with fixed attributes; every action succeeds and does nothing.
pub struct StaticElement {
    info: ElementInfo,
}

impl StaticElement {
    pub fn new(info: ElementInfo) -> ElementRef {
        Arc::new(Self { info })
    }
}

#[async_trait]
impl Element for StaticElement {
    fn info(&self) -> &ElementInfo {
        &self.info
    }
    async fn click(&self) -> Result<()> {
        Ok(())
    }
    async fn focus(&self) -> Result<()> {
        Ok(())
    }
    async fn text(&self) -> Result<String> {
        Ok(self.info.text.clone())
    }
    async fn set_content(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
    async fn insert_text(&self, _text: &str) -> Result<()> {
        Ok(())
    }
    async fn set_value(&self, _text: &str) -> Result<()> {
        Ok(())
    }
    async fn press_enter(&self) -> Result<()> {
        Ok(())
    }
    async fn scroll_to_end(&self) -> Result<()> {
        Ok(())
    }
    async fn dialog_text(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Region answering exact selector strings from a fixed list.
pub struct StaticScope {
    elements: Vec<(&'static str, ElementRef)>,
    children: Vec<ScopeRef>,
}

impl StaticScope {
    pub fn new(elements: Vec<(&'static str, ElementRef)>, children: Vec<ScopeRef>) -> ScopeRef {
        Arc::new(Self { elements, children })
    }
}

#[async_trait]
impl Scope for StaticScope {
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>> {
        Ok(self
            .elements
            .iter()
            .filter(|(s, _)| *s == selector)
            .map(|(_, el)| el.clone())
            .collect())
    }
    async fn children(&self) -> Result<Vec<ScopeRef>> {
        Ok(self.children.clone())
    }
}

/// What the scripted assistant sees when asked for its output.
pub struct Exchange {
    /// How many times the dialog has been opened so far.
    pub opens: usize,
    /// Prompts submitted in the current dialog session.
    pub submissions: usize,
    pub since_send: Duration,
}

/// Assistant output for one moment of an exchange.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub reply: String,
    /// Notice shown below the conversation, e.g. a rate-limit message.
    pub banner: String,
    /// "You canceled this response" lines shown in the dialog.
    pub cancel_notices: usize,
}

impl Transcript {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            ..Default::default()
        }
    }

    pub fn banner(text: impl Into<String>) -> Self {
        Self {
            banner: text.into(),
            ..Default::default()
        }
    }

    pub fn cancelled(times: usize) -> Self {
        Self {
            cancel_notices: times,
            ..Default::default()
        }
    }

    pub fn with_cancel_notices(mut self, times: usize) -> Self {
        self.cancel_notices = times;
        self
    }
}

type Script = Box<dyn Fn(&Exchange) -> Transcript + Send>;

pub struct StudioState {
    pub ask_button_visible: bool,
    pub dialog_open: bool,
    pub input_visible: bool,
    pub input_editable: bool,
    /// Editable region drops direct content writes.
    pub ignore_direct_content: bool,
    pub input_content: String,
    pub send_enabled: bool,
    /// Prompts submitted since the dialog was last opened.
    pub sent_prompts: Vec<String>,
    pub last_send: Option<Instant>,
    pub opens: usize,
    pub closes: usize,
    pub ask_clicks: usize,
    pub ask_lookups: usize,
    pub scrolls: usize,
    pub enter_presses: usize,
    script: Script,
}

impl StudioState {
    fn transcript(&self) -> Transcript {
        match self.last_send {
            Some(sent) if !self.sent_prompts.is_empty() => (self.script)(&Exchange {
                opens: self.opens,
                submissions: self.sent_prompts.len(),
                since_send: sent.elapsed(),
            }),
            _ => Transcript::default(),
        }
    }

    fn messages(&self) -> (Vec<String>, String) {
        let transcript = self.transcript();
        let mut messages = self.sent_prompts.clone();
        if !transcript.reply.is_empty() {
            messages.push(transcript.reply);
        }
        let mut lines = vec!["Ask Studio".to_string()];
        lines.extend(messages.iter().cloned());
        lines.extend(std::iter::repeat_n("You canceled this response".to_string(), transcript.cancel_notices));
        if !transcript.banner.is_empty() {
            lines.push(transcript.banner);
        }
        (messages, lines.join("\n"))
    }

    fn submit(&mut self) {
        if self.input_content.is_empty() {
            return;
        }
        self.sent_prompts.push(self.input_content.clone());
        self.last_send = Some(Instant::now());
    }
}

/// Scripted stand-in for the Studio page. The ask button sits in the document;
/// the dialog, its controls and the conversation live in nested regions.
#[derive(Clone)]
pub struct FakeStudio {
    state: Arc<Mutex<StudioState>>,
}

impl FakeStudio {
    /// A page whose assistant never answers.
    pub fn new() -> Self {
        Self::scripted(|_| Transcript::default())
    }

    pub fn scripted(script: impl Fn(&Exchange) -> Transcript + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(StudioState {
                ask_button_visible: true,
                dialog_open: false,
                input_visible: true,
                input_editable: true,
                ignore_direct_content: false,
                input_content: String::new(),
                send_enabled: true,
                sent_prompts: Vec::new(),
                last_send: None,
                opens: 0,
                closes: 0,
                ask_clicks: 0,
                ask_lookups: 0,
                scrolls: 0,
                enter_presses: 0,
                script: Box::new(script),
            })),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut StudioState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn element(&self, kind: Kind, info: ElementInfo) -> ElementRef {
        Arc::new(FakeElement {
            studio: self.clone(),
            kind,
            info,
        })
    }
}

#[async_trait]
impl Surface for FakeStudio {
    fn root(&self) -> ScopeRef {
        Arc::new(FakeScope {
            studio: self.clone(),
            region: Region::Document,
        })
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.with(|s| {
            if s.dialog_open {
                s.messages().1
            } else {
                "Channel dashboard".to_string()
            }
        }))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Region {
    Document,
    Dialog,
    Conversation,
}

struct FakeScope {
    studio: FakeStudio,
    region: Region,
}

fn sized(tag: &str, label: &str, text: &str) -> ElementInfo {
    ElementInfo {
        tag: tag.to_string(),
        aria_label: label.to_string(),
        text: text.to_string(),
        width: 120.0,
        height: 40.0,
        ..Default::default()
    }
}

#[async_trait]
impl Scope for FakeScope {
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>> {
        let studio = &self.studio;
        let found = studio.with(|s| {
            let mut found = Vec::new();
            match self.region {
                Region::Document => {
                    if selector == ASK_BUTTON[0].selector() {
                        s.ask_lookups += 1;
                        if s.ask_button_visible {
                            found.push((Kind::AskButton, sized("ytcp-icon-button", "Ask Studio", "")));
                        }
                    }
                }
                Region::Dialog if s.dialog_open => {
                    let dialog_text = s.messages().1;
                    if selector == DIALOG[0].selector() || selector == SCROLL_CONTAINER[0].selector() {
                        found.push((Kind::Dialog, sized("ytcp-creator-chat-dialog", "", &dialog_text)));
                    }
                    let input_selector = if s.input_editable { INPUT_BOX[4] } else { INPUT_BOX[5] };
                    if s.input_visible && selector == input_selector.selector() {
                        let mut info = sized(
                            if s.input_editable { "div" } else { "input" },
                            "Ask something",
                            &s.input_content,
                        );
                        info.content_editable = s.input_editable;
                        found.push((Kind::Input, info));
                    }
                    if selector == SEND_BUTTON[1].selector() {
                        let mut info = sized("button", "Send", "");
                        info.disabled = !s.send_enabled;
                        found.push((Kind::Send, info));
                    }
                    if selector == CLOSE_BUTTON[0].selector() {
                        found.push((Kind::Close, sized("ytcp-icon-button", "Close", "")));
                    }
                }
                Region::Conversation if s.dialog_open && selector == MESSAGE_BUBBLE => {
                    for text in s.messages().0 {
                        found.push((Kind::Message, sized("ytcp-creator-chat-message", "", &text)));
                    }
                }
                _ => {}
            }
            found
        });
        Ok(found
            .into_iter()
            .map(|(kind, info)| studio.element(kind, info))
            .collect())
    }

    async fn children(&self) -> Result<Vec<ScopeRef>> {
        let child = match self.region {
            Region::Document => Region::Dialog,
            Region::Dialog => Region::Conversation,
            Region::Conversation => return Ok(Vec::new()),
        };
        Ok(vec![Arc::new(FakeScope {
            studio: self.studio.clone(),
            region: child,
        })])
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    AskButton,
    Dialog,
    Input,
    Send,
    Close,
    Message,
}

struct FakeElement {
    studio: FakeStudio,
    kind: Kind,
    info: ElementInfo,
}

#[async_trait]
impl Element for FakeElement {
    fn info(&self) -> &ElementInfo {
        &self.info
    }

    async fn click(&self) -> Result<()> {
        self.studio.with(|s| match self.kind {
            Kind::AskButton => {
                s.ask_clicks += 1;
                if !s.dialog_open {
                    s.dialog_open = true;
                    s.opens += 1;
                }
            }
            Kind::Send if s.send_enabled => s.submit(),
            Kind::Close => {
                s.dialog_open = false;
                s.closes += 1;
                s.sent_prompts.clear();
                s.last_send = None;
                s.input_content.clear();
            }
            _ => {}
        });
        Ok(())
    }

    async fn focus(&self) -> Result<()> {
        Ok(())
    }

    async fn text(&self) -> Result<String> {
        Ok(self.studio.with(|s| match self.kind {
            Kind::Dialog => s.messages().1,
            Kind::Input => s.input_content.clone(),
            _ => self.info.text.clone(),
        }))
    }

    async fn set_content(&self, text: &str) -> Result<String> {
        Ok(self.studio.with(|s| {
            if !s.ignore_direct_content {
                s.input_content = text.to_string();
            }
            s.input_content.clone()
        }))
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.studio.with(|s| s.input_content = text.to_string());
        Ok(())
    }

    async fn set_value(&self, text: &str) -> Result<()> {
        if self.kind != Kind::Input {
            bail!("not a field");
        }
        self.studio.with(|s| s.input_content = text.to_string());
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        self.studio.with(|s| {
            s.enter_presses += 1;
            s.submit();
        });
        Ok(())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.studio.with(|s| s.scrolls += 1);
        Ok(())
    }

    async fn dialog_text(&self) -> Result<Option<String>> {
        Ok(match self.kind {
            Kind::Message => Some(self.studio.with(|s| s.messages().1)),
            _ => None,
        })
    }
}

/// Relay that records everything it is handed.
#[derive(Default)]
pub struct RecordingRelay {
    pub messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingRelay {
    pub fn terminals(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_terminal())
            .cloned()
            .collect()
    }

    /// Progress of every heartbeat, in delivery order.
    pub fn heartbeat_progress(&self) -> Vec<u64> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::PlanResponse { payload, is_heartbeat: true } => payload["progress"].as_u64(),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_terminal() && !m.is_heartbeat())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
