use crate::layout::{DisplayLine, LineTarget, flatten};
use crossterm::event::KeyCode;
use cv_core::{Family, JumpRef, TableKey};
use cv_view::{Effect, Focus, Interaction, LiveView, NodeId, PollEvent, ViewCommand};
use std::time::{Duration, Instant};
use tracing::debug;

const PAGE: usize = 10;

/// Reference list opened from a chain header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePopup {
    pub key: TableKey,
    pub chain: String,
    pub refs: Vec<JumpRef>,
    pub selected: usize,
}

/// Side effects the event loop has to run off the UI thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    ResetCounters,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
    Run(PendingAction),
}

/// Screen state: the live view plus cursor, family tab and popup
pub struct App {
    pub live: LiveView,
    pub interaction: Interaction,
    families: Vec<Family>,
    family: usize,
    lines: Vec<DisplayLine>,
    cursor: usize,
    anchor: Option<NodeId>,
    popup: Option<ReferencePopup>,
}

impl App {
    pub fn new(live: LiveView, families: Vec<Family>, flash: Duration) -> Self {
        let families = if families.is_empty() {
            vec![Family::V4]
        } else {
            families
        };

        let mut app = Self {
            live,
            interaction: Interaction::new(flash),
            families,
            family: 0,
            lines: vec![],
            cursor: 0,
            anchor: None,
            popup: None,
        };
        app.relayout();
        app
    }

    pub fn family(&self) -> Family {
        self.families[self.family]
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn family_index(&self) -> usize {
        self.family
    }

    pub fn lines(&self) -> &[DisplayLine] {
        &self.lines
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn popup(&self) -> Option<&ReferencePopup> {
        self.popup.as_ref()
    }

    pub fn is_highlighted(&self, line: &DisplayLine, now: Instant) -> bool {
        line.node
            .is_some_and(|node| self.interaction.is_highlighted(node, now))
    }

    /// Feed one poll event to the view and refresh the screen lines
    pub fn on_poll(&mut self, event: PollEvent) {
        if let Some(report) = self.live.handle(event) {
            if !report.is_unchanged() {
                debug!("{}", report);
            }
            self.relayout();
        }
    }

    pub fn on_key(&mut self, code: KeyCode) -> Control {
        if self.popup.is_some() {
            return self.on_popup_key(code);
        }

        match code {
            KeyCode::Char('q') => return Control::Quit,
            KeyCode::Tab => {
                self.family = (self.family + 1) % self.families.len();
                self.cursor = 0;
                self.anchor = None;
                self.relayout();
            }
            KeyCode::Up | KeyCode::Char('k') => self.step(-1),
            KeyCode::Down | KeyCode::Char('j') => self.step(1),
            KeyCode::PageUp => self.step(-(PAGE as isize)),
            KeyCode::PageDown => self.step(PAGE as isize),
            KeyCode::Enter => {
                if let Some(command) = self.command_at_cursor() {
                    return self.run(command);
                }
            }
            KeyCode::Char('e') => return self.run(ViewCommand::ToggleHideEmpty),
            KeyCode::Char('z') => return self.run(ViewCommand::ResetCounters),
            KeyCode::Char('R') => return self.run(ViewCommand::RestartFirewall),
            _ => {}
        }

        Control::Continue
    }

    fn on_popup_key(&mut self, code: KeyCode) -> Control {
        let Some(popup) = self.popup.as_mut() else {
            return Control::Continue;
        };

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.popup = None,
            KeyCode::Up | KeyCode::Char('k') => popup.selected = popup.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                popup.selected = (popup.selected + 1).min(popup.refs.len().saturating_sub(1));
            }
            KeyCode::Enter => {
                let command = popup.refs.get(popup.selected).map(|r| ViewCommand::JumpToRule {
                    key: popup.key,
                    chain: r.chain.clone(),
                    rule: r.rule,
                });
                self.popup = None;
                if let Some(command) = command {
                    return self.run(command);
                }
            }
            _ => {}
        }

        Control::Continue
    }

    fn command_at_cursor(&self) -> Option<ViewCommand> {
        match &self.lines.get(self.cursor)?.target {
            LineTarget::Rule {
                key,
                jump: Some(target),
                ..
            } => Some(ViewCommand::JumpToChain {
                key: *key,
                chain: target.clone(),
            }),
            LineTarget::Chain {
                key,
                chain,
                referenced: true,
            } => Some(ViewCommand::ShowReferences {
                key: *key,
                chain: chain.clone(),
            }),
            _ => None,
        }
    }

    fn run(&mut self, command: ViewCommand) -> Control {
        match self.interaction.dispatch(self.live.tree_mut(), command) {
            Effect::Nothing => {}
            Effect::Focus(focus) => self.focus(focus),
            Effect::References { key, chain, refs } => {
                self.popup = Some(ReferencePopup {
                    key,
                    chain,
                    refs,
                    selected: 0,
                });
            }
            Effect::HideEmpty(_) => self.relayout(),
            Effect::ResetCounters => return Control::Run(PendingAction::ResetCounters),
            Effect::Restart => return Control::Run(PendingAction::Restart),
        }
        Control::Continue
    }

    fn focus(&mut self, focus: Focus) {
        if let Some(index) = self.families.iter().position(|f| *f == focus.key.family) {
            self.family = index;
        }
        self.anchor = Some(focus.node);
        self.relayout();
    }

    fn step(&mut self, delta: isize) {
        if self.lines.is_empty() {
            return;
        }

        let last = self.lines.len().saturating_sub(1);
        let wanted = self.cursor.saturating_add_signed(delta).min(last);
        let selectable = |i: &usize| self.lines[*i].is_selectable();

        // Nearest selectable line in the direction of travel, else the closest one behind it
        let found = if delta >= 0 {
            (wanted..=last)
                .find(selectable)
                .or_else(|| (0..wanted).rev().find(selectable))
        } else {
            (0..=wanted)
                .rev()
                .find(selectable)
                .or_else(|| (wanted + 1..=last).find(selectable))
        };

        if let Some(cursor) = found {
            self.cursor = cursor;
            self.anchor = self.lines[cursor].node;
        }
    }

    /// Rebuild lines and keep the cursor on the same node when it survived
    pub fn relayout(&mut self) {
        self.lines = flatten(&self.live, self.family());

        let anchored = self
            .anchor
            .and_then(|node| self.lines.iter().position(|l| l.node == Some(node)));

        self.cursor = match anchored {
            Some(index) => index,
            None => self.cursor.min(self.lines.len().saturating_sub(1)),
        };
    }
}
