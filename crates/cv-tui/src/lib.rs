pub mod app;
pub mod layout;

use anyhow::Result;
use app::{App, Control, PendingAction};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use cv_core::ViewerConfig;
use cv_ipt::{DumpSource, FirewallActions, IptablesFetcher};
use cv_view::{ActionOutcome, LiveView, NoticeLevel, Poller, ViewTree};
use layout::LineTarget;
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs},
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

pub struct TuiApp {
    config: ViewerConfig,
}

impl TuiApp {
    pub fn new(config: ViewerConfig) -> Self {
        Self { config }
    }

    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let res = self.run_loop(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        res
    }

    async fn run_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let fetcher = Arc::new(IptablesFetcher::new(&self.config));
        let actions = Arc::new(FirewallActions::new(&fetcher, &self.config));

        let mut app = App::new(
            LiveView::new(ViewTree::new(self.config.hide_empty)),
            fetcher.families(),
            self.config.highlight_duration(),
        );
        if !fetcher.has_ipv6() {
            app.interaction.notify_at(
                NoticeLevel::Info,
                "ip6tables not found, IPv6 view disabled",
                Instant::now(),
            );
        }

        let (poll_tx, mut poll_rx) = mpsc::channel(64);
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let _poller = Poller::new(
            Arc::clone(&fetcher),
            &self.config.tables,
            self.config.poll_interval(),
        )
        .spawn(poll_tx);

        let mut list_state = ListState::default();

        loop {
            while let Ok(event) = poll_rx.try_recv() {
                app.on_poll(event);
            }
            while let Ok(outcome) = action_rx.try_recv() {
                app.interaction.record_action(outcome);
            }

            let now = Instant::now();
            app.interaction.expire(now);

            terminal.draw(|f| ui(f, &app, &mut list_state, now))?;

            // Handle input
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match app.on_key(key.code) {
                        Control::Quit => return Ok(()),
                        Control::Run(action) => {
                            spawn_action(Arc::clone(&actions), action, action_tx.clone())
                        }
                        Control::Continue => {}
                    }
                }
            }
        }
    }
}

fn spawn_action(
    actions: Arc<FirewallActions>,
    action: PendingAction,
    tx: mpsc::UnboundedSender<ActionOutcome>,
) {
    info!("Running {:?}", action);
    tokio::spawn(async move {
        let outcome = match action {
            PendingAction::ResetCounters => {
                ActionOutcome::CountersReset(actions.zero_counters().await)
            }
            PendingAction::Restart => ActionOutcome::Restarted(actions.restart().await),
        };
        let _ = tx.send(outcome);
    });
}

fn ui(f: &mut Frame, app: &App, list_state: &mut ListState, now: Instant) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    // Header
    let titles: Vec<String> = app
        .families()
        .iter()
        .map(|family| format!("{} Firewall", family))
        .collect();
    let tabs = Tabs::new(titles)
        .select(app.family_index())
        .block(Block::default().borders(Borders::ALL).title("chainview"))
        .style(Style::default().fg(Color::Cyan))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    f.render_widget(tabs, chunks[0]);

    render_lines(f, app, list_state, chunks[1], now);

    if let Some(popup) = app.popup() {
        render_popup(f, popup);
    }

    render_footer(f, app, chunks[2]);
}

fn render_lines(f: &mut Frame, app: &App, list_state: &mut ListState, area: Rect, now: Instant) {
    let items: Vec<ListItem> = app
        .lines()
        .iter()
        .map(|line| {
            let mut style = match &line.target {
                LineTarget::Table(_) => Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
                LineTarget::Chain { .. } => Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
                LineTarget::Columns => Style::default().fg(Color::DarkGray),
                LineTarget::Rule { jump: Some(_), .. } => Style::default().fg(Color::Blue),
                LineTarget::Placeholder => Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
                _ => Style::default(),
            };
            if app.is_highlighted(line, now) {
                style = style.bg(Color::Yellow).fg(Color::Black);
            }
            ListItem::new(line.text.clone()).style(style)
        })
        .collect();

    list_state.select(Some(app.cursor()));

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(list, area, list_state);
}

fn render_popup(f: &mut Frame, popup: &app::ReferencePopup) {
    let area = centered_rect(50, 40, f.area());
    let items: Vec<ListItem> = popup
        .refs
        .iter()
        .map(|r| ListItem::new(format!("Chain {}, rule #{}", r.chain, r.rule)))
        .collect();

    let mut state = ListState::default();
    state.select(Some(popup.selected));

    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("References to {} (Enter: go, Esc: close)", popup.chain))
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Yellow)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_widget(Clear, area);
    f.render_stateful_widget(list, area, &mut state);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let footer_text = match app.interaction.notifications().last() {
        Some(notice) => {
            let color = match notice.level {
                NoticeLevel::Error => Color::Red,
                NoticeLevel::Info => Color::Cyan,
            };
            Line::from(Span::styled(
                notice.message.clone(),
                Style::default().fg(color),
            ))
        }
        None => Line::from(vec![
            Span::raw("Tab: Family | "),
            Span::raw("Enter: Jump/References | "),
            Span::raw("e: Hide empty | "),
            Span::raw("z: Reset counters | "),
            Span::raw("R: Restart firewall | "),
            Span::styled("q: Quit", Style::default().fg(Color::Red)),
        ]),
    };

    let footer =
        Paragraph::new(footer_text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(footer, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
