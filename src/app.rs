use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap};

use crate::installer::git::GitCli;
use crate::installer::http::HttpFetcher;
use crate::installer::manifest::ProjectManifest;
use crate::installer::orchestrator::{InstallRun, RunReport, Toolkit};
use crate::model::catalog::{Catalog, PluginId};
use crate::model::config::AppConfig;
use crate::model::mode::Mode;
use crate::model::selection::{InstalledSet, Selection};
use crate::msg::{Direction as MoveDir, Msg};

const MAX_NOTIFICATIONS: usize = 8;

pub struct App {
    pub mode: Mode,
    pub config: AppConfig,
    pub catalog: Catalog,
    pub selection: Selection,
    pub installed: InstalledSet,
    /// Manifest of the open project, if any.
    pub project: Option<PathBuf>,
    pub highlighted: usize,
    pub should_quit: bool,
    pub event_tx: mpsc::Sender<Msg>,
    pub notifications: VecDeque<String>,
    path_input: String,
    tools: Toolkit,
    run: Option<InstallRun>,
}

impl App {
    pub fn new(config: AppConfig, event_tx: mpsc::Sender<Msg>) -> Result<Self> {
        let tools = Toolkit {
            git: Box::new(GitCli::new(config.git.program.clone())),
            fetcher: Box::new(HttpFetcher::new(&config.download)?),
        };
        Ok(Self::with_toolkit(config, event_tx, tools))
    }

    pub fn with_toolkit(config: AppConfig, event_tx: mpsc::Sender<Msg>, tools: Toolkit) -> Self {
        Self {
            mode: Mode::Browse,
            config,
            catalog: Catalog::default(),
            selection: Selection::default(),
            installed: InstalledSet::new(),
            project: None,
            highlighted: 0,
            should_quit: false,
            event_tx,
            notifications: VecDeque::new(),
            path_input: String::new(),
            tools,
            run: None,
        }
    }

    /// Apply is offered only with an open project and no run in flight.
    pub fn can_apply(&self) -> bool {
        self.project.is_some() && self.run.is_none() && !self.catalog.is_empty()
    }

    // ── MVU: Update ──────────────────────────────────────────────

    pub fn update(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::Key(key) => self.handle_key(key),
            Msg::LoadCatalog => self.load_catalog(),
            Msg::OpenProject(path) => self.open_project(path),
            Msg::Apply => self.start_run(),
            Msg::Cancel => self.cancel_run(),
            Msg::Tick => self.handle_tick(),
            Msg::Quit => self.should_quit = true,
            Msg::Resize => {}
        }
        Ok(())
    }

    fn push_notification(&mut self, message: String) {
        self.notifications.push_back(message);
        while self.notifications.len() > MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match self.mode {
            Mode::Browse => self.handle_key_browse(key),
            Mode::OpenProject => self.handle_key_open_project(key),
            Mode::Installing => self.handle_key_installing(key),
        }
    }

    fn handle_key_browse(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            let _ = self.event_tx.send(Msg::Quit);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => self.move_highlight(MoveDir::Down),
            KeyCode::Char('k') | KeyCode::Up => self.move_highlight(MoveDir::Up),
            KeyCode::Char('g') | KeyCode::Home => self.move_highlight(MoveDir::Top),
            KeyCode::Char('G') | KeyCode::End => self.move_highlight(MoveDir::Bottom),
            KeyCode::Char(' ') => self.toggle_highlighted(),
            KeyCode::Char('o') => {
                self.path_input = self
                    .project
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                self.mode = Mode::OpenProject;
            }
            KeyCode::Char('r') => self.load_catalog(),
            KeyCode::Char('a') => {
                let _ = self.event_tx.send(Msg::Apply);
            }
            _ => {}
        }
    }

    fn handle_key_open_project(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Browse;
                self.path_input.clear();
            }
            KeyCode::Enter => {
                let input = self.path_input.trim().to_string();
                self.mode = Mode::Browse;
                self.path_input.clear();

                if !input.is_empty() {
                    let _ = self.event_tx.send(Msg::OpenProject(PathBuf::from(input)));
                }
            }
            KeyCode::Backspace => {
                self.path_input.pop();
            }
            KeyCode::Char(ch)
                if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT =>
            {
                self.path_input.push(ch);
            }
            _ => {}
        }
    }

    fn handle_key_installing(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                let _ = self.event_tx.send(Msg::Cancel);
            }
            KeyCode::Char('q') => {
                self.push_notification("install in progress, press Esc to cancel".to_string());
            }
            _ => {}
        }
    }

    fn move_highlight(&mut self, dir: MoveDir) {
        let last = self.catalog.len().saturating_sub(1);
        self.highlighted = match dir {
            MoveDir::Up => self.highlighted.saturating_sub(1),
            MoveDir::Down => (self.highlighted + 1).min(last),
            MoveDir::Top => 0,
            MoveDir::Bottom => last,
        };
    }

    fn toggle_highlighted(&mut self) {
        if self.run.is_some() || self.highlighted >= self.catalog.len() {
            return;
        }
        self.selection.toggle(PluginId(self.highlighted));
    }

    fn load_catalog(&mut self) {
        if self.run.is_some() {
            return;
        }

        let source = self.config.catalog.url.clone();
        match Catalog::load(&source, self.tools.fetcher.as_ref()) {
            Ok(catalog) => {
                tracing::info!("catalog loaded from {source}: {} plugins", catalog.len());
                self.catalog = catalog;
                self.selection = Selection::new(self.catalog.len());
                self.installed = InstalledSet::new();
                self.highlighted = 0;
                if let Some(path) = self.project.clone() {
                    self.open_project(path);
                }
            }
            Err(err) => {
                tracing::error!("catalog load failed: {err}");
                self.push_notification(format!("cannot load plugin list: {err}"));
            }
        }
    }

    /// Derive the initial selection from the manifest's references.
    fn open_project(&mut self, path: PathBuf) {
        if self.run.is_some() {
            return;
        }

        match ProjectManifest::load(&path) {
            Ok(manifest) => {
                self.installed =
                    InstalledSet::from_references(&self.catalog, manifest.reference_names());
                self.selection = self.installed.as_selection(self.catalog.len());
                tracing::info!(
                    "opened {} with {} catalog plugins referenced",
                    path.display(),
                    self.installed.len()
                );
                if self.installed.is_empty() {
                    self.push_notification(format!("opened {} (no listed plugins)", path.display()));
                } else {
                    self.push_notification(format!("opened {}", path.display()));
                }
                self.project = Some(path);
            }
            Err(err) => {
                tracing::error!("cannot open {}: {err}", path.display());
                self.push_notification(format!("cannot open project: {err}"));
            }
        }
    }

    fn start_run(&mut self) {
        if !self.can_apply() {
            return;
        }
        let Some(path) = self.project.clone() else {
            return;
        };

        match InstallRun::start(
            self.catalog.clone(),
            self.selection.clone(),
            self.installed.clone(),
            path,
            self.config.clone(),
        ) {
            Ok(run) => {
                self.run = Some(run);
                self.mode = Mode::Installing;
            }
            Err(err) => {
                tracing::error!("install run not started: {err}");
                self.push_notification(format!("cannot install: {err}"));
            }
        }
    }

    fn cancel_run(&mut self) {
        if let Some(run) = &self.run {
            run.cancel_token().cancel();
            tracing::info!("install run cancelled by user");
            self.push_notification("cancelling after the current step".to_string());
        }
    }

    /// One unit of install work per tick keeps the screen responsive between steps.
    fn handle_tick(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if !run.step(&self.tools) {
            return;
        }

        if let Some(run) = self.run.take() {
            self.finish_run(run.finish());
        }
    }

    fn finish_run(&mut self, report: RunReport) {
        tracing::info!(
            "install run finished: succeeded={}, {} items",
            report.succeeded(),
            report.items.len()
        );
        self.selection = report.selection.clone();
        self.installed = report.installed.clone();
        self.mode = Mode::Browse;

        let warnings = report.warnings();
        if warnings.is_empty() {
            self.push_notification(format!(
                "plugins updated: {} installed",
                self.installed.len()
            ));
        }
        for warning in warnings {
            self.push_notification(warning);
        }
    }

    // ── MVU: View ────────────────────────────────────────────────

    pub fn view(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // header
                Constraint::Min(1),    // body
                Constraint::Length(1), // status bar
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(1), Constraint::Percentage(35)])
            .split(chunks[1]);

        self.render_catalog(frame, body[0]);
        self.render_side_panel(frame, body[1]);
        self.render_status_bar(frame, chunks[2]);

        if self.mode == Mode::OpenProject {
            self.render_path_prompt(frame);
        } else if let Some(run) = &self.run {
            render_progress(frame, run);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let project = self
            .project
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "no project open (press o)".to_string());

        let line = Line::from(vec![
            Span::styled(
                " plugman ",
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!(" {project} "), Style::default().fg(Color::Gray)),
        ]);
        frame.render_widget(
            Paragraph::new(line).style(Style::default().bg(Color::Rgb(20, 20, 30))),
            area,
        );
    }

    fn render_catalog(&self, frame: &mut Frame, area: Rect) {
        if self.catalog.is_empty() {
            let hint = Paragraph::new("no plugins loaded (press r to reload the list)")
                .style(Style::default().fg(Color::DarkGray));
            frame.render_widget(hint, area);
            return;
        }

        let height = area.height.max(1) as usize;
        let top = self.highlighted.saturating_sub(height - 1);

        let lines: Vec<Line> = self
            .catalog
            .iter()
            .skip(top)
            .take(height)
            .map(|(id, entry)| {
                let mark = if self.selection.is_checked(id) { "[x]" } else { "[ ]" };
                let state = match (self.installed.contains(id), self.selection.is_checked(id)) {
                    (true, true) => "",
                    (true, false) => "  (remove)",
                    (false, true) => "  (install)",
                    (false, false) => "",
                };
                let content = format!("{mark} {}{state}", entry.name);

                if id.0 == self.highlighted {
                    Line::from(Span::styled(
                        content,
                        Style::default().fg(Color::Black).bg(Color::Cyan),
                    ))
                } else if self.installed.contains(id) {
                    Line::from(Span::styled(content, Style::default().fg(Color::Green)))
                } else {
                    Line::from(Span::styled(content, Style::default().fg(Color::Gray)))
                }
            })
            .collect();

        frame.render_widget(
            Paragraph::new(lines).style(Style::default().bg(Color::Rgb(12, 12, 18))),
            area,
        );
    }

    fn render_side_panel(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        let details = self
            .catalog
            .get(PluginId(self.highlighted))
            .map(|entry| {
                let mut lines = vec![
                    Line::from(Span::styled(
                        entry.name.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(Span::styled(
                        entry.url.clone(),
                        Style::default().fg(Color::DarkGray),
                    )),
                ];
                if let Some(module) = entry.module_name() {
                    lines.push(Line::from(format!("module: {module}")));
                }
                if let Some(module) = entry.editor_module_name() {
                    lines.push(Line::from(format!("editor module: {module}")));
                }
                lines.push(Line::from(""));
                lines.push(Line::from(entry.description.clone()));
                lines
            })
            .unwrap_or_default();

        frame.render_widget(
            Paragraph::new(details)
                .wrap(Wrap { trim: true })
                .block(Block::default().title(" Plugin ").borders(Borders::LEFT)),
            chunks[0],
        );

        let notes: Vec<Line> = self
            .notifications
            .iter()
            .rev()
            .map(|note| Line::from(Span::styled(note.clone(), Style::default().fg(Color::Yellow))))
            .collect();

        frame.render_widget(
            Paragraph::new(notes)
                .wrap(Wrap { trim: true })
                .block(Block::default().title(" Messages ").borders(Borders::LEFT | Borders::TOP)),
            chunks[1],
        );
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let mode_style = match self.mode {
            Mode::Browse => Style::default()
                .fg(Color::Black)
                .bg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
            Mode::Installing => Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            _ => Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        };

        let mode_span = Span::styled(format!(" {} ", self.mode.label()), mode_style);

        let hints = match self.mode {
            Mode::Browse if self.can_apply() => "space toggle | a apply | o open | r reload | q quit",
            Mode::Browse => "space toggle | o open | r reload | q quit",
            Mode::OpenProject => "enter open | esc back",
            Mode::Installing => "esc cancel",
        };

        let info = Span::styled(
            format!(
                " {}/{} checked | {hints} ",
                self.selection.checked_count(),
                self.selection.len()
            ),
            Style::default().fg(Color::Gray).bg(Color::DarkGray),
        );

        let bar = Line::from(vec![mode_span, info]);
        let status = Paragraph::new(bar).style(Style::default().bg(Color::DarkGray));
        frame.render_widget(status, area);
    }

    fn render_path_prompt(&self, frame: &mut Frame) {
        let area = centered_rect(70, 20, frame.area());
        frame.render_widget(Clear, area);

        let prompt = Paragraph::new(self.path_input.as_str()).block(
            Block::default()
                .title(" Project file (.flaxproj) ")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Rgb(15, 15, 24))),
        );
        frame.render_widget(prompt, area);

        let cursor_x = area.x + 1 + self.path_input.chars().count() as u16;
        let cursor_y = area.y + 1;
        frame.set_cursor_position((cursor_x, cursor_y));
    }
}

fn render_progress(frame: &mut Frame, run: &InstallRun) {
    let area = centered_rect(60, 20, frame.area());
    frame.render_widget(Clear, area);

    let ratio = (run.progress() / 100.0).clamp(0.0, 1.0);
    let gauge = Gauge::default()
        .block(
            Block::default()
                .title(" Installing ")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Rgb(15, 15, 24))),
        )
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(run.describe());
    frame.render_widget(gauge, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
