//! Ratatui-based results viewer.
//!
//! Shows the spins (or clusters) of a results file, the fitted curve of the
//! chosen one, and its parameters. `↑`/`↓` move between spins, `←`/`→` between
//! the curves of a spin, `m` cycles the fitted models, `q` quits.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};

use crate::domain::{CurveSeries, ModelFitRecord, ResultsFile};
use crate::error::AppError;

mod plotters_chart;

use plotters_chart::CurveChart;

/// Start the viewer on a loaded results file.
pub fn run(results: ResultsFile) -> Result<(), AppError> {
    if results.fits.is_empty() {
        return Err(AppError::new(3, "The results file holds no fits."));
    }
    let _guard = TerminalGuard::new()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)
        .map_err(|e| AppError::new(4, format!("Failed to initialize terminal: {e}")))?;

    let mut app = App::new(results);
    app.event_loop(&mut terminal)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::new(4, format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::new(4, format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

struct App {
    results: ResultsFile,
    units: Vec<String>,
    selected_unit: usize,
    /// Index into the unit's fits.
    model: usize,
    /// Index into the fit's curves.
    series: usize,
    status: String,
}

impl App {
    fn new(results: ResultsFile) -> Self {
        let units: Vec<String> = results.units().into_iter().map(str::to_string).collect();
        let mut app = Self {
            results,
            units,
            selected_unit: 0,
            model: 0,
            series: 0,
            status: String::new(),
        };
        app.reset_model();
        app
    }

    fn fits(&self) -> Vec<&ModelFitRecord> {
        self.units
            .get(self.selected_unit)
            .map(|u| self.results.fits_for(u))
            .unwrap_or_default()
    }

    fn current_fit(&self) -> Option<&ModelFitRecord> {
        self.fits().get(self.model).copied()
    }

    fn current_series(&self) -> Option<&CurveSeries> {
        self.current_fit().and_then(|f| f.curves.get(self.series))
    }

    /// Start a unit on its selected model.
    fn reset_model(&mut self) {
        self.model = self.fits().iter().position(|f| f.selected).unwrap_or(0);
        self.series = 0;
        self.status = match self.current_fit() {
            Some(fit) => format!("{}: {}", fit.unit, fit.model),
            None => "No fits.".to_string(),
        };
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::new(4, format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))
                .map_err(|e| AppError::new(4, format!("Event poll error: {e}")))?
            {
                continue;
            }

            match event::read().map_err(|e| AppError::new(4, format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code) {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns true when the viewer should exit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up => {
                if self.selected_unit > 0 {
                    self.selected_unit -= 1;
                    self.reset_model();
                }
            }
            KeyCode::Down => {
                if self.selected_unit + 1 < self.units.len() {
                    self.selected_unit += 1;
                    self.reset_model();
                }
            }
            KeyCode::Left => {
                self.series = self.series.saturating_sub(1);
            }
            KeyCode::Right => {
                let n = self.current_fit().map_or(0, |f| f.curves.len());
                if self.series + 1 < n {
                    self.series += 1;
                }
            }
            KeyCode::Char('m') => {
                let n = self.fits().len();
                if n > 0 {
                    self.model = (self.model + 1) % n;
                    self.series = 0;
                }
                let status = self.current_fit().map(|fit| {
                    let marker = if fit.selected { " (selected)" } else { "" };
                    format!("model: {}{marker}", fit.model)
                });
                if let Some(status) = status {
                    self.status = status;
                }
            }
            _ => {}
        }
        false
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut lines: Vec<Line> = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("relax", Style::default().fg(Color::Cyan)),
            Span::raw(format!(
                " {:?} results, {} units, created {}",
                self.results.analysis,
                self.units.len(),
                self.results.created.format("%Y-%m-%d %H:%M")
            )),
        ]));
        if let Some(fit) = self.current_fit() {
            let criterion = match (self.results.selection_method, fit.criterion) {
                (Some(method), Some(c)) => format!(" | {}={c:.3}", method.display_name()),
                _ => String::new(),
            };
            lines.push(Line::from(Span::styled(
                format!(
                    "{} | {} | chi2={:.4} | k={} n={}{criterion}",
                    fit.unit, fit.model, fit.stats.chi2, fit.stats.k, fit.stats.n
                ),
                Style::default().fg(Color::Gray),
            )));
        }

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(22), Constraint::Min(0), Constraint::Length(36)])
            .split(area);

        self.draw_units(frame, columns[0]);
        self.draw_chart(frame, columns[1]);
        self.draw_params(frame, columns[2]);
    }

    fn draw_units(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let items: Vec<ListItem> = self.units.iter().map(|u| ListItem::new(u.as_str())).collect();
        let list = List::new(items)
            .block(Block::default().title("Spins").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("» ");

        let mut state = ListState::default();
        state.select(Some(self.selected_unit));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let title = match self.current_series() {
            Some(s) => format!("{} {}", s.spin_id, s.label),
            None => "Curve".to_string(),
        };
        let block = Block::default().title(title).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let Some(series) = self.current_series() else {
            let msg = Paragraph::new("No curve for this fit.").style(Style::default().fg(Color::Yellow));
            frame.render_widget(msg, inner);
            return;
        };

        let data = chart_series(series);
        let widget = CurveChart {
            curve: &data.curve,
            points: &data.points,
            error_bars: &data.error_bars,
            x_bounds: data.x_bounds,
            y_bounds: data.y_bounds,
            x_label: &self.results.x_label,
            y_label: &self.results.y_label,
            fmt_x: fmt_axis,
            fmt_y: fmt_axis,
        };
        frame.render_widget(widget, inner);
    }

    fn draw_params(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let items: Vec<ListItem> = self
            .current_fit()
            .map(param_lines)
            .unwrap_or_default()
            .into_iter()
            .map(ListItem::new)
            .collect();
        let list = List::new(items).block(Block::default().title("Parameters").borders(Borders::ALL));
        frame.render_widget(list, area);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "↑/↓ spin  ←/→ curve  m model  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(
                &self.status,
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Parameter panel rows of a fit.
fn param_lines(fit: &ModelFitRecord) -> Vec<String> {
    fit.params
        .iter()
        .map(|p| {
            let name = match p.field_mhz {
                Some(frq) => format!("{} {frq:.0}", p.name),
                None => p.name.to_string(),
            };
            match p.error {
                Some(e) => format!("{name:<10} {:.4} ± {e:.4}", p.value),
                None => format!("{name:<10} {:.4}", p.value),
            }
        })
        .collect()
}

struct ChartData {
    curve: Vec<(f64, f64)>,
    points: Vec<(f64, f64)>,
    error_bars: Vec<(f64, f64, f64)>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

/// Build chart series and padded bounds for Plotters.
fn chart_series(series: &CurveSeries) -> ChartData {
    let mut curve: Vec<(f64, f64)> = series.x.iter().copied().zip(series.back_calc.iter().copied()).collect();
    curve.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut points = Vec::new();
    let mut error_bars = Vec::new();
    for ((&x, y), e) in series.x.iter().zip(&series.y).zip(&series.errors) {
        let Some(y) = *y else { continue };
        points.push((x, y));
        if let Some(e) = *e {
            error_bars.push((x, y - e, y + e));
        }
    }

    let (mut x0, mut x1) = (f64::INFINITY, f64::NEG_INFINITY);
    for &x in &series.x {
        x0 = x0.min(x);
        x1 = x1.max(x);
    }
    if !x0.is_finite() || !x1.is_finite() || x1 <= x0 {
        x0 = 0.0;
        x1 = 1.0;
    }

    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let ys = curve
        .iter()
        .map(|p| p.1)
        .chain(error_bars.iter().flat_map(|b| [b.1, b.2]))
        .chain(points.iter().map(|p| p.1));
    for y in ys.filter(|y| y.is_finite()) {
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_max <= y_min {
        y_min = 0.0;
        y_max = 1.0;
    }

    let pad = ((y_max - y_min).abs() * 0.05).max(1e-12);
    ChartData {
        curve,
        points,
        error_bars,
        x_bounds: [x0, x1],
        y_bounds: [y_min - pad, y_max + pad],
    }
}

fn fmt_axis(v: f64) -> String {
    if v.abs() >= 1e4 || (v != 0.0 && v.abs() < 1e-2) {
        format!("{v:.1e}")
    } else {
        format!("{v:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisKind, FitStats, ParamName, ParamValue};

    fn record(unit: &str, model: &str, selected: bool) -> ModelFitRecord {
        ModelFitRecord {
            unit: unit.into(),
            spins: vec![unit.into()],
            model: model.into(),
            params: vec![ParamValue {
                name: ParamName::R2,
                spin_id: Some(unit.into()),
                field_mhz: Some(600.0),
                value: 10.0,
                error: Some(0.5),
            }],
            stats: FitStats::default(),
            criterion: None,
            selected,
            curves: vec![CurveSeries {
                spin_id: unit.into(),
                label: "600.0 MHz".into(),
                x: vec![100.0, 50.0],
                y: vec![Some(11.0), None],
                errors: vec![Some(0.5), None],
                back_calc: vec![11.0, 12.0],
            }],
        }
    }

    fn app() -> App {
        App::new(ResultsFile {
            tool: "relax".into(),
            created: chrono::Local::now(),
            analysis: AnalysisKind::Dispersion,
            x_label: "x".into(),
            y_label: "y".into(),
            selection_method: None,
            monte_carlo_sims: 0,
            fits: vec![
                record(":1@N", "No Rex", false),
                record(":1@N", "CR72", true),
                record(":2@N", "No Rex", true),
            ],
        })
    }

    #[test]
    fn keys_move_between_units_and_models() {
        let mut app = app();
        assert_eq!(app.current_fit().unwrap().model, "CR72");

        assert!(!app.handle_key(KeyCode::Char('m')));
        assert_eq!(app.current_fit().unwrap().model, "No Rex");
        app.handle_key(KeyCode::Char('m'));
        assert_eq!(app.current_fit().unwrap().model, "CR72");

        app.handle_key(KeyCode::Down);
        assert_eq!(app.current_fit().unwrap().unit, ":2@N");
        app.handle_key(KeyCode::Down);
        assert_eq!(app.selected_unit, 1);
        app.handle_key(KeyCode::Up);
        assert_eq!(app.current_fit().unwrap().model, "CR72");

        assert!(app.handle_key(KeyCode::Char('q')));
    }

    #[test]
    fn chart_series_skips_missing_points() {
        let app = app();
        let data = chart_series(app.current_series().unwrap());
        assert_eq!(data.curve, vec![(50.0, 12.0), (100.0, 11.0)]);
        assert_eq!(data.points, vec![(100.0, 11.0)]);
        assert_eq!(data.error_bars, vec![(100.0, 10.5, 11.5)]);
        assert_eq!(data.x_bounds, [50.0, 100.0]);
        assert!(data.y_bounds[0] < 10.5 && data.y_bounds[1] > 12.0);
    }

    #[test]
    fn param_panel_shows_errors() {
        assert_eq!(param_lines(&record(":1@N", "CR72", true)), vec!["r2 600     10.0000 ± 0.5000"]);
    }
}
