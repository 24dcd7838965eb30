use crate::errors::GameError;
use crate::record::Record;
use crate::types::{Feedback, Guess, LeaderboardMode};
use crate::win::WinOutcome;
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};

pub const FRAME_WIDTH: u16 = 60;
pub const FRAME_HEIGHT: u16 = 24;

#[derive(Debug, Clone, Copy)]
pub struct MainView<'a> {
    pub leaderboard: &'a [Record],
    pub mode: LeaderboardMode,
    pub notice: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct GameView<'a> {
    pub player: &'a str,
    pub elapsed_seconds: u64,
    pub guesses: &'a [Guess],
    pub notice: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct WonView<'a> {
    pub player: &'a str,
    pub attempts: u32,
    pub seconds: u64,
    /// `None` while the record store is still being consulted.
    pub outcome: Option<&'a WinOutcome>,
}

pub fn format_elapsed(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn render_main(view: &MainView<'_>, width: u16, height: u16) -> Result<String, GameError> {
    render_to_string(width, height, |frame| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(4),
                Constraint::Length(3),
            ])
            .split(frame.area());

        frame.render_widget(header("Guess a number from 1 to 100"), chunks[0]);
        render_leaderboard(frame, chunks[1], view.leaderboard, view.mode);

        let footer = view
            .notice
            .unwrap_or("Enter your name to start, :q to quit");
        frame.render_widget(
            Paragraph::new(footer).block(Block::default().borders(Borders::ALL).title("Start")),
            chunks[2],
        );
    })
}

pub fn render_game(view: &GameView<'_>, width: u16, height: u16) -> Result<String, GameError> {
    render_to_string(width, height, |frame| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(4),
                Constraint::Length(3),
            ])
            .split(frame.area());

        let status = Paragraph::new(Line::from(vec![
            Span::styled(
                view.player.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                "  time {}  attempts {}",
                format_elapsed(view.elapsed_seconds),
                view.guesses.len()
            )),
        ]))
        .block(Block::default().borders(Borders::ALL).title("Playing"));
        frame.render_widget(status, chunks[0]);

        let total = view.guesses.len();
        let items = view
            .guesses
            .iter()
            .enumerate()
            .map(|(idx, guess)| {
                ListItem::new(Line::from(vec![
                    Span::raw(format!("#{:<3} {:>3}  ", total - idx, guess.value)),
                    Span::styled(guess.feedback.label(), feedback_style(guess.feedback)),
                ]))
            })
            .collect::<Vec<_>>();
        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title("History")),
            chunks[1],
        );

        let footer = view
            .notice
            .unwrap_or("Enter a number from 1 to 100, :q to give up");
        frame.render_widget(
            Paragraph::new(footer).block(Block::default().borders(Borders::ALL).title("Guess")),
            chunks[2],
        );
    })
}

pub fn render_won(view: &WonView<'_>, mode: LeaderboardMode, width: u16, height: u16) -> Result<String, GameError> {
    render_to_string(width, height, |frame| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),
                Constraint::Min(4),
                Constraint::Length(3),
            ])
            .split(frame.area());

        let mut lines = vec![Line::from(format!(
            "{} got it in {} attempts, {} seconds",
            view.player, view.attempts, view.seconds
        ))];
        lines.push(match view.outcome {
            None => Line::from("Checking the leaderboard..."),
            Some(outcome) => Line::from(won_badges(outcome)),
        });
        frame.render_widget(
            Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Correct!")),
            chunks[0],
        );

        let board = view
            .outcome
            .and_then(|outcome| outcome.leaderboard.as_deref())
            .or_else(|| {
                view.outcome
                    .and_then(|outcome| outcome.previous_best.as_ref())
                    .map(std::slice::from_ref)
            })
            .unwrap_or(&[]);
        render_leaderboard(frame, chunks[1], board, mode);

        frame.render_widget(
            Paragraph::new("Press Enter to continue")
                .block(Block::default().borders(Borders::ALL)),
            chunks[2],
        );
    })
}

pub fn won_badges(outcome: &WinOutcome) -> String {
    let mut parts = Vec::new();
    if outcome.new_best {
        parts.push("NEW RECORD!");
    }
    if outcome.persisted {
        parts.push("saved");
    }
    if parts.is_empty() {
        "no new record".to_string()
    } else {
        parts.join("  ")
    }
}

pub fn leaderboard_lines(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            format!(
                "{}. {} attempts={} seconds={}",
                idx + 1,
                record.name,
                record.attempts,
                record.seconds
            )
        })
        .collect()
}

fn header(subtitle: &str) -> Paragraph<'_> {
    Paragraph::new(Line::from(vec![
        Span::styled(
            "NUMGUESS ",
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(subtitle),
    ]))
    .block(Block::default().borders(Borders::ALL))
}

fn feedback_style(feedback: Feedback) -> Style {
    match feedback {
        Feedback::Higher => Style::default().fg(Color::Red),
        Feedback::Lower => Style::default().fg(Color::Blue),
        Feedback::Correct => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    }
}

fn render_leaderboard(frame: &mut Frame<'_>, area: Rect, records: &[Record], mode: LeaderboardMode) {
    match mode {
        LeaderboardMode::Best => {
            let body = match records.first() {
                Some(best) => vec![
                    Line::from(Span::styled(
                        best.name.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(format!(
                        "attempts {} | time {}s",
                        best.attempts, best.seconds
                    )),
                ],
                None => vec![Line::from("Be the first challenger!")],
            };
            frame.render_widget(
                Paragraph::new(body)
                    .block(Block::default().borders(Borders::ALL).title("Best Record")),
                area,
            );
        }
        LeaderboardMode::Top10 => {
            if records.is_empty() {
                frame.render_widget(
                    Paragraph::new("Be the first challenger!")
                        .block(Block::default().borders(Borders::ALL).title("Top 10")),
                    area,
                );
                return;
            }
            let rows = records
                .iter()
                .take(LeaderboardMode::Top10.limit())
                .enumerate()
                .map(|(idx, record)| {
                    let row = Row::new(vec![
                        format!("{}", idx + 1),
                        record.name.clone(),
                        record.attempts.to_string(),
                        format!("{}s", record.seconds),
                    ]);
                    if idx == 0 {
                        row.style(Style::default().fg(Color::Yellow))
                    } else {
                        row
                    }
                })
                .collect::<Vec<_>>();
            let table = Table::new(
                rows,
                [
                    Constraint::Length(3),
                    Constraint::Min(10),
                    Constraint::Length(8),
                    Constraint::Length(8),
                ],
            )
            .header(Row::new(vec!["#", "name", "tries", "time"]))
            .block(Block::default().borders(Borders::ALL).title("Top 10"));
            frame.render_widget(table, area);
        }
    }
}

fn render_to_string(
    width: u16,
    height: u16,
    draw: impl FnOnce(&mut Frame<'_>),
) -> Result<String, GameError> {
    let backend = TestBackend::new(width, height);
    let mut terminal = Terminal::new(backend).map_err(|e| GameError::Io(e.to_string()))?;
    terminal
        .draw(draw)
        .map_err(|e| GameError::Io(e.to_string()))?;

    let mut out = String::new();
    let buffer = terminal.backend().buffer();
    for y in 0..height {
        for x in 0..width {
            out.push_str(buffer[(x, y)].symbol());
        }
        out.push('\n');
    }
    Ok(out)
}
