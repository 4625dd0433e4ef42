use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal;
use std::io::{self, IsTerminal};
use wslcompact_workflow_engine::Console;

/// The process console. Interactive only when both stdin and stdout are a terminal.
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal() && io::stdout().is_terminal()
    }

    fn wait_for_keypress(&self) -> Result<()> {
        terminal::enable_raw_mode().context("enable raw terminal mode")?;
        let pressed = loop {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break Ok(()),
                Ok(_) => continue,
                Err(err) => break Err(err),
            }
        };
        terminal::disable_raw_mode().context("restore terminal mode")?;
        println!();
        pressed.context("read key event")
    }
}
