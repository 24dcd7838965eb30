use crate::errors::GameError;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, GameError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), GameError>;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), GameError>;
    fn draw(&self, frame: &str) -> Result<(), GameError>;
    /// Prompts and reads one line without its trailing newline; `None` at EOF.
    fn read_line(&self, prompt: &str) -> Result<Option<String>, GameError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, GameError> {
        std::fs::read_to_string(path).map_err(|e| GameError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), GameError> {
        std::fs::create_dir_all(path).map_err(|e| GameError::Io(e.to_string()))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn write_line(&self, line: &str) -> Result<(), GameError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| GameError::Io(e.to_string()))
    }

    fn draw(&self, frame: &str) -> Result<(), GameError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        // clear screen, cursor home
        write!(out, "\x1b[2J\x1b[H{frame}").map_err(|e| GameError::Io(e.to_string()))?;
        out.flush().map_err(|e| GameError::Io(e.to_string()))
    }

    fn read_line(&self, prompt: &str) -> Result<Option<String>, GameError> {
        use std::io::{BufRead, Write};
        let mut out = std::io::stdout();
        write!(out, "{prompt}").map_err(|e| GameError::Io(e.to_string()))?;
        out.flush().map_err(|e| GameError::Io(e.to_string()))?;

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| GameError::Io(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<GameError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let mut map = HashMap::new();
        map.insert(path.into(), contents.into());
        Self {
            files: Arc::new(Mutex::new(map)),
            dirs: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_fail_next(&self, error: GameError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), GameError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, GameError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| GameError::Io(format!("missing file {}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), GameError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }
}

/// Records output and replays scripted input lines; EOF once the script runs out.
#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
    draws: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    input: Arc<Mutex<VecDeque<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn with_input<I, S>(is_tty: bool, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terminal = Self::new(is_tty);
        terminal.push_input(lines);
        terminal
    }

    pub fn push_input<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input
            .lock()
            .expect("input lock")
            .extend(lines.into_iter().map(Into::into));
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        self.draws.lock().expect("draw lock").clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), GameError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }

    fn draw(&self, frame: &str) -> Result<(), GameError> {
        self.draws
            .lock()
            .expect("draw lock")
            .push(frame.to_string());
        Ok(())
    }

    fn read_line(&self, prompt: &str) -> Result<Option<String>, GameError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        Ok(self.input.lock().expect("input lock").pop_front())
    }
}
