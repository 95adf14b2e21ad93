//! Sinks for command output.

use async_trait::async_trait;

/// Receives output of a running command as it arrives.
///
/// Writes may be called many times per command with arbitrary chunks of
/// text; implementations must not assume chunks end on line boundaries.
#[async_trait]
pub trait ShellOutput: Send {
    async fn write_standard_output(&mut self, s: &str);

    async fn write_standard_error(&mut self, s: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullShellOutput;

#[async_trait]
impl ShellOutput for NullShellOutput {
    async fn write_standard_output(&mut self, _s: &str) {}

    async fn write_standard_error(&mut self, _s: &str) {}
}

/// Keeps stdout and stderr in separate strings.
#[derive(Debug, Default)]
pub struct MemoryShellOutput {
    standard_output: String,
    standard_error: String,
}

impl MemoryShellOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard_output(&self) -> &str {
        &self.standard_output
    }

    pub fn standard_error(&self) -> &str {
        &self.standard_error
    }
}

#[async_trait]
impl ShellOutput for MemoryShellOutput {
    async fn write_standard_output(&mut self, s: &str) {
        self.standard_output.push_str(s);
    }

    async fn write_standard_error(&mut self, s: &str) {
        self.standard_error.push_str(s);
    }
}

/// Renders stdout and stderr into one text the way a terminal would show it.
///
/// A carriage return moves back to the start of the current line and
/// following characters overwrite it, so progress bars collapse to their last
/// state. A newline commits the current line.
#[derive(Debug, Default, Clone)]
pub struct BufferedShellOutput {
    committed: String,
    line: Vec<char>,
    column: usize,
}

impl BufferedShellOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output.
    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            match c {
                '\r' => self.column = 0,
                '\n' => {
                    self.committed.extend(self.line.drain(..));
                    self.committed.push('\n');
                    self.column = 0;
                }
                _ => {
                    if self.column == self.line.len() {
                        self.line.push(c);
                    } else {
                        self.line[self.column] = c;
                    }
                    self.column += 1;
                }
            }
        }
    }

    /// The rendered text so far.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.committed.len() + self.line.len());
        text.push_str(&self.committed);
        text.extend(self.line.iter());
        text
    }
}

#[async_trait]
impl ShellOutput for BufferedShellOutput {
    async fn write_standard_output(&mut self, s: &str) {
        self.write(s);
    }

    async fn write_standard_error(&mut self, s: &str) {
        self.write(s);
    }
}
