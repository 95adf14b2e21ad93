//! Shell script handling: splitting scripts into command lines and the sinks
//! that command output is written to.

mod output;
mod split;

pub use output::{BufferedShellOutput, MemoryShellOutput, NullShellOutput, ShellOutput};
pub use split::{split_into_command_lines, CommandLines};
