//! Splits a multi-line script into the command lines that are executed one
//! by one on the build machine.

/// Split `script` into logical command lines.
///
/// - `\n` and `\r\n` end a line, except inside a `'...'` or `"..."` span.
/// - A backslash directly before a line break joins the next physical line.
///   This is recognised inside quotes as well.
/// - Quote characters are kept. A quote of the other kind inside a span is
///   plain text.
/// - Blank lines are skipped.
/// - At end of input the collected text is yielded even inside an open
///   quote; a trailing continuation backslash is dropped.
///
/// `None` is treated like an empty script.
pub fn split_into_command_lines(script: Option<&str>) -> CommandLines<'_> {
    CommandLines {
        script: script.unwrap_or_default(),
        pos: 0,
        quote: None,
        current: String::new(),
        finished: false,
    }
}

/// Lazy iterator returned by [`split_into_command_lines`].
#[derive(Debug, Clone)]
pub struct CommandLines<'a> {
    script: &'a str,
    pos: usize,
    quote: Option<char>,
    current: String,
    finished: bool,
}

impl CommandLines<'_> {
    fn take_line(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.current);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

impl Iterator for CommandLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.finished {
            let rest = &self.script[self.pos..];

            let Some(c) = rest.chars().next() else {
                // An unterminated quote still yields what was collected.
                self.finished = true;
                return self.take_line();
            };

            if self.quote.is_none() && rest.starts_with("\r\n") {
                self.pos += 2;
                if let Some(line) = self.take_line() {
                    return Some(line);
                }
            } else if self.quote.is_none() && c == '\n' {
                self.pos += 1;
                if let Some(line) = self.take_line() {
                    return Some(line);
                }
            } else if rest.starts_with("\\\r\n") {
                self.pos += 3;
            } else if rest.starts_with("\\\n") {
                self.pos += 2;
            } else if rest == "\\" {
                // Continuation into end of input joins nothing.
                self.pos += 1;
            } else {
                if c == '"' || c == '\'' {
                    self.quote = match self.quote {
                        None => Some(c),
                        Some(q) if q == c => None,
                        other => other,
                    };
                }
                self.current.push(c);
                self.pos += c.len_utf8();
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(script: &str) -> Vec<String> {
        split_into_command_lines(Some(script)).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(split("").is_empty());
        assert_eq!(split_into_command_lines(None).count(), 0);
    }

    #[test]
    fn test_simple_lines() {
        assert_eq!(split("abc\ndef"), vec!["abc", "def"]);
        assert_eq!(split("abc\r\ndef\r\n"), vec!["abc", "def"]);
    }

    #[test]
    fn test_blank_lines_are_dropped() {
        assert_eq!(split("\n\nabc\n   \n\t\ndef\n\n"), vec!["abc", "def"]);
    }

    #[test]
    fn test_line_continuation() {
        assert_eq!(split("abc\\\ndef"), vec!["abcdef"]);
        assert_eq!(split("abc \\\r\n  def\nghi"), vec!["abc   def", "ghi"]);
    }

    #[test]
    fn test_quoted_newline_stays_in_line() {
        assert_eq!(split("\"abc\ndef\""), vec!["\"abc\ndef\""]);
        assert_eq!(split("echo 'a\r\nb'\nls"), vec!["echo 'a\r\nb'", "ls"]);
    }

    #[test]
    fn test_mixed_quotes_do_not_nest() {
        assert_eq!(
            split("echo \"it's\nfine\"\nls"),
            vec!["echo \"it's\nfine\"", "ls"]
        );
        assert_eq!(split("echo '\"'\nls"), vec!["echo '\"'", "ls"]);
    }

    #[test]
    fn test_continuation_inside_quotes() {
        assert_eq!(split("echo \"a\\\nb\""), vec!["echo \"ab\""]);
    }

    #[test]
    fn test_unterminated_quote_yields_rest() {
        assert_eq!(split("echo \"abc\nls"), vec!["echo \"abc\nls"]);
    }

    #[test]
    fn test_trailing_backslash_is_dropped() {
        assert_eq!(split("abc\\"), vec!["abc"]);
        assert_eq!(split("ls\nabc \\"), vec!["ls", "abc "]);
        assert!(split("\\").is_empty());
        assert_eq!(split("echo \"a\\"), vec!["echo \"a"]);
    }

    #[test]
    fn test_splitting_is_stateless() {
        let script = "make\n\"a\nb\"\nc\\\nd\n";
        assert_eq!(split(script), split(script));
    }

    #[test]
    fn test_unicode_is_preserved() {
        assert_eq!(split("echo größe\necho ✓"), vec!["echo größe", "echo ✓"]);
    }
}
