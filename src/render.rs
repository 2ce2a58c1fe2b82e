//! Terminal leaderboard.
//!
//! [`render`] is a pure function from a tally to a framed table; the
//! [`TerminalRenderer`] sink clears the screen and redraws it after every
//! match.
//!
//! ```text
//!  -----------------
//! | alpha    | 00002 | # WINNING #
//! | be       | 00001 |
//!  -----------------
//! ```

use std::io::{self, Write};

use owo_colors::{OwoColorize, Style};

use crate::router::{MatchNotice, MatchSink};
use crate::tally::Tally;

/// Clear the screen and home the cursor.
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const WINNER_BANNER: &str = " # WINNING #";

/// Color styles for the table.
#[derive(Debug, Clone, Copy)]
struct TableStyles {
    frame: Style,
    leader: Style,
    trailer: Style,
    banner: Style,
}

impl TableStyles {
    fn new(enabled: bool) -> Self {
        if enabled {
            Self {
                frame: Style::new().cyan(),
                leader: Style::new().green(),
                trailer: Style::new().yellow(),
                banner: Style::new().magenta(),
            }
        } else {
            Self {
                frame: Style::new(),
                leader: Style::new(),
                trailer: Style::new(),
                banner: Style::new(),
            }
        }
    }
}

/// Format the leaderboard for `tally`, one row per distinct keyword in
/// declared order.
///
/// The keyword with the strictly highest count is drawn as the leader with a
/// banner; when every count is zero no row is distinguished.
#[must_use]
pub fn render(tally: &Tally, color: bool) -> String {
    let styles = TableStyles::new(color);
    let keywords = tally.keywords();
    let winner = tally.winner();

    let border = "-".repeat(keywords.border_width());
    let border = border.style(styles.frame);
    let sep = "|".style(styles.frame);
    let counter_pad = " ".repeat(keywords.counter_padding());

    let mut out = format!(" {border} \n");
    for (keyword, hits) in tally.snapshot() {
        let pad = " ".repeat(keywords.longest_len() - keyword.chars().count() + 3);
        let leading = winner == Some(keyword.as_str());
        let style = if leading { styles.leader } else { styles.trailer };
        let banner = if leading {
            WINNER_BANNER.style(styles.banner).to_string()
        } else {
            String::new()
        };

        out.push_str(&format!(
            "{sep} {name}{pad} {sep}{counter_pad}{hits}{counter_pad}{sep}{banner}\n",
            name = keyword.style(style),
            hits = format!("{hits:05}").style(style),
        ));
    }
    out.push_str(&format!(" {border} \n"));
    out
}

/// Redraws the leaderboard on a terminal after every match.
#[derive(Debug)]
pub struct TerminalRenderer<W: Write> {
    out: W,
    color: bool,
    frames: u64,
}

impl TerminalRenderer<io::Stderr> {
    /// Render to standard error.
    #[must_use]
    pub fn stderr(color: bool) -> Self {
        Self::new(io::stderr(), color)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            frames: 0,
        }
    }

    /// Clear the terminal and draw `tally`.
    pub fn draw(&mut self, tally: &Tally) -> io::Result<()> {
        let table = render(tally, self.color);
        self.out.write_all(CLEAR_SCREEN.as_bytes())?;
        self.out.write_all(table.as_bytes())?;
        self.out.flush()?;
        self.frames += 1;
        Ok(())
    }

    /// Number of frames drawn.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> MatchSink for TerminalRenderer<W> {
    fn on_match(&mut self, notice: &MatchNotice<'_>) -> io::Result<()> {
        self.draw(notice.tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::KeywordSet;
    use std::sync::Arc;

    fn tally(keywords: &[&str]) -> Tally {
        Tally::new(Arc::new(KeywordSet::new(keywords.iter().copied()).unwrap()))
    }

    #[test]
    fn test_plain_layout() {
        let mut t = tally(&["alpha", "be"]);
        t.increment("alpha").unwrap();
        t.increment("alpha").unwrap();
        t.increment("be").unwrap();

        // longest = 5, cell = 8, border = 17, counter padding = 1
        let expected = concat!(
            " ----------------- \n",
            "| alpha    | 00002 | # WINNING #\n",
            "| be       | 00001 |\n",
            " ----------------- \n",
        );
        assert_eq!(render(&t, false), expected);
    }

    #[test]
    fn test_no_banner_when_all_zero() {
        let t = tally(&["alpha", "beta"]);
        let table = render(&t, false);
        assert!(!table.contains("WINNING"));
        assert_eq!(table.matches("00000").count(), 2);
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let mut t = tally(&["alpha", "beta"]);
        t.increment("beta").unwrap();
        t.increment("alpha").unwrap();

        let table = render(&t, false);
        let banner_line = table.lines().find(|l| l.contains("WINNING")).unwrap();
        assert!(banner_line.contains("alpha"));
    }

    #[test]
    fn test_duplicate_keyword_renders_one_row() {
        let mut t = tally(&["alpha", "beta", "alpha"]);
        t.increment("alpha").unwrap();

        let table = render(&t, false);
        assert_eq!(table.lines().count(), 4);
        assert_eq!(table.matches("alpha").count(), 1);
        assert_eq!(table.matches("WINNING").count(), 1);
    }

    #[test]
    fn test_colored_output_carries_ansi_codes() {
        let mut t = tally(&["alpha"]);
        t.increment("alpha").unwrap();
        let table = render(&t, true);
        assert!(table.contains("\x1b["));
        assert!(table.contains("WINNING"));
    }

    #[test]
    fn test_renderer_clears_then_draws() {
        let mut t = tally(&["rust"]);
        t.increment("rust").unwrap();

        let mut renderer = TerminalRenderer::new(Vec::new(), false);
        renderer.draw(&t).unwrap();
        renderer.draw(&t).unwrap();
        assert_eq!(renderer.frames(), 2);

        let written = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(written.starts_with(CLEAR_SCREEN));
        assert_eq!(written.matches(CLEAR_SCREEN).count(), 2);
        assert!(written.contains("00001"));
    }
}
