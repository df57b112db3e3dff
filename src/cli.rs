/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CLI utilities for terminal output formatting and colors.

use crossterm::tty::IsTty;
use std::io::stdout;

/// Configuration for color output
#[derive(Debug, Clone, Copy)]
pub struct ColorConfig {
    /// Whether escape codes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (healthy)
    #[must_use]
    pub fn green(self, s: &str) -> String {
        self.paint("32", s)
    }

    /// Red (errors)
    #[must_use]
    pub fn red(self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Yellow (warnings)
    #[must_use]
    pub fn yellow(self, s: &str) -> String {
        self.paint("33", s)
    }

    /// Cyan (content type names)
    #[must_use]
    pub fn cyan(self, s: &str) -> String {
        self.paint("36", s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(self, s: &str) -> String {
        self.paint("2", s)
    }

    /// Bold text
    #[must_use]
    pub fn bold(self, s: &str) -> String {
        self.paint("1", s)
    }
}
