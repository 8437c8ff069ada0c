//! Terminal styling utilities
//!
//! One small palette for all CLI output:
//! - green, yellow and red for status
//! - cyan for headers and technical terms

use crossterm::style::Stylize;

/// Extension trait for consistent raop-toggle styling
///
/// Use these methods instead of direct color calls so every command speaks
/// the same visual language.
///
/// # Examples
///
/// ```
/// use raop_toggle::style::RaopStyle;
///
/// println!("{}", "Daemon".header());
/// println!("{}", "enabled".success());
/// println!("{}", "536870913".technical());
/// ```
pub trait RaopStyle: Stylize {
    /// Section headers (cyan bold)
    fn header(self) -> <<Self as Stylize>::Styled as Stylize>::Styled
    where
        Self: Sized,
        <Self as Stylize>::Styled: Stylize,
    {
        self.cyan().bold()
    }

    /// Positive states: "enabled", "Running" (green)
    fn success(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.green()
    }

    /// Problems: "not found", "Not running" (red)
    fn error(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.red()
    }

    /// Partial or attention-worthy states (yellow)
    fn warning(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.yellow()
    }

    /// Module ids, program names, paths (cyan)
    fn technical(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.cyan()
    }
}

impl<T: Stylize> RaopStyle for T {}
