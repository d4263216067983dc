//! Clap help/usage-error styling for the single top-level `keppel` command and its
//! `api`/`janitor`/`health-monitor`/`test-driver storage` subcommands.

use clap::builder::styling::{AnsiColor, Effects, Styles};

/// The color scheme clap renders `--help` output and usage errors with.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_and_valid_styles_are_distinct() {
        let s = styles();
        assert_ne!(format!("{:?}", s.get_error()), format!("{:?}", s.get_valid()));
        assert_ne!(format!("{:?}", s.get_header()), format!("{:?}", s.get_placeholder()));
    }
}
