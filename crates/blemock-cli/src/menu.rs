//! Identity menu of `ble-broadcast`.

use std::fmt::Write as _;

/// What the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    /// `0` or `exit`.
    Exit,
    /// Zero-based index into the identity list.
    Identity(usize),
    /// A number outside the menu.
    OutOfRange,
    /// Anything that is not a number.
    NotANumber,
}

/// Parses one line of input against a menu of `count` identities.
///
/// Entries are numbered from 1.
#[must_use]
pub fn parse_choice(input: &str, count: usize) -> MenuChoice {
    let input = input.trim();
    if input == "0" || input.eq_ignore_ascii_case("exit") {
        return MenuChoice::Exit;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => MenuChoice::Identity(n - 1),
        Ok(_) => MenuChoice::OutOfRange,
        Err(_) => MenuChoice::NotANumber,
    }
}

/// Renders the numbered menu.
#[must_use]
pub fn render_menu(identities: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(55));
    let _ = writeln!(out, "BLE Device Broadcaster");
    let _ = writeln!(out, "{}", "=".repeat(55));
    let _ = writeln!(out);
    let _ = writeln!(out, "Select a device to broadcast:");
    let _ = writeln!(out);
    for (i, name) in identities.iter().enumerate() {
        let _ = writeln!(out, "  [{}] {name}", i + 1);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  [0] Exit");
    out
}

/// Prompt shown under the menu.
#[must_use]
pub fn prompt(count: usize) -> String {
    format!("Enter your choice (1-{count}, or 0 to exit): ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_choices() {
        assert_eq!(parse_choice("0", 4), MenuChoice::Exit);
        assert_eq!(parse_choice(" EXIT \n", 4), MenuChoice::Exit);
    }

    #[test]
    fn test_identity_choices_are_one_based() {
        assert_eq!(parse_choice("1", 4), MenuChoice::Identity(0));
        assert_eq!(parse_choice("4\n", 4), MenuChoice::Identity(3));
    }

    #[test]
    fn test_invalid_choices() {
        assert_eq!(parse_choice("5", 4), MenuChoice::OutOfRange);
        assert_eq!(parse_choice("1", 0), MenuChoice::OutOfRange);
        assert_eq!(parse_choice("keys", 4), MenuChoice::NotANumber);
        assert_eq!(parse_choice("-1", 4), MenuChoice::NotANumber);
        assert_eq!(parse_choice("", 4), MenuChoice::NotANumber);
    }

    #[test]
    fn test_render_menu_numbers_entries() {
        let menu = render_menu(&["Keys".to_string(), "Xbox".to_string()]);
        assert!(menu.contains("  [1] Keys\n"));
        assert!(menu.contains("  [2] Xbox\n"));
        assert!(menu.contains("  [0] Exit\n"));
        assert_eq!(prompt(2), "Enter your choice (1-2, or 0 to exit): ");
    }
}
