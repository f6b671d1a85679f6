//! Available commands and autocomplete logic

use thiserror::Error;

use crate::session::Role;

const EVERYONE: &[Role] = &[Role::Admin, Role::Landlord, Role::PropertyManager, Role::Tenant];
const STAFF: &[Role] = &[Role::Admin, Role::Landlord, Role::PropertyManager];
const OWNERS: &[Role] = &[Role::Admin, Role::Landlord];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  /// Argument placeholder shown in help, if the command takes one
  pub argument: Option<&'static str>,
  /// Roles allowed to run the command
  pub roles: &'static [Role],
}

impl Command {
  /// Whether `role` may run this command. Commands open to every role are
  /// also available while the role is unknown.
  pub fn permits(&self, role: Option<Role>) -> bool {
    match role {
      Some(role) => self.roles.contains(&role),
      None => self.roles == EVERYONE,
    }
  }

  fn matches(&self, word: &str) -> bool {
    self.name == word || self.aliases.contains(&word)
  }
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "properties",
    aliases: &["p", "props", "property"],
    description: "List properties",
    argument: None,
    roles: STAFF,
  },
  Command {
    name: "units",
    aliases: &["u", "unit"],
    description: "List units, optionally of one property",
    argument: Some("[property-id]"),
    roles: STAFF,
  },
  Command {
    name: "leases",
    aliases: &["l", "lease"],
    description: "Browse leases",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "payments",
    aliases: &["pay", "rent"],
    description: "Browse rent payments, optionally of one lease",
    argument: Some("[lease-id]"),
    roles: EVERYONE,
  },
  Command {
    name: "maintenance",
    aliases: &["m", "maint", "repairs"],
    description: "Maintenance requests",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "more",
    aliases: &["n", "next"],
    description: "Load the next page",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    description: "Reload the current view",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "resolve",
    aliases: &["res", "done"],
    description: "Mark a maintenance request resolved",
    argument: Some("<request-id>"),
    roles: STAFF,
  },
  Command {
    name: "report",
    aliases: &["new", "issue"],
    description: "Report a maintenance problem",
    argument: Some("<unit-id> <title>"),
    roles: EVERYONE,
  },
  Command {
    name: "delete",
    aliases: &["del", "rm"],
    description: "Delete a maintenance request",
    argument: Some("<request-id>"),
    roles: OWNERS,
  },
  Command {
    name: "stay",
    aliases: &["s"],
    description: "Stay logged in",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "logout",
    aliases: &["bye", "signout"],
    description: "Log out now",
    argument: None,
    roles: EVERYONE,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit rentdesk",
    argument: None,
    roles: EVERYONE,
  },
];

/// A command line split into a known command and its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'a> {
  pub command: &'static Command,
  pub argument: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("type a command")]
  Empty,
  #[error("unknown command: {0}")]
  Unknown(String),
  #[error("{0} is not available to your role")]
  Forbidden(&'static str),
  #[error("{0} needs an argument")]
  MissingArgument(&'static str),
}

/// Parse one command line for `role`.
///
/// The first word must be a command name or alias; anything after it is the
/// argument.
pub fn parse(line: &str, role: Option<Role>) -> Result<Invocation<'_>, ParseError> {
  let line = line.trim();
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, Some(rest.trim()).filter(|r| !r.is_empty())),
    None => (line, None),
  };
  if word.is_empty() {
    return Err(ParseError::Empty);
  }

  let word_lower = word.to_lowercase();
  let command = COMMANDS
    .iter()
    .find(|cmd| cmd.matches(&word_lower))
    .ok_or_else(|| ParseError::Unknown(word.to_string()))?;

  if !command.permits(role) {
    return Err(ParseError::Forbidden(command.name));
  }
  if rest.is_none() && command.argument.is_some_and(|a| a.starts_with('<')) {
    return Err(ParseError::MissingArgument(command.name));
  }

  Ok(Invocation {
    command,
    argument: rest,
  })
}

/// Get autocomplete suggestions for a given input, limited to what `role` may run
pub fn get_suggestions(input: &str, role: Option<Role>) -> Vec<&'static Command> {
  let input_lower = input.trim().to_lowercase();
  let available = COMMANDS.iter().filter(|cmd| cmd.permits(role));

  if input_lower.is_empty() {
    return available.collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in available {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  const LANDLORD: Option<Role> = Some(Role::Landlord);

  #[test]
  fn test_empty_input_returns_all_permitted() {
    let suggestions = get_suggestions("", Some(Role::Admin));
    assert_eq!(suggestions.len(), COMMANDS.len());

    let tenant = get_suggestions("", Some(Role::Tenant));
    assert!(tenant.len() < COMMANDS.len());
    assert!(tenant.iter().all(|c| c.permits(Some(Role::Tenant))));
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("leases", LANDLORD);
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "leases");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("m", LANDLORD);
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "maintenance");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("pay", LANDLORD);
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "payments");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("ena", LANDLORD);
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "maintenance");
  }

  #[test]
  fn test_tenant_does_not_see_staff_commands() {
    let suggestions = get_suggestions("prop", Some(Role::Tenant));
    assert!(suggestions.iter().all(|c| c.name != "properties"));
  }

  #[test]
  fn test_unknown_role_sees_only_open_commands() {
    let suggestions = get_suggestions("", None);
    assert!(suggestions.iter().any(|c| c.name == "quit"));
    assert!(suggestions.iter().all(|c| c.name != "resolve"));
  }

  #[test]
  fn test_parse_with_argument() {
    let invocation = parse("  resolve  m-42 ", LANDLORD).unwrap();
    assert_eq!(invocation.command.name, "resolve");
    assert_eq!(invocation.argument, Some("m-42"));

    let invocation = parse("U p-1", LANDLORD).unwrap();
    assert_eq!(invocation.command.name, "units");
    assert_eq!(invocation.argument, Some("p-1"));
  }

  #[test]
  fn test_parse_errors() {
    assert_eq!(parse("   ", LANDLORD), Err(ParseError::Empty));
    assert_eq!(
      parse("evict", LANDLORD),
      Err(ParseError::Unknown("evict".to_string()))
    );
    assert_eq!(
      parse("delete m-1", Some(Role::PropertyManager)),
      Err(ParseError::Forbidden("delete"))
    );
    assert_eq!(parse("resolve", LANDLORD), Err(ParseError::MissingArgument("resolve")));
  }

  #[test]
  fn test_parse_error_messages() {
    assert_eq!(ParseError::Empty.to_string(), "type a command");
    assert_eq!(
      ParseError::Unknown("evict".into()).to_string(),
      "unknown command: evict"
    );
    assert_eq!(
      ParseError::Forbidden("delete").to_string(),
      "delete is not available to your role"
    );
    assert_eq!(
      ParseError::MissingArgument("resolve").to_string(),
      "resolve needs an argument"
    );
  }

  #[test]
  fn test_optional_argument_may_be_omitted() {
    let invocation = parse("units", LANDLORD).unwrap();
    assert_eq!(invocation.argument, None);
  }
}
