//! Watch console commands and autocomplete logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All console commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "status",
    aliases: &["s", "st"],
    usage: "status",
    description: "Show the last known bot status",
  },
  Command {
    name: "start",
    aliases: &["run", "go"],
    usage: "start",
    description: "Start monitoring",
  },
  Command {
    name: "stop",
    aliases: &["halt", "stop-all"],
    usage: "stop",
    description: "Stop all monitoring and trading",
  },
  Command {
    name: "add",
    aliases: &["a", "add-coin"],
    usage: "add <SYMBOL> <USDT>",
    description: "Add a coin with an order size",
  },
  Command {
    name: "remove",
    aliases: &["rm", "remove-coin"],
    usage: "remove <SYMBOL>",
    description: "Remove a coin",
  },
  Command {
    name: "refresh",
    aliases: &["r", "poll"],
    usage: "refresh",
    description: "Poll the status right now",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Sign out and exit",
  },
];

/// A console line resolved to a command with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  Status,
  Start,
  Stop,
  AddCoin { symbol: String, order_size_usdt: f64 },
  RemoveCoin { symbol: String },
  Refresh,
  Help,
  Quit,
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = COMMANDS
    .iter()
    .filter_map(|cmd| match_priority(cmd, &input_lower).map(|p| (cmd, p)))
    .collect();

  matches.sort_by_key(|(_, priority)| *priority);
  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Lower is better. Exact beats prefix beats substring, names beat aliases.
fn match_priority(cmd: &Command, input: &str) -> Option<u32> {
  if cmd.name == input {
    Some(0)
  } else if cmd.aliases.contains(&input) {
    Some(1)
  } else if cmd.name.starts_with(input) {
    Some(2)
  } else if cmd.aliases.iter().any(|a| a.starts_with(input)) {
    Some(3)
  } else if cmd.name.contains(input) {
    Some(4)
  } else if cmd.aliases.iter().any(|a| a.contains(input)) {
    Some(5)
  } else {
    None
  }
}

/// Resolve a console line. The first word may be any unambiguous prefix,
/// alias or fragment of a command name.
pub fn parse(line: &str) -> Result<Action, String> {
  let mut words = line.split_whitespace();
  let Some(head) = words.next() else {
    return Err("empty command".to_string());
  };
  let args: Vec<&str> = words.collect();

  let Some(cmd) = get_suggestions(head).into_iter().next() else {
    return Err(format!("unknown command: {} (try `help`)", head));
  };

  let usage = || format!("usage: {}", cmd.usage);
  match (cmd.name, args.as_slice()) {
    ("status", []) => Ok(Action::Status),
    ("start", []) => Ok(Action::Start),
    ("stop", []) => Ok(Action::Stop),
    ("add", [symbol, size]) => {
      let order_size_usdt = size
        .parse()
        .map_err(|_| format!("invalid order size: {}", size))?;
      Ok(Action::AddCoin {
        symbol: symbol.to_string(),
        order_size_usdt,
      })
    }
    ("remove", [symbol]) => Ok(Action::RemoveCoin {
      symbol: symbol.to_string(),
    }),
    ("refresh", []) => Ok(Action::Refresh),
    ("help", _) => Ok(Action::Help),
    ("quit", _) => Ok(Action::Quit),
    _ => Err(usage()),
  }
}

pub fn help_text() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("  {:<22} {}", cmd.usage, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}
