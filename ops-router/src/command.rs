use once_cell::sync::Lazy;
use regex::Regex;

/// A parsed in-game chat command, paired with the speaker who issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Deposit { slot: i64 },
    Sell { slot: i64, price: u32 },
    Buy { listing_id: i64 },
    Withdraw { amount: u32 },
    Balance,
    MarketHelp,
    Market,
    Warp { name: String },
    Register { code: String },
}

struct Patterns {
    speaker: Regex,
    deposit: Regex,
    sell: Regex,
    buy: Regex,
    withdraw: Regex,
    balance: Regex,
    markethelp: Regex,
    market: Regex,
    warp: Regex,
    register: Regex,
}

static PATTERNS: Lazy<Patterns> = Lazy::new(|| Patterns {
    speaker: Regex::new(r"ChatWindow:\s*Character\s+(?P<name>\S+)\s*\(uid").unwrap(),
    deposit: Regex::new(r"!deposit\s+(?P<slot>\d+)").unwrap(),
    sell: Regex::new(r"!sell\s+(?P<slot>\d+)\s+(?P<price>\d+)").unwrap(),
    buy: Regex::new(r"!buy\s+(?P<listing>\d+)").unwrap(),
    withdraw: Regex::new(r"!withdraw\s+(?P<amount>\d+)").unwrap(),
    balance: Regex::new(r"!balance\b").unwrap(),
    markethelp: Regex::new(r"!markethelp\b").unwrap(),
    market: Regex::new(r"!market\b").unwrap(),
    warp: Regex::new(r"!warp\s+(?P<name>\S+)").unwrap(),
    register: Regex::new(r"!register\s+(?P<code>\S+)").unwrap(),
});

/// Extract the speaking character's name from a tailed line, per the
/// `ChatWindow: Character <name> (uid` marker.
pub fn extract_speaker(line: &str) -> Option<String> {
    PATTERNS
        .speaker
        .captures(line)
        .map(|c| c["name"].to_string())
}

/// Try each command regex in turn and return the first match. `!market`
/// and `!markethelp` overlap textually, so `!markethelp` is tried first.
pub fn parse_command(line: &str) -> Option<Command> {
    let p = &*PATTERNS;
    if let Some(c) = p.deposit.captures(line) {
        return Some(Command::Deposit {
            slot: c["slot"].parse().ok()?,
        });
    }
    if let Some(c) = p.sell.captures(line) {
        return Some(Command::Sell {
            slot: c["slot"].parse().ok()?,
            price: c["price"].parse().ok()?,
        });
    }
    if let Some(c) = p.buy.captures(line) {
        return Some(Command::Buy {
            listing_id: c["listing"].parse().ok()?,
        });
    }
    if let Some(c) = p.withdraw.captures(line) {
        return Some(Command::Withdraw {
            amount: c["amount"].parse().ok()?,
        });
    }
    if p.markethelp.is_match(line) {
        return Some(Command::MarketHelp);
    }
    if p.market.is_match(line) {
        return Some(Command::Market);
    }
    if p.balance.is_match(line) {
        return Some(Command::Balance);
    }
    if let Some(c) = p.warp.captures(line) {
        return Some(Command::Warp {
            name: c["name"].to_string(),
        });
    }
    if let Some(c) = p.register.captures(line) {
        return Some(Command::Register {
            code: c["code"].to_string(),
        });
    }
    None
}

/// Both the speaker marker and a recognized command must be present on the
/// same line for a handler to fire.
pub fn parse_line(line: &str) -> Option<(String, Command)> {
    let speaker = extract_speaker(line)?;
    let command = parse_command(line)?;
    Some((speaker, command))
}
