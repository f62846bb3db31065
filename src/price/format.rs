/// Fixed supply used for market-cap display (1 billion for every launched token)
pub const TOTAL_SUPPLY: f64 = 1_000_000_000.0;

/// Render a price as dollars, with more decimals for smaller prices
pub fn format_price(price: f64) -> String {
    if price >= 1.0 {
        format!("${:.2}", price)
    } else if price >= 0.01 {
        format!("${:.4}", price)
    } else {
        format!("${:.6}", price)
    }
}

/// Market cap (`price * TOTAL_SUPPLY`) with a B/M/K suffix
pub fn format_market_cap(price: f64) -> String {
    let market_cap = price * TOTAL_SUPPLY;

    if market_cap >= 1_000_000_000.0 {
        format!("${:.2}B", market_cap / 1_000_000_000.0)
    } else if market_cap >= 1_000_000.0 {
        format!("${:.2}M", market_cap / 1_000_000.0)
    } else if market_cap >= 1_000.0 {
        format!("${:.2}K", market_cap / 1_000.0)
    } else {
        format!("${:.2}", market_cap)
    }
}

/// `abc...xyz` form of an address; short addresses are returned whole
pub fn shorten_address(address: &str, chars: usize) -> String {
    let len = address.chars().count();
    if len <= chars * 2 {
        return address.to_string();
    }

    let head: String = address.chars().take(chars).collect();
    let tail: String = address.chars().skip(len - chars).collect();
    format!("{}...{}", head, tail)
}

pub fn format_percentage(value: f64) -> String {
    format!("{:.1}%", value)
}
