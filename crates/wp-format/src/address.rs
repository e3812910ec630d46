/// Shortens a wallet address to `leading...trailing` characters.
///
/// Addresses that already fit are returned unchanged.
pub fn truncate_address(address: &str, leading: usize, trailing: usize) -> String {
    let count = address.chars().count();
    if count <= leading + trailing {
        return address.to_owned();
    }

    let head: String = address.chars().take(leading).collect();
    let tail: String = address.chars().skip(count - trailing).collect();
    format!("{head}...{tail}")
}

pub fn short_address(address: &str) -> String {
    truncate_address(address, 6, 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_addresses() {
        assert_eq!(
            short_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234...5678"
        );
    }

    #[test]
    fn keeps_short_addresses() {
        assert_eq!(truncate_address("0xabc", 6, 4), "0xabc");
        assert_eq!(truncate_address("", 6, 4), "");
    }
}
