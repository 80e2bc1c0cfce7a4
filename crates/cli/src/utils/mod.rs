use anyhow::Context;

/// Decode hex input, with or without a `0x` prefix.
pub fn decode_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).with_context(|| format!("invalid hex: {input}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("0x0aFF").unwrap(), vec![0x0A, 0xFF]);
        assert_eq!(decode_hex(" 01 ").unwrap(), vec![0x01]);
        assert!(decode_hex("0xZZ").is_err());
    }
}
