//! Size and boolean grammars for deployment parameters.
//!
//! `DISK_SIZE`/`RAM_SIZE` accept a decimal count with an optional `K`, `M`
//! or `G` suffix in either case; a bare number is bytes. Boolean-ish
//! options such as `AUTOSTART` accept `yes`/`1`/`true` and `no`/`0`/`false`.

use crate::domain::errors::DeployError;

/// Parse a size string like `4G`, `512M`, `100` into bytes.
pub fn parse_size(value: &str) -> Result<u64, DeployError> {
    let cannot_parse =
        || DeployError::configuration(format!("cannot parse size '{value}'"));

    if value.is_empty() {
        return Err(cannot_parse());
    }

    let (digits, suffix) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, ""),
    };

    let count: u64 = digits.parse().map_err(|_| cannot_parse())?;
    let factor: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        _ => return Err(cannot_parse()),
    };

    count
        .checked_mul(factor)
        .ok_or_else(cannot_parse)
}

/// Parse a boolean-ish deployment option value.
pub fn parse_boolean(value: &str) -> Result<bool, DeployError> {
    match value {
        "yes" | "1" | "true" => Ok(true),
        "no" | "0" | "false" => Ok(false),
        _ => Err(DeployError::configuration(format!(
            "cannot parse boolean option '{value}' (expected yes/1/true or no/0/false)"
        ))),
    }
}
