use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?)(\d*)(?:\.(\d*))?(?:[eE]([+-]?\d{1,3}))?$").unwrap()
});

const MAX_DIGITS: usize = 38;

/// Exact decimal: `mantissa * 10^-scale`. Never goes through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    negative: bool,
    mantissa: u128,
    scale: u32,
}

impl Decimal {
    /// Parse human-entered decimal text.
    ///
    /// Spaces, NBSP, `_` and `'` are thousands separators. With both `,` and `.`
    /// present commas are separators too; a lone `,` is a decimal point and
    /// several commas without a dot are separators.
    pub fn parse(input: &str) -> Result<Decimal, String> {
        let mut text: String = input
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '_' | '\''))
            .collect();
        let commas = text.matches(',').count();
        if text.contains('.') || commas > 1 {
            text.retain(|c| c != ',');
        } else if commas == 1 {
            text = text.replace(',', ".");
        }

        let caps = DECIMAL_RE
            .captures(&text)
            .ok_or_else(|| "not a number".to_string())?;
        let int_part = caps.get(2).map_or("", |m| m.as_str());
        let frac_part = caps.get(3).map_or("", |m| m.as_str());
        if int_part.is_empty() && frac_part.is_empty() {
            return Err("no digits".to_string());
        }
        let exponent: i32 = caps
            .get(4)
            .map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| "bad exponent".to_string())?;

        let digits = format!("{int_part}{frac_part}");
        let digits = digits.trim_start_matches('0');
        if digits.len() > MAX_DIGITS {
            return Err(format!("more than {MAX_DIGITS} significant digits"));
        }
        let mantissa = if digits.is_empty() {
            0
        } else {
            digits.parse::<u128>().map_err(|e| e.to_string())?
        };

        let mut value = Decimal {
            negative: caps.get(1).is_some_and(|m| m.as_str() == "-") && mantissa != 0,
            mantissa,
            scale: 0,
        };
        let shift = frac_part.len() as i32 - exponent;
        if shift >= 0 {
            value.scale = shift as u32;
        } else {
            value = value.scale_up(shift.unsigned_abs())?;
        }
        Ok(value.trimmed())
    }

    fn scale_up(self, power: u32) -> Result<Decimal, String> {
        let factor = 10u128
            .checked_pow(power)
            .ok_or_else(|| "exponent too large".to_string())?;
        let mantissa = self
            .mantissa
            .checked_mul(factor)
            .ok_or_else(|| "value too large".to_string())?;
        Ok(Decimal { mantissa, ..self })
    }

    /// Divide by `10^power` exactly.
    pub fn shift_down(self, power: u32) -> Decimal {
        Decimal {
            scale: self.scale + power,
            ..self
        }
        .trimmed()
    }

    fn trimmed(mut self) -> Decimal {
        while self.scale > 0 && self.mantissa % 10 == 0 {
            self.mantissa /= 10;
            self.scale -= 1;
        }
        if self.mantissa == 0 {
            self.scale = 0;
            self.negative = false;
        }
        self
    }
}

/// Canonical text: no exponent, no separators, no trailing zeros or point.
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.to_string();
        let scale = self.scale as usize;
        if self.negative {
            f.write_str("-")?;
        }
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{int}.{frac}")
        } else {
            write!(f, "0.{}{digits}", "0".repeat(scale - digits.len()))
        }
    }
}

/// Canonicalize decimal text in one step.
pub fn canonical(input: &str) -> Result<String, String> {
    Decimal::parse(input).map(|d| d.to_string())
}
