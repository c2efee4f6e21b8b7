use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;

use super::Block;
use crate::mapping::document::Element;
use crate::record::{Field, Record};

static NON_DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D+").unwrap());

const DEFAULT_COUNTRY: &str = "7";
pub const SLOTS: [Field; 2] = [Field::PhoneNumber, Field::PhoneNumber2];

fn digits(raw: &str) -> String {
    NON_DIGIT_RE.replace_all(raw, "").into_owned()
}

/// National number for `country`, or `None` when the digit count is invalid.
pub fn normalize(raw: &str, country: &str) -> Option<String> {
    let mut number = digits(raw);
    if number.len() == 11 && number.starts_with('8') {
        number.remove(0);
    }
    if country == "7" && number.len() == 11 && number.starts_with('7') {
        number.remove(0);
    }
    let valid = match country {
        "7" => number.len() == 10,
        _ => (10..=11).contains(&number.len()),
    };
    valid.then_some(number)
}

/// `Phones/PhoneSchema{CountryCode, Number}` for up to two unique numbers.
pub fn build(record: &Record) -> Block {
    let country = record
        .text(Field::PhoneCountry)
        .map(|c| digits(&c))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());

    let mut consumed = Vec::new();
    let mut numbers = Vec::new();
    for slot in SLOTS {
        let Some(raw) = record.text(slot) else {
            continue;
        };
        if let Some(number) = normalize(&raw, &country) {
            consumed.push(slot);
            numbers.push(number);
        }
    }
    if numbers.is_empty() {
        return Block::default();
    }
    if record.text(Field::PhoneCountry).is_some() {
        consumed.push(Field::PhoneCountry);
    }

    let mut phones = Element::new("Phones");
    for number in numbers.into_iter().unique().take(SLOTS.len()) {
        let mut schema = Element::new("PhoneSchema");
        schema.push(Element::with_text("CountryCode", format!("+{country}")));
        schema.push(Element::with_text("Number", number));
        phones.push(schema);
    }
    Block {
        element: Some(phones),
        consumed,
    }
}
