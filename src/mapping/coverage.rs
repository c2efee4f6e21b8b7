use std::collections::BTreeSet;

use crate::record::{Field, Record};

/// Attributes meaningfully populated on `record`, excluding `stop`.
///
/// A bare country code does not count unless a phone number is also filled.
pub fn filled_fields(record: &Record, stop: &BTreeSet<Field>) -> BTreeSet<Field> {
    let has_number = record.is_filled(Field::PhoneNumber) || record.is_filled(Field::PhoneNumber2);
    Field::ALL
        .iter()
        .copied()
        .filter(|f| !stop.contains(f))
        .filter(|f| *f != Field::PhoneCountry || has_number)
        .filter(|f| record.is_filled(*f))
        .collect()
}

/// Filled attributes that export never consumed.
pub fn audit(record: &Record, exported: &BTreeSet<Field>, stop: &BTreeSet<Field>) -> BTreeSet<Field> {
    filled_fields(record, stop)
        .difference(exported)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Photo, Value};

    #[test]
    fn bare_country_code_not_filled() {
        let record = Record::new()
            .with(Field::PhoneCountry, Value::Text("7".into()))
            .unwrap();
        assert!(filled_fields(&record, &BTreeSet::new()).is_empty());

        let record = record
            .with(Field::PhoneNumber2, Value::Text("9991234567".into()))
            .unwrap();
        let filled = filled_fields(&record, &BTreeSet::new());
        assert_eq!(filled, BTreeSet::from([Field::PhoneCountry, Field::PhoneNumber2]));
    }

    #[test]
    fn stop_fields_ignored() {
        let record = Record::new()
            .with(Field::Title, Value::Text("Nice flat".into()))
            .unwrap()
            .with(Field::Address, Value::Text("Moscow".into()))
            .unwrap();
        let stop = BTreeSet::from([Field::Title]);
        assert_eq!(filled_fields(&record, &stop), BTreeSet::from([Field::Address]));
    }

    #[test]
    fn uncovered_is_difference() {
        let record = Record::new()
            .with(Field::Address, Value::Text("Moscow".into()))
            .unwrap()
            .with(Field::HasPool, Value::Bool(true))
            .unwrap()
            .with(Field::HasTv, Value::Bool(false))
            .unwrap()
            .with_photo(Photo {
                url: "https://x/1.jpg".into(),
                ..Default::default()
            });
        let exported = BTreeSet::from([Field::Address]);
        let uncovered = audit(&record, &exported, &BTreeSet::new());
        assert_eq!(uncovered, BTreeSet::from([Field::HasPool, Field::Photos]));
    }
}
