use std::str::FromStr;

use crate::record::{Field, Record};

/// Attributes consulted for the subtype, first non-empty wins.
pub const SUBTYPE_SOURCES: &[Field] = &[
    Field::Subtype,
    Field::HouseType,
    Field::CommercialType,
    Field::LandType,
    Field::FlatType,
    Field::RoomTypeExt,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base {
    Flat,
    Room,
    House,
    Commercial,
    Land,
    Garage,
}

impl FromStr for Base {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Base::Flat),
            "room" => Ok(Base::Room),
            "house" => Ok(Base::House),
            "commercial" => Ok(Base::Commercial),
            "land" => Ok(Base::Land),
            "garage" => Ok(Base::Garage),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deal {
    Sale,
    Rent,
}

impl Deal {
    fn suffix(self) -> &'static str {
        match self {
            Deal::Sale => "Sale",
            Deal::Rent => "Rent",
        }
    }

    /// Anything not starting with `rent` is a sale, including no operation.
    fn lenient(operation: &str) -> Deal {
        if operation.starts_with("rent") {
            Deal::Rent
        } else {
            Deal::Sale
        }
    }

    fn strict(operation: &str) -> Option<Deal> {
        match operation {
            "sale" => Some(Deal::Sale),
            op if op.starts_with("rent") => Some(Deal::Rent),
            _ => None,
        }
    }
}

impl Base {
    fn uses_subtype(self) -> bool {
        matches!(self, Base::House | Base::Commercial)
    }

    fn code(self, operation: &str, subtype: &str) -> Option<String> {
        let (stem, deal) = match self {
            Base::Flat => ("flat", Deal::lenient(operation)),
            Base::Room => ("room", Deal::lenient(operation)),
            Base::House => (house_stem(subtype), Deal::lenient(operation)),
            Base::Commercial => (commercial_stem(subtype), Deal::lenient(operation)),
            Base::Land => ("land", Deal::strict(operation)?),
            Base::Garage => ("garage", Deal::strict(operation)?),
        };
        Some(format!("{stem}{}", deal.suffix()))
    }
}

fn house_stem(subtype: &str) -> &'static str {
    match subtype {
        "cottage" => "cottage",
        "townhouse" => "townhouse",
        "houseshare" | "house_share" | "share" => "houseShare",
        _ => "house",
    }
}

fn commercial_stem(subtype: &str) -> &'static str {
    match subtype {
        "office" => "office",
        "retail" => "retail",
        "warehouse" => "warehouse",
        "production" => "production",
        "free_purpose" | "free_use" | "freeuse" => "freeUse",
        _ => "commercial",
    }
}

fn clean(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Map the three classification inputs to one category code. Never fails:
/// anything unrecognised yields `default`.
pub fn resolve(category: &str, operation: &str, subtype: &str, default: &str) -> String {
    let Ok(base) = clean(category).parse::<Base>() else {
        return default.to_string();
    };
    base.code(&clean(operation), &clean(subtype))
        .unwrap_or_else(|| default.to_string())
}

/// A resolved category plus the attributes it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub code: String,
    pub inputs: Vec<Field>,
}

pub fn resolve_record(record: &Record, default: &str) -> Resolution {
    let category = record.text(Field::Category).unwrap_or_default();
    let operation = record.text(Field::Operation).unwrap_or_default();
    let subtype_source = SUBTYPE_SOURCES
        .iter()
        .copied()
        .find(|f| record.text(*f).is_some());
    let subtype = subtype_source
        .and_then(|f| record.text(f))
        .unwrap_or_default();

    let code = resolve(&category, &operation, &subtype, default);

    let mut inputs = Vec::new();
    if !category.is_empty() {
        inputs.push(Field::Category);
    }
    if !operation.is_empty() {
        inputs.push(Field::Operation);
    }
    let uses_subtype = clean(&category).parse::<Base>().is_ok_and(Base::uses_subtype);
    if let Some(source) = subtype_source.filter(|_| uses_subtype) {
        inputs.push(source);
    }
    Resolution { code, inputs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    const DEFAULT: &str = "flatSale";

    #[test]
    fn flat_and_room_split_on_rent() {
        for subtype in ["", "studio", "anything"] {
            assert_eq!(resolve("flat", "sale", subtype, DEFAULT), "flatSale");
            assert_eq!(resolve("flat", "rent_long", subtype, DEFAULT), "flatRent");
            assert_eq!(resolve("room", "rent_daily", subtype, DEFAULT), "roomRent");
        }
        assert_eq!(resolve(" Flat ", " SALE ", "", DEFAULT), "flatSale");
    }

    #[test]
    fn missing_operation_is_sale_for_buildings() {
        assert_eq!(resolve("flat", "", "", DEFAULT), "flatSale");
        assert_eq!(resolve("house", "", "cottage", DEFAULT), "cottageSale");
    }

    #[test]
    fn house_subtypes() {
        assert_eq!(resolve("house", "sale", "cottage", DEFAULT), "cottageSale");
        assert_eq!(resolve("house", "rent", "Townhouse", DEFAULT), "townhouseRent");
        assert_eq!(resolve("house", "sale", "house_share", DEFAULT), "houseShareSale");
        assert_eq!(resolve("house", "rent", "villa", DEFAULT), "houseRent");
    }

    #[test]
    fn commercial_subtypes() {
        assert_eq!(resolve("commercial", "sale", "office", DEFAULT), "officeSale");
        assert_eq!(resolve("commercial", "rent", "warehouse", DEFAULT), "warehouseRent");
        assert_eq!(resolve("commercial", "sale", "free_purpose", DEFAULT), "freeUseSale");
        assert_eq!(resolve("commercial", "rent", "hotel", DEFAULT), "commercialRent");
    }

    #[test]
    fn land_and_garage_need_a_deal() {
        for subtype in ["", "izhs"] {
            assert_eq!(resolve("land", "sale", subtype, DEFAULT), "landSale");
        }
        assert_eq!(resolve("garage", "rent_long", "", DEFAULT), "garageRent");
        assert_eq!(resolve("land", "exchange", "", DEFAULT), DEFAULT);
        assert_eq!(resolve("land", "", "", DEFAULT), DEFAULT);
    }

    #[test]
    fn unknown_or_empty_category_is_default() {
        assert_eq!(resolve("", "rent", "office", DEFAULT), DEFAULT);
        assert_eq!(resolve("castle", "sale", "", "roomSale"), "roomSale");
    }

    #[test]
    fn record_inputs_are_reported() {
        let record = Record::new()
            .with(Field::Category, Value::Text("commercial".into()))
            .unwrap()
            .with(Field::Operation, Value::Text("rent".into()))
            .unwrap()
            .with(Field::CommercialType, Value::Text("office".into()))
            .unwrap();
        let resolution = resolve_record(&record, DEFAULT);
        assert_eq!(resolution.code, "officeRent");
        assert_eq!(
            resolution.inputs,
            vec![Field::Category, Field::Operation, Field::CommercialType]
        );

        let flat = Record::new()
            .with(Field::Category, Value::Text("flat".into()))
            .unwrap()
            .with(Field::FlatType, Value::Text("studio".into()))
            .unwrap();
        let resolution = resolve_record(&flat, DEFAULT);
        assert_eq!(resolution.code, "flatSale");
        assert_eq!(resolution.inputs, vec![Field::Category]);
    }
}
