use std::fmt;

use super::document::Element;

/// Marketplace essentials a listing cannot be published without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Address,
    Price,
    Phone,
    Photo,
}

impl Requirement {
    pub const ALL: [Requirement; 4] = [
        Requirement::Address,
        Requirement::Price,
        Requirement::Phone,
        Requirement::Photo,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Requirement::Address => "Address",
            Requirement::Price => "Price",
            Requirement::Phone => "Phone (at least one)",
            Requirement::Photo => "Photo (at least one)",
        }
    }

    fn satisfied(self, object: &Element) -> bool {
        match self {
            Requirement::Address => object.find_text("Address").is_some(),
            Requirement::Price => object.find_text("BargainTerms.Price").is_some(),
            Requirement::Phone => object.find("Phones.PhoneSchema.Number").is_some(),
            Requirement::Photo => object.find("Photos.PhotoSchema.FullUrl").is_some(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Requirements the built object does not meet.
pub fn missing(object: &Element) -> Vec<Requirement> {
    Requirement::ALL
        .into_iter()
        .filter(|r| !r.satisfied(object))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_misses_everything() {
        let labels: Vec<_> = missing(&Element::new("object"))
            .into_iter()
            .map(Requirement::label)
            .collect();
        assert_eq!(
            labels,
            vec!["Address", "Price", "Phone (at least one)", "Photo (at least one)"]
        );
    }

    #[test]
    fn complete_object_passes() {
        let mut object = Element::new("object");
        object.emit(&["Address"], "Moscow");
        object.emit(&["BargainTerms", "Price"], "100");
        object.emit(&["Phones", "PhoneSchema", "Number"], "9991234567");
        object.emit(&["Photos", "PhotoSchema", "FullUrl"], "https://x/1.jpg");
        assert!(missing(&object).is_empty());
    }
}
