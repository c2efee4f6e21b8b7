use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::error::RecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Decimal,
    Bool,
    Int,
    Collection,
}

impl FieldKind {
    pub fn describe(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Decimal => "a decimal",
            FieldKind::Bool => "a boolean",
            FieldKind::Int => "an integer",
            FieldKind::Collection => "a list",
        }
    }
}

macro_rules! fields {
    ($($variant:ident => $name:literal : $kind:ident,)*) => {
        /// Every listing attribute the engine knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Field {
            $($variant,)*
        }

        impl Field {
            pub const ALL: &'static [Field] = &[$(Field::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Field::$variant => $name,)*
                }
            }

            pub fn kind(self) -> FieldKind {
                match self {
                    $(Field::$variant => FieldKind::$kind,)*
                }
            }
        }

        impl FromStr for Field {
            type Err = RecordError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Field::$variant),)*
                    other => Err(RecordError::UnknownField(other.to_string())),
                }
            }
        }
    };
}

fields! {
    // ── Identity / classification ──
    ExternalId => "external_id": Text,
    Category => "category": Text,
    Operation => "operation": Text,
    Subtype => "subtype": Text,
    Status => "status": Text,
    Title => "title": Text,
    ExportToCian => "export_to_cian": Bool,
    ExportToDomclick => "export_to_domclick": Bool,
    IsArchived => "is_archived": Bool,

    // ── Location ──
    Description => "description": Text,
    Address => "address": Text,
    Lat => "lat": Decimal,
    Lng => "lng": Decimal,
    CadastralNumber => "cadastral_number": Text,

    // ── Contacts ──
    PhoneCountry => "phone_country": Text,
    PhoneNumber => "phone_number": Text,
    PhoneNumber2 => "phone_number2": Text,

    // ── Media ──
    LayoutPhotoUrl => "layout_photo_url": Text,
    ObjectTourUrl => "object_tour_url": Text,
    Photos => "photos": Collection,

    // ── Building ──
    BuildingName => "building_name": Text,
    BuildingFloors => "building_floors": Int,
    BuildingBuildYear => "building_build_year": Int,
    BuildingMaterial => "building_material": Text,
    BuildingCeilingHeight => "building_ceiling_height": Decimal,
    BuildingPassengerLifts => "building_passenger_lifts": Int,
    BuildingCargoLifts => "building_cargo_lifts": Int,

    // ── Flat / room ──
    FlatType => "flat_type": Text,
    RoomType => "room_type": Text,
    FlatRoomsCount => "flat_rooms_count": Int,
    RoomTypeExt => "room_type_ext": Text,
    IsEuroFlat => "is_euro_flat": Bool,
    IsApartments => "is_apartments": Bool,
    IsPenthouse => "is_penthouse": Bool,
    TotalArea => "total_area": Decimal,
    LivingArea => "living_area": Decimal,
    KitchenArea => "kitchen_area": Decimal,
    RoomArea => "room_area": Decimal,
    Rooms => "rooms": Int,
    RoomsForSaleCount => "rooms_for_sale_count": Int,
    BedsCount => "beds_count": Int,
    FloorNumber => "floor_number": Int,
    LoggiasCount => "loggias_count": Int,
    BalconiesCount => "balconies_count": Int,
    WindowsViewType => "windows_view_type": Text,
    SeparateWcsCount => "separate_wcs_count": Int,
    CombinedWcsCount => "combined_wcs_count": Int,
    RepairType => "repair_type": Text,

    // ── Residential complex ──
    JkId => "jk_id": Int,
    JkName => "jk_name": Text,
    HouseId => "house_id": Int,
    HouseName => "house_name": Text,
    FlatNumber => "flat_number": Text,
    SectionNumber => "section_number": Text,

    // ── House / land ──
    HouseType => "house_type": Text,
    HeatingType => "heating_type": Text,
    LandArea => "land_area": Decimal,
    LandAreaUnit => "land_area_unit": Text,
    PermittedLandUse => "permitted_land_use": Text,
    IsLandWithContract => "is_land_with_contract": Bool,
    LandCategory => "land_category": Text,
    LandType => "land_type": Text,
    HasTerrace => "has_terrace": Bool,
    HasCellar => "has_cellar": Bool,
    WcLocation => "wc_location": Text,
    HouseCondition => "house_condition": Text,
    HasElectricity => "has_electricity": Bool,
    HasGas => "has_gas": Bool,
    HasWater => "has_water": Bool,
    HasDrainage => "has_drainage": Bool,
    GasSupplyType => "gas_supply_type": Text,
    SewerageType => "sewerage_type": Text,
    WaterSupplyType => "water_supply_type": Text,
    HasGarage => "has_garage": Bool,
    HasPool => "has_pool": Bool,
    HasBathhouse => "has_bathhouse": Bool,
    HasSecurity => "has_security": Bool,

    // ── Commercial ──
    CommercialType => "commercial_type": Text,
    IsRentByParts => "is_rent_by_parts": Bool,
    RentByPartsDesc => "rent_by_parts_desc": Text,
    CeilingHeight => "ceiling_height": Decimal,
    Power => "power": Int,
    ParkingPlaces => "parking_places": Int,
    HasParking => "has_parking": Bool,

    // ── Amenities ──
    FurnishingDetails => "furnishing_details": Text,
    HasInternet => "has_internet": Bool,
    HasFurniture => "has_furniture": Bool,
    HasKitchenFurniture => "has_kitchen_furniture": Bool,
    HasTv => "has_tv": Bool,
    HasWasher => "has_washer": Bool,
    HasConditioner => "has_conditioner": Bool,
    HasRefrigerator => "has_refrigerator": Bool,
    HasDishwasher => "has_dishwasher": Bool,
    HasShower => "has_shower": Bool,
    HasPhone => "has_phone": Bool,
    HasRamp => "has_ramp": Bool,
    HasBathtub => "has_bathtub": Bool,

    // ── Deal terms ──
    Price => "price": Decimal,
    Currency => "currency": Text,
    MortgageAllowed => "mortgage_allowed": Bool,
    SaleType => "sale_type": Text,
    AgentBonusValue => "agent_bonus_value": Decimal,
    AgentBonusIsPercent => "agent_bonus_is_percent": Bool,
    SecurityDeposit => "security_deposit": Decimal,
    Deposit => "deposit": Decimal,
    MinRentTermMonths => "min_rent_term_months": Int,
    LeaseTermType => "lease_term_type": Text,
    PrepayMonths => "prepay_months": Int,
    UtilitiesTerms => "utilities_terms": Text,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed attribute value. Decimals keep their source text; canonical form
/// is produced by the normalizer so that malformed input surfaces per record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Decimal(String),
    Bool(bool),
    Int(i64),
}

impl Value {
    /// Parse textual input according to the attribute kind.
    pub fn parse(field: Field, raw: &str) -> Result<Value, RecordError> {
        let invalid = || RecordError::InvalidValue {
            field: field.name(),
            expected: field.kind().describe(),
            value: raw.to_string(),
        };
        match field.kind() {
            FieldKind::Text => Ok(Value::Text(raw.to_string())),
            FieldKind::Decimal => Ok(Value::Decimal(raw.to_string())),
            FieldKind::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            FieldKind::Int => raw.trim().parse::<i64>().map(Value::Int).map_err(|_| invalid()),
            FieldKind::Collection => Err(invalid()),
        }
    }

    /// Decode one JSON attribute. `null` means "absent" and yields `None`.
    pub fn from_json(field: Field, json: &Json) -> Result<Option<Value>, RecordError> {
        let invalid = || RecordError::InvalidValue {
            field: field.name(),
            expected: field.kind().describe(),
            value: json.to_string(),
        };
        let value = match (field.kind(), json) {
            (_, Json::Null) => return Ok(None),
            (FieldKind::Text, Json::String(s)) => Value::Text(s.clone()),
            (FieldKind::Text, Json::Number(n)) => Value::Text(n.to_string()),
            (FieldKind::Decimal, Json::String(s)) => Value::Decimal(s.clone()),
            (FieldKind::Decimal, Json::Number(n)) => Value::Decimal(n.to_string()),
            (FieldKind::Bool, Json::Bool(b)) => Value::Bool(*b),
            (FieldKind::Bool, Json::Number(n)) => Value::Bool(n.as_i64().ok_or_else(invalid)? != 0),
            (FieldKind::Int, Json::Number(n)) => Value::Int(n.as_i64().ok_or_else(invalid)?),
            (FieldKind::Bool | FieldKind::Int, Json::String(s)) => Value::parse(field, s)?,
            _ => return Err(invalid()),
        };
        Ok(Some(value))
    }

    /// Raw textual form, used for enumerated-table lookups.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Cow::Borrowed(s.as_str()),
            Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Value::Int(i) => Cow::Owned(i.to_string()),
        }
    }

    /// Empty text counts as "no data"; booleans and numbers are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(s) | Value::Decimal(s) => s.trim().is_empty(),
            Value::Bool(_) | Value::Int(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Photo {
    #[serde(alias = "full_url")]
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub sort: Option<i64>,
}

/// One listing. Read-only for the mapping engine.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Map<String, Json>")]
pub struct Record {
    values: BTreeMap<Field, Value>,
    photos: Vec<Photo>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter; a value of the wrong kind is rejected.
    pub fn with(mut self, field: Field, value: Value) -> Result<Self, RecordError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn with_photo(mut self, photo: Photo) -> Self {
        self.photos.push(photo);
        self
    }

    pub fn set(&mut self, field: Field, value: Value) -> Result<(), RecordError> {
        let matches = matches!(
            (field.kind(), &value),
            (FieldKind::Text, Value::Text(_))
                | (FieldKind::Decimal, Value::Decimal(_))
                | (FieldKind::Bool, Value::Bool(_))
                | (FieldKind::Int, Value::Int(_))
        );
        if !matches {
            return Err(RecordError::InvalidValue {
                field: field.name(),
                expected: field.kind().describe(),
                value: value.as_text().into_owned(),
            });
        }
        self.values.insert(field, value);
        Ok(())
    }

    pub fn push_photo(&mut self, photo: Photo) {
        self.photos.push(photo);
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.values.get(&field)
    }

    /// Trimmed text of a non-empty attribute.
    pub fn text(&self, field: Field) -> Option<Cow<'_, str>> {
        let value = self.get(field).filter(|v| !v.is_empty())?;
        Some(match value.as_text() {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
            Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
        })
    }

    pub fn flag(&self, field: Field) -> bool {
        matches!(self.get(field), Some(Value::Bool(true)))
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn external_id(&self) -> String {
        self.text(Field::ExternalId).map(Cow::into_owned).unwrap_or_default()
    }

    /// "Meaningfully populated": non-empty text, `true`, any number, non-empty collection.
    pub fn is_filled(&self, field: Field) -> bool {
        if field == Field::Photos {
            return !self.photos.is_empty();
        }
        match self.get(field) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(v) => !v.is_empty(),
        }
    }
}

impl TryFrom<serde_json::Map<String, Json>> for Record {
    type Error = RecordError;

    fn try_from(map: serde_json::Map<String, Json>) -> Result<Self, Self::Error> {
        let mut record = Record::new();
        for (key, json) in map {
            let Ok(field) = key.parse::<Field>() else {
                debug!(attribute = %key, "attribute not in listing schema");
                continue;
            };
            if field == Field::Photos {
                if json.is_null() {
                    continue;
                }
                record.photos = serde_json::from_value(json)
                    .map_err(|e| RecordError::Photo(e.to_string()))?;
                continue;
            }
            if let Some(value) = Value::from_json(field, &json)? {
                record.values.insert(field, value);
            }
        }
        Ok(record)
    }
}

/// A listing that could not be decoded into the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub external_id: String,
    pub reason: String,
}

/// Outcome of decoding one source listing.
pub type Decoded = Result<Record, Rejected>;

fn json_external_id(json: &Json) -> String {
    match json.get(Field::ExternalId.name()) {
        Some(Json::String(s)) => s.trim().to_string(),
        Some(Json::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Decode a JSON array of listings one entry at a time. Only a document that
/// is not an array at all is an error; a bad entry becomes `Err(Rejected)`.
pub fn decode_listings(src: &str) -> Result<Vec<Decoded>, serde_json::Error> {
    let items: Vec<Json> = serde_json::from_str(src)?;
    Ok(items
        .into_iter()
        .map(|item| {
            let external_id = json_external_id(&item);
            let reject = |reason: String| Rejected {
                external_id: external_id.clone(),
                reason,
            };
            match item {
                Json::Object(map) => Record::try_from(map).map_err(|e| reject(e.to_string())),
                other => Err(reject(format!("expected an object, found `{other}`"))),
            }
        })
        .collect())
}
