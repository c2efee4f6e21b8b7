pub mod blocks;
pub mod category;
pub mod check;
pub mod coverage;
pub mod decimal;
pub mod document;
pub mod fields;
pub mod normalize;
pub mod registry;
pub mod urls;
pub mod yaml;

use std::collections::BTreeSet;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::record::{Decoded, Field, Record};
use check::Requirement;
use document::Element;
use registry::Registry;
use urls::UrlResolver;

/// Per-record output plus the coverage artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub external_id: String,
    pub category: String,
    pub fragment: Element,
    pub filled: BTreeSet<Field>,
    pub exported: BTreeSet<Field>,
    /// Filled on the source record but never exported.
    pub uncovered: BTreeSet<Field>,
}

impl BuildResult {
    pub fn missing(&self) -> Vec<Requirement> {
        check::missing(&self.fragment)
    }
}

/// Outcome for one input record, in input order.
#[derive(Debug, Clone)]
pub enum Entry {
    Built(BuildResult),
    Skipped { external_id: String, error: BuildError },
}

#[derive(Debug, Clone)]
pub struct FeedResult {
    pub document: Element,
    pub entries: Vec<Entry>,
}

impl FeedResult {
    pub fn built(&self) -> impl Iterator<Item = &BuildResult> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Built(result) => Some(result),
            Entry::Skipped { .. } => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Skipped { .. }))
            .count()
    }

    /// Assemble the root document from entries already in input order.
    pub fn from_entries(feed_version: &str, entries: Vec<Entry>) -> Self {
        let mut document = Element::new("feed");
        document.push(Element::with_text("feed_version", feed_version));
        for entry in &entries {
            if let Entry::Built(result) = entry {
                document.push(result.fragment.clone());
            }
        }
        FeedResult { document, entries }
    }

    pub fn to_xml(&self) -> std::io::Result<String> {
        self.document.to_xml()
    }
}

/// Build outcome carrying the external id on failure.
type Outcome = Result<BuildResult, (String, BuildError)>;

/// Assembles feed objects from records. Holds only shared, read-only state.
pub struct FeedBuilder<'a> {
    registry: &'a Registry,
    resolver: &'a dyn UrlResolver,
    parallel_threshold: usize,
}

impl<'a> FeedBuilder<'a> {
    pub fn new(registry: &'a Registry, resolver: &'a dyn UrlResolver) -> Self {
        FeedBuilder {
            registry,
            resolver,
            parallel_threshold: 64,
        }
    }

    /// Record count at or above which `build_feed` uses the rayon pool.
    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn build_one(&self, record: &Record) -> Result<BuildResult, BuildError> {
        let registry = self.registry;
        let resolution = category::resolve_record(record, registry.default_category());
        if !registry.has_category(&resolution.code) {
            return Err(BuildError::Unmapped {
                code: resolution.code,
            });
        }

        let external_id = record.external_id();
        let mut object = Element::new("object");
        object.push(Element::with_text("Category", resolution.code.as_str()));
        object.push(Element::with_text("ExternalId", external_id.as_str()));

        let mut exported = fields::process(record, registry, &resolution.code, &mut object)?;

        let blocks = [
            blocks::phones::build(record),
            blocks::photos::layout(record, self.resolver),
            blocks::photos::tour(record, self.resolver),
            blocks::photos::build(record, self.resolver),
        ];
        for block in blocks {
            if let Some(element) = block.element {
                object.push(element);
                exported.extend(block.consumed);
            }
        }

        exported.extend(resolution.inputs);
        if !external_id.is_empty() {
            exported.insert(Field::ExternalId);
        }
        exported.retain(|f| !registry.is_stop(*f));

        Ok(BuildResult {
            external_id,
            category: resolution.code,
            fragment: object,
            filled: coverage::filled_fields(record, registry.stop_fields()),
            uncovered: coverage::audit(record, &exported, registry.stop_fields()),
            exported,
        })
    }

    fn outcome(&self, record: &Record) -> Outcome {
        self.build_one(record).map_err(|e| (record.external_id(), e))
    }

    #[cfg(feature = "rayon")]
    fn build_all<T: Sync>(&self, inputs: &[T], build: impl Fn(&T) -> Outcome + Sync + Send) -> Vec<Outcome> {
        if inputs.len() >= self.parallel_threshold {
            inputs.par_iter().map(&build).collect()
        } else {
            inputs.iter().map(&build).collect()
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn build_all<T: Sync>(&self, inputs: &[T], build: impl Fn(&T) -> Outcome + Sync + Send) -> Vec<Outcome> {
        inputs.iter().map(&build).collect()
    }

    /// Build every record and assemble the root document. Failing records are
    /// left out of the document and reported as `Entry::Skipped`.
    pub fn build_feed(&self, records: &[Record]) -> FeedResult {
        FeedResult::from_entries(self.registry.feed_version(), self.build_entries(records))
    }

    /// Per-record outcomes in input order, without the root document.
    pub fn build_entries(&self, records: &[Record]) -> Vec<Entry> {
        entries(self.build_all(records, |r| self.outcome(r)))
    }

    /// Like `build_entries`, but listings that failed to decode are carried
    /// through as `BuildError::Invalid` so the rest of the batch still builds.
    pub fn build_decoded(&self, inputs: &[Decoded]) -> Vec<Entry> {
        entries(self.build_all(inputs, |input| match input {
            Ok(record) => self.outcome(record),
            Err(rejected) => Err((
                rejected.external_id.clone(),
                BuildError::Invalid {
                    reason: rejected.reason.clone(),
                },
            )),
        }))
    }
}

fn entries(outcomes: Vec<Outcome>) -> Vec<Entry> {
    let mut entries = Vec::with_capacity(outcomes.len());
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(result) => {
                if !result.uncovered.is_empty() {
                    let names: Vec<&str> = result.uncovered.iter().map(|f| f.name()).collect();
                    warn!(
                        index,
                        external_id = %result.external_id,
                        uncovered = ?names,
                        "filled fields not exported"
                    );
                }
                entries.push(Entry::Built(result));
            }
            Err((external_id, error)) => {
                match &error {
                    BuildError::Unmapped { .. } => {
                        debug!(index, %external_id, %error, "record excluded")
                    }
                    _ => warn!(index, %external_id, %error, "record skipped"),
                }
                entries.push(Entry::Skipped { external_id, error });
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Photo, Rejected, Value};
    use super::urls::BaseUrl;

    fn record(pairs: &[(Field, &str)]) -> Record {
        pairs.iter().fold(Record::new(), |r, (f, raw)| {
            r.with(*f, Value::parse(*f, raw).unwrap()).unwrap()
        })
    }

    fn build(record: &Record) -> BuildResult {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(Some("https://crm.example.com"));
        FeedBuilder::new(registry, &resolver).build_one(record).unwrap()
    }

    fn listings() -> Vec<Record> {
        let json = std::fs::read_to_string("tests/fixtures/listings.json").unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn flat_sale_scenario() {
        let result = build(&record(&[
            (Field::Category, "flat"),
            (Field::Operation, "sale"),
            (Field::TotalArea, "45"),
            (Field::Price, "1000000.00"),
            (Field::PhoneNumber, "9991234567"),
            (Field::PhoneCountry, "7"),
        ]));
        let object = &result.fragment;
        assert_eq!(result.category, "flatSale");
        assert_eq!(object.find_text("Category"), Some("flatSale"));
        assert_eq!(object.find_text("TotalArea"), Some("45"));
        assert_eq!(object.find_text("BargainTerms.Price"), Some("1000000"));
        let phones = object.find("Phones").unwrap();
        assert_eq!(phones.children().len(), 1);
        assert_eq!(phones.find_text("PhoneSchema.CountryCode"), Some("+7"));
        assert_eq!(phones.find_text("PhoneSchema.Number"), Some("9991234567"));
        assert!(result.uncovered.is_empty());
    }

    #[test]
    fn house_land_area_scenario() {
        let result = build(&record(&[
            (Field::Category, "house"),
            (Field::Operation, "sale"),
            (Field::LandArea, "600.00"),
            (Field::LandAreaUnit, "sqm"),
        ]));
        assert_eq!(result.category, "houseSale");
        assert_eq!(result.fragment.find_text("Land.Area"), Some("6"));
        assert_eq!(result.fragment.find_text("Land.AreaUnitType"), Some("sotka"));
    }

    #[test]
    fn no_media_no_phone_scenario() {
        let result = build(&record(&[
            (Field::Category, "flat"),
            (Field::Operation, "rent"),
            (Field::PhoneCountry, "7"),
        ]));
        assert!(result.fragment.find("Phones").is_none());
        assert!(result.fragment.find("Photos").is_none());
        for field in [Field::PhoneCountry, Field::PhoneNumber, Field::PhoneNumber2, Field::Photos] {
            assert!(!result.filled.contains(&field));
        }
    }

    #[test]
    fn agent_bonus_currency_fan_out() {
        let base = [
            (Field::Category, "flat"),
            (Field::Operation, "sale"),
            (Field::Price, "5000000"),
            (Field::Currency, "rub"),
        ];
        let without = build(&record(&base));
        assert_eq!(without.fragment.find_text("BargainTerms.Currency"), Some("RUB"));
        assert!(without.fragment.find("BargainTerms.AgentBonus").is_none());

        let mut with_bonus = base.to_vec();
        with_bonus.push((Field::AgentBonusValue, "2.50"));
        with_bonus.push((Field::AgentBonusIsPercent, "true"));
        let with = build(&record(&with_bonus));
        assert_eq!(with.fragment.find_text("BargainTerms.AgentBonus.Value"), Some("2.5"));
        assert_eq!(with.fragment.find_text("BargainTerms.AgentBonus.PaymentType"), Some("percent"));
        assert_eq!(with.fragment.find_text("BargainTerms.AgentBonus.Currency"), Some("RUB"));
    }

    #[test]
    fn registry_defaults_fill_payment_type_and_currency() {
        let result = build(&record(&[
            (Field::Category, "flat"),
            (Field::Operation, "sale"),
            (Field::Price, "5000000"),
            (Field::AgentBonusValue, "100000"),
        ]));
        let object = &result.fragment;
        assert_eq!(object.find_text("BargainTerms.Currency"), Some("RUB"));
        assert_eq!(object.find_text("BargainTerms.AgentBonus.PaymentType"), Some("fixed"));
        assert_eq!(object.find_text("BargainTerms.AgentBonus.Currency"), Some("RUB"));
        assert!(!result.exported.contains(&Field::Currency));
        assert!(!result.exported.contains(&Field::AgentBonusIsPercent));
        assert!(result.uncovered.is_empty());

        let no_bonus = build(&record(&[(Field::Category, "flat"), (Field::Price, "100")]));
        assert!(no_bonus.fragment.find("BargainTerms.AgentBonus").is_none());
        assert_eq!(no_bonus.fragment.find_text("BargainTerms.Currency"), Some("RUB"));
    }

    #[test]
    fn external_id_always_present() {
        let result = build(&record(&[(Field::Category, "flat")]));
        let id = result.fragment.find("ExternalId").unwrap();
        assert_eq!(id.text(), Some(""));
        assert!(!result.exported.contains(&Field::ExternalId));
    }

    #[test]
    fn object_layout_order() {
        let record = record(&[
            (Field::ExternalId, "A-1"),
            (Field::Category, "flat"),
            (Field::Address, "Moscow"),
            (Field::PhoneNumber, "89991234567"),
            (Field::LayoutPhotoUrl, "/plans/1.png"),
        ])
        .with_photo(Photo {
            url: "/media/1.jpg".into(),
            ..Default::default()
        });
        let result = build(&record);
        let names: Vec<_> = result.fragment.children().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec!["Category", "ExternalId", "Address", "BargainTerms", "Phones", "LayoutPhoto", "Photos"]
        );
        assert!(result.missing().contains(&Requirement::Price));
        assert_eq!(result.missing().len(), 1);
    }

    #[test]
    fn unmapped_category_is_excluded() {
        let registry = Registry::parse("categories:\n  flatSale: {}\n").unwrap();
        let resolver = BaseUrl::new(None);
        let builder = FeedBuilder::new(&registry, &resolver);
        let land = record(&[(Field::Category, "land"), (Field::Operation, "sale")]);
        assert!(matches!(
            builder.build_one(&land),
            Err(BuildError::Unmapped { code }) if code == "landSale"
        ));
    }

    #[test]
    fn feed_keeps_input_order_and_skips_bad_records() {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(Some("https://crm.example.com"));
        let records = listings();
        let feed = FeedBuilder::new(registry, &resolver)
            .parallel_threshold(2)
            .build_feed(&records);

        assert_eq!(feed.entries.len(), records.len());
        assert_eq!(feed.skipped(), 1);
        let ids: Vec<_> = feed.built().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["FL-1", "HS-2", "OF-3", "LD-5"]);

        let objects: Vec<_> = feed
            .document
            .children()
            .iter()
            .filter(|c| c.name() == "object")
            .map(|o| o.find_text("ExternalId").unwrap_or_default())
            .collect();
        assert_eq!(objects, ids);
        assert_eq!(feed.document.find_text("feed_version"), Some("2"));
    }

    #[test]
    fn decode_failures_become_skipped_entries() {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(None);
        let inputs = vec![
            Ok(record(&[(Field::ExternalId, "A-1"), (Field::Category, "flat")])),
            Err(Rejected {
                external_id: "A-2".into(),
                reason: "attribute `rooms` expects an integer, got `\"two\"`".into(),
            }),
            Ok(record(&[(Field::ExternalId, "A-3"), (Field::Category, "house")])),
        ];
        for threshold in [1, usize::MAX] {
            let entries = FeedBuilder::new(registry, &resolver)
                .parallel_threshold(threshold)
                .build_decoded(&inputs);
            assert_eq!(entries.len(), 3);
            assert!(matches!(&entries[0], Entry::Built(r) if r.external_id == "A-1"));
            assert!(matches!(
                &entries[1],
                Entry::Skipped { external_id, error: BuildError::Invalid { reason } }
                    if external_id == "A-2" && reason.contains("rooms")
            ));
            assert!(matches!(&entries[2], Entry::Built(r) if r.category == "houseSale"));
        }
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(Some("https://crm.example.com"));
        let records = listings();
        let sequential = FeedBuilder::new(registry, &resolver)
            .parallel_threshold(usize::MAX)
            .build_feed(&records);
        let parallel = FeedBuilder::new(registry, &resolver)
            .parallel_threshold(1)
            .build_feed(&records);
        assert_eq!(sequential.document, parallel.document);
    }

    #[test]
    fn no_empty_leaves_and_coverage_invariants() {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(Some("https://crm.example.com"));
        let feed = FeedBuilder::new(registry, &resolver).build_feed(&listings());
        for result in feed.built() {
            for (path, leaf) in result.fragment.leaves() {
                let text = leaf.text().unwrap_or_default();
                assert!(!text.trim().is_empty(), "{}: empty leaf {path}", result.external_id);
            }
            for field in &result.exported {
                assert!(!registry.is_stop(*field));
            }
            for field in &result.filled {
                assert!(!registry.is_stop(*field));
            }
        }
        // Exported attributes are always present on the record.
        for (record, entry) in listings().iter().zip(&feed.entries) {
            if let Entry::Built(result) = entry {
                for field in &result.exported {
                    let present = *field == Field::Photos || record.get(*field).is_some();
                    assert!(present, "{field} exported but absent");
                }
            }
        }
    }

    #[test]
    fn feed_serializes() {
        let registry = Registry::builtin().unwrap();
        let resolver = BaseUrl::new(Some("https://crm.example.com"));
        let feed = FeedBuilder::new(registry, &resolver).build_feed(&listings());
        let xml = feed.to_xml().unwrap();
        assert!(xml.contains("<feed><feed_version>2</feed_version><object><Category>flatSale</Category><ExternalId>FL-1</ExternalId>"));
        assert_eq!(xml.matches("<object>").count(), 4);
    }
}
