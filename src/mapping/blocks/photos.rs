use itertools::Itertools;

use super::Block;
use crate::mapping::document::Element;
use crate::mapping::urls::UrlResolver;
use crate::record::{Field, Record};

/// `Photos/PhotoSchema{FullUrl, IsDefault}` in sort order with exactly one default.
pub fn build(record: &Record, resolver: &dyn UrlResolver) -> Block {
    let resolved: Vec<(String, bool)> = record
        .photos()
        .iter()
        .enumerate()
        .sorted_by_key(|(idx, p)| (p.sort.unwrap_or(i64::MAX), !p.is_default, *idx))
        .filter_map(|(_, p)| resolver.resolve(&p.url).map(|url| (url, p.is_default)))
        .collect();
    if resolved.is_empty() {
        return Block::default();
    }

    let default_idx = resolved.iter().position(|(_, d)| *d).unwrap_or(0);
    let mut photos = Element::new("Photos");
    for (idx, (url, _)) in resolved.into_iter().enumerate() {
        let mut schema = Element::new("PhotoSchema");
        schema.push(Element::with_text("FullUrl", url));
        schema.push(Element::with_text("IsDefault", (idx == default_idx).to_string()));
        photos.push(schema);
    }
    Block {
        element: Some(photos),
        consumed: vec![Field::Photos],
    }
}

/// `LayoutPhoto{FullUrl, IsDefault=false}` from the floor-plan reference.
pub fn layout(record: &Record, resolver: &dyn UrlResolver) -> Block {
    single(record, resolver, Field::LayoutPhotoUrl, |url| {
        let mut layout = Element::new("LayoutPhoto");
        layout.push(Element::with_text("FullUrl", url));
        layout.push(Element::with_text("IsDefault", "false"));
        layout
    })
}

/// `ObjectTour{FullUrl}` from the virtual tour reference.
pub fn tour(record: &Record, resolver: &dyn UrlResolver) -> Block {
    single(record, resolver, Field::ObjectTourUrl, |url| {
        let mut tour = Element::new("ObjectTour");
        tour.push(Element::with_text("FullUrl", url));
        tour
    })
}

fn single(
    record: &Record,
    resolver: &dyn UrlResolver,
    field: Field,
    render: impl FnOnce(String) -> Element,
) -> Block {
    match record.text(field).and_then(|r| resolver.resolve(&r)) {
        Some(url) => Block {
            element: Some(render(url)),
            consumed: vec![field],
        },
        None => Block::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::urls::BaseUrl;
    use crate::record::{Photo, Value};

    fn photo(url: &str, is_default: bool, sort: Option<i64>) -> Photo {
        Photo {
            url: url.to_string(),
            is_default,
            sort,
        }
    }

    fn urls_and_defaults(block: &Block) -> Vec<(String, String)> {
        block
            .element
            .as_ref()
            .unwrap()
            .children()
            .iter()
            .map(|s| {
                (
                    s.find_text("FullUrl").unwrap().to_string(),
                    s.find_text("IsDefault").unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn orders_by_sort_then_default() {
        let record = Record::new()
            .with_photo(photo("https://x/c.jpg", false, None))
            .with_photo(photo("https://x/b.jpg", false, Some(2)))
            .with_photo(photo("https://x/a.jpg", false, Some(1)))
            .with_photo(photo("https://x/d.jpg", true, None));
        let block = build(&record, &BaseUrl::new(None));
        assert_eq!(
            urls_and_defaults(&block),
            vec![
                ("https://x/a.jpg".into(), "false".into()),
                ("https://x/b.jpg".into(), "false".into()),
                ("https://x/d.jpg".into(), "true".into()),
                ("https://x/c.jpg".into(), "false".into()),
            ]
        );
    }

    #[test]
    fn first_photo_is_default_when_none_marked() {
        let record = Record::new()
            .with_photo(photo("/m/1.jpg", false, None))
            .with_photo(photo("/m/2.jpg", false, None));
        let block = build(&record, &BaseUrl::new(Some("https://crm.example.com")));
        assert_eq!(
            urls_and_defaults(&block),
            vec![
                ("https://crm.example.com/m/1.jpg".into(), "true".into()),
                ("https://crm.example.com/m/2.jpg".into(), "false".into()),
            ]
        );
        assert_eq!(block.consumed, vec![Field::Photos]);
    }

    #[test]
    fn exactly_one_default_with_several_marked() {
        let record = Record::new()
            .with_photo(photo("https://x/1.jpg", true, Some(1)))
            .with_photo(photo("https://x/2.jpg", true, Some(2)));
        let block = build(&record, &BaseUrl::new(None));
        let defaults = urls_and_defaults(&block)
            .into_iter()
            .filter(|(_, d)| d == "true")
            .count();
        assert_eq!(defaults, 1);
    }

    #[test]
    fn unresolvable_photos_dropped() {
        let record = Record::new()
            .with_photo(photo("/m/1.jpg", true, None))
            .with_photo(photo("https://x/2.jpg", false, None));
        let block = build(&record, &BaseUrl::new(None));
        assert_eq!(
            urls_and_defaults(&block),
            vec![("https://x/2.jpg".into(), "true".into())]
        );

        let record = Record::new().with_photo(photo("/m/1.jpg", true, None));
        assert_eq!(build(&record, &BaseUrl::new(None)), Block::default());
    }

    #[test]
    fn layout_and_tour() {
        let record = Record::new()
            .with(Field::LayoutPhotoUrl, Value::Text("//cdn.x/plan.png".into()))
            .unwrap()
            .with(Field::ObjectTourUrl, Value::Text("relative/tour".into()))
            .unwrap();
        let resolver = BaseUrl::new(None);
        let layout = layout(&record, &resolver);
        let element = layout.element.unwrap();
        assert_eq!(element.find_text("FullUrl"), Some("https://cdn.x/plan.png"));
        assert_eq!(element.find_text("IsDefault"), Some("false"));
        assert_eq!(tour(&record, &resolver), Block::default());
    }
}
