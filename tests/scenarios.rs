use std::collections::BTreeSet;
use std::sync::Arc;

use domain_mapper::{
    audit, value, DomainMapper, EngineConfig, MappingReporter, MappingSelector, MappingVariant, Override, PropertyError,
    Registry, RegistryBuilder, ReportFormat, Sequence, TransformSet, TypeDescriptor, WorkerPool,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Order {
    id: u64,
    items: Option<Vec<LineItem>>,
    tags: Option<BTreeSet<String>>,
    contact: Contact,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Contact {
    email: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct LineItem {
    sku: String,
    quantity: u32,
}

#[derive(Debug, Clone)]
struct RawItem {
    code: String,
    qty: u32,
}

#[derive(Debug, Clone)]
struct OrderSource {
    order_id: u64,
    raw_items: Vec<RawItem>,
    labels: Vec<String>,
    email: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("domain_mapper=debug"))
        .with_test_writer()
        .try_init();
}

fn raw(code: &str, qty: u32) -> RawItem {
    RawItem {
        code: code.to_string(),
        qty,
    }
}

fn source(raw_items: Vec<RawItem>) -> OrderSource {
    OrderSource {
        order_id: 7,
        raw_items,
        labels: vec!["rush".to_string(), "gift".to_string(), "rush".to_string()],
        email: "buyer@example.com".to_string(),
    }
}

fn registry_with(extra: impl FnOnce(RegistryBuilder) -> RegistryBuilder) -> Registry {
    let builder = RegistryBuilder::new()
        .describe(
            TypeDescriptor::of::<Order>()
                .field("id", |o: &Order| o.id, |o, v| o.id = v)
                .list("items", |o: &Order| o.items.clone(), |o, v| o.items = v)
                .set("tags", |o: &Order| o.tags.clone(), |o, v| o.tags = v)
                .nested("contact", |o: &mut Order| &mut o.contact)
                .build(),
        )
        .describe(
            TypeDescriptor::of::<Contact>()
                .field("email", |c: &Contact| c.email.clone(), |c, v| c.email = v)
                .build(),
        )
        .describe(
            TypeDescriptor::of::<LineItem>()
                .field("sku", |l: &LineItem| l.sku.clone(), |l, v| l.sku = v)
                .field("quantity", |l: &LineItem| l.quantity, |l, v| l.quantity = v)
                .build(),
        )
        .register::<Order>(
            TransformSet::builder::<OrderSource>(MappingVariant::Full)
                .value("id", |s| s.order_id)
                .sequence("items", |s| s.raw_items.clone())
                .sequence("tags", |s| s.labels.clone())
                .value("contact.email", |s| s.email.clone())
                .build(),
        )
        .register::<Order>(
            TransformSet::builder::<OrderSource>(MappingVariant::Min)
                .sequence("items", |s| s.raw_items.clone())
                .build(),
        )
        .register::<Order>(
            TransformSet::builder::<OrderSource>(MappingVariant::Full)
                .named("alt")
                .value("id", |s| s.order_id)
                .property("items", |s| {
                    let items = Sequence::of(s.raw_items.clone());
                    Ok(Some(value(Override::new(items).with_name("alt"))))
                })
                .build(),
        )
        .register::<LineItem>(
            TransformSet::builder::<RawItem>(MappingVariant::Min)
                .value("sku", |r| r.code.to_uppercase())
                .value("quantity", |r| r.qty)
                .build(),
        )
        .register::<LineItem>(
            TransformSet::builder::<RawItem>(MappingVariant::Min)
                .named("alt")
                .value("sku", |r| format!("alt-{}", r.code))
                .value("quantity", |r| r.qty * 10)
                .build(),
        );
    extra(builder).build().unwrap()
}

fn registry() -> Registry {
    registry_with(|builder| builder)
}

fn mapper() -> DomainMapper {
    init_tracing();
    DomainMapper::new(Arc::new(registry()))
}

fn item(sku: &str, quantity: u32) -> LineItem {
    LineItem {
        sku: sku.to_string(),
        quantity,
    }
}

#[test]
fn order_items_are_mapped_recursively() {
    let outcome = mapper().map::<Order, _>(Some(&source(vec![raw("a", 1), raw("b", 2)])));

    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    let order = outcome.into_value().unwrap();
    assert_eq!(order.id, 7);
    assert_eq!(order.items, Some(vec![item("A", 1), item("B", 2)]));
    assert_eq!(order.contact.email, "buyer@example.com");
}

#[test]
fn empty_collection_becomes_absent() {
    let order = mapper()
        .map::<Order, _>(Some(&source(Vec::new())))
        .into_value()
        .unwrap();

    assert_eq!(order.id, 7);
    assert_eq!(order.items, None);
}

#[test]
fn set_property_deduplicates_sequence() {
    let order = mapper()
        .map::<Order, _>(Some(&source(Vec::new())))
        .into_value()
        .unwrap();

    let tags: Vec<_> = order.tags.unwrap().into_iter().collect();
    assert_eq!(tags, vec!["gift".to_string(), "rush".to_string()]);
}

#[test]
fn min_set_without_id_keeps_default() {
    let order = mapper()
        .map_with::<Order, _>(
            Some(&source(vec![raw("a", 1)])),
            &MappingSelector::variant(MappingVariant::Min),
        )
        .into_value()
        .unwrap();

    assert_eq!(order.id, 0);
    assert_eq!(order.items, Some(vec![item("A", 1)]));
    assert_eq!(order.tags, None);
}

#[test]
fn override_name_reaches_collection_elements() {
    let order = mapper()
        .map_with::<Order, _>(Some(&source(vec![raw("a", 1), raw("b", 2)])), &MappingSelector::named("alt"))
        .into_value()
        .unwrap();

    assert_eq!(order.items, Some(vec![item("alt-a", 10), item("alt-b", 20)]));
}

#[test]
fn override_wrapper_on_source_selects_named_set() {
    let wrapped = Override::new(source(vec![raw("c", 3)])).with_name("alt");
    let order = mapper().map::<Order, _>(Some(&wrapped)).into_value().unwrap();

    assert_eq!(order.items, Some(vec![item("alt-c", 30)]));
    assert_eq!(order.tags, None);
}

#[test]
fn mapping_is_idempotent() {
    let mapper = mapper();
    let input = source(vec![raw("a", 1), raw("b", 2)]);

    let first = mapper.map::<Order, _>(Some(&input)).into_value();
    let second = mapper.map::<Order, _>(Some(&input)).into_value();
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn absent_source_and_unknown_pair_yield_absent() {
    let mapper = mapper();

    let absent = mapper.map::<Order, OrderSource>(None);
    assert!(absent.value.is_none());
    assert!(absent.error.is_none());

    let unknown = mapper.map::<Order, _>(Some(&"not an order".to_string()));
    assert!(unknown.value.is_none());
    assert!(unknown.error.is_some());
}

#[test]
fn mixed_collection_is_decided_per_element() {
    let registry = registry_with(|builder| {
        builder.register::<Order>(
            TransformSet::builder::<OrderSource>(MappingVariant::Full)
                .named("mixed")
                .property("items", |s| {
                    let mut items = Sequence::new();
                    items.push(LineItem {
                        sku: "KEEP".to_string(),
                        quantity: 5,
                    });
                    items.push(s.raw_items[0].clone());
                    items.push(42u32);
                    Ok(Some(value(items)))
                })
                .build(),
        )
    });
    let mapper = DomainMapper::new(Arc::new(registry));

    let outcome =
        mapper.map_with::<Order, _>(Some(&source(vec![raw("a", 1)])), &MappingSelector::named("mixed"));

    let items = outcome.value.as_ref().unwrap().items.clone().unwrap();
    assert_eq!(items, vec![item("KEEP", 5), item("A", 1)]);

    let dropped: Vec<_> = outcome
        .warnings
        .iter()
        .filter(|w| matches!(w.error, PropertyError::ElementUnmapped { index: 2, .. }))
        .collect();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].path, "items[2]");
}

#[test]
fn bulk_parallel_matches_sequential() {
    init_tracing();
    let sources: Vec<OrderSource> = (0..16)
        .map(|n| OrderSource {
            order_id: n,
            ..source(vec![raw("x", n as u32)])
        })
        .collect();

    let parallel = DomainMapper::with_pool(
        Arc::new(registry()),
        EngineConfig::default(),
        Arc::new(WorkerPool::new(4).unwrap()),
    );
    let sequential = DomainMapper::with_pool(
        Arc::new(registry()),
        EngineConfig::from_yaml_str("parallel_bulk: false").unwrap(),
        Arc::new(WorkerPool::new(1).unwrap()),
    );

    let a: Vec<_> = parallel
        .map_many::<Order, _>(&sources)
        .into_iter()
        .map(|o| o.into_value())
        .collect();
    let b: Vec<_> = sequential
        .map_many::<Order, _>(&sources)
        .into_iter()
        .map(|o| o.into_value())
        .collect();

    assert_eq!(a, b);
    for (n, order) in a.iter().enumerate() {
        assert_eq!(order.as_ref().unwrap().id, n as u64);
    }
}

#[test]
fn report_summarizes_batch() {
    let mapper = mapper();
    let inputs = vec![source(vec![raw("a", 1)]), source(Vec::new())];
    let mut outcomes = mapper.map_many::<Order, _>(&inputs);
    outcomes.push(mapper.map::<Order, OrderSource>(None));

    let reporter = MappingReporter::new().with_format(ReportFormat::Json);
    let report = reporter.generate_report(&outcomes);
    assert_eq!(report.summary.mapped, 2);
    assert_eq!(report.summary.absent, 1);

    let json = reporter.format_report(&report).unwrap();
    assert!(json.contains("\"mapped\": 2"));
}

#[test]
fn registry_audit_is_clean() {
    let report = audit(&registry());
    assert!(report.is_valid, "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}
