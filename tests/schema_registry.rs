use schemaql::EngineError;
use schemaql::namespace::NamespaceMap;
use schemaql::schema::{Registry, SchemaParser, SourceBinding};

fn setup() -> Registry {
    SchemaParser::default()
        .parse_file("tests/data/schema.graphql")
        .expect("schema")
}

#[test]
fn first_definition_wins() {
    let registry = setup();
    assert_eq!(registry.len(), 7);
    let customer = registry.get("MarketingCustomer").expect("customer");
    assert!(customer.field("orders").is_some());
    assert!(customer.field("duplicate").is_none());
    assert!(customer.log());
}

#[test]
fn directives_before_and_after_the_body() {
    let registry = setup();
    let campaign = registry.get("MarketingCampaign").expect("campaign");
    assert_eq!(campaign.source(), &SourceBinding::File("missing.campaign.json".into()));
    let directives: Vec<(&str, &str)> = campaign.directives().iter().map(|d| (d.name(), d.arguments())).collect();
    assert_eq!(
        directives,
        vec![("source", r#"file: "missing.campaign.json""#), ("cached", "seconds: 60")]
    );
    // the field directive does not leak into the type, nor its argument into the fields
    let fields: Vec<&str> = campaign.fields().iter().map(|f| f.name()).collect();
    assert_eq!(fields, vec!["id", "title"]);

    let partner = registry.get("ExternalPartner").expect("partner");
    assert_eq!(partner.source().kind(), "api");
    assert_eq!(partner.source().locator(), Some("https://partners.example.com/api"));
    assert_eq!(registry.get("Segment").expect("segment").source(), &SourceBinding::Unknown);
    assert_eq!(registry.get("Marketing").expect("marketing").params(), Some(&["id".to_string()][..]));
}

#[test]
fn types_without_a_body_end_at_their_directives() {
    let registry = SchemaParser::default().parse(
        r#"
        type Marketing @params(fields: ["id"])
        type MarketingCustomer @source(file: "c.json") {
          id: ID!
          name: String
        }
        "#,
    );
    assert_eq!(registry.len(), 2);
    let marketing = registry.get("Marketing").expect("marketing");
    assert!(marketing.fields().is_empty());
    assert_eq!(marketing.source(), &SourceBinding::Unknown);
    assert_eq!(marketing.params(), Some(&["id".to_string()][..]));
    let customer = registry.get("MarketingCustomer").expect("customer");
    assert_eq!(customer.namespace(), Some("marketing"));
    assert_eq!(customer.source(), &SourceBinding::File("c.json".into()));
    assert_eq!(customer.fields().len(), 2);
    assert_eq!(customer.bare_name(), "Customer");
}

#[test]
fn namespaces_from_params_prefix_and_references() {
    let registry = setup();
    let namespace = |name: &str| registry.get(name).and_then(|t| t.namespace()).map(str::to_string);
    assert_eq!(namespace("MarketingOrder").as_deref(), Some("marketing"));
    assert_eq!(namespace("FinanceEmployee").as_deref(), Some("finance"));
    assert_eq!(namespace("ExternalPartner").as_deref(), Some("external"));
    // two marketing references against one finance reference
    assert_eq!(namespace("Segment").as_deref(), Some("marketing"));

    let map = NamespaceMap::from_registry(&registry);
    let marketing: Vec<&str> = map.types_in("Marketing").expect("marketing").iter().map(String::as_str).collect();
    assert_eq!(
        marketing,
        vec!["Marketing", "MarketingCampaign", "MarketingCustomer", "MarketingOrder", "Segment"]
    );
    assert_eq!(map.len(), 3);
}

#[test]
fn reference_votes_break_ties_by_first_reference() {
    let registry = SchemaParser::default().parse(
        "
        type FinanceLedger { id: ID }
        type ExternalFeed { id: ID }
        type Link { ledger: FinanceLedger feed: ExternalFeed }
        type Orphan { id: ID name: String }
        ",
    );
    assert_eq!(registry.get("Link").and_then(|t| t.namespace()), Some("finance"));
    assert_eq!(registry.get("Orphan").and_then(|t| t.namespace()), None);
}

#[test]
fn configured_namespaces_drive_prefix_inference() {
    let registry = SchemaParser::new(&["sales"]).parse("type SalesLead { id: ID } type MarketingCustomer { id: ID }");
    assert_eq!(registry.get("SalesLead").and_then(|t| t.namespace()), Some("sales"));
    assert_eq!(registry.get("MarketingCustomer").and_then(|t| t.namespace()), None);
    assert_eq!(registry.known_namespaces(), &["sales".to_string()]);
}

#[test]
fn malformed_directives_leave_attributes_unset() {
    let registry = SchemaParser::default().parse(
        r#"
        type MarketingLead @source(path: "lead.json") @params(columns: 1) @db(entity: "lead") { id: ID }
        "#,
    );
    let lead = registry.get("MarketingLead").expect("lead");
    assert_eq!(lead.source(), &SourceBinding::Db("lead".into()));
    assert!(lead.params().is_none());
    assert_eq!(lead.directives().len(), 3);
}

#[test]
fn unreadable_schema_files_fail() {
    let error = SchemaParser::default()
        .parse_file("tests/data/no-such-schema.graphql")
        .expect_err("missing");
    assert!(matches!(error, EngineError::SchemaParse(_)));
    assert!(!error.is_caller_error());
}
