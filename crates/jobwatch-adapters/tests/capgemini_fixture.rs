use std::path::{Path, PathBuf};

use jobwatch_adapters::{
    html_file_adapter, parse_positions, AdapterKind, ListingRules, SourceAdapter, SourceConfig,
    CAPGEMINI_LABELS, CAPGEMINI_SELECTOR, CAPGEMINI_TEXT_SEPARATOR,
};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/capgemini/listing.html")
        .canonicalize()
        .expect("capgemini fixture")
}

fn expected_titles() -> Vec<String> {
    ["Java Developer", "Cloud Engineer (Azure)", "Analityk Biznesowy", "Java Developer"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn capgemini_fixture_parses_titles_in_page_order() {
    let html = std::fs::read_to_string(fixture_path()).expect("read fixture");
    let rules = ListingRules {
        selector: CAPGEMINI_SELECTOR.to_string(),
        strip_text: CAPGEMINI_LABELS.iter().map(|s| s.to_string()).collect(),
        text_separator: CAPGEMINI_TEXT_SEPARATOR,
    };
    assert_eq!(parse_positions(&html, &rules).expect("parse"), expected_titles());
}

#[tokio::test]
async fn capgemini_fixture_through_file_adapter() {
    let source = SourceConfig {
        source_id: "Capgemini".to_string(),
        display_name: "Capgemini".to_string(),
        enabled: true,
        adapter: AdapterKind::HtmlFile,
        listing_url: fixture_path().display().to_string(),
        selector: Some(CAPGEMINI_SELECTOR.to_string()),
        strip_text: vec!["Nazwa stanowiska".to_string()],
    };
    let titles = html_file_adapter()
        .fetch_positions(&source)
        .await
        .expect("fetch from file");
    assert_eq!(titles, expected_titles());
}
