mod common;

use std::path::Path;

use bulk_import_rs::{config::ImportConfig, item::memory::MemoryStore};
use common::{init_logger, job, write_named, write_random};

fn config(domain: &str, dir: &Path) -> ImportConfig {
    let mut config = ImportConfig::from_json(&format!(
        r#"{{
            "domain": "{}",
            "location": ".",
            "format": "xml",
            "max-size": 4,
            "workers": 3,
            "processors": {{ "text": "text" }}
        }}"#,
        domain
    ))
    .unwrap();
    config.location = dir.to_path_buf();
    config
}

fn products(prefix: &str, count: usize) -> String {
    let mut document = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<products>\n");
    for index in 0..count {
        document.push_str(&format!(
            r#"  <productitem ref="{prefix}-{index}">
    <label>Product {index} &amp; more</label>
    <text>
      <entry text.type="name" text.languageid="en"><text.content>Name {index}</text.content></entry>
    </text>
  </productitem>
"#
        ));
    }
    document.push_str("</products>\n");
    document
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn files_are_imported_by_a_pool_of_workers() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    for prefix in ["a", "b", "c", "d", "e", "f"] {
        write_random(dir.path(), "xml", &products(prefix, 5));
    }
    let store = MemoryStore::new();

    let execution = job(config("product", dir.path()), &store).run().await.unwrap();

    assert!(execution.is_success());
    assert_eq!(execution.files.len(), 6);
    assert_eq!(execution.stats.total, 30);
    assert_eq!(store.items("product").len(), 30);

    let product = store.find("product", "c-3").unwrap();
    assert_eq!(product.label, "Product 3 & more");
    let texts: Vec<_> = product.list_items_of("text").collect();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].ref_key, "en");
    assert_eq!(texts[0].ref_fields["text.content"], "Name 3");

    let mut paths: Vec<_> = execution.files.iter().map(|file| file.path.clone()).collect();
    paths.sort();
    assert_eq!(
        paths,
        execution
            .files
            .iter()
            .map(|file| file.path.clone())
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn malformed_file_does_not_stop_its_siblings() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    write_named(dir.path(), "1-good.xml", &products("first", 3));
    write_named(
        dir.path(),
        "2-broken.xml",
        r#"<products><productitem ref="x1"><label>x</name></productitem></products>"#,
    );
    write_named(dir.path(), "3-good.xml", &products("third", 3));
    let store = MemoryStore::new();

    let execution = job(config("product", dir.path()), &store).run().await.unwrap();

    assert!(!execution.is_success());
    assert!(execution.files[0].is_success());
    assert!(execution.files[1].is_aborted());
    assert!(execution.files[2].is_success());
    assert_eq!(store.items("product").len(), 6);
    assert!(store.find("product", "x1").is_none());
    assert!(execution.ensure_complete().is_err());
}

#[test]
fn aborted_file_reports_the_records_it_attempted() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    write_named(
        dir.path(),
        "products.xml",
        r#"<products>
  <productitem ref="p1"/>
  <productitem ref="p2"/>
  <productitem ref="p3"><label>x</name></productitem>
</products>"#,
    );
    let mut config = config("product", dir.path());
    config.max_size = 1;
    let store = MemoryStore::new();

    let execution = job(config, &store).run_blocking().unwrap();

    assert_eq!(store.items("product").len(), 2);
    let report = &execution.files[0];
    assert!(report.is_aborted());
    assert_eq!(report.stats.total, 2);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(execution.stats.total, 2);
    assert!(execution.notification().unwrap().contains("in 2 record(s)"));
}

#[test]
fn sweep_removes_children_missing_from_the_file() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("catalog", dir.path());
    config.sweep_children = true;
    let store = MemoryStore::new();

    write_named(
        dir.path(),
        "catalogs.xml",
        r#"<catalogs>
  <catalogitem ref="root"><label>Root</label></catalogitem>
  <catalogitem ref="a" parent="root"/>
  <catalogitem ref="b" parent="root"/>
  <catalogitem ref="c" parent="root"/>
  <catalogitem ref="c1" parent="c"/>
</catalogs>"#,
    );
    assert!(job(config.clone(), &store).run_blocking().unwrap().is_success());
    assert_eq!(store.items("catalog").len(), 5);

    write_named(
        dir.path(),
        "catalogs.xml",
        r#"<catalogs>
  <catalogitem ref="root"><label>Root</label></catalogitem>
  <catalogitem ref="a" parent="root"/>
  <catalogitem ref="b" parent="root"><label>Bee</label></catalogitem>
</catalogs>"#,
    );
    assert!(job(config, &store).run_blocking().unwrap().is_success());

    let mut codes: Vec<_> = store
        .items("catalog")
        .into_iter()
        .map(|item| item.code)
        .collect();
    codes.sort();
    assert_eq!(codes, vec!["a", "b", "root"]);
    assert_eq!(store.find("catalog", "b").unwrap().label, "Bee");
}
