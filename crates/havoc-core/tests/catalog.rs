use havoc_core::catalog::{parse_module, DirCatalog, MemoryCatalog, ModuleCatalog};
use havoc_core::difficulty::Difficulty;
use havoc_core::module::Module;
use havoc_core::version::VersionRange;

const WEB_SERVER: &str = r#"
multi-vuln = true
difficulty = "medium"

[[vulnerability]]
name = "NONE"
description = "runs a clean web server"

[[vulnerability]]
name = "OUTDATED_APACHE"
description = "installs a legacy apache build"
provides = "apache"
version = "2.2.0"
difficulty = "easy"
link = "https://example.com/apache-2.2"
cmd-modifies = ["apachectl"]

[[vulnerability.os]]
type = "linux"
flavor = "ubuntu"
version = ">=18.04"

[[vulnerability]]
name = "PHP_UPLOAD"
description = "unrestricted file upload endpoint"
difficulty = "hard"
cmd-uses = ["php"]

[[vulnerability.dependency]]
provides = "php"
range = "<7.0"

[[vulnerability.dependency]]
any = [
    { provides = "mysql" },
    { provides = "postgres", range = ">=9.0" },
]
"#;

#[test]
fn parses_full_module_definition() {
    let module = parse_module("web_server", WEB_SERVER).unwrap();
    assert_eq!(module.name(), "web_server");
    assert!(module.multi_vuln());
    assert_eq!(module.difficulty_limit(), Some(Difficulty::Medium));
    assert_eq!(module.vulnerabilities().count(), 3);

    let apache = module.vulnerability("OUTDATED_APACHE").unwrap();
    assert_eq!(apache.provides(), Some("apache"));
    assert!(apache.is_in_range(&VersionRange::parse("<2.4").unwrap()));
    assert_eq!(apache.cmd_modifies(), ["apachectl"]);
    assert_eq!(apache.link(), Some("https://example.com/apache-2.2"));

    let upload = module.vulnerability("PHP_UPLOAD").unwrap();
    assert_eq!(upload.dependencies().len(), 2);
    assert!(!upload.dependencies()[0].is_or());
    assert!(upload.dependencies()[1].is_or());
    assert_eq!(upload.dependencies()[1].choices()[0].provides(), "mysql");
}

#[test]
fn version_without_provides_is_rejected() {
    let bad = r#"
[[vulnerability]]
name = "X"
version = "1.0"
"#;
    assert!(parse_module("bad", bad).is_err());
}

#[test]
fn malformed_toml_is_a_catalog_error() {
    let err = parse_module("bad", "multi-vuln = [").unwrap_err();
    assert!(err.to_string().contains("bad"));
}

#[test]
fn dir_catalog_reads_files_and_lists_sorted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("web_server.toml"), WEB_SERVER).unwrap();
    std::fs::write(
        dir.path().join("ftp.toml"),
        "[[vulnerability]]\nname = \"ANON_LOGIN\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let catalog = DirCatalog::new(dir.path());
    assert!(catalog.exists("web_server"));
    assert!(!catalog.exists("notes"));
    assert_eq!(catalog.list(), ["ftp", "web_server"]);

    let module = catalog.load("web_server").unwrap();
    assert_eq!(module.vulnerabilities().count(), 3);
    assert!(catalog.load("missing").is_err());
}

#[test]
fn stubs_shadow_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("web_server.toml"),
        "[[vulnerability]]\nname = \"FROM_FILE\"\n",
    )
    .unwrap();

    let mut catalog = DirCatalog::new(dir.path());
    catalog.add_stub("web_server", "[[vulnerability]]\nname = \"FROM_STUB\"\n");
    catalog.add_stub("phantom", "[[vulnerability]]\nname = \"GHOST\"\n");

    let module = catalog.load("web_server").unwrap();
    assert!(module.vulnerability("FROM_STUB").is_some());
    assert!(module.vulnerability("FROM_FILE").is_none());

    assert!(catalog.exists("phantom"));
    assert_eq!(catalog.list(), ["phantom", "web_server"]);
}

#[test]
fn memory_catalog_hands_out_clones() {
    let mut catalog = MemoryCatalog::new();
    catalog.insert(Module::new("ssh"));

    let mut loaded = catalog.load("ssh").unwrap();
    loaded.add_exclusion("SOMETHING");
    // The catalog's copy is untouched.
    assert!(catalog.load("ssh").unwrap().exclusions().is_empty());
    assert!(catalog.load("nope").is_err());
}
