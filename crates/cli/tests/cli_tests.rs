// End-to-end tests of the `bgtcheck` binary: outputs on disk and exit codes.

use std::path::Path;
use std::process::{Command, Output};

const CONFIG: &str = r#"
name = "cli"

[sources.areas]
file = "wijken.csv"

[sources.rules]
file = "controletabel.csv"

[sources.bgt]
folder = "bgt"

[sources.bor.groenobjecten]
file = "groen.csv"

[sources.exclude]
folder = "import"

[output]
directory = "uit"
unmatched = true
"#;

const RULES: &str = "Objecttype;TYPE;ObjectType;bgttype\n\
                     Groenobject;Gras;begroeid terreindeel;grasland overig\n";

fn bgtcheck() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bgtcheck"));
    cmd.env_remove("BGTCHECK_CONFIG");
    cmd.env("RUST_LOG", "off");
    cmd
}

fn fixture(dir: &Path, rules: &str) {
    std::fs::write(dir.join("bgtcheck.toml"), CONFIG).unwrap();
    std::fs::write(dir.join("controletabel.csv"), rules).unwrap();
    std::fs::write(
        dir.join("wijken.csv"),
        "naam;geometry\n\
         Centrum;POLYGON((0 0, 50 0, 50 50, 0 50, 0 0))\n\
         Haven;POLYGON((100 100, 150 100, 150 150, 100 150, 100 100))\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("groen.csv"),
        "guid;type;geometry\n\
         {G-1};Gras;POLYGON((10 10, 20 10, 20 20, 10 20, 10 10))\n\
         {G-2};Gras;POLYGON((30 30, 35 30, 35 35, 30 35, 30 30))\n",
    )
    .unwrap();
    std::fs::create_dir(dir.join("bgt")).unwrap();
    std::fs::write(
        dir.join("bgt/bgt_begroeidterreindeel.csv"),
        "lokaalid;bgtfysvkn;geometry\n\
         B1;grasland overig;POLYGON((10 10, 20 10, 20 20, 10 20, 10 10))\n",
    )
    .unwrap();
    std::fs::create_dir(dir.join("import")).unwrap();
    std::fs::write(dir.join("import/vorige.csv"), "guid\n{G-2}\n").unwrap();
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn run_writes_outputs_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), RULES);

    let out = bgtcheck().arg("run").arg(dir.path().join("bgtcheck.toml")).output().unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("1 pairs: 1 overlaps"), "{}", stderr(&out));

    let uit = dir.path().join("uit");
    for name in [
        "overlaps.gpkg",
        "invalid_types.gpkg",
        "manual_buckets.gpkg",
        "unmatched.gpkg",
        "import_groenobjecten.xlsx",
        "summary.json",
    ] {
        assert!(uit.join(name).is_file(), "missing {name}");
    }

    let check = bgtcheck()
        .args(["check-output", "--strict"])
        .arg(dir.path().join("bgtcheck.toml"))
        .output()
        .unwrap();
    assert!(check.status.success(), "{}", stderr(&check));
    assert!(stderr(&check).contains("output ok"));
}

#[test]
fn config_from_env_and_json_summary() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), RULES);

    let out = bgtcheck()
        .args(["run", "--json", "--exclude-guids", "--output-dir"])
        .arg(dir.path().join("elders"))
        .env("BGTCHECK_CONFIG", dir.path().join("bgtcheck.toml"))
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["summary"]["excluded"], 1);
    assert_eq!(json["meta"]["exclude_guids"], true);
    assert!(dir.path().join("elders/summary.json").is_file());
}

#[test]
fn zero_matches_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), RULES);

    let out = bgtcheck()
        .args(["run", "--area", "Haven"])
        .arg(dir.path().join("bgtcheck.toml"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(stderr(&out).contains("warning: no matches found"), "{}", stderr(&out));
}

#[test]
fn unknown_area_exits_with_area_code() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), RULES);

    let out = bgtcheck()
        .args(["run", "--area", "Nergens"])
        .arg(dir.path().join("bgtcheck.toml"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(4));
    assert!(stderr(&out).contains("Nergens"));
    assert!(!dir.path().join("uit").exists());
}

#[test]
fn malformed_rule_table_exits_with_rule_code() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), &format!("{RULES}Groenobject;Gras;kasteel;toren\n"));

    let out = bgtcheck().arg("validate").arg(dir.path().join("bgtcheck.toml")).output().unwrap();
    assert_eq!(out.status.code(), Some(5));
    assert!(stderr(&out).contains("row 3"), "{}", stderr(&out));
}

#[test]
fn missing_config_exits_with_config_code() {
    let out = bgtcheck()
        .arg("validate")
        .env("BGTCHECK_CONFIG", "/nonexistent/bgtcheck.toml")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn validate_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), RULES);
    let out = bgtcheck().arg("validate").arg(dir.path().join("bgtcheck.toml")).output().unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("config ok: 'cli', 1 BOR categories, 1 rule combinations, 2 districts"));
}

#[test]
fn long_version_names_engine_and_target() {
    let out = bgtcheck().arg("--version").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("engine:  bgtcheck-recon"), "{text}");
    assert!(text.contains("target:  "), "{text}");
    assert!(!text.contains("()"), "commit missing: {text}");
}
