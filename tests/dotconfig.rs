use kconfig_core::Kconfig;
use tempfile::TempDir;

async fn load(src: &str) -> (TempDir, Kconfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(&path, src).unwrap();
    let tree = Kconfig::load(&path).await.unwrap();
    (dir, tree)
}

const S1: &str = "config A\n\ttristate \"A\"\nconfig B\n\ttristate \"B\"\n\tselect A if B\n";

#[tokio::test]
async fn s6_write_follows_document_order() {
    let (dir, tree) = load(S1).await;
    let b = tree.lookup("B").unwrap();
    tree.set_value(b, "y").unwrap();

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();
    let written = std::fs::read_to_string(&out).unwrap();

    assert_eq!(
        written,
        "# Automatically generated file; DO NOT EDIT.\nCONFIG_A=y\nCONFIG_B=y\n"
    );
}

#[tokio::test]
async fn s6_round_trip_restores_values() {
    let (dir, tree) = load(S1).await;
    let b = tree.lookup("B").unwrap();
    tree.set_value(b, "y").unwrap();

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();

    let fresh = Kconfig::load(dir.path().join("Kconfig")).await.unwrap();
    fresh.read_dot_config(&out).await.unwrap();
    assert_eq!(fresh.value(fresh.lookup("A").unwrap()), "y");
    assert_eq!(fresh.value(fresh.lookup("B").unwrap()), "y");
}

#[tokio::test]
async fn round_trip_is_idempotent_across_types() {
    let src = "mainmenu \"Test\"\n\
               config B\n\tbool \"B\"\n\tdefault y\n\
               config T\n\ttristate \"T\"\n\
               config I\n\tint \"I\"\n\tdefault 7\n\
               config X\n\thex \"X\"\n\tdefault 0x10\n\
               config S\n\tstring \"S\"\n\tdefault \"with \\\"quotes\\\" and \\\\ slash\"\n";
    let (dir, tree) = load(src).await;
    tree.set_value(tree.lookup("T").unwrap(), "m").unwrap();
    tree.set_value(tree.lookup("I").unwrap(), "42").unwrap();

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();

    let fresh = Kconfig::load(dir.path().join("Kconfig")).await.unwrap();
    fresh.read_dot_config(&out).await.unwrap();

    for name in ["B", "T", "I", "X", "S"] {
        let a = tree.lookup(name).unwrap();
        let b = fresh.lookup(name).unwrap();
        assert_eq!(tree.value(a), fresh.value(b), "mismatch for {name}");
    }

    // Writing the overlaid tree again produces the same bytes.
    let out2 = dir.path().join(".config2");
    fresh.write_dot_config(&out2).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        std::fs::read_to_string(&out2).unwrap()
    );
}

#[tokio::test]
async fn writer_emits_banner_headers_and_not_set_lines() {
    let src = "mainmenu \"My Project\"\nmenu \"Features\"\nconfig A\n\tbool \"A\"\nconfig S\n\tstring \"S\"\n\tdefault \"v\\\"1\\\"\"\nendmenu\n";
    let (dir, tree) = load(src).await;

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();
    let written = std::fs::read_to_string(&out).unwrap();

    assert_eq!(
        written,
        "# Automatically generated file; DO NOT EDIT.\n\
         #\n# My Project\n#\n\
         \n#\n# Features\n#\n\
         # CONFIG_A is not set\n\
         CONFIG_S=\"v\\\"1\\\"\"\n"
    );
}

#[tokio::test]
async fn disabled_and_env_symbols_are_skipped() {
    let src = "config GATE\n\tbool \"gate\"\nconfig DEP\n\tbool \"dep\"\n\tdepends on GATE\nconfig $ARCH\n\tstring \"arch\"\n\tdefault \"um\"\n";
    let (dir, tree) = load(src).await;

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();
    let written = std::fs::read_to_string(&out).unwrap();

    assert!(written.contains("# CONFIG_GATE is not set"));
    assert!(!written.contains("CONFIG_DEP"), "disabled symbol skipped");
    assert!(!written.contains("ARCH"), "$-named symbol skipped");
}

#[tokio::test]
async fn overlay_ignores_unknown_and_mismatched_records() {
    let src = "config A\n\tbool \"A\"\nconfig I\n\tint \"I\"\n\tdefault 3\n";
    let (_dir, tree) = load(src).await;
    let a = tree.lookup("A").unwrap();
    let i = tree.lookup("I").unwrap();

    let overlay = "CONFIG_NO_SUCH=y\nCONFIG_A=y\nCONFIG_I=\"oops\"\n# a free comment\n";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.config");
    std::fs::write(&path, overlay).unwrap();
    tree.read_dot_config(&path).await.unwrap();

    assert_eq!(tree.value(a), "y", "matching record installed");
    assert_eq!(tree.value(i), "3", "string record for int symbol ignored");
}

#[tokio::test]
async fn overlay_downcasts_tristate_record_for_bool() {
    let src = "config A\n\tbool \"A\"\nconfig T\n\ttristate \"T\"\n";
    let (_dir, tree) = load(src).await;
    let a = tree.lookup("A").unwrap();
    let t = tree.lookup("T").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.config");
    std::fs::write(&path, "CONFIG_A=m\nCONFIG_T=m\n").unwrap();
    tree.read_dot_config(&path).await.unwrap();

    assert_eq!(tree.value(a), "y", "bool accepts a tristate record as y");
    assert_eq!(tree.value(t), "m");
}

#[tokio::test]
async fn overlay_not_set_resets_to_n() {
    let src = "config A\n\tbool \"A\"\n\tdefault y\n";
    let (_dir, tree) = load(src).await;
    let a = tree.lookup("A").unwrap();
    assert_eq!(tree.value(a), "y");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.config");
    std::fs::write(&path, "# CONFIG_A is not set\n").unwrap();
    tree.read_dot_config(&path).await.unwrap();
    assert_eq!(tree.value(a), "n");
}

#[tokio::test]
async fn overlay_selects_choice_member() {
    let src = "choice\n\tprompt \"C\"\n\tdefault X\nconfig X\n\tbool \"X\"\nconfig Y\n\tbool \"Y\"\nendchoice\n";
    let (dir, tree) = load(src).await;
    let y = tree.lookup("Y").unwrap();
    tree.set_value(y, "y").unwrap();

    let out = dir.path().join(".config");
    tree.write_dot_config(&out).await.unwrap();

    let fresh = Kconfig::load(dir.path().join("Kconfig")).await.unwrap();
    fresh.read_dot_config(&out).await.unwrap();
    let fy = fresh.lookup("Y").unwrap();
    let fx = fresh.lookup("X").unwrap();
    let choice = fresh.symbol(fx).choice_parent.unwrap();
    assert_eq!(fresh.value(choice), "Y");
    assert_eq!(fresh.value(fy), "y");
    assert_eq!(fresh.value(fx), "n");
}
