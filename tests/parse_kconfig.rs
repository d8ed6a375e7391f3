use std::path::Path;

use kconfig_core::lexer::Lexer;
use kconfig_core::{EntryKind, EnvProvider, Error, Kconfig, MapEnv, ValueType};
use tempfile::TempDir;

const SAMPLE_KCONFIG: &str = r#"
mainmenu "Test Kernel Configuration"

config AUDIT
	bool "Auditing support"
	depends on NET
	default y
	help
	  Enable auditing infrastructure that can be used with another
	  kernel subsystem, such as SELinux.

config NET
	bool "Networking support"
	default y

menuconfig MODULES
	bool "Enable loadable module support"
	help
	  Kernel modules are small pieces of compiled code which can
	  be inserted in the running kernel.

config MODVERSIONS
	bool "Module versioning support"
	depends on MODULES

menu "General setup"

config SYSVIPC
	bool "System V IPC"
	help
	  Inter Process Communication is a suite of library functions.

choice
	prompt "Compiler optimization level"
	default CC_OPTIMIZE_FOR_PERFORMANCE

config CC_OPTIMIZE_FOR_PERFORMANCE
	bool "Optimize for performance (-O2)"

config CC_OPTIMIZE_FOR_SIZE
	bool "Optimize for size (-Os)"

endchoice

config FOO_RANGE
	int "Foo value"
	range 1 100
	default 50

config HAS_FEATURE
	def_bool y

config OPTIONAL_FEATURE
	def_tristate m if MODULES

config NEW_OPT
	bool "New option"
	default OLD_OPT

config OLD_OPT
	bool "Old option"

endmenu
"#;

async fn load(src: &str) -> (TempDir, Kconfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(&path, src).unwrap();
    let tree = Kconfig::load(&path).await.unwrap();
    (dir, tree)
}

async fn load_err(src: &str) -> Error {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(&path, src).unwrap();
    Kconfig::load(&path).await.unwrap_err()
}

#[test]
fn lexer_tokenizes_all_keywords() {
    let line = "config menuconfig choice endchoice comment menu endmenu if endif \
                source mainmenu bool tristate string hex int prompt default \
                def_bool def_tristate depends on select imply visible range \
                help ---help--- option optional";
    let tokens = Lexer::new(line).tokenize();

    use kconfig_core::lexer::TokenKind::*;
    let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
    for expected in [
        &Config,
        &MenuConfig,
        &Choice,
        &EndChoice,
        &CommentKw,
        &Menu,
        &EndMenu,
        &If,
        &EndIf,
        &Source,
        &MainMenu,
        &Bool,
        &Tristate,
        &StringType,
        &Hex,
        &Int,
        &Prompt,
        &Default,
        &DefBool,
        &DefTristate,
        &Depends,
        &On,
        &Select,
        &Imply,
        &Visible,
        &Range,
        &OptionKw,
        &Optional,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?}");
    }
    // `help` and `---help---` both lex as Help.
    assert_eq!(kinds.iter().filter(|k| **k == &Help).count(), 2);
}

#[test]
fn lexer_operators_and_strings() {
    use kconfig_core::lexer::TokenKind::*;
    let tokens = Lexer::new(r#"!(A = B) && C != 'lit' || D"#).tokenize();
    let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Not,
            OpenParen,
            Ident("A".into()),
            Eq,
            Ident("B".into()),
            CloseParen,
            And,
            Ident("C".into()),
            NotEq,
            StringLit("lit".into()),
            Or,
            Ident("D".into()),
            Eof,
        ]
    );

    let tokens = Lexer::new(r#""escaped \" quote""#).tokenize();
    assert_eq!(tokens[0].kind, StringLit("escaped \" quote".into()));

    let tokens = Lexer::new(r#""never closed"#).tokenize();
    assert!(matches!(tokens[0].kind, BadString(_)));
}

#[tokio::test]
async fn parses_sample_tree() {
    let (_dir, tree) = load(SAMPLE_KCONFIG).await;

    let root = tree.symbol(tree.root());
    assert_eq!(root.name, "Test Kernel Configuration");

    for name in [
        "AUDIT",
        "NET",
        "MODULES",
        "MODVERSIONS",
        "SYSVIPC",
        "CC_OPTIMIZE_FOR_PERFORMANCE",
        "CC_OPTIMIZE_FOR_SIZE",
        "FOO_RANGE",
        "HAS_FEATURE",
        "OPTIONAL_FEATURE",
        "NEW_OPT",
        "OLD_OPT",
    ] {
        assert!(tree.lookup(name).is_some(), "symbol {name} should exist");
    }

    let audit = tree.lookup("AUDIT").unwrap();
    assert_eq!(tree.symbol(audit).value_type, ValueType::Bool);
    assert_eq!(tree.state(audit).prompt.as_deref(), Some("Auditing support"));

    let has_feature = tree.lookup("HAS_FEATURE").unwrap();
    assert_eq!(tree.symbol(has_feature).value_type, ValueType::Bool);
    // def_bool has no prompt, so the symbol is hidden and driven.
    assert!(tree.state(has_feature).prompt.is_none());
    assert_eq!(tree.value(has_feature), "y");

    let menu = tree
        .universe()
        .iter()
        .copied()
        .find(|&id| tree.symbol(id).kind == EntryKind::Menu)
        .expect("menu entry");
    assert_eq!(tree.symbol(menu).name, "General setup");
    assert!(
        tree.symbol(menu)
            .children
            .contains(&tree.lookup("SYSVIPC").unwrap())
    );
}

#[tokio::test]
async fn help_strips_first_line_indent() {
    let src = "config A\n\tbool \"A\"\n\thelp\n\t  line one\n\t    indented more\n\n\t  back\n\nconfig B\n\tbool \"B\"\n";
    let (_dir, tree) = load(src).await;

    let a = tree.lookup("A").unwrap();
    let help = tree.symbol(a).help.clone().expect("help text");
    assert_eq!(help, "line one\n  indented more\n\nback");

    // The shallower line terminated the block and still parsed.
    assert!(tree.lookup("B").is_some());
}

#[tokio::test]
async fn menuconfig_adopts_hanging_if_block() {
    let src = "menuconfig M\n\tbool \"M\"\nif M\nconfig K\n\tbool \"K\"\nendif\n";
    let (_dir, tree) = load(src).await;

    let m = tree.lookup("M").unwrap();
    let k = tree.lookup("K").unwrap();

    // K is a flat structural child of M.
    assert!(tree.symbol(m).children.contains(&k));
    assert_eq!(tree.symbol(k).parent, Some(m));
    assert!(tree.symbol(k).depends_on.contains(&m));

    // Visibility follows M.
    assert!(!tree.state(k).is_visible);
    tree.set_value(m, "y").unwrap();
    assert!(tree.state(k).is_visible);
    tree.set_value(m, "n").unwrap();
    assert!(!tree.state(k).is_visible);
}

#[tokio::test]
async fn menuconfig_adopts_depends_sibling() {
    let src = "menuconfig M\n\tbool \"M\"\nconfig K\n\tbool \"K\"\n\tdepends on M\n";
    let (_dir, tree) = load(src).await;

    let m = tree.lookup("M").unwrap();
    let k = tree.lookup("K").unwrap();
    assert_eq!(tree.symbol(k).parent, Some(m));
    assert!(tree.symbol(m).children.contains(&k));
}

#[tokio::test]
async fn choice_type_mismatch_is_fatal() {
    let err = load_err(
        "choice\n\tprompt \"C\"\nconfig X\n\tbool \"X\"\nconfig Y\n\ttristate \"Y\"\nendchoice\n",
    )
    .await;
    assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn choice_rejects_non_config_members() {
    let err = load_err(
        "choice\n\tprompt \"C\"\nmenu \"nested\"\nendmenu\nconfig X\n\tbool \"X\"\nendchoice\n",
    )
    .await;
    assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn unpaired_terminator_is_fatal() {
    let err = load_err("config A\n\tbool \"A\"\nendmenu\n").await;
    assert!(matches!(err, Error::Parse { .. }), "got {err:?}");

    let err = load_err("menu \"M\"\nconfig A\n\tbool \"A\"\n").await;
    assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn unquoted_prompt_is_fatal() {
    let err = load_err("menu General\nendmenu\n").await;
    assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn source_parses_into_same_parent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(
        dir.path().join("sub/Kconfig"),
        "config FROM_SUB\n\tbool \"from sub\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("Kconfig"),
        "menu \"Top\"\nsource \"sub/Kconfig\"\nconfig AFTER\n\tbool \"after\"\nendmenu\n",
    )
    .unwrap();

    let tree = Kconfig::load(dir.path().join("Kconfig")).await.unwrap();
    let sub = tree.lookup("FROM_SUB").unwrap();
    let menu = tree.symbol(sub).parent.unwrap();
    assert_eq!(tree.symbol(menu).kind, EntryKind::Menu);
    assert!(tree.symbol(menu).children.contains(&tree.lookup("AFTER").unwrap()));
}

#[tokio::test]
async fn missing_source_is_kept_without_children() {
    let (_dir, tree) = load("source \"does/not/exist\"\nconfig A\n\tbool \"A\"\n").await;
    assert!(tree.lookup("A").is_some());
}

#[tokio::test]
async fn env_interpolation_in_quoted_regions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(&path, "menu \"Board $BOARD setup\"\nendmenu\n").unwrap();

    let env = MapEnv::with([("BOARD".to_string(), "frodo".to_string())]);
    let tree = Kconfig::load_with(&path, 4, &env).await.unwrap();
    let menu = tree
        .universe()
        .iter()
        .copied()
        .find(|&id| tree.symbol(id).kind == EntryKind::Menu)
        .unwrap();
    assert_eq!(tree.symbol(menu).name, "Board frodo setup");

    let empty = MapEnv::new();
    let err = Kconfig::load_with(&path, 4, &empty).await.unwrap_err();
    assert!(matches!(err, Error::Env { ref var, .. } if var == "BOARD"), "got {err:?}");
}

#[tokio::test]
async fn option_env_exports_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(
        &path,
        "config $SRCARCH\n\tstring \"arch\"\n\tdefault \"riscv\"\n\toption env=SRCARCH\n",
    )
    .unwrap();

    let env = MapEnv::new();
    let _tree = Kconfig::load_with(&path, 4, &env).await.unwrap();
    assert_eq!(env.get("SRCARCH").as_deref(), Some("riscv"));
}

#[tokio::test]
async fn option_env_respects_existing_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Kconfig");
    std::fs::write(
        &path,
        "config $SRCARCH\n\tstring \"arch\"\n\tdefault \"riscv\"\n\toption env=SRCARCH\n",
    )
    .unwrap();

    let env = MapEnv::with([("SRCARCH".to_string(), "x86".to_string())]);
    let _tree = Kconfig::load_with(&path, 4, &env).await.unwrap();
    assert_eq!(env.get("SRCARCH").as_deref(), Some("x86"));
}

#[tokio::test]
async fn bad_expression_is_localized_not_fatal() {
    // Unknown identifier: the depends expression becomes null and the
    // symbol stays enabled.
    let (_dir, tree) = load("config A\n\tbool \"A\"\n\tdepends on NO_SUCH_SYMBOL\n").await;
    let a = tree.lookup("A").unwrap();
    assert!(tree.state(a).is_enable);
    assert!(tree.symbol(a).depends_on.is_empty());
}

fn _assert_send<T: Send>(_: T) {}

#[test]
fn load_future_is_send() {
    _assert_send(Kconfig::load(Path::new("Kconfig")));
}

#[tokio::test]
async fn multiple_depends_are_conjoined() {
    let src = "config A\n\tbool \"A\"\nconfig B\n\tbool \"B\"\nconfig C\n\tbool \"C\"\n\tdepends on A\n\tdepends on B\n";
    let (_dir, tree) = load(src).await;
    let a = tree.lookup("A").unwrap();
    let b = tree.lookup("B").unwrap();
    let c = tree.lookup("C").unwrap();

    assert!(tree.symbol(c).depends_on.contains(&a));
    assert!(tree.symbol(c).depends_on.contains(&b));
    assert!(!tree.state(c).is_enable);
    tree.set_value(a, "y").unwrap();
    assert!(!tree.state(c).is_enable, "A && B still n");
    tree.set_value(b, "y").unwrap();
    assert!(tree.state(c).is_enable);
}
