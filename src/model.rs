use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use regex::RegexBuilder;

use crate::error::{Location, Result};
use crate::expr::Expr;
use crate::tri::Tri;

/// Handle into the symbol arena. All cross-references between entries go
/// through handles so the graph can be cyclic without ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    MainMenu,
    Menu,
    MenuConfig,
    Config,
    Choice,
    Comment,
    If,
    Source,
}

impl EntryKind {
    /// Kinds that carry a configurable value and participate in choice,
    /// default, and reverse-dependency handling.
    pub fn is_config_like(self) -> bool {
        matches!(
            self,
            EntryKind::Config | EntryKind::MenuConfig | EntryKind::Choice
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Invalid,
    Bool,
    Tristate,
    String,
    Int,
    Hex,
}

impl ValueType {
    pub fn is_boolish(self) -> bool {
        matches!(self, ValueType::Bool | ValueType::Tristate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Invalid => "invalid",
            ValueType::Bool => "bool",
            ValueType::Tristate => "tristate",
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Hex => "hex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Type,
    Prompt,
    Default,
    DependsOn,
    Select,
    Imply,
    VisibleIf,
    Range,
    Help,
    Option,
    Optional,
}

/// One attribute line of an entry, kept in source order.
///
/// `value` holds the payload text: the prompt string, the default expression
/// text, the select/imply target name, or the `option` body. Compiled
/// expressions are attached during graph building; per-evaluation condition
/// results live in [`SymbolState::attr_conditions`].
#[derive(Debug, Default)]
pub struct Attribute {
    pub(crate) kind_tag: Option<AttrKind>,
    pub value: String,
    pub value_type: ValueType,
    pub low: Option<String>,
    pub high: Option<String>,
    pub condition: Option<String>,
    pub condition_expr: Option<Expr>,
    pub value_expr: Option<Expr>,
    pub low_expr: Option<Expr>,
    pub high_expr: Option<Expr>,
    pub reverse_dep: Option<SymbolId>,
    pub line: u32,
}

impl Attribute {
    pub fn new(kind: AttrKind, line: u32) -> Self {
        Self {
            kind_tag: Some(kind),
            line,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> AttrKind {
        self.kind_tag.expect("attribute without kind")
    }
}

/// Mutable, evaluation-time state of a symbol. Kept behind a lock of its
/// own so a layer sweep can write disjoint symbols while reading others.
#[derive(Debug, Default, Clone)]
pub struct SymbolState {
    /// Effective value after clamping.
    pub value: String,
    /// Last explicitly installed value: defaults pass, hidden-symbol
    /// driving, a user edit, or a `.config` overlay. The clamp recomputes
    /// `value` from this on every pass.
    pub base: String,
    pub prompt: Option<String>,
    pub default: Option<String>,
    pub is_enable: bool,
    pub is_visible: bool,
    pub is_filtered: bool,
    pub is_selected: bool,
    pub is_expanded: bool,
    /// Validation error recorded on the symbol instead of thrown.
    pub invalid: Option<String>,
    /// Condition result per attribute, same order as `Symbol::attributes`.
    pub attr_conditions: Vec<Tri>,
}

/// One entry of the tree: menu, config, choice, comment, or the synthetic
/// const symbols the expression compiler interns for string literals.
#[derive(Debug)]
pub struct Symbol {
    pub kind: EntryKind,
    /// Identifier for configs and choices; the literal prompt for
    /// menu-like kinds; the literal text for const symbols.
    pub name: String,
    pub value_type: ValueType,
    pub attributes: Vec<Attribute>,
    pub children: Vec<SymbolId>,
    pub parent: Option<SymbolId>,
    /// Nearest enclosing choice, looking through `if` blocks.
    pub choice_parent: Option<SymbolId>,
    pub is_const: bool,
    /// Condition text inherited from enclosing `if` blocks.
    pub nest_depends_on: Option<String>,
    pub depends_expr: Option<Expr>,
    /// Transitive depends set, discovery order.
    pub depends_on: IndexSet<SymbolId>,
    pub selected_by: Vec<SymbolId>,
    pub implied_by: Vec<SymbolId>,
    /// Topological layer index, assigned after layering.
    pub level: Option<usize>,
    /// Downstream recompute frontiers: `(layer, members)` ascending.
    pub controls: Vec<(usize, Vec<SymbolId>)>,
    pub help: Option<String>,
    pub loc: Location,
    pub state: RwLock<SymbolState>,
}

impl Symbol {
    pub fn new(kind: EntryKind, name: String, loc: Location) -> Self {
        Self {
            kind,
            name,
            value_type: ValueType::Invalid,
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
            choice_parent: None,
            is_const: false,
            nest_depends_on: None,
            depends_expr: None,
            depends_on: IndexSet::new(),
            selected_by: Vec::new(),
            implied_by: Vec::new(),
            level: None,
            controls: Vec::new(),
            help: None,
            loc,
            state: RwLock::new(SymbolState::default()),
        }
    }

    pub fn tri_value(&self) -> Tri {
        Tri::from_value(&self.state.read().value)
    }

    /// First attribute of the given kind, if any.
    pub fn attr(&self, kind: AttrKind) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.kind() == kind)
    }

    pub fn has_attr(&self, kind: AttrKind) -> bool {
        self.attr(kind).is_some()
    }
}

/// Observable fields, in the order the evaluator reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Value,
    Prompt,
    Default,
    IsEnable,
    IsVisible,
    IsFiltered,
    IsSelected,
    IsExpanded,
}

type Callback = Box<dyn Fn(SymbolId, Change) + Send + Sync>;

/// A loaded Kconfig tree: the symbol arena, the dependency layering, and
/// the change-notification registry.
pub struct Kconfig {
    pub(crate) symbols: Vec<Symbol>,
    pub(crate) root: SymbolId,
    pub(crate) by_name: HashMap<String, SymbolId>,
    pub(crate) literals: HashMap<String, SymbolId>,
    /// Topological partition of the universe, ascending.
    pub(crate) layers: Vec<Vec<SymbolId>>,
    /// Document-order flattening of the tree (excludes `if`/`source`
    /// scaffolding and const symbols).
    pub(crate) universe: Vec<SymbolId>,
    observers: RwLock<Vec<(u64, Callback)>>,
    next_token: AtomicU64,
    /// Serializes load, `.config` writes, and filtering against each other.
    pub(crate) op_lock: Mutex<()>,
}

impl Kconfig {
    pub(crate) fn new() -> Self {
        let mut model = Self {
            symbols: Vec::new(),
            root: SymbolId(0),
            by_name: HashMap::new(),
            literals: HashMap::new(),
            layers: Vec::new(),
            universe: Vec::new(),
            observers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            op_lock: Mutex::new(()),
        };
        let root = model.alloc(Symbol::new(
            EntryKind::MainMenu,
            String::new(),
            Location::new("<root>", 1),
        ));
        model.root = root;
        model
    }

    pub(crate) fn alloc(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    pub fn root(&self) -> SymbolId {
        self.root
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Document-order ids of every evaluated entry.
    pub fn universe(&self) -> &[SymbolId] {
        &self.universe
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Snapshot of a symbol's observable state.
    pub fn state(&self, id: SymbolId) -> SymbolState {
        self.symbol(id).state.read().clone()
    }

    pub fn value(&self, id: SymbolId) -> String {
        self.symbol(id).state.read().value.clone()
    }

    pub fn tri(&self, id: SymbolId) -> Tri {
        self.symbol(id).tri_value()
    }

    // -- change notifications ----------------------------------------------

    pub fn subscribe(&self, cb: impl Fn(SymbolId, Change) + Send + Sync + 'static) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((token, Box::new(cb)));
        token
    }

    pub fn unsubscribe(&self, token: u64) {
        self.observers.write().retain(|(t, _)| *t != token);
    }

    pub(crate) fn notify(&self, id: SymbolId, change: Change) {
        for (_, cb) in self.observers.read().iter() {
            cb(id, change);
        }
    }

    pub(crate) fn notify_all(&self, id: SymbolId, changes: &[Change]) {
        for change in changes {
            self.notify(id, *change);
        }
    }

    // -- filtering ---------------------------------------------------------

    /// Marks every entry filtered, then clears the mark on each match and
    /// its ancestor chain so the matched paths stay visible. Matches
    /// against the symbol name and the current prompt.
    pub fn filter_select(&self, pattern: &str, is_regex: bool) -> Result<Vec<SymbolId>> {
        let _guard = self.op_lock.lock();

        let regex = if is_regex {
            Some(RegexBuilder::new(pattern).case_insensitive(true).build()?)
        } else {
            None
        };
        let needle = pattern.to_ascii_lowercase();
        let matches_text = |text: &str| match &regex {
            Some(re) => re.is_match(text),
            None => text.to_ascii_lowercase().contains(&needle),
        };

        for &id in &self.universe {
            self.set_filtered(id, true);
        }

        let mut matched = Vec::new();
        for &id in &self.universe {
            let symbol = self.symbol(id);
            let hit = {
                let state = symbol.state.read();
                matches_text(&symbol.name)
                    || state.prompt.as_deref().is_some_and(&matches_text)
            };
            if hit {
                matched.push(id);
                self.set_filtered(id, false);
                let mut cursor = symbol.parent;
                while let Some(parent) = cursor {
                    self.set_filtered(parent, false);
                    cursor = self.symbol(parent).parent;
                }
            }
        }
        Ok(matched)
    }

    pub fn clear_filter(&self) {
        for &id in &self.universe {
            self.set_filtered(id, false);
        }
    }

    fn set_filtered(&self, id: SymbolId, filtered: bool) {
        let changed = {
            let mut state = self.symbol(id).state.write();
            if state.is_filtered != filtered {
                state.is_filtered = filtered;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify(id, Change::IsFiltered);
        }
    }

    // -- UI expansion ------------------------------------------------------

    pub fn set_expanded(&self, id: SymbolId, expanded: bool) {
        let changed = {
            let mut state = self.symbol(id).state.write();
            if state.is_expanded != expanded {
                state.is_expanded = expanded;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify(id, Change::IsExpanded);
        }
    }
}

impl std::fmt::Debug for Kconfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kconfig")
            .field("symbols", &self.symbols.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}
