use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::expr::{self, Compiled, Expr};
use crate::model::{AttrKind, EntryKind, Kconfig, SymbolId};
use crate::parser::and_texts;
use crate::tri::Tri;

/// Per-symbol output of the parallel compile sweep, applied sequentially.
struct CompiledSymbol {
    id: SymbolId,
    depends_expr: Option<Expr>,
    deps: Vec<SymbolId>,
    attrs: Vec<CompiledAttr>,
}

#[derive(Default)]
struct CompiledAttr {
    condition: Option<Expr>,
    value: Option<Expr>,
    low: Option<Expr>,
    high: Option<Expr>,
}

impl Kconfig {
    /// Flatten the entry tree, compile every expression, wire reverse
    /// dependencies, partition the universe into layers, and precompute
    /// controls frontiers.
    pub(crate) fn build_graph(&mut self) -> Result<()> {
        self.flatten();
        self.intern_all();
        self.compile_all();
        self.wire_reverse_deps();
        self.layer()?;
        self.close_transitive();
        self.compute_controls();
        Ok(())
    }

    /// Document-order walk collecting the symbol universe. `if` and
    /// `source` entries are scaffolding: their effect lives in the nest
    /// condition and the spliced children.
    fn flatten(&mut self) {
        let mut universe = Vec::new();
        let mut stack = vec![(self.root, None::<SymbolId>)];
        let mut choice_children = Vec::new();
        while let Some((id, choice)) = stack.pop() {
            let symbol = self.symbol(id);
            match symbol.kind {
                EntryKind::If => {
                    for &child in symbol.children.iter().rev() {
                        stack.push((child, choice));
                    }
                    continue;
                }
                EntryKind::Source => continue,
                _ => {}
            }
            universe.push(id);
            if symbol.kind == EntryKind::Config {
                if let Some(parent) = choice {
                    choice_children.push((id, parent));
                }
            }
            let next_choice = if symbol.kind == EntryKind::Choice {
                Some(id)
            } else {
                None
            };
            for &child in symbol.children.iter().rev() {
                stack.push((child, next_choice));
            }
        }
        for (id, parent) in choice_children {
            self.symbol_mut(id).choice_parent = Some(parent);
        }
        self.universe = universe;
    }

    /// Intern every quoted literal up front so compilation can run against
    /// a read-only arena. Texts with unbalanced quotes are left for the
    /// compile pass to reject.
    fn intern_all(&mut self) {
        let mut texts = Vec::new();
        for &id in &self.universe {
            let symbol = self.symbol(id);
            let loc = symbol.loc.clone();
            if let Some(nest) = &symbol.nest_depends_on {
                texts.push((nest.clone(), loc.clone()));
            }
            for attr in &symbol.attributes {
                match attr.kind() {
                    AttrKind::DependsOn | AttrKind::VisibleIf | AttrKind::Default => {
                        texts.push((attr.value.clone(), loc.clone()));
                    }
                    _ => {}
                }
                if let Some(cond) = &attr.condition {
                    texts.push((cond.clone(), loc.clone()));
                }
            }
        }
        for (text, loc) in texts {
            if let Err(err) = expr::intern_literals(&text, self, &loc) {
                log::debug!("{err}");
            }
        }
    }

    fn compile_all(&mut self) {
        let outs: Vec<CompiledSymbol> = {
            let model = &*self;
            model
                .universe
                .par_iter()
                .map(|&id| compile_symbol(model, id))
                .collect()
        };
        for out in outs {
            let attr_count = out.attrs.len();
            let symbol = self.symbol_mut(out.id);
            symbol.depends_expr = out.depends_expr;
            symbol.depends_on.extend(out.deps);
            for (attr, compiled) in symbol.attributes.iter_mut().zip(out.attrs) {
                attr.condition_expr = compiled.condition;
                attr.value_expr = compiled.value;
                attr.low_expr = compiled.low;
                attr.high_expr = compiled.high;
            }
            debug_assert_eq!(attr_count, symbol.attributes.len());
            symbol.state.get_mut().attr_conditions = vec![Tri::Y; attr_count];
        }
    }

    /// Resolve `select`/`imply` targets by name. The back edge also joins
    /// the target's depends set: the clamp makes the target's value a
    /// function of the selector's, and controls construction must see that
    /// edge. A missing target is a warning, not a failure.
    fn wire_reverse_deps(&mut self) {
        let mut edges = Vec::new();
        for &id in &self.universe {
            let symbol = self.symbol(id);
            for (idx, attr) in symbol.attributes.iter().enumerate() {
                let kind = attr.kind();
                if kind != AttrKind::Select && kind != AttrKind::Imply {
                    continue;
                }
                match self.lookup(attr.value.trim()) {
                    Some(target) => edges.push((id, idx, target, kind == AttrKind::Select)),
                    None => log::warn!(
                        "{}: `{}` target `{}` is not defined",
                        symbol.loc,
                        if kind == AttrKind::Select { "select" } else { "imply" },
                        attr.value.trim()
                    ),
                }
            }
        }
        for (id, idx, target, is_select) in edges {
            self.symbol_mut(id).attributes[idx].reverse_dep = Some(target);
            let t = self.symbol_mut(target);
            if is_select {
                t.selected_by.push(id);
            } else {
                t.implied_by.push(id);
            }
            if target != id {
                t.depends_on.insert(id);
            }
        }

        let children: Vec<(SymbolId, SymbolId)> = self
            .universe
            .iter()
            .filter_map(|&id| self.symbol(id).choice_parent.map(|p| (id, p)))
            .collect();
        for (id, parent) in children {
            self.symbol_mut(id).depends_on.insert(parent);
        }
    }

    /// Kahn-style layering: layer 0 holds symbols with no dependencies,
    /// layer k the symbols whose dependencies all sit below k. Whatever
    /// remains when no new layer forms is a dependency cycle and fails
    /// the load.
    fn layer(&mut self) -> Result<()> {
        let mut placed = vec![false; self.symbols.len()];
        let mut remaining: Vec<SymbolId> = self.universe.clone();
        let mut layers: Vec<Vec<SymbolId>> = Vec::new();

        loop {
            let next: Vec<SymbolId> = {
                let model = &*self;
                let placed = &placed;
                remaining
                    .par_iter()
                    .copied()
                    .filter(|&id| {
                        model
                            .symbol(id)
                            .depends_on
                            .iter()
                            .all(|d| placed[d.index()])
                    })
                    .collect()
            };
            if next.is_empty() {
                break;
            }
            for &id in &next {
                placed[id.index()] = true;
            }
            remaining.retain(|id| !placed[id.index()]);
            layers.push(next);
        }

        if !remaining.is_empty() {
            let symbols = remaining
                .iter()
                .map(|&id| self.symbol(id).name.clone())
                .collect();
            return Err(Error::CircularDependency { symbols });
        }

        for (level, layer) in layers.iter().enumerate() {
            for &id in layer {
                self.symbol_mut(id).level = Some(level);
            }
        }
        self.layers = layers;
        Ok(())
    }

    /// Close depends sets transitively, ascending by layer so every lower
    /// layer is already closed when it is read.
    fn close_transitive(&mut self) {
        for k in 0..self.layers.len() {
            let additions: Vec<(SymbolId, Vec<SymbolId>)> = {
                let model = &*self;
                model.layers[k]
                    .par_iter()
                    .map(|&id| {
                        let mut extra = Vec::new();
                        for &dep in &model.symbol(id).depends_on {
                            extra.extend(model.symbol(dep).depends_on.iter().copied());
                        }
                        (id, extra)
                    })
                    .collect()
            };
            for (id, extra) in additions {
                self.symbol_mut(id).depends_on.extend(extra);
            }
        }
    }

    /// For each symbol, the downstream recompute frontier: per higher
    /// layer, the members that depend on it. Evaluation walks these in
    /// ascending order, so a cascade touches exactly the affected set.
    fn compute_controls(&mut self) {
        let all: Vec<(SymbolId, Vec<(usize, Vec<SymbolId>)>)> = {
            let model = &*self;
            model
                .universe
                .par_iter()
                .map(|&id| {
                    let level = model.symbol(id).level.unwrap_or(0);
                    let mut frontiers = Vec::new();
                    for (j, layer) in model.layers.iter().enumerate().skip(level + 1) {
                        let members: Vec<SymbolId> = layer
                            .iter()
                            .copied()
                            .filter(|&t| model.symbol(t).depends_on.contains(&id))
                            .collect();
                        if !members.is_empty() {
                            frontiers.push((j, members));
                        }
                    }
                    (id, frontiers)
                })
                .collect()
        };
        for (id, frontiers) in all {
            self.symbol_mut(id).controls = frontiers;
        }
    }
}

fn compile_symbol(model: &Kconfig, id: SymbolId) -> CompiledSymbol {
    let symbol = model.symbol(id);
    let loc = &symbol.loc;
    let mut deps: Vec<SymbolId> = Vec::new();

    let record = |compiled: &Compiled, deps: &mut Vec<SymbolId>| {
        for &d in &compiled.deps {
            if d != id && !deps.contains(&d) {
                deps.push(d);
            }
        }
    };

    // nest condition and explicit depends-on attributes conjoin into one
    // expression.
    let mut depends_text = symbol.nest_depends_on.clone();
    for attr in &symbol.attributes {
        if attr.kind() == AttrKind::DependsOn {
            depends_text = Some(and_texts(depends_text.as_deref(), &attr.value));
        }
    }
    let depends_expr = match &depends_text {
        Some(text) => match expr::compile(text, model, loc) {
            Ok(compiled) => {
                record(&compiled, &mut deps);
                compiled.expr
            }
            Err(err) => {
                log::warn!("{err}");
                None
            }
        },
        None => None,
    };

    let mut attrs = Vec::with_capacity(symbol.attributes.len());
    for attr in &symbol.attributes {
        let mut out = CompiledAttr::default();
        if let Some(cond) = &attr.condition {
            match expr::compile(cond, model, loc) {
                Ok(compiled) => {
                    record(&compiled, &mut deps);
                    out.condition = compiled.expr;
                }
                Err(err) => log::warn!("{err}"),
            }
        }
        match attr.kind() {
            AttrKind::VisibleIf => {
                match expr::compile(&attr.value, model, loc) {
                    Ok(compiled) => {
                        record(&compiled, &mut deps);
                        out.value = compiled.expr;
                    }
                    Err(err) => log::warn!("{err}"),
                }
            }
            AttrKind::Default => {
                // Defaults compile opportunistically: `default FOO` reads
                // symbol FOO, while `default 50` stays literal text. A
                // choice default names one of its own members, so it never
                // compiles into a dependency edge.
                if symbol.kind != EntryKind::Choice {
                    if let Ok(compiled) = expr::compile(&attr.value, model, loc) {
                        record(&compiled, &mut deps);
                        out.value = compiled.expr;
                    }
                }
            }
            AttrKind::Range => {
                if let Some(low) = &attr.low {
                    if let Ok(compiled) = expr::compile(low, model, loc) {
                        record(&compiled, &mut deps);
                        out.low = compiled.expr;
                    }
                }
                if let Some(high) = &attr.high {
                    if let Ok(compiled) = expr::compile(high, model, loc) {
                        record(&compiled, &mut deps);
                        out.high = compiled.expr;
                    }
                }
            }
            _ => {}
        }
        attrs.push(out);
    }

    CompiledSymbol {
        id,
        depends_expr,
        deps,
        attrs,
    }
}
