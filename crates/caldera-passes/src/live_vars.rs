//! Backward liveness over an owner body.
//!
//! For every continuation site this records the locals live immediately after
//! it, and the operand temporaries of enclosing expressions that are already
//! on the value stack when the site suspends. Branches merge by union. Loops
//! iterate to a fixed point; the pass that observes the stable loop-head set
//! writes the final per-site facts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use caldera_hir::{ExprId, ExprKind, HirExpr, HirProgram, LabelId, Stmt, SymbolId, TypeId};

use crate::captures::free_variables;
use crate::error::{AnalysisError, AnalysisResult};
use crate::owners::OwnerInfo;
use crate::sites::{OwnerSites, TempKey, operands};

pub type LiveSet = BTreeSet<SymbolId>;

#[derive(Clone, Debug, Default)]
pub struct Liveness {
    /// Locals live after each site, keyed by the site expression.
    pub live_after: HashMap<ExprId, LiveSet>,
    /// Operand temporaries pending at each site, sorted.
    pub temps: HashMap<ExprId, Vec<TempKey>>,
    pub temp_types: BTreeMap<TempKey, TypeId>,
}

pub fn analyze_liveness(
    program: &HirProgram,
    owner: &OwnerInfo<'_>,
    sites: &OwnerSites,
) -> AnalysisResult<Liveness> {
    let mut walker = Walker {
        program,
        sites,
        site_exprs: sites.sites.iter().map(|site| site.expr).collect(),
        pending: Vec::new(),
        loops: Vec::new(),
        result: Liveness::default(),
    };
    walker.walk(owner.body, LiveSet::new())?;
    Ok(walker.result)
}

struct LoopFrame {
    label: Option<LabelId>,
    break_live: LiveSet,
    continue_live: LiveSet,
}

struct Walker<'a> {
    program: &'a HirProgram,
    sites: &'a OwnerSites,
    site_exprs: HashSet<ExprId>,
    pending: Vec<TempKey>,
    loops: Vec<LoopFrame>,
    result: Liveness,
}

impl Walker<'_> {
    fn record(&mut self, expr: &HirExpr, out: &LiveSet) {
        if !self.site_exprs.contains(&expr.id) {
            return;
        }
        let mut temps = self.pending.clone();
        temps.sort();
        self.result.live_after.insert(expr.id, out.clone());
        self.result.temps.insert(expr.id, temps);
    }

    fn add_local(&self, live: &mut LiveSet, symbol: SymbolId) {
        if !self.program.is_function(symbol) {
            live.insert(symbol);
        }
    }

    fn find_loop(&self, expr: &HirExpr, label: Option<LabelId>) -> AnalysisResult<&LoopFrame> {
        let frame = match label {
            None => self.loops.last(),
            Some(label) => self
                .loops
                .iter()
                .rev()
                .find(|frame| frame.label == Some(label)),
        };
        frame.ok_or_else(|| AnalysisError::unknown_label(expr.id))
    }

    /// Operands are evaluated left to right and stay on the stack until the
    /// parent consumes them, so a site inside operand `j` must preserve the
    /// values of operands `0..j`.
    fn walk_operands(&mut self, expr: &HirExpr, out: LiveSet) -> AnalysisResult<LiveSet> {
        let ops = operands(self.program, expr);
        let mut live = out;
        for pos in (0..ops.len()).rev() {
            let (_, operand) = ops[pos];
            let saved = self.pending.len();
            if self.sites.ranges.contains_key(&operand.id) {
                for (index, earlier) in &ops[..pos] {
                    let key = TempKey {
                        expr: expr.id,
                        operand: *index,
                    };
                    self.result.temp_types.insert(key, earlier.ty);
                    self.pending.push(key);
                }
            }
            let walked = self.walk(operand, live);
            self.pending.truncate(saved);
            live = walked?;
        }
        Ok(live)
    }

    fn with_free_variables(&self, live: &mut LiveSet, body: &HirExpr, params: &[SymbolId]) {
        for symbol in free_variables(self.program, body, params) {
            self.add_local(live, symbol);
        }
    }

    /// Returns the locals live before `expr`, given those live after it.
    fn walk(&mut self, expr: &HirExpr, out: LiveSet) -> AnalysisResult<LiveSet> {
        match &expr.kind {
            ExprKind::Literal { .. } => Ok(out),
            ExprKind::Ident { symbol } => {
                let mut live = out;
                self.add_local(&mut live, *symbol);
                Ok(live)
            }
            ExprKind::Binary { .. } | ExprKind::Tuple { .. } | ExprKind::Record { .. } => {
                self.walk_operands(expr, out)
            }
            ExprKind::Call { .. } | ExprKind::Perform { .. } => {
                self.record(expr, &out);
                self.walk_operands(expr, out)
            }
            ExprKind::Block { stmts, tail } => {
                let mut live = match tail {
                    Some(tail) => self.walk(tail, out)?,
                    None => out,
                };
                for stmt in stmts.iter().rev() {
                    live = match stmt {
                        Stmt::Let { pattern, value } => {
                            let mut bound = Vec::new();
                            pattern.bindings(&mut bound);
                            for symbol in bound {
                                live.remove(&symbol);
                            }
                            self.walk(value, live)?
                        }
                        Stmt::Expr { expr } => self.walk(expr, live)?,
                    };
                }
                Ok(live)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let mut merged = self.walk(then_branch, out.clone())?;
                let else_in = match else_branch {
                    Some(else_branch) => self.walk(else_branch, out)?,
                    None => out,
                };
                merged.extend(else_in);
                self.walk(cond, merged)
            }
            ExprKind::Match { scrutinee, arms } => {
                // Arms are tried in order; a failed pattern or guard falls
                // through to the next arm.
                let mut next = LiveSet::new();
                for arm in arms.iter().rev() {
                    let body_in = self.walk(&arm.body, out.clone())?;
                    let mut test_in = match &arm.guard {
                        Some(guard) => {
                            let mut guard_out = body_in;
                            guard_out.extend(next.iter().copied());
                            self.walk(guard, guard_out)?
                        }
                        None => body_in,
                    };
                    let mut bound = Vec::new();
                    arm.pattern.bindings(&mut bound);
                    for symbol in bound {
                        test_in.remove(&symbol);
                    }
                    test_in.extend(next);
                    next = test_in;
                }
                self.walk(scrutinee, next)
            }
            ExprKind::While { label, cond, body } => {
                let mut head = LiveSet::new();
                loop {
                    self.loops.push(LoopFrame {
                        label: *label,
                        break_live: out.clone(),
                        continue_live: head.clone(),
                    });
                    let body_in = self.walk(body, head.clone());
                    self.loops.pop();
                    let mut cond_out = out.clone();
                    cond_out.extend(body_in?);
                    let next = self.walk(cond, cond_out)?;
                    if next == head {
                        return Ok(head);
                    }
                    head = next;
                }
            }
            ExprKind::Loop { label, body } => {
                let mut head = LiveSet::new();
                loop {
                    self.loops.push(LoopFrame {
                        label: *label,
                        break_live: out.clone(),
                        continue_live: head.clone(),
                    });
                    let body_in = self.walk(body, head.clone());
                    self.loops.pop();
                    let body_in = body_in?;
                    if body_in == head {
                        return Ok(head);
                    }
                    head = body_in;
                }
            }
            ExprKind::Break { label, value } => {
                let target = self.find_loop(expr, *label)?.break_live.clone();
                match value {
                    Some(value) => self.walk(value, target),
                    None => Ok(target),
                }
            }
            ExprKind::Continue { label } => Ok(self.find_loop(expr, *label)?.continue_live.clone()),
            ExprKind::Assign { target, value } => {
                let mut live = out;
                live.remove(target);
                self.walk(value, live)
            }
            ExprKind::Field { base, .. } => self.walk(base, out),
            ExprKind::Lambda { params, body } => {
                let mut live = out;
                self.with_free_variables(&mut live, body, params);
                Ok(live)
            }
            ExprKind::Handle { body, clauses } => {
                self.record(expr, &out);
                let mut live = out;
                self.with_free_variables(&mut live, body, &[]);
                for clause in clauses {
                    self.with_free_variables(&mut live, &clause.body, &clause.params);
                }
                Ok(live)
            }
            ExprKind::Resume { value } => {
                self.record(expr, &out);
                self.walk(value, out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use caldera_hir::{BinaryOp, HirPattern, ProgramBuilder, ResumeKind};

    use super::*;
    use crate::env_layout::FieldSource;
    use crate::owners::discover_owners;
    use crate::site_table::SiteTable;
    use crate::sites::number_sites;

    #[test]
    fn loop_state_stays_live_across_body_site() {
        let mut b = ProgramBuilder::new("loops");
        let int = b.int();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let f = b.declare_function("f", &[], int, &[ask]);
        let i = b.symbol("i", int);
        let acc = b.symbol("acc", int);
        let unused = b.symbol("unused", int);

        // let i = 0; let acc = 0; let unused = 7;
        // while i < 3 { acc = acc + perform get(); i = i + 1 }
        // acc
        let zero = b.int_lit(0);
        let let_i = b.let_stmt(i, zero);
        let zero = b.int_lit(0);
        let let_acc = b.let_stmt(acc, zero);
        let seven = b.int_lit(7);
        let let_unused = b.let_stmt(unused, seven);
        let i_ref = b.ident(i);
        let three = b.int_lit(3);
        let cond = b.binary(BinaryOp::Lt, i_ref, three);
        let acc_ref = b.ident(acc);
        let perform = b.perform(get, vec![]);
        let perform_id = perform.id;
        let sum = b.binary(BinaryOp::Add, acc_ref, perform);
        let sum_id = sum.id;
        let set_acc = b.assign(acc, sum);
        let i_ref = b.ident(i);
        let one = b.int_lit(1);
        let inc = b.binary(BinaryOp::Add, i_ref, one);
        let set_i = b.assign(i, inc);
        let s0 = b.expr_stmt(set_acc);
        let s1 = b.expr_stmt(set_i);
        let loop_body = b.block(vec![s0, s1], None);
        let while_loop = b.while_expr(None, cond, loop_body);
        let ws = b.expr_stmt(while_loop);
        let tail = b.ident(acc);
        let body = b.block(vec![let_i, let_acc, let_unused, ws], Some(tail));
        b.define_function(f, vec![], body, true);
        let program = b.finish();

        let owners = discover_owners(&program).unwrap();
        let sites = number_sites(&program, &owners[0], &mut 0).unwrap();
        let live = analyze_liveness(&program, &owners[0], &sites).unwrap();

        // `acc` is reassigned from the saved operand, so only `i` is live.
        assert_eq!(live.live_after[&perform_id], LiveSet::from([i]));
        let temp = TempKey {
            expr: sum_id,
            operand: 0,
        };
        assert_eq!(live.temps[&perform_id], vec![temp]);
        assert_eq!(live.temp_types[&temp], int);
    }

    #[test]
    fn branches_merge_by_union() {
        let mut b = ProgramBuilder::new("branches");
        let int = b.int();
        let bool_ty = b.bool();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let f = b.declare_function("f", &[bool_ty, int, int], int, &[ask]);
        let c = b.symbol("c", bool_ty);
        let x = b.symbol("x", int);
        let y = b.symbol("y", int);

        // let v = perform get(); if c { v + x } else { y }
        let v = b.symbol("v", int);
        let perform = b.perform(get, vec![]);
        let perform_id = perform.id;
        let let_v = b.let_stmt(v, perform);
        let cond = b.ident(c);
        let v_ref = b.ident(v);
        let x_ref = b.ident(x);
        let then_branch = b.binary(BinaryOp::Add, v_ref, x_ref);
        let else_branch = b.ident(y);
        let tail = b.if_expr(cond, then_branch, Some(else_branch));
        let body = b.block(vec![let_v], Some(tail));
        b.define_function(f, vec![c, x, y], body, false);
        let program = b.finish();

        let owners = discover_owners(&program).unwrap();
        let sites = number_sites(&program, &owners[0], &mut 0).unwrap();
        let live = analyze_liveness(&program, &owners[0], &sites).unwrap();
        assert_eq!(live.live_after[&perform_id], LiveSet::from([c, x, y]));
        assert!(live.temps[&perform_id].is_empty());
    }

    /// One read, write, branch or site of an owner body.
    #[derive(Default)]
    struct FlowNode {
        reads: Vec<SymbolId>,
        writes: Vec<SymbolId>,
        site: Option<ExprId>,
        succ: Vec<usize>,
    }

    /// Flattens an owner body into a control-flow graph, built back to front:
    /// `lower` returns the entry node of an expression that continues at `next`.
    struct FlowBuilder<'a> {
        program: &'a HirProgram,
        table: &'a SiteTable,
        nodes: Vec<FlowNode>,
        /// Label, break target and continue target of each enclosing loop.
        loops: Vec<(Option<LabelId>, usize, usize)>,
    }

    impl FlowBuilder<'_> {
        fn node(&mut self, node: FlowNode) -> usize {
            self.nodes.push(node);
            self.nodes.len() - 1
        }

        fn jump(&mut self, succ: Vec<usize>) -> usize {
            self.node(FlowNode {
                succ,
                ..FlowNode::default()
            })
        }

        fn read(&mut self, symbols: Vec<SymbolId>, next: usize) -> usize {
            let reads = symbols
                .into_iter()
                .filter(|symbol| !self.program.is_function(*symbol))
                .collect();
            self.node(FlowNode {
                reads,
                succ: vec![next],
                ..FlowNode::default()
            })
        }

        fn write(&mut self, writes: Vec<SymbolId>, next: usize) -> usize {
            self.node(FlowNode {
                writes,
                succ: vec![next],
                ..FlowNode::default()
            })
        }

        fn site_then(&mut self, expr: &HirExpr, next: usize) -> usize {
            if self.table.site_for_expr(expr.id).is_none() {
                return next;
            }
            self.node(FlowNode {
                site: Some(expr.id),
                succ: vec![next],
                ..FlowNode::default()
            })
        }

        fn lower_all(&mut self, exprs: &[HirExpr], next: usize) -> usize {
            let mut entry = next;
            for expr in exprs.iter().rev() {
                entry = self.lower(expr, entry);
            }
            entry
        }

        fn loop_target(&self, label: Option<LabelId>) -> (usize, usize) {
            let &(_, exit, head) = self
                .loops
                .iter()
                .rev()
                .find(|(l, ..)| label.is_none() || *l == label)
                .unwrap();
            (exit, head)
        }

        fn lower(&mut self, expr: &HirExpr, next: usize) -> usize {
            match &expr.kind {
                ExprKind::Literal { .. } => next,
                ExprKind::Ident { symbol } => self.read(vec![*symbol], next),
                ExprKind::Binary { lhs, rhs, .. } => {
                    let rhs_entry = self.lower(rhs, next);
                    self.lower(lhs, rhs_entry)
                }
                ExprKind::Call { callee, args } => {
                    let after = self.site_then(expr, next);
                    let args_entry = self.lower_all(args, after);
                    self.lower(callee, args_entry)
                }
                ExprKind::Perform { args, .. } => {
                    let after = self.site_then(expr, next);
                    self.lower_all(args, after)
                }
                ExprKind::Tuple { elements } => self.lower_all(elements, next),
                ExprKind::Record { fields } => self.lower_all(fields, next),
                ExprKind::Field { base, .. } => self.lower(base, next),
                ExprKind::Block { stmts, tail } => {
                    let mut entry = match tail {
                        Some(tail) => self.lower(tail, next),
                        None => next,
                    };
                    for stmt in stmts.iter().rev() {
                        entry = match stmt {
                            Stmt::Let { pattern, value } => {
                                let mut bound = Vec::new();
                                pattern.bindings(&mut bound);
                                let bind = self.write(bound, entry);
                                self.lower(value, bind)
                            }
                            Stmt::Expr { expr } => self.lower(expr, entry),
                        };
                    }
                    entry
                }
                ExprKind::If {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    let then_entry = self.lower(then_branch, next);
                    let else_entry = match else_branch {
                        Some(else_branch) => self.lower(else_branch, next),
                        None => next,
                    };
                    let branch = self.jump(vec![then_entry, else_entry]);
                    self.lower(cond, branch)
                }
                ExprKind::Match { scrutinee, arms } => {
                    let mut fail = self.jump(Vec::new());
                    for arm in arms.iter().rev() {
                        let body = self.lower(&arm.body, next);
                        let matched = match &arm.guard {
                            Some(guard) => {
                                let branch = self.jump(vec![body, fail]);
                                self.lower(guard, branch)
                            }
                            None => body,
                        };
                        let mut bound = Vec::new();
                        arm.pattern.bindings(&mut bound);
                        let bind = self.write(bound, matched);
                        fail = self.jump(vec![bind, fail]);
                    }
                    self.lower(scrutinee, fail)
                }
                ExprKind::While { label, cond, body } => {
                    let head = self.jump(Vec::new());
                    let branch = self.jump(Vec::new());
                    self.loops.push((*label, next, head));
                    let body_entry = self.lower(body, head);
                    self.loops.pop();
                    self.nodes[branch].succ = vec![body_entry, next];
                    let cond_entry = self.lower(cond, branch);
                    self.nodes[head].succ = vec![cond_entry];
                    head
                }
                ExprKind::Loop { label, body } => {
                    let head = self.jump(Vec::new());
                    self.loops.push((*label, next, head));
                    let body_entry = self.lower(body, head);
                    self.loops.pop();
                    self.nodes[head].succ = vec![body_entry];
                    head
                }
                ExprKind::Break { label, value } => {
                    let (exit, _) = self.loop_target(*label);
                    match value {
                        Some(value) => self.lower(value, exit),
                        None => exit,
                    }
                }
                ExprKind::Continue { label } => self.loop_target(*label).1,
                ExprKind::Assign { target, value } => {
                    let write = self.write(vec![*target], next);
                    self.lower(value, write)
                }
                ExprKind::Lambda { params, body } => {
                    let free = free_variables(self.program, body, params);
                    self.read(free, next)
                }
                ExprKind::Handle { body, clauses } => {
                    let after = self.site_then(expr, next);
                    let mut free = free_variables(self.program, body, &[]);
                    for clause in clauses {
                        free.extend(free_variables(self.program, &clause.body, &clause.params));
                    }
                    self.read(free, after)
                }
                ExprKind::Resume { value } => {
                    let after = self.site_then(expr, next);
                    self.lower(value, after)
                }
            }
        }
    }

    fn live_out(live_in: &[LiveSet], node: &FlowNode) -> LiveSet {
        node.succ
            .iter()
            .flat_map(|succ| live_in[*succ].iter().copied())
            .collect()
    }

    /// Round-robin dataflow over the graph until nothing changes.
    fn solve(nodes: &[FlowNode]) -> HashMap<ExprId, LiveSet> {
        let mut live_in = vec![LiveSet::new(); nodes.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for (index, node) in nodes.iter().enumerate() {
                let mut live = live_out(&live_in, node);
                for symbol in &node.writes {
                    live.remove(symbol);
                }
                live.extend(node.reads.iter().copied());
                if live != live_in[index] {
                    live_in[index] = live;
                    changed = true;
                }
            }
        }
        nodes
            .iter()
            .filter_map(|node| node.site.map(|site| (site, live_out(&live_in, node))))
            .collect()
    }

    /// Every site's saved locals must be exactly what the graph says is live.
    fn assert_minimal_environments(program: &HirProgram) {
        let table = SiteTable::build(program).unwrap();
        let owners = discover_owners(program).unwrap();
        let mut checked = 0;
        for info in &owners {
            let mut flow = FlowBuilder {
                program,
                table: &table,
                nodes: Vec::new(),
                loops: Vec::new(),
            };
            let exit = flow.jump(Vec::new());
            flow.lower(info.body, exit);
            let expected = solve(&flow.nodes);
            for site in table.sites_of(table.owner(info.id)) {
                let saved: LiveSet = site
                    .env_fields
                    .iter()
                    .filter_map(|field| match field.source {
                        FieldSource::Local(symbol) => Some(symbol),
                        _ => None,
                    })
                    .collect();
                assert_eq!(
                    saved, expected[&site.expr],
                    "site #{} of {}",
                    site.site_id, info.name
                );
                checked += 1;
            }
        }
        assert_eq!(checked, table.sites.len());
    }

    #[test]
    fn nested_loop_sites_save_only_live_locals() {
        let mut b = ProgramBuilder::new("nested");
        let int = b.int();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let f = b.declare_function("f", &[int], int, &[ask]);
        let n = b.symbol("n", int);
        let i = b.symbol("i", int);
        let j = b.symbol("j", int);
        let acc = b.symbol("acc", int);
        let dead = b.symbol("dead", int);

        // let i = 0; let acc = 0; let dead = 5;
        // while i < n {
        //     let j = 0;
        //     while j < 2 { acc = acc + perform get(); j = j + 1 };
        //     i = i + 1
        // };
        // acc + perform get()
        let zero = b.int_lit(0);
        let let_i = b.let_stmt(i, zero);
        let zero = b.int_lit(0);
        let let_acc = b.let_stmt(acc, zero);
        let five = b.int_lit(5);
        let let_dead = b.let_stmt(dead, five);

        let zero = b.int_lit(0);
        let let_j = b.let_stmt(j, zero);
        let j_ref = b.ident(j);
        let two = b.int_lit(2);
        let inner_cond = b.binary(BinaryOp::Lt, j_ref, two);
        let acc_ref = b.ident(acc);
        let inner_perform = b.perform(get, vec![]);
        let inner_perform_id = inner_perform.id;
        let sum = b.binary(BinaryOp::Add, acc_ref, inner_perform);
        let sum_id = sum.id;
        let set_acc = b.assign(acc, sum);
        let set_acc = b.expr_stmt(set_acc);
        let j_ref = b.ident(j);
        let one = b.int_lit(1);
        let next_j = b.binary(BinaryOp::Add, j_ref, one);
        let set_j = b.assign(j, next_j);
        let set_j = b.expr_stmt(set_j);
        let inner_body = b.block(vec![set_acc, set_j], None);
        let inner = b.while_expr(None, inner_cond, inner_body);
        let inner = b.expr_stmt(inner);
        let i_ref = b.ident(i);
        let one = b.int_lit(1);
        let next_i = b.binary(BinaryOp::Add, i_ref, one);
        let set_i = b.assign(i, next_i);
        let set_i = b.expr_stmt(set_i);
        let outer_body = b.block(vec![let_j, inner, set_i], None);
        let i_ref = b.ident(i);
        let n_ref = b.ident(n);
        let outer_cond = b.binary(BinaryOp::Lt, i_ref, n_ref);
        let outer = b.while_expr(None, outer_cond, outer_body);
        let outer = b.expr_stmt(outer);

        let acc_ref = b.ident(acc);
        let last = b.perform(get, vec![]);
        let tail = b.binary(BinaryOp::Add, acc_ref, last);
        let body = b.block(vec![let_i, let_acc, let_dead, outer], Some(tail));
        b.define_function(f, vec![n], body, true);
        let program = b.finish();

        assert_minimal_environments(&program);

        let table = SiteTable::build(&program).unwrap();
        let inner_site = table.site_for_expr(inner_perform_id).unwrap();
        let sources: Vec<FieldSource> = inner_site
            .env_fields
            .iter()
            .map(|field| field.source)
            .collect();
        // `acc` travels as the pending left operand, `dead` is never read.
        let pending = TempKey {
            expr: sum_id,
            operand: 0,
        };
        assert_eq!(
            sources,
            vec![
                FieldSource::Site,
                FieldSource::Handler,
                FieldSource::Temp(pending),
                FieldSource::Local(n),
                FieldSource::Local(i),
                FieldSource::Local(j),
            ]
        );
    }

    #[test]
    fn match_bindings_stay_live_past_arm_sites() {
        let mut b = ProgramBuilder::new("arms");
        let int = b.int();
        let bool_ty = b.bool();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let g = b.declare_function("g", &[bool_ty, int], int, &[ask]);
        let c = b.symbol("c", bool_ty);
        let n = b.symbol("n", int);
        let x = b.symbol("x", int);
        let y = b.symbol("y", int);
        let v = b.symbol("v", int);
        let w = b.symbol("w", int);

        // match n {
        //     0 => perform get(),
        //     x if x > 10 => { let v = perform get(); v + x },
        //     y => if c { perform get() + y }
        //          else { loop { let w = perform get(); if w > y { break w } } },
        // }
        let p0 = b.perform(get, vec![]);
        let zero = HirPattern::Literal {
            value: caldera_hir::Literal::Int(0),
        };
        let first = b.arm(zero, None, p0);

        let x_ref = b.ident(x);
        let ten = b.int_lit(10);
        let guard = b.binary(BinaryOp::Gt, x_ref, ten);
        let p1 = b.perform(get, vec![]);
        let let_v = b.let_stmt(v, p1);
        let v_ref = b.ident(v);
        let x_ref = b.ident(x);
        let sum = b.binary(BinaryOp::Add, v_ref, x_ref);
        let arm_body = b.block(vec![let_v], Some(sum));
        let second = b.arm(HirPattern::Bind { symbol: x }, Some(guard), arm_body);

        let p2 = b.perform(get, vec![]);
        let y_ref = b.ident(y);
        let then_branch = b.binary(BinaryOp::Add, p2, y_ref);
        let p3 = b.perform(get, vec![]);
        let let_w = b.let_stmt(w, p3);
        let w_ref = b.ident(w);
        let y_ref = b.ident(y);
        let found = b.binary(BinaryOp::Gt, w_ref, y_ref);
        let w_ref = b.ident(w);
        let brk = b.break_expr(None, Some(w_ref));
        let check = b.if_expr(found, brk, None);
        let check = b.expr_stmt(check);
        let loop_body = b.block(vec![let_w, check], None);
        let else_branch = b.loop_expr(None, loop_body, int);
        let cond = b.ident(c);
        let third_body = b.if_expr(cond, then_branch, Some(else_branch));
        let third = b.arm(HirPattern::Bind { symbol: y }, None, third_body);

        let scrutinee = b.ident(n);
        let body = b.match_expr(scrutinee, vec![first, second, third]);
        b.define_function(g, vec![c, n], body, false);
        let program = b.finish();

        assert_minimal_environments(&program);
    }

    #[test]
    fn handle_bodies_and_clauses_save_only_live_captures() {
        let mut b = ProgramBuilder::new("scopes");
        let int = b.int();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let h = b.declare_function("h", &[int], int, &[]);
        let base = b.symbol("base", int);
        let scale = b.symbol("scale", int);
        let t = b.symbol("t", int);
        let r = b.symbol("r", int);

        // let scale = 3;
        // handle { let t = perform get(); t * scale + base }
        // with get() -> { let r = resume(1); r + base }
        let three = b.int_lit(3);
        let let_scale = b.let_stmt(scale, three);
        let perform = b.perform(get, vec![]);
        let let_t = b.let_stmt(t, perform);
        let t_ref = b.ident(t);
        let scale_ref = b.ident(scale);
        let scaled = b.binary(BinaryOp::Mul, t_ref, scale_ref);
        let base_ref = b.ident(base);
        let sum = b.binary(BinaryOp::Add, scaled, base_ref);
        let handled = b.block(vec![let_t], Some(sum));
        let one = b.int_lit(1);
        let resume = b.resume(one, int);
        let let_r = b.let_stmt(r, resume);
        let r_ref = b.ident(r);
        let base_ref = b.ident(base);
        let answer = b.binary(BinaryOp::Add, r_ref, base_ref);
        let clause_body = b.block(vec![let_r], Some(answer));
        let clause = b.clause(get, vec![], clause_body);
        let handle = b.handle(handled, vec![clause]);
        let body = b.block(vec![let_scale], Some(handle));
        b.define_function(h, vec![base], body, true);
        let program = b.finish();

        assert_minimal_environments(&program);
    }
}
