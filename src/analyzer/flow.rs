//! Flow analyzer: lowers one `@flow` procedure body into a workflow graph.
//!
//! The analyzer walks the AST with a small compilation state (cursor,
//! pending branch tails, pending conditional edges, loop scopes, fallback
//! scope) and emits nodes/edges as it meets suspension points. `await` and
//! `Promise.all` are syntactic cues for durability boundaries; their source
//! runtime semantics are not preserved.
//!
//! All user-code problems become diagnostics. The analyzer never fails:
//! a partial graph is still returned for tooling.

use std::mem;

use rustc_hash::FxHashMap;
use serde_json::{Map, Number, Value};
use tracing::instrument;

use crate::diagnostics::{Diagnostics, SourceLocation};
use crate::graph::{
    actions, kinds, EdgeDefinition, JoinStrategy, NodeDefinition, WorkflowGraph,
};
use crate::lang::ast::{Expression, FunctionDecl, Pattern, Statement};
use crate::lang::Span;

use super::files::{DurableKind, FileAnalysis, Symbol};
use super::types::{Signature, StaticType, TypeView};
use super::{Registry, StepRef};

/// Result of lowering one flow.
#[derive(Debug)]
pub struct FlowAnalysis {
    pub graph: WorkflowGraph,
    pub registry: Registry,
    pub diagnostics: Diagnostics,
}

/// Unresolved tails of a branching construct, to be wired into the next
/// emitted node.
#[derive(Debug, Clone)]
struct PendingBranches {
    ends: Vec<String>,
    join: JoinStrategy,
}

/// A conditional (or action-tagged) edge waiting for its target.
#[derive(Debug, Clone)]
struct PendingEdge {
    source: String,
    condition: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Clone)]
struct LoopScope {
    controller_id: String,
    break_target_id: String,
}

/// What a `const x = await ...` binding refers to.
#[derive(Debug, Clone)]
struct Binding {
    node_id: String,
    ty: StaticType,
    webhook: bool,
}

/// Lower the body of one flow export into a graph.
#[instrument(skip_all, fields(flow = %decl.name))]
pub fn analyze_flow(
    file: &FileAnalysis,
    symbols: &FxHashMap<String, Symbol>,
    types: &TypeView,
    decl: &FunctionDecl,
) -> FlowAnalysis {
    let mut lowering = FlowLowering {
        file,
        symbols,
        types,
        nodes: Vec::new(),
        edges: Vec::new(),
        cursor: None,
        scopes: vec![FxHashMap::default()],
        fallback_scope: None,
        usage_counts: FxHashMap::default(),
        pending_branches: None,
        pending_edges: Vec::new(),
        loop_scopes: Vec::new(),
        loop_exits: FxHashMap::default(),
        registry: Registry::new(),
        diagnostics: Diagnostics::new(),
    };

    for statement in &decl.body.statements {
        lowering.lower_statement(statement);
    }
    lowering.finish(decl.span);

    FlowAnalysis {
        graph: WorkflowGraph {
            id: decl.name.clone(),
            nodes: lowering.nodes,
            edges: lowering.edges,
        },
        registry: lowering.registry,
        diagnostics: lowering.diagnostics,
    }
}

struct FlowLowering<'a> {
    file: &'a FileAnalysis,
    symbols: &'a FxHashMap<String, Symbol>,
    types: &'a TypeView,

    nodes: Vec<NodeDefinition>,
    edges: Vec<EdgeDefinition>,
    cursor: Option<String>,
    scopes: Vec<FxHashMap<String, Binding>>,
    fallback_scope: Option<String>,
    usage_counts: FxHashMap<String, u32>,
    pending_branches: Option<PendingBranches>,
    pending_edges: Vec<PendingEdge>,
    loop_scopes: Vec<LoopScope>,
    /// controller id -> break target, kept for end-of-flow closure.
    loop_exits: FxHashMap<String, String>,
    registry: Registry,
    diagnostics: Diagnostics,
}

impl<'a> FlowLowering<'a> {
    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::VarDecl { pattern, init, .. } => {
                if let Some(init) = init {
                    self.lower_expr_value(init, Some(pattern));
                }
            }
            Statement::Expression { expr, .. } => self.lower_expr_value(expr, None),
            Statement::If {
                condition,
                then_block,
                else_block,
                span,
            } => self.lower_if(condition, then_block, else_block.as_ref(), *span),
            Statement::While {
                condition, body, ..
            } => {
                let condition_text = self.text(condition.span());
                self.lower_loop(condition_text, None, body, condition.span());
            }
            Statement::ForOf {
                binding,
                iterable,
                body,
                span,
            } => {
                let iterable_text = self.text(iterable.span());
                self.lower_loop(
                    "true".to_string(),
                    Some((binding.clone(), iterable_text)),
                    body,
                    *span,
                );
            }
            Statement::Try {
                block,
                catch,
                finally,
                span,
            } => self.lower_try(block, catch.as_ref(), finally.as_ref(), *span),
            Statement::Break { span } => self.lower_break(*span),
            Statement::Continue { span } => self.lower_continue(*span),
            Statement::Return { value, .. } => {
                if let Some(value) = value {
                    self.lower_expr_value(value, None);
                }
            }
            Statement::Block(block) => {
                self.push_scope();
                for statement in &block.statements {
                    self.lower_statement(statement);
                }
                self.pop_scope();
            }
        }
    }

    fn lower_if(
        &mut self,
        condition: &Expression,
        then_block: &crate::lang::ast::Block,
        else_block: Option<&crate::lang::ast::Block>,
        span: Span,
    ) {
        let condition_text = self.text(condition.span());
        let fork = self.ensure_cursor(span);

        // Then branch: entered through a conditional pending edge so the
        // first emitted node (or a break/continue) picks it up.
        self.cursor = None;
        let (then_ends, then_leftover) = self.lower_branch(
            &then_block.statements,
            PendingEdge {
                source: fork.clone(),
                condition: Some(condition_text.clone()),
                action: None,
            },
        );

        let negated = format!("!({})", condition_text);
        let mut ends = then_ends;
        let mut leftover = then_leftover;

        if let Some(else_block) = else_block {
            self.cursor = None;
            let (else_ends, else_leftover) = self.lower_branch(
                &else_block.statements,
                PendingEdge {
                    source: fork,
                    condition: Some(negated),
                    action: None,
                },
            );
            ends.extend(else_ends);
            leftover.extend(else_leftover);
        } else {
            // The skip path also reaches the successor.
            leftover.push(PendingEdge {
                source: fork,
                condition: Some(negated),
                action: None,
            });
        }

        self.cursor = None;
        self.pending_edges = leftover;
        self.pending_branches = if ends.is_empty() {
            None
        } else {
            Some(PendingBranches {
                ends,
                join: JoinStrategy::Any,
            })
        };
    }

    /// Lower one branch in its own scope with the given entry edge pending.
    /// Returns the branch tails plus whatever conditional edges are still
    /// waiting for a target (the entry edge if the branch emitted nothing,
    /// skip edges of nested `if`s without `else`).
    fn lower_branch(
        &mut self,
        statements: &[Statement],
        entry: PendingEdge,
    ) -> (Vec<String>, Vec<PendingEdge>) {
        let saved_edges = mem::take(&mut self.pending_edges);
        self.pending_edges.push(entry);
        self.push_scope();
        for statement in statements {
            self.lower_statement(statement);
        }
        self.pop_scope();
        let (ends, leftover) = self.capture_tails();
        self.pending_edges = saved_edges;
        (ends, leftover)
    }

    /// Shared lowering for `while` and the `for…of` desugaring.
    fn lower_loop(
        &mut self,
        condition_text: String,
        iteration: Option<(String, String)>,
        body: &crate::lang::ast::Block,
        span: Span,
    ) {
        let mut params = Map::new();
        params.insert("condition".into(), Value::String(condition_text));
        if let Some((binding, iterable)) = &iteration {
            params.insert("iterable".into(), Value::String(iterable.clone()));
            params.insert("binding".into(), Value::String(binding.clone()));
        }

        // A loop opening the flow would leave the controller with only its
        // back-edge; anchor it the way a leading `if` is anchored.
        if self.cursor.is_none()
            && self.pending_branches.is_none()
            && self.pending_edges.is_empty()
        {
            self.ensure_cursor(span);
        }

        let controller = self.emit(kinds::LOOP_CONTROLLER, "loop-controller", params, span);
        self.node_config(&controller).join_strategy = Some(JoinStrategy::Any);

        let break_target = self.emit_unwired(kinds::JOIN, "join", Map::new(), span);
        self.loop_exits
            .insert(controller.clone(), break_target.clone());
        self.loop_scopes.push(LoopScope {
            controller_id: controller.clone(),
            break_target_id: break_target.clone(),
        });

        self.cursor = None;
        let saved_edges = mem::take(&mut self.pending_edges);
        self.pending_edges.push(PendingEdge {
            source: controller.clone(),
            condition: None,
            action: Some(actions::CONTINUE.into()),
        });
        self.push_scope();
        if let Some((binding, _)) = &iteration {
            self.bind_name(
                binding.clone(),
                Binding {
                    node_id: controller.clone(),
                    ty: StaticType::Unknown,
                    webhook: false,
                },
            );
        }
        for statement in &body.statements {
            self.lower_statement(statement);
        }
        self.pop_scope();

        // The body's tails flow back into the controller. An unconsumed
        // entry edge turns into the controller's self-loop (empty body).
        let (ends, leftover) = self.capture_tails();
        for end in ends {
            self.push_edge(end, &controller, None, None, span);
        }
        for edge in leftover {
            self.push_edge(edge.source, &controller, edge.condition, edge.action, span);
        }
        self.pending_edges = saved_edges;
        self.loop_scopes.pop();

        self.pending_branches = Some(PendingBranches {
            ends: vec![break_target, controller],
            join: JoinStrategy::Any,
        });
        self.cursor = None;
    }

    fn lower_try(
        &mut self,
        block: &crate::lang::ast::Block,
        catch: Option<&crate::lang::ast::CatchClause>,
        finally: Option<&crate::lang::ast::Block>,
        _span: Span,
    ) {
        if let Some(finally) = finally {
            self.diagnostics.error(
                self.location(finally.span),
                "'finally' is not supported in flows; move cleanup after the try statement",
            );
        }

        let saved_cursor = self.cursor.take();
        let saved_pending = self.pending_branches.take();
        let saved_edges = mem::take(&mut self.pending_edges);

        // The catch body lowers first, into a side buffer, so the try
        // block can point its fallback at the catch's entry node before
        // either half is spliced into the graph.
        let mut catch_nodes = Vec::new();
        let mut catch_edges = Vec::new();
        let mut catch_ends = Vec::new();
        let mut catch_leftover = Vec::new();
        let mut catch_entry = None;
        if let Some(clause) = catch {
            let nodes_mark = self.nodes.len();
            let edges_mark = self.edges.len();
            self.push_scope();
            for statement in &clause.block.statements {
                self.lower_statement(statement);
            }
            self.pop_scope();
            let (ends, leftover) = self.capture_tails();
            catch_ends = ends;
            catch_leftover = leftover;
            catch_nodes = self.nodes.split_off(nodes_mark);
            catch_edges = self.edges.split_off(edges_mark);
            catch_entry = catch_nodes.first().map(|n| n.id.clone());
        }

        // Try block: every node emitted inside carries the fallback.
        self.cursor = saved_cursor;
        self.pending_branches = saved_pending;
        self.pending_edges = saved_edges;
        let saved_fallback = self.fallback_scope.take();
        self.fallback_scope = catch_entry;
        self.push_scope();
        for statement in &block.statements {
            self.lower_statement(statement);
        }
        self.pop_scope();
        self.fallback_scope = saved_fallback;
        let (mut ends, mut leftover) = self.capture_tails();

        self.nodes.extend(catch_nodes);
        self.edges.extend(catch_edges);

        ends.extend(catch_ends);
        leftover.extend(catch_leftover);
        self.pending_edges = leftover;
        self.pending_branches = if ends.is_empty() {
            None
        } else {
            Some(PendingBranches {
                ends,
                join: JoinStrategy::Any,
            })
        };
        self.cursor = None;
    }

    fn lower_break(&mut self, span: Span) {
        let Some(scope) = self.loop_scopes.last().cloned() else {
            self.diagnostics
                .error(self.location(span), "'break' outside of a loop");
            return;
        };
        self.wire_tails_to(&scope.break_target_id, span);
    }

    fn lower_continue(&mut self, span: Span) {
        let Some(scope) = self.loop_scopes.last().cloned() else {
            self.diagnostics
                .error(self.location(span), "'continue' outside of a loop");
            return;
        };
        self.wire_tails_to(&scope.controller_id, span);
    }

    /// Route every pending source (cursor, branch tails, waiting
    /// conditional edges) into `target` and dissolve the cursor.
    fn wire_tails_to(&mut self, target: &str, span: Span) {
        let (ends, leftover) = self.capture_tails();
        for end in ends {
            self.push_edge(end, target, None, None, span);
        }
        for edge in leftover {
            self.push_edge(edge.source, target, edge.condition, edge.action, span);
        }
        self.cursor = None;
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr_value(&mut self, expr: &Expression, binding: Option<&Pattern>) {
        match expr {
            Expression::Await { operand, span } => self.lower_await(operand, binding, *span),
            other => {
                if let Some(name) = other.call_name() {
                    if matches!(self.symbols.get(name), Some(Symbol::Durable(_))) {
                        self.diagnostics.warning(
                            self.location(other.span()),
                            "durable primitive called without suspension will not pause the workflow",
                        );
                        return;
                    }
                }
                self.traverse_children(other);
            }
        }
    }

    /// Unexpected forms: look for awaits nested in them, ignore the rest.
    fn traverse_children(&mut self, expr: &Expression) {
        match expr {
            Expression::Array { elements, .. } => {
                for element in elements {
                    self.lower_expr_value(element, None);
                }
            }
            Expression::Object { properties, .. } => {
                for (_, value) in properties {
                    self.lower_expr_value(value, None);
                }
            }
            Expression::Member { object, .. } => self.lower_expr_value(object, None),
            Expression::Call { callee, args, .. } => {
                self.lower_expr_value(callee, None);
                for arg in args {
                    self.lower_expr_value(arg, None);
                }
            }
            Expression::Unary { operand, .. } => self.lower_expr_value(operand, None),
            Expression::Binary { left, right, .. } => {
                self.lower_expr_value(left, None);
                self.lower_expr_value(right, None);
            }
            Expression::Paren { inner, .. } => self.lower_expr_value(inner, None),
            Expression::Await { operand, span } => self.lower_await(operand, None, *span),
            _ => {}
        }
    }

    fn lower_await(&mut self, operand: &Expression, binding: Option<&Pattern>, span: Span) {
        let operand = operand.unwrap_parens();

        if let Some(arg) = operand.as_promise_all() {
            self.lower_scatter(arg, binding, span);
            return;
        }

        if let Expression::Call { callee, args, .. } = operand {
            if let Expression::Ident { name, .. } = callee.unwrap_parens() {
                match self.symbols.get(name).cloned() {
                    Some(Symbol::Step {
                        export_name,
                        import_path,
                        signature,
                    }) => {
                        let params = self.step_params(&signature, args);
                        self.check_step_args(&export_name, args);
                        self.registry.insert(
                            export_name.clone(),
                            StepRef {
                                import_path,
                                export_name: export_name.clone(),
                            },
                        );
                        let id = self.emit(&export_name, &export_name, params, span);
                        self.bind_pattern(binding, &id, signature.return_type, false);
                        return;
                    }
                    Some(Symbol::Flow { export_name }) => {
                        let mut params = Map::new();
                        params.insert(
                            "blueprintId".into(),
                            Value::String(export_name.clone()),
                        );
                        let id = self.emit(kinds::SUBFLOW, &export_name, params, span);
                        self.bind_pattern(binding, &id, StaticType::Unknown, false);
                        return;
                    }
                    Some(Symbol::Durable(kind)) => {
                        self.lower_durable(kind, args, binding, span);
                        return;
                    }
                    None => {
                        // Unknown symbol: the type-checker view has nothing
                        // for it, so this await site is ignored. Nested
                        // awaits inside the arguments still lower.
                        for arg in args {
                            self.lower_expr_value(arg, None);
                        }
                        return;
                    }
                }
            }
            if is_context_access(callee) {
                return; // context reads/writes emit no node
            }
            self.traverse_children(operand);
            return;
        }

        if let Expression::Member {
            object, property, ..
        } = operand
        {
            if is_context_access(operand) {
                return;
            }
            if property == "request" {
                if let Expression::Ident { name, .. } = object.unwrap_parens() {
                    if let Some(bound) = self.lookup(name) {
                        if bound.webhook {
                            let mut params = Map::new();
                            params.insert(
                                "event".into(),
                                Value::String(format!("webhook:{}", bound.node_id)),
                            );
                            let id = self.emit(kinds::WAIT, kinds::WAIT, params, span);
                            self.bind_pattern(binding, &id, StaticType::Unknown, false);
                            return;
                        }
                    }
                }
            }
            self.traverse_children(operand);
            return;
        }

        self.traverse_children(operand);
    }

    fn lower_durable(
        &mut self,
        kind: DurableKind,
        args: &[Expression],
        binding: Option<&Pattern>,
        span: Span,
    ) {
        let (uses, param_key) = match kind {
            DurableKind::Sleep => (kinds::SLEEP, "duration"),
            DurableKind::WaitForEvent => (kinds::WAIT, "event"),
            DurableKind::CreateWebhook => (kinds::WEBHOOK, "path"),
        };
        let mut params = Map::new();
        if let Some(arg) = args.first() {
            params.insert(param_key.into(), self.argument_value(arg));
        }
        let id = self.emit(uses, uses, params, span);
        self.bind_pattern(
            binding,
            &id,
            StaticType::Unknown,
            kind == DurableKind::CreateWebhook,
        );
    }

    fn lower_scatter(&mut self, arg: &Expression, binding: Option<&Pattern>, span: Span) {
        let Expression::Array { elements, .. } = arg.unwrap_parens() else {
            self.diagnostics.error(
                self.location(arg.span()),
                "argument to Promise.all must be an array literal of calls",
            );
            return;
        };
        if elements.is_empty() {
            self.diagnostics.warning(
                self.location(span),
                "Promise.all with an empty array produces no parallel branches",
            );
            return;
        }

        let scatter = self.cursor.take();
        let names: Vec<Option<String>> = match binding {
            Some(Pattern::Array(names)) => names.clone(),
            _ => Vec::new(),
        };

        let mut parallel_ids = Vec::new();
        for (index, element) in elements.iter().enumerate() {
            let element = element.unwrap_parens();
            let Expression::Call { callee, args, .. } = element else {
                continue;
            };
            let Expression::Ident { name, .. } = callee.unwrap_parens() else {
                continue;
            };
            let (id, result_ty) = match self.symbols.get(name).cloned() {
                Some(Symbol::Step {
                    export_name,
                    import_path,
                    signature,
                }) => {
                    let params = self.step_params(&signature, args);
                    self.check_step_args(&export_name, args);
                    self.registry.insert(
                        export_name.clone(),
                        StepRef {
                            import_path,
                            export_name: export_name.clone(),
                        },
                    );
                    let key = format!("{}_parallel", export_name);
                    let id = self.emit_unwired(&export_name, &key, params, element.span());
                    (id, signature.return_type)
                }
                Some(Symbol::Flow { export_name }) => {
                    let mut params = Map::new();
                    params.insert("blueprintId".into(), Value::String(export_name.clone()));
                    let key = format!("{}_parallel", export_name);
                    let id = self.emit_unwired(kinds::SUBFLOW, &key, params, element.span());
                    (id, StaticType::Unknown)
                }
                _ => continue,
            };
            if let Some(source) = &scatter {
                self.push_edge(source.clone(), &id, None, None, span);
            }
            if let Some(Some(name)) = names.get(index) {
                self.bind_name(
                    name.clone(),
                    Binding {
                        node_id: id.clone(),
                        ty: result_ty,
                        webhook: false,
                    },
                );
            }
            parallel_ids.push(id);
        }

        if parallel_ids.is_empty() {
            self.cursor = scatter;
            return;
        }
        self.pending_branches = Some(PendingBranches {
            ends: parallel_ids,
            join: JoinStrategy::All,
        });
        self.cursor = None;
    }

    // ------------------------------------------------------------------
    // Finishing
    // ------------------------------------------------------------------

    fn finish(&mut self, flow_span: Span) {
        // A dangling all-join means the scatter's gather site was never
        // found; synthesize one rather than losing the join semantics.
        if self
            .pending_branches
            .as_ref()
            .map(|p| p.join == JoinStrategy::All)
            .unwrap_or(false)
        {
            self.diagnostics.warning(
                self.location(flow_span),
                "scatter-gather result is never awaited into a next step; a synthetic gather node was introduced",
            );
            self.emit(kinds::GATHER, kinds::GATHER, Map::new(), flow_span);
        }

        // A loop as the final statement leaves its exit tails pending;
        // close the controller's break path onto the break target so the
        // graph stays complete.
        if let Some(pending) = self.pending_branches.take() {
            for end in pending.ends {
                if let Some(break_target) = self.loop_exits.get(&end).cloned() {
                    self.push_edge(end, &break_target, None, None, flow_span);
                }
            }
        }
        self.pending_edges.clear();
        self.cursor = None;

        // Break targets nothing ever breaks into would become bogus roots.
        let orphans: Vec<String> = self
            .loop_exits
            .values()
            .filter(|bt| !self.edges.iter().any(|e| &e.target == *bt))
            .cloned()
            .collect();
        for orphan in orphans {
            self.nodes.retain(|n| n.id != orphan);
            self.edges.retain(|e| e.source != orphan);
        }

        if self.nodes.is_empty() {
            self.emit(kinds::START, kinds::START, Map::new(), flow_span);
        }
    }

    // ------------------------------------------------------------------
    // Emission plumbing
    // ------------------------------------------------------------------

    fn mint(&mut self, key: &str) -> String {
        let count = self.usage_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        format!("{}_{}", key, count)
    }

    /// Emit a node and wire it per the standard incoming rules.
    fn emit(&mut self, uses: &str, key: &str, params: Map<String, Value>, span: Span) -> String {
        let id = self.mint(key);
        let mut node = NodeDefinition::new(&id, uses);
        node.params = params;
        node.source_location = Some(self.location(span));
        if let Some(fallback) = &self.fallback_scope {
            node.config_mut().fallback = Some(fallback.clone());
        }

        let mut join = None;
        let mut wired = false;
        if let Some(pending) = self.pending_branches.take() {
            if pending.ends.len() >= 2 {
                join = Some(pending.join);
            }
            for end in pending.ends {
                self.push_edge(end, &id, None, None, span);
            }
            wired = true;
        }
        if !self.pending_edges.is_empty() {
            for edge in mem::take(&mut self.pending_edges) {
                self.push_edge(edge.source, &id, edge.condition, edge.action, span);
            }
            wired = true;
        }
        if !wired {
            if let Some(cursor) = self.cursor.take() {
                self.push_edge(cursor, &id, None, None, span);
            }
        }
        if let Some(join) = join {
            node.config_mut().join_strategy = Some(join);
        }

        self.nodes.push(node);
        self.cursor = Some(id.clone());
        id
    }

    /// Emit a node with no incoming wiring and without moving the cursor.
    fn emit_unwired(
        &mut self,
        uses: &str,
        key: &str,
        params: Map<String, Value>,
        span: Span,
    ) -> String {
        let id = self.mint(key);
        let mut node = NodeDefinition::new(&id, uses);
        node.params = params;
        node.source_location = Some(self.location(span));
        if let Some(fallback) = &self.fallback_scope {
            node.config_mut().fallback = Some(fallback.clone());
        }
        self.nodes.push(node);
        id
    }

    /// Append an edge. A plain edge out of a loop-controller is the
    /// controller's break path and is tagged accordingly.
    fn push_edge(
        &mut self,
        source: String,
        target: &str,
        condition: Option<String>,
        action: Option<String>,
        span: Span,
    ) {
        let action = action.or_else(|| {
            if condition.is_none() && self.uses_of(&source) == Some(kinds::LOOP_CONTROLLER) {
                Some(actions::BREAK.to_string())
            } else {
                None
            }
        });
        let mut edge = EdgeDefinition::new(source, target);
        edge.condition = condition;
        edge.action = action;
        edge.source_location = Some(self.location(span));
        self.edges.push(edge);
    }

    fn uses_of(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.uses.as_str())
    }

    fn node_config(&mut self, id: &str) -> &mut crate::graph::NodeConfig {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .expect("node just emitted");
        node.config_mut()
    }

    fn ensure_cursor(&mut self, span: Span) -> String {
        match &self.cursor {
            Some(cursor) => cursor.clone(),
            None => self.emit(kinds::START, kinds::START, Map::new(), span),
        }
    }

    /// Drain every pending source: branch ends, waiting edges, cursor.
    fn capture_tails(&mut self) -> (Vec<String>, Vec<PendingEdge>) {
        let mut ends = self
            .pending_branches
            .take()
            .map(|p| p.ends)
            .unwrap_or_default();
        if let Some(cursor) = self.cursor.take() {
            ends.push(cursor);
        }
        let leftover = mem::take(&mut self.pending_edges);
        (ends, leftover)
    }

    // ------------------------------------------------------------------
    // Bindings, params, type checks
    // ------------------------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind_name(&mut self, name: String, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, binding);
        }
    }

    fn bind_pattern(
        &mut self,
        pattern: Option<&Pattern>,
        node_id: &str,
        ty: StaticType,
        webhook: bool,
    ) {
        match pattern {
            Some(Pattern::Ident(name)) => self.bind_name(
                name.clone(),
                Binding {
                    node_id: node_id.to_string(),
                    ty,
                    webhook,
                },
            ),
            Some(Pattern::Object(names)) => {
                for name in names {
                    self.bind_name(
                        name.clone(),
                        Binding {
                            node_id: node_id.to_string(),
                            ty: StaticType::Unknown,
                            webhook: false,
                        },
                    );
                }
            }
            _ => {}
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Literal arguments become node params, keyed by the declared
    /// parameter name. Non-literal arguments flow through the context at
    /// run time and are skipped here.
    fn step_params(&self, signature: &Signature, args: &[Expression]) -> Map<String, Value> {
        let mut params = Map::new();
        for (index, arg) in args.iter().enumerate() {
            let Some(param) = signature.params.get(index) else {
                break;
            };
            if let Some(value) = literal_value(arg) {
                params.insert(param.name.clone(), value);
            }
        }
        params
    }

    fn check_step_args(&mut self, callee: &str, args: &[Expression]) {
        let typed: Vec<(StaticType, SourceLocation)> = args
            .iter()
            .map(|arg| (self.static_type_of(arg), self.location(arg.span())))
            .collect();
        for (location, message) in self.types.check_call(callee, &typed) {
            self.diagnostics.error(location, message);
        }
    }

    fn static_type_of(&self, expr: &Expression) -> StaticType {
        match expr.unwrap_parens() {
            Expression::Ident { name, .. } => self
                .lookup(name)
                .map(|b| b.ty.clone())
                .unwrap_or(StaticType::Unknown),
            other => StaticType::of_literal(other),
        }
    }

    /// Literal value of a durable-primitive argument; non-literal
    /// arguments keep their source text.
    fn argument_value(&self, arg: &Expression) -> Value {
        literal_value(arg).unwrap_or_else(|| Value::String(self.text(arg.span())))
    }

    fn text(&self, span: Span) -> String {
        self.file.source.slice(span).to_string()
    }

    fn location(&self, span: Span) -> SourceLocation {
        self.file.source.location_of(span)
    }
}

fn is_context_access(expr: &Expression) -> bool {
    match expr.unwrap_parens() {
        Expression::Ident { name, .. } => name == "context",
        Expression::Member { object, .. } => is_context_access(object),
        Expression::Call { callee, .. } => is_context_access(callee),
        _ => false,
    }
}

/// JSON value of a literal expression, `None` when not a literal.
fn literal_value(expr: &Expression) -> Option<Value> {
    match expr.unwrap_parens() {
        Expression::Str { value, .. } => Some(Value::String(value.clone())),
        Expression::Number { raw, .. } => {
            let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
            if let Ok(int) = cleaned.parse::<i64>() {
                Some(Value::Number(int.into()))
            } else {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            }
        }
        Expression::Bool { value, .. } => Some(Value::Bool(*value)),
        Expression::Null { .. } => Some(Value::Null),
        Expression::Array { elements, .. } => {
            let values: Option<Vec<Value>> = elements.iter().map(literal_value).collect();
            values.map(Value::Array)
        }
        Expression::Object { properties, .. } => {
            let mut map = Map::new();
            for (key, value) in properties {
                map.insert(key.clone(), literal_value(value)?);
            }
            Some(Value::Object(map))
        }
        Expression::Unary {
            op: crate::lang::ast::UnaryOp::Neg,
            operand,
            ..
        } => match literal_value(operand)? {
            Value::Number(n) => {
                if let Some(int) = n.as_i64() {
                    Some(Value::Number((-int).into()))
                } else {
                    n.as_f64().and_then(|f| Number::from_f64(-f)).map(Value::Number)
                }
            }
            _ => None,
        },
        _ => None,
    }
}
