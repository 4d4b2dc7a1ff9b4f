//! Parses a script with oxc and reduces each top-level statement to the
//! shape the lifter needs: what it binds, what it calls, what it reads.

use crate::error::{Result, WorkflowError};
use oxc::allocator::Allocator;
use oxc::ast::ast::{
    ArrayAssignmentTarget, AssignmentOperator, AssignmentTarget, AssignmentTargetMaybeDefault,
    BindingPatternKind, Declaration, Expression, FunctionType, Statement, VariableDeclaration,
    VariableDeclarationKind, VariableDeclarator,
};
use oxc::ast::{AstKind, Visit};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType, Span};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub operation: String,
    pub text: String,
}

/// Right-hand side of a binding statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundValue {
    /// Calls evaluated by the statement itself, outermost first.
    pub calls: Vec<CallSite>,
    /// Free identifiers read, in first-use order.
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementShape {
    /// Imports, re-exports and type declarations: never lifted.
    Declaration,
    /// Named function or class declaration.
    Function {
        name: String,
        refs: Vec<String>,
    },
    /// Any other export; its local names stay visible to importers.
    Export {
        calls: Vec<CallSite>,
        refs: Vec<String>,
    },
    Bind {
        /// `let`/`const`/`var` for declarations, `None` for assignments.
        keyword: Option<&'static str>,
        targets: Vec<String>,
        augmented: bool,
        exported: bool,
        value: Option<BoundValue>,
    },
    Expression {
        calls: Vec<CallSite>,
        refs: Vec<String>,
        /// Expression text without the trailing semicolon.
        expression: String,
    },
    Other {
        calls: Vec<CallSite>,
        refs: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStatement {
    pub shape: StatementShape,
    /// Source text, normalised to end with a semicolon for single-line forms.
    pub text: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Default)]
struct Frame {
    /// Function bodies run later, so calls inside them are not evaluated here.
    deferred: bool,
    bound: HashSet<String>,
    pending: Vec<String>,
}

/// Collects free identifier references and evaluated calls. Names bound in a
/// nested scope (parameters, local declarations) shadow outer ones.
struct ExpressionCollector<'s> {
    source: &'s str,
    frames: Vec<Frame>,
    names: Vec<String>,
    calls: Vec<CallSite>,
}

impl<'s> ExpressionCollector<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            frames: Vec::new(),
            names: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn reference(&mut self, name: &str) {
        match self.frames.last_mut() {
            Some(frame) => frame.pending.push(name.to_string()),
            None => {
                if !self.names.iter().any(|n| n == name) {
                    self.names.push(name.to_string());
                }
            }
        }
    }

    fn bind(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.bound.insert(name.to_string());
        }
    }

    fn in_function(&self) -> bool {
        self.frames.iter().any(|frame| frame.deferred)
    }
}

/// `Some(deferred)` for nodes that open a scope.
fn scope_kind(kind: &AstKind<'_>) -> Option<bool> {
    match kind {
        AstKind::Function(_) | AstKind::ArrowFunctionExpression(_) => Some(true),
        AstKind::Class(_)
        | AstKind::BlockStatement(_)
        | AstKind::ForStatement(_)
        | AstKind::ForInStatement(_)
        | AstKind::ForOfStatement(_)
        | AstKind::CatchClause(_) => Some(false),
        _ => None,
    }
}

impl<'a> Visit<'a> for ExpressionCollector<'_> {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        if let AstKind::Function(func) = &kind {
            // A declaration's name belongs to the enclosing scope.
            if matches!(func.r#type, FunctionType::FunctionDeclaration) {
                if let Some(id) = &func.id {
                    self.bind(id.name.as_str());
                }
            }
        }
        if let Some(deferred) = scope_kind(&kind) {
            self.frames.push(Frame {
                deferred,
                ..Frame::default()
            });
            return;
        }

        match kind {
            AstKind::IdentifierReference(ident) => self.reference(ident.name.as_str()),
            AstKind::BindingIdentifier(ident) => self.bind(ident.name.as_str()),
            AstKind::CallExpression(call) if !self.in_function() => {
                let operation = match &call.callee {
                    Expression::Identifier(ident) => ident.name.to_string(),
                    Expression::StaticMemberExpression(member) => member.property.name.to_string(),
                    _ => return,
                };
                let text = self.source[call.span.start as usize..call.span.end as usize].to_string();
                self.calls.push(CallSite { operation, text });
            }
            _ => {}
        }
    }

    fn leave_node(&mut self, kind: AstKind<'a>) {
        if scope_kind(&kind).is_none() {
            return;
        }
        let Some(frame) = self.frames.pop() else {
            return;
        };
        for name in frame.pending {
            if !frame.bound.contains(&name) {
                self.reference(&name);
            }
        }
    }
}

pub struct ScriptParser<'s> {
    source: &'s str,
    source_type: SourceType,
}

impl<'s> ScriptParser<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            source_type: SourceType::mjs(),
        }
    }

    /// Picks JavaScript or TypeScript from the file extension.
    pub fn for_path(source: &'s str, path: &Path) -> Result<Self> {
        let source_type = SourceType::from_path(path).map_err(|_| {
            WorkflowError::ScriptParse(format!("Unsupported script type: {}", path.display()))
        })?;
        Ok(Self {
            source,
            source_type,
        })
    }

    pub fn parse(&self) -> Result<Vec<ScriptStatement>> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, self.source, self.source_type).parse();

        if !parsed.errors.is_empty() {
            let errors: Vec<String> = parsed.errors.iter().map(|e| e.to_string()).collect();
            return Err(WorkflowError::ScriptParse(errors.join("\n")));
        }

        let mut statements = Vec::new();
        for stmt in &parsed.program.body {
            self.classify(stmt, &mut statements)?;
        }
        Ok(statements)
    }

    fn classify(&self, stmt: &Statement<'_>, out: &mut Vec<ScriptStatement>) -> Result<()> {
        let span = stmt.span();
        match stmt {
            Statement::VariableDeclaration(decl) => self.classify_declaration(decl, false, out)?,
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::VariableDeclaration(decl)) => {
                    self.classify_declaration(decl, true, out)?;
                }
                _ => {
                    let (refs, calls) = self.collect(|c| c.visit_statement(stmt));
                    out.push(self.statement(StatementShape::Export { calls, refs }, span));
                }
            },
            Statement::ExportDefaultDeclaration(_) => {
                let (refs, calls) = self.collect(|c| c.visit_statement(stmt));
                out.push(self.statement(StatementShape::Export { calls, refs }, span));
            }
            Statement::ExpressionStatement(expr_stmt) => {
                let expression = &expr_stmt.expression;
                let shape = match unwrap_expression(expression) {
                    Expression::AssignmentExpression(assign) => {
                        let targets = self.assignment_targets(&assign.left, span)?;
                        let (refs, calls) = self.collect(|c| c.visit_expression(&assign.right));
                        StatementShape::Bind {
                            keyword: None,
                            targets,
                            augmented: assign.operator != AssignmentOperator::Assign,
                            exported: false,
                            value: Some(BoundValue { calls, refs }),
                        }
                    }
                    _ => {
                        let (refs, calls) = self.collect(|c| c.visit_expression(expression));
                        StatementShape::Expression {
                            calls,
                            refs,
                            expression: self.text(expression.span()).to_string(),
                        }
                    }
                };
                out.push(self.statement(shape, span));
            }
            Statement::FunctionDeclaration(func) => {
                let (refs, _) = self.collect(|c| c.visit_statement(stmt));
                let shape = match &func.id {
                    Some(id) => StatementShape::Function {
                        name: id.name.to_string(),
                        refs,
                    },
                    None => StatementShape::Declaration,
                };
                out.push(self.statement(shape, span));
            }
            Statement::ClassDeclaration(class) => {
                let (refs, _) = self.collect(|c| c.visit_statement(stmt));
                let shape = match &class.id {
                    Some(id) => StatementShape::Function {
                        name: id.name.to_string(),
                        refs,
                    },
                    None => StatementShape::Declaration,
                };
                out.push(self.statement(shape, span));
            }
            Statement::ImportDeclaration(_)
            | Statement::ExportAllDeclaration(_)
            | Statement::TSTypeAliasDeclaration(_)
            | Statement::TSInterfaceDeclaration(_)
            | Statement::EmptyStatement(_) => {
                out.push(self.statement(StatementShape::Declaration, span));
            }
            _ => {
                let (refs, calls) = self.collect(|c| c.visit_statement(stmt));
                out.push(self.statement(StatementShape::Other { calls, refs }, span));
            }
        }
        Ok(())
    }

    fn classify_declaration(
        &self,
        decl: &VariableDeclaration<'_>,
        exported: bool,
        out: &mut Vec<ScriptStatement>,
    ) -> Result<()> {
        let keyword = match decl.kind {
            VariableDeclarationKind::Var => "var",
            VariableDeclarationKind::Const => "const",
            _ => "let",
        };
        for declarator in &decl.declarations {
            out.push(self.classify_declarator(keyword, exported, declarator)?);
        }
        Ok(())
    }

    fn classify_declarator(
        &self,
        keyword: &'static str,
        exported: bool,
        declarator: &VariableDeclarator<'_>,
    ) -> Result<ScriptStatement> {
        let span = declarator.span;
        let targets = match &declarator.id.kind {
            BindingPatternKind::BindingIdentifier(ident) => vec![ident.name.to_string()],
            BindingPatternKind::ArrayPattern(array) => {
                if array.rest.is_some() {
                    return Err(self.unsupported("starred unpacking", span));
                }
                let mut names = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    match element.as_ref().map(|pattern| &pattern.kind) {
                        Some(BindingPatternKind::BindingIdentifier(ident)) => {
                            names.push(ident.name.to_string());
                        }
                        Some(_) => return Err(self.unsupported("nested unpacking", span)),
                        None => return Err(self.unsupported("elided unpacking element", span)),
                    }
                }
                names
            }
            BindingPatternKind::ObjectPattern(_) => {
                return Err(self.unsupported("object destructuring", span));
            }
            BindingPatternKind::AssignmentPattern(_) => {
                return Err(self.unsupported("default value pattern", span));
            }
        };

        let value = declarator.init.as_ref().map(|init| {
            let (refs, calls) = self.collect(|c| c.visit_expression(init));
            BoundValue { calls, refs }
        });

        let (line, column) = self.position(span);
        Ok(ScriptStatement {
            shape: StatementShape::Bind {
                keyword: Some(keyword),
                targets,
                augmented: false,
                exported,
                value,
            },
            text: format!(
                "{}{} {};",
                if exported { "export " } else { "" },
                keyword,
                self.text(span)
            ),
            line,
            column,
        })
    }

    fn assignment_targets(&self, target: &AssignmentTarget<'_>, span: Span) -> Result<Vec<String>> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => Ok(vec![ident.name.to_string()]),
            AssignmentTarget::StaticMemberExpression(_)
            | AssignmentTarget::PrivateFieldExpression(_) => {
                Err(self.unsupported("attribute target", span))
            }
            AssignmentTarget::ComputedMemberExpression(_) => {
                Err(self.unsupported("subscript target", span))
            }
            AssignmentTarget::ArrayAssignmentTarget(array) => self.array_targets(array, span),
            AssignmentTarget::ObjectAssignmentTarget(_) => {
                Err(self.unsupported("object destructuring", span))
            }
            _ => Err(self.unsupported("expression target", span)),
        }
    }

    fn array_targets(&self, array: &ArrayAssignmentTarget<'_>, span: Span) -> Result<Vec<String>> {
        if array.rest.is_some() {
            return Err(self.unsupported("starred unpacking", span));
        }
        let mut names = Vec::with_capacity(array.elements.len());
        for element in &array.elements {
            match element {
                Some(AssignmentTargetMaybeDefault::AssignmentTargetIdentifier(ident)) => {
                    names.push(ident.name.to_string());
                }
                Some(_) => return Err(self.unsupported("nested unpacking", span)),
                None => return Err(self.unsupported("elided unpacking element", span)),
            }
        }
        Ok(names)
    }

    fn collect<F>(&self, visit: F) -> (Vec<String>, Vec<CallSite>)
    where
        F: FnOnce(&mut ExpressionCollector<'s>),
    {
        let mut collector = ExpressionCollector::new(self.source);
        visit(&mut collector);
        (collector.names, collector.calls)
    }

    fn statement(&self, shape: StatementShape, span: Span) -> ScriptStatement {
        let text = self.text(span).trim_end();
        let text = if text.ends_with(';') || text.ends_with('}') {
            text.to_string()
        } else {
            format!("{text};")
        };
        let (line, column) = self.position(span);
        ScriptStatement {
            shape,
            text,
            line,
            column,
        }
    }

    fn unsupported(&self, target: &str, span: Span) -> WorkflowError {
        let (line, column) = self.position(span);
        WorkflowError::UnsupportedAssignment {
            target: target.to_string(),
            line,
            column,
            statement: self.text(span).to_string(),
        }
    }

    fn text(&self, span: Span) -> &'s str {
        &self.source[span.start as usize..span.end as usize]
    }

    /// 1-based line and column of the span start.
    fn position(&self, span: Span) -> (usize, usize) {
        let before = &self.source[..span.start as usize];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map_or(0, |tail| tail.chars().count())
            + 1;
        (line, column)
    }
}

/// Looks through parentheses and `await`.
fn unwrap_expression<'e, 'a>(expr: &'e Expression<'a>) -> &'e Expression<'a> {
    match expr {
        Expression::ParenthesizedExpression(paren) => unwrap_expression(&paren.expression),
        Expression::AwaitExpression(await_expr) => unwrap_expression(&await_expr.argument),
        _ => expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Vec<ScriptStatement>> {
        ScriptParser::new(source).parse()
    }

    fn operations(calls: &[CallSite]) -> Vec<&str> {
        calls.iter().map(|c| c.operation.as_str()).collect()
    }

    #[test]
    fn test_declaration_binds_name_and_call() {
        let statements = parse("const level = slider(\"Level\", { min: base });").unwrap();
        assert_eq!(statements.len(), 1);

        match &statements[0].shape {
            StatementShape::Bind {
                keyword,
                targets,
                augmented,
                exported,
                value: Some(value),
            } => {
                assert_eq!(*keyword, Some("const"));
                assert_eq!(targets, &vec!["level".to_string()]);
                assert!(!augmented);
                assert!(!exported);
                assert_eq!(value.calls.len(), 1);
                assert_eq!(value.calls[0].operation, "slider");
                assert_eq!(value.calls[0].text, "slider(\"Level\", { min: base })");
                assert_eq!(value.refs, vec!["slider", "base"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(statements[0].text, "const level = slider(\"Level\", { min: base });");
    }

    #[test]
    fn test_multiple_declarators_split() {
        let statements = parse("let a = 1, b = a + 1;").unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].text, "let a = 1;");
        assert_eq!(statements[1].text, "let b = a + 1;");
    }

    #[test]
    fn test_nested_calls_are_collected_outermost_first() {
        let statements = parse("const total = sum(get_df(\"x\"), await query(q));").unwrap();
        match &statements[0].shape {
            StatementShape::Bind { value: Some(value), .. } => {
                assert_eq!(operations(&value.calls), vec!["sum", "get_df", "query"]);
                assert_eq!(value.calls[1].text, "get_df(\"x\")");
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_calls_inside_functions_are_not_evaluated() {
        let statements = parse("const later = () => get_df(\"x\");").unwrap();
        match &statements[0].shape {
            StatementShape::Bind { value: Some(value), .. } => {
                assert!(value.calls.is_empty());
                assert_eq!(value.refs, vec!["get_df"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_shadowed_names_are_not_references() {
        let statements = parse(
            "const doubled = [1, 2].map((n) => n * factor);\nfor (const row of rows) { show(row, limit); }",
        )
        .unwrap();

        match &statements[0].shape {
            StatementShape::Bind { value: Some(value), .. } => {
                assert_eq!(value.refs, vec!["factor"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        match &statements[1].shape {
            StatementShape::Other { refs, calls } => {
                assert_eq!(refs, &vec!["rows", "show", "limit"]);
                assert_eq!(operations(calls), vec!["show"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_hoisted_local_shadows_outer_name() {
        let statements =
            parse("function scale() { helper(); function helper() {} return n; }").unwrap();
        match &statements[0].shape {
            StatementShape::Function { name, refs } => {
                assert_eq!(name, "scale");
                assert_eq!(refs, &vec!["n".to_string()]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_augmented_and_tuple_assignment() {
        let statements = parse("total += price;\n[lo, hi] = bounds(data);").unwrap();

        match &statements[0].shape {
            StatementShape::Bind {
                keyword: None,
                targets,
                augmented: true,
                ..
            } => assert_eq!(targets, &vec!["total".to_string()]),
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(statements[0].text, "total += price;");

        match &statements[1].shape {
            StatementShape::Bind { targets, value, .. } => {
                assert_eq!(targets, &vec!["lo".to_string(), "hi".to_string()]);
                assert_eq!(operations(&value.as_ref().unwrap().calls), vec!["bounds"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(statements[1].line, 2);
    }

    #[test]
    fn test_expression_and_other_statements() {
        let statements = parse(
            "import { fmt } from \"./fmt.js\";\nui.text(`hi ${name}`);\nif (flag) { show(flag); }",
        )
        .unwrap();

        assert_eq!(statements[0].shape, StatementShape::Declaration);
        match &statements[1].shape {
            StatementShape::Expression { calls, refs, expression } => {
                assert_eq!(operations(calls), vec!["text"]);
                assert_eq!(refs, &vec!["ui".to_string(), "name".to_string()]);
                assert_eq!(expression, "ui.text(`hi ${name}`)");
            }
            other => panic!("unexpected shape {other:?}"),
        }
        match &statements[2].shape {
            StatementShape::Other { refs, .. } => {
                assert_eq!(refs, &vec!["flag".to_string(), "show".to_string()]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_function_class_and_export_shapes() {
        let statements = parse(
            "function twice() { return n * 2; }\nclass Report { total() { return rows.length; } }\nexport const limit = get_df(\"l\"), other = 1;\nexport function shown() { return n; }\nexport default n;",
        )
        .unwrap();
        assert_eq!(statements.len(), 6);

        assert_eq!(
            statements[0].shape,
            StatementShape::Function {
                name: "twice".to_string(),
                refs: vec!["n".to_string()],
            }
        );
        assert_eq!(
            statements[1].shape,
            StatementShape::Function {
                name: "Report".to_string(),
                refs: vec!["rows".to_string()],
            }
        );
        match &statements[2].shape {
            StatementShape::Bind { targets, exported, value, .. } => {
                assert_eq!(targets, &vec!["limit".to_string()]);
                assert!(exported);
                assert_eq!(operations(&value.as_ref().unwrap().calls), vec!["get_df"]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(statements[2].text, "export const limit = get_df(\"l\");");
        assert_eq!(statements[3].text, "export const other = 1;");
        assert!(matches!(&statements[4].shape, StatementShape::Export { refs, .. } if refs == &vec!["n".to_string()]));
        assert!(matches!(&statements[5].shape, StatementShape::Export { refs, .. } if refs == &vec!["n".to_string()]));
    }

    #[test]
    fn test_unsupported_targets() {
        let cases = [
            ("obj.attr = 1;", "attribute target"),
            ("data[\"k\"] = 1;", "subscript target"),
            ("[a, ...rest] = items;", "starred unpacking"),
            ("const [a, ...rest] = items;", "starred unpacking"),
            ("({ a } = items);", "object destructuring"),
            ("const { a } = items;", "object destructuring"),
            ("[a, [b, c]] = items;", "nested unpacking"),
        ];

        for (source, expected) in cases {
            match parse(source) {
                Err(WorkflowError::UnsupportedAssignment { target, line, .. }) => {
                    assert_eq!(target, expected, "for {source}");
                    assert_eq!(line, 1);
                }
                other => panic!("expected unsupported assignment for {source}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_error_position() {
        match parse("const a = 1;\n  obj.x = a;") {
            Err(WorkflowError::UnsupportedAssignment { line, column, statement, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, 3);
                assert_eq!(statement, "obj.x = a;");
            }
            other => panic!("expected unsupported assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse("const = ;"), Err(WorkflowError::ScriptParse(_))));
    }
}
