//! WAT module parser: S-expressions to AST.
//!
//! Folded instructions are flattened into plain sequences, operands first.
//! Shorthand exports attached to a definition (`(func (export "f") ...)`) are
//! collected while the definition is read and spliced in as standalone
//! `ModuleExport` fields right after it. Shorthand imports
//! (`(global (import "m" "g") i32)`) become `ModuleImport` fields in place of
//! the definition.

use super::error::ParseError;
use super::sexpr::{self, SExpr};
use super::token::{self, Span};
use crate::ast::builder as t;
use crate::ast::*;
use crate::parser::opcodes::{self, Immediate, Opcode};
use crate::parser::MAX_NESTING;

/// Parses WAT source. Either every top-level form is a `(module ...)`, or the
/// forms are the fields of one implicit module.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let exprs = sexpr::read_all(source)?;
    let mut parser = Parser::default();

    if exprs.iter().all(|e| e.is_list_headed_by("module")) {
        let mut body = Vec::new();
        for expr in exprs.iter() {
            body.push(Node::Module(parser.parse_module(expr)?));
        }
        return Ok(t::program(body));
    }

    let mut fields = Vec::new();
    for expr in exprs.iter() {
        parser.parse_field(expr, &mut fields)?;
    }
    let module = Module {
        id: None,
        fields,
        metadata: None,
    };
    Ok(t::program(vec![Node::Module(module)]))
}

fn describe(expr: &SExpr) -> String {
    match expr {
        SExpr::Atom(token) => token.kind.to_string(),
        SExpr::List { .. } => match expr.head() {
            Some(head) => format!("({} ...)", head),
            None => "(...)".to_string(),
        },
    }
}

fn unexpected(expr: &SExpr, context: &str) -> ParseError {
    ParseError::new(format!("Unexpected token in {}: {}", context, describe(expr)), expr.span())
}

/// The items of a list after its head keyword.
struct Items<'s> {
    items: &'s [SExpr],
    pos: usize,
    span: Span,
}

impl<'s> Items<'s> {
    fn new(list: &'s SExpr) -> Items<'s> {
        let items = list.as_list().unwrap_or(&[]);
        Items {
            items,
            pos: if list.head().is_some() { 1 } else { 0 },
            span: list.span(),
        }
    }

    fn peek(&self) -> Option<&'s SExpr> {
        self.items.get(self.pos)
    }

    fn next(&mut self) -> Option<&'s SExpr> {
        let item = self.items.get(self.pos);
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn take_id(&mut self) -> Option<&'s str> {
        let id = self.peek().and_then(SExpr::as_id)?;
        self.pos += 1;
        Some(id)
    }

    fn take_list(&mut self, head: &str) -> Option<&'s SExpr> {
        match self.peek() {
            Some(expr) if expr.is_list_headed_by(head) => {
                self.pos += 1;
                Some(expr)
            }
            _ => None,
        }
    }

    /// Span for "expected X" errors: the next item, or the enclosing list.
    fn here(&self) -> Span {
        self.peek().map(SExpr::span).unwrap_or(self.span)
    }

    fn expect_string(&mut self, context: &str) -> Result<String, ParseError> {
        let span = self.here();
        let bytes = self
            .next()
            .and_then(SExpr::as_string)
            .ok_or_else(|| ParseError::new(format!("Expected a string in {}", context), span))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ParseError::new(format!("Invalid UTF-8 name in {}", context), span))
    }

    fn expect_end(&self, context: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(expr) => Err(unexpected(expr, context)),
            None => Ok(()),
        }
    }
}

fn parse_index(expr: &SExpr) -> Result<Index, ParseError> {
    if let Some(id) = expr.as_id() {
        return Ok(t::identifier_index(id));
    }
    match expr.as_number().and_then(|n| token::parse_u32(n).map(|v| (n, v))) {
        Some((raw, value)) => Ok(Index::NumberLiteral(t::number_literal_with_raw(value as i64, raw))),
        None => Err(unexpected(expr, "index")),
    }
}

fn parse_valtype(expr: &SExpr) -> Result<Valtype, ParseError> {
    expr.as_keyword()
        .and_then(Valtype::from_name)
        .ok_or_else(|| unexpected(expr, "value type"))
}

fn parse_limits(items: &mut Items<'_>) -> Result<Limit, ParseError> {
    let span = items.here();
    let min = items
        .next()
        .and_then(SExpr::as_number)
        .and_then(token::parse_u32)
        .ok_or_else(|| ParseError::new("Expected a limit", span))?;
    let max = match items.peek().and_then(SExpr::as_number) {
        Some(text) => {
            let span = items.here();
            items.next();
            Some(token::parse_u32(text).ok_or_else(|| ParseError::new("Invalid limit", span))?)
        }
        None => None,
    };
    Ok(t::limit(min, max))
}

/// `(export "name")` inside a definition.
fn parse_inline_export(expr: &SExpr) -> Result<String, ParseError> {
    let mut items = Items::new(expr);
    let name = items.expect_string("export")?;
    items.expect_end("export")?;
    Ok(name)
}

/// `(import "module" "name")` inside a definition.
fn parse_inline_import(expr: &SExpr) -> Result<(String, String), ParseError> {
    let mut items = Items::new(expr);
    let module = items.expect_string("import")?;
    let name = items.expect_string("import")?;
    items.expect_end("import")?;
    Ok((module, name))
}

fn parse_global_type(items: &mut Items<'_>) -> Result<GlobalType, ParseError> {
    let span = items.here();
    let expr = items
        .next()
        .ok_or_else(|| ParseError::new("Could not determine global type", span))?;
    if expr.is_list_headed_by("mut") {
        let mut inner = Items::new(expr);
        let valtype = match inner.next() {
            Some(v) => parse_valtype(v)?,
            None => return Err(ParseError::new("Expected a value type after mut", expr.span())),
        };
        inner.expect_end("global type")?;
        return Ok(t::global_type(valtype, Mutability::Var));
    }
    if expr.as_list().is_some() {
        return Err(ParseError::new("Unsupported global type, expected mut", expr.span()));
    }
    Ok(t::global_type(parse_valtype(expr)?, Mutability::Const))
}

/// Params of `(param i32 i64)` or `(param $x i32)`.
fn parse_params(expr: &SExpr, out: &mut Vec<FuncParam>) -> Result<(), ParseError> {
    let mut items = Items::new(expr);
    if let Some(id) = items.take_id() {
        let valtype = match items.next() {
            Some(v) => parse_valtype(v)?,
            None => return Err(ParseError::new("Function param has no valtype", expr.span())),
        };
        items.expect_end("param")?;
        out.push(FuncParam {
            id: Some(id.to_string()),
            valtype,
        });
        return Ok(());
    }
    while let Some(v) = items.next() {
        out.push(FuncParam {
            id: None,
            valtype: parse_valtype(v)?,
        });
    }
    Ok(())
}

fn parse_results(expr: &SExpr, out: &mut Vec<Valtype>) -> Result<(), ParseError> {
    let mut items = Items::new(expr);
    while let Some(v) = items.next() {
        out.push(parse_valtype(v)?);
    }
    Ok(())
}

/// `(type x)? (param ...)* (result ...)*`. A bare type reference stays a
/// reference; explicit params or results make the signature inline.
fn parse_type_use(items: &mut Items<'_>) -> Result<SignatureRef, ParseError> {
    let type_ref = match items.take_list("type") {
        Some(expr) => {
            let mut inner = Items::new(expr);
            let index = match inner.next() {
                Some(index) => parse_index(index)?,
                None => return Err(ParseError::new("Expected a type index", expr.span())),
            };
            inner.expect_end("type use")?;
            Some(index)
        }
        None => None,
    };
    let mut params = Vec::new();
    while let Some(expr) = items.take_list("param") {
        parse_params(expr, &mut params)?;
    }
    let mut results = Vec::new();
    while let Some(expr) = items.take_list("result") {
        parse_results(expr, &mut results)?;
    }
    Ok(match type_ref {
        Some(index) if params.is_empty() && results.is_empty() => SignatureRef::Ref(index),
        _ => SignatureRef::Inline(t::signature(params, results)),
    })
}

/// `(result t)?` of a block.
fn parse_block_result(items: &mut Items<'_>) -> Result<Option<Valtype>, ParseError> {
    let expr = match items.take_list("result") {
        Some(expr) => expr,
        None => return Ok(None),
    };
    let mut results = Vec::new();
    parse_results(expr, &mut results)?;
    match results.len() {
        0 => Ok(None),
        1 => Ok(Some(results[0])),
        _ => Err(ParseError::new("Multiple block results are not supported", expr.span())),
    }
}

fn natural_alignment(opcode: &Opcode) -> u32 {
    if opcode.name.contains('8') {
        0
    } else if opcode.name.contains("16") {
        1
    } else if opcode.name.contains("32") {
        2
    } else {
        match opcode.object {
            Some(Valtype::I64) | Some(Valtype::F64) => 3,
            _ => 2,
        }
    }
}

fn instr(opcode: &Opcode, args: Vec<Node>, mem_arg: Option<MemArg>) -> Node {
    Node::Instr(Instr {
        id: opcode.name.to_string(),
        object: opcode.object,
        args,
        mem_arg,
    })
}

fn i32_const(value: i32) -> Node {
    Node::Instr(Instr {
        id: "const".to_string(),
        object: Some(Valtype::I32),
        args: vec![Node::NumberLiteral(t::number_literal(value as i64))],
        mem_arg: None,
    })
}

#[derive(Default)]
struct Parser {
    names: NameGenerator,
    /// Shorthand exports of the definition being parsed.
    exports: Vec<Node>,
    /// Structured blocks currently open.
    depth: usize,
}

impl Parser {
    fn parse_module(&mut self, expr: &SExpr) -> Result<Module, ParseError> {
        let mut items = Items::new(expr);
        let id = items.take_id().map(str::to_string);
        let mut fields = Vec::new();
        while let Some(field) = items.next() {
            self.parse_field(field, &mut fields)?;
        }
        Ok(Module {
            id,
            fields,
            metadata: None,
        })
    }

    fn parse_field(&mut self, expr: &SExpr, fields: &mut Vec<Node>) -> Result<(), ParseError> {
        match expr.head() {
            Some("type") => fields.push(self.parse_type(expr)?),
            Some("import") => fields.push(self.parse_import(expr)?),
            Some("export") => fields.push(self.parse_export(expr)?),
            Some("func") => fields.push(self.parse_func(expr)?),
            Some("global") => fields.push(self.parse_global(expr)?),
            Some("memory") => self.parse_memory(expr, fields)?,
            Some("table") => fields.push(self.parse_table(expr)?),
            Some("data") => fields.push(self.parse_data(expr)?),
            Some("elem") => fields.push(self.parse_elem(expr)?),
            Some("start") => fields.push(self.parse_start(expr)?),
            _ => return Err(unexpected(expr, "module")),
        }
        fields.append(&mut self.exports);
        Ok(())
    }

    /// Reads any number of `(export "name")` forms for a definition named `id`.
    fn take_exports(&mut self, items: &mut Items<'_>, export_type: ExportType, id: &Identifier) -> Result<(), ParseError> {
        while let Some(expr) = items.take_list("export") {
            let name = parse_inline_export(expr)?;
            self.exports
                .push(t::module_export(&name, export_type, Index::Identifier(id.clone())));
        }
        Ok(())
    }

    fn name_or_generated(&mut self, items: &mut Items<'_>, prefix: &str) -> Identifier {
        match items.take_id() {
            Some(id) => t::identifier(id),
            None => t::synthesized_identifier(self.names.unique(prefix)),
        }
    }

    /* MODULE FIELDS **************************************************/

    fn parse_type(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let id = items.take_id().map(t::identifier);
        let func = match items.take_list("func") {
            Some(func) => func,
            None => return Err(ParseError::new("Expected a function type", items.here())),
        };
        items.expect_end("type")?;

        let mut inner = Items::new(func);
        let mut params = Vec::new();
        while let Some(p) = inner.take_list("param") {
            parse_params(p, &mut params)?;
        }
        let mut results = Vec::new();
        while let Some(r) = inner.take_list("result") {
            parse_results(r, &mut results)?;
        }
        inner.expect_end("func type")?;
        Ok(t::type_instruction(id, t::signature(params, results)))
    }

    fn parse_import(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let module = items.expect_string("import")?;
        let name = items.expect_string("import")?;
        let descr = match items.next() {
            Some(descr) => descr,
            None => return Err(ParseError::new("Expected an import description", expr.span())),
        };
        items.expect_end("import")?;

        let mut inner = Items::new(descr);
        let mut id = None;
        let descr = match descr.head() {
            Some("func") => {
                let fn_name = match inner.take_id() {
                    Some(id) => t::identifier(id),
                    None => t::identifier(&format!("{}.{}", module, name)),
                };
                let signature = parse_type_use(&mut inner)?;
                ImportDescr::FuncImportDescr(FuncImportDescr {
                    id: fn_name,
                    signature,
                })
            }
            Some("global") => {
                id = inner.take_id().map(t::identifier);
                ImportDescr::GlobalType(parse_global_type(&mut inner)?)
            }
            Some("memory") => {
                let mem_id = inner.take_id().map(t::identifier);
                ImportDescr::Memory(t::memory(parse_limits(&mut inner)?, mem_id))
            }
            Some("table") => {
                let table_id = inner.take_id().map(t::identifier);
                let limits = parse_limits(&mut inner)?;
                self.parse_elem_type(&mut inner)?;
                ImportDescr::Table(t::table(limits, table_id, vec![]))
            }
            _ => return Err(unexpected(descr, "import")),
        };
        inner.expect_end("import")?;

        let mut node = t::module_import(&module, &name, descr);
        if let Node::ModuleImport(import) = &mut node {
            import.id = id;
        }
        Ok(node)
    }

    fn parse_elem_type(&mut self, items: &mut Items<'_>) -> Result<(), ParseError> {
        match items.next() {
            Some(expr) if matches!(expr.as_keyword(), Some("anyfunc") | Some("funcref")) => Ok(()),
            Some(expr) => Err(unexpected(expr, "table")),
            None => Err(ParseError::new("Expected an element type", items.span)),
        }
    }

    fn parse_export(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let name = items.expect_string("export")?;
        let descr = match items.next() {
            Some(descr) => descr,
            None => return Err(ParseError::new("Unknown export type", expr.span())),
        };
        items.expect_end("export")?;

        let export_type = match descr.head() {
            Some("func") => ExportType::Func,
            Some("global") => ExportType::Global,
            Some("memory") => ExportType::Memory,
            Some("table") => ExportType::Table,
            _ => return Err(ParseError::new("Unknown export type", descr.span())),
        };
        let mut inner = Items::new(descr);
        let index = match inner.next() {
            Some(index) => parse_index(index)?,
            None => return Err(ParseError::new("Exported function must have a name", descr.span())),
        };
        inner.expect_end("export")?;
        Ok(t::module_export(&name, export_type, index))
    }

    fn parse_func(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let name = self.name_or_generated(&mut items, "func");
        self.take_exports(&mut items, ExportType::Func, &name)?;

        if let Some(import) = items.take_list("import") {
            let (module, field) = parse_inline_import(import)?;
            let signature = parse_type_use(&mut items)?;
            items.expect_end("func import")?;
            let descr = ImportDescr::FuncImportDescr(FuncImportDescr { id: name, signature });
            return Ok(t::module_import(&module, &field, descr));
        }

        let signature = parse_type_use(&mut items)?;
        let mut locals = Vec::new();
        while let Some(local) = items.take_list("local") {
            parse_params(local, &mut locals)?;
        }
        let body = self.parse_body(&mut items)?;

        Ok(Node::Func(Func {
            name,
            signature,
            locals,
            body,
            metadata: None,
        }))
    }

    fn parse_global(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let name = self.name_or_generated(&mut items, "global");
        self.take_exports(&mut items, ExportType::Global, &name)?;

        let import = match items.take_list("import") {
            Some(import) => Some(parse_inline_import(import)?),
            None => None,
        };
        let global_type = parse_global_type(&mut items)?;

        if let Some((module, field)) = import {
            items.expect_end("global import")?;
            let mut node = t::module_import(&module, &field, ImportDescr::GlobalType(global_type));
            if let Node::ModuleImport(import) = &mut node {
                import.id = Some(name);
            }
            return Ok(node);
        }

        let init = self.parse_body(&mut items)?;
        Ok(Node::Global(Global {
            global_type,
            init,
            name: Some(name),
        }))
    }

    /// `(memory $id? (data "..."))` also emits a data segment at offset 0.
    fn parse_memory(&mut self, expr: &SExpr, fields: &mut Vec<Node>) -> Result<(), ParseError> {
        let mut items = Items::new(expr);
        let id = self.name_or_generated(&mut items, "memory");
        self.take_exports(&mut items, ExportType::Memory, &id)?;

        if let Some(import) = items.take_list("import") {
            let (module, field) = parse_inline_import(import)?;
            let limits = parse_limits(&mut items)?;
            items.expect_end("memory import")?;
            let descr = ImportDescr::Memory(t::memory(limits, Some(id)));
            fields.push(t::module_import(&module, &field, descr));
            return Ok(());
        }

        if let Some(data) = items.take_list("data") {
            items.expect_end("memory")?;
            let bytes = self.parse_data_strings(&mut Items::new(data))?;
            let pages = ((bytes.len() + 0xffff) / 0x10000) as u32;
            fields.push(Node::Memory(t::memory(t::limit(pages, Some(pages)), Some(id.clone()))));
            fields.push(Node::Data(Data {
                memory_index: Index::Identifier(id),
                offset: vec![i32_const(0)],
                init: ByteArray { values: bytes },
            }));
            return Ok(());
        }

        let limits = parse_limits(&mut items)?;
        items.expect_end("memory")?;
        fields.push(Node::Memory(t::memory(limits, Some(id))));
        Ok(())
    }

    /// `(table $id? min max? anyfunc)` or `(table $id? anyfunc (elem f*))`.
    fn parse_table(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let name = self.name_or_generated(&mut items, "table");
        self.take_exports(&mut items, ExportType::Table, &name)?;

        if let Some(import) = items.take_list("import") {
            let (module, field) = parse_inline_import(import)?;
            let limits = parse_limits(&mut items)?;
            self.parse_elem_type(&mut items)?;
            items.expect_end("table import")?;
            let descr = ImportDescr::Table(t::table(limits, Some(name), vec![]));
            return Ok(t::module_import(&module, &field, descr));
        }

        if items.peek().and_then(SExpr::as_number).is_some() {
            let limits = parse_limits(&mut items)?;
            self.parse_elem_type(&mut items)?;
            items.expect_end("table")?;
            return Ok(Node::Table(t::table(limits, Some(name), vec![])));
        }

        self.parse_elem_type(&mut items)?;
        let mut elements = Vec::new();
        if let Some(elem) = items.take_list("elem") {
            let mut inner = Items::new(elem);
            while let Some(index) = inner.next() {
                elements.push(parse_index(index)?);
            }
        }
        items.expect_end("table")?;
        let size = elements.len() as u32;
        Ok(Node::Table(t::table(t::limit(size, Some(size)), Some(name), elements)))
    }

    fn parse_data_strings(&mut self, items: &mut Items<'_>) -> Result<Vec<u8>, ParseError> {
        let mut bytes = Vec::new();
        while let Some(expr) = items.next() {
            match expr.as_string() {
                Some(s) => bytes.extend_from_slice(s),
                None => return Err(unexpected(expr, "data")),
            }
        }
        Ok(bytes)
    }

    /// `(offset instr*)` or a single folded instruction.
    fn parse_offset(&mut self, items: &mut Items<'_>, context: &str) -> Result<Vec<Node>, ParseError> {
        if let Some(offset) = items.take_list("offset") {
            return self.parse_body(&mut Items::new(offset));
        }
        match items.next() {
            Some(expr) if expr.as_list().is_some() => {
                let mut out = Vec::new();
                self.parse_folded(expr, &mut out)?;
                Ok(out)
            }
            Some(expr) => Err(unexpected(expr, context)),
            None => Err(ParseError::new(format!("Expected an offset in {}", context), items.span)),
        }
    }

    fn parse_data(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let memory_index = match items.peek() {
            Some(e) if e.as_id().is_some() || e.as_number().is_some() => {
                items.next();
                parse_index(e)?
            }
            _ => t::index_literal(0),
        };
        let offset = self.parse_offset(&mut items, "data")?;
        let values = self.parse_data_strings(&mut items)?;
        Ok(Node::Data(Data {
            memory_index,
            offset,
            init: ByteArray { values },
        }))
    }

    fn parse_elem(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let table = match items.peek() {
            Some(e) if e.as_id().is_some() || e.as_number().is_some() => {
                items.next();
                parse_index(e)?
            }
            _ => t::index_literal(0),
        };
        let offset = self.parse_offset(&mut items, "elem")?;
        let mut funcs = Vec::new();
        while let Some(index) = items.next() {
            funcs.push(parse_index(index)?);
        }
        Ok(Node::Elem(Elem { table, offset, funcs }))
    }

    fn parse_start(&mut self, expr: &SExpr) -> Result<Node, ParseError> {
        let mut items = Items::new(expr);
        let index = match items.next() {
            Some(index) => parse_index(index)?,
            None => return Err(ParseError::new("Unknown start, expected a function index", expr.span())),
        };
        items.expect_end("start")?;
        Ok(t::start(index))
    }

    /* INSTRUCTIONS ***************************************************/

    /// The remaining items as one instruction sequence.
    fn parse_body(&mut self, items: &mut Items<'_>) -> Result<Vec<Node>, ParseError> {
        let (body, stop) = self.parse_sequence(items, &[])?;
        match stop {
            Some(expr) => Err(unexpected(expr, "instruction sequence")),
            None => Ok(body),
        }
    }

    /// Reads instructions until the items run out or a keyword in `stops`
    /// (`end`, `else`) is found; the stop keyword is consumed and returned.
    fn parse_sequence<'s>(
        &mut self,
        items: &mut Items<'s>,
        stops: &[&str],
    ) -> Result<(Vec<Node>, Option<&'s SExpr>), ParseError> {
        let mut out = Vec::new();
        while let Some(expr) = items.next() {
            if expr.as_list().is_some() {
                self.parse_folded(expr, &mut out)?;
                continue;
            }
            let word = match expr.as_keyword() {
                Some(word) => word,
                None => return Err(unexpected(expr, "instruction sequence")),
            };
            if stops.contains(&word) {
                return Ok((out, Some(expr)));
            }
            if word == "end" || word == "else" {
                return Err(unexpected(expr, "instruction sequence"));
            }
            let node = self.parse_plain(word, expr, items)?;
            out.push(node);
        }
        Ok((out, None))
    }

    fn enter_block(&mut self, at: &SExpr) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("blocks nested deeper than {}", MAX_NESTING),
                at.span(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// A flat instruction; block forms read up to their `end`.
    fn parse_plain(&mut self, word: &str, at: &SExpr, items: &mut Items<'_>) -> Result<Node, ParseError> {
        match word {
            "block" | "loop" | "if" => {
                self.enter_block(at)?;
                let node = self.parse_plain_block(word, at, items)?;
                self.depth -= 1;
                Ok(node)
            }
            _ => self.parse_op(word, at, items),
        }
    }

    fn parse_plain_block(&mut self, word: &str, at: &SExpr, items: &mut Items<'_>) -> Result<Node, ParseError> {
        match word {
            "block" | "loop" => {
                let label = self.name_or_generated(items, word);
                let result = parse_block_result(items)?;
                let (body, stop) = self.parse_sequence(items, &["end"])?;
                if stop.is_none() {
                    return Err(ParseError::new(format!("Missing end of {}", word), at.span()));
                }
                items.take_id();
                if word == "loop" {
                    Ok(Node::LoopInstruction(LoopInstruction { label, result, instr: body }))
                } else {
                    Ok(Node::BlockInstruction(BlockInstruction { label, instr: body, result }))
                }
            }
            "if" => {
                let test_label = self.name_or_generated(items, "if");
                let result = parse_block_result(items)?;
                let (consequent, stop) = self.parse_sequence(items, &["else", "end"])?;
                let alternate = match stop.and_then(SExpr::as_keyword) {
                    Some("else") => {
                        items.take_id();
                        let (alternate, stop) = self.parse_sequence(items, &["end"])?;
                        if stop.is_none() {
                            return Err(ParseError::new("Missing end of if", at.span()));
                        }
                        alternate
                    }
                    Some(_) => Vec::new(),
                    None => return Err(ParseError::new("Missing end of if", at.span())),
                };
                items.take_id();
                Ok(Node::IfInstruction(IfInstruction {
                    test_label,
                    result,
                    consequent,
                    alternate,
                }))
            }
            _ => self.parse_op(word, at, items),
        }
    }

    /// A folded instruction, flattened onto `out` with its operands first.
    fn parse_folded(&mut self, expr: &SExpr, out: &mut Vec<Node>) -> Result<(), ParseError> {
        let word = match expr.head() {
            Some(word) => word,
            None => return Err(unexpected(expr, "instruction sequence")),
        };
        if !matches!(word, "block" | "loop" | "if") {
            return self.parse_folded_op(word, expr, out);
        }
        self.enter_block(expr)?;
        self.parse_folded_op(word, expr, out)?;
        self.depth -= 1;
        Ok(())
    }

    fn parse_folded_op(&mut self, word: &str, expr: &SExpr, out: &mut Vec<Node>) -> Result<(), ParseError> {
        let mut items = Items::new(expr);

        match word {
            "block" | "loop" => {
                let label = self.name_or_generated(&mut items, word);
                let result = parse_block_result(&mut items)?;
                let body = self.parse_body(&mut items)?;
                out.push(if word == "loop" {
                    Node::LoopInstruction(LoopInstruction { label, result, instr: body })
                } else {
                    Node::BlockInstruction(BlockInstruction { label, instr: body, result })
                });
            }
            "if" => {
                let test_label = self.name_or_generated(&mut items, "if");
                let result = parse_block_result(&mut items)?;
                let mut consequent = Vec::new();
                let mut alternate = Vec::new();
                while let Some(part) = items.next() {
                    if part.is_list_headed_by("then") {
                        consequent = self.parse_body(&mut Items::new(part))?;
                    } else if part.is_list_headed_by("else") {
                        alternate = self.parse_body(&mut Items::new(part))?;
                    } else if part.as_list().is_some() {
                        // condition operands
                        self.parse_folded(part, out)?;
                    } else {
                        return Err(unexpected(part, "if body"));
                    }
                }
                out.push(Node::IfInstruction(IfInstruction {
                    test_label,
                    result,
                    consequent,
                    alternate,
                }));
            }
            "then" | "else" | "end" => return Err(unexpected(expr, "instruction sequence")),
            _ => {
                let node = self.parse_op(word, expr, &mut items)?;
                while let Some(operand) = items.next() {
                    if operand.as_list().is_none() {
                        return Err(unexpected(operand, "nested instruction"));
                    }
                    self.parse_folded(operand, out)?;
                }
                out.push(node);
            }
        }
        Ok(())
    }

    /// A plain instruction and its immediates.
    fn parse_op(&mut self, word: &str, at: &SExpr, items: &mut Items<'_>) -> Result<Node, ParseError> {
        let opcode = match opcodes::by_mnemonic(word) {
            Some(opcode) => opcode,
            None => return Err(ParseError::new(format!("Unknown instruction: {}", word), at.span())),
        };

        let node = match opcode.immediate {
            Immediate::None | Immediate::MemoryReserved => instr(opcode, vec![], None),
            Immediate::Block => return Err(unexpected(at, "instruction sequence")),
            Immediate::Index => {
                let index = match items.next() {
                    Some(target) => parse_index(target)?,
                    None => return Err(ParseError::new(format!("Missing argument in {}", word), at.span())),
                };
                if opcode.name == "call" {
                    t::call_instruction(index)
                } else {
                    instr(opcode, vec![Node::from(index)], None)
                }
            }
            Immediate::BrTable => {
                let mut args = Vec::new();
                while let Some(target) = items.peek() {
                    if target.as_id().is_none() && target.as_number().is_none() {
                        break;
                    }
                    items.next();
                    args.push(Node::from(parse_index(target)?));
                }
                if args.is_empty() {
                    return Err(ParseError::new("Missing argument in br_table", at.span()));
                }
                instr(opcode, args, None)
            }
            Immediate::CallIndirect => t::call_indirect_instruction(parse_type_use(items)?),
            Immediate::MemArg => {
                let mut mem_arg = MemArg {
                    align: natural_alignment(opcode),
                    offset: 0,
                };
                while let Some(expr) = items.peek() {
                    let keyword = match expr.as_keyword() {
                        Some(k) => k,
                        None => break,
                    };
                    if let Some(value) = keyword.strip_prefix("offset=") {
                        mem_arg.offset = token::parse_u32(value)
                            .ok_or_else(|| ParseError::new("Invalid memory offset", expr.span()))?;
                    } else if let Some(value) = keyword.strip_prefix("align=") {
                        let bytes = token::parse_u32(value)
                            .filter(|b| b.is_power_of_two())
                            .ok_or_else(|| ParseError::new("Alignment must be a power of two", expr.span()))?;
                        mem_arg.align = bytes.trailing_zeros();
                    } else {
                        break;
                    }
                    items.next();
                }
                instr(opcode, vec![], Some(mem_arg))
            }
            Immediate::I32 | Immediate::I64 | Immediate::F32 | Immediate::F64 => {
                let (raw, span) = match items.next() {
                    Some(expr) => match expr.as_number() {
                        Some(raw) => (raw, expr.span()),
                        None => return Err(unexpected(expr, "constant")),
                    },
                    None => return Err(ParseError::new(format!("Missing argument in {}", word), at.span())),
                };
                let invalid = || ParseError::new(format!("Invalid {} literal: {}", word, raw), span);
                let literal = match opcode.immediate {
                    Immediate::I32 => {
                        let value = token::parse_i32(raw).ok_or_else(invalid)?;
                        Node::NumberLiteral(t::number_literal_with_raw(value as i64, raw))
                    }
                    Immediate::I64 => {
                        let value = token::parse_i64(raw).ok_or_else(invalid)?;
                        Node::LongNumberLiteral(t::long_number_literal(value, raw))
                    }
                    Immediate::F32 => {
                        let value = token::parse_f32(raw).ok_or_else(invalid)?;
                        Node::FloatLiteral(t::float_literal_f32(value, raw))
                    }
                    _ => {
                        let value = token::parse_f64(raw).ok_or_else(invalid)?;
                        Node::FloatLiteral(t::float_literal_f64(value, raw))
                    }
                };
                instr(opcode, vec![literal], None)
            }
        };
        Ok(node)
    }
}
