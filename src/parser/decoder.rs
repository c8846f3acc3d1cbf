//! Binary module decoder.
//!
//! Sections are read in order into a flat list of module fields. The function
//! section only declares type indices, so function nodes are assembled at the
//! end by zipping the declared signatures with the code section entries, after
//! which exports are appended and the name section (if any) renames functions
//! and locals by index.

use super::encoding;
use super::opcodes::{self, Immediate, Opcode};
use super::reader::Reader;
use super::{DecodeError, DecodeErrorKind, DecoderOptions, MAX_NESTING};
use crate::ast::builder as t;
use crate::ast::*;
use log::{debug, trace};
use std::fmt;

/// Decodes a binary module into a program holding one module.
pub fn decode(bytes: &[u8], options: &DecoderOptions) -> Result<Program, DecodeError> {
    let mut decoder = Decoder::new(bytes, options);
    decoder.read_header()?;
    while !decoder.reader.is_eof() {
        decoder.read_section()?;
    }
    decoder.finish()
}

/// Upper bound on the locals of a single function, all declarations combined.
const MAX_LOCALS: u64 = 50_000;

struct DecodedFunc {
    id: Identifier,
    signature: Signature,
    is_external: bool,
}

struct CodeEntry {
    body: Vec<Node>,
    locals: Vec<Valtype>,
    body_size: u32,
}

struct PendingExport {
    name: String,
    export_type: ExportType,
    index: u32,
}

#[derive(Default)]
struct State {
    types: Vec<Signature>,
    functions: Vec<DecodedFunc>,
    tables: u32,
    memories: u32,
    globals: u32,
    code: Vec<CodeEntry>,
    exports: Vec<PendingExport>,
}

enum Terminator {
    End,
    Else,
}

struct Decoder<'a> {
    reader: Reader<'a>,
    options: &'a DecoderOptions,
    names: NameGenerator,
    state: State,
    fields: Vec<Node>,
    metadata: ModuleMetadata,
    next_section: u8,
    /// Structured blocks currently open.
    depth: usize,
}

fn valtype_from_byte(byte: u8) -> Option<Valtype> {
    match byte {
        encoding::VALTYPE_I32 => Some(Valtype::I32),
        encoding::VALTYPE_I64 => Some(Valtype::I64),
        encoding::VALTYPE_F32 => Some(Valtype::F32),
        encoding::VALTYPE_F64 => Some(Valtype::F64),
        _ => None,
    }
}

fn section_name(id: u8) -> &'static str {
    match id {
        encoding::SECTION_TYPE => "type",
        encoding::SECTION_IMPORT => "import",
        encoding::SECTION_FUNCTION => "func",
        encoding::SECTION_TABLE => "table",
        encoding::SECTION_MEMORY => "memory",
        encoding::SECTION_GLOBAL => "global",
        encoding::SECTION_EXPORT => "export",
        encoding::SECTION_START => "start",
        encoding::SECTION_ELEMENT => "element",
        encoding::SECTION_CODE => "code",
        encoding::SECTION_DATA => "data",
        _ => "custom",
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

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8], options: &'a DecoderOptions) -> Decoder<'a> {
        Decoder {
            reader: Reader::new(bytes),
            options,
            names: NameGenerator::new(),
            state: State::default(),
            fields: Vec::new(),
            metadata: ModuleMetadata::default(),
            next_section: encoding::SECTION_TYPE,
            depth: 0,
        }
    }

    fn dump(&self, what: fmt::Arguments<'_>) {
        if self.options.dump {
            trace!("{:#06x}:\t; {}", self.reader.pos(), what);
        }
    }

    fn error_at(&self, offset: usize, kind: DecodeErrorKind) -> DecodeError {
        DecodeError { kind, offset }
    }

    fn read_header(&mut self) -> Result<(), DecodeError> {
        let magic = self.reader.read_bytes(4)?;
        if magic != &encoding::MAGIC[..] {
            return Err(self.error_at(0, DecodeErrorKind::MagicHeader));
        }
        self.dump(format_args!("wasm magic header"));

        let version = self.reader.read_bytes(4)?;
        if version != &encoding::VERSION[..] {
            return Err(self.error_at(4, DecodeErrorKind::UnknownVersion));
        }
        self.dump(format_args!("wasm version"));
        Ok(())
    }

    fn read_section(&mut self) -> Result<(), DecodeError> {
        let start_offset = self.reader.pos();
        let id = self.reader.read_byte()?;

        if id != encoding::SECTION_CUSTOM {
            if id < self.next_section || id > encoding::SECTION_DATA {
                return Err(self.error_at(start_offset, DecodeErrorKind::UnexpectedSection(id)));
            }
            self.next_section = id + 1;
        }

        let size = self.reader.read_vu32()?;
        let body_start = self.reader.pos();
        if !self.reader.has_at_least(size as usize) {
            return Err(self.reader.error(DecodeErrorKind::UnexpectedEnd));
        }
        let body_end = body_start + size as usize;
        let name = section_name(id);

        debug!("section {} ({} bytes) at {:#x}", name, size, start_offset);
        self.dump(format_args!("section {}", name));

        let vector_of_size = match id {
            encoding::SECTION_CUSTOM => {
                self.read_section_custom(body_end)?;
                0
            }
            encoding::SECTION_START => {
                self.read_section_start()?;
                0
            }
            _ => {
                let count = self.reader.read_vu32()?;
                self.dump(format_args!("{} entries", count));
                match id {
                    encoding::SECTION_TYPE => self.read_section_type(count)?,
                    encoding::SECTION_IMPORT => self.read_section_import(count)?,
                    encoding::SECTION_FUNCTION => self.read_section_function(count)?,
                    encoding::SECTION_TABLE => self.read_section_table(count)?,
                    encoding::SECTION_MEMORY => self.read_section_memory(count)?,
                    encoding::SECTION_GLOBAL => self.read_section_global(count)?,
                    encoding::SECTION_EXPORT => self.read_section_export(count)?,
                    encoding::SECTION_ELEMENT => self.read_section_element(count)?,
                    encoding::SECTION_CODE => {
                        if self.options.ignore_code_section {
                            self.skip_to(body_end)?;
                        } else {
                            self.read_section_code(count)?;
                        }
                    }
                    _ => {
                        if self.options.ignore_data_section {
                            self.skip_to(body_end)?;
                        } else {
                            self.read_section_data(count)?;
                        }
                    }
                }
                count
            }
        };

        self.expect_position(body_end, "section")?;
        self.metadata
            .sections
            .push(t::section_metadata(name, start_offset, size, vector_of_size));
        Ok(())
    }

    fn skip_to(&mut self, end: usize) -> Result<(), DecodeError> {
        let pos = self.reader.pos();
        self.reader.skip(end.saturating_sub(pos))
    }

    fn expect_position(&self, end: usize, what: &'static str) -> Result<(), DecodeError> {
        let pos = self.reader.pos();
        if pos != end {
            return Err(self.error_at(
                pos,
                DecodeErrorKind::SizeMismatch {
                    what,
                    declared: end,
                    consumed: pos,
                },
            ));
        }
        Ok(())
    }

    /* SECTION READERS ************************************************/

    fn read_section_type(&mut self, count: u32) -> Result<(), DecodeError> {
        for i in 0..count {
            let at = self.reader.pos();
            let form = self.reader.read_byte()?;
            if form != encoding::TYPE_FUNC {
                return Err(self.error_at(at, DecodeErrorKind::UnsupportedType(form)));
            }
            self.dump(format_args!("type {}", i));
            let params = self.read_valtypes()?;
            let results = self.read_valtypes()?;
            let functype = t::signature(t::anonymous_params(&params), results);
            self.state.types.push(functype.clone());
            self.fields.push(t::type_instruction(None, functype));
        }
        Ok(())
    }

    fn read_section_import(&mut self, count: u32) -> Result<(), DecodeError> {
        for i in 0..count {
            let module = self.reader.read_name()?;
            let name = self.reader.read_name()?;
            self.dump(format_args!("import {} {}.{}", i, module, name));

            let at = self.reader.pos();
            let kind = self.reader.read_byte()?;
            let descr = match kind {
                encoding::DESC_FUNC => {
                    let signature = self.read_type_index()?;
                    let id = t::identifier(&name);
                    self.state.functions.push(DecodedFunc {
                        id: id.clone(),
                        signature: signature.clone(),
                        is_external: true,
                    });
                    ImportDescr::FuncImportDescr(FuncImportDescr {
                        id,
                        signature: SignatureRef::Inline(signature),
                    })
                }
                encoding::DESC_TABLE => {
                    let table = self.read_table_type(self.state.tables)?;
                    self.state.tables += 1;
                    ImportDescr::Table(table)
                }
                encoding::DESC_MEMORY => {
                    let memory = t::memory(self.read_limits()?, None);
                    self.state.memories += 1;
                    ImportDescr::Memory(memory)
                }
                encoding::DESC_GLOBAL => {
                    let global_type = self.read_global_type()?;
                    self.state.globals += 1;
                    ImportDescr::GlobalType(global_type)
                }
                other => return Err(self.error_at(at, DecodeErrorKind::UnknownImportKind(other))),
            };
            self.fields.push(t::module_import(&module, &name, descr));
        }
        Ok(())
    }

    fn read_section_function(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let signature = self.read_type_index()?;
            // anonymous until the name section says otherwise
            let id = t::synthesized_identifier(self.names.unique("func"));
            self.state.functions.push(DecodedFunc {
                id,
                signature,
                is_external: false,
            });
        }
        Ok(())
    }

    fn read_section_table(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let table = self.read_table_type(self.state.tables)?;
            self.state.tables += 1;
            self.fields.push(Node::Table(table));
        }
        Ok(())
    }

    fn read_section_memory(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let memory = t::memory(self.read_limits()?, None);
            self.state.memories += 1;
            self.fields.push(Node::Memory(memory));
        }
        Ok(())
    }

    fn read_section_global(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let global_type = self.read_global_type()?;
            let init = self.read_expression()?;
            self.state.globals += 1;
            self.fields.push(Node::Global(Global {
                global_type,
                init,
                name: None,
            }));
        }
        Ok(())
    }

    fn read_section_export(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let name = self.reader.read_name()?;
            let at = self.reader.pos();
            let kind = self.reader.read_byte()?;
            let index = self.reader.read_vu32()?;
            self.dump(format_args!("export {} kind {} index {}", name, kind, index));

            let (export_type, section, available) = match kind {
                encoding::DESC_FUNC => (ExportType::Func, "function", self.state.functions.len() as u32),
                encoding::DESC_TABLE => (ExportType::Table, "table", self.state.tables),
                encoding::DESC_MEMORY => (ExportType::Memory, "memory", self.state.memories),
                encoding::DESC_GLOBAL => (ExportType::Global, "global", self.state.globals),
                other => return Err(self.error_at(at, DecodeErrorKind::UnknownExportKind(other))),
            };
            if index >= available {
                return Err(self.error_at(at, DecodeErrorKind::EntryNotFound { index, section }));
            }
            self.state.exports.push(PendingExport {
                name,
                export_type,
                index,
            });
        }
        Ok(())
    }

    fn read_section_start(&mut self) -> Result<(), DecodeError> {
        let index = self.reader.read_vu32()?;
        self.dump(format_args!("start function {}", index));
        self.fields.push(t::start(t::index_literal(index)));
        Ok(())
    }

    fn read_section_element(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let table = self.reader.read_vu32()?;
            let offset = self.read_expression()?;
            let len = self.reader.read_vu32()?;
            let mut funcs = Vec::new();
            for _ in 0..len {
                funcs.push(t::index_literal(self.reader.read_vu32()?));
            }
            self.fields.push(Node::Elem(Elem {
                table: t::index_literal(table),
                offset,
                funcs,
            }));
        }
        Ok(())
    }

    fn read_section_code(&mut self, count: u32) -> Result<(), DecodeError> {
        for i in 0..count {
            let body_size = self.reader.read_vu32()?;
            let body_start = self.reader.pos();
            self.dump(format_args!("function body {} ({} bytes)", i, body_size));

            let declarations = self.reader.read_vu32()?;
            let mut locals = Vec::new();
            let mut total: u64 = 0;
            for _ in 0..declarations {
                let n = self.reader.read_vu32()?;
                total += n as u64;
                if total > MAX_LOCALS {
                    return Err(self.reader.error(DecodeErrorKind::TooManyLocals));
                }
                let valtype = self.read_valtype()?;
                locals.extend(std::iter::repeat(valtype).take(n as usize));
            }

            let body = self.read_expression()?;
            self.expect_position(body_start + body_size as usize, "function body")?;
            self.state.code.push(CodeEntry {
                body,
                locals,
                body_size,
            });
        }
        Ok(())
    }

    fn read_section_data(&mut self, count: u32) -> Result<(), DecodeError> {
        for _ in 0..count {
            let memory = self.reader.read_vu32()?;
            let at = self.reader.pos();
            let offset = self.read_expression()?;
            if offset.len() != 1 {
                return Err(self.error_at(at, DecodeErrorKind::DataOffset));
            }
            let len = self.reader.read_vu32()?;
            let values = self.reader.read_bytes(len as usize)?.to_vec();
            self.dump(format_args!("data segment ({} bytes)", len));
            self.fields.push(Node::Data(Data {
                memory_index: t::index_literal(memory),
                offset,
                init: ByteArray { values },
            }));
        }
        Ok(())
    }

    fn read_section_custom(&mut self, end: usize) -> Result<(), DecodeError> {
        let name = self.reader.read_name()?;
        if name == "name" && !self.options.ignore_custom_name_section {
            self.read_name_section(end)
        } else {
            self.dump(format_args!("ignore custom {:?} section", name));
            self.skip_to(end)
        }
    }

    fn read_name_section(&mut self, end: usize) -> Result<(), DecodeError> {
        while self.reader.pos() < end {
            let id = self.reader.read_byte()?;
            let size = self.reader.read_vu32()?;
            let sub_end = self.reader.pos() + size as usize;
            match id {
                encoding::NAME_SUBSECTION_MODULE => {
                    let value = self.reader.read_name()?;
                    self.metadata.module_name = Some(ModuleNameMetadata { value });
                }
                encoding::NAME_SUBSECTION_FUNCTIONS => {
                    let count = self.reader.read_vu32()?;
                    for _ in 0..count {
                        let index = self.reader.read_vu32()?;
                        let value = self.reader.read_name()?;
                        self.metadata
                            .function_names
                            .push(FunctionNameMetadata { value, index });
                    }
                }
                encoding::NAME_SUBSECTION_LOCALS => {
                    let count = self.reader.read_vu32()?;
                    for _ in 0..count {
                        let function_index = self.reader.read_vu32()?;
                        let locals = self.reader.read_vu32()?;
                        for _ in 0..locals {
                            let local_index = self.reader.read_vu32()?;
                            let value = self.reader.read_name()?;
                            self.metadata.local_names.push(LocalNameMetadata {
                                value,
                                local_index,
                                function_index,
                            });
                        }
                    }
                }
                _ => self.skip_to(sub_end)?,
            }
            self.expect_position(sub_end, "name subsection")?;
        }
        Ok(())
    }

    /* TYPES **********************************************************/

    fn read_valtype(&mut self) -> Result<Valtype, DecodeError> {
        let at = self.reader.pos();
        let byte = self.reader.read_byte()?;
        valtype_from_byte(byte).ok_or_else(|| self.error_at(at, DecodeErrorKind::UnexpectedValtype(byte)))
    }

    fn read_valtypes(&mut self) -> Result<Vec<Valtype>, DecodeError> {
        let count = self.reader.read_vu32()?;
        let mut valtypes = Vec::new();
        for _ in 0..count {
            valtypes.push(self.read_valtype()?);
        }
        Ok(valtypes)
    }

    fn read_type_index(&mut self) -> Result<Signature, DecodeError> {
        let at = self.reader.pos();
        let index = self.reader.read_vu32()?;
        self.dump(format_args!("type index {}", index));
        match self.state.types.get(index as usize) {
            Some(signature) => Ok(signature.clone()),
            None => Err(self.error_at(at, DecodeErrorKind::SignatureNotFound(index))),
        }
    }

    fn read_limits(&mut self) -> Result<Limit, DecodeError> {
        let at = self.reader.pos();
        match self.reader.read_byte()? {
            encoding::LIMITS_MIN => Ok(t::limit(self.reader.read_vu32()?, None)),
            encoding::LIMITS_MIN_MAX => {
                let min = self.reader.read_vu32()?;
                let max = self.reader.read_vu32()?;
                Ok(t::limit(min, Some(max)))
            }
            other => Err(self.error_at(at, DecodeErrorKind::UnknownLimitType(other))),
        }
    }

    fn read_table_type(&mut self, index: u32) -> Result<Table, DecodeError> {
        let at = self.reader.pos();
        let element_type = self.reader.read_byte()?;
        if element_type != encoding::TYPE_ANYFUNC {
            return Err(self.error_at(at, DecodeErrorKind::UnknownElementType(element_type)));
        }
        let limits = self.read_limits()?;
        let name = Identifier {
            value: self.names.unique("table"),
            raw: index.to_string(),
        };
        Ok(t::table(limits, Some(name), vec![]))
    }

    fn read_global_type(&mut self) -> Result<GlobalType, DecodeError> {
        let valtype = self.read_valtype()?;
        let at = self.reader.pos();
        let mutability = match self.reader.read_byte()? {
            encoding::MUT_CONST => Mutability::Const,
            encoding::MUT_VAR => Mutability::Var,
            other => return Err(self.error_at(at, DecodeErrorKind::InvalidMutability(other))),
        };
        Ok(t::global_type(valtype, mutability))
    }

    fn read_blocktype(&mut self) -> Result<Option<Valtype>, DecodeError> {
        let at = self.reader.pos();
        let byte = self.reader.read_byte()?;
        if byte == encoding::BLOCK_TYPE_EMPTY {
            return Ok(None);
        }
        match valtype_from_byte(byte) {
            Some(valtype) => Ok(Some(valtype)),
            None => Err(self.error_at(at, DecodeErrorKind::UnexpectedBlocktype(byte))),
        }
    }

    /* INSTRUCTIONS ***************************************************/

    /// An instruction sequence closed by `end`.
    fn read_expression(&mut self) -> Result<Vec<Node>, DecodeError> {
        match self.read_instructions()? {
            (code, Terminator::End) => Ok(code),
            (_, Terminator::Else) => {
                let at = self.reader.pos() - 1;
                Err(self.error_at(at, DecodeErrorKind::UnexpectedInstruction(encoding::OP_ELSE)))
            }
        }
    }

    fn read_instructions(&mut self) -> Result<(Vec<Node>, Terminator), DecodeError> {
        let mut code = Vec::new();
        loop {
            let at = self.reader.pos();
            let byte = self.reader.read_byte()?;
            let opcode = match opcodes::by_byte(byte) {
                Some(opcode) => opcode,
                None => return Err(self.error_at(at, DecodeErrorKind::UnexpectedInstruction(byte))),
            };
            self.dump(format_args!("{}", opcode.mnemonic));

            match byte {
                encoding::OP_END => return Ok((code, Terminator::End)),
                encoding::OP_ELSE => return Ok((code, Terminator::Else)),
                _ => {}
            }

            let node = match opcode.immediate {
                Immediate::None => instr(opcode, vec![], None),
                Immediate::Block => self.read_block(opcode)?,
                Immediate::Index => {
                    let index = self.reader.read_vu32()?;
                    if opcode.name == "call" {
                        t::call_instruction(t::index_literal(index))
                    } else {
                        let arg = Node::NumberLiteral(t::number_literal(index as i64));
                        instr(opcode, vec![arg], None)
                    }
                }
                Immediate::BrTable => {
                    let count = self.reader.read_vu32()?;
                    let mut args = Vec::new();
                    // the targets followed by the default
                    for _ in 0..=count {
                        let label = self.reader.read_vu32()?;
                        args.push(Node::NumberLiteral(t::number_literal(label as i64)));
                    }
                    instr(opcode, args, None)
                }
                Immediate::CallIndirect => {
                    let type_at = self.reader.pos();
                    let index = self.reader.read_vu32()?;
                    let signature = match self.state.types.get(index as usize) {
                        Some(signature) => signature.clone(),
                        None => {
                            return Err(self.error_at(
                                type_at,
                                DecodeErrorKind::CallIndirectSignatureNotFound(index),
                            ))
                        }
                    };
                    self.read_zero_flag()?;
                    t::call_indirect_instruction(SignatureRef::Inline(signature))
                }
                Immediate::MemArg => {
                    let align = self.reader.read_vu32()?;
                    let offset = self.reader.read_vu32()?;
                    instr(opcode, vec![], Some(MemArg { align, offset }))
                }
                Immediate::MemoryReserved => {
                    self.read_zero_flag()?;
                    instr(opcode, vec![], None)
                }
                Immediate::I32 => {
                    let value = self.reader.read_vs32()?;
                    instr(opcode, vec![Node::NumberLiteral(t::number_literal(value as i64))], None)
                }
                Immediate::I64 => {
                    let value = self.reader.read_vs64()?;
                    let literal = t::long_number_literal(value, &value.to_string());
                    instr(opcode, vec![Node::LongNumberLiteral(literal)], None)
                }
                Immediate::F32 => {
                    let decoded = self.reader.read_f32()?;
                    let literal = t::float_literal_f32(decoded.value, &decoded.value.to_string());
                    instr(opcode, vec![Node::FloatLiteral(literal)], None)
                }
                Immediate::F64 => {
                    let decoded = self.reader.read_f64()?;
                    let literal = t::float_literal_f64(decoded.value, &decoded.value.to_string());
                    instr(opcode, vec![Node::FloatLiteral(literal)], None)
                }
            };
            code.push(node);
        }
    }

    fn read_zero_flag(&mut self) -> Result<(), DecodeError> {
        let at = self.reader.pos();
        if self.reader.read_vu32()? != 0 {
            return Err(self.error_at(at, DecodeErrorKind::ZeroFlagExpected));
        }
        Ok(())
    }

    fn read_block(&mut self, opcode: &Opcode) -> Result<Node, DecodeError> {
        if self.depth >= MAX_NESTING {
            let at = self.reader.pos() - 1;
            return Err(self.error_at(at, DecodeErrorKind::NestingTooDeep(MAX_NESTING)));
        }
        self.depth += 1;
        let node = self.read_block_body(opcode)?;
        self.depth -= 1;
        Ok(node)
    }

    fn read_block_body(&mut self, opcode: &Opcode) -> Result<Node, DecodeError> {
        let result = self.read_blocktype()?;
        let node = match opcode.name {
            "if" => {
                let test_label = t::synthesized_identifier(self.names.unique("if"));
                let (consequent, terminator) = self.read_instructions()?;
                let alternate = match terminator {
                    Terminator::Else => self.read_expression()?,
                    Terminator::End => vec![],
                };
                Node::IfInstruction(IfInstruction {
                    test_label,
                    result,
                    consequent,
                    alternate,
                })
            }
            "loop" => {
                let instr = self.read_expression()?;
                let label = t::synthesized_identifier(self.names.unique("loop"));
                Node::LoopInstruction(LoopInstruction { label, result, instr })
            }
            _ => {
                let instr = self.read_expression()?;
                let label = t::synthesized_identifier(self.names.unique("block"));
                Node::BlockInstruction(BlockInstruction { label, instr, result })
            }
        };
        Ok(node)
    }

    /* ASSEMBLY *******************************************************/

    fn finish(mut self) -> Result<Program, DecodeError> {
        let state = std::mem::take(&mut self.state);
        let mut code = state.code.into_iter();

        for (index, decoded) in state.functions.into_iter().enumerate() {
            if decoded.is_external {
                continue;
            }
            let (body, locals, metadata) = if self.options.ignore_code_section {
                (vec![], vec![], None)
            } else {
                match code.next() {
                    Some(entry) => (
                        entry.body,
                        t::anonymous_params(&entry.locals),
                        Some(FuncMetadata {
                            body_size: entry.body_size,
                        }),
                    ),
                    None => {
                        let offset = self.reader.pos();
                        return Err(self.error_at(offset, DecodeErrorKind::CodeNotFound(index)));
                    }
                }
            };

            let mut func = Func {
                name: decoded.id,
                signature: SignatureRef::Inline(decoded.signature),
                locals,
                body,
                metadata,
            };
            self.apply_names(index as u32, &mut func);
            self.fields.push(Node::Func(func));
        }

        for export in state.exports {
            self.fields.push(t::module_export(
                &export.name,
                export.export_type,
                t::index_literal(export.index),
            ));
        }

        let module = Module {
            id: None,
            fields: self.fields,
            metadata: Some(self.metadata),
        };
        Ok(t::program(vec![Node::Module(module)]))
    }

    /// Renames a function and its params/locals from the name section.
    fn apply_names(&self, index: u32, func: &mut Func) {
        if let Some(name) = self.metadata.function_names.iter().find(|n| n.index == index) {
            func.name = t::identifier(&name.value);
        }
        for local in self
            .metadata
            .local_names
            .iter()
            .filter(|l| l.function_index == index)
        {
            let position = local.local_index as usize;
            let params = match &mut func.signature {
                SignatureRef::Inline(sig) => sig.params.len(),
                SignatureRef::Ref(_) => 0,
            };
            let slot = if position < params {
                match &mut func.signature {
                    SignatureRef::Inline(sig) => sig.params.get_mut(position),
                    SignatureRef::Ref(_) => None,
                }
            } else {
                func.locals.get_mut(position - params)
            };
            if let Some(slot) = slot {
                slot.id = Some(local.value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding::*;
    use rstest::rstest;

    fn module(sections: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = module_preamble();
        for (id, body) in sections {
            write_section(&mut buf, *id, body);
        }
        buf
    }

    fn add_module() -> Vec<u8> {
        let types = hex::decode("0160027f7f017f").unwrap();
        let funcs = hex::decode("0100").unwrap();
        let mut exports = vec![1];
        write_name(&mut exports, "add");
        exports.extend_from_slice(&[DESC_FUNC, 0]);
        let code = hex::decode("010700200020016a0b").unwrap();
        module(&[
            (SECTION_TYPE, types),
            (SECTION_FUNCTION, funcs),
            (SECTION_EXPORT, exports),
            (SECTION_CODE, code),
        ])
    }

    fn fields(program: &Program) -> &[Node] {
        &program.module().unwrap().fields
    }

    #[test]
    fn decodes_function_and_export() {
        let program = decode(&add_module(), &DecoderOptions::default()).unwrap();
        let fields = fields(&program);
        assert_eq!(fields.len(), 3);

        match &fields[1] {
            Node::Func(f) => {
                assert_eq!(f.name.value, "func_0");
                assert!(f.name.is_synthesized());
                let names: Vec<String> = f.body.iter().filter_map(|n| n.instruction_name()).collect();
                assert_eq!(names, vec!["get_local", "get_local", "i32.add"]);
                assert_eq!(f.metadata, Some(FuncMetadata { body_size: 7 }));
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
        match &fields[2] {
            Node::ModuleExport(e) => {
                assert_eq!(e.name, "add");
                assert_eq!(e.descr.id.number(), Some(0));
            }
            other => panic!("unexpected {:?}", other.kind()),
        }

        let sections: Vec<&str> = program.module().unwrap().metadata.as_ref().unwrap()
            .sections
            .iter()
            .map(|s| s.section.as_str())
            .collect();
        assert_eq!(sections, vec!["type", "func", "export", "code"]);
    }

    #[test]
    fn bad_magic() {
        let err = decode(b"\0asx\x01\0\0\0", &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::MagicHeader);
        assert!(err.to_string().contains("magic header"));
    }

    #[test]
    fn bad_version() {
        let err = decode(b"\0asm\x02\0\0\0", &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownVersion);
    }

    #[test]
    fn truncated_header() {
        let err = decode(b"\0as", &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnexpectedEnd);
    }

    #[test]
    fn missing_body_is_an_error() {
        let bytes = module(&[
            (SECTION_TYPE, hex::decode("01600000").unwrap()),
            (SECTION_FUNCTION, hex::decode("0100").unwrap()),
        ]);
        let err = decode(&bytes, &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::CodeNotFound(0));
        assert!(err.to_string().starts_with("func 0x0 code not found"));
    }

    #[test]
    fn sections_out_of_order() {
        let bytes = module(&[
            (SECTION_FUNCTION, hex::decode("00").unwrap()),
            (SECTION_TYPE, hex::decode("00").unwrap()),
        ]);
        let err = decode(&bytes, &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnexpectedSection(SECTION_TYPE));
    }

    #[test]
    fn export_index_is_checked() {
        let mut exports = vec![1];
        write_name(&mut exports, "g");
        exports.extend_from_slice(&[DESC_GLOBAL, 0]);
        let bytes = module(&[(SECTION_EXPORT, exports)]);
        let err = decode(&bytes, &DecoderOptions::default()).unwrap_err();
        assert_eq!(
            err.kind,
            DecodeErrorKind::EntryNotFound {
                index: 0,
                section: "global"
            }
        );
    }

    #[test]
    fn ignore_code_section() {
        let options = DecoderOptions {
            ignore_code_section: true,
            ..DecoderOptions::default()
        };
        let program = decode(&add_module(), &options).unwrap();
        match &fields(&program)[1] {
            Node::Func(f) => assert!(f.body.is_empty()),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn name_section_renames_functions() {
        let mut names = vec![];
        let mut functions = vec![1, 0];
        write_name(&mut functions, "add");
        names.push(NAME_SUBSECTION_FUNCTIONS);
        write_u8vec(&mut names, &functions);
        let mut locals = vec![1, 0, 1, 1];
        write_name(&mut locals, "rhs");
        names.push(NAME_SUBSECTION_LOCALS);
        write_u8vec(&mut names, &locals);

        let mut custom = vec![];
        write_name(&mut custom, "name");
        custom.extend_from_slice(&names);

        let mut bytes = add_module();
        write_section(&mut bytes, SECTION_CUSTOM, &custom);

        let program = decode(&bytes, &DecoderOptions::default()).unwrap();
        match &fields(&program)[1] {
            Node::Func(f) => {
                assert_eq!(f.name.value, "add");
                match &f.signature {
                    SignatureRef::Inline(sig) => {
                        assert_eq!(sig.params[1].id.as_deref(), Some("rhs"));
                        assert_eq!(sig.params[0].id, None);
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn unknown_custom_sections_are_skipped() {
        let mut custom = vec![];
        write_name(&mut custom, "producers");
        custom.extend_from_slice(&[1, 2, 3, 4]);
        let mut bytes = add_module();
        write_section(&mut bytes, SECTION_CUSTOM, &custom);
        assert!(decode(&bytes, &DecoderOptions::default()).is_ok());
    }

    #[test]
    fn if_else_and_labels() {
        // (func (result i32) (if (result i32) (i32.const 1) (then (i32.const 2)) (else (block (i32.const 3)))))
        let types = hex::decode("016000017f").unwrap();
        let funcs = hex::decode("0100").unwrap();
        let body = hex::decode("004101047f410205027f41030b0b0b").unwrap();
        let mut code = vec![1];
        write_u8vec(&mut code, &body);
        let bytes = module(&[(SECTION_TYPE, types), (SECTION_FUNCTION, funcs), (SECTION_CODE, code)]);

        let program = decode(&bytes, &DecoderOptions::default()).unwrap();
        let func = match &fields(&program)[1] {
            Node::Func(f) => f,
            other => panic!("unexpected {:?}", other.kind()),
        };
        match &func.body[1] {
            Node::IfInstruction(i) => {
                assert_eq!(i.test_label.value, "if_0");
                assert_eq!(i.result, Some(Valtype::I32));
                assert_eq!(i.consequent.len(), 1);
                match &i.alternate[0] {
                    Node::BlockInstruction(b) => assert_eq!(b.label.value, "block_0"),
                    other => panic!("unexpected {:?}", other.kind()),
                }
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn call_indirect_requires_zero_flag() {
        let types = hex::decode("01600000").unwrap();
        let funcs = hex::decode("0100").unwrap();
        let body = hex::decode("00410011000101").unwrap();
        let mut code = vec![1];
        write_u8vec(&mut code, &body);
        let bytes = module(&[(SECTION_TYPE, types), (SECTION_FUNCTION, funcs), (SECTION_CODE, code)]);
        let err = decode(&bytes, &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::ZeroFlagExpected);
    }

    fn nested_blocks(depth: usize) -> Vec<u8> {
        let mut body = vec![0];
        for _ in 0..depth {
            body.extend_from_slice(&[OP_BLOCK, BLOCK_TYPE_EMPTY]);
        }
        body.extend(std::iter::repeat(OP_END).take(depth + 1));
        let mut code = vec![1];
        write_u8vec(&mut code, &body);
        module(&[
            (SECTION_TYPE, hex::decode("01600000").unwrap()),
            (SECTION_FUNCTION, hex::decode("0100").unwrap()),
            (SECTION_CODE, code),
        ])
    }

    #[rstest]
    #[case(MAX_NESTING + 1)]
    #[case(200_000)]
    fn deep_nesting_is_rejected(#[case] depth: usize) {
        let err = decode(&nested_blocks(depth), &DecoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NestingTooDeep(MAX_NESTING));
    }

    #[test]
    fn nesting_up_to_the_limit() {
        assert!(decode(&nested_blocks(MAX_NESTING), &DecoderOptions::default()).is_ok());
    }
}
