//! Reader for the textual test IR.
//!
//! The parser works directly on the source text with a byte cursor and
//! builds a [`Module`] as it goes. Symbols may be referenced before they are
//! declared; such references get a placeholder id and are patched once the
//! whole text has been read.

use crate::core::ir::{
    BinOp, CondCode, Function, Inst, Label, Location, MemLoc, Module, Opcode, Operand, SpillSlot,
    StorageClass, SymbolId, Type, VReg,
};
use hashbrown::HashMap;
use thiserror::Error;

/// Parse failure with the 1-based position it was detected at.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// Parse `text` into a module whose diagnostics are attributed to `source`.
pub fn parse_module(text: &str, source: &str) -> Result<Module, ParseError> {
    Parser::new(text, source).parse()
}

const PLACEHOLDER: SymbolId = SymbolId(u32::MAX);

/// Symbol reference waiting for its declaration.
struct Resolve<'a> {
    name: &'a str,
    kind: StorageClass,
    func: usize,
    inst: usize,
    pos: usize,
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    module: Module,
    declared: HashMap<&'a str, (StorageClass, SymbolId)>,
    resolves: Vec<Resolve<'a>>,
    /// Value and label names of the function being read.
    values: HashMap<&'a str, VReg>,
    labels: HashMap<&'a str, Label>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, source: &str) -> Self {
        Self {
            text,
            pos: 0,
            module: Module::new(source),
            declared: HashMap::new(),
            resolves: Vec::new(),
            values: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    fn parse(mut self) -> Result<Module, ParseError> {
        loop {
            self.skip_whitespace(true);
            if self.is_eof() {
                break;
            }
            let start = self.pos;
            match self.read_ident()? {
                "global" => self.parse_global()?,
                "declare" => self.parse_declare()?,
                "func" => self.parse_function()?,
                other => {
                    return Err(self.error_at(
                        start,
                        format!("expected `global`, `declare` or `func`, found `{other}`"),
                    ))
                }
            }
        }
        self.resolve_all_references()?;
        Ok(self.module)
    }

    fn parse_global(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let name = self.read_symbol()?;
        self.expect(':')?;
        let ty = self.read_type()?;
        self.declare(name, StorageClass::Global, ty, start)?;
        Ok(())
    }

    fn parse_declare(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let name = self.read_symbol()?;
        self.read_params()?;
        self.declare(name, StorageClass::Function, Type::U8, start)?;
        Ok(())
    }

    fn parse_function(&mut self) -> Result<(), ParseError> {
        self.skip_whitespace(true);
        let start = self.pos;
        let name = self.read_symbol()?;
        self.declare(name, StorageClass::Function, Type::U8, start)?;

        let mut func = Function::new(name);
        func.loc = self.location(start);
        self.values.clear();
        self.labels.clear();
        for (param, pos) in self.read_params()? {
            if self.values.contains_key(param) {
                return Err(self.error_at(pos, format!("duplicate parameter `%{param}`")));
            }
            let v = func.add_param(param);
            self.values.insert(param, v);
        }
        self.expect('{')?;

        let index = self.module.functions.len();
        loop {
            self.skip_whitespace(true);
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(self.error(format!("unexpected end of input in `@{name}`")));
            }
            self.parse_statement(&mut func, index)?;
        }
        log::trace!("parsed `{}`: {} instructions", func.name, func.insts.len());
        self.module.functions.push(func);
        Ok(())
    }

    fn parse_statement(&mut self, func: &mut Function, index: usize) -> Result<(), ParseError> {
        let start = self.pos;
        let loc = self.location(start);

        if self.peek() == Some('%') {
            let dst = self.read_value(func)?;
            self.expect('=')?;
            self.skip_whitespace(true);
            let op_pos = self.pos;
            let (op, ty) = self.read_opcode()?;
            let inst = match op {
                "mov" => Inst::mov(dst, self.parse_operand(func, index)?),
                "cmp" => {
                    self.skip_whitespace(true);
                    let cc_pos = self.pos;
                    let cc_name = self.read_ident()?;
                    let cc = cc_name.parse::<CondCode>().map_err(|_| {
                        self.error_at(cc_pos, format!("unknown condition `{cc_name}`"))
                    })?;
                    let (lhs, rhs) = self.parse_operand_pair(func, index)?;
                    Inst::compare(cc, dst, lhs, rhs)
                }
                "call" => {
                    let (callee, args) = self.parse_call(func, index)?;
                    Inst::call(callee, Some(dst), args)
                }
                "load" => Inst::load(dst, self.parse_mem(func, index)?),
                "phi" => self.parse_phi(func, dst)?,
                other => match other.parse::<BinOp>() {
                    Ok(bin) => {
                        let (lhs, rhs) = self.parse_operand_pair(func, index)?;
                        Inst::binary(bin, dst, lhs, rhs)
                    }
                    Err(_) => return Err(self.error_at(op_pos, format!("unknown operation `{other}`"))),
                },
            };
            func.push(inst.with_type(ty).at(loc));
            return Ok(());
        }

        let word = self.read_name()?;
        if self.peek() == Some(':') {
            self.advance();
            let label = self.label(func, word);
            func.push(Inst::label(label).at(loc));
            return Ok(());
        }

        let (keyword, ty) = self.split_type(word, start)?;
        let inst = match keyword {
            "br" => {
                let cond = self.read_value(func)?;
                self.expect(',')?;
                Inst::cond_jump(cond, self.read_label_ref(func)?)
            }
            "jmp" => Inst::jump(self.read_label_ref(func)?),
            "call" => {
                let (callee, args) = self.parse_call(func, index)?;
                Inst::call(callee, None, args)
            }
            "store" => {
                let mem = self.parse_mem(func, index)?;
                self.expect(',')?;
                Inst::store(mem, self.parse_operand(func, index)?)
            }
            "ret" => {
                // The value must sit on the same line as `ret`.
                self.skip_whitespace(false);
                let value = match self.peek() {
                    Some(c) if c == '%' || c == '[' || c == '-' || c.is_ascii_digit() => {
                        Some(self.parse_operand(func, index)?)
                    }
                    _ => None,
                };
                Inst::ret(value)
            }
            other => return Err(self.error_at(start, format!("unknown statement `{other}`"))),
        };
        func.push(inst.with_type(ty).at(loc));
        Ok(())
    }

    fn parse_operand(&mut self, func: &mut Function, index: usize) -> Result<Operand, ParseError> {
        self.skip_whitespace(true);
        match self.peek() {
            Some('%') => Ok(Operand::Reg(self.read_value(func)?)),
            Some('[') => Ok(Operand::Mem(self.parse_mem(func, index)?)),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                let value = self.read_number()?;
                i32::try_from(value)
                    .map(Operand::Imm)
                    .map_err(|_| self.error_at(start, format!("immediate {value} out of range")))
            }
            Some(c) => Err(self.error(format!("expected operand, found '{c}'"))),
            None => Err(self.error("expected operand, found end of input")),
        }
    }

    fn parse_operand_pair(&mut self, func: &mut Function, index: usize) -> Result<(Operand, Operand), ParseError> {
        let lhs = self.parse_operand(func, index)?;
        self.expect(',')?;
        let rhs = self.parse_operand(func, index)?;
        Ok((lhs, rhs))
    }

    fn parse_mem(&mut self, func: &mut Function, index: usize) -> Result<MemLoc, ParseError> {
        self.expect('[')?;
        self.skip_whitespace(true);
        let start = self.pos;
        let mem = if self.peek() == Some('@') {
            let name = self.read_symbol()?;
            self.resolves.push(Resolve {
                name,
                kind: StorageClass::Global,
                func: index,
                inst: func.insts.len(),
                pos: start,
            });
            MemLoc::Global(PLACEHOLDER)
        } else {
            let kind = self.read_ident()?;
            self.skip_whitespace(true);
            let num_pos = self.pos;
            let n = self.read_number()?;
            let out_of_range = || self.error_at(num_pos, format!("{kind} index {n} out of range"));
            match kind {
                "local" => MemLoc::Local(u16::try_from(n).map_err(|_| out_of_range())?),
                "param" => MemLoc::Param(u8::try_from(n).map_err(|_| out_of_range())?),
                "outarg" => MemLoc::OutArg(u8::try_from(n).map_err(|_| out_of_range())?),
                "spill" => {
                    let slot = u32::try_from(n).map_err(|_| out_of_range())?;
                    while func.spill_slot_count() <= slot {
                        func.new_spill_slot();
                    }
                    MemLoc::Spill(SpillSlot(slot))
                }
                other => return Err(self.error_at(start, format!("unknown memory location `{other}`"))),
            }
        };
        self.expect(']')?;
        Ok(mem)
    }

    fn parse_call(&mut self, func: &mut Function, index: usize) -> Result<(SymbolId, Vec<Operand>), ParseError> {
        self.skip_whitespace(true);
        let start = self.pos;
        let name = self.read_symbol()?;
        self.resolves.push(Resolve {
            name,
            kind: StorageClass::Function,
            func: index,
            inst: func.insts.len(),
            pos: start,
        });

        self.expect('(')?;
        let mut args = Vec::new();
        if !self.try_read(')') {
            loop {
                args.push(self.parse_operand(func, index)?);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        Ok((PLACEHOLDER, args))
    }

    fn parse_phi(&mut self, func: &mut Function, dst: VReg) -> Result<Inst, ParseError> {
        let mut incoming = Vec::new();
        loop {
            self.expect('[')?;
            let label = self.read_label_ref(func)?;
            self.expect(',')?;
            let value = self.read_value(func)?;
            self.expect(']')?;
            incoming.push((label, value));
            if !self.try_read(',') {
                break;
            }
        }
        Ok(Inst::phi(dst, incoming))
    }

    /// `(%a, %b)` parameter list with the position of every name.
    fn read_params(&mut self) -> Result<Vec<(&'a str, usize)>, ParseError> {
        self.expect('(')?;
        let mut params = Vec::new();
        if self.try_read(')') {
            return Ok(params);
        }
        loop {
            self.skip_whitespace(true);
            let pos = self.pos;
            self.expect('%')?;
            params.push((self.read_name()?, pos));
            if self.try_read(')') {
                return Ok(params);
            }
            self.expect(',')?;
        }
    }

    fn declare(&mut self, name: &'a str, storage: StorageClass, ty: Type, pos: usize) -> Result<SymbolId, ParseError> {
        if self.declared.contains_key(name) {
            return Err(self.error_at(pos, format!("redefinition of `@{name}`")));
        }
        let id = self.module.symbols.insert(name, storage, ty);
        self.declared.insert(name, (storage, id));
        Ok(id)
    }

    fn resolve_all_references(&mut self) -> Result<(), ParseError> {
        let resolves = std::mem::take(&mut self.resolves);
        for r in &resolves {
            let id = match self.declared.get(r.name) {
                Some(&(storage, id)) if storage == r.kind => id,
                _ => {
                    let what = match r.kind {
                        StorageClass::Function => "function",
                        _ => "global",
                    };
                    return Err(self.error_at(r.pos, format!("undeclared {what} `@{}`", r.name)));
                }
            };
            let inst = &mut self.module.functions[r.func].insts[r.inst];
            if r.kind == StorageClass::Function {
                inst.opcode = Opcode::Call(id);
                continue;
            }
            if let Some(Operand::Mem(MemLoc::Global(sym))) = inst
                .operands
                .iter_mut()
                .find(|op| **op == Operand::Mem(MemLoc::Global(PLACEHOLDER)))
            {
                *sym = id;
            }
        }
        Ok(())
    }

    fn value(&mut self, func: &mut Function, name: &'a str) -> VReg {
        *self.values.entry(name).or_insert_with(|| func.named_vreg(name))
    }

    fn label(&mut self, func: &mut Function, name: &'a str) -> Label {
        *self.labels.entry(name).or_insert_with(|| func.named_label(name))
    }

    fn read_value(&mut self, func: &mut Function) -> Result<VReg, ParseError> {
        self.expect('%')?;
        let name = self.read_name()?;
        Ok(self.value(func, name))
    }

    fn read_label_ref(&mut self, func: &mut Function) -> Result<Label, ParseError> {
        self.expect('^')?;
        let name = self.read_name()?;
        Ok(self.label(func, name))
    }

    fn read_symbol(&mut self) -> Result<&'a str, ParseError> {
        self.expect('@')?;
        self.read_name()
    }

    fn read_type(&mut self) -> Result<Type, ParseError> {
        self.skip_whitespace(true);
        let start = self.pos;
        let name = self.read_ident()?;
        name.parse::<Type>()
            .map_err(|_| self.error_at(start, format!("unknown type `{name}`")))
    }

    /// Operation name with an optional `.type` suffix.
    fn read_opcode(&mut self) -> Result<(&'a str, Type), ParseError> {
        let start = self.pos;
        let word = self.read_name()?;
        self.split_type(word, start)
    }

    fn split_type(&self, word: &'a str, pos: usize) -> Result<(&'a str, Type), ParseError> {
        match word.split_once('.') {
            Some((op, ty)) => {
                let ty = ty
                    .parse::<Type>()
                    .map_err(|_| self.error_at(pos, format!("unknown type `{ty}`")))?;
                Ok((op, ty))
            }
            None => Ok((word, Type::default())),
        }
    }

    fn read_ident(&mut self) -> Result<&'a str, ParseError> {
        self.read_word(false)
    }

    /// Value, label and symbol names may contain dots and start with a digit.
    fn read_name(&mut self) -> Result<&'a str, ParseError> {
        self.read_word(true)
    }

    fn read_word(&mut self, name: bool) -> Result<&'a str, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || (name && c.is_ascii_digit()) => {}
            Some(c) => return Err(self.error(format!("expected identifier, found '{c}'"))),
            None => return Err(self.error("expected identifier, found end of input")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || (name && c == '.') {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_number(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        let negative = self.peek() == Some('-');
        if negative {
            self.advance();
        }
        let digits_start = self.pos;
        let hex = self.text[self.pos..].starts_with("0x");
        if hex {
            self.pos += 2;
        }
        let radix_start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() && (hex || c.is_ascii_digit()) {
                self.advance();
            } else {
                break;
            }
        }
        if self.pos == radix_start {
            return Err(self.error_at(start, "expected number"));
        }
        let digits = &self.text[radix_start..self.pos];
        let magnitude = i64::from_str_radix(digits, if hex { 16 } else { 10 })
            .map_err(|_| self.error_at(digits_start, format!("number `{digits}` out of range")))?;
        Ok(if negative { -magnitude } else { magnitude })
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    /// Skip blanks and `;` comments. Newlines end the skip unless `skip_newlines`.
    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(c) = self.peek() {
            if c == ';' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if c == '\n' && !skip_newlines {
                break;
            } else if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, expected: char) -> bool {
        self.skip_whitespace(true);
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        if self.try_read(expected) {
            return Ok(());
        }
        match self.peek() {
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn location(&self, pos: usize) -> Location {
        let before = &self.text[..pos.min(self.text.len())];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before.len() - nl,
            None => before.len() + 1,
        };
        Location::new(line as u32, column as u32)
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ParseError {
        let loc = self.location(pos);
        ParseError {
            line: loc.line,
            column: loc.column,
            message: message.into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.pos, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_function() {
        let text = r#"
; adds one
func @inc(%x) {
    %y = add %x, 1
    ret %y
}
"#;
        let module = parse_module(text, "inc.tir").unwrap();
        assert_eq!(module.source, "inc.tir");
        let f = module.function("inc").unwrap();
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.insts.len(), 2);
        assert_eq!(f.insts[0].opcode, Opcode::Binary(BinOp::Add));
        assert_eq!(f.insts[0].operands, vec![Operand::Reg(f.params[0]), Operand::Imm(1)]);
        assert_eq!(f.insts[0].loc, Location::new(4, 5));
        assert_eq!(f.loc, Location::new(3, 6));
        assert_eq!(f.vreg_name(f.insts[1].operands[0].as_reg().unwrap()), "y");
    }

    #[test]
    fn test_forward_references_resolve() {
        let text = r#"
func @main() {
    %r = call @helper(3)
    store [@out], %r
    ret
}
func @helper(%a) {
    ret %a
}
global @out : u8
"#;
        let module = parse_module(text, "t").unwrap();
        let main = module.function("main").unwrap();
        let helper = module.symbols.lookup("helper").unwrap();
        let out = module.symbols.lookup("out").unwrap();
        assert_eq!(main.insts[0].opcode, Opcode::Call(helper));
        assert_eq!(main.insts[1].operands[0], Operand::Mem(MemLoc::Global(out)));
        assert!(main.insts[2].operands.is_empty());
    }

    #[test]
    fn test_labels_types_and_joins() {
        let text = r#"
func @f(%a, %b) {
entry:
    %c = cmp.i8 lt %a, %b
    br %c, ^then
    jmp ^join
then:
    %t = mov.i8 -4
    jmp ^join
join:
    %x = phi [^entry, %a], [^then, %t]
    store.i8 [local 0x10], %x
    ret
}
"#;
        let module = parse_module(text, "t").unwrap();
        let f = &module.functions[0];
        assert_eq!(f.insts[1].opcode, Opcode::Compare(CondCode::Lt));
        assert_eq!(f.insts[1].ty, Type::I8);
        assert_eq!(f.insts[5].operands, vec![Operand::Imm(-4)]);
        assert!(f.has_joins());
        match &f.insts[8].opcode {
            Opcode::Phi(labels) => assert_eq!(labels.len(), 2),
            other => panic!("expected phi, got {other:?}"),
        }
        assert_eq!(f.insts[9].operands[0], Operand::Mem(MemLoc::Local(16)));
        assert_eq!(f.insts[9].ty, Type::I8);
    }

    #[test]
    fn test_undeclared_callee_is_reported_at_reference() {
        let text = "func @f() {\n    call @nowhere()\n    ret\n}\n";
        let err = parse_module(text, "t").unwrap_err();
        assert_eq!((err.line, err.column), (2, 10));
        assert!(err.message.contains("undeclared function `@nowhere`"));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_module("func @f() {\n    %x = frob %y, 1\n}\n", "t").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unknown operation `frob`"));

        let err = parse_module("global @g : u8\nglobal @g : u8\n", "t").unwrap_err();
        assert!(err.message.contains("redefinition"));

        let err = parse_module("func @f() {\n    ret\n", "t").unwrap_err();
        assert!(err.message.contains("end of input"));

        assert!(parse_module("func @f() { store [stack 1], 2 }", "t").is_err());
    }
}
