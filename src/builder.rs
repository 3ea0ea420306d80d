// (C) 2020 Brandon Lewis
//
// Tools for producing bytecode buffers.
//
// The Builder is the programmatic path: one fluent emit method per
// instruction, used by the test suite and meant for the expression
// compiler. The assembler is the hand-written path: a whitespace-
// separated mnemonic format with labels, lowered to the same bytes
// through the Builder.


use std::collections::HashMap;
use std::fs;
use std::rc::Rc;

use regex::Regex;

use crate::vm::Opcode;


// Emits instructions into a flat byte buffer. Every multi-byte
// operand is little-endian. The builder never emits an ill-formed
// instruction; address arithmetic is the caller's problem, which is
// what `mark` is for.
#[derive(Clone, Debug)]
pub struct Builder {
    code: Vec<u8>
}


impl Builder {
    pub fn new() -> Builder {
        Builder {code: Vec::new()}
    }

    // The offset the next instruction will land on. Capture it ahead
    // of a loop body and hand it to the jump family as the back-edge
    // target.
    pub fn mark(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn build(&self) -> Vec<u8> {
        self.code.clone()
    }

    // The buffer as a shared handle, ready for execute or load.
    pub fn code(&self) -> Rc<Vec<u8>> {
        Rc::new(self.code.clone())
    }

    fn op(&mut self, op: Opcode) -> &mut Builder {
        self.code.push(op as u8);
        self
    }

    fn u8(&mut self, v: u8) -> &mut Builder {
        self.code.push(v);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Builder {
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn nop(&mut self) -> &mut Builder {
        self.op(Opcode::Nop)
    }

    pub fn add(&mut self) -> &mut Builder {
        self.op(Opcode::Add)
    }

    pub fn sub(&mut self) -> &mut Builder {
        self.op(Opcode::Sub)
    }

    pub fn mul(&mut self) -> &mut Builder {
        self.op(Opcode::Mul)
    }

    pub fn div(&mut self) -> &mut Builder {
        self.op(Opcode::Div)
    }

    pub fn modulo(&mut self) -> &mut Builder {
        self.op(Opcode::Mod)
    }

    pub fn neg(&mut self) -> &mut Builder {
        self.op(Opcode::Neg)
    }

    pub fn push_num(&mut self, v: f32) -> &mut Builder {
        self.op(Opcode::PushNum).u32(v.to_bits())
    }

    pub fn push_str(&mut self, v: &str) -> &mut Builder {
        self.op(Opcode::PushStr).u32(v.len() as u32);
        self.code.extend_from_slice(v.as_bytes());
        self
    }

    pub fn pop(&mut self, offset: u8, count: u8) -> &mut Builder {
        self.op(Opcode::Pop).u8(offset).u8(count)
    }

    pub fn peek(&mut self, offset: u8) -> &mut Builder {
        self.op(Opcode::Peek).u8(offset)
    }

    pub fn cmp(&mut self) -> &mut Builder {
        self.op(Opcode::Cmp)
    }

    pub fn jmp(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jmp).u32(target)
    }

    pub fn jeq(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jeq).u32(target)
    }

    pub fn jnq(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jnq).u32(target)
    }

    pub fn jl(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jl).u32(target)
    }

    pub fn jle(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jle).u32(target)
    }

    pub fn jg(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jg).u32(target)
    }

    pub fn jge(&mut self, target: u32) -> &mut Builder {
        self.op(Opcode::Jge).u32(target)
    }

    pub fn jsr(&mut self) -> &mut Builder {
        self.op(Opcode::Jsr)
    }

    pub fn ret(&mut self) -> &mut Builder {
        self.op(Opcode::Ret)
    }

    pub fn set_global(&mut self) -> &mut Builder {
        self.op(Opcode::SetGlobal)
    }

    pub fn get_global(&mut self) -> &mut Builder {
        self.op(Opcode::GetGlobal)
    }
}


// The result of assembling a source text.
pub type ParseResult = std::result::Result<Vec<u8>, String>;


// One word of assembler input, in a form whose encoded size is known
// up front, so that labels resolve in a single sizing pass.
#[derive(Clone, Debug, PartialEq)]
pub enum Word {
    Op(Opcode),
    Num(f32),
    Str(String),
    Jump(Opcode, Target),
    Pop(u8, u8),
    Peek(u8),
    Label(String),
}


#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Addr(u32),
    Name(String),
}


impl Word {
    fn size(&self) -> usize {
        match self {
            Word::Op(_)      => 1,
            Word::Num(_)     => 5,
            Word::Str(body)  => 5 + body.len(),
            Word::Jump(_, _) => 5,
            Word::Pop(_, _)  => 3,
            Word::Peek(_)    => 2,
            Word::Label(_)   => 0,
        }
    }
}


// A jump target is either a literal byte address or a label
// reference.
fn decode_target(text: &str) -> Option<Target> {
    if text.starts_with("#") {
        Some(Target::Name(String::from(&text[1..])))
    } else if let Ok(addr) = text.parse::<u32>() {
        Some(Target::Addr(addr))
    } else {
        None
    }
}


// Decode a single whitespace-delimited word. The longer jump
// mnemonics come before their prefixes.
pub fn decode_word(word: &str) -> Option<Word> {
    lazy_static! {
        static ref STR_REGEX: Regex = Regex::new(
            "^\"([^\"]*)\"$"
        ).unwrap();
    }

    lazy_static! {
        static ref LABEL_REGEX: Regex = Regex::new(
            "^([a-zA-Z0-9_-]+):$"
        ).unwrap();
    }

    use Opcode::*;

    if word.starts_with("pop:") {
        let mut operands = word[4..].split(':');
        let offset = operands.next()?.parse::<u8>().ok()?;
        let count = operands.next()?.parse::<u8>().ok()?;
        match operands.next() {
            None => Some(Word::Pop(offset, count)),
            Some(_) => None
        }
    } else if word.starts_with("peek:") {
        if let Ok(offset) = word[5..].parse::<u8>() {
            Some(Word::Peek(offset))
        } else {
            None
        }
    } else if word.starts_with("jmp:") {
        Some(Word::Jump(Jmp, decode_target(&word[4..])?))
    } else if word.starts_with("jeq:") {
        Some(Word::Jump(Jeq, decode_target(&word[4..])?))
    } else if word.starts_with("jnq:") {
        Some(Word::Jump(Jnq, decode_target(&word[4..])?))
    } else if word.starts_with("jle:") {
        Some(Word::Jump(Jle, decode_target(&word[4..])?))
    } else if word.starts_with("jge:") {
        Some(Word::Jump(Jge, decode_target(&word[4..])?))
    } else if word.starts_with("jl:") {
        Some(Word::Jump(Jl, decode_target(&word[3..])?))
    } else if word.starts_with("jg:") {
        Some(Word::Jump(Jg, decode_target(&word[3..])?))
    } else if let Some(captures) = STR_REGEX.captures(word) {
        let raw = captures.get(1)?.as_str();
        Some(Word::Str(String::from(raw)))
    } else if let Some(captures) = LABEL_REGEX.captures(word) {
        let raw = captures.get(1)?.as_str();
        Some(Word::Label(String::from(raw)))
    } else if let Ok(x) = word.parse::<f32>() {
        Some(Word::Num(x))
    } else {
        match word {
            "nop"  => Some(Word::Op(Nop)),
            "add"  => Some(Word::Op(Add)),
            "sub"  => Some(Word::Op(Sub)),
            "mul"  => Some(Word::Op(Mul)),
            "div"  => Some(Word::Op(Div)),
            "mod"  => Some(Word::Op(Mod)),
            "neg"  => Some(Word::Op(Neg)),
            "cmp"  => Some(Word::Op(Cmp)),
            "jsr"  => Some(Word::Op(Jsr)),
            "ret"  => Some(Word::Op(Ret)),
            "setg" => Some(Word::Op(SetGlobal)),
            "getg" => Some(Word::Op(GetGlobal)),
            _ => None
        }
    }
}


// Lower a source text to a bytecode buffer. Two passes: size every
// word and collect label offsets, then emit with each target
// resolved.
pub fn assemble(source: &str) -> ParseResult {
    let mut words = Vec::new();
    for text in source.split_whitespace() {
        match decode_word(text) {
            Some(word) => words.push(word),
            None => return Err(format!("illegal word {:?}", text))
        }
    }

    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut offset = 0u32;
    for word in &words {
        if let Word::Label(name) = word {
            labels.insert(name.clone(), offset);
        }
        offset += word.size() as u32;
    }

    let mut builder = Builder::new();
    for word in &words {
        match word {
            Word::Op(op) => {
                builder.op(*op);
            }
            Word::Num(x) => {
                builder.push_num(*x);
            }
            Word::Str(body) => {
                builder.push_str(body);
            }
            Word::Pop(offset, count) => {
                builder.pop(*offset, *count);
            }
            Word::Peek(offset) => {
                builder.peek(*offset);
            }
            Word::Jump(op, target) => {
                let addr = match target {
                    Target::Addr(addr) => *addr,
                    Target::Name(name) => match labels.get(name) {
                        Some(addr) => *addr,
                        None => return Err(format!("name error: {}", name))
                    }
                };
                builder.op(*op).u32(addr);
            }
            Word::Label(_) => ()
        }
    }

    Ok(builder.build())
}


// Assemble straight from a file.
pub fn load(path: String) -> ParseResult {
    if let Ok(source) = fs::read_to_string(path) {
        assemble(&source)
    } else {
        Err(String::from("Couldn't open file"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Value, VM};

    #[test]
    fn test_builder_bytes() {
        let mut b = Builder::new();
        b.push_num(1.0).add().ret();
        assert_eq!(
            b.build(),
            vec![0x07, 0x00, 0x00, 0x80, 0x3F, 0x01, 0x14]
        );
    }

    #[test]
    fn test_push_str_layout() {
        let mut b = Builder::new();
        b.push_str("hi");
        assert_eq!(
            b.build(),
            vec![0x08, 0x02, 0x00, 0x00, 0x00, b'h', b'i']
        );
    }

    #[test]
    fn test_mark() {
        let mut b = Builder::new();
        assert_eq!(b.mark(), 0);
        b.push_num(0.0);
        let top = b.mark();
        assert_eq!(top, 5);
        b.jmp(top);
        assert_eq!(b.build()[5], 0x0C);
    }

    #[test]
    fn test_assemble_matches_builder() {
        let mut b = Builder::new();
        b.push_num(32.0).push_num(32.0).add().ret();
        assert_eq!(assemble("32 32 add ret"), Ok(b.build()));

        let mut b = Builder::new();
        b.push_num(1.0).push_str("sin").get_global().jsr().ret();
        assert_eq!(assemble("1 \"sin\" getg jsr ret"), Ok(b.build()));
    }

    #[test]
    fn test_assemble_stack_shapes() {
        let mut b = Builder::new();
        b.pop(1, 2).peek(3);
        assert_eq!(assemble("pop:1:2 peek:3"), Ok(b.build()));
    }

    #[test]
    fn test_assemble_labels() {
        let mut b = Builder::new();
        b.nop().jg(0).ret();
        assert_eq!(assemble("top: nop jg:#top ret"), Ok(b.build()));

        // A label mid-stream lands on the byte offset of whatever
        // comes next.
        let mut b = Builder::new();
        b.push_num(0.0).push_num(1.0).add().jg(5).ret();
        assert_eq!(assemble("0 loop: 1 add jg:#loop ret"), Ok(b.build()));
    }

    #[test]
    fn test_assemble_literal_targets() {
        let mut b = Builder::new();
        b.nop().jmp(0);
        assert_eq!(assemble("nop jmp:0"), Ok(b.build()));
    }

    #[test]
    fn test_assemble_jump_family() {
        let mut b = Builder::new();
        b.jeq(0).jnq(0).jl(0).jle(0).jg(0).jge(0);
        assert_eq!(
            assemble("jeq:0 jnq:0 jl:0 jle:0 jg:0 jge:0"),
            Ok(b.build())
        );
    }

    #[test]
    fn test_assemble_errors() {
        assert!(assemble("frobnicate").is_err());
        assert!(assemble("jmp:#nowhere").is_err());
        assert!(assemble("pop:9").is_err());
        assert!(assemble("peek:300").is_err());
    }

    #[test]
    fn test_assembled_kernel_runs() {
        let code = assemble("2 3 add ret").unwrap();
        let mut vm = VM::new();
        assert_eq!(vm.execute(Rc::new(code)), 1);
        assert_eq!(vm.pop(), Some(Value::Num(5.0)));
    }
}
