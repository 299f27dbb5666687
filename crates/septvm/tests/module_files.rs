//! Wire-format round trips: hand-encoded module files through the loader,
//! the verifier, and the interpreter.

use std::path::Path;

use pretty_assertions::assert_eq;
use septvm::{ExcType, MODULE_MAGIC, MODULE_VERSION, Machine, Opcode, Value};

#[derive(Default)]
struct Encoder(Vec<u8>);

impl Encoder {
    fn header() -> Self {
        let mut enc = Self::default();
        enc.0.extend_from_slice(MODULE_MAGIC);
        enc.0.push(MODULE_VERSION);
        enc
    }

    fn varint(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.0.push(byte);
                return self;
            }
            self.0.push(byte | 0x80);
        }
    }

    fn int_const(&mut self, value: i64) -> &mut Self {
        self.0.push(0x01);
        self.varint(((value as u64) << 1) ^ ((value >> 63) as u64))
    }

    fn str_const(&mut self, text: &str) -> &mut Self {
        self.0.push(0x02);
        self.varint(text.len() as u64);
        self.0.extend_from_slice(text.as_bytes());
        self
    }

    fn body(&mut self, code: &[u8]) -> &mut Self {
        self.varint(1); // one function: the module body
        self.varint(0); // no parameters
        self.varint(code.len() as u64);
        self.0.extend_from_slice(code);
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.0.push(0xFF);
        self.0
    }
}

fn op(opcode: Opcode) -> u8 {
    opcode as u8
}

#[test]
fn a_loaded_module_file_executes() {
    // The canonical arithmetic scenario, straight off the wire:
    // constants [2, 3, "+"], body pushes both, fetches "+", calls.
    let mut enc = Encoder::header();
    enc.varint(3);
    enc.int_const(2).int_const(3).str_const("+");
    let code = [
        op(Opcode::PushConst), 0, 0,
        op(Opcode::PushConst), 1, 0,
        op(Opcode::FetchProp), 2, 0,
        op(Opcode::Call), 1, 0, // one eager positional record
        op(Opcode::Return),
    ];
    enc.body(&code);
    let bytes = enc.finish();

    let mut machine = Machine::new();
    let id = machine.load_module(&bytes, "wire").unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(5));
}

#[test]
fn a_missing_file_is_efilenotfound() {
    let mut machine = Machine::new();
    let exc = machine
        .load_module_file(Path::new("/definitely/not/here.09"))
        .unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EFileNotFound);
}

#[test]
fn a_wrong_magic_is_enotseptemberfile() {
    let mut machine = Machine::new();
    let exc = machine.load_module(b"\x7fELF-something", "bad").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::ENotSeptemberFile);
}

#[test]
fn truncation_is_eunexpectedeof() {
    let mut enc = Encoder::header();
    enc.varint(1);
    enc.0.push(0x02); // string constant...
    enc.varint(64); // ...that promises more bytes than the file has
    let mut machine = Machine::new();
    let exc = machine.load_module(&enc.0, "short").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EUnexpectedEOF);
}

#[test]
fn the_verifier_rejects_bad_bytecode_at_load_time() {
    // Structurally valid file whose body underflows the operand stack.
    let mut enc = Encoder::header();
    enc.varint(0);
    enc.body(&[op(Opcode::Pop), op(Opcode::Return)]);
    let bytes = enc.finish();

    let mut machine = Machine::new();
    let exc = machine.load_module(&bytes, "underflow").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EMalformedModuleFile);
}

#[test]
fn out_of_range_jumps_are_rejected_at_load_time() {
    let mut enc = Encoder::header();
    enc.varint(0);
    // Branch way past the end of the one-instruction block.
    enc.body(&[op(Opcode::Branch), 0x40, 0x00]);
    let bytes = enc.finish();

    let mut machine = Machine::new();
    let exc = machine.load_module(&bytes, "wild-jump").unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EMalformedModuleFile);
}
