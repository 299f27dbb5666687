//! Module-file decoding.
//!
//! Consumes the September module format: a magic/version header, a constant
//! pool, a function table (entry 0 is the module body), and an end marker.
//! Integers travel as zigzag LEB128 varints, strings as length-prefixed
//! UTF-8. The decoder only builds a [`ModuleImage`]; structural validation of
//! the bytecode itself happens in the verifier at installation.
//!
//! Error mapping follows the original taxonomy: a missing file is
//! `EFileNotFound`, a wrong magic is `ENotSeptemberFile`, running out of
//! bytes anywhere is `EUnexpectedEOF`, and everything else wrong with the
//! content is `EMalformedModuleFile`.

use std::{io, path::Path};

use crate::{
    exceptions::{ExcType, SepError, SepResult},
    module::{BlockImage, ConstantValue, ModuleImage, ParamFlags, ParamImage},
    value::{SEP_INT_MAX, SEP_INT_MIN},
};

/// First bytes of every September module file.
pub const MODULE_MAGIC: &[u8; 4] = b"SEPT";
/// The only format version this loader understands.
pub const MODULE_VERSION: u8 = 0x01;

/// Marks the end of a well-formed module file.
const END_MARKER: u8 = 0xFF;

/// Constant pool entry tags.
const CONST_INT: u8 = 0x01;
const CONST_STR: u8 = 0x02;
const CONST_REF: u8 = 0x03;

/// Reads a module file from disk.
pub(crate) fn load_file(path: &Path) -> SepResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => ExcType::file_not_found(&path.display().to_string()),
        _ => SepError::exc(
            ExcType::EInternal,
            format!("Unable to read '{}': {err}.", path.display()),
        ),
    })
}

/// Decodes module bytes into an image.
pub(crate) fn decode_module(bytes: &[u8], name: &str) -> SepResult<ModuleImage> {
    let mut reader = Reader::new(bytes);

    let magic = reader.take(MODULE_MAGIC.len())?;
    if magic != MODULE_MAGIC {
        return Err(ExcType::not_september_file());
    }
    let version = reader.byte()?;
    if version != MODULE_VERSION {
        return Err(ExcType::malformed_module(format!(
            "unsupported format version {version}"
        )));
    }

    let constants = decode_constant_pool(&mut reader)?;
    let blocks = decode_function_table(&mut reader, &constants)?;

    if reader.byte()? != END_MARKER {
        return Err(ExcType::malformed_module("missing end marker"));
    }

    Ok(ModuleImage {
        name: name.to_owned(),
        constants,
        blocks,
    })
}

fn decode_constant_pool(reader: &mut Reader<'_>) -> SepResult<Vec<ConstantValue>> {
    let count = reader.varint_len("constant pool size")?;
    let mut constants = Vec::with_capacity(count);
    for _ in 0..count {
        let entry = match reader.byte()? {
            CONST_INT => {
                let value = reader.varint_i64()?;
                if !(SEP_INT_MIN..=SEP_INT_MAX).contains(&value) {
                    return Err(ExcType::malformed_module("integer constant out of range"));
                }
                ConstantValue::Int(value)
            }
            CONST_STR => {
                let len = reader.varint_len("string length")?;
                let bytes = reader.take(len)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| ExcType::malformed_module("invalid UTF-8 in string constant"))?;
                ConstantValue::Str(text.to_owned())
            }
            CONST_REF => {
                let index = reader.varint_len("constant reference")?;
                constants
                    .get(index)
                    .cloned()
                    .ok_or_else(|| ExcType::malformed_module("constant reference to a later entry"))?
            }
            tag => return Err(ExcType::malformed_module(format!("unknown constant tag 0x{tag:02x}"))),
        };
        constants.push(entry);
    }
    Ok(constants)
}

fn decode_function_table(reader: &mut Reader<'_>, constants: &[ConstantValue]) -> SepResult<Vec<BlockImage>> {
    let count = reader.varint_len("function table size")?;
    if count == 0 {
        return Err(ExcType::malformed_module("module has no body block"));
    }
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let param_count = reader.varint_len("parameter count")?;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let flags = ParamFlags::from_bits(reader.byte()?)
                .ok_or_else(|| ExcType::malformed_module("unknown parameter flags"))?;
            let name = reader.varint_u16("parameter name index")?;
            if usize::from(name) >= constants.len() {
                return Err(ExcType::malformed_module("parameter name index out of range"));
            }
            let default_block = if flags.contains(ParamFlags::HAS_DEFAULT) {
                Some(reader.varint_u16("default thunk index")?)
            } else {
                None
            };
            params.push(ParamImage {
                name,
                flags,
                default_block,
            });
        }
        let code_len = reader.varint_len("instruction buffer length")?;
        let code = reader.take(code_len)?.to_vec();
        blocks.push(BlockImage { params, code });
    }
    Ok(blocks)
}

/// Byte cursor over a module file.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> SepResult<u8> {
        let b = self.data.get(self.pos).copied().ok_or_else(ExcType::unexpected_eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> SepResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(ExcType::unexpected_eof)?;
        let slice = self.data.get(self.pos..end).ok_or_else(ExcType::unexpected_eof)?;
        self.pos = end;
        Ok(slice)
    }

    /// Unsigned LEB128.
    fn varint_u64(&mut self) -> SepResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 63 && byte > 1 {
                return Err(ExcType::malformed_module("varint too long"));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Zigzag-encoded signed varint.
    fn varint_i64(&mut self) -> SepResult<i64> {
        let raw = self.varint_u64()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn varint_len(&mut self, what: &str) -> SepResult<usize> {
        let raw = self.varint_u64()?;
        usize::try_from(raw).map_err(|_| ExcType::malformed_module(format!("{what} out of range")))
    }

    fn varint_u16(&mut self, what: &str) -> SepResult<u16> {
        let raw = self.varint_u64()?;
        u16::try_from(raw).map_err(|_| ExcType::malformed_module(format!("{what} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::ExcType;

    /// Test-side encoder mirroring the wire format.
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
            self.0.push(CONST_INT);
            self.varint(zigzag(value))
        }

        fn str_const(&mut self, text: &str) -> &mut Self {
            self.0.push(CONST_STR);
            self.varint(text.len() as u64);
            self.0.extend_from_slice(text.as_bytes());
            self
        }
    }

    fn zigzag(value: i64) -> u64 {
        ((value as u64) << 1) ^ ((value >> 63) as u64)
    }

    fn exc_type(err: crate::exceptions::SepError) -> ExcType {
        match err {
            crate::exceptions::SepError::Exc(exc) => exc.exc_type,
            crate::exceptions::SepError::Fatal(msg) => panic!("unexpected fatal error: {msg}"),
        }
    }

    #[test]
    fn minimal_module_decodes() {
        let mut enc = Encoder::header();
        enc.varint(2);
        enc.int_const(-3).str_const("greet");
        // one body block: no params, 1-byte code buffer
        enc.varint(1).varint(0).varint(1);
        enc.0.push(0x08); // Return (not verified here)
        enc.0.push(END_MARKER);

        let image = decode_module(&enc.0, "m").unwrap();
        assert_eq!(image.constants, vec![
            ConstantValue::Int(-3),
            ConstantValue::Str("greet".to_owned())
        ]);
        assert_eq!(image.blocks.len(), 1);
        assert_eq!(image.blocks[0].code, vec![0x08]);
    }

    #[test]
    fn constant_references_copy_earlier_entries() {
        let mut enc = Encoder::header();
        enc.varint(2);
        enc.str_const("x");
        enc.0.push(CONST_REF);
        enc.varint(0);
        enc.varint(1).varint(0).varint(1);
        enc.0.push(0x08);
        enc.0.push(END_MARKER);

        let image = decode_module(&enc.0, "m").unwrap();
        assert_eq!(image.constants[0], image.constants[1]);
    }

    #[test]
    fn wrong_magic_is_not_a_september_file() {
        let err = decode_module(b"ELF\x01rest", "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::ENotSeptemberFile);
    }

    #[test]
    fn truncation_is_unexpected_eof() {
        let mut enc = Encoder::header();
        enc.varint(1);
        enc.0.push(CONST_STR);
        enc.varint(100); // promises 100 bytes, provides none
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EUnexpectedEOF);
    }

    #[test]
    fn unknown_constant_tags_are_malformed() {
        let mut enc = Encoder::header();
        enc.varint(1);
        enc.0.push(0x7A);
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EMalformedModuleFile);
    }

    #[test]
    fn out_of_range_integer_constants_are_malformed() {
        let mut enc = Encoder::header();
        enc.varint(1);
        enc.int_const(i64::MAX);
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EMalformedModuleFile);
    }

    #[test]
    fn empty_function_table_is_malformed() {
        let mut enc = Encoder::header();
        enc.varint(0); // constants
        enc.varint(0); // functions
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EMalformedModuleFile);
    }

    #[test]
    fn missing_end_marker_is_detected() {
        let mut enc = Encoder::header();
        enc.varint(0);
        enc.varint(1).varint(0).varint(1);
        enc.0.push(0x08);
        // no end marker at all -> EOF
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EUnexpectedEOF);

        // a wrong trailing byte -> malformed
        enc.0.push(0x00);
        let err = decode_module(&enc.0, "m").unwrap_err();
        assert_eq!(exc_type(err), ExcType::EMalformedModuleFile);
    }

    #[test]
    fn zigzag_round_trips_negative_values() {
        for value in [0i64, -1, 1, -64, 63, SEP_INT_MIN, SEP_INT_MAX] {
            let mut enc = Encoder::default();
            enc.varint(zigzag(value));
            let mut reader = Reader::new(&enc.0);
            assert_eq!(reader.varint_i64().unwrap(), value);
        }
    }
}
