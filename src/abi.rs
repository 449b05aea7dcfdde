// SPDX-License-Identifier: Apache-2.0
//
// Copyright (C) 2024, ARM Limited and contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may
// not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calling-convention facts of the observed 32-bit linear-memory ABI.
//!
//! Pointers are 4 bytes, integers default to 32-bit signed and variadic
//! arguments undergo default argument promotion: `char` and `short` widen to
//! `int` before being passed, `float` widens to `double`. Each promoted
//! argument is pushed aligned to its own size, with zero-filled padding
//! inserted as needed. These facts are pinned by fixture tests against the
//! target toolchain and are not re-derived at runtime.

use crate::{
    mem::{MemCursor, MemError},
    print::PrintSpecifier,
    value::Value,
};

/// Alias for an address inside the guest's linear memory.
pub type Address = u32;

/// Alias for an offset from the beginning of the linear memory buffer.
pub type MemOffset = usize;
/// Alias for the size of a region of the linear memory buffer.
pub type MemSize = MemOffset;
/// Alias for the alignment of a value in the linear memory buffer.
pub type MemAlign = MemOffset;

/// Size in bytes of a guest pointer.
pub const POINTER_SIZE: MemSize = 4;

/// Length modifier of a conversion specifier.
///
/// The grammar recognizes the whole set; modifiers with no matching
/// [VARARG_LAYOUT] row (such as [LengthMod::I32]) resolve to an invalid
/// specifier error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LengthMod {
    None,
    /// `h`
    H,
    /// `hh`
    Hh,
    /// `l`
    L,
    /// `ll`
    Ll,
    /// `L`
    BigL,
    /// `z`
    Z,
    /// `j`
    J,
    /// `t`
    T,
    /// `I`
    I,
    /// `I32`
    I32,
    /// `I64`
    I64,
    /// `q`
    Q,
}

impl LengthMod {
    /// Spelling of the modifier in a format string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthMod::None => "",
            LengthMod::H => "h",
            LengthMod::Hh => "hh",
            LengthMod::L => "l",
            LengthMod::Ll => "ll",
            LengthMod::BigL => "L",
            LengthMod::Z => "z",
            LengthMod::J => "j",
            LengthMod::T => "t",
            LengthMod::I => "I",
            LengthMod::I32 => "I32",
            LengthMod::I64 => "I64",
            LengthMod::Q => "q",
        }
    }
}

/// Raw class a variadic argument is decoded as, after default argument
/// promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VarargSpecifier {
    I32,
    U32,
    I64,
    U64,
    F64,
    /// Pointer to a NUL-terminated string.
    Str,
}

impl VarargSpecifier {
    /// Alignment of the promoted argument inside the variadic region.
    ///
    /// The compiler pushes each variadic argument at the next address that
    /// is a multiple of its promoted size, so 64-bit values may be preceded
    /// by 4 bytes of padding.
    #[inline]
    pub fn alignment(&self) -> MemAlign {
        match self {
            VarargSpecifier::I32 | VarargSpecifier::U32 | VarargSpecifier::Str => POINTER_SIZE,
            VarargSpecifier::I64 | VarargSpecifier::U64 | VarargSpecifier::F64 => 8,
        }
    }

    /// Read one promoted argument at the cursor position, without any
    /// alignment adjustment.
    pub fn read<'a>(&self, args: &mut MemCursor<'a>) -> Result<Value<'a>, MemError> {
        Ok(match self {
            VarargSpecifier::I32 => Value::I32(args.read_i32_le()?),
            VarargSpecifier::U32 => Value::U32(args.read_u32_le()?),
            VarargSpecifier::I64 => Value::I64(args.read_i64_le()?),
            VarargSpecifier::U64 => Value::U64(args.read_u64_le()?),
            VarargSpecifier::F64 => Value::F64(args.read_f64_le()?),
            VarargSpecifier::Str => {
                let mut deref = args.read_deref_pointer()?;
                Value::Str(deref.read_null_terminated()?)
            }
        })
    }

    /// Skip the alignment padding preceding the argument, then decode it.
    #[inline]
    pub fn decode<'a>(&self, args: &mut MemCursor<'a>) -> Result<Value<'a>, MemError> {
        args.align_to(self.alignment());
        self.read(args)
    }
}

/// One row of the variadic layout table: a set of length modifiers paired
/// with a set of conversions, and the decode class their combination maps
/// to.
#[derive(Debug, Clone, Copy)]
pub struct LayoutRule {
    pub length_mods: &'static [LengthMod],
    pub conversions: &'static [PrintSpecifier],
    pub vararg_spec: VarargSpecifier,
}

const INT_MODS: &[LengthMod] = &[
    LengthMod::None,
    LengthMod::H,
    LengthMod::Hh,
    LengthMod::L,
    LengthMod::Z,
    LengthMod::T,
];

const LONG_LONG_MODS: &[LengthMod] = &[LengthMod::Ll, LengthMod::J];

/// Map of (length modifier, conversion) pairs to the raw decode class.
///
/// Checked in order, first full match wins. Rows must not overlap in
/// (modifier, conversion) pair space or specifier resolution would become
/// ambiguous; a test asserts this. The narrow rows encode default argument
/// promotion: a `char` or `short` argument is always passed as a 32-bit
/// value, a `float` as a double, whatever the declared type was.
pub const VARARG_LAYOUT: &[LayoutRule] = &[
    LayoutRule {
        length_mods: INT_MODS,
        conversions: &[PrintSpecifier::Dec, PrintSpecifier::Char],
        vararg_spec: VarargSpecifier::I32,
    },
    LayoutRule {
        length_mods: INT_MODS,
        conversions: &[
            PrintSpecifier::Unsigned,
            PrintSpecifier::Hex,
            PrintSpecifier::UpperHex,
            PrintSpecifier::Oct,
            PrintSpecifier::Ptr,
        ],
        vararg_spec: VarargSpecifier::U32,
    },
    LayoutRule {
        length_mods: LONG_LONG_MODS,
        conversions: &[PrintSpecifier::Dec],
        vararg_spec: VarargSpecifier::I64,
    },
    LayoutRule {
        length_mods: LONG_LONG_MODS,
        conversions: &[
            PrintSpecifier::Unsigned,
            PrintSpecifier::Hex,
            PrintSpecifier::UpperHex,
            PrintSpecifier::Oct,
        ],
        vararg_spec: VarargSpecifier::U64,
    },
    LayoutRule {
        length_mods: &[LengthMod::BigL, LengthMod::None],
        conversions: &[
            PrintSpecifier::Fixed,
            PrintSpecifier::UpperFixed,
            PrintSpecifier::Sci,
            PrintSpecifier::UpperSci,
            PrintSpecifier::Shortest,
            PrintSpecifier::UpperShortest,
            PrintSpecifier::HexFloat,
            PrintSpecifier::UpperHexFloat,
        ],
        vararg_spec: VarargSpecifier::F64,
    },
    LayoutRule {
        length_mods: &[LengthMod::None],
        conversions: &[PrintSpecifier::Str],
        vararg_spec: VarargSpecifier::Str,
    },
];

/// Resolve a (length modifier, conversion) pair against [VARARG_LAYOUT].
pub fn resolve_vararg(length: LengthMod, conversion: PrintSpecifier) -> Option<VarargSpecifier> {
    VARARG_LAYOUT
        .iter()
        .find(|rule| {
            rule.length_mods.contains(&length) && rule.conversions.contains(&conversion)
        })
        .map(|rule| rule.vararg_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemWriter;

    const ALL_MODS: &[LengthMod] = &[
        LengthMod::None,
        LengthMod::H,
        LengthMod::Hh,
        LengthMod::L,
        LengthMod::Ll,
        LengthMod::BigL,
        LengthMod::Z,
        LengthMod::J,
        LengthMod::T,
        LengthMod::I,
        LengthMod::I32,
        LengthMod::I64,
        LengthMod::Q,
    ];

    const ALL_CONVERSIONS: &[PrintSpecifier] = &[
        PrintSpecifier::Dec,
        PrintSpecifier::Unsigned,
        PrintSpecifier::Hex,
        PrintSpecifier::UpperHex,
        PrintSpecifier::Oct,
        PrintSpecifier::Ptr,
        PrintSpecifier::Fixed,
        PrintSpecifier::UpperFixed,
        PrintSpecifier::Sci,
        PrintSpecifier::UpperSci,
        PrintSpecifier::Shortest,
        PrintSpecifier::UpperShortest,
        PrintSpecifier::HexFloat,
        PrintSpecifier::UpperHexFloat,
        PrintSpecifier::Str,
        PrintSpecifier::Char,
    ];

    #[test]
    fn layout_rules_are_mutually_exclusive_test() {
        for length in ALL_MODS {
            for conversion in ALL_CONVERSIONS {
                let matches = VARARG_LAYOUT
                    .iter()
                    .filter(|rule| {
                        rule.length_mods.contains(length)
                            && rule.conversions.contains(conversion)
                    })
                    .count();
                assert!(
                    matches <= 1,
                    "({length:?}, {conversion:?}) matches {matches} rows"
                );
            }
        }
    }

    #[test]
    fn promotion_test() {
        // A char or short argument is decoded as a full 32-bit value.
        for length in [LengthMod::None, LengthMod::H, LengthMod::Hh, LengthMod::L] {
            assert_eq!(
                resolve_vararg(length, PrintSpecifier::Dec),
                Some(VarargSpecifier::I32)
            );
            assert_eq!(
                resolve_vararg(length, PrintSpecifier::Hex),
                Some(VarargSpecifier::U32)
            );
        }
        // A float argument is always promoted to double.
        assert_eq!(
            resolve_vararg(LengthMod::None, PrintSpecifier::Fixed),
            Some(VarargSpecifier::F64)
        );
        assert_eq!(
            resolve_vararg(LengthMod::BigL, PrintSpecifier::Sci),
            Some(VarargSpecifier::F64)
        );

        assert_eq!(
            resolve_vararg(LengthMod::Ll, PrintSpecifier::Dec),
            Some(VarargSpecifier::I64)
        );
        assert_eq!(
            resolve_vararg(LengthMod::J, PrintSpecifier::UpperHex),
            Some(VarargSpecifier::U64)
        );
        assert_eq!(
            resolve_vararg(LengthMod::None, PrintSpecifier::Str),
            Some(VarargSpecifier::Str)
        );
    }

    #[test]
    fn unmatched_pairs_test() {
        assert_eq!(resolve_vararg(LengthMod::H, PrintSpecifier::Str), None);
        assert_eq!(resolve_vararg(LengthMod::Ll, PrintSpecifier::Ptr), None);
        assert_eq!(resolve_vararg(LengthMod::Ll, PrintSpecifier::Fixed), None);
        assert_eq!(resolve_vararg(LengthMod::BigL, PrintSpecifier::Dec), None);
        // Recognized by the grammar but absent from every row.
        for length in [LengthMod::I, LengthMod::I32, LengthMod::I64, LengthMod::Q] {
            for conversion in ALL_CONVERSIONS {
                assert_eq!(resolve_vararg(length, *conversion), None);
            }
        }
    }

    #[test]
    fn decode_test() {
        let mut buf = vec![0u8; 32];
        {
            let mut writer = MemWriter::new(&mut buf);
            writer.write_all(&(-14_i32).to_le_bytes()).unwrap();
            // 4 bytes of padding: the 64-bit argument is pushed 8-aligned.
            writer.jump_to(8);
            writer.write_all(&9007199254740993_i64.to_le_bytes()).unwrap();
            writer.write_all(&1.5_f64.to_le_bytes()).unwrap();
            writer.write_u32_le(28).unwrap();
            writer.write_all(b"hi\0").unwrap();
        }
        let mut args = MemCursor::new(&buf);
        assert_eq!(
            VarargSpecifier::I32.decode(&mut args),
            Ok(Value::I32(-14))
        );
        assert_eq!(
            VarargSpecifier::I64.decode(&mut args),
            Ok(Value::I64(9007199254740993))
        );
        assert_eq!(VarargSpecifier::F64.decode(&mut args), Ok(Value::F64(1.5)));
        assert_eq!(
            VarargSpecifier::Str.decode(&mut args),
            Ok(Value::Str("hi"))
        );
        assert_eq!(args.offset(), 28);
    }

    #[test]
    fn decode_alignment_test() {
        // A 32-bit argument followed by a 64-bit one: the compiler leaves 4
        // bytes of zero padding so the 64-bit value sits on its own
        // alignment.
        let mut buf = vec![0u8; 16];
        {
            let mut writer = MemWriter::new(&mut buf);
            writer.write_all(&65_i32.to_le_bytes()).unwrap();
            writer.jump_to(8);
            writer.write_all(&0xDEADBEEFDEADBEEF_u64.to_le_bytes()).unwrap();
        }
        let mut args = MemCursor::new(&buf);
        assert_eq!(VarargSpecifier::I32.decode(&mut args), Ok(Value::I32(65)));
        assert_eq!(args.offset(), 4);
        assert_eq!(
            VarargSpecifier::U64.decode(&mut args),
            Ok(Value::U64(0xDEADBEEFDEADBEEF))
        );
        assert_eq!(args.offset(), 16);
    }
}
