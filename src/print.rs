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

//! Decode and render intercepted printf-style calls according to their
//! format string.

use core::{
    fmt,
    str::{Utf8Error, from_utf8},
};

use bitflags::bitflags;
use itertools::Itertools as _;
use nom::{
    Finish as _, IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map_res, opt},
    multi::many0,
    sequence::preceded,
};
use once_cell::sync::OnceCell;

use crate::{
    abi::{self, Address, LengthMod, MemOffset, VarargSpecifier},
    error::boxed_from_impl,
    mem::{MemCursor, MemError},
    value::{Value, render},
};

/// Conversion characters recognized by the grammar.
const CONVERSION_CHARS: &str = "diufFeEgGxXoscpaA";

/// Parsed printf-style format string.
#[derive(Debug, Clone)]
pub struct PrintFmtStr {
    pub atoms: Vec<PrintAtom>,
    vararg_specs: OnceCell<Vec<VarargSpecifier>>,
}

impl PartialEq<Self> for PrintFmtStr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.atoms == other.atoms
    }
}

impl Eq for PrintFmtStr {}

/// Atom of a printf-style format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintAtom {
    /// A fixed string is e.g. "foobar" where no non-escaped % appears.
    Fixed(String),
    /// Variable atoms specify how to decode and render a runtime value
    /// interpolated into the format string.
    Variable {
        /// How to decode the value from the variadic-argument region.
        vararg_spec: VarargSpecifier,
        /// How to render the decoded value.
        print_spec: PrintSpecifier,
    },
}

/// Conversion kind of a specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrintSpecifier {
    /// `d`, `i`
    Dec,
    /// `u`
    Unsigned,
    /// `x`
    Hex,
    /// `X`
    UpperHex,
    /// `o`
    Oct,
    /// `p`
    Ptr,
    /// `f`
    Fixed,
    /// `F`
    UpperFixed,
    /// `e`
    Sci,
    /// `E`
    UpperSci,
    /// `g`
    Shortest,
    /// `G`
    UpperShortest,
    /// `a`
    HexFloat,
    /// `A`
    UpperHexFloat,
    /// `s`
    Str,
    /// `c`
    Char,
}

impl PrintSpecifier {
    /// Map a conversion character to its kind.
    pub fn from_conversion(c: char) -> Option<Self> {
        match c {
            'd' | 'i' => Some(PrintSpecifier::Dec),
            'u' => Some(PrintSpecifier::Unsigned),
            'x' => Some(PrintSpecifier::Hex),
            'X' => Some(PrintSpecifier::UpperHex),
            'o' => Some(PrintSpecifier::Oct),
            'p' => Some(PrintSpecifier::Ptr),
            'f' => Some(PrintSpecifier::Fixed),
            'F' => Some(PrintSpecifier::UpperFixed),
            'e' => Some(PrintSpecifier::Sci),
            'E' => Some(PrintSpecifier::UpperSci),
            'g' => Some(PrintSpecifier::Shortest),
            'G' => Some(PrintSpecifier::UpperShortest),
            'a' => Some(PrintSpecifier::HexFloat),
            'A' => Some(PrintSpecifier::UpperHexFloat),
            's' => Some(PrintSpecifier::Str),
            'c' => Some(PrintSpecifier::Char),
            _ => None,
        }
    }
}

bitflags! {
    /// Flags of a printf-style specifier.
    ///
    /// The grammar collects them only so a rejected specifier can be
    /// reported verbatim; no flag is actually modeled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct PrintFlags: u8 {
        /// -
        const LeftJustify = 1;

        /// +
        const PositiveSign = 2;

        /// space
        const SignPlaceholder = 4;

        /// 0
        const ZeroPad = 8;

        /// '
        const GroupSeparator = 16;

        /// #
        const BasePrefix = 32;
    }
}

/// Width or precision amount as written in the format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawAmount {
    Fixed(u64),
    /// `*`: taken from the argument list.
    Dynamic,
}

impl RawAmount {
    fn push_text(&self, s: &mut String) {
        match self {
            RawAmount::Fixed(x) => s.push_str(&x.to_string()),
            RawAmount::Dynamic => s.push('*'),
        }
    }
}

/// Structural parse of one conversion specifier, before any policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawSpecifier {
    flags: PrintFlags,
    width: Option<RawAmount>,
    precision: Option<RawAmount>,
    length: LengthMod,
    conversion: char,
}

impl RawSpecifier {
    /// Reconstructed specifier text, for error messages.
    fn text(&self) -> String {
        let mut s = String::from("%");
        for (flag, c) in [
            (PrintFlags::LeftJustify, '-'),
            (PrintFlags::PositiveSign, '+'),
            (PrintFlags::SignPlaceholder, ' '),
            (PrintFlags::ZeroPad, '0'),
            (PrintFlags::GroupSeparator, '\''),
            (PrintFlags::BasePrefix, '#'),
        ] {
            if self.flags.contains(flag) {
                s.push(c);
            }
        }
        if let Some(width) = &self.width {
            width.push_text(&mut s);
        }
        if let Some(precision) = &self.precision {
            s.push('.');
            precision.push_text(&mut s);
        }
        s.push_str(self.length.as_str());
        s.push(self.conversion);
        s
    }
}

/// Errors detected when parsing a printf-style format string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum PrintFmtError {
    /// Flags, field width and precision are recognized by the grammar but
    /// deliberately not modeled; their presence is a hard error rather than
    /// an approximation.
    #[error("Unsupported format specifier \"{0}\"")]
    UnsupportedFeature(String),

    /// No layout rule matches the (length modifier, conversion) pair.
    #[error("Invalid format specifier \"{0}\"")]
    InvalidSpecifier(String),

    #[error("Could not parse the format string near \"{0}\"")]
    ParseError(String),

    #[error("Could not decode UTF-8 string: {0}")]
    DecodeUtf8(String),
}

impl From<Utf8Error> for PrintFmtError {
    fn from(x: Utf8Error) -> PrintFmtError {
        PrintFmtError::DecodeUtf8(x.to_string())
    }
}

/// Main error type when interpolating a format string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum PrintError {
    #[error("Missing value to interpolate in the format string")]
    MissingValue,

    #[error("Value cannot be rendered as an integer: {0}")]
    NotAnInteger(String),

    #[error("Value cannot be rendered as a float: {0}")]
    NotAFloat(String),

    #[error("Value cannot be rendered as a string: {0}")]
    NotAString(String),

    #[error("Error while formatting string: {0}")]
    FmtError(Box<fmt::Error>),

    #[error("Error while decoding the variadic argument region: {0}")]
    MemError(Box<MemError>),
}

boxed_from_impl!(fmt::Error, FmtError, PrintError);
boxed_from_impl!(MemError, MemError, PrintError);

/// Top-level error of [format_varargs].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum FormatError {
    #[error("Error while reading the format string: {0}")]
    MemError(Box<MemError>),

    #[error("Error while parsing the format string: {0}")]
    PrintFmtError(Box<PrintFmtError>),

    #[error("Error while interpolating the format string: {0}")]
    PrintError(Box<PrintError>),
}

boxed_from_impl!(MemError, MemError, FormatError);
boxed_from_impl!(PrintFmtError, PrintFmtError, FormatError);
boxed_from_impl!(PrintError, PrintError, FormatError);

fn flag(input: &[u8]) -> IResult<&[u8], PrintFlags> {
    alt((
        char('-').map(|_| PrintFlags::LeftJustify),
        char('+').map(|_| PrintFlags::PositiveSign),
        char(' ').map(|_| PrintFlags::SignPlaceholder),
        char('0').map(|_| PrintFlags::ZeroPad),
        char('\'').map(|_| PrintFlags::GroupSeparator),
        char('#').map(|_| PrintFlags::BasePrefix),
    ))
    .parse(input)
}

fn length_mod(input: &[u8]) -> IResult<&[u8], LengthMod> {
    // Longest match first so e.g. "ll" never parses as "l" followed by a
    // stray character.
    alt((
        tag("hh").map(|_| LengthMod::Hh),
        tag("ll").map(|_| LengthMod::Ll),
        tag("I64").map(|_| LengthMod::I64),
        tag("I32").map(|_| LengthMod::I32),
        char('h').map(|_| LengthMod::H),
        char('l').map(|_| LengthMod::L),
        char('L').map(|_| LengthMod::BigL),
        char('z').map(|_| LengthMod::Z),
        char('j').map(|_| LengthMod::J),
        char('t').map(|_| LengthMod::T),
        char('I').map(|_| LengthMod::I),
        char('q').map(|_| LengthMod::Q),
    ))
    .parse(input)
}

fn raw_amount(input: &[u8]) -> IResult<&[u8], RawAmount> {
    alt((
        char('*').map(|_| RawAmount::Dynamic),
        map_res(digit1, |digits: &[u8]| {
            // digit1 only matches ASCII digits
            from_utf8(digits)
                .unwrap()
                .parse::<u64>()
                .map(RawAmount::Fixed)
        }),
    ))
    .parse(input)
}

fn raw_specifier(input: &[u8]) -> IResult<&[u8], RawSpecifier> {
    (
        many0(flag),
        opt(raw_amount),
        opt(preceded(char('.'), raw_amount)),
        opt(length_mod),
        one_of(CONVERSION_CHARS),
    )
        .map(|(flags, width, precision, length, conversion)| RawSpecifier {
            flags: PrintFlags::from_iter(flags),
            width,
            precision,
            length: length.unwrap_or(LengthMod::None),
            conversion,
        })
        .parse(input)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawAtom<'a> {
    Literal(&'a [u8]),
    Percent,
    Spec(RawSpecifier),
}

fn raw_atom(input: &[u8]) -> IResult<&[u8], RawAtom<'_>> {
    alt((
        preceded(
            char('%'),
            alt((
                char('%').map(|_| RawAtom::Percent),
                raw_specifier.map(RawAtom::Spec),
            )),
        ),
        is_not("%").map(RawAtom::Literal),
    ))
    .parse(input)
}

fn snippet(input: &[u8]) -> String {
    let s = String::from_utf8_lossy(input);
    match s.char_indices().nth(24) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.into_owned(),
    }
}

impl PrintFmtStr {
    /// Parse a printf-style format string.
    ///
    /// A specifier carrying a flag, field width or precision fails with
    /// [PrintFmtError::UnsupportedFeature]; a (length modifier, conversion)
    /// pair with no layout rule fails with
    /// [PrintFmtError::InvalidSpecifier]. A `%` sequence the grammar does
    /// not recognize at all is a [PrintFmtError::ParseError].
    pub fn try_new(fmt: &[u8]) -> Result<Self, PrintFmtError> {
        let (_, raw_atoms) = all_consuming(many0(raw_atom))
            .parse(fmt)
            .finish()
            .map_err(|err| PrintFmtError::ParseError(snippet(err.input)))?;

        let mut atoms = Vec::with_capacity(raw_atoms.len());
        for raw in raw_atoms {
            match raw {
                RawAtom::Literal(s) => atoms.push(PrintAtom::Fixed(from_utf8(s)?.into())),
                RawAtom::Percent => atoms.push(PrintAtom::Fixed("%".into())),
                RawAtom::Spec(spec) => {
                    if !spec.flags.is_empty() || spec.width.is_some() || spec.precision.is_some() {
                        return Err(PrintFmtError::UnsupportedFeature(spec.text()));
                    }
                    let print_spec = PrintSpecifier::from_conversion(spec.conversion)
                        .ok_or_else(|| PrintFmtError::InvalidSpecifier(spec.text()))?;
                    let vararg_spec = abi::resolve_vararg(spec.length, print_spec)
                        .ok_or_else(|| PrintFmtError::InvalidSpecifier(spec.text()))?;
                    atoms.push(PrintAtom::Variable {
                        vararg_spec,
                        print_spec,
                    });
                }
            }
        }

        // Merge consecutive PrintAtom::Fixed together
        let mut merged = Vec::with_capacity(atoms.len());
        for (is_fixed, group) in &atoms
            .iter()
            .chunk_by(|atom| matches!(atom, PrintAtom::Fixed(_)))
        {
            if is_fixed {
                let merged_s: String = group
                    .map(|atom| match atom {
                        PrintAtom::Fixed(s) => s.as_str(),
                        _ => panic!("Expected fixed atom"),
                    })
                    .collect();
                merged.push(PrintAtom::Fixed(merged_s));
            } else {
                merged.extend(group.cloned());
            }
        }

        Ok(PrintFmtStr {
            atoms: merged,
            vararg_specs: OnceCell::new(),
        })
    }

    fn vararg_specs(&self) -> &[VarargSpecifier] {
        self.vararg_specs.get_or_init(|| {
            self.atoms
                .iter()
                .filter_map(|atom| match atom {
                    PrintAtom::Variable { vararg_spec, .. } => Some(*vararg_spec),
                    _ => None,
                })
                .collect()
        })
    }

    /// Decode the variadic arguments of this format string, starting at the
    /// `args` cursor position.
    ///
    /// Decoding stops at the first error: the memory state cannot change
    /// mid-call, so retrying would reproduce the identical failure.
    pub fn vararg_values<'a>(
        &'a self,
        mut args: MemCursor<'a>,
    ) -> impl Iterator<Item = Result<Value<'a>, MemError>> + 'a {
        let mut specs = self.vararg_specs().iter();
        let mut failed = false;
        core::iter::from_fn(move || {
            if failed {
                return None;
            }
            let spec = specs.next()?;
            let res = spec.decode(&mut args);
            failed = res.is_err();
            Some(res)
        })
    }

    /// Interpolate the variadic arguments at `args` and write the rendered
    /// text to `out`.
    pub fn interpolate_varargs<'a, W>(
        &'a self,
        out: &mut W,
        args: MemCursor<'a>,
    ) -> Result<(), PrintError>
    where
        W: fmt::Write + ?Sized,
    {
        let mut values = self.vararg_values(args);
        for atom in &self.atoms {
            match atom {
                PrintAtom::Fixed(s) => out.write_str(s)?,
                PrintAtom::Variable { print_spec, .. } => {
                    let val = values.next().ok_or(PrintError::MissingValue)??;
                    render(*print_spec, &val, out)?;
                }
            }
        }
        Ok(())
    }
}

/// Render the formatted text of one intercepted printf-style call.
///
/// `fmt_ptr` is the guest address of the NUL-terminated format string and
/// `va_ptr` the guest address of the packed variadic-argument region, both
/// within `mem`. The variadic region is expected to start 8-aligned, the way
/// the compiler lays it out; argument alignment is computed relative to the
/// start of the buffer.
pub fn format_varargs(
    mem: &[u8],
    fmt_ptr: Address,
    va_ptr: Address,
) -> Result<String, FormatError> {
    let mut fmt_cursor = MemCursor::new(mem);
    fmt_cursor.jump_to(fmt_ptr as MemOffset);
    let fmt = PrintFmtStr::try_new(fmt_cursor.read_null_terminated()?.as_bytes())?;

    let mut args = MemCursor::new(mem);
    args.jump_to(va_ptr as MemOffset);

    let mut out = String::new();
    fmt.interpolate_varargs(&mut out, args)?;
    Ok(out)
}
